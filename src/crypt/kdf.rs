use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::RnsError;

/// HKDF-SHA-256 expansion of `ikm` into `length` bytes. An empty or
/// absent salt falls back to the RFC 5869 zeroed block, matching the
/// reference implementation.
pub fn hkdf(
    length: usize,
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: Option<&[u8]>,
) -> Result<Vec<u8>, RnsError> {
    if length == 0 || ikm.is_empty() {
        return Err(RnsError::InvalidArgument);
    }

    let salt = salt.filter(|salt| !salt.is_empty());
    let kdf = Hkdf::<Sha256>::new(salt, ikm);

    let mut derived = vec![0u8; length];
    kdf.expand(info.unwrap_or(&[]), &mut derived).map_err(|_| RnsError::InvalidArgument)?;

    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::hkdf;

    #[test]
    fn rejects_empty_inputs() {
        assert!(hkdf(0, b"key", None, None).is_err());
        assert!(hkdf(32, b"", None, None).is_err());
    }

    #[test]
    fn derives_requested_length() {
        let derived = hkdf(64, b"input keying material", Some(b"salt"), None).expect("derive");
        assert_eq!(derived.len(), 64);
        let again = hkdf(64, b"input keying material", Some(b"salt"), None).expect("derive");
        assert_eq!(derived, again);
    }
}
