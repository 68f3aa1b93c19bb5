use core::fmt;

use crypto_common::typenum::Unsigned;
use crypto_common::OutputSizeUser;
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256};

use crate::error::RnsError;

pub const HASH_SIZE: usize = <<Sha256 as OutputSizeUser>::OutputSize as Unsigned>::USIZE;
pub const ADDRESS_HASH_SIZE: usize = 16;

/// SHA-256 over `data`.
pub fn full_hash(data: &[u8]) -> [u8; HASH_SIZE] {
    Sha256::new().chain_update(data).finalize().into()
}

/// First [`ADDRESS_HASH_SIZE`] bytes of [`full_hash`], the addressing
/// primitive used throughout the stack.
pub fn truncated_hash(data: &[u8]) -> [u8; ADDRESS_HASH_SIZE] {
    let digest = full_hash(data);
    let mut out = [0u8; ADDRESS_HASH_SIZE];
    out.copy_from_slice(&digest[..ADDRESS_HASH_SIZE]);
    out
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct Hash([u8; HASH_SIZE]);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct AddressHash([u8; ADDRESS_HASH_SIZE]);

impl Hash {
    pub fn generator() -> Sha256 {
        Sha256::new()
    }

    pub const fn new(hash: [u8; HASH_SIZE]) -> Self {
        Self(hash)
    }

    pub fn new_from_slice(data: &[u8]) -> Self {
        Self(full_hash(data))
    }

    pub fn new_from_rand<R: CryptoRngCore>(mut rng: R) -> Self {
        let mut seed = [0u8; HASH_SIZE];
        rng.fill_bytes(&mut seed);
        Self(full_hash(&seed))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; HASH_SIZE] {
        self.0
    }
}

impl AddressHash {
    pub const fn new(hash: [u8; ADDRESS_HASH_SIZE]) -> Self {
        Self(hash)
    }

    pub const fn new_empty() -> Self {
        Self([0u8; ADDRESS_HASH_SIZE])
    }

    pub fn new_from_slice(data: &[u8]) -> Self {
        Self(truncated_hash(data))
    }

    pub fn new_from_hash(hash: &Hash) -> Self {
        let mut truncated = [0u8; ADDRESS_HASH_SIZE];
        truncated.copy_from_slice(&hash.0[..ADDRESS_HASH_SIZE]);
        Self(truncated)
    }

    pub fn new_from_rand<R: CryptoRngCore>(rng: R) -> Self {
        Self::new_from_hash(&Hash::new_from_rand(rng))
    }

    pub fn try_from_slice(data: &[u8]) -> Result<Self, RnsError> {
        if data.len() != ADDRESS_HASH_SIZE {
            return Err(RnsError::IncorrectHash);
        }
        let mut bytes = [0u8; ADDRESS_HASH_SIZE];
        bytes.copy_from_slice(data);
        Ok(Self(bytes))
    }

    pub fn new_from_hex_string(hex_string: &str) -> Result<Self, RnsError> {
        let bytes = hex::decode(hex_string.trim()).map_err(|_| RnsError::IncorrectHash)?;
        Self::try_from_slice(&bytes)
    }

    pub fn to_hex_string(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub const fn len(&self) -> usize {
        ADDRESS_HASH_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }
}

impl From<Hash> for AddressHash {
    fn from(hash: Hash) -> Self {
        Self::new_from_hash(&hash)
    }
}

impl Default for AddressHash {
    fn default() -> Self {
        Self::new_empty()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;

    use super::{full_hash, truncated_hash, AddressHash};

    #[test]
    fn truncated_is_full_prefix() {
        let full = full_hash(b"reticulum");
        let truncated = truncated_hash(b"reticulum");
        assert_eq!(&full[..16], &truncated[..]);
    }

    #[test]
    fn address_hex_string_roundtrip() {
        let original = AddressHash::new_from_rand(OsRng);
        let parsed = AddressHash::new_from_hex_string(&original.to_hex_string()).expect("valid hex");
        assert_eq!(parsed, original);
    }

    #[test]
    fn address_rejects_wrong_length_hex() {
        assert!(AddressHash::new_from_hex_string("abcd").is_err());
    }
}
