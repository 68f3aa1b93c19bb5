use ed25519_dalek::SIGNATURE_LENGTH;

use crate::config::CoreConfig;
use crate::crypt::kdf;
use crate::error::RnsError;
use crate::hash::full_hash;
use crate::identity::PrivateIdentity;
use crate::packet::{PacketIfac, PACKET_IFAC_MAX_LENGTH};

/// Fixed derivation salt shared by every Reticulum network.
pub const IFAC_SALT: [u8; 32] = [
    0xad, 0xf5, 0x4d, 0x88, 0x2c, 0x9a, 0x9b, 0x80, 0x77, 0x1e, 0xb4, 0x99, 0x5d, 0x70, 0x2d,
    0x4a, 0x3e, 0x73, 0x33, 0x91, 0xb2, 0xa0, 0xf5, 0x3f, 0x41, 0x6d, 0x9f, 0x90, 0x7e, 0x55,
    0xcf, 0xf8,
];

pub const IFAC_KEY_LENGTH: usize = 64;
pub const IFAC_MIN_SIZE: usize = 1;
pub const DEFAULT_IFAC_SIZE: usize = 16;

const IFAC_FLAG: u8 = 0x80;

/// Per-network isolation credentials: the derived 64-byte key and the
/// signing identity built from it. Two credential values are the same
/// network iff their key bytes match.
#[derive(Clone)]
pub struct IfacCredentials {
    key: [u8; IFAC_KEY_LENGTH],
    identity: PrivateIdentity,
    size: usize,
}

impl IfacCredentials {
    /// Derives credentials from the configured network name and/or
    /// passphrase. Both absent means the interface runs unrestricted.
    /// A derivation failure is a configuration error, never defaulted.
    pub fn derive(
        netname: Option<&str>,
        netkey: Option<&str>,
        size: usize,
    ) -> Result<Option<Self>, RnsError> {
        if netname.is_none() && netkey.is_none() {
            return Ok(None);
        }

        if !(IFAC_MIN_SIZE..=PACKET_IFAC_MAX_LENGTH).contains(&size) {
            return Err(RnsError::ConfigError);
        }

        let mut origin = Vec::with_capacity(64);
        if let Some(netname) = netname {
            origin.extend_from_slice(&full_hash(netname.as_bytes()));
        }
        if let Some(netkey) = netkey {
            origin.extend_from_slice(&full_hash(netkey.as_bytes()));
        }
        let origin_hash = full_hash(&origin);

        let derived = kdf::hkdf(IFAC_KEY_LENGTH, &origin_hash, Some(&IFAC_SALT), None)
            .map_err(|_| RnsError::ConfigError)?;
        let mut key = [0u8; IFAC_KEY_LENGTH];
        key.copy_from_slice(&derived);

        let identity =
            PrivateIdentity::from_private_key_bytes(&key).map_err(|_| RnsError::ConfigError)?;

        Ok(Some(Self { key, identity, size }))
    }

    pub fn key_bytes(&self) -> &[u8; IFAC_KEY_LENGTH] {
        &self.key
    }

    pub fn identity(&self) -> &PrivateIdentity {
        &self.identity
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Signs and masks an outgoing frame: the access code is the tail of
    /// an Ed25519 signature over the open frame, inserted after the hops
    /// byte, and everything except the code is XORed with an HKDF mask
    /// keyed by the code itself.
    pub fn mask_outbound(&self, raw: &[u8]) -> Result<Vec<u8>, RnsError> {
        if raw.len() < 2 {
            return Err(RnsError::InvalidArgument);
        }

        let signature = self.identity.sign(raw).to_bytes();
        let code = &signature[SIGNATURE_LENGTH - self.size..];

        let mask = kdf::hkdf(raw.len() + self.size, code, Some(&self.key), None)?;

        let mut framed = Vec::with_capacity(raw.len() + self.size);
        framed.push(raw[0] | IFAC_FLAG);
        framed.push(raw[1]);
        framed.extend_from_slice(code);
        framed.extend_from_slice(&raw[2..]);

        for (index, byte) in framed.iter_mut().enumerate() {
            if index == 0 {
                // The flag bit must survive masking.
                *byte = (*byte ^ mask[0]) | IFAC_FLAG;
            } else if index == 1 || index > self.size + 1 {
                *byte ^= mask[index];
            }
        }

        Ok(framed)
    }

    /// Unmasks and authenticates an incoming frame. Returns the open
    /// frame (flag cleared, code stripped) together with the code, or
    /// `None` when the frame does not carry this network's credentials.
    pub fn unmask_inbound(&self, raw: &[u8]) -> Option<(Vec<u8>, PacketIfac)> {
        if raw.len() <= 2 + self.size {
            return None;
        }
        if raw[0] & IFAC_FLAG != IFAC_FLAG {
            return None;
        }

        let code = raw[2..2 + self.size].to_vec();
        let mask = kdf::hkdf(raw.len(), &code, Some(&self.key), None).ok()?;

        let mut unmasked = raw.to_vec();
        for (index, byte) in unmasked.iter_mut().enumerate() {
            if index <= 1 || index > self.size + 1 {
                *byte ^= mask[index];
            }
        }

        let mut open = Vec::with_capacity(raw.len() - self.size);
        open.push(unmasked[0] & !IFAC_FLAG);
        open.push(unmasked[1]);
        open.extend_from_slice(&unmasked[2 + self.size..]);

        let expected = self.identity.sign(&open).to_bytes();
        if code != expected[SIGNATURE_LENGTH - self.size..] {
            return None;
        }

        Some((open, PacketIfac::new_from_slice(&code)))
    }
}

impl PartialEq for IfacCredentials {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for IfacCredentials {}

impl core::fmt::Debug for IfacCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IfacCredentials")
            .field("key", &self.key)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Per-interface access gate. Every frame crossing an interface passes
/// through here before the codec or the router sees it.
#[derive(Clone)]
pub enum IfacGate {
    Open,
    Authenticated(IfacCredentials),
}

impl IfacGate {
    pub fn from_config(config: &CoreConfig) -> Result<Self, RnsError> {
        match IfacCredentials::derive(
            config.netname.as_deref(),
            config.netkey.as_deref(),
            config.ifac_size,
        )? {
            Some(credentials) => Ok(Self::Authenticated(credentials)),
            None => Ok(Self::Open),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn outbound(&self, raw: &[u8]) -> Result<Vec<u8>, RnsError> {
        match self {
            Self::Open => Ok(raw.to_vec()),
            Self::Authenticated(credentials) => credentials.mask_outbound(raw),
        }
    }

    /// `None` means the frame is dropped: flagged frames on an open
    /// interface, unflagged or unauthenticated frames on a guarded one.
    pub fn inbound(&self, raw: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::Open => {
                if raw.first().map(|flags| flags & IFAC_FLAG != 0).unwrap_or(true) {
                    return None;
                }
                Some(raw.to_vec())
            }
            Self::Authenticated(credentials) => {
                credentials.unmask_inbound(raw).map(|(open, _)| open)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IfacCredentials, IfacGate, DEFAULT_IFAC_SIZE};

    fn credentials(netname: &str) -> IfacCredentials {
        IfacCredentials::derive(Some(netname), None, DEFAULT_IFAC_SIZE)
            .expect("valid derivation")
            .expect("credentials present")
    }

    #[test]
    fn no_inputs_mean_no_credentials() {
        assert!(IfacCredentials::derive(None, None, DEFAULT_IFAC_SIZE)
            .expect("valid derivation")
            .is_none());
    }

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(credentials("net"), credentials("net"));
        assert_ne!(credentials("net"), credentials("other"));
    }

    #[test]
    fn masked_frame_roundtrip() {
        let credentials = credentials("testnet");
        let frame = vec![0x01, 0x00, 0xaa, 0xbb, 0xcc, 0xdd];

        let masked = credentials.mask_outbound(&frame).expect("maskable frame");
        assert_eq!(masked.len(), frame.len() + credentials.size());
        assert_eq!(masked[0] & 0x80, 0x80);

        let (open, code) = credentials.unmask_inbound(&masked).expect("authentic frame");
        assert_eq!(open, frame);
        assert_eq!(code.as_slice().len(), credentials.size());
    }

    #[test]
    fn wrong_network_drops_frame() {
        let frame = vec![0x01, 0x00, 0xaa, 0xbb, 0xcc, 0xdd];
        let masked = credentials("net-a").mask_outbound(&frame).expect("maskable frame");
        assert!(credentials("net-b").unmask_inbound(&masked).is_none());
    }

    #[test]
    fn tampered_frame_drops() {
        let credentials = credentials("testnet");
        let frame = vec![0x01, 0x00, 0xaa, 0xbb, 0xcc, 0xdd];
        let mut masked = credentials.mask_outbound(&frame).expect("maskable frame");
        let last = masked.len() - 1;
        masked[last] ^= 0x01;
        assert!(credentials.unmask_inbound(&masked).is_none());
    }

    #[test]
    fn open_gate_drops_flagged_frames() {
        let gate = IfacGate::Open;
        assert!(gate.inbound(&[0x81, 0x00, 0x01]).is_none());
        assert_eq!(gate.inbound(&[0x01, 0x00, 0x02]), Some(vec![0x01, 0x00, 0x02]));
    }

    #[test]
    fn authenticated_gate_requires_flag() {
        let gate = IfacGate::Authenticated(credentials("testnet"));
        assert!(gate.inbound(&[0x01, 0x00, 0x02]).is_none());
    }
}
