use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::crypt::fernet::{
    Fernet, PlainText, Token, FERNET_MAX_PADDING_SIZE, FERNET_OVERHEAD_SIZE,
};
use crate::error::RnsError;
use crate::identity::{DerivedKey, PrivateIdentity, PUBLIC_KEY_LENGTH};
use crate::time::now_secs;

pub const RATCHET_KEY_LENGTH: usize = PUBLIC_KEY_LENGTH;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RatchetRecord {
    secret: ByteBuf,
    activated: f64,
}

/// Current forward-secrecy ratchet of one IN destination, persisted so a
/// restart resumes with the same key instead of silently invalidating
/// traffic encrypted toward the previous announce.
pub struct RatchetStore {
    path: PathBuf,
    secret: StaticSecret,
    activated: f64,
    degraded: bool,
}

impl RatchetStore {
    /// Loads the persisted ratchet at `path`, or generates and persists a
    /// fresh one. Truncated or undecodable records are discarded with a
    /// warning and replaced.
    pub fn open<R: CryptoRngCore>(path: impl Into<PathBuf>, rng: R) -> Self {
        let path = path.into();

        if let Some(record) = load_record(&path) {
            if let Ok(secret) = <[u8; RATCHET_KEY_LENGTH]>::try_from(record.secret.as_slice()) {
                return Self {
                    path,
                    secret: StaticSecret::from(secret),
                    activated: record.activated,
                    degraded: false,
                };
            }
            log::warn!("ratchets: discarding malformed record at {}", path.display());
        }

        let mut store = Self {
            path,
            secret: StaticSecret::random_from_rng(rng),
            activated: now_secs(),
            degraded: false,
        };
        store.persist();
        store
    }

    pub fn public_key(&self) -> [u8; RATCHET_KEY_LENGTH] {
        *PublicKey::from(&self.secret).as_bytes()
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn activated(&self) -> f64 {
        self.activated
    }

    /// Disk writes have failed; the ratchet keeps working in memory only.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn rotate<R: CryptoRngCore>(&mut self, rng: R) {
        self.secret = StaticSecret::random_from_rng(rng);
        self.activated = now_secs();
        self.persist();
    }

    /// Rotates when `interval` has elapsed since activation. `None` means
    /// rotation is manual.
    pub fn rotate_if_due<R: CryptoRngCore>(&mut self, rng: R, interval: Option<Duration>) {
        if let Some(interval) = interval {
            if now_secs() >= self.activated + interval.as_secs_f64() {
                self.rotate(rng);
            }
        }
    }

    fn persist(&mut self) {
        let record =
            RatchetRecord { secret: ByteBuf::from(self.secret.to_bytes()), activated: self.activated };

        match write_record(&self.path, &record) {
            Ok(()) => self.degraded = false,
            Err(err) => {
                log::warn!("ratchets: persist to {} failed: {}", self.path.display(), err);
                self.degraded = true;
            }
        }
    }
}

fn load_record(path: &Path) -> Option<RatchetRecord> {
    let data = fs::read(path).ok()?;
    match rmp_serde::from_slice::<RatchetRecord>(&data) {
        Ok(record) => Some(record),
        Err(_) => {
            log::warn!("ratchets: undecodable record at {}", path.display());
            None
        }
    }
}

fn write_record(path: &Path, record: &RatchetRecord) -> Result<(), RnsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| RnsError::StorageError)?;
    }

    let encoded = rmp_serde::to_vec_named(record).map_err(|_| RnsError::StorageError)?;

    // Temp file plus rename keeps a crash from leaving a torn record.
    let tmp_path = path.with_extension("out");
    fs::write(&tmp_path, encoded).map_err(|_| RnsError::StorageError)?;
    fs::rename(&tmp_path, path).map_err(|_| RnsError::StorageError)?;

    Ok(())
}

/// Encrypts `plaintext` toward `public_key` (a ratchet or identity key):
/// ephemeral X25519 agreement, HKDF expansion, Fernet token, with the
/// ephemeral public key prepended.
pub fn encrypt_for_public_key<R: CryptoRngCore + Copy>(
    public_key: &PublicKey,
    salt: &[u8],
    plaintext: &[u8],
    rng: R,
) -> Result<Vec<u8>, RnsError> {
    let secret = EphemeralSecret::random_from_rng(rng);
    let ephemeral_public = PublicKey::from(&secret);
    let derived = DerivedKey::new(&secret.diffie_hellman(public_key), Some(salt));

    let key_bytes = derived.as_bytes();
    let split = key_bytes.len() / 2;
    let fernet = Fernet::new_from_slices(&key_bytes[..split], &key_bytes[split..], rng);

    let mut out = vec![
        0u8;
        PUBLIC_KEY_LENGTH + plaintext.len() + FERNET_OVERHEAD_SIZE + FERNET_MAX_PADDING_SIZE
    ];
    out[..PUBLIC_KEY_LENGTH].copy_from_slice(ephemeral_public.as_bytes());
    let token = fernet
        .encrypt(PlainText::from(plaintext), &mut out[PUBLIC_KEY_LENGTH..])
        .map_err(|_| RnsError::CryptoError)?;

    let total = PUBLIC_KEY_LENGTH + token.len();
    out.truncate(total);
    Ok(out)
}

/// Inverse of [`encrypt_for_public_key`] for a raw ratchet secret.
pub fn decrypt_with_private_key(
    private_key: &StaticSecret,
    salt: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, RnsError> {
    let (ephemeral_public, token) = split_ciphertext(ciphertext)?;
    let derived = DerivedKey::new(&private_key.diffie_hellman(&ephemeral_public), Some(salt));
    decrypt_token(&derived, token, ciphertext.len())
}

/// Inverse of [`encrypt_for_public_key`] for an identity's long-term key.
pub fn decrypt_with_identity(
    identity: &PrivateIdentity,
    salt: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, RnsError> {
    let (ephemeral_public, token) = split_ciphertext(ciphertext)?;
    let derived = identity.derive_key(&ephemeral_public, Some(salt));
    decrypt_token(&derived, token, ciphertext.len())
}

fn split_ciphertext(ciphertext: &[u8]) -> Result<(PublicKey, &[u8]), RnsError> {
    if ciphertext.len() <= PUBLIC_KEY_LENGTH {
        return Err(RnsError::InvalidArgument);
    }

    let mut public_bytes = [0u8; PUBLIC_KEY_LENGTH];
    public_bytes.copy_from_slice(&ciphertext[..PUBLIC_KEY_LENGTH]);

    Ok((PublicKey::from(public_bytes), &ciphertext[PUBLIC_KEY_LENGTH..]))
}

fn decrypt_token(derived: &DerivedKey, token: &[u8], max_len: usize) -> Result<Vec<u8>, RnsError> {
    let key_bytes = derived.as_bytes();
    let split = key_bytes.len() / 2;
    let fernet =
        Fernet::new_from_slices(&key_bytes[..split], &key_bytes[split..], rand_core::OsRng);

    let verified = fernet.verify(Token::from(token)).map_err(|_| RnsError::CryptoError)?;
    let mut out = vec![0u8; max_len];
    let plain = fernet.decrypt(verified, &mut out).map_err(|_| RnsError::CryptoError)?;
    Ok(plain.as_bytes().to_vec())
}
