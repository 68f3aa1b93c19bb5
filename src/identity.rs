use core::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use sha2::Digest;
use rand_core::CryptoRngCore;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};

use crate::crypt::kdf;
use crate::error::RnsError;
use crate::hash::{AddressHash, Hash};

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const PRIVATE_KEY_LENGTH: usize = PUBLIC_KEY_LENGTH * 2;
pub const DERIVED_KEY_LENGTH: usize = 64;

/// Anything that contributes address-hash material to a destination.
/// `EmptyIdentity` contributes nothing, which is how PLAIN destinations
/// are hashed.
pub trait HashIdentity {
    fn as_address_hash_slice(&self) -> &[u8];
}

/// Public half of an identity: an X25519 encryption key, an Ed25519
/// verifying key, and the 16-byte truncated hash of their concatenation
/// that addresses the identity on the network.
#[derive(Copy, Clone)]
pub struct Identity {
    public_key: PublicKey,
    verifying_key: VerifyingKey,
    pub address_hash: AddressHash,
}

impl Identity {
    pub fn new(public_key: PublicKey, verifying_key: VerifyingKey) -> Self {
        let address_hash = AddressHash::new_from_hash(&Hash::new(
            Hash::generator()
                .chain_update(public_key.as_bytes())
                .chain_update(verifying_key.as_bytes())
                .finalize()
                .into(),
        ));

        Self { public_key, verifying_key, address_hash }
    }

    /// Reconstructs an identity from `pub_encrypt || pub_sign`. Fails when
    /// the signing half is not a valid Ed25519 point.
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self, RnsError> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(RnsError::InvalidArgument);
        }

        let mut public_bytes = [0u8; PUBLIC_KEY_LENGTH];
        public_bytes.copy_from_slice(&bytes[..PUBLIC_KEY_LENGTH]);

        let mut verifying_bytes = [0u8; PUBLIC_KEY_LENGTH];
        verifying_bytes.copy_from_slice(&bytes[PUBLIC_KEY_LENGTH..]);
        let verifying_key =
            VerifyingKey::from_bytes(&verifying_bytes).map_err(|_| RnsError::CryptoError)?;

        Ok(Self::new(PublicKey::from(public_bytes), verifying_key))
    }

    pub fn to_public_key_bytes(&self) -> [u8; PRIVATE_KEY_LENGTH] {
        let mut bytes = [0u8; PRIVATE_KEY_LENGTH];
        bytes[..PUBLIC_KEY_LENGTH].copy_from_slice(self.public_key.as_bytes());
        bytes[PUBLIC_KEY_LENGTH..].copy_from_slice(self.verifying_key.as_bytes());
        bytes
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn public_key_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        self.public_key.as_bytes()
    }

    pub fn verifying_key_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.as_bytes()
    }

    pub fn address_hash(&self) -> &AddressHash {
        &self.address_hash
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), RnsError> {
        self.verifying_key.verify(message, signature).map_err(|_| RnsError::IncorrectSignature)
    }
}

impl HashIdentity for Identity {
    fn as_address_hash_slice(&self) -> &[u8] {
        self.address_hash.as_slice()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.public_key.as_bytes() == other.public_key.as_bytes()
            && self.verifying_key.as_bytes() == other.verifying_key.as_bytes()
    }
}

impl Eq for Identity {}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address_hash)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").field("address_hash", &self.address_hash).finish()
    }
}

/// Identityless stand-in for PLAIN destinations.
#[derive(Debug, Default, Copy, Clone)]
pub struct EmptyIdentity;

impl HashIdentity for EmptyIdentity {
    fn as_address_hash_slice(&self) -> &[u8] {
        &[]
    }
}

/// HKDF output of an X25519 agreement, split in half by the Fernet layer
/// into signing and encryption keys.
pub struct DerivedKey([u8; DERIVED_KEY_LENGTH]);

impl DerivedKey {
    pub fn new(shared: &SharedSecret, salt: Option<&[u8]>) -> Self {
        let derived = kdf::hkdf(DERIVED_KEY_LENGTH, shared.as_bytes(), salt, None)
            .expect("fixed-size derivation cannot fail");
        let mut bytes = [0u8; DERIVED_KEY_LENGTH];
        bytes.copy_from_slice(&derived);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Full long-term identity: private encryption scalar plus signing key.
/// Immutable once constructed; clone freely.
#[derive(Clone)]
pub struct PrivateIdentity {
    secret_key: StaticSecret,
    sign_key: SigningKey,
    identity: Identity,
}

impl PrivateIdentity {
    pub fn new(secret_key: StaticSecret, sign_key: SigningKey) -> Self {
        let identity = Identity::new(PublicKey::from(&secret_key), sign_key.verifying_key());
        Self { secret_key, sign_key, identity }
    }

    pub fn new_from_rand<R: CryptoRngCore>(mut rng: R) -> Self {
        let secret_key = StaticSecret::random_from_rng(&mut rng);
        let sign_key = SigningKey::generate(&mut rng);
        Self::new(secret_key, sign_key)
    }

    /// Loads an identity from its 64-byte private form: encryption scalar
    /// first, signing seed second.
    pub fn from_private_key_bytes(bytes: &[u8]) -> Result<Self, RnsError> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(RnsError::InvalidArgument);
        }

        let mut secret_bytes = [0u8; PUBLIC_KEY_LENGTH];
        secret_bytes.copy_from_slice(&bytes[..PUBLIC_KEY_LENGTH]);

        let mut seed = [0u8; PUBLIC_KEY_LENGTH];
        seed.copy_from_slice(&bytes[PUBLIC_KEY_LENGTH..]);

        Ok(Self::new(StaticSecret::from(secret_bytes), SigningKey::from_bytes(&seed)))
    }

    pub fn to_private_key_bytes(&self) -> [u8; PRIVATE_KEY_LENGTH] {
        let mut bytes = [0u8; PRIVATE_KEY_LENGTH];
        bytes[..PUBLIC_KEY_LENGTH].copy_from_slice(&self.secret_key.to_bytes());
        bytes[PUBLIC_KEY_LENGTH..].copy_from_slice(&self.sign_key.to_bytes());
        bytes
    }

    pub fn as_identity(&self) -> &Identity {
        &self.identity
    }

    pub fn address_hash(&self) -> &AddressHash {
        &self.identity.address_hash
    }

    pub fn secret_key(&self) -> &StaticSecret {
        &self.secret_key
    }

    pub fn sign_key(&self) -> &SigningKey {
        &self.sign_key
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.sign_key.sign(message)
    }

    /// Key agreement against an ephemeral public key, expanded with HKDF.
    pub fn derive_key(&self, ephemeral: &PublicKey, salt: Option<&[u8]>) -> DerivedKey {
        DerivedKey::new(&self.secret_key.diffie_hellman(ephemeral), salt)
    }
}

impl HashIdentity for PrivateIdentity {
    fn as_address_hash_slice(&self) -> &[u8] {
        self.identity.address_hash.as_slice()
    }
}

impl fmt::Display for PrivateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity.address_hash)
    }
}

/// Standalone Ed25519 verification over raw key bytes.
pub fn verify(public_key: [u8; PUBLIC_KEY_LENGTH], message: &[u8], signature: &[u8]) -> bool {
    if signature.len() != SIGNATURE_LENGTH {
        return false;
    }

    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };

    verifying_key.verify(message, &signature).is_ok()
}
