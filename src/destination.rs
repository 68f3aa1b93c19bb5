use core::fmt;
use core::marker::PhantomData;

use ed25519_dalek::{Signature, SigningKey, SIGNATURE_LENGTH};
use rand_core::{CryptoRngCore, OsRng};
use sha2::Digest;
use std::path::PathBuf;
use std::time::Duration;

use crate::crypt::fernet::{Fernet, PlainText, Token};
use crate::error::RnsError;
use crate::hash::{AddressHash, Hash};
use crate::identity::{EmptyIdentity, HashIdentity, Identity, PrivateIdentity, PUBLIC_KEY_LENGTH};
use crate::known_destinations::KnownDestinations;
use crate::packet::{
    ContextFlag, DestinationType, Header, HeaderType, IfacFlag, Packet, PacketContext,
    PacketDataBuffer, PacketType, PropagationType,
};
use crate::ratchets::{RatchetStore, RATCHET_KEY_LENGTH};

//***************************************************************************//

pub trait Direction {}

pub struct Input;
pub struct Output;

impl Direction for Input {}
impl Direction for Output {}

//***************************************************************************//

pub trait Type {
    fn destination_type() -> DestinationType;
}

pub struct Single;
pub struct Plain;
pub struct Group;

impl Type for Single {
    fn destination_type() -> DestinationType {
        DestinationType::Single
    }
}

impl Type for Plain {
    fn destination_type() -> DestinationType {
        DestinationType::Plain
    }
}

impl Type for Group {
    fn destination_type() -> DestinationType {
        DestinationType::Group
    }
}

pub fn group_encrypt(key: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, RnsError> {
    let fernet = Fernet::new_from_slices(key, key, OsRng);
    let mut out_buf = vec![0u8; data.len() + 64];
    let token = fernet.encrypt(PlainText::from(data), &mut out_buf)?;
    Ok(token.as_bytes().to_vec())
}

pub fn group_decrypt(key: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, RnsError> {
    let fernet = Fernet::new_from_slices(key, key, OsRng);
    let verified = fernet.verify(Token::from(data))?;
    let mut out_buf = vec![0u8; data.len()];
    let plaintext = fernet.decrypt(verified, &mut out_buf)?;
    Ok(plaintext.as_bytes().to_vec())
}

pub const NAME_HASH_LENGTH: usize = 10;
pub const RAND_HASH_LENGTH: usize = 10;
pub const RATCHET_LENGTH: usize = RATCHET_KEY_LENGTH;
pub const MIN_ANNOUNCE_DATA_LENGTH: usize =
    PUBLIC_KEY_LENGTH * 2 + NAME_HASH_LENGTH + RAND_HASH_LENGTH + SIGNATURE_LENGTH;

/// Full name of a destination: `app_name.aspect1.aspect2…`, addressed by
/// the first [`NAME_HASH_LENGTH`] bytes of its hash.
#[derive(Copy, Clone)]
pub struct DestinationName {
    pub hash: Hash,
}

impl DestinationName {
    pub fn new(app_name: &str, aspects: &str) -> Self {
        let hash = Hash::new(
            Hash::generator()
                .chain_update(app_name.as_bytes())
                .chain_update(".".as_bytes())
                .chain_update(aspects.as_bytes())
                .finalize()
                .into(),
        );

        Self { hash }
    }

    /// Joins an ordered aspect list. The app name must not contain the
    /// aspect separator; that is a caller bug, not wire input.
    pub fn new_from_aspects(app_name: &str, aspects: &[&str]) -> Result<Self, RnsError> {
        if app_name.contains('.') {
            debug_assert!(false, "app_name must not contain '.'");
            return Err(RnsError::InvalidArgument);
        }

        Ok(Self::new(app_name, &aspects.join(".")))
    }

    pub fn new_from_hash_slice(hash_slice: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash[..hash_slice.len().min(32)].copy_from_slice(&hash_slice[..hash_slice.len().min(32)]);

        Self { hash: Hash::new(hash) }
    }

    pub fn as_name_hash_slice(&self) -> &[u8] {
        &self.hash.as_slice()[..NAME_HASH_LENGTH]
    }
}

#[derive(Copy, Clone)]
pub struct DestinationDesc {
    pub address_hash: AddressHash,
    pub name: DestinationName,
}

impl fmt::Display for DestinationDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address_hash)
    }
}

pub type DestinationAnnounce = Packet;

pub struct AnnounceInfo<'a> {
    pub destination: SingleOutputDestination,
    pub app_data: &'a [u8],
    pub ratchet: Option<[u8; RATCHET_LENGTH]>,
}

impl AnnounceInfo<'_> {
    pub fn identity(&self) -> Identity {
        self.destination.identity
    }
}

impl DestinationAnnounce {
    /// Validates an announce packet without touching any cache: layout,
    /// destination-hash reconstruction, and the signature over
    /// `destination_hash || public keys || name_hash || random_hash ||
    /// [ratchet] || app_data`. The header context flag decides whether a
    /// ratchet key is present.
    pub fn validate(packet: &Packet) -> Result<AnnounceInfo<'_>, RnsError> {
        if packet.header.packet_type != PacketType::Announce {
            return Err(RnsError::PacketError);
        }

        let announce_data = packet.data.as_slice();

        let with_ratchet = packet.header.context_flag == ContextFlag::Set;
        let min_length = if with_ratchet {
            MIN_ANNOUNCE_DATA_LENGTH + RATCHET_LENGTH
        } else {
            MIN_ANNOUNCE_DATA_LENGTH
        };
        if announce_data.len() < min_length {
            return Err(RnsError::PacketError);
        }

        let mut offset = 0usize;

        let mut public_key_data = [0u8; PUBLIC_KEY_LENGTH];
        public_key_data.copy_from_slice(&announce_data[offset..offset + PUBLIC_KEY_LENGTH]);
        offset += PUBLIC_KEY_LENGTH;

        let mut verifying_key_data = [0u8; PUBLIC_KEY_LENGTH];
        verifying_key_data.copy_from_slice(&announce_data[offset..offset + PUBLIC_KEY_LENGTH]);
        offset += PUBLIC_KEY_LENGTH;

        let mut key_material = [0u8; PUBLIC_KEY_LENGTH * 2];
        key_material[..PUBLIC_KEY_LENGTH].copy_from_slice(&public_key_data);
        key_material[PUBLIC_KEY_LENGTH..].copy_from_slice(&verifying_key_data);
        let identity = Identity::from_public_key_bytes(&key_material)?;

        let name_hash = &announce_data[offset..offset + NAME_HASH_LENGTH];
        offset += NAME_HASH_LENGTH;
        let rand_hash = &announce_data[offset..offset + RAND_HASH_LENGTH];
        offset += RAND_HASH_LENGTH;

        let ratchet = if with_ratchet {
            let mut ratchet_bytes = [0u8; RATCHET_LENGTH];
            ratchet_bytes.copy_from_slice(&announce_data[offset..offset + RATCHET_LENGTH]);
            offset += RATCHET_LENGTH;
            Some(ratchet_bytes)
        } else {
            None
        };

        let name = DestinationName::new_from_hash_slice(name_hash);
        let expected_hash = create_address_hash(&identity, &name);
        if expected_hash != packet.destination {
            return Err(RnsError::IncorrectHash);
        }

        let signature =
            Signature::from_slice(&announce_data[offset..offset + SIGNATURE_LENGTH])
                .map_err(|_| RnsError::CryptoError)?;
        offset += SIGNATURE_LENGTH;

        let app_data = &announce_data[offset..];

        // Verification has no prehashed mode, so the signed range is
        // reassembled on the stack.
        let mut signed_data = PacketDataBuffer::new();
        signed_data
            .chain_write(packet.destination.as_slice())?
            .chain_write(&public_key_data)?
            .chain_write(&verifying_key_data)?
            .chain_write(name_hash)?
            .chain_write(rand_hash)?;
        if let Some(ratchet) = &ratchet {
            signed_data.chain_write(ratchet)?;
        }
        if !app_data.is_empty() {
            signed_data.chain_write(app_data)?;
        }

        identity.verify(signed_data.as_slice(), &signature)?;

        Ok(AnnounceInfo {
            destination: SingleOutputDestination::new(identity, name),
            app_data,
            ratchet,
        })
    }
}

pub struct Destination<I: HashIdentity, D: Direction, T: Type> {
    pub direction: PhantomData<D>,
    pub r#type: PhantomData<T>,
    pub identity: I,
    pub desc: DestinationDesc,
    app_data: Option<Vec<u8>>,
    ratchets: Option<RatchetStore>,
    ratchet_interval: Option<Duration>,
}

impl<I: HashIdentity, D: Direction, T: Type> Destination<I, D, T> {
    pub fn destination_type(&self) -> DestinationType {
        <T as Type>::destination_type()
    }

    fn assemble(identity: I, name: DestinationName, address_hash: AddressHash) -> Self {
        Self {
            direction: PhantomData,
            r#type: PhantomData,
            identity,
            desc: DestinationDesc { address_hash, name },
            app_data: None,
            ratchets: None,
            ratchet_interval: None,
        }
    }
}

impl Destination<PrivateIdentity, Input, Single> {
    pub fn new(identity: PrivateIdentity, name: DestinationName) -> Self {
        let address_hash = create_address_hash(&identity, &name);
        Self::assemble(identity, name, address_hash)
    }

    /// App data announced when a call to [`Self::announce`] passes none.
    pub fn set_default_app_data(&mut self, app_data: Option<&[u8]>) {
        self.app_data = app_data.map(|data| data.to_vec());
    }

    pub fn default_app_data(&self) -> Option<&[u8]> {
        self.app_data.as_deref()
    }

    /// Turns on forward-secrecy ratchets, persisting them at `path`.
    /// Generates a fresh ratchet immediately when none was stored.
    pub fn enable_ratchets<R: CryptoRngCore>(&mut self, path: impl Into<PathBuf>, rng: R) {
        if self.ratchets.is_none() {
            self.ratchets = Some(RatchetStore::open(path, rng));
        }
    }

    pub fn set_ratchet_rotation_interval(&mut self, interval: Option<Duration>) {
        self.ratchet_interval = interval;
    }

    pub fn ratchets_enabled(&self) -> bool {
        self.ratchets.is_some()
    }

    pub fn ratchet_public(&self) -> Option<[u8; RATCHET_LENGTH]> {
        self.ratchets.as_ref().map(RatchetStore::public_key)
    }

    pub fn rotate_ratchet<R: CryptoRngCore>(&mut self, rng: R) {
        if let Some(store) = self.ratchets.as_mut() {
            store.rotate(rng);
        }
    }

    /// Ratchet persistence has failed and the destination is running on
    /// its in-memory key only.
    pub fn ratchet_storage_degraded(&self) -> bool {
        self.ratchets.as_ref().map(RatchetStore::is_degraded).unwrap_or(false)
    }

    /// Builds a signed announce for this destination. With ratchets
    /// enabled, the due rotation happens first and the current ratchet
    /// public key is embedded (header context flag set). The packet is
    /// returned for the router to transmit; nothing is sent here.
    pub fn announce<R: CryptoRngCore + Copy>(
        &mut self,
        rng: R,
        app_data: Option<&[u8]>,
    ) -> Result<Packet, RnsError> {
        let ratchet = match self.ratchets.as_mut() {
            Some(store) => {
                store.rotate_if_due(rng, self.ratchet_interval);
                Some(store.public_key())
            }
            None => None,
        };

        let app_data = app_data.or(self.app_data.as_deref());

        let rand_hash = Hash::new_from_rand(rng);
        let rand_hash = &rand_hash.as_slice()[..RAND_HASH_LENGTH];

        let pub_key = self.identity.as_identity().public_key_bytes();
        let verifying_key = self.identity.as_identity().verifying_key_bytes();
        let name_hash = self.desc.name.as_name_hash_slice();

        let mut packet_data = PacketDataBuffer::new();
        packet_data
            .chain_write(self.desc.address_hash.as_slice())?
            .chain_write(pub_key)?
            .chain_write(verifying_key)?
            .chain_write(name_hash)?
            .chain_write(rand_hash)?;
        if let Some(ratchet) = &ratchet {
            packet_data.chain_write(ratchet)?;
        }
        if let Some(data) = app_data {
            packet_data.write(data)?;
        }

        let signature = self.identity.sign(packet_data.as_slice());

        packet_data.reset();
        packet_data
            .chain_write(pub_key)?
            .chain_write(verifying_key)?
            .chain_write(name_hash)?
            .chain_write(rand_hash)?;
        if let Some(ratchet) = &ratchet {
            packet_data.chain_write(ratchet)?;
        }
        packet_data.write(&signature.to_bytes())?;
        if let Some(data) = app_data {
            packet_data.write(data)?;
        }

        Ok(Packet {
            header: Header {
                ifac_flag: IfacFlag::Open,
                header_type: HeaderType::Type1,
                context_flag: if ratchet.is_some() { ContextFlag::Set } else { ContextFlag::Unset },
                propagation_type: PropagationType::Broadcast,
                destination_type: DestinationType::Single,
                packet_type: PacketType::Announce,
                hops: 0,
            },
            ifac: None,
            destination: self.desc.address_hash,
            transport: None,
            context: PacketContext::NONE,
            data: packet_data,
        })
    }

    /// Announce carrying the path-response context, emitted when a peer
    /// asked for the path to this destination.
    pub fn path_response<R: CryptoRngCore + Copy>(
        &mut self,
        rng: R,
        app_data: Option<&[u8]>,
    ) -> Result<Packet, RnsError> {
        let mut announce = self.announce(rng, app_data)?;
        announce.context = PacketContext::PATH_RESPONSE;

        Ok(announce)
    }

    pub fn sign_key(&self) -> &SigningKey {
        self.identity.sign_key()
    }
}

impl Destination<Identity, Output, Single> {
    pub fn new(identity: Identity, name: DestinationName) -> Self {
        let address_hash = create_address_hash(&identity, &name);
        Self::assemble(identity, name, address_hash)
    }
}

impl<D: Direction> Destination<EmptyIdentity, D, Plain> {
    pub fn new(name: DestinationName) -> Self {
        let address_hash = create_address_hash(&EmptyIdentity, &name);
        Self::assemble(EmptyIdentity, name, address_hash)
    }
}

/// Address hash material is the 10-byte name hash followed by the
/// identity hash; PLAIN destinations contribute no identity bytes.
fn create_address_hash<I: HashIdentity>(identity: &I, name: &DestinationName) -> AddressHash {
    AddressHash::new_from_hash(&Hash::new(
        Hash::generator()
            .chain_update(name.as_name_hash_slice())
            .chain_update(identity.as_address_hash_slice())
            .finalize()
            .into(),
    ))
}

/// Latest ratchet public key learned for a remote destination.
pub fn get_ratchet_for_destination(
    known: &KnownDestinations,
    destination: &AddressHash,
) -> Option<[u8; RATCHET_LENGTH]> {
    known.recall_ratchet(destination)
}

pub type SingleInputDestination = Destination<PrivateIdentity, Input, Single>;
pub type SingleOutputDestination = Destination<Identity, Output, Single>;
pub type PlainInputDestination = Destination<EmptyIdentity, Input, Plain>;
pub type PlainOutputDestination = Destination<EmptyIdentity, Output, Plain>;

pub fn new_in(identity: PrivateIdentity, app_name: &str, aspect: &str) -> SingleInputDestination {
    SingleInputDestination::new(identity, DestinationName::new(app_name, aspect))
}

pub fn new_out(identity: Identity, app_name: &str, aspect: &str) -> SingleOutputDestination {
    SingleOutputDestination::new(identity, DestinationName::new(app_name, aspect))
}
