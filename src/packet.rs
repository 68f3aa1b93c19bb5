use core::fmt;

use sha2::Digest;

use crate::buffer::StaticBuffer;
use crate::error::RnsError;
use crate::hash::{AddressHash, Hash, ADDRESS_HASH_SIZE};

// Python Reticulum default MTU (500) minus the largest header and IFAC
// sizes: 500 - (2 + 1 + 16*2) - 1 = 464.
pub const PACKET_MDU: usize = 464;
pub const PACKET_IFAC_MAX_LENGTH: usize = 64;

/// Framing failures. The codec is a pure parser; nothing here involves
/// cryptography, and callers are expected to drop the offending frame.
/// Every pattern of the two-bit type fields names a defined type, so an
/// unknown-type case cannot arise at this layer; unknown context bytes
/// decode losslessly.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum DecodeError {
    TooShort,
    BadHeader,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "frame too short"),
            Self::BadHeader => write!(f, "bad header"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for RnsError {
    fn from(_: DecodeError) -> Self {
        RnsError::PacketError
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum IfacFlag {
    Open = 0b0,
    Authenticated = 0b1,
}

impl From<u8> for IfacFlag {
    fn from(value: u8) -> Self {
        match value & 0b1 {
            0b1 => IfacFlag::Authenticated,
            _ => IfacFlag::Open,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum HeaderType {
    Type1 = 0b0,
    Type2 = 0b1,
}

impl From<u8> for HeaderType {
    fn from(value: u8) -> Self {
        match value & 0b1 {
            0b1 => HeaderType::Type2,
            _ => HeaderType::Type1,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ContextFlag {
    Unset = 0b0,
    Set = 0b1,
}

impl From<u8> for ContextFlag {
    fn from(value: u8) -> Self {
        match value & 0b1 {
            0b1 => ContextFlag::Set,
            _ => ContextFlag::Unset,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum PropagationType {
    Broadcast = 0b0,
    Transport = 0b1,
}

impl From<u8> for PropagationType {
    fn from(value: u8) -> Self {
        match value & 0b1 {
            0b1 => PropagationType::Transport,
            _ => PropagationType::Broadcast,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum DestinationType {
    Single = 0b00,
    Group = 0b01,
    Plain = 0b10,
    Link = 0b11,
}

impl From<u8> for DestinationType {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0b01 => DestinationType::Group,
            0b10 => DestinationType::Plain,
            0b11 => DestinationType::Link,
            _ => DestinationType::Single,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum PacketType {
    Data = 0b00,
    Announce = 0b01,
    LinkRequest = 0b10,
    Proof = 0b11,
}

impl From<u8> for PacketType {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0b01 => PacketType::Announce,
            0b10 => PacketType::LinkRequest,
            0b11 => PacketType::Proof,
            _ => PacketType::Data,
        }
    }
}

/// Context byte. Known values get named constructors; unknown bytes are
/// carried as-is so decode followed by encode reproduces the frame.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct PacketContext(u8);

impl PacketContext {
    pub const NONE: Self = Self(0x00);
    pub const RESOURCE: Self = Self(0x01);
    pub const RESOURCE_ADVERTISEMENT: Self = Self(0x02);
    pub const RESOURCE_REQUEST: Self = Self(0x03);
    pub const RESOURCE_HASH_UPDATE: Self = Self(0x04);
    pub const RESOURCE_PROOF: Self = Self(0x05);
    pub const RESOURCE_INITIATOR_CANCEL: Self = Self(0x06);
    pub const RESOURCE_RECEIVER_CANCEL: Self = Self(0x07);
    pub const CACHE_REQUEST: Self = Self(0x08);
    pub const REQUEST: Self = Self(0x09);
    pub const RESPONSE: Self = Self(0x0A);
    pub const PATH_RESPONSE: Self = Self(0x0B);
    pub const COMMAND: Self = Self(0x0C);
    pub const COMMAND_STATUS: Self = Self(0x0D);
    pub const CHANNEL: Self = Self(0x0E);
    pub const KEEP_ALIVE: Self = Self(0xFA);
    pub const LINK_IDENTIFY: Self = Self(0xFB);
    pub const LINK_CLOSE: Self = Self(0xFC);
    pub const LINK_PROOF: Self = Self(0xFD);
    pub const LINK_RTT: Self = Self(0xFE);
    pub const LINK_REQUEST_PROOF: Self = Self(0xFF);

    pub const fn from_byte(value: u8) -> Self {
        Self(value)
    }

    pub const fn as_byte(self) -> u8 {
        self.0
    }
}

impl From<u8> for PacketContext {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Header {
    pub ifac_flag: IfacFlag,
    pub header_type: HeaderType,
    pub context_flag: ContextFlag,
    pub propagation_type: PropagationType,
    pub destination_type: DestinationType,
    pub packet_type: PacketType,
    pub hops: u8,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            ifac_flag: IfacFlag::Open,
            header_type: HeaderType::Type1,
            context_flag: ContextFlag::Unset,
            propagation_type: PropagationType::Broadcast,
            destination_type: DestinationType::Single,
            packet_type: PacketType::Data,
            hops: 0,
        }
    }
}

impl Header {
    pub fn to_meta(&self) -> u8 {
        (self.ifac_flag as u8) << 7
            | (self.header_type as u8) << 6
            | (self.context_flag as u8) << 5
            | (self.propagation_type as u8) << 4
            | (self.destination_type as u8) << 2
            | (self.packet_type as u8)
    }

    pub fn from_meta(meta: u8) -> Self {
        Self {
            ifac_flag: IfacFlag::from(meta >> 7),
            header_type: HeaderType::from(meta >> 6),
            context_flag: ContextFlag::from(meta >> 5),
            propagation_type: PropagationType::from(meta >> 4),
            destination_type: DestinationType::from(meta >> 2),
            packet_type: PacketType::from(meta),
            hops: 0,
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:b}{:b}{:b}{:b}{:0>2b}{:0>2b}.{}",
            self.ifac_flag as u8,
            self.header_type as u8,
            self.context_flag as u8,
            self.propagation_type as u8,
            self.destination_type as u8,
            self.packet_type as u8,
            self.hops,
        )
    }
}

pub type PacketDataBuffer = StaticBuffer<PACKET_MDU>;

/// Interface access code attached to an inbound frame by the IFAC gate.
/// Never produced or consumed by the codec itself.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct PacketIfac {
    access_code: [u8; PACKET_IFAC_MAX_LENGTH],
    length: usize,
}

impl PacketIfac {
    pub fn new_from_slice(slice: &[u8]) -> Self {
        let mut access_code = [0u8; PACKET_IFAC_MAX_LENGTH];
        let length = slice.len().min(PACKET_IFAC_MAX_LENGTH);
        access_code[..length].copy_from_slice(&slice[..length]);
        Self { access_code, length }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.access_code[..self.length]
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Packet {
    pub header: Header,
    pub ifac: Option<PacketIfac>,
    pub destination: AddressHash,
    pub transport: Option<AddressHash>,
    pub context: PacketContext,
    pub data: PacketDataBuffer,
}

impl Packet {
    const MIN_FRAME_LENGTH: usize = 2 + ADDRESS_HASH_SIZE + 1;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < Self::MIN_FRAME_LENGTH {
            return Err(DecodeError::TooShort);
        }

        let mut header = Header::from_meta(bytes[0]);
        header.hops = bytes[1];

        let mut offset = 2;

        let transport = match header.header_type {
            HeaderType::Type2 => {
                if bytes.len() < offset + ADDRESS_HASH_SIZE + ADDRESS_HASH_SIZE + 1 {
                    return Err(DecodeError::TooShort);
                }
                let mut raw = [0u8; ADDRESS_HASH_SIZE];
                raw.copy_from_slice(&bytes[offset..offset + ADDRESS_HASH_SIZE]);
                offset += ADDRESS_HASH_SIZE;
                Some(AddressHash::new(raw))
            }
            HeaderType::Type1 => None,
        };

        let mut destination_raw = [0u8; ADDRESS_HASH_SIZE];
        destination_raw.copy_from_slice(&bytes[offset..offset + ADDRESS_HASH_SIZE]);
        offset += ADDRESS_HASH_SIZE;
        let destination = AddressHash::new(destination_raw);

        let context = PacketContext::from_byte(bytes[offset]);
        offset += 1;

        let payload = &bytes[offset..];
        if payload.len() > PACKET_MDU {
            return Err(DecodeError::BadHeader);
        }

        Ok(Self {
            header,
            ifac: None,
            destination,
            transport,
            context,
            data: PacketDataBuffer::new_from_slice(payload),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RnsError> {
        let mut out = Vec::with_capacity(Self::MIN_FRAME_LENGTH + self.data.len());

        out.push(self.header.to_meta());
        out.push(self.header.hops);

        if self.header.header_type == HeaderType::Type2 {
            let transport = self.transport.ok_or(RnsError::InvalidArgument)?;
            out.extend_from_slice(transport.as_slice());
        }

        out.extend_from_slice(self.destination.as_slice());
        out.push(self.context.as_byte());
        out.extend_from_slice(self.data.as_slice());

        Ok(out)
    }

    /// Stable per-packet hash: routing bits and the hop count are
    /// excluded so a retransmitted copy hashes the same.
    pub fn hash(&self) -> Hash {
        Hash::new(
            Hash::generator()
                .chain_update([self.header.to_meta() & 0b0000_1111])
                .chain_update(self.destination.as_slice())
                .chain_update([self.context.as_byte()])
                .chain_update(self.data.as_slice())
                .finalize()
                .into(),
        )
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            header: Header::default(),
            ifac: None,
            destination: AddressHash::new_empty(),
            transport: None,
            context: PacketContext::NONE,
            data: PacketDataBuffer::new(),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.header)?;

        if let Some(transport) = self.transport {
            write!(f, " {}", transport)?;
        }

        write!(f, " {} 0x[{}]]", self.destination, self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;

    use crate::hash::AddressHash;

    use super::{
        ContextFlag, DecodeError, DestinationType, Header, HeaderType, IfacFlag, Packet,
        PacketContext, PacketDataBuffer, PacketType, PropagationType,
    };

    #[test]
    fn header_meta_roundtrip_preserves_context_and_transport_bits() {
        let header = Header {
            ifac_flag: IfacFlag::Open,
            header_type: HeaderType::Type1,
            context_flag: ContextFlag::Set,
            propagation_type: PropagationType::Transport,
            destination_type: DestinationType::Single,
            packet_type: PacketType::Announce,
            hops: 0,
        };

        let meta = header.to_meta();
        assert_eq!(meta & 0b0010_0000, 0b0010_0000);
        assert_eq!(meta & 0b0001_0000, 0b0001_0000);

        let decoded = Header::from_meta(meta);
        assert_eq!(decoded.context_flag, ContextFlag::Set);
        assert_eq!(decoded.propagation_type, PropagationType::Transport);
    }

    #[test]
    fn frame_roundtrip_with_transport_field() {
        let packet = Packet {
            header: Header {
                header_type: HeaderType::Type2,
                propagation_type: PropagationType::Transport,
                packet_type: PacketType::Announce,
                hops: 3,
                ..Default::default()
            },
            ifac: None,
            destination: AddressHash::new_from_rand(OsRng),
            transport: Some(AddressHash::new_from_rand(OsRng)),
            context: PacketContext::PATH_RESPONSE,
            data: PacketDataBuffer::new_from_slice(b"payload"),
        };

        let bytes = packet.to_bytes().expect("encodable packet");
        let decoded = Packet::from_bytes(&bytes).expect("decodable frame");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn unknown_context_byte_survives_roundtrip() {
        let mut packet = Packet::default();
        packet.context = PacketContext::from_byte(0x6E);
        packet.data = PacketDataBuffer::new_from_slice(&[1, 2, 3]);

        let bytes = packet.to_bytes().expect("encodable packet");
        assert_eq!(Packet::from_bytes(&bytes).expect("decodable frame"), packet);
    }

    #[test]
    fn short_frames_are_rejected() {
        assert_eq!(Packet::from_bytes(&[0x00, 0x01]), Err(DecodeError::TooShort));

        // A Type2 header without room for the transport field.
        let mut frame = vec![0b0100_0000, 0x00];
        frame.extend_from_slice(&[0u8; 17]);
        assert_eq!(Packet::from_bytes(&frame), Err(DecodeError::TooShort));
    }

    #[test]
    fn packet_hash_ignores_hops() {
        let mut packet = Packet::default();
        packet.data = PacketDataBuffer::new_from_slice(b"same");
        let first = packet.hash();
        packet.header.hops = 7;
        assert_eq!(packet.hash(), first);
    }
}
