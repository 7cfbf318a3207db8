//! Packet Structures and Fixed-Size Wire Codec
//!
//! Every message exchanged on a channel is exactly one frame: a 9-byte header
//! followed by a payload area of `payload_capacity` bytes. Data packets carry
//! one fragment of the file, acknowledgements echo the sequence of the fragment
//! they acknowledge and carry no payload.
//!
//! ```text
//!  0        4     5              9                      9 + capacity
//!  +--------+-----+--------------+----------------------+
//!  | seq    | flg | payload_size | payload (zero padded)|
//!  +--------+-----+--------------+----------------------+
//! ```
//!
//! All integers are in network byte order. Flags: bit 0 kind (0 data, 1 ack),
//! bit 1 channel, bit 2 last fragment. The remaining bits must be zero.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the packet header in bytes (sequence + flags + payload size)
pub const HEADER_SIZE: usize = 9;

/// Default payload capacity of a frame in bytes
pub const PACKET_SIZE: usize = 100;

/// Number of parallel channels a transfer runs over
pub const CHANNEL_COUNT: usize = 2;

/// Packet kind flag (bit 0 of the flags byte)
const KIND_FLAG: u8 = 0b001;

/// Channel flag (bit 1 of the flags byte)
const CHANNEL_FLAG: u8 = 0b010;

/// Last-fragment flag (bit 2 of the flags byte)
const LAST_FLAG: u8 = 0b100;

const RESERVED_MASK: u8 = !(KIND_FLAG | CHANNEL_FLAG | LAST_FLAG);

/// Identifier of one of the two channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    pub const ZERO: ChannelId = ChannelId(0);
    pub const ONE: ChannelId = ChannelId(1);

    /// Both channels, in connection order
    pub const ALL: [ChannelId; CHANNEL_COUNT] = [ChannelId::ZERO, ChannelId::ONE];

    /// Create a channel id, rejecting values outside `0..CHANNEL_COUNT`
    pub fn new(id: u8) -> Option<Self> {
        if (id as usize) < CHANNEL_COUNT {
            Some(ChannelId(id))
        } else {
            None
        }
    }

    /// Channel id for a position in a per-channel array
    pub fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index).ok().and_then(ChannelId::new)
    }

    /// Position of this channel in per-channel arrays
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// The opposite channel
    pub fn other(self) -> ChannelId {
        ChannelId(1 - self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Packet kind (bit 0 of the flags byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// File fragment
    Data = 0,
    /// Acknowledgement of a file fragment
    Ack = 1,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketKind::Data => write!(f, "DATA"),
            PacketKind::Ack => write!(f, "ACK"),
        }
    }
}

/// A single protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Byte offset of the first payload byte (data) or echoed offset (ack)
    pub sequence: u32,
    /// Channel this packet belongs to
    pub channel: ChannelId,
    /// Data or acknowledgement
    pub kind: PacketKind,
    /// Final fragment of the file, or acknowledgement of it
    pub is_last: bool,
    /// Fragment bytes, empty for acknowledgements
    pub payload: Bytes,
}

impl Packet {
    /// Create a data packet
    pub fn data(sequence: u32, channel: ChannelId, payload: Bytes, is_last: bool) -> Self {
        Packet {
            sequence,
            channel,
            kind: PacketKind::Data,
            is_last,
            payload,
        }
    }

    /// Create an acknowledgement
    pub fn ack(sequence: u32, channel: ChannelId, is_last: bool) -> Self {
        Packet {
            sequence,
            channel,
            kind: PacketKind::Ack,
            is_last,
            payload: Bytes::new(),
        }
    }

    /// Acknowledgement echoing this packet's sequence, channel and last flag
    pub fn ack_for(&self) -> Packet {
        Packet::ack(self.sequence, self.channel, self.is_last)
    }

    #[inline]
    pub fn is_data(&self) -> bool {
        self.kind == PacketKind::Data
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        self.kind == PacketKind::Ack
    }

    /// Offset one past the last payload byte
    pub fn end_offset(&self) -> u64 {
        self.sequence as u64 + self.payload.len() as u64
    }

    /// Check the packet against the framing rules for a given capacity
    pub fn validate(&self, payload_capacity: usize) -> Result<(), PacketError> {
        let size = self.payload.len();
        match self.kind {
            PacketKind::Ack if size != 0 => Err(PacketError::PayloadOnAck(size)),
            PacketKind::Ack => Ok(()),
            PacketKind::Data if size > payload_capacity => Err(PacketError::PayloadTooLarge {
                size,
                max: payload_capacity,
            }),
            PacketKind::Data if size < payload_capacity && !self.is_last => {
                Err(PacketError::UnmarkedShortPayload {
                    size,
                    capacity: payload_capacity,
                })
            }
            PacketKind::Data => Ok(()),
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.kind == PacketKind::Ack {
            flags |= KIND_FLAG;
        }
        if self.channel == ChannelId::ONE {
            flags |= CHANNEL_FLAG;
        }
        if self.is_last {
            flags |= LAST_FLAG;
        }
        flags
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} seq={} size={} channel={}{}",
            self.kind,
            self.sequence,
            self.payload.len(),
            self.channel,
            if self.is_last { " last" } else { "" }
        )
    }
}

/// Fixed-size frame encoder/decoder
///
/// Both peers must use the same payload capacity; a frame of any other length
/// is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    payload_capacity: usize,
}

impl PacketCodec {
    /// Create a codec for frames carrying up to `payload_capacity` bytes
    pub fn new(payload_capacity: usize) -> Result<Self, PacketError> {
        if payload_capacity == 0 || u32::try_from(payload_capacity).is_err() {
            return Err(PacketError::InvalidCapacity(payload_capacity));
        }
        Ok(PacketCodec { payload_capacity })
    }

    #[inline]
    pub fn payload_capacity(&self) -> usize {
        self.payload_capacity
    }

    /// Size of every frame on the wire
    #[inline]
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload_capacity
    }

    /// Serialize a packet into a new frame
    pub fn encode(&self, packet: &Packet) -> Result<BytesMut, PacketError> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.encode_into(packet, &mut buf)?;
        Ok(buf)
    }

    /// Serialize a packet, appending exactly `wire_size()` bytes to `buf`
    pub fn encode_into(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), PacketError> {
        packet.validate(self.payload_capacity)?;

        let size = packet.payload.len();
        buf.reserve(self.wire_size());
        buf.put_u32(packet.sequence);
        buf.put_u8(packet.flags());
        buf.put_u32(size as u32);
        buf.put_slice(&packet.payload);
        buf.put_bytes(0, self.payload_capacity - size);
        Ok(())
    }

    /// Parse one frame
    pub fn decode(&self, bytes: &[u8]) -> Result<Packet, PacketError> {
        let expected = self.wire_size();
        if bytes.len() < expected {
            return Err(PacketError::InsufficientData {
                expected,
                actual: bytes.len(),
            });
        }
        if bytes.len() > expected {
            return Err(PacketError::OversizedFrame {
                expected,
                actual: bytes.len(),
            });
        }

        let mut buf = bytes;
        let sequence = buf.get_u32();
        let flags = buf.get_u8();
        let size = buf.get_u32() as usize;

        if flags & RESERVED_MASK != 0 {
            return Err(PacketError::ReservedFlags(flags));
        }
        if size > self.payload_capacity {
            return Err(PacketError::PayloadTooLarge {
                size,
                max: self.payload_capacity,
            });
        }

        let kind = if flags & KIND_FLAG != 0 {
            PacketKind::Ack
        } else {
            PacketKind::Data
        };
        let channel = if flags & CHANNEL_FLAG != 0 {
            ChannelId::ONE
        } else {
            ChannelId::ZERO
        };

        let packet = Packet {
            sequence,
            channel,
            kind,
            is_last: flags & LAST_FLAG != 0,
            payload: Bytes::copy_from_slice(&buf[..size]),
        };
        packet.validate(self.payload_capacity)?;
        Ok(packet)
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        PacketCodec {
            payload_capacity: PACKET_SIZE,
        }
    }
}

/// Packet parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Oversized frame: expected {expected} bytes, got {actual}")]
    OversizedFrame { expected: usize, actual: usize },

    #[error("Reserved flag bits set: {0:#010b}")]
    ReservedFlags(u8),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Acknowledgement carries {0} payload bytes")]
    PayloadOnAck(usize),

    #[error("Short payload of {size} bytes (capacity {capacity}) not marked last")]
    UnmarkedShortPayload { size: usize, capacity: usize },

    #[error("Invalid payload capacity: {0}")]
    InvalidCapacity(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> PacketCodec {
        PacketCodec::default()
    }

    #[test]
    fn test_wire_size() {
        assert_eq!(codec().wire_size(), HEADER_SIZE + PACKET_SIZE);
        assert_eq!(PacketCodec::new(8).unwrap().wire_size(), 17);
    }

    #[test]
    fn test_data_packet_serialization() {
        let payload = Bytes::from_static(b"Hello, twinlink!");
        let packet = Packet::data(300, ChannelId::ONE, payload.clone(), true);

        let bytes = codec().encode(&packet).unwrap();
        assert_eq!(bytes.len(), codec().wire_size());
        assert_eq!(&bytes[..4], &300u32.to_be_bytes());
        assert_eq!(bytes[4], CHANNEL_FLAG | LAST_FLAG);
        assert_eq!(&bytes[5..9], &(payload.len() as u32).to_be_bytes());

        let decoded = codec().decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_ack_flags() {
        let data = Packet::data(0, ChannelId::ZERO, Bytes::from(vec![7u8; PACKET_SIZE]), false);
        let ack = data.ack_for();
        assert!(ack.is_ack());
        assert_eq!(ack.sequence, 0);
        assert!(ack.payload.is_empty());

        let bytes = codec().encode(&ack).unwrap();
        assert_eq!(bytes[4], KIND_FLAG);
        assert!(bytes[HEADER_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_padding_ignored_on_decode() {
        let packet = Packet::data(100, ChannelId::ZERO, Bytes::from_static(b"abc"), true);
        let mut bytes = codec().encode(&packet).unwrap();
        for byte in bytes[HEADER_SIZE + 3..].iter_mut() {
            *byte = 0xAA;
        }
        assert_eq!(codec().decode(&bytes).unwrap().payload, Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_undersized_frame_rejected() {
        let err = codec().decode(&[0u8; 5]).unwrap_err();
        assert_eq!(
            err,
            PacketError::InsufficientData {
                expected: codec().wire_size(),
                actual: 5
            }
        );
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let bytes = vec![0u8; codec().wire_size() + 1];
        assert!(matches!(
            codec().decode(&bytes),
            Err(PacketError::OversizedFrame { .. })
        ));
    }

    #[test]
    fn test_reserved_flags_rejected() {
        let mut bytes = codec()
            .encode(&Packet::ack(0, ChannelId::ZERO, false))
            .unwrap();
        bytes[4] |= 0x80;
        assert_eq!(codec().decode(&bytes), Err(PacketError::ReservedFlags(0x81)));
    }

    #[test]
    fn test_declared_size_beyond_capacity_rejected() {
        let mut bytes = codec()
            .encode(&Packet::ack(0, ChannelId::ZERO, false))
            .unwrap();
        bytes[5..9].copy_from_slice(&(PACKET_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(
            codec().decode(&bytes),
            Err(PacketError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_short_payload_must_be_last() {
        let packet = Packet::data(0, ChannelId::ZERO, Bytes::from_static(b"tail"), false);
        assert!(matches!(
            codec().encode(&packet),
            Err(PacketError::UnmarkedShortPayload { size: 4, .. })
        ));

        // A full payload may still be the last one, and an empty one must be
        let full_last = Packet::data(0, ChannelId::ZERO, Bytes::from(vec![1u8; PACKET_SIZE]), true);
        assert!(codec().encode(&full_last).is_ok());
        let empty_last = Packet::data(100, ChannelId::ONE, Bytes::new(), true);
        assert!(codec().encode(&empty_last).is_ok());
    }

    #[test]
    fn test_invalid_capacity() {
        assert_eq!(PacketCodec::new(0), Err(PacketError::InvalidCapacity(0)));
    }

    #[test]
    fn test_channel_id() {
        assert_eq!(ChannelId::new(2), None);
        assert_eq!(ChannelId::ZERO.other(), ChannelId::ONE);
        assert_eq!(ChannelId::from_index(1), Some(ChannelId::ONE));
        assert_eq!(ChannelId::ONE.to_string(), "1");
    }
}
