//! Raw packet buffer and header accessors
//!
//! A [`PacketBuffer`] owns the bytes of exactly one frame. All field access
//! goes through offset-checked `get`/`set` primitives; the typed payload
//! wrappers (one per packet type) build on top of them.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::{DEFAULT_TTL, HEADER_LEN, MAX_PACKET_LEN};

// Header field offsets, protocol constants
const NET_INDEX: usize = 0;
const LEN_INDEX: usize = 1;
const DST_INDEX: usize = 2;
const SRC_INDEX: usize = 4;
const TYP_INDEX: usize = 6;
const TTL_INDEX: usize = 7;
const NXH_INDEX: usize = 8;

/// Frame-level errors
///
/// Everything here is recoverable: a receive loop drops the offending frame
/// and keeps going. Out-of-bounds field access is *not* represented here; it
/// is a programming error and panics.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame too short: {actual} bytes, header needs {expected}")]
    TooShort { expected: usize, actual: usize },

    #[error("frame length {0} exceeds the protocol maximum")]
    TooLong(usize),

    #[error("declared length {declared} does not match {actual} received bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown packet type tag {0:#04x}")]
    UnknownType(u8),

    #[error("expected {expected} packet, got {actual}")]
    WrongType {
        expected: PacketType,
        actual: PacketType,
    },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Packet type tags
///
/// Tag values are part of the wire format and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Beacon = 1,
    Report = 2,
    Request = 3,
    Response = 4,
    OpenPath = 5,
    Config = 6,
    RegProxy = 7,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketType::Data),
            1 => Some(PacketType::Beacon),
            2 => Some(PacketType::Report),
            3 => Some(PacketType::Request),
            4 => Some(PacketType::Response),
            5 => Some(PacketType::OpenPath),
            6 => Some(PacketType::Config),
            7 => Some(PacketType::RegProxy),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketType::Data => "DATA",
            PacketType::Beacon => "BEACON",
            PacketType::Report => "REPORT",
            PacketType::Request => "REQUEST",
            PacketType::Response => "RESPONSE",
            PacketType::OpenPath => "OPEN_PATH",
            PacketType::Config => "CONFIG",
            PacketType::RegProxy => "REG_PROXY",
        };
        f.write_str(name)
    }
}

/// A 16-bit node address
///
/// Rendered as `high.low` (e.g. `0.1`); the all-ones address `255.255` is
/// the broadcast sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress(u16);

impl NodeAddress {
    /// The reserved broadcast address, `255.255`
    pub const BROADCAST: NodeAddress = NodeAddress(0xFFFF);

    pub fn new(value: u16) -> Self {
        NodeAddress(value)
    }

    pub fn from_octets(high: u8, low: u8) -> Self {
        NodeAddress(u16::from_be_bytes([high, low]))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn high(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn low(self) -> u8 {
        self.0 as u8
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.high(), self.low())
    }
}

// Debug mirrors Display so addresses log as `0.1` everywhere.
impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<u16> for NodeAddress {
    fn from(value: u16) -> Self {
        NodeAddress(value)
    }
}

impl FromStr for NodeAddress {
    type Err = FrameError;

    /// Accepts either the dotted form `high.low` or a plain 0-65535 integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| FrameError::InvalidField {
            field: "node address",
            reason,
        };
        if let Some((high, low)) = s.split_once('.') {
            let high: u8 = high
                .parse()
                .map_err(|_| invalid(format!("bad high octet in {s:?}")))?;
            let low: u8 = low
                .parse()
                .map_err(|_| invalid(format!("bad low octet in {s:?}")))?;
            Ok(NodeAddress::from_octets(high, low))
        } else {
            let value: u16 = s
                .parse()
                .map_err(|_| invalid(format!("{s:?} is not a 0-65535 value")))?;
            Ok(NodeAddress(value))
        }
    }
}

/// One owned frame
///
/// The backing storage is always `MAX_PACKET_LEN` bytes; the declared length
/// field in the header governs how many of them belong to the frame. New
/// buffers are zero-filled, which the dpid encoding relies on.
#[derive(Clone, PartialEq, Eq)]
pub struct PacketBuffer {
    data: [u8; MAX_PACKET_LEN],
}

impl PacketBuffer {
    /// Create a zero-filled frame of the given total length.
    ///
    /// The declared length field and the default TTL are set; everything
    /// else is zero. Panics if `frame_len` is not a representable frame
    /// size - the callers are typed packet constructors with compile-time
    /// known lengths, so a bad value is a programming error.
    pub fn new(frame_len: usize) -> Self {
        assert!(
            (HEADER_LEN..=MAX_PACKET_LEN).contains(&frame_len),
            "frame length {frame_len} outside [{HEADER_LEN}, {MAX_PACKET_LEN}]"
        );
        let mut buf = PacketBuffer {
            data: [0u8; MAX_PACKET_LEN],
        };
        buf.data[LEN_INDEX] = frame_len as u8;
        buf.data[TTL_INDEX] = DEFAULT_TTL;
        buf
    }

    /// Wrap bytes received from the network.
    ///
    /// The buffer must be at least a header long, no longer than the
    /// protocol maximum, and exactly as long as its declared length field
    /// says. Anything else is a malformed frame the caller can drop.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::TooShort {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if bytes.len() > MAX_PACKET_LEN {
            return Err(FrameError::TooLong(bytes.len()));
        }
        let declared = bytes[LEN_INDEX] as usize;
        if declared != bytes.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        let mut buf = PacketBuffer {
            data: [0u8; MAX_PACKET_LEN],
        };
        buf.data[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }

    /// Declared total frame length, header included
    pub fn len(&self) -> usize {
        self.data[LEN_INDEX] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The frame as raw bytes, ready for a socket
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Read `len` bytes starting at `offset`.
    ///
    /// Panics if the range leaves the declared frame - that is a bug in the
    /// calling codec, not a property of the data.
    pub fn get(&self, offset: usize, len: usize) -> &[u8] {
        self.check_range(offset, len);
        &self.data[offset..offset + len]
    }

    /// Write `bytes` starting at `offset`. Same bounds contract as [`get`].
    ///
    /// [`get`]: PacketBuffer::get
    pub fn set(&mut self, offset: usize, bytes: &[u8]) {
        self.check_range(offset, bytes.len());
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn check_range(&self, offset: usize, len: usize) {
        let end = offset
            .checked_add(len)
            .unwrap_or_else(|| panic!("field range overflows at offset {offset}"));
        assert!(
            end <= self.len(),
            "field range {offset}..{end} outside frame of {} bytes",
            self.len()
        );
    }

    fn get_u16(&self, offset: usize) -> u16 {
        let b = self.get(offset, 2);
        u16::from_be_bytes([b[0], b[1]])
    }

    fn set_u16(&mut self, offset: usize, value: u16) {
        self.set(offset, &value.to_be_bytes());
    }

    // Header accessors

    pub fn net_id(&self) -> u8 {
        self.data[NET_INDEX]
    }

    pub fn set_net_id(&mut self, net_id: u8) {
        self.data[NET_INDEX] = net_id;
    }

    pub fn dst(&self) -> NodeAddress {
        NodeAddress::new(self.get_u16(DST_INDEX))
    }

    pub fn set_dst(&mut self, dst: NodeAddress) {
        self.set_u16(DST_INDEX, dst.value());
    }

    pub fn src(&self) -> NodeAddress {
        NodeAddress::new(self.get_u16(SRC_INDEX))
    }

    pub fn set_src(&mut self, src: NodeAddress) {
        self.set_u16(SRC_INDEX, src.value());
    }

    pub fn nxh(&self) -> NodeAddress {
        NodeAddress::new(self.get_u16(NXH_INDEX))
    }

    pub fn set_nxh(&mut self, nxh: NodeAddress) {
        self.set_u16(NXH_INDEX, nxh.value());
    }

    /// The raw type tag byte
    pub fn typ_raw(&self) -> u8 {
        self.data[TYP_INDEX]
    }

    /// The type tag, if this receiver knows it
    pub fn typ(&self) -> Result<PacketType, FrameError> {
        PacketType::from_u8(self.typ_raw()).ok_or(FrameError::UnknownType(self.typ_raw()))
    }

    pub fn set_typ(&mut self, typ: PacketType) {
        self.data[TYP_INDEX] = typ.to_u8();
    }

    pub fn ttl(&self) -> u8 {
        self.data[TTL_INDEX]
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.data[TTL_INDEX] = ttl;
    }

    /// Decrement TTL, saturating at zero. Returns the new value.
    pub fn decrement_ttl(&mut self) -> u8 {
        let ttl = self.ttl().saturating_sub(1);
        self.set_ttl(ttl);
        ttl
    }

    // Payload accessors, offsets relative to the end of the header

    /// Payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.len() - HEADER_LEN
    }

    /// The whole payload span
    pub fn payload(&self) -> &[u8] {
        self.get(HEADER_LEN, self.payload_len())
    }

    pub fn payload_at(&self, index: usize) -> u8 {
        self.get(HEADER_LEN + index, 1)[0]
    }

    pub fn set_payload_at(&mut self, index: usize, value: u8) {
        self.set(HEADER_LEN + index, &[value]);
    }

    /// Payload bytes in `[from, to)`
    pub fn payload_range(&self, from: usize, to: usize) -> &[u8] {
        self.get(HEADER_LEN + from, to - from)
    }

    pub fn set_payload_range(&mut self, from: usize, bytes: &[u8]) {
        self.set(HEADER_LEN + from, bytes);
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("net", &self.net_id())
            .field("len", &self.len())
            .field("dst", &self.dst())
            .field("src", &self.src())
            .field("typ", &self.typ_raw())
            .field("ttl", &self.ttl())
            .field("nxh", &self.nxh())
            .finish()
    }
}
