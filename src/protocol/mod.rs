//! Protocol module - Defines the wire format shared by every node
//!
//! Every frame starts with the same fixed 10-byte header:
//! - 1 byte network id
//! - 1 byte declared frame length (header included)
//! - 2 bytes destination address (big-endian)
//! - 2 bytes source address (big-endian)
//! - 1 byte packet type tag
//! - 1 byte time-to-live
//! - 2 bytes next-hop address (big-endian)
//!
//! The bytes after the header are governed by the packet type tag. Each
//! type is an independent wrapper over a raw packet buffer; adding a new
//! type never touches the header logic.

mod packet;
mod reg_proxy;

pub use packet::*;
pub use reg_proxy::*;

/// Size of the common header, in bytes
pub const HEADER_LEN: usize = 10;

/// Largest frame the protocol allows on the air
pub const MAX_PACKET_LEN: usize = 116;

/// Initial time-to-live for freshly built frames
pub const DEFAULT_TTL: u8 = 100;
