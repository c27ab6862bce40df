//! oscroute core
//!
//! Wire format and addressing primitives for an Open Sound Control router.
//!
//! This crate provides:
//! - Packet types ([`Message`], [`Argument`], [`Bundle`], [`Packet`], [`TimeTag`])
//! - OSC 1.0 binary encoding/decoding ([`codec`])
//! - Address validation and wildcard pattern matching ([`Address`], [`Pattern`])

pub mod address;
pub mod codec;
pub mod error;
pub mod types;

pub use address::{Address, Pattern};
pub use codec::{decode, decode_packet, encode, encode_packet};
pub use error::{DecodeError, Error, PatternError, Result};
pub use types::*;

/// Default UDP port for OSC servers
pub const DEFAULT_OSC_PORT: u16 = 9000;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65507;
