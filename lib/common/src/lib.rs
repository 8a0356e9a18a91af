#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod config;
pub mod crc;
pub mod logging;
pub mod md4;
pub mod platform;
pub mod seq;
pub mod shared;

/// Identifier of a redundancy channel. Contiguous from 0.
pub type RedChannelId = u32;
/// Identifier of a transport channel. Globally unique across the configuration.
pub type TransportChannelId = u32;
/// Identifier of a safety layer connection.
pub type ConnectionId = u32;

/// Capacity of the per-connection send buffer and the per-channel receive buffer.
pub const N_SEND_MAX: usize = 20;

/// Redundancy layer PDU header size in bytes.
pub const RED_HEADER_SIZE: usize = 8;
/// Smallest valid redundancy layer PDU: header plus minimal payload, no check code.
pub const RED_MESSAGE_SIZE_MIN: usize = 36;
/// Largest valid redundancy layer PDU: header plus maximal payload plus 4 byte check code.
pub const RED_MESSAGE_SIZE_MAX: usize = 1113;
/// Smallest redundancy payload (one complete safety layer PDU).
pub const RED_PAYLOAD_SIZE_MIN: usize = 28;
/// Largest redundancy payload.
pub const RED_PAYLOAD_SIZE_MAX: usize = 1101;

/// Safety layer PDU header size in bytes.
pub const SR_HEADER_SIZE: usize = 28;
/// Smallest valid safety layer PDU: a bare header.
pub const SR_MESSAGE_SIZE_MIN: usize = 28;
/// Largest valid safety layer PDU: header, payload size prefix, maximal
/// application payload and a full 16 byte safety code.
pub const SR_MESSAGE_SIZE_MAX: usize = 1101;
/// Smallest application payload of a data message.
pub const SR_PAYLOAD_SIZE_MIN: usize = 28;
/// Largest application payload of a data message.
pub const SR_PAYLOAD_SIZE_MAX: usize = 1055;
