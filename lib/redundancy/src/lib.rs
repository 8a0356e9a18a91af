//! Redundancy layer of the RaSTA protocol stack.
//!
//! The layer merges the duplicated message streams arriving on up to two
//! transport channels per redundancy channel into one deduplicated, in order
//! stream for the safety layer above, and mirrors every outbound PDU onto all
//! transport channels of its redundancy channel.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod core;
pub mod defer_queue;
pub mod diagnostics;
pub mod layer;
pub mod message;
pub mod receive_buffer;
pub mod state_machine;

#[cfg(test)]
pub mod testing;

pub use crate::diagnostics::DiagnosticData;

use rasta_common::{RedChannelId, TransportChannelId};

/// Byte level transport below the redundancy layer, typically a UDP adapter.
/// Supplied by the embedding application.
pub trait Transport {
    /// Queues one frame for transmission on the given transport channel.
    /// Fire and forget; delivery is what the redundancy scheme is for.
    fn send_message(&mut self, channel: TransportChannelId, data: &[u8]);

    /// Reads one complete received frame into `buffer` and returns its size,
    /// or `None` when nothing is pending on the channel.
    fn read_message(&mut self, channel: TransportChannelId, buffer: &mut [u8]) -> Option<usize>;
}

/// Notifications delivered upward to the safety layer or application. The
/// callee must not re-enter the redundancy layer for the same channel from
/// within a callback.
pub trait RedNotifications {
    /// A payload has been appended to the channel's receive buffer.
    fn message_received_notification(&mut self, channel: RedChannelId);

    /// A diagnostic window has closed for the given transport channel.
    fn diagnostic_notification(
        &mut self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
        data: DiagnosticData,
    );
}
