//! Safety and retransmission layer of the RaSTA protocol stack.
//!
//! On top of the deduplicated, in order stream provided by the redundancy
//! layer, this layer adds authenticated delivery (MD4 safety code), per
//! connection sequence numbering with confirmations, retransmission of
//! unconfirmed messages, heartbeats and the connection lifecycle.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod core;
pub mod layer;
pub mod message;
pub mod send_buffer;
pub mod state_machine;

#[cfg(test)]
pub mod testing;

use crate::state_machine::SrState;
use rasta_common::shared::RastaResult;
use rasta_common::{ConnectionId, RedChannelId};

/// Seam to the layer below. In production this is the redundancy layer; every
/// connection maps onto the redundancy channel with the same id.
pub trait LowerLayer {
    /// Hands one safety layer PDU down for duplicated transmission.
    fn send_message_payload(&mut self, channel: RedChannelId, payload: &[u8]) -> RastaResult<()>;

    /// Copies the oldest delivered PDU into `buffer`, returning its size.
    /// Fails with `NoMessageReceived` when nothing is pending.
    fn read_message(&mut self, channel: RedChannelId, buffer: &mut [u8]) -> RastaResult<usize>;
}

/// Notifications delivered to the application. The callee must not re-enter
/// the layer for the same connection from within a callback.
pub trait SrNotifications {
    /// An application payload is ready to be read.
    fn message_received_notification(&mut self, connection: ConnectionId);

    /// The connection changed state.
    fn connection_state_notification(&mut self, connection: ConnectionId, state: SrState);
}
