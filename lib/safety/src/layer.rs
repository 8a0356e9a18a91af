//! Public interface of the safety layer and the glue to the redundancy layer
//! below it.
//!
//! The facade is deliberately thin: every operation validates and delegates
//! into the connection core. The `LowerLayer` implementation for the
//! redundancy layer completes the vertical composition of the stack; the
//! embedding application still owns the periodic driving of both layers
//! (`lower_mut().check_timings()` for the redundancy layer, `check_timings()`
//! for the connections).

use crate::core::SrCore;
use crate::state_machine::SrState;
use crate::{LowerLayer, SrNotifications};
use rasta_common::config::SafetyConfig;
use rasta_common::logging;
use rasta_common::platform::Platform;
use rasta_common::shared::RastaResult;
use rasta_common::{ConnectionId, RedChannelId};
use rasta_redundancy::layer::RedundancyLayer;
use rasta_redundancy::{RedNotifications, Transport};

pub struct SrLayer<L, P, N> {
    core: SrCore<L, P, N>,
}

impl<L: LowerLayer, P: Platform, N: SrNotifications> SrLayer<L, P, N> {
    /// Validates the configuration and builds the layer. Connection `i`
    /// rides on redundancy channel `i` of the layer below.
    pub fn new(
        config: SafetyConfig,
        lower: L,
        platform: P,
        notifications: N,
        log: &logging::Logger,
    ) -> RastaResult<SrLayer<L, P, N>> {
        let connection_count = config.connections.len();
        let core = SrCore::new(config, lower, platform, notifications, log)?;

        logging::info!(log, "safety layer initialized"; "connections" => connection_count);

        Ok(SrLayer { core })
    }

    /// Actively opens a connection towards the configured peer.
    pub fn open_connection(&mut self, connection: ConnectionId) -> RastaResult<()> {
        self.core.open_connection(connection)
    }

    /// Closes a connection, notifying the peer.
    pub fn close_connection(&mut self, connection: ConnectionId) -> RastaResult<()> {
        self.core.close_connection(connection)
    }

    /// Current lifecycle state of a connection.
    pub fn connection_state(&self, connection: ConnectionId) -> RastaResult<SrState> {
        self.core.connection_state(connection)
    }

    /// Queues one application payload for authenticated, confirmed delivery.
    pub fn send_data(&mut self, connection: ConnectionId, payload: &[u8]) -> RastaResult<()> {
        self.core.send_data(connection, payload)
    }

    /// Copies the oldest delivered payload into the caller's buffer.
    pub fn read_data(&mut self, connection: ConnectionId, buffer: &mut [u8]) -> RastaResult<usize> {
        self.core.read_data(connection, buffer)
    }

    /// Periodic pump for ingress, supervision, heartbeats and egress.
    pub fn check_timings(&mut self) -> RastaResult<()> {
        self.core.check_timings()
    }

    /// Access to the layer below, for driving its own timing pump.
    pub fn lower_mut(&mut self) -> &mut L {
        self.core.lower_mut()
    }
}

/// The redundancy layer is the production lower layer of the stack.
impl<T: Transport, P: Platform, N: RedNotifications> LowerLayer for RedundancyLayer<T, P, N> {
    fn send_message_payload(&mut self, channel: RedChannelId, payload: &[u8]) -> RastaResult<()> {
        self.send_message(channel, payload)
    }

    fn read_message(&mut self, channel: RedChannelId, buffer: &mut [u8]) -> RastaResult<usize> {
        RedundancyLayer::read_message(self, channel, buffer)
    }
}
