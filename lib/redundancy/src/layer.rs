//! Public interface of the redundancy layer.
//!
//! The layer couples the per channel state machines with the core and owns the
//! periodic `check_timings` pump that services pending transport channels and
//! the defer timeout.

use crate::core::RedCore;
use crate::state_machine::{RedAction, RedEvent, RedState, RedStateMachine};
use crate::{RedNotifications, Transport};
use rasta_common::config::RedundancyConfig;
use rasta_common::logging;
use rasta_common::platform::Platform;
use rasta_common::shared::RastaResult;
use rasta_common::{RedChannelId, TransportChannelId};

pub struct RedundancyLayer<T, P, N> {
    core: RedCore<T, P, N>,
    machines: Vec<RedStateMachine>,
    log: logging::Logger,
}

impl<T: Transport, P: Platform, N: RedNotifications> RedundancyLayer<T, P, N> {
    /// Validates the configuration and builds the full layer. All buffers and
    /// queues are dimensioned here.
    pub fn new(
        config: RedundancyConfig,
        transport: T,
        platform: P,
        notifications: N,
        log: &logging::Logger,
    ) -> RastaResult<RedundancyLayer<T, P, N>> {
        let channel_count = config.redundancy_channels.len();
        let core = RedCore::new(config, transport, platform, notifications, log)?;
        let machines = (0..channel_count).map(|_| RedStateMachine::new(log)).collect();

        logging::info!(log, "redundancy layer initialized"; "channels" => channel_count);

        Ok(RedundancyLayer {
            core,
            machines,
            log: log.new(logging::o!()),
        })
    }

    /// Opens a redundancy channel, resetting all of its state.
    pub fn open_red_channel(&mut self, channel: RedChannelId) -> RastaResult<()> {
        self.dispatch_event(channel, RedEvent::Open)
    }

    /// Closes a redundancy channel. Pending transport data is drained and
    /// discarded by the next `check_timings`.
    pub fn close_red_channel(&mut self, channel: RedChannelId) -> RastaResult<()> {
        self.dispatch_event(channel, RedEvent::Close)
    }

    /// Current state of a channel.
    pub fn channel_state(&self, channel: RedChannelId) -> RastaResult<RedState> {
        let index = self.check_channel(channel)?;
        Ok(self.machines[index].state())
    }

    /// Hands one safety layer PDU to the channel for duplicated transmission.
    pub fn send_message(&mut self, channel: RedChannelId, payload: &[u8]) -> RastaResult<()> {
        self.core
            .write_message_payload_to_send_buffer(channel, payload)?;
        self.dispatch_event(channel, RedEvent::SendData)
    }

    /// Copies the oldest delivered payload into `buffer`.
    pub fn read_message(&mut self, channel: RedChannelId, buffer: &mut [u8]) -> RastaResult<usize> {
        self.core.read_from_receive_buffer(channel, buffer)
    }

    /// Free receive buffer slots of a channel.
    pub fn get_free_buffer_entries(&self, channel: RedChannelId) -> RastaResult<usize> {
        self.core.receive_buffer_free_entries(channel)
    }

    /// Entry point for the transport adapter's receive notification: marks
    /// the transport channel as holding data. The actual read happens in
    /// `check_timings`.
    pub fn message_received(&mut self, transport_channel: TransportChannelId) -> RastaResult<()> {
        let channel = self
            .core
            .get_associated_redundancy_channel(transport_channel)?;
        self.core.set_message_pending_flag(channel, transport_channel)
    }

    /// Periodic pump. Services every channel: reads pending transport
    /// channels while the receive buffer has room beyond what the defer queue
    /// may still claim, fires the defer timeout, and drains pending data of
    /// closed channels into the void.
    pub fn check_timings(&mut self) -> RastaResult<()> {
        for index in 0..self.machines.len() {
            let channel = index as RedChannelId;
            match self.machines[index].state() {
                RedState::Up => self.service_open_channel(channel)?,
                RedState::Closed => self.drain_closed_channel(channel)?,
            }
        }
        Ok(())
    }

    fn service_open_channel(&mut self, channel: RedChannelId) -> RastaResult<()> {
        let transport_count = self.core.transport_channel_count(channel)?;

        // One read attempt per pending transport channel, in configured
        // order. Admission: the receive buffer must keep room for everything
        // already parked in the defer queue.
        for position in 0..transport_count {
            let transport_channel = self.core.transport_channel_at(channel, position)?;
            if !self
                .core
                .get_message_pending_flag(channel, transport_channel)?
            {
                continue;
            }

            let free = self.core.receive_buffer_free_entries(channel)?;
            let used_defer = self.core.defer_queue_used_entries(channel)?;
            if free <= used_defer {
                logging::trace!(self.log, "receive backpressure, read deferred";
                                "channel" => channel,
                                "free" => free,
                                "deferred" => used_defer);
                break;
            }

            if self.core.read_transport_channel(channel, transport_channel)? {
                self.dispatch_event(channel, RedEvent::ReceiveData)?;
                self.core.clear_input_buffer_message_flag(channel)?;
            } else {
                self.core
                    .clear_message_pending_flag(channel, transport_channel)?;
            }
        }

        if self.core.is_defer_queue_timeout(channel)? {
            self.dispatch_event(channel, RedEvent::DeferTimeout)?;
        }

        Ok(())
    }

    fn drain_closed_channel(&mut self, channel: RedChannelId) -> RastaResult<()> {
        let transport_count = self.core.transport_channel_count(channel)?;

        for position in 0..transport_count {
            let transport_channel = self.core.transport_channel_at(channel, position)?;
            if self
                .core
                .get_message_pending_flag(channel, transport_channel)?
            {
                self.core.discard_transport_channel(transport_channel);
                self.core
                    .clear_message_pending_flag(channel, transport_channel)?;
            }
        }

        Ok(())
    }

    fn dispatch_event(&mut self, channel: RedChannelId, event: RedEvent) -> RastaResult<()> {
        let index = self.check_channel(channel)?;
        match self.machines[index].process_event(event) {
            Some(RedAction::InitChannelData) => self.core.init_channel_data(channel),
            Some(RedAction::ProcessReceivedMessage) => self.core.process_received_message(channel),
            Some(RedAction::SendPendingMessage) => self.core.send_message(channel),
            Some(RedAction::DrainDeferQueue) => self.core.defer_queue_timeout(channel),
            None => Ok(()),
        }
    }

    fn check_channel(&self, channel: RedChannelId) -> RastaResult<usize> {
        // Channel ids are validated by the core so the fatal trap fires once.
        self.core.transport_channel_count(channel)?;
        Ok(channel as usize)
    }
}
