//! Orchestration of the redundancy channels.
//!
//! The core owns every per channel state block: sequence counters, the single
//! slot input and send holders, the defer queue and the receive buffer. The
//! receive algorithm deduplicates and reorders the transport channel streams;
//! the send path mirrors one PDU onto every transport channel of the
//! redundancy channel.

use crate::defer_queue::DeferQueue;
use crate::diagnostics::{self, RedDiagnostics};
use crate::message::{RedMessage, RedMessageCodec};
use crate::receive_buffer::ReceiveBuffer;
use crate::{RedNotifications, Transport};
use rasta_common::config::RedundancyConfig;
use rasta_common::logging;
use rasta_common::platform::Platform;
use rasta_common::seq;
use rasta_common::shared::{RastaError, RastaResult};
use rasta_common::{
    RedChannelId, TransportChannelId, RED_MESSAGE_SIZE_MAX, RED_MESSAGE_SIZE_MIN,
    RED_PAYLOAD_SIZE_MAX, RED_PAYLOAD_SIZE_MIN,
};

/// Single slot holder for one received PDU awaiting processing.
struct InputBuffer {
    message_in_buffer: bool,
    transport_channel_id: TransportChannelId,
    message: RedMessage,
}

/// Single slot holder for one outbound payload awaiting transmission.
struct SendBuffer {
    message_in_buffer: bool,
    size: usize,
    payload: [u8; RED_PAYLOAD_SIZE_MAX],
}

struct ChannelData {
    seq_rx: u32,
    seq_tx: u32,
    received_data_pending: Vec<bool>,
    input_buffer: InputBuffer,
    send_buffer: SendBuffer,
    defer_queue: DeferQueue,
    receive_buffer: ReceiveBuffer,
}

pub struct RedCore<T, P, N> {
    config: RedundancyConfig,
    codec: RedMessageCodec,
    diagnostics: RedDiagnostics,
    channels: Vec<ChannelData>,
    transport: T,
    platform: P,
    notifications: N,
    log: logging::Logger,
}

impl<T: Transport, P: Platform, N: RedNotifications> RedCore<T, P, N> {
    /// Builds the core from a validated configuration. All channel state is
    /// allocated here; nothing grows afterwards.
    pub fn new(
        config: RedundancyConfig,
        transport: T,
        platform: P,
        notifications: N,
        log: &logging::Logger,
    ) -> RastaResult<RedCore<T, P, N>> {
        if !diagnostics::validate_configuration(&config) {
            return Err(RastaError::InvalidConfiguration);
        }

        let channel_log = log.new(logging::o!());
        let channels = config
            .redundancy_channels
            .iter()
            .map(|channel| ChannelData {
                seq_rx: 0,
                seq_tx: 0,
                received_data_pending: vec![false; channel.transport_channel_ids.len()],
                input_buffer: InputBuffer {
                    message_in_buffer: false,
                    transport_channel_id: 0,
                    message: RedMessage::empty(),
                },
                send_buffer: SendBuffer {
                    message_in_buffer: false,
                    size: 0,
                    payload: [0; RED_PAYLOAD_SIZE_MAX],
                },
                defer_queue: DeferQueue::new(
                    config.n_defer_queue_size as usize,
                    config.t_seq,
                    &channel_log,
                ),
                receive_buffer: ReceiveBuffer::new(&channel_log),
            })
            .collect();

        let diagnostics = RedDiagnostics::new(&config, log);
        let codec = RedMessageCodec::new(config.check_code_type);

        Ok(RedCore {
            config,
            codec,
            diagnostics,
            channels,
            transport,
            platform,
            notifications,
            log: log.new(logging::o!()),
        })
    }

    /// Zeros all per channel state: counters, flags, both single slot buffers,
    /// the defer queue, the receive buffer and the diagnostic window.
    pub fn init_channel_data(&mut self, channel: RedChannelId) -> RastaResult<()> {
        let index = self.check_channel_id(channel)?;

        let data = &mut self.channels[index];
        data.seq_rx = 0;
        data.seq_tx = 0;
        for pending in &mut data.received_data_pending {
            *pending = false;
        }
        data.input_buffer.message_in_buffer = false;
        data.input_buffer.transport_channel_id = 0;
        data.send_buffer.message_in_buffer = false;
        data.send_buffer.size = 0;
        data.defer_queue.clear();
        data.receive_buffer.clear();
        self.diagnostics.init_channel(channel);

        logging::debug!(self.log, "redundancy channel data initialized"; "channel" => channel);
        Ok(())
    }

    /// Gives up on the gap in front of the oldest deferred message and drains
    /// the queue forward from there.
    pub fn defer_queue_timeout(&mut self, channel: RedChannelId) -> RastaResult<()> {
        let index = self.check_channel_id(channel)?;

        let oldest = match self.channels[index].defer_queue.oldest_sequence_number() {
            Ok(sequence) => sequence,
            Err(_) => return Ok(()),
        };

        logging::debug!(self.log, "defer timeout, skipping sequence gap";
                        "channel" => channel,
                        "seq_rx" => self.channels[index].seq_rx,
                        "resume_at" => oldest);

        self.channels[index].seq_rx = oldest;
        self.drain_defer_queue(index)
    }

    /// Looks up the redundancy channel a transport channel belongs to.
    pub fn get_associated_redundancy_channel(
        &self,
        transport_channel: TransportChannelId,
    ) -> RastaResult<RedChannelId> {
        for channel in &self.config.redundancy_channels {
            if channel.transport_channel_ids.contains(&transport_channel) {
                return Ok(channel.red_channel_id);
            }
        }
        Err(self.platform.fail(RastaError::InvalidParameter))
    }

    /// Copies a received frame into the channel's input buffer.
    pub fn write_received_message_to_input_buffer(
        &mut self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
        frame: &[u8],
    ) -> RastaResult<()> {
        let index = self.check_channel_id(channel)?;

        if !self
            .diagnostics
            .is_transport_channel_id_valid(channel, transport_channel)
        {
            return Err(self.platform.fail(RastaError::InvalidParameter));
        }

        if frame.len() < RED_MESSAGE_SIZE_MIN || frame.len() > RED_MESSAGE_SIZE_MAX {
            return Err(self.platform.fail(RastaError::InvalidParameter));
        }

        let data = &mut self.channels[index];
        if data.input_buffer.message_in_buffer {
            logging::trace!(self.log, "unprocessed input buffer overwritten"; "channel" => channel);
        }

        data.input_buffer.message = match RedMessage::from_bytes(frame) {
            Ok(message) => message,
            Err(code) => return Err(self.platform.fail(code)),
        };
        data.input_buffer.transport_channel_id = transport_channel;
        data.input_buffer.message_in_buffer = true;

        Ok(())
    }

    /// The receive algorithm. Check codes the buffered message, filters the
    /// acceptance window, updates diagnostics and delivers, defers or drops.
    pub fn process_received_message(&mut self, channel: RedChannelId) -> RastaResult<()> {
        let index = self.check_channel_id(channel)?;

        if !self.channels[index].input_buffer.message_in_buffer {
            return Err(RastaError::NoMessageReceived);
        }

        // The slot is free again no matter how processing below turns out.
        self.channels[index].input_buffer.message_in_buffer = false;
        let message = self.channels[index].input_buffer.message.clone();
        let transport_channel = self.channels[index].input_buffer.transport_channel_id;

        // Corrupted or malformed frames are dropped without a trace in the
        // diagnostics.
        if self.codec.check_message_crc(&message).is_err() {
            logging::debug!(self.log, "check code mismatch, message dropped";
                            "channel" => channel, "transport_channel" => transport_channel);
            return Ok(());
        }

        let sequence_number = match self.codec.sequence_number(&message) {
            Ok(sequence) => sequence,
            Err(_) => return Ok(()),
        };

        let expected = self.channels[index].seq_rx;

        // Window filter: anything further ahead than ten defer queue depths
        // cannot be an honest reordering and is ignored entirely.
        let window_end = expected.wrapping_add(10 * self.config.n_defer_queue_size);
        if seq::is_older(window_end, sequence_number) {
            logging::debug!(self.log, "message beyond acceptance window, dropped";
                            "channel" => channel,
                            "sequence" => sequence_number,
                            "expected" => expected);
            return Ok(());
        }

        let now = self.platform.get_timer_value();
        self.diagnostics.update_channel(
            channel,
            transport_channel,
            sequence_number,
            now,
            &mut self.notifications,
        );

        if sequence_number == expected {
            let payload = match self.codec.payload(&message) {
                Ok(payload) => payload,
                Err(code) => return Err(self.platform.fail(code)),
            };
            self.push_to_receive_buffer(index, payload)?;
            self.channels[index].seq_rx = expected.wrapping_add(1);
            self.drain_defer_queue(index)?;
        } else if seq::is_older(expected, sequence_number) {
            // Future message inside the window; duplicates are ignored.
            if !self.channels[index].defer_queue.contains(sequence_number) {
                self.channels[index]
                    .defer_queue
                    .add(now, sequence_number, &message);
            }
        } else {
            logging::trace!(self.log, "stale or duplicate message dropped";
                            "channel" => channel,
                            "sequence" => sequence_number,
                            "expected" => expected);
        }

        Ok(())
    }

    /// Stores an outbound payload in the channel's send slot.
    pub fn write_message_payload_to_send_buffer(
        &mut self,
        channel: RedChannelId,
        payload: &[u8],
    ) -> RastaResult<()> {
        let index = self.check_channel_id(channel)?;

        if payload.len() < RED_PAYLOAD_SIZE_MIN || payload.len() > RED_PAYLOAD_SIZE_MAX {
            return Err(self.platform.fail(RastaError::InvalidParameter));
        }

        let data = &mut self.channels[index];
        if data.send_buffer.message_in_buffer {
            return Err(self.platform.fail(RastaError::SendBufferFull));
        }

        data.send_buffer.size = payload.len();
        data.send_buffer.payload[..payload.len()].copy_from_slice(payload);
        data.send_buffer.message_in_buffer = true;

        Ok(())
    }

    /// Frames the buffered payload and mirrors it onto every transport channel
    /// of the redundancy channel, in configured order.
    pub fn send_message(&mut self, channel: RedChannelId) -> RastaResult<()> {
        let index = self.check_channel_id(channel)?;

        if !self.channels[index].send_buffer.message_in_buffer {
            return Err(RastaError::NoMessageToSend);
        }

        let sequence_number = self.channels[index].seq_tx;
        let message = {
            let data = &self.channels[index];
            self.codec
                .create_message(sequence_number, &data.send_buffer.payload[..data.send_buffer.size])
        };
        let message = match message {
            Ok(message) => message,
            Err(code) => return Err(self.platform.fail(code)),
        };

        for &transport_channel in &self.config.redundancy_channels[index].transport_channel_ids {
            self.transport.send_message(transport_channel, message.as_bytes());
        }

        logging::trace!(self.log, "message mirrored onto transport channels";
                        "channel" => channel, "sequence" => sequence_number);

        let data = &mut self.channels[index];
        data.seq_tx = data.seq_tx.wrapping_add(1);
        data.send_buffer.message_in_buffer = false;

        Ok(())
    }

    /// Reads one pending frame from a transport channel into the input
    /// buffer. Returns false when the transport has nothing for us.
    pub fn read_transport_channel(
        &mut self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
    ) -> RastaResult<bool> {
        let mut frame = [0u8; RED_MESSAGE_SIZE_MAX];
        match self.transport.read_message(transport_channel, &mut frame) {
            Some(size) => {
                self.write_received_message_to_input_buffer(
                    channel,
                    transport_channel,
                    &frame[..size],
                )?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reads and discards everything pending on a transport channel.
    pub fn discard_transport_channel(&mut self, transport_channel: TransportChannelId) {
        let mut frame = [0u8; RED_MESSAGE_SIZE_MAX];
        while self
            .transport
            .read_message(transport_channel, &mut frame)
            .is_some()
        {}
    }

    pub fn set_message_pending_flag(
        &mut self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
    ) -> RastaResult<()> {
        let (index, transport_index) = self.check_transport(channel, transport_channel)?;
        self.channels[index].received_data_pending[transport_index] = true;
        Ok(())
    }

    pub fn get_message_pending_flag(
        &self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
    ) -> RastaResult<bool> {
        let (index, transport_index) = self.check_transport(channel, transport_channel)?;
        Ok(self.channels[index].received_data_pending[transport_index])
    }

    pub fn clear_message_pending_flag(
        &mut self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
    ) -> RastaResult<()> {
        let (index, transport_index) = self.check_transport(channel, transport_channel)?;
        self.channels[index].received_data_pending[transport_index] = false;
        Ok(())
    }

    /// Clears the input buffer occupancy flag.
    pub fn clear_input_buffer_message_flag(&mut self, channel: RedChannelId) -> RastaResult<()> {
        let index = self.check_channel_id(channel)?;
        self.channels[index].input_buffer.message_in_buffer = false;
        Ok(())
    }

    /// Clears the send buffer occupancy flag.
    pub fn clear_send_buffer_message_flag(&mut self, channel: RedChannelId) -> RastaResult<()> {
        let index = self.check_channel_id(channel)?;
        self.channels[index].send_buffer.message_in_buffer = false;
        Ok(())
    }

    /// Copies the oldest delivered payload into the caller's buffer.
    pub fn read_from_receive_buffer(
        &mut self,
        channel: RedChannelId,
        buffer: &mut [u8],
    ) -> RastaResult<usize> {
        let index = self.check_channel_id(channel)?;
        match self.channels[index].receive_buffer.read(buffer) {
            Ok(size) => Ok(size),
            Err(RastaError::NoMessageReceived) => Err(RastaError::NoMessageReceived),
            Err(code) => Err(self.platform.fail(code)),
        }
    }

    pub fn receive_buffer_free_entries(&self, channel: RedChannelId) -> RastaResult<usize> {
        let index = self.check_channel_id(channel)?;
        Ok(self.channels[index].receive_buffer.free_entries())
    }

    pub fn defer_queue_used_entries(&self, channel: RedChannelId) -> RastaResult<usize> {
        let index = self.check_channel_id(channel)?;
        Ok(self.channels[index].defer_queue.used_entries())
    }

    /// True when the channel's defer queue holds an entry past its timeout.
    pub fn is_defer_queue_timeout(&self, channel: RedChannelId) -> RastaResult<bool> {
        let index = self.check_channel_id(channel)?;
        Ok(self.channels[index]
            .defer_queue
            .is_timeout(self.platform.get_timer_value()))
    }

    /// Number of configured redundancy channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of transport channels multiplexed under a redundancy channel.
    pub fn transport_channel_count(&self, channel: RedChannelId) -> RastaResult<usize> {
        let index = self.check_channel_id(channel)?;
        Ok(self.config.redundancy_channels[index]
            .transport_channel_ids
            .len())
    }

    /// Transport channel id at `position` in configured order.
    pub fn transport_channel_at(
        &self,
        channel: RedChannelId,
        position: usize,
    ) -> RastaResult<TransportChannelId> {
        let index = self.check_channel_id(channel)?;
        let transports = &self.config.redundancy_channels[index].transport_channel_ids;
        match transports.get(position) {
            Some(&id) => Ok(id),
            None => Err(self.platform.fail(RastaError::InvalidParameter)),
        }
    }

    fn check_channel_id(&self, channel: RedChannelId) -> RastaResult<usize> {
        let index = channel as usize;
        match index < self.channels.len() {
            true => Ok(index),
            false => Err(self.platform.fail(RastaError::InvalidParameter)),
        }
    }

    fn check_transport(
        &self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
    ) -> RastaResult<(usize, usize)> {
        let index = self.check_channel_id(channel)?;
        let transport_index = self.config.redundancy_channels[index]
            .transport_channel_ids
            .iter()
            .position(|&id| id == transport_channel);

        match transport_index {
            Some(transport_index) => Ok((index, transport_index)),
            None => Err(self.platform.fail(RastaError::InvalidParameter)),
        }
    }

    /// Moves deferred messages to the receive buffer for as long as they are
    /// contiguous with `seq_rx`.
    fn drain_defer_queue(&mut self, index: usize) -> RastaResult<()> {
        loop {
            let seq_rx = self.channels[index].seq_rx;
            if !self.channels[index].defer_queue.contains(seq_rx) {
                return Ok(());
            }

            let message = match self.channels[index].defer_queue.take(seq_rx) {
                Ok(message) => message,
                Err(code) => return Err(self.platform.fail(code)),
            };

            let payload = match self.codec.payload(&message) {
                Ok(payload) => payload,
                Err(code) => return Err(self.platform.fail(code)),
            };

            self.push_to_receive_buffer(index, payload)?;
            self.channels[index].seq_rx = seq_rx.wrapping_add(1);
        }
    }

    fn push_to_receive_buffer(&mut self, index: usize, payload: &[u8]) -> RastaResult<()> {
        match self.channels[index].receive_buffer.add(payload) {
            Ok(()) => {
                self.notifications
                    .message_received_notification(index as RedChannelId);
                Ok(())
            }
            Err(code) => Err(self.platform.fail(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MockPlatform, MockTransport, NotificationsHandle, PlatformHandle, SharedNotifications,
        TransportHandle,
    };
    use rasta_common::config::RedundancyChannelConfig;
    use rasta_common::crc::CheckCodeType;
    use rasta_common::logging;
    use rasta_common::N_SEND_MAX;

    type TestCore = RedCore<MockTransport, MockPlatform, SharedNotifications>;

    fn config(n_defer_queue_size: u32) -> RedundancyConfig {
        RedundancyConfig {
            check_code_type: CheckCodeType::A,
            t_seq: 50,
            n_diagnosis: 10,
            n_defer_queue_size,
            redundancy_channels: vec![RedundancyChannelConfig {
                red_channel_id: 0,
                transport_channel_ids: vec![0, 1],
            }],
        }
    }

    fn core(
        config: RedundancyConfig,
    ) -> (TestCore, TransportHandle, PlatformHandle, NotificationsHandle) {
        let (transport, transport_handle) = MockTransport::new();
        let (platform, platform_handle) = MockPlatform::new();
        let (notifications, notifications_handle) = SharedNotifications::new();

        let core = RedCore::new(
            config,
            transport,
            platform,
            notifications,
            &logging::test(),
        )
        .unwrap();

        (core, transport_handle, platform_handle, notifications_handle)
    }

    fn frame(sequence_number: u32, tag: u8) -> Vec<u8> {
        let codec = RedMessageCodec::new(CheckCodeType::A);
        codec
            .create_message(sequence_number, &[tag; 28])
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    fn deliver(core: &mut TestCore, transport_channel: u32, frame: &[u8]) {
        core.write_received_message_to_input_buffer(0, transport_channel, frame)
            .unwrap();
        core.process_received_message(0).unwrap();
    }

    fn read_payload(core: &mut TestCore) -> Vec<u8> {
        let mut buffer = [0u8; RED_PAYLOAD_SIZE_MAX];
        let size = core.read_from_receive_buffer(0, &mut buffer).unwrap();
        buffer[..size].to_vec()
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        let (transport, _) = MockTransport::new();
        let (platform, _) = MockPlatform::new();
        let (notifications, _) = SharedNotifications::new();

        let mut bad = config(4);
        bad.t_seq = 5000;

        let result = RedCore::new(bad, transport, platform, notifications, &logging::test());
        assert_eq!(result.err().unwrap(), RastaError::InvalidConfiguration);
    }

    #[test]
    fn test_in_order_reception() {
        let (mut core, _, _, notifications) = core(config(4));
        core.init_channel_data(0).unwrap();

        for sequence in 0u32..4 {
            deliver(&mut core, 0, &frame(sequence, sequence as u8));
        }

        assert_eq!(notifications.received().len(), 4);
        for sequence in 0u32..4 {
            assert_eq!(read_payload(&mut core), vec![sequence as u8; 28]);
        }

        // seq_rx advanced past the last delivery: the next in-order message
        // is sequence 4.
        deliver(&mut core, 0, &frame(4, 0xEE));
        assert_eq!(read_payload(&mut core), vec![0xEE; 28]);
    }

    #[test]
    fn test_duplicate_across_transport_channels() {
        let (mut core, _, _, notifications) = core(config(4));
        core.init_channel_data(0).unwrap();

        for sequence in 0u32..5 {
            deliver(&mut core, 0, &frame(sequence, sequence as u8));
        }

        deliver(&mut core, 0, &frame(5, 0x55));
        deliver(&mut core, 1, &frame(5, 0x55));

        assert_eq!(notifications.received().len(), 6);

        for _ in 0..6 {
            read_payload(&mut core);
        }
        let mut buffer = [0u8; RED_PAYLOAD_SIZE_MAX];
        assert_eq!(
            core.read_from_receive_buffer(0, &mut buffer),
            Err(RastaError::NoMessageReceived)
        );
    }

    #[test]
    fn test_reordering_through_defer_queue() {
        let (mut core, _, _, notifications) = core(config(4));
        core.init_channel_data(0).unwrap();

        deliver(&mut core, 0, &frame(0, 0));
        deliver(&mut core, 0, &frame(2, 2));
        deliver(&mut core, 0, &frame(3, 3));

        // Sequences 2 and 3 are parked.
        assert_eq!(core.defer_queue_used_entries(0).unwrap(), 2);
        assert_eq!(notifications.received().len(), 1);

        deliver(&mut core, 0, &frame(1, 1));

        assert_eq!(core.defer_queue_used_entries(0).unwrap(), 0);
        assert_eq!(notifications.received().len(), 4);
        for sequence in 0u32..4 {
            assert_eq!(read_payload(&mut core), vec![sequence as u8; 28]);
        }
    }

    #[test]
    fn test_window_filter_drops_without_diagnostics() {
        let (mut core, _, _, notifications) = core(config(4));
        core.init_channel_data(0).unwrap();

        deliver(&mut core, 0, &frame(0, 0));
        deliver(&mut core, 0, &frame(1, 1));
        assert_eq!(notifications.received().len(), 2);

        // seq_rx is 2; the window covers up to 2 + 40. One past it is gone.
        deliver(&mut core, 0, &frame(2 + 40 + 1, 0xAA));

        assert_eq!(core.defer_queue_used_entries(0).unwrap(), 0);
        assert_eq!(notifications.received().len(), 2);

        // The edge of the window itself is still deferred.
        deliver(&mut core, 0, &frame(2 + 40, 0xBB));
        assert_eq!(core.defer_queue_used_entries(0).unwrap(), 1);
    }

    #[test]
    fn test_stale_message_dropped() {
        let (mut core, _, _, notifications) = core(config(4));
        core.init_channel_data(0).unwrap();

        for sequence in 0u32..3 {
            deliver(&mut core, 0, &frame(sequence, sequence as u8));
        }
        assert_eq!(notifications.received().len(), 3);

        // Replay of an already delivered sequence.
        deliver(&mut core, 1, &frame(1, 1));

        assert_eq!(notifications.received().len(), 3);
        assert_eq!(core.defer_queue_used_entries(0).unwrap(), 0);
    }

    #[test]
    fn test_corrupted_message_dropped_silently() {
        let mut config = config(4);
        config.check_code_type = CheckCodeType::B;
        let (mut core, _, _, notifications) = core(config);
        core.init_channel_data(0).unwrap();

        let codec = RedMessageCodec::new(CheckCodeType::B);
        let good = codec.create_message(0, &[9u8; 28]).unwrap();
        let mut corrupted = good.as_bytes().to_vec();
        corrupted[10] ^= 0x80;

        deliver(&mut core, 0, &corrupted);

        assert!(notifications.received().is_empty());
        assert_eq!(core.defer_queue_used_entries(0).unwrap(), 0);

        // The intact original is still accepted afterwards.
        deliver(&mut core, 0, good.as_bytes());
        assert_eq!(notifications.received().len(), 1);
    }

    #[test]
    fn test_defer_timeout_skips_gap() {
        let (mut core, _, platform, notifications) = core(config(4));
        core.init_channel_data(0).unwrap();

        platform.set_time(0);
        deliver(&mut core, 0, &frame(0, 0));
        deliver(&mut core, 0, &frame(2, 2));

        assert_eq!(notifications.received().len(), 1);

        platform.set_time(50);
        assert!(core.is_defer_queue_timeout(0).unwrap());
        core.defer_queue_timeout(0).unwrap();

        assert_eq!(notifications.received().len(), 2);
        read_payload(&mut core);
        assert_eq!(read_payload(&mut core), vec![2; 28]);

        // The skipped sequence 1 is gone for good; 3 is next.
        deliver(&mut core, 0, &frame(3, 3));
        assert_eq!(notifications.received().len(), 3);
    }

    #[test]
    fn test_process_without_buffered_message() {
        let (mut core, _, _, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        assert_eq!(
            core.process_received_message(0),
            Err(RastaError::NoMessageReceived)
        );
    }

    #[test]
    fn test_send_mirrors_to_all_transport_channels() {
        let (mut core, transport, _, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        core.write_message_payload_to_send_buffer(0, &[0x42; 30])
            .unwrap();
        core.send_message(0).unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, 0);
        assert_eq!(sent[1].0, 1);
        assert_eq!(sent[0].1, sent[1].1);

        let codec = RedMessageCodec::new(CheckCodeType::A);
        let message = RedMessage::from_bytes(&sent[0].1).unwrap();
        assert_eq!(codec.sequence_number(&message).unwrap(), 0);
        assert_eq!(codec.payload(&message).unwrap(), &[0x42; 30][..]);
    }

    #[test]
    fn test_send_sequence_advances_and_wraps() {
        let (mut core, transport, _, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        // Wind the transmit counter to the wrap boundary.
        core.channels[0].seq_tx = u32::max_value();

        core.write_message_payload_to_send_buffer(0, &[1; 28]).unwrap();
        core.send_message(0).unwrap();
        core.write_message_payload_to_send_buffer(0, &[2; 28]).unwrap();
        core.send_message(0).unwrap();

        let codec = RedMessageCodec::new(CheckCodeType::A);
        let sent = transport.sent();
        let first = RedMessage::from_bytes(&sent[0].1).unwrap();
        let second = RedMessage::from_bytes(&sent[2].1).unwrap();
        assert_eq!(codec.sequence_number(&first).unwrap(), u32::max_value());
        assert_eq!(codec.sequence_number(&second).unwrap(), 0);
    }

    #[test]
    fn test_send_without_payload() {
        let (mut core, _, _, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        assert_eq!(core.send_message(0), Err(RastaError::NoMessageToSend));
    }

    #[test]
    fn test_send_buffer_occupancy_is_fatal() {
        let (mut core, _, platform, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        core.write_message_payload_to_send_buffer(0, &[1; 28]).unwrap();
        let result = core.write_message_payload_to_send_buffer(0, &[2; 28]);

        assert_eq!(result, Err(RastaError::SendBufferFull));
        assert_eq!(platform.fatal_codes(), vec![RastaError::SendBufferFull]);

        // Clearing the slot flag makes the channel usable again.
        core.clear_send_buffer_message_flag(0).unwrap();
        core.write_message_payload_to_send_buffer(0, &[3; 28]).unwrap();
    }

    #[test]
    fn test_pending_flags() {
        let (mut core, _, _, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        assert!(!core.get_message_pending_flag(0, 1).unwrap());
        core.set_message_pending_flag(0, 1).unwrap();
        assert!(core.get_message_pending_flag(0, 1).unwrap());
        assert!(!core.get_message_pending_flag(0, 0).unwrap());
        core.clear_message_pending_flag(0, 1).unwrap();
        assert!(!core.get_message_pending_flag(0, 1).unwrap());
    }

    #[test]
    fn test_transport_channel_lookup() {
        let mut config = config(4);
        config.redundancy_channels.push(RedundancyChannelConfig {
            red_channel_id: 1,
            transport_channel_ids: vec![5],
        });
        let (core, _, platform, _) = core(config);

        assert_eq!(core.get_associated_redundancy_channel(0).unwrap(), 0);
        assert_eq!(core.get_associated_redundancy_channel(1).unwrap(), 0);
        assert_eq!(core.get_associated_redundancy_channel(5).unwrap(), 1);

        assert_eq!(
            core.get_associated_redundancy_channel(9),
            Err(RastaError::InvalidParameter)
        );
        assert_eq!(platform.fatal_codes(), vec![RastaError::InvalidParameter]);
    }

    #[test]
    fn test_foreign_transport_channel_is_fatal() {
        let (mut core, _, platform, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        let result = core.write_received_message_to_input_buffer(0, 7, &frame(0, 0));

        assert_eq!(result, Err(RastaError::InvalidParameter));
        assert_eq!(platform.fatal_codes(), vec![RastaError::InvalidParameter]);
    }

    #[test]
    fn test_invalid_frame_size_is_fatal() {
        let (mut core, _, platform, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        let result = core.write_received_message_to_input_buffer(0, 0, &[0u8; 10]);

        assert_eq!(result, Err(RastaError::InvalidParameter));
        assert_eq!(platform.fatal_codes(), vec![RastaError::InvalidParameter]);
    }

    #[test]
    fn test_init_channel_data_resets_everything() {
        let (mut core, _, _, notifications) = core(config(4));
        core.init_channel_data(0).unwrap();

        deliver(&mut core, 0, &frame(0, 1));
        deliver(&mut core, 0, &frame(2, 2));
        core.set_message_pending_flag(0, 1).unwrap();
        core.write_message_payload_to_send_buffer(0, &[5; 28]).unwrap();

        core.init_channel_data(0).unwrap();

        assert!(!core.get_message_pending_flag(0, 1).unwrap());
        assert_eq!(core.defer_queue_used_entries(0).unwrap(), 0);
        assert_eq!(core.receive_buffer_free_entries(0).unwrap(), N_SEND_MAX);

        // Sequencing restarts at zero in both directions.
        deliver(&mut core, 0, &frame(0, 9));
        assert_eq!(read_payload(&mut core), vec![9; 28]);

        core.write_message_payload_to_send_buffer(0, &[6; 28]).unwrap();
        core.send_message(0).unwrap();
        assert_eq!(notifications.received().len(), 2);
    }

    #[test]
    fn test_unprocessed_input_buffer_is_overwritten() {
        let (mut core, _, _, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        core.write_received_message_to_input_buffer(0, 0, &frame(0, 0xA1))
            .unwrap();
        core.write_received_message_to_input_buffer(0, 1, &frame(0, 0xB2))
            .unwrap();
        core.process_received_message(0).unwrap();

        // Only the later frame was processed.
        assert_eq!(read_payload(&mut core), vec![0xB2; 28]);
        assert_eq!(
            core.process_received_message(0),
            Err(RastaError::NoMessageReceived)
        );
    }

    #[test]
    fn test_receive_buffer_overrun_is_fatal() {
        let (mut core, _, platform, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        for sequence in 0..N_SEND_MAX as u32 {
            deliver(&mut core, 0, &frame(sequence, 0));
        }

        core.write_received_message_to_input_buffer(0, 0, &frame(N_SEND_MAX as u32, 0))
            .unwrap();
        let result = core.process_received_message(0);

        assert_eq!(result, Err(RastaError::ReceiveBufferFull));
        assert_eq!(platform.fatal_codes(), vec![RastaError::ReceiveBufferFull]);
    }

    #[test]
    fn test_defer_queue_eviction_through_core() {
        let (mut core, _, _, _) = core(config(4));
        core.init_channel_data(0).unwrap();

        // Five future messages into a queue of four: the oldest one goes.
        for sequence in [5u32, 6, 7, 8, 9].iter() {
            deliver(&mut core, 0, &frame(*sequence, *sequence as u8));
        }

        assert_eq!(core.defer_queue_used_entries(0).unwrap(), 4);
        assert!(!core.channels[0].defer_queue.contains(5));
        assert!(core.channels[0].defer_queue.contains(9));
    }

    #[test]
    fn test_diagnostics_published_through_core() {
        let (mut core, _, _, notifications) = core(config(4));
        core.init_channel_data(0).unwrap();

        // n_diagnosis is 10; one window of in-order messages, one of them
        // duplicated over the second transport channel.
        for sequence in 0u32..10 {
            deliver(&mut core, 0, &frame(sequence, 0));
            if sequence == 4 {
                deliver(&mut core, 1, &frame(4, 0));
            }
        }

        let published = notifications.diagnostics();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].2.n_missed, 0);
        assert_eq!(published[1].2.n_missed, 9);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut config = config(4);
        config.redundancy_channels.push(RedundancyChannelConfig {
            red_channel_id: 1,
            transport_channel_ids: vec![2, 3],
        });
        let (mut core, transport, _, notifications) = core(config);
        core.init_channel_data(0).unwrap();
        core.init_channel_data(1).unwrap();

        core.write_received_message_to_input_buffer(1, 2, &frame(0, 0x99))
            .unwrap();
        core.process_received_message(1).unwrap();

        assert_eq!(notifications.received(), vec![1]);
        assert_eq!(core.channels[0].seq_rx, 0);
        assert_eq!(core.channels[1].seq_rx, 1);

        // Sending on channel 1 reaches only its own transport channels.
        core.write_message_payload_to_send_buffer(1, &[1; 28]).unwrap();
        core.send_message(1).unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, 2);
        assert_eq!(sent[1].0, 3);
    }

    #[test]
    fn test_defer_queue_admission_with_wrapping_sequence() {
        let (mut core, _, _, notifications) = core(config(4));
        core.init_channel_data(0).unwrap();

        core.channels[0].seq_rx = u32::max_value();

        // Sequence 0 is one ahead of u32::MAX and must be deferred, then
        // delivered once the wrap boundary message arrives.
        deliver(&mut core, 0, &frame(0, 0xB0));
        assert_eq!(core.defer_queue_used_entries(0).unwrap(), 1);

        deliver(&mut core, 0, &frame(u32::max_value(), 0xA0));

        assert_eq!(notifications.received().len(), 2);
        assert_eq!(read_payload(&mut core), vec![0xA0; 28]);
        assert_eq!(read_payload(&mut core), vec![0xB0; 28]);
        assert_eq!(core.channels[0].seq_rx, 1);
    }
}
