//! Per connection core of the safety layer.
//!
//! Every connection couples its lifecycle state machine with the sequence
//! bookkeeping, the send buffer and a FIFO of delivered application payloads.
//! Incoming PDUs are authenticated by their safety code before anything else
//! looks at them; corrupted frames vanish without a trace.

use crate::message::{SrMessage, SrMessageCodec, SrMessageHeader, SrMessageType};
use crate::send_buffer::SendBuffer;
use crate::state_machine::{SrAction, SrEvent, SrState, SrStateMachine};
use crate::{LowerLayer, SrNotifications};
use rasta_common::config::{ConnectionConfig, SafetyConfig};
use rasta_common::logging;
use rasta_common::platform::Platform;
use rasta_common::seq;
use rasta_common::shared::{RastaError, RastaResult};
use rasta_common::{
    ConnectionId, RedChannelId, N_SEND_MAX, SR_MESSAGE_SIZE_MAX, SR_PAYLOAD_SIZE_MAX,
    SR_PAYLOAD_SIZE_MIN,
};

struct ReceivedSlot {
    used: bool,
    size: usize,
    payload: [u8; SR_PAYLOAD_SIZE_MAX],
}

/// FIFO of application payloads delivered in order, awaiting the application.
struct ReceivedFifo {
    slots: Vec<ReceivedSlot>,
    read_index: usize,
    write_index: usize,
    used: usize,
}

impl ReceivedFifo {
    fn new() -> ReceivedFifo {
        let slots = (0..N_SEND_MAX)
            .map(|_| ReceivedSlot {
                used: false,
                size: 0,
                payload: [0; SR_PAYLOAD_SIZE_MAX],
            })
            .collect();

        ReceivedFifo {
            slots,
            read_index: 0,
            write_index: 0,
            used: 0,
        }
    }

    fn push(&mut self, payload: &[u8]) -> RastaResult<()> {
        if self.used == self.slots.len() {
            return Err(RastaError::ReceiveBufferFull);
        }

        let slot = &mut self.slots[self.write_index];
        slot.used = true;
        slot.size = payload.len();
        slot.payload[..payload.len()].copy_from_slice(payload);

        self.write_index = (self.write_index + 1) % self.slots.len();
        self.used += 1;
        Ok(())
    }

    fn pop(&mut self, buffer: &mut [u8]) -> RastaResult<usize> {
        if self.used == 0 {
            return Err(RastaError::NoMessageReceived);
        }

        let slot = &mut self.slots[self.read_index];
        if buffer.len() < slot.size {
            return Err(RastaError::InvalidBufferSize);
        }

        buffer[..slot.size].copy_from_slice(&slot.payload[..slot.size]);
        slot.used = false;
        let size = slot.size;

        self.read_index = (self.read_index + 1) % self.slots.len();
        self.used -= 1;
        Ok(size)
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.used = false;
        }
        self.read_index = 0;
        self.write_index = 0;
        self.used = 0;
    }
}

struct ConnectionData {
    config: ConnectionConfig,
    machine: SrStateMachine,
    seq_tx: u32,
    seq_rx: u32,
    last_peer_timestamp: u32,
    last_ingress_ms: u32,
    last_egress_ms: u32,
    send_buffer: SendBuffer,
    received: ReceivedFifo,
}

pub struct SrCore<L, P, N> {
    t_h: u32,
    t_max: u32,
    codec: SrMessageCodec,
    connections: Vec<ConnectionData>,
    lower: L,
    platform: P,
    notifications: N,
    log: logging::Logger,
}

impl<L: LowerLayer, P: Platform, N: SrNotifications> SrCore<L, P, N> {
    /// Builds the core from a validated configuration. Connection `i` rides
    /// on redundancy channel `i`.
    pub fn new(
        config: SafetyConfig,
        lower: L,
        platform: P,
        notifications: N,
        log: &logging::Logger,
    ) -> RastaResult<SrCore<L, P, N>> {
        if !config.is_valid() {
            return Err(RastaError::InvalidConfiguration);
        }

        let connection_log = log.new(logging::o!());
        let connections = config
            .connections
            .iter()
            .map(|connection| ConnectionData {
                config: connection.clone(),
                machine: SrStateMachine::new(&connection_log),
                seq_tx: 0,
                seq_rx: 0,
                last_peer_timestamp: 0,
                last_ingress_ms: 0,
                last_egress_ms: 0,
                send_buffer: SendBuffer::new(&connection_log),
                received: ReceivedFifo::new(),
            })
            .collect();

        let codec = SrMessageCodec::new(config.safety_code_type, config.md4_initial_value);

        Ok(SrCore {
            t_h: config.t_h,
            t_max: config.t_max,
            codec,
            connections,
            lower,
            platform,
            notifications,
            log: log.new(logging::o!()),
        })
    }

    /// Actively opens a connection: resets its state, draws a fresh initial
    /// sequence number and sends the connection request.
    pub fn open_connection(&mut self, connection: ConnectionId) -> RastaResult<()> {
        let index = self.check_connection_id(connection)?;

        self.reset_connection(index);
        self.connections[index].seq_tx = self.platform.get_random_number();

        let action = self.connections[index].machine.process_event(SrEvent::Open);
        if action == Some(SrAction::SendConnReq) {
            self.enqueue_message(index, SrMessageType::ConnReq, &[])?;
        }
        self.notify_state(index);
        self.pump_send(index)
    }

    /// Closes a connection, notifying the peer.
    pub fn close_connection(&mut self, connection: ConnectionId) -> RastaResult<()> {
        let index = self.check_connection_id(connection)?;

        let action = self.connections[index].machine.process_event(SrEvent::Close);
        if action == Some(SrAction::SendDiscReq) {
            self.enqueue_message(index, SrMessageType::DiscReq, &[])?;
            self.notify_state(index);
            self.pump_send(index)?;
        }
        self.connections[index].send_buffer.clear();
        Ok(())
    }

    /// Current lifecycle state of a connection.
    pub fn connection_state(&self, connection: ConnectionId) -> RastaResult<SrState> {
        let index = self.check_connection_id(connection)?;
        Ok(self.connections[index].machine.state())
    }

    /// Queues one application payload for authenticated, confirmed delivery.
    /// The connection must be up; `SendBufferFull` reports backpressure.
    pub fn send_data(&mut self, connection: ConnectionId, payload: &[u8]) -> RastaResult<()> {
        let index = self.check_connection_id(connection)?;

        if payload.len() < SR_PAYLOAD_SIZE_MIN || payload.len() > SR_PAYLOAD_SIZE_MAX {
            return Err(self.platform.fail(RastaError::InvalidParameter));
        }

        if self.connections[index].machine.state() != SrState::Up {
            return Err(self.platform.fail(RastaError::InvalidParameter));
        }

        if self.connections[index].send_buffer.get_free_buffer_entries() == 0 {
            return Err(RastaError::SendBufferFull);
        }

        self.enqueue_message(index, SrMessageType::Data, payload)?;
        self.pump_send(index)
    }

    /// Copies the oldest delivered payload into the caller's buffer.
    pub fn read_data(&mut self, connection: ConnectionId, buffer: &mut [u8]) -> RastaResult<usize> {
        let index = self.check_connection_id(connection)?;
        match self.connections[index].received.pop(buffer) {
            Ok(size) => Ok(size),
            Err(RastaError::NoMessageReceived) => Err(RastaError::NoMessageReceived),
            Err(code) => Err(self.platform.fail(code)),
        }
    }

    /// Periodic pump: ingests everything the redundancy layer delivered,
    /// supervises the peer with `t_max`, paces heartbeats with `t_h` and
    /// drains the send buffers.
    pub fn check_timings(&mut self) -> RastaResult<()> {
        for index in 0..self.connections.len() {
            let channel = index as RedChannelId;

            loop {
                let mut frame = [0u8; SR_MESSAGE_SIZE_MAX];
                match self.lower.read_message(channel, &mut frame) {
                    Ok(size) => self.process_received(index, &frame[..size])?,
                    Err(RastaError::NoMessageReceived) => break,
                    Err(code) => return Err(code),
                }
            }

            let now = self.platform.get_timer_value();

            let state = self.connections[index].machine.state();
            if state != SrState::Closed
                && now.wrapping_sub(self.connections[index].last_ingress_ms) >= self.t_max
            {
                logging::warn!(self.log, "peer supervision expired";
                               "connection" => index as u32, "t_max" => self.t_max);
                let action = self.connections[index].machine.process_event(SrEvent::TimeoutTmax);
                if action == Some(SrAction::SendDiscReq) {
                    self.enqueue_message(index, SrMessageType::DiscReq, &[])?;
                }
                self.notify_state(index);
            }

            let state = self.connections[index].machine.state();
            if state != SrState::Closed
                && state != SrState::Start
                && now.wrapping_sub(self.connections[index].last_egress_ms) >= self.t_h
            {
                let action = self.connections[index].machine.process_event(SrEvent::HeartbeatDue);
                if action == Some(SrAction::SendHeartbeat) {
                    self.enqueue_message(index, SrMessageType::Heartbeat, &[])?;
                }
            }

            self.pump_send(index)?;
        }
        Ok(())
    }

    fn process_received(&mut self, index: usize, frame: &[u8]) -> RastaResult<()> {
        let message = match SrMessage::from_bytes(frame) {
            Ok(message) => message,
            Err(_) => {
                logging::debug!(self.log, "undersized or oversized frame dropped";
                                "connection" => index as u32, "size" => frame.len());
                return Ok(());
            }
        };

        if self.codec.check_safety_code(&message).is_err() {
            logging::debug!(self.log, "safety code mismatch, message dropped";
                            "connection" => index as u32);
            return Ok(());
        }

        let message_type = match self.codec.message_type(&message) {
            Ok(message_type) => message_type,
            Err(_) => return Ok(()),
        };
        let header = match self.codec.header(&message) {
            Ok(header) => header,
            Err(_) => return Ok(()),
        };

        // The peer mirrors our configured addressing.
        {
            let config = &self.connections[index].config;
            if header.sender_id != config.receiver_id || header.receiver_id != config.sender_id {
                logging::debug!(self.log, "addressing mismatch, message dropped";
                                "connection" => index as u32,
                                "sender" => header.sender_id,
                                "receiver" => header.receiver_id);
                return Ok(());
            }
        }

        let now = self.platform.get_timer_value();
        {
            let connection = &mut self.connections[index];
            connection.last_ingress_ms = now;
            connection.last_peer_timestamp = header.timestamp;
        }

        // Everything but the initial connection request confirms part of our
        // own send buffer.
        if message_type != SrMessageType::ConnReq {
            self.connections[index]
                .send_buffer
                .remove_from_buffer(header.confirmed_sequence_number);
        }

        match message_type {
            SrMessageType::ConnReq => {
                let action = self.connections[index].machine.process_event(SrEvent::ConnReqReceived);
                if action == Some(SrAction::SendConnResp) {
                    self.connections[index].seq_rx = header.sequence_number.wrapping_add(1);
                    self.enqueue_message(index, SrMessageType::ConnResp, &[])?;
                    self.notify_state(index);
                }
                Ok(())
            }
            SrMessageType::ConnResp => {
                let action = self.connections[index].machine.process_event(SrEvent::ConnRespReceived);
                if action == Some(SrAction::SendHeartbeat) {
                    self.connections[index].seq_rx = header.sequence_number.wrapping_add(1);
                    self.enqueue_message(index, SrMessageType::Heartbeat, &[])?;
                    self.notify_state(index);
                }
                Ok(())
            }
            SrMessageType::DiscReq => {
                let before = self.connections[index].machine.state();
                self.connections[index].machine.process_event(SrEvent::DiscReqReceived);
                if before != SrState::Closed {
                    self.connections[index].send_buffer.clear();
                    self.notify_state(index);
                }
                Ok(())
            }
            SrMessageType::RetrResp => {
                let action = self.connections[index].machine.process_event(SrEvent::RetrRespReceived);
                if action == Some(SrAction::AdoptRetrNumbering) {
                    // The response announces the renumbered replay stream.
                    self.connections[index].seq_rx = header.sequence_number.wrapping_add(1);
                    self.notify_state(index);
                }
                Ok(())
            }
            SrMessageType::RetrReq => {
                let action = self.connections[index].machine.process_event(SrEvent::RetrReqReceived);
                if action == Some(SrAction::RunRetransmission) {
                    if header.sequence_number == self.connections[index].seq_rx {
                        self.connections[index].seq_rx =
                            header.sequence_number.wrapping_add(1);
                    }
                    self.run_retransmission(index, header.confirmed_sequence_number)?;
                }
                Ok(())
            }
            SrMessageType::Heartbeat | SrMessageType::Data | SrMessageType::RetrData => {
                self.process_sequenced(index, message_type, &message, &header)
            }
        }
    }

    /// Sequence bookkeeping for the message types that ride the regular
    /// numbering: heartbeats, data and retransmitted data.
    fn process_sequenced(
        &mut self,
        index: usize,
        message_type: SrMessageType,
        message: &SrMessage,
        header: &SrMessageHeader,
    ) -> RastaResult<()> {
        let state = self.connections[index].machine.state();
        if state != SrState::Up && state != SrState::RetrRun {
            return Ok(());
        }

        let expected = self.connections[index].seq_rx;

        if header.sequence_number == expected {
            self.connections[index].seq_rx = expected.wrapping_add(1);

            let event = match message_type {
                SrMessageType::Data => SrEvent::DataReceived,
                SrMessageType::RetrData => SrEvent::RetrDataReceived,
                _ => SrEvent::HeartbeatReceived,
            };
            let action = self.connections[index].machine.process_event(event);

            if action == Some(SrAction::DeliverData) {
                let payload = match self.codec.payload(message) {
                    Ok(payload) => payload,
                    Err(code) => return Err(self.platform.fail(code)),
                };
                match self.connections[index].received.push(payload) {
                    Ok(()) => self
                        .notifications
                        .message_received_notification(index as ConnectionId),
                    Err(code) => return Err(self.platform.fail(code)),
                }
            }

            if self.connections[index].machine.state() != state {
                self.notify_state(index);
            }
            Ok(())
        } else if seq::is_older(expected, header.sequence_number) {
            if state == SrState::Up {
                logging::debug!(self.log, "sequence gap detected";
                                "connection" => index as u32,
                                "expected" => expected,
                                "received" => header.sequence_number);
                let action = self.connections[index].machine.process_event(SrEvent::SequenceGap);
                if action == Some(SrAction::SendRetrReq) {
                    self.enqueue_message(index, SrMessageType::RetrReq, &[])?;
                    self.notify_state(index);
                }
            }
            Ok(())
        } else {
            logging::trace!(self.log, "stale message dropped";
                            "connection" => index as u32,
                            "sequence" => header.sequence_number);
            Ok(())
        }
    }

    /// Rebuilds the send buffer as a replay plan in response to a peer
    /// retransmission request. A request we cannot serve tears the
    /// connection down.
    fn run_retransmission(&mut self, index: usize, peer_confirmed: u32) -> RastaResult<()> {
        let now = self.platform.get_timer_value();
        let template = {
            let connection = &self.connections[index];
            SrMessageHeader {
                receiver_id: connection.config.receiver_id,
                sender_id: connection.config.sender_id,
                sequence_number: connection.seq_tx,
                confirmed_sequence_number: connection.seq_rx.wrapping_sub(1),
                timestamp: now,
                confirmed_timestamp: connection.last_peer_timestamp,
            }
        };

        let result = self.connections[index].send_buffer.prepare_buffer_for_retr(
            &self.codec,
            peer_confirmed,
            &template,
        );

        match result {
            Ok(next_sequence_number) => {
                self.connections[index].seq_tx = next_sequence_number;
                Ok(())
            }
            Err(RastaError::InvalidSequenceNumber) => {
                logging::warn!(self.log, "unserviceable retransmission request, disconnecting";
                               "connection" => index as u32,
                               "peer_confirmed" => peer_confirmed);
                let action = self.connections[index].machine.process_event(SrEvent::Close);
                if action == Some(SrAction::SendDiscReq) {
                    self.enqueue_message(index, SrMessageType::DiscReq, &[])?;
                }
                self.notify_state(index);
                Ok(())
            }
            Err(code) => Err(self.platform.fail(code)),
        }
    }

    /// Frames one PDU with the connection's current header state and buffers
    /// it for transmission.
    fn enqueue_message(
        &mut self,
        index: usize,
        message_type: SrMessageType,
        payload: &[u8],
    ) -> RastaResult<()> {
        let now = self.platform.get_timer_value();
        let header = {
            let connection = &self.connections[index];
            SrMessageHeader {
                receiver_id: connection.config.receiver_id,
                sender_id: connection.config.sender_id,
                sequence_number: connection.seq_tx,
                confirmed_sequence_number: connection.seq_rx.wrapping_sub(1),
                timestamp: now,
                confirmed_timestamp: connection.last_peer_timestamp,
            }
        };

        let message = match self.codec.create_message(message_type, &header, payload) {
            Ok(message) => message,
            Err(code) => return Err(self.platform.fail(code)),
        };

        match self.connections[index]
            .send_buffer
            .add_to_buffer(&self.codec, &message)
        {
            Ok(()) => {
                self.connections[index].seq_tx =
                    self.connections[index].seq_tx.wrapping_add(1);
                Ok(())
            }
            Err(code) => Err(self.platform.fail(code)),
        }
    }

    /// Hands every not yet transmitted buffered message down to the
    /// redundancy layer.
    fn pump_send(&mut self, index: usize) -> RastaResult<()> {
        loop {
            let message = match self.connections[index].send_buffer.read_message_to_send() {
                Ok(message) => message,
                Err(_) => return Ok(()),
            };

            let channel = index as RedChannelId;
            self.lower.send_message_payload(channel, message.as_bytes())?;
            self.connections[index].last_egress_ms = self.platform.get_timer_value();
        }
    }

    fn notify_state(&mut self, index: usize) {
        let state = self.connections[index].machine.state();
        self.notifications
            .connection_state_notification(index as ConnectionId, state);
    }

    fn reset_connection(&mut self, index: usize) {
        let connection = &mut self.connections[index];
        let now = self.platform.get_timer_value();
        connection.machine.reset();
        connection.seq_tx = 0;
        connection.seq_rx = 0;
        connection.last_peer_timestamp = 0;
        connection.last_ingress_ms = now;
        connection.last_egress_ms = now;
        connection.send_buffer.clear();
        connection.received.clear();
    }

    /// Access to the layer below, so the embedding application can drive its
    /// timing pump.
    pub fn lower_mut(&mut self) -> &mut L {
        &mut self.lower
    }

    fn check_connection_id(&self, connection: ConnectionId) -> RastaResult<usize> {
        let index = connection as usize;
        match index < self.connections.len() {
            true => Ok(index),
            false => Err(self.platform.fail(RastaError::InvalidParameter)),
        }
    }
}
