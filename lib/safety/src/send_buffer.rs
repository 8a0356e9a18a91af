//! Per connection buffer of outgoing safety layer PDUs.
//!
//! Messages stay buffered after transmission until the peer confirms them, so
//! the connection can replay everything unconfirmed when a retransmission
//! request arrives. The buffer admits `N_SEND_MAX` messages; two spare slots
//! beyond that hold the retransmission response and the end of retransmission
//! heartbeat while a replay plan is in place.

use crate::message::{SrMessage, SrMessageCodec, SrMessageHeader, SrMessageType};
use rasta_common::logging;
use rasta_common::seq;
use rasta_common::shared::{RastaError, RastaResult};
use rasta_common::N_SEND_MAX;

const SLOT_COUNT: usize = N_SEND_MAX + 2;

struct Slot {
    used: bool,
    already_sent: bool,
    sequence_number: u32,
    message_type: SrMessageType,
    message: SrMessage,
}

pub struct SendBuffer {
    slots: Vec<Slot>,
    head: usize,
    count: usize,
    log: logging::Logger,
}

impl SendBuffer {
    pub fn new(log: &logging::Logger) -> SendBuffer {
        let slots = (0..SLOT_COUNT)
            .map(|_| Slot {
                used: false,
                already_sent: false,
                sequence_number: 0,
                message_type: SrMessageType::Heartbeat,
                message: SrMessage::empty(),
            })
            .collect();

        SendBuffer {
            slots,
            head: 0,
            count: 0,
            log: log.new(logging::o!()),
        }
    }

    /// Appends a message at the tail. Fails when the admission limit of
    /// `N_SEND_MAX` buffered messages is reached.
    pub fn add_to_buffer(
        &mut self,
        codec: &SrMessageCodec,
        message: &SrMessage,
    ) -> RastaResult<()> {
        if self.count >= N_SEND_MAX {
            return Err(RastaError::SendBufferFull);
        }

        let sequence_number = codec.sequence_number(message)?;
        let message_type = codec.message_type(message)?;

        let index = self.slot_index(self.count);
        let slot = &mut self.slots[index];
        slot.used = true;
        slot.already_sent = false;
        slot.sequence_number = sequence_number;
        slot.message_type = message_type;
        slot.message = message.clone();
        self.count += 1;

        Ok(())
    }

    /// Copies the first message that has not been handed to the layer below
    /// yet and marks it sent. The slot stays occupied until confirmation.
    pub fn read_message_to_send(&mut self) -> RastaResult<SrMessage> {
        for offset in 0..self.count {
            let index = self.slot_index(offset);
            let slot = &mut self.slots[index];
            if !slot.already_sent {
                slot.already_sent = true;
                return Ok(slot.message.clone());
            }
        }
        Err(RastaError::NoMessageToSend)
    }

    /// True when a message with the given sequence number is buffered.
    pub fn is_sequence_number_in_buffer(&self, sequence_number: u32) -> bool {
        (0..self.count).any(|offset| {
            self.slots[self.slot_index(offset)].sequence_number == sequence_number
        })
    }

    /// Drops every buffered message with a sequence number up to and
    /// including the confirmed one.
    pub fn remove_from_buffer(&mut self, confirmed_sequence_number: u32) {
        while self.count > 0 {
            let index = self.head;
            if !seq::is_older_or_equal(
                self.slots[index].sequence_number,
                confirmed_sequence_number,
            ) {
                break;
            }

            self.slots[index].used = false;
            self.head = (self.head + 1) % self.slots.len();
            self.count -= 1;
        }
    }

    /// Number of buffered messages.
    #[inline]
    pub fn get_used_buffer_entries(&self) -> usize {
        self.count
    }

    /// Remaining admission capacity.
    #[inline]
    pub fn get_free_buffer_entries(&self) -> usize {
        N_SEND_MAX.saturating_sub(self.count)
    }

    /// Number of buffered messages not yet handed to the layer below.
    pub fn get_number_of_messages_to_send(&self) -> usize {
        (0..self.count)
            .filter(|&offset| !self.slots[self.slot_index(offset)].already_sent)
            .count()
    }

    /// Rebuilds the buffer as a retransmission plan after the peer requested
    /// a replay from `last_confirmed_sequence_number`:
    ///
    /// 1. everything confirmed is dropped;
    /// 2. a retransmission response opens the plan;
    /// 3. sent data messages follow in order, converted to retransmitted
    ///    data; a sent heartbeat is kept in place and doubles as the end of
    ///    retransmission marker;
    /// 4. when no heartbeat was kept, one is emitted after the replayed data;
    /// 5. unsent data messages follow after the heartbeat, retransmission
    ///    requests go last;
    /// 6. the whole plan is renumbered from the template sequence number and
    ///    every safety code is refreshed.
    ///
    /// Returns the next free sequence number after the plan.
    pub fn prepare_buffer_for_retr(
        &mut self,
        codec: &SrMessageCodec,
        last_confirmed_sequence_number: u32,
        template: &SrMessageHeader,
    ) -> RastaResult<u32> {
        let mut oldest_sent: Option<u32> = None;
        let mut newest_sent: Option<u32> = None;
        for offset in 0..self.count {
            let slot = &self.slots[self.slot_index(offset)];
            if !slot.already_sent {
                continue;
            }
            if oldest_sent.is_none() {
                oldest_sent = Some(slot.sequence_number);
            }
            newest_sent = Some(slot.sequence_number);
        }

        let (oldest, newest) = match (oldest_sent, newest_sent) {
            (Some(oldest), Some(newest)) => (oldest, newest),
            _ => return Err(RastaError::InvalidSequenceNumber),
        };

        // The confirmation must refer to the sent section: at best everything
        // up to the newest sent message, at least everything before the
        // oldest one.
        if !seq::is_older_or_equal(oldest.wrapping_sub(1), last_confirmed_sequence_number)
            || !seq::is_older_or_equal(last_confirmed_sequence_number, newest)
        {
            return Err(RastaError::InvalidSequenceNumber);
        }

        self.remove_from_buffer(last_confirmed_sequence_number);

        let mut plan: Vec<SrMessage> = Vec::with_capacity(self.slots.len());
        let mut unsent_tail: Vec<SrMessage> = Vec::new();
        let mut requests: Vec<SrMessage> = Vec::new();
        let mut kept_heartbeat = false;

        plan.push(codec.create_message(SrMessageType::RetrResp, template, &[])?);

        for offset in 0..self.count {
            let index = self.slot_index(offset);
            let slot = &self.slots[index];

            match slot.already_sent {
                true => match slot.message_type {
                    SrMessageType::Data => {
                        let mut message = slot.message.clone();
                        codec.convert_to_retr_data(&mut message)?;
                        plan.push(message);
                    }
                    SrMessageType::RetrData => plan.push(slot.message.clone()),
                    SrMessageType::Heartbeat => {
                        kept_heartbeat = true;
                        plan.push(slot.message.clone());
                    }
                    SrMessageType::RetrReq => requests.push(slot.message.clone()),
                    _ => return Err(RastaError::InternalError),
                },
                false => match slot.message_type {
                    SrMessageType::Data => unsent_tail.push(slot.message.clone()),
                    SrMessageType::RetrReq => requests.push(slot.message.clone()),
                    // A queued keepalive is pointless mid retransmission.
                    SrMessageType::Heartbeat => (),
                    _ => return Err(RastaError::InternalError),
                },
            }
        }

        if !kept_heartbeat {
            plan.push(codec.create_message(SrMessageType::Heartbeat, template, &[])?);
        }
        plan.extend(unsent_tail);
        plan.extend(requests);

        logging::debug!(self.log, "retransmission plan assembled";
                        "confirmed" => last_confirmed_sequence_number,
                        "plan_size" => plan.len(),
                        "first_sequence" => template.sequence_number);

        for slot in &mut self.slots {
            slot.used = false;
        }
        self.head = 0;
        self.count = plan.len();

        for (position, mut message) in plan.into_iter().enumerate() {
            let sequence_number = template.sequence_number.wrapping_add(position as u32);
            codec.update_for_retransmission(&mut message, sequence_number, template)?;

            let slot = &mut self.slots[position];
            slot.used = true;
            slot.already_sent = false;
            slot.sequence_number = sequence_number;
            slot.message_type = codec.message_type(&message)?;
            slot.message = message;
        }

        Ok(template.sequence_number.wrapping_add(self.count as u32))
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.used = false;
        }
        self.head = 0;
        self.count = 0;
    }

    #[inline]
    fn slot_index(&self, offset: usize) -> usize {
        (self.head + offset) % self.slots.len()
    }
}
