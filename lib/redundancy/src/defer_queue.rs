//! Bounded queue of out of order PDUs awaiting their predecessors.
//!
//! One queue exists per redundancy channel. Messages whose sequence number
//! lies ahead of the next expected one wait here until the gap in front of
//! them closes or the defer timeout expires.

use crate::message::RedMessage;
use rasta_common::logging;
use rasta_common::seq;
use rasta_common::shared::{RastaError, RastaResult};

struct Slot {
    used: bool,
    insertion_time_ms: u32,
    sequence_number: u32,
    message: RedMessage,
}

pub struct DeferQueue {
    t_seq: u32,
    slots: Vec<Slot>,
    log: logging::Logger,
}

impl DeferQueue {
    /// Creates a queue with `size` slots and the configured defer timeout.
    pub fn new(size: usize, t_seq: u32, log: &logging::Logger) -> DeferQueue {
        let slots = (0..size)
            .map(|_| Slot {
                used: false,
                insertion_time_ms: 0,
                sequence_number: 0,
                message: RedMessage::empty(),
            })
            .collect();

        DeferQueue {
            t_seq,
            slots,
            log: log.new(logging::o!()),
        }
    }

    /// Stores a message. When the queue is full the slot holding the oldest
    /// sequence number is overwritten.
    pub fn add(&mut self, now_ms: u32, sequence_number: u32, message: &RedMessage) {
        let index = match self.slots.iter().position(|slot| !slot.used) {
            Some(index) => index,
            None => {
                let index = self.oldest_index().expect("A full queue has an oldest slot");
                logging::debug!(self.log, "defer queue full, evicting oldest entry";
                                "evicted_sequence" => self.slots[index].sequence_number,
                                "sequence" => sequence_number);
                index
            }
        };

        let slot = &mut self.slots[index];
        slot.used = true;
        slot.insertion_time_ms = now_ms;
        slot.sequence_number = sequence_number;
        slot.message = message.clone();
    }

    /// True when a message with the given sequence number is queued.
    pub fn contains(&self, sequence_number: u32) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.used && slot.sequence_number == sequence_number)
    }

    /// Removes and returns the message with the given sequence number.
    pub fn take(&mut self, sequence_number: u32) -> RastaResult<RedMessage> {
        match self
            .slots
            .iter_mut()
            .find(|slot| slot.used && slot.sequence_number == sequence_number)
        {
            Some(slot) => {
                slot.used = false;
                Ok(slot.message.clone())
            }
            None => Err(RastaError::InvalidSequenceNumber),
        }
    }

    /// True when the longest queued entry has waited for `t_seq` or more.
    pub fn is_timeout(&self, now_ms: u32) -> bool {
        self.slots
            .iter()
            .filter(|slot| slot.used)
            .any(|slot| now_ms.wrapping_sub(slot.insertion_time_ms) >= self.t_seq)
    }

    /// Sequence number of the oldest queued message under wrap-around
    /// ordering.
    pub fn oldest_sequence_number(&self) -> RastaResult<u32> {
        self.oldest_index()
            .map(|index| self.slots[index].sequence_number)
            .ok_or(RastaError::DeferQueueEmpty)
    }

    /// Number of occupied slots.
    pub fn used_entries(&self) -> usize {
        self.slots.iter().filter(|slot| slot.used).count()
    }

    /// Drops every queued message.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.used = false;
        }
    }

    fn oldest_index(&self) -> Option<usize> {
        let mut oldest: Option<usize> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.used {
                continue;
            }

            oldest = match oldest {
                Some(current)
                    if seq::is_older(
                        self.slots[current].sequence_number,
                        slot.sequence_number,
                    ) =>
                {
                    Some(current)
                }
                _ => Some(index),
            };
        }
        oldest
    }
}
