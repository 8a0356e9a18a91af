//! Per channel FIFO of payloads ready for the safety layer.

use rasta_common::logging;
use rasta_common::shared::{RastaError, RastaResult};
use rasta_common::{N_SEND_MAX, RED_PAYLOAD_SIZE_MAX, RED_PAYLOAD_SIZE_MIN};

struct Slot {
    used: bool,
    size: usize,
    payload: [u8; RED_PAYLOAD_SIZE_MAX],
}

pub struct ReceiveBuffer {
    slots: Vec<Slot>,
    read_index: usize,
    write_index: usize,
    used: usize,
    log: logging::Logger,
}

impl ReceiveBuffer {
    pub fn new(log: &logging::Logger) -> ReceiveBuffer {
        let slots = (0..N_SEND_MAX)
            .map(|_| Slot {
                used: false,
                size: 0,
                payload: [0; RED_PAYLOAD_SIZE_MAX],
            })
            .collect();

        ReceiveBuffer {
            slots,
            read_index: 0,
            write_index: 0,
            used: 0,
            log: log.new(logging::o!()),
        }
    }

    /// Appends a payload at the tail of the FIFO.
    pub fn add(&mut self, payload: &[u8]) -> RastaResult<()> {
        if payload.len() < RED_PAYLOAD_SIZE_MIN || payload.len() > RED_PAYLOAD_SIZE_MAX {
            return Err(RastaError::InvalidParameter);
        }

        if self.used == self.slots.len() {
            return Err(RastaError::ReceiveBufferFull);
        }

        let slot = &mut self.slots[self.write_index];
        slot.used = true;
        slot.size = payload.len();
        slot.payload[..payload.len()].copy_from_slice(payload);

        self.write_index = (self.write_index + 1) % self.slots.len();
        self.used += 1;

        logging::trace!(self.log, "payload buffered for the upper layer";
                        "size" => payload.len(), "used" => self.used);

        Ok(())
    }

    /// Copies the oldest payload into `buffer` and frees its slot. The caller
    /// buffer must be sized for a full payload.
    pub fn read(&mut self, buffer: &mut [u8]) -> RastaResult<usize> {
        if buffer.len() < RED_PAYLOAD_SIZE_MIN || buffer.len() > RED_PAYLOAD_SIZE_MAX {
            return Err(RastaError::InvalidBufferSize);
        }

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

    /// Number of free slots.
    #[inline]
    pub fn free_entries(&self) -> usize {
        self.slots.len() - self.used
    }

    /// Number of occupied slots.
    #[inline]
    pub fn used_entries(&self) -> usize {
        self.used
    }

    /// Drops all buffered payloads.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.used = false;
        }
        self.read_index = 0;
        self.write_index = 0;
        self.used = 0;
    }
}
