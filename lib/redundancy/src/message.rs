//! Redundancy layer PDU and its codec.
//!
//! Wire layout, little endian throughout:
//!
//! | offset | size     | field                                   |
//! |--------|----------|-----------------------------------------|
//! | 0      | 2        | message length including the check code |
//! | 2      | 2        | reserve, zero                           |
//! | 4      | 4        | sequence number                         |
//! | 8      | L        | payload (one safety layer PDU)          |
//! | 8 + L  | 0/2/4    | check code                              |

use byteorder::{ByteOrder, LittleEndian};
use rasta_common::crc::{CheckCodeEngine, CheckCodeType};
use rasta_common::shared::{RastaError, RastaResult};
use rasta_common::{
    RED_HEADER_SIZE, RED_MESSAGE_SIZE_MAX, RED_MESSAGE_SIZE_MIN, RED_PAYLOAD_SIZE_MAX,
    RED_PAYLOAD_SIZE_MIN,
};

/// One redundancy layer PDU with its backing storage.
#[derive(Clone)]
pub struct RedMessage {
    size: usize,
    data: [u8; RED_MESSAGE_SIZE_MAX],
}

impl PartialEq for RedMessage {
    fn eq(&self, other: &RedMessage) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for RedMessage {}

impl std::fmt::Debug for RedMessage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "RedMessage {{ size: {} }}", self.size)
    }
}

impl RedMessage {
    /// Empty placeholder for pre-allocated slots.
    #[inline]
    pub fn empty() -> RedMessage {
        RedMessage {
            size: 0,
            data: [0; RED_MESSAGE_SIZE_MAX],
        }
    }

    /// Wraps a raw frame received from a transport channel.
    pub fn from_bytes(frame: &[u8]) -> RastaResult<RedMessage> {
        if frame.len() < RED_MESSAGE_SIZE_MIN || frame.len() > RED_MESSAGE_SIZE_MAX {
            return Err(RastaError::InvalidParameter);
        }

        let mut message = RedMessage::empty();
        message.size = frame.len();
        message.data[..frame.len()].copy_from_slice(frame);
        Ok(message)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size]
    }
}

/// Encoder, decoder and check code verifier for redundancy layer PDUs. Owns
/// the check code engine for the configured type.
pub struct RedMessageCodec {
    engine: CheckCodeEngine,
}

impl RedMessageCodec {
    pub fn new(check_code_type: CheckCodeType) -> RedMessageCodec {
        RedMessageCodec {
            engine: CheckCodeEngine::new(check_code_type),
        }
    }

    #[inline]
    pub fn code_len(&self) -> usize {
        self.engine.code_len()
    }

    /// Lays out header, payload and trailing check code for transmission.
    pub fn create_message(&self, sequence_number: u32, payload: &[u8]) -> RastaResult<RedMessage> {
        if payload.len() < RED_PAYLOAD_SIZE_MIN || payload.len() > RED_PAYLOAD_SIZE_MAX {
            return Err(RastaError::InvalidParameter);
        }

        let code_len = self.engine.code_len();
        let total = RED_HEADER_SIZE + payload.len() + code_len;

        let mut message = RedMessage::empty();
        message.size = total;
        LittleEndian::write_u16(&mut message.data[0..2], total as u16);
        LittleEndian::write_u16(&mut message.data[2..4], 0);
        LittleEndian::write_u32(&mut message.data[4..8], sequence_number);
        message.data[RED_HEADER_SIZE..RED_HEADER_SIZE + payload.len()].copy_from_slice(payload);

        if code_len > 0 {
            let code = self.engine.calculate(&message.data[..total - code_len])?;
            match code_len {
                4 => LittleEndian::write_u32(&mut message.data[total - 4..total], code),
                _ => LittleEndian::write_u16(&mut message.data[total - 2..total], code as u16),
            }
        }

        Ok(message)
    }

    /// Recomputes the check code over the header and payload and compares it
    /// with the trailing bytes. Type A messages carry no code and always pass.
    pub fn check_message_crc(&self, message: &RedMessage) -> RastaResult<()> {
        let length = self.stored_length(message)?;
        let code_len = self.engine.code_len();
        if code_len == 0 {
            return Ok(());
        }

        let expected = self.engine.calculate(&message.data[..length - code_len])?;
        let actual = match code_len {
            4 => LittleEndian::read_u32(&message.data[length - 4..length]),
            _ => u32::from(LittleEndian::read_u16(&message.data[length - 2..length])),
        };

        match expected == actual {
            true => Ok(()),
            false => Err(RastaError::InvalidMessageCrc),
        }
    }

    /// Reads the sequence number field.
    pub fn sequence_number(&self, message: &RedMessage) -> RastaResult<u32> {
        self.stored_length(message)?;
        Ok(LittleEndian::read_u32(&message.data[4..8]))
    }

    /// Borrows the payload section of the message.
    pub fn payload<'a>(&self, message: &'a RedMessage) -> RastaResult<&'a [u8]> {
        let length = self.stored_length(message)?;
        let payload_len = length - RED_HEADER_SIZE - self.engine.code_len();

        if payload_len < RED_PAYLOAD_SIZE_MIN || payload_len > RED_PAYLOAD_SIZE_MAX {
            return Err(RastaError::InvalidParameter);
        }

        Ok(&message.data[RED_HEADER_SIZE..RED_HEADER_SIZE + payload_len])
    }

    /// Reads the length field and validates it against the actual frame size.
    fn stored_length(&self, message: &RedMessage) -> RastaResult<usize> {
        if message.size < RED_MESSAGE_SIZE_MIN || message.size > RED_MESSAGE_SIZE_MAX {
            return Err(RastaError::InvalidParameter);
        }

        let length = LittleEndian::read_u16(&message.data[0..2]) as usize;
        match length == message.size {
            true => Ok(length),
            false => Err(RastaError::InvalidParameter),
        }
    }
}
