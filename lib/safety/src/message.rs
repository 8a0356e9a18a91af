//! Safety layer PDU and its codec.
//!
//! Wire layout, little endian throughout:
//!
//! | offset | size | field                      |
//! |--------|------|----------------------------|
//! | 0      | 2    | message length             |
//! | 2      | 2    | message type               |
//! | 4      | 4    | receiver id                |
//! | 8      | 4    | sender id                  |
//! | 12     | 4    | sequence number            |
//! | 16     | 4    | confirmed sequence number  |
//! | 20     | 4    | timestamp                  |
//! | 24     | 4    | confirmed timestamp        |
//! | 28     | 2    | payload size (data only)   |
//! | 30     | n    | payload (data only)        |
//! | tail   | 0/8/16 | safety code              |

use byteorder::{ByteOrder, LittleEndian};
use rasta_common::config::SafetyCodeType;
use rasta_common::md4::{self, Md4InitValue};
use rasta_common::shared::{RastaError, RastaResult};
use rasta_common::{
    SR_HEADER_SIZE, SR_MESSAGE_SIZE_MAX, SR_MESSAGE_SIZE_MIN, SR_PAYLOAD_SIZE_MAX,
    SR_PAYLOAD_SIZE_MIN,
};

/// Size of the payload length prefix carried by data messages.
pub const SR_PAYLOAD_PREFIX_SIZE: usize = 2;

/// The eight PDU types of the safety layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SrMessageType {
    ConnReq,
    ConnResp,
    RetrReq,
    RetrResp,
    DiscReq,
    Heartbeat,
    Data,
    RetrData,
}

impl SrMessageType {
    #[inline]
    pub fn to_wire(self) -> u16 {
        match self {
            SrMessageType::ConnReq => 6200,
            SrMessageType::ConnResp => 6201,
            SrMessageType::RetrReq => 6212,
            SrMessageType::RetrResp => 6213,
            SrMessageType::DiscReq => 6216,
            SrMessageType::Heartbeat => 6220,
            SrMessageType::Data => 6240,
            SrMessageType::RetrData => 6241,
        }
    }

    pub fn from_wire(value: u16) -> RastaResult<SrMessageType> {
        match value {
            6200 => Ok(SrMessageType::ConnReq),
            6201 => Ok(SrMessageType::ConnResp),
            6212 => Ok(SrMessageType::RetrReq),
            6213 => Ok(SrMessageType::RetrResp),
            6216 => Ok(SrMessageType::DiscReq),
            6220 => Ok(SrMessageType::Heartbeat),
            6240 => Ok(SrMessageType::Data),
            6241 => Ok(SrMessageType::RetrData),
            _ => Err(RastaError::InvalidParameter),
        }
    }

    /// True for the two types that carry an application payload.
    #[inline]
    pub fn has_payload(self) -> bool {
        match self {
            SrMessageType::Data | SrMessageType::RetrData => true,
            _ => false,
        }
    }
}

/// Addressing, sequencing and timestamp fields of one PDU.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SrMessageHeader {
    pub receiver_id: u32,
    pub sender_id: u32,
    pub sequence_number: u32,
    pub confirmed_sequence_number: u32,
    pub timestamp: u32,
    pub confirmed_timestamp: u32,
}

/// One safety layer PDU with its backing storage.
#[derive(Clone)]
pub struct SrMessage {
    size: usize,
    data: [u8; SR_MESSAGE_SIZE_MAX],
}

impl PartialEq for SrMessage {
    fn eq(&self, other: &SrMessage) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SrMessage {}

impl std::fmt::Debug for SrMessage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "SrMessage {{ size: {} }}", self.size)
    }
}

impl SrMessage {
    /// Empty placeholder for pre-allocated slots.
    #[inline]
    pub fn empty() -> SrMessage {
        SrMessage {
            size: 0,
            data: [0; SR_MESSAGE_SIZE_MAX],
        }
    }

    /// Wraps a PDU delivered by the redundancy layer.
    pub fn from_bytes(frame: &[u8]) -> RastaResult<SrMessage> {
        if frame.len() < SR_MESSAGE_SIZE_MIN || frame.len() > SR_MESSAGE_SIZE_MAX {
            return Err(RastaError::InvalidParameter);
        }

        let mut message = SrMessage::empty();
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

/// Encoder, decoder and safety code engine for safety layer PDUs. The MD4
/// initial value comes from the connection configuration.
pub struct SrMessageCodec {
    safety_code_type: SafetyCodeType,
    md4_initial_value: Md4InitValue,
}

impl SrMessageCodec {
    pub fn new(safety_code_type: SafetyCodeType, md4_initial_value: Md4InitValue) -> SrMessageCodec {
        SrMessageCodec {
            safety_code_type,
            md4_initial_value,
        }
    }

    #[inline]
    pub fn safety_code_len(&self) -> usize {
        self.safety_code_type.code_len()
    }

    /// Lays out one PDU. Data and retransmitted data messages require a
    /// payload within bounds, every other type must come without one.
    pub fn create_message(
        &self,
        message_type: SrMessageType,
        header: &SrMessageHeader,
        payload: &[u8],
    ) -> RastaResult<SrMessage> {
        match message_type.has_payload() {
            true => {
                if payload.len() < SR_PAYLOAD_SIZE_MIN || payload.len() > SR_PAYLOAD_SIZE_MAX {
                    return Err(RastaError::InvalidParameter);
                }
            }
            false => {
                if !payload.is_empty() {
                    return Err(RastaError::InvalidParameter);
                }
            }
        }

        let body = match message_type.has_payload() {
            true => SR_HEADER_SIZE + SR_PAYLOAD_PREFIX_SIZE + payload.len(),
            false => SR_HEADER_SIZE,
        };
        let total = body + self.safety_code_len();

        let mut message = SrMessage::empty();
        message.size = total;
        LittleEndian::write_u16(&mut message.data[0..2], total as u16);
        LittleEndian::write_u16(&mut message.data[2..4], message_type.to_wire());
        LittleEndian::write_u32(&mut message.data[4..8], header.receiver_id);
        LittleEndian::write_u32(&mut message.data[8..12], header.sender_id);
        LittleEndian::write_u32(&mut message.data[12..16], header.sequence_number);
        LittleEndian::write_u32(&mut message.data[16..20], header.confirmed_sequence_number);
        LittleEndian::write_u32(&mut message.data[20..24], header.timestamp);
        LittleEndian::write_u32(&mut message.data[24..28], header.confirmed_timestamp);

        if message_type.has_payload() {
            LittleEndian::write_u16(
                &mut message.data[SR_HEADER_SIZE..SR_HEADER_SIZE + 2],
                payload.len() as u16,
            );
            message.data[SR_HEADER_SIZE + 2..SR_HEADER_SIZE + 2 + payload.len()]
                .copy_from_slice(payload);
        }

        self.write_safety_code(&mut message)?;
        Ok(message)
    }

    /// Recomputes the safety code and compares it with the trailing bytes.
    pub fn check_safety_code(&self, message: &SrMessage) -> RastaResult<()> {
        let length = self.stored_length(message)?;
        let code_len = self.safety_code_len();
        if code_len == 0 {
            return Ok(());
        }

        let digest = md4::calculate(self.md4_initial_value, &message.data[..length - code_len])?;

        match digest[..code_len] == message.data[length - code_len..length] {
            true => Ok(()),
            false => Err(RastaError::InvalidMessageCrc),
        }
    }

    /// Reads the message type field.
    pub fn message_type(&self, message: &SrMessage) -> RastaResult<SrMessageType> {
        self.stored_length(message)?;
        SrMessageType::from_wire(LittleEndian::read_u16(&message.data[2..4]))
    }

    /// Reads all header fields.
    pub fn header(&self, message: &SrMessage) -> RastaResult<SrMessageHeader> {
        self.stored_length(message)?;
        Ok(SrMessageHeader {
            receiver_id: LittleEndian::read_u32(&message.data[4..8]),
            sender_id: LittleEndian::read_u32(&message.data[8..12]),
            sequence_number: LittleEndian::read_u32(&message.data[12..16]),
            confirmed_sequence_number: LittleEndian::read_u32(&message.data[16..20]),
            timestamp: LittleEndian::read_u32(&message.data[20..24]),
            confirmed_timestamp: LittleEndian::read_u32(&message.data[24..28]),
        })
    }

    /// Reads the sequence number field.
    pub fn sequence_number(&self, message: &SrMessage) -> RastaResult<u32> {
        self.stored_length(message)?;
        Ok(LittleEndian::read_u32(&message.data[12..16]))
    }

    /// Borrows the application payload. Empty for types without one.
    pub fn payload<'a>(&self, message: &'a SrMessage) -> RastaResult<&'a [u8]> {
        let length = self.stored_length(message)?;
        let message_type = self.message_type(message)?;

        if !message_type.has_payload() {
            return Ok(&[]);
        }

        let payload_size =
            LittleEndian::read_u16(&message.data[SR_HEADER_SIZE..SR_HEADER_SIZE + 2]) as usize;
        if payload_size < SR_PAYLOAD_SIZE_MIN || payload_size > SR_PAYLOAD_SIZE_MAX {
            return Err(RastaError::InvalidParameter);
        }

        let expected_length =
            SR_HEADER_SIZE + SR_PAYLOAD_PREFIX_SIZE + payload_size + self.safety_code_len();
        if expected_length != length {
            return Err(RastaError::InvalidParameter);
        }

        let start = SR_HEADER_SIZE + SR_PAYLOAD_PREFIX_SIZE;
        Ok(&message.data[start..start + payload_size])
    }

    /// Rewrites a buffered data message into a retransmitted data message.
    pub fn convert_to_retr_data(&self, message: &mut SrMessage) -> RastaResult<()> {
        match self.message_type(message)? {
            SrMessageType::Data => {
                LittleEndian::write_u16(&mut message.data[2..4], SrMessageType::RetrData.to_wire());
                Ok(())
            }
            SrMessageType::RetrData => Ok(()),
            _ => Err(RastaError::InternalError),
        }
    }

    /// Relocates a buffered message into a retransmission plan: assigns the
    /// new sequence number, rewrites the addressing and confirmation fields
    /// from the template and refreshes the safety code. The original message
    /// timestamp is preserved.
    pub fn update_for_retransmission(
        &self,
        message: &mut SrMessage,
        sequence_number: u32,
        template: &SrMessageHeader,
    ) -> RastaResult<()> {
        self.stored_length(message)?;

        LittleEndian::write_u32(&mut message.data[4..8], template.receiver_id);
        LittleEndian::write_u32(&mut message.data[8..12], template.sender_id);
        LittleEndian::write_u32(&mut message.data[12..16], sequence_number);
        LittleEndian::write_u32(
            &mut message.data[16..20],
            template.confirmed_sequence_number,
        );
        LittleEndian::write_u32(&mut message.data[24..28], template.confirmed_timestamp);

        self.write_safety_code(message)
    }

    fn write_safety_code(&self, message: &mut SrMessage) -> RastaResult<()> {
        let code_len = self.safety_code_len();
        if code_len == 0 {
            return Ok(());
        }

        let body = message.size - code_len;
        let digest = md4::calculate(self.md4_initial_value, &message.data[..body])?;
        message.data[body..message.size].copy_from_slice(&digest[..code_len]);
        Ok(())
    }

    /// Reads the length field and validates it against the actual size.
    fn stored_length(&self, message: &SrMessage) -> RastaResult<usize> {
        if message.size < SR_MESSAGE_SIZE_MIN || message.size > SR_MESSAGE_SIZE_MAX {
            return Err(RastaError::InvalidParameter);
        }

        let length = LittleEndian::read_u16(&message.data[0..2]) as usize;
        match length == message.size {
            true => Ok(length),
            false => Err(RastaError::InvalidParameter),
        }
    }
}
