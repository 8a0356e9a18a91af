//! Check code engine of the redundancy layer.
//!
//! The five check code options share one table driven CRC kernel. Type A
//! carries no code at all; B and C are 32 bit codes, D and E 16 bit codes.
//! The polynomial parameters are fixed by the governing standard.

use crate::shared::{RastaError, RastaResult};
use serde_derive::{Deserialize, Serialize};

/// Smallest byte range a check code is computed over (redundancy header plus
/// minimal payload).
pub const CRC_DATA_SIZE_MIN: usize = 36;
/// Largest byte range a check code is computed over.
pub const CRC_DATA_SIZE_MAX: usize = 1109;

/// Check code variants of the redundancy layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum CheckCodeType {
    A,
    B,
    C,
    D,
    E,
}

impl CheckCodeType {
    /// Size of the encoded check code in bytes.
    #[inline]
    pub fn code_len(self) -> usize {
        match self {
            CheckCodeType::A => 0,
            CheckCodeType::B | CheckCodeType::C => 4,
            CheckCodeType::D | CheckCodeType::E => 2,
        }
    }
}

struct CrcParams {
    width: u32,
    poly: u32,
    init: u32,
    reflected: bool,
    xor_out: u32,
}

impl CheckCodeType {
    fn params(self) -> Option<CrcParams> {
        match self {
            CheckCodeType::A => None,
            CheckCodeType::B => Some(CrcParams {
                width: 32,
                poly: 0xEE5B_42FD,
                init: 0,
                reflected: false,
                xor_out: 0,
            }),
            CheckCodeType::C => Some(CrcParams {
                width: 32,
                poly: 0x1EDC_6F41,
                init: 0xFFFF_FFFF,
                reflected: true,
                xor_out: 0xFFFF_FFFF,
            }),
            CheckCodeType::D => Some(CrcParams {
                width: 16,
                poly: 0x1021,
                init: 0,
                reflected: true,
                xor_out: 0,
            }),
            CheckCodeType::E => Some(CrcParams {
                width: 16,
                poly: 0x8005,
                init: 0,
                reflected: true,
                xor_out: 0,
            }),
        }
    }
}

/// Computes check codes of the configured type over a byte range. The lookup
/// table is built once at construction; calculation itself is a pure function
/// of the input.
pub struct CheckCodeEngine {
    code_type: CheckCodeType,
    params: Option<CrcParams>,
    table: [u32; 256],
}

impl CheckCodeEngine {
    pub fn new(code_type: CheckCodeType) -> CheckCodeEngine {
        let params = code_type.params();
        let table = match &params {
            Some(params) => build_table(params),
            None => [0u32; 256],
        };

        CheckCodeEngine {
            code_type,
            params,
            table,
        }
    }

    #[inline]
    pub fn code_type(&self) -> CheckCodeType {
        self.code_type
    }

    #[inline]
    pub fn code_len(&self) -> usize {
        self.code_type.code_len()
    }

    /// Calculates the check code over `data`. Type A never produces a value,
    /// requesting a calculation for it is an internal error.
    pub fn calculate(&self, data: &[u8]) -> RastaResult<u32> {
        if data.len() < CRC_DATA_SIZE_MIN || data.len() > CRC_DATA_SIZE_MAX {
            return Err(RastaError::InvalidParameter);
        }

        let params = match &self.params {
            Some(params) => params,
            None => return Err(RastaError::InternalError),
        };

        let mask = width_mask(params.width);
        let mut register = match params.reflected {
            true => reflect(params.init, params.width),
            false => params.init,
        };

        match params.reflected {
            true => {
                for &byte in data {
                    let index = ((register ^ u32::from(byte)) & 0xFF) as usize;
                    register = (register >> 8) ^ self.table[index];
                }
            }
            false => {
                for &byte in data {
                    let index = (((register >> (params.width - 8)) ^ u32::from(byte)) & 0xFF) as usize;
                    register = ((register << 8) & mask) ^ self.table[index];
                }
            }
        }

        Ok((register ^ params.xor_out) & mask)
    }
}

fn build_table(params: &CrcParams) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mask = width_mask(params.width);

    match params.reflected {
        true => {
            let poly = reflect(params.poly, params.width);
            for (value, entry) in table.iter_mut().enumerate() {
                let mut register = value as u32;
                for _ in 0..8 {
                    register = match register & 1 {
                        0 => register >> 1,
                        _ => (register >> 1) ^ poly,
                    };
                }
                *entry = register;
            }
        }
        false => {
            let top_bit = 1u32 << (params.width - 1);
            for (value, entry) in table.iter_mut().enumerate() {
                let mut register = (value as u32) << (params.width - 8);
                for _ in 0..8 {
                    register = match register & top_bit {
                        0 => (register << 1) & mask,
                        _ => ((register << 1) ^ params.poly) & mask,
                    };
                }
                *entry = register;
            }
        }
    }

    table
}

#[inline]
fn width_mask(width: u32) -> u32 {
    match width {
        32 => u32::max_value(),
        _ => (1u32 << width) - 1,
    }
}

fn reflect(value: u32, width: u32) -> u32 {
    let mut reflected = 0u32;
    for bit in 0..width {
        if value & (1 << bit) != 0 {
            reflected |= 1 << (width - 1 - bit);
        }
    }
    reflected
}
