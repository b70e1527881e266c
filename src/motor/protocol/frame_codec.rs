//! Transport-independent encoding of one Robstride command.
//!
//! A command is an address word (command code, host id and motor id packed into 32 bits) plus an
//! 8-byte payload. The parameter index travels big-endian in bytes 0-1, bytes 2-3 are reserved,
//! and the value sits little-endian in bytes 4-7.

use thiserror::Error;

use crate::motor::protocol::param_table::{ParameterSpec, ParameterType};
use crate::motor::protocol::transport::RawFrame;

pub const DEFAULT_HOST_ID: u8 = 253;
pub const PAYLOAD_LEN: usize = 8;

const INDEX_OFFSET: usize = 0;
const VALUE_OFFSET: usize = 4;
const SERIAL_ADDRESS_TAG: u32 = 0b100;
const SERIAL_ADDRESS_SHIFT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload too short: {len} bytes, need 8")]
    TooShort { len: usize },
    #[error("incomplete frame: {len} bytes, need {expected}")]
    IncompleteFrame { len: usize, expected: usize },
    #[error("unknown parameter index {0:#06x}")]
    UnknownParameter(u16),
    #[error("unknown command code {0}")]
    UnknownCommand(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandType {
    Enable = 3,
    Disable = 4,
    Reset = 6,
    Read = 17,
    Write = 18,
}

impl CommandType {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            3 => Ok(CommandType::Enable),
            4 => Ok(CommandType::Disable),
            6 => Ok(CommandType::Reset),
            17 => Ok(CommandType::Read),
            18 => Ok(CommandType::Write),
            other => Err(DecodeError::UnknownCommand(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MotorAddress {
    pub host_id: u8,
    pub motor_id: u8,
}

impl MotorAddress {
    pub const fn new(motor_id: u8) -> Self {
        Self {
            host_id: DEFAULT_HOST_ID,
            motor_id,
        }
    }

    pub const fn with_host_id(mut self, host_id: u8) -> Self {
        self.host_id = host_id;
        self
    }
}

/// How the packed address word is placed on the wire.
///
/// The native CAN binding uses the word directly as a 29-bit extended identifier. The
/// CAN-over-serial adapter expects it shifted left by three bits with `0b100` in the low bits
/// before the four big-endian address bytes are written. Command codes stay below 32, so the
/// three bits shifted out are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressEncoding {
    Identifier,
    SerialShifted,
}

impl AddressEncoding {
    pub const fn encode(self, packed: u32) -> u32 {
        match self {
            AddressEncoding::Identifier => packed,
            AddressEncoding::SerialShifted => (packed << SERIAL_ADDRESS_SHIFT) | SERIAL_ADDRESS_TAG,
        }
    }

    pub const fn decode(self, wire: u32) -> u32 {
        match self {
            AddressEncoding::Identifier => wire,
            AddressEncoding::SerialShifted => wire >> SERIAL_ADDRESS_SHIFT,
        }
    }

    pub const fn to_bytes(self, packed: u32) -> [u8; 4] {
        self.encode(packed).to_be_bytes()
    }

    pub const fn from_bytes(self, bytes: [u8; 4]) -> u32 {
        self.decode(u32::from_be_bytes(bytes))
    }
}

pub const fn build_address(command: CommandType, address: MotorAddress) -> u32 {
    ((command.code() as u32) << 24)
        | (0x00 << 16)
        | ((address.host_id as u32) << 8)
        | address.motor_id as u32
}

/// Inverse of [`build_address`]. Bits 16-23 are ignored.
pub fn unpack_address(packed: u32) -> Result<(CommandType, MotorAddress), DecodeError> {
    let command = CommandType::from_code((packed >> 24) as u8)?;
    let address = MotorAddress {
        host_id: (packed >> 8) as u8,
        motor_id: packed as u8,
    };
    Ok((command, address))
}

pub fn build_payload(parameter: Option<&ParameterSpec>, value: f32) -> [u8; PAYLOAD_LEN] {
    let mut data = [0u8; PAYLOAD_LEN];
    let Some(parameter) = parameter else {
        return data;
    };

    data[INDEX_OFFSET..INDEX_OFFSET + 2].copy_from_slice(&parameter.index.to_be_bytes());
    match parameter.ty {
        ParameterType::Float32 => {
            data[VALUE_OFFSET..].copy_from_slice(&value.to_bits().to_le_bytes());
        }
        ParameterType::Int16 => {
            let bytes = truncate_u16(value).to_le_bytes();
            data[VALUE_OFFSET..VALUE_OFFSET + 2].copy_from_slice(&bytes);
        }
        ParameterType::Int8 => {
            data[VALUE_OFFSET] = truncate_u8(value);
        }
    }
    data
}

pub const fn build_reset_payload() -> [u8; PAYLOAD_LEN] {
    [1, 0, 0, 0, 0, 0, 0, 0]
}

pub fn decode_payload_as_float(bytes: &[u8]) -> Result<f32, DecodeError> {
    if bytes.len() < PAYLOAD_LEN {
        return Err(DecodeError::TooShort { len: bytes.len() });
    }
    let raw = [
        bytes[VALUE_OFFSET],
        bytes[VALUE_OFFSET + 1],
        bytes[VALUE_OFFSET + 2],
        bytes[VALUE_OFFSET + 3],
    ];
    Ok(f32::from_bits(u32::from_le_bytes(raw)))
}

// Integer parameters keep the low bits of the truncated value, so 256.0 becomes 0 and -1.0
// becomes 0xFF. A plain `as u8` would saturate instead.
fn truncate_u8(value: f32) -> u8 {
    value as i64 as u8
}

fn truncate_u16(value: f32) -> u16 {
    value as i64 as u16
}

/// One outgoing command, built per call and dropped after it is sent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandFrame {
    pub command: CommandType,
    pub address: MotorAddress,
    pub parameter: Option<ParameterSpec>,
    pub payload: [u8; PAYLOAD_LEN],
}

impl CommandFrame {
    pub fn new(
        command: CommandType,
        address: MotorAddress,
        parameter: Option<ParameterSpec>,
        value: f32,
    ) -> Self {
        Self {
            command,
            address,
            parameter,
            payload: build_payload(parameter.as_ref(), value),
        }
    }

    pub fn reset(address: MotorAddress) -> Self {
        Self {
            command: CommandType::Reset,
            address,
            parameter: None,
            payload: build_reset_payload(),
        }
    }

    pub fn packed_address(&self) -> u32 {
        build_address(self.command, self.address)
    }

    pub fn to_raw(&self) -> RawFrame {
        RawFrame::new(self.packed_address(), self.payload.to_vec())
    }
}
