//! Interpretation of motor replies against the parameter table.

use crate::motor::protocol::frame_codec::{DecodeError, PAYLOAD_LEN};
use crate::motor::protocol::param_table::{lookup_by_index, ParameterSpec, ParameterType};
use crate::motor::protocol::transport::RawFrame;

/// Fields of one reply payload. Lives for a single read cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame {
    pub parameter_index: u16,
    pub raw_value: u32,
    pub reserved_bytes: [u8; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Float32(f32),
    Int16(u16),
    Int8(u8),
}

impl ParameterValue {
    pub fn as_f32(self) -> f32 {
        match self {
            ParameterValue::Float32(value) => value,
            ParameterValue::Int16(value) => value as f32,
            ParameterValue::Int8(value) => value as f32,
        }
    }

    pub fn ty(self) -> ParameterType {
        match self {
            ParameterValue::Float32(_) => ParameterType::Float32,
            ParameterValue::Int16(_) => ParameterType::Int16,
            ParameterValue::Int8(_) => ParameterType::Int8,
        }
    }
}

impl ResponseFrame {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < PAYLOAD_LEN {
            return Err(DecodeError::IncompleteFrame {
                len: data.len(),
                expected: PAYLOAD_LEN,
            });
        }
        Ok(Self {
            parameter_index: u16::from_be_bytes([data[0], data[1]]),
            raw_value: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            reserved_bytes: [data[2], data[3]],
        })
    }

    /// Decodes the value with the rule of the given type, ignoring the frame's own index.
    pub fn value_as(&self, ty: ParameterType) -> ParameterValue {
        match ty {
            ParameterType::Float32 => ParameterValue::Float32(f32::from_bits(self.raw_value)),
            ParameterType::Int16 => ParameterValue::Int16(self.raw_value as u16),
            ParameterType::Int8 => ParameterValue::Int8(self.raw_value as u8),
        }
    }
}

/// Decodes a reply payload into the registry parameter it names and its typed value.
pub fn interpret(data: &[u8]) -> Result<(ParameterSpec, ParameterValue), DecodeError> {
    let frame = ResponseFrame::parse(data)?;
    let spec = lookup_by_index(frame.parameter_index)
        .ok_or(DecodeError::UnknownParameter(frame.parameter_index))?;
    Ok((spec, frame.value_as(spec.ty)))
}

pub fn interpret_frame(frame: &RawFrame) -> Result<(ParameterSpec, ParameterValue), DecodeError> {
    interpret(&frame.data)
}
