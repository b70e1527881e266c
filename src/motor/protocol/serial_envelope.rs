//! CAN-over-serial envelope used by the USB-CAN adapter.
//!
//! `41 54 | address (4, big-endian, shifted) | 08 | payload (8) | 0D 0A`

use crate::motor::protocol::frame_codec::{AddressEncoding, PAYLOAD_LEN};
use crate::motor::protocol::transport::{RawFrame, TransportError};

pub const HEADER: [u8; 2] = [0x41, 0x54];
pub const TAIL: [u8; 2] = [0x0D, 0x0A];
pub const DATA_LENGTH: u8 = 0x08;
pub const ENVELOPE_LEN: usize = HEADER.len() + 4 + 1 + PAYLOAD_LEN + TAIL.len();
pub const ADDRESS_ENCODING: AddressEncoding = AddressEncoding::SerialShifted;

const ADDRESS_OFFSET: usize = 2;
const LENGTH_OFFSET: usize = 6;
const PAYLOAD_OFFSET: usize = 7;

pub fn encode_envelope(frame: &RawFrame) -> Result<Vec<u8>, TransportError> {
    if frame.data.len() > PAYLOAD_LEN {
        return Err(TransportError::PayloadTooLong(frame.data.len()));
    }

    let mut payload = [0u8; PAYLOAD_LEN];
    payload[..frame.data.len()].copy_from_slice(&frame.data);

    let mut bytes = Vec::with_capacity(ENVELOPE_LEN);
    bytes.extend_from_slice(&HEADER);
    bytes.extend_from_slice(&ADDRESS_ENCODING.to_bytes(frame.id));
    bytes.push(DATA_LENGTH);
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&TAIL);
    Ok(bytes)
}

/// Reads whatever an envelope carries without validating header or tail.
///
/// A truncated envelope yields a frame with fewer than eight data bytes, which the response
/// interpreter then rejects as incomplete.
pub fn parse_envelope(bytes: &[u8]) -> RawFrame {
    let id = if bytes.len() >= LENGTH_OFFSET {
        let mut address = [0u8; 4];
        address.copy_from_slice(&bytes[ADDRESS_OFFSET..LENGTH_OFFSET]);
        ADDRESS_ENCODING.from_bytes(address)
    } else {
        0
    };

    let end = bytes.len().min(PAYLOAD_OFFSET + PAYLOAD_LEN);
    let data = if bytes.len() > PAYLOAD_OFFSET {
        bytes[PAYLOAD_OFFSET..end].to_vec()
    } else {
        Vec::new()
    };

    RawFrame::new(id, data)
}

/// Splits complete envelopes off the front of a receive buffer.
///
/// Bytes before a header are discarded. A trailing partial envelope stays in `buffer`.
pub fn extract_envelopes(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut envelopes = Vec::new();

    loop {
        if buffer.len() < HEADER.len() {
            break;
        }

        let start = buffer
            .windows(HEADER.len())
            .position(|window| window == HEADER);

        let Some(start) = start else {
            // Keep a trailing 0x41 in case the header is split across reads.
            let keep = usize::from(buffer.last() == Some(&HEADER[0]));
            let drop = buffer.len() - keep;
            buffer.drain(0..drop);
            break;
        };

        if start > 0 {
            buffer.drain(0..start);
        }

        if buffer.len() <= LENGTH_OFFSET {
            break;
        }

        if buffer[LENGTH_OFFSET] != DATA_LENGTH {
            buffer.drain(0..1);
            continue;
        }

        if buffer.len() < ENVELOPE_LEN {
            break;
        }

        if buffer[ENVELOPE_LEN - TAIL.len()..ENVELOPE_LEN] != TAIL {
            buffer.drain(0..1);
            continue;
        }

        envelopes.push(buffer.drain(0..ENVELOPE_LEN).collect());
    }

    envelopes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::protocol::frame_codec::{CommandFrame, CommandType, MotorAddress};
    use crate::motor::protocol::param_table::{MECH_POS, POSITION_SPEED_LIMIT};

    #[test]
    fn envelope_matches_adapter_capture() {
        let frame = CommandFrame::new(
            CommandType::Write,
            MotorAddress::new(127),
            Some(POSITION_SPEED_LIMIT),
            5.0,
        );
        let bytes = encode_envelope(&frame.to_raw()).expect("encode");
        assert_eq!(
            bytes,
            vec![
                0x41, 0x54, 0x90, 0x07, 0xEB, 0xFC, 0x08, 0x17, 0x70, 0x00, 0x00, 0x00, 0x00,
                0xA0, 0x40, 0x0D, 0x0A
            ]
        );
        assert_eq!(bytes.len(), ENVELOPE_LEN);
    }

    #[test]
    fn parse_recovers_address_and_payload() {
        let frame = CommandFrame::new(CommandType::Read, MotorAddress::new(1), Some(MECH_POS), 0.0);
        let raw = frame.to_raw();
        let parsed = parse_envelope(&encode_envelope(&raw).expect("encode"));
        assert_eq!(parsed, raw);
    }

    #[test]
    fn parse_truncated_envelope_keeps_partial_payload() {
        let raw = CommandFrame::new(CommandType::Read, MotorAddress::new(1), Some(MECH_POS), 1.0)
            .to_raw();
        let bytes = encode_envelope(&raw).expect("encode");

        let parsed = parse_envelope(&bytes[..14]);
        assert_eq!(parsed.data, bytes[7..14].to_vec());
        assert!(!parsed.is_complete());

        assert!(parse_envelope(&bytes[..15]).is_complete());
        assert!(parse_envelope(&bytes[..3]).data.is_empty());
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let raw = RawFrame::new(0, vec![0; 9]);
        assert!(matches!(
            encode_envelope(&raw),
            Err(TransportError::PayloadTooLong(9))
        ));
    }

    #[test]
    fn extract_skips_noise_and_keeps_partial_tail() {
        let raw = CommandFrame::new(CommandType::Enable, MotorAddress::new(1), None, 0.0).to_raw();
        let envelope = encode_envelope(&raw).expect("encode");

        let mut buffer = vec![0x00, 0x13, 0x37];
        buffer.extend_from_slice(&envelope);
        buffer.extend_from_slice(&envelope);
        buffer.extend_from_slice(&envelope[..5]);

        let envelopes = extract_envelopes(&mut buffer);
        assert_eq!(envelopes, vec![envelope.clone(), envelope.clone()]);
        assert_eq!(buffer, envelope[..5].to_vec());

        buffer.extend_from_slice(&envelope[5..]);
        assert_eq!(extract_envelopes(&mut buffer), vec![envelope]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn extract_resyncs_after_bad_length() {
        let raw = CommandFrame::new(CommandType::Disable, MotorAddress::new(2), None, 0.0).to_raw();
        let envelope = encode_envelope(&raw).expect("encode");

        let mut buffer = vec![0x41, 0x54, 0, 0, 0, 0, 0x03];
        buffer.extend_from_slice(&envelope);
        assert_eq!(extract_envelopes(&mut buffer), vec![envelope]);
    }
}
