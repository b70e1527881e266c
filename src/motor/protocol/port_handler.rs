use std::collections::VecDeque;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::motor::protocol::serial_envelope::{
    encode_envelope, extract_envelopes, parse_envelope, ENVELOPE_LEN,
};
use crate::motor::protocol::transport::{RawFrame, Transport, TransportError};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Byte-level serial link beneath the CAN-over-serial binding.
///
/// `read_port` returns whatever is available up to `length` bytes, possibly nothing. It must not
/// block for longer than a few milliseconds.
pub trait PortHandler {
    fn clear_port(&mut self);
    fn read_port(&mut self, length: usize) -> io::Result<Vec<u8>>;
    fn write_port(&mut self, packet: &[u8]) -> io::Result<usize>;
    fn get_bytes_available(&self) -> usize;
}

/// [`Transport`] over a serial adapter that wraps every CAN frame in the `AT ... \r\n` envelope.
#[derive(Debug)]
pub struct SerialTransport<P: PortHandler> {
    port: P,
    rx_buffer: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
}

impl<P: PortHandler> SerialTransport<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            rx_buffer: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_port(self) -> P {
        self.port
    }

    fn fill_rx_buffer(&mut self) -> io::Result<usize> {
        let available = self.port.get_bytes_available();
        let mut chunk = self.port.read_port(available.max(ENVELOPE_LEN))?;
        let read = chunk.len();
        if read > 0 {
            self.rx_buffer.append(&mut chunk);
            self.pending.extend(extract_envelopes(&mut self.rx_buffer));
        }
        Ok(read)
    }
}

impl<P: PortHandler> Transport for SerialTransport<P> {
    fn send(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
        let packet = encode_envelope(frame)?;
        let written = self.port.write_port(&packet)?;
        if written != packet.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: packet.len(),
            });
        }
        Ok(())
    }

    fn try_receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, TransportError> {
        let packet_start_time = Instant::now();

        loop {
            if let Some(envelope) = self.pending.pop_front() {
                return Ok(Some(parse_envelope(&envelope)));
            }

            let read = self.fill_rx_buffer()?;
            if !self.pending.is_empty() {
                continue;
            }

            let elapsed = packet_start_time.elapsed();
            if elapsed >= timeout {
                break;
            }
            if read == 0 {
                thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
            }
        }

        if self.rx_buffer.len() > 1 {
            let partial = std::mem::take(&mut self.rx_buffer);
            warn!("incomplete serial reply: {} bytes", partial.len());
            return Ok(Some(parse_envelope(&partial)));
        }

        Ok(None)
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.port.clear_port();
        if !self.rx_buffer.is_empty() || !self.pending.is_empty() {
            debug!(
                "dropping {} stale bytes and {} queued replies",
                self.rx_buffer.len(),
                self.pending.len()
            );
        }
        self.rx_buffer.clear();
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::protocol::frame_codec::{CommandFrame, CommandType, MotorAddress};
    use crate::motor::protocol::param_table::MECH_POS;

    /// Hands out scripted chunks one `read_port` call at a time.
    #[derive(Debug, Default)]
    struct ChunkedPort {
        chunks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        accept: Option<usize>,
    }

    impl PortHandler for ChunkedPort {
        fn clear_port(&mut self) {
            self.chunks.clear();
        }

        fn read_port(&mut self, length: usize) -> io::Result<Vec<u8>> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(Vec::new());
            };
            if chunk.len() > length {
                let rest = chunk.split_off(length);
                self.chunks.push_front(rest);
            }
            Ok(chunk)
        }

        fn write_port(&mut self, packet: &[u8]) -> io::Result<usize> {
            let accepted = self.accept.unwrap_or(packet.len()).min(packet.len());
            self.written.extend_from_slice(&packet[..accepted]);
            Ok(accepted)
        }

        fn get_bytes_available(&self) -> usize {
            self.chunks.front().map_or(0, Vec::len)
        }
    }

    fn reply_envelope() -> (RawFrame, Vec<u8>) {
        let reply = CommandFrame::new(CommandType::Read, MotorAddress::new(1), Some(MECH_POS), 0.5)
            .to_raw();
        let bytes = encode_envelope(&reply).expect("encode");
        (reply, bytes)
    }

    #[test]
    fn reassembles_reply_split_across_reads() {
        let (reply, bytes) = reply_envelope();
        let mut port = ChunkedPort::default();
        port.chunks.push_back(vec![0x00, 0xFF]);
        port.chunks.push_back(bytes[..4].to_vec());
        port.chunks.push_back(bytes[4..].to_vec());

        let mut transport = SerialTransport::new(port);
        let received = transport
            .try_receive(Duration::from_millis(50))
            .expect("receive");
        assert_eq!(received, Some(reply));
    }

    #[test]
    fn truncated_reply_is_returned_after_timeout() {
        let (_, bytes) = reply_envelope();
        let mut port = ChunkedPort::default();
        port.chunks.push_back(bytes[..11].to_vec());

        let mut transport = SerialTransport::new(port);
        let received = transport
            .try_receive(Duration::from_millis(10))
            .expect("receive")
            .expect("partial frame");
        assert_eq!(received.data.len(), 4);
        assert!(!received.is_complete());
    }

    #[test]
    fn silence_is_none() {
        let mut transport = SerialTransport::new(ChunkedPort::default());
        let start = Instant::now();
        assert_eq!(transport.try_receive(Duration::from_millis(10)).expect("receive"), None);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn send_writes_whole_envelope() {
        let (frame, bytes) = reply_envelope();
        let mut transport = SerialTransport::new(ChunkedPort::default());
        transport.send(&frame).expect("send");
        assert_eq!(transport.port().written, bytes);
    }

    #[test]
    fn short_write_is_an_error() {
        let (frame, _) = reply_envelope();
        let port = ChunkedPort {
            accept: Some(5),
            ..ChunkedPort::default()
        };
        let mut transport = SerialTransport::new(port);
        assert!(matches!(
            transport.send(&frame),
            Err(TransportError::ShortWrite {
                written: 5,
                expected: 17
            })
        ));
    }

    #[test]
    fn clear_drops_queued_replies() {
        let (_, bytes) = reply_envelope();
        let mut port = ChunkedPort::default();
        port.chunks.push_back([bytes.clone(), bytes].concat());

        let mut transport = SerialTransport::new(port);
        transport.fill_rx_buffer().expect("fill");
        assert_eq!(transport.pending.len(), 2);

        transport.clear().expect("clear");
        assert_eq!(transport.try_receive(Duration::from_millis(5)).expect("receive"), None);
    }
}
