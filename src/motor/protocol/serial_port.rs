use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::motor::protocol::port_handler::{PortHandler, SerialTransport};

/// Baud rate of the USB-CAN adapter.
pub const DEFAULT_BAUD_RATE: u32 = 921_600;

const READ_TIMEOUT: Duration = Duration::from_millis(2);

pub struct SerialPortHandler {
    port: Box<dyn SerialPort>,
}

impl SerialPortHandler {
    pub fn open(port_name: &str, baudrate: u32) -> io::Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(READ_TIMEOUT)
            .open()?;
        Ok(Self::from_port(port))
    }

    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

/// Opens `port_name` and wraps it in the serial envelope binding.
pub fn open_transport(
    port_name: &str,
    baudrate: u32,
) -> io::Result<SerialTransport<SerialPortHandler>> {
    SerialPortHandler::open(port_name, baudrate).map(SerialTransport::new)
}

impl PortHandler for SerialPortHandler {
    fn clear_port(&mut self) {
        let available = self.get_bytes_available();
        if available > 0 {
            let _ = self.read_port(available);
        }
    }

    fn read_port(&mut self, length: usize) -> io::Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }

        let mut out = vec![0u8; length];
        match self.port.read(&mut out) {
            Ok(read_len) => {
                out.truncate(read_len);
                Ok(out)
            }
            Err(err)
                if err.kind() == io::ErrorKind::TimedOut
                    || err.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    fn write_port(&mut self, packet: &[u8]) -> io::Result<usize> {
        if packet.is_empty() {
            return Ok(0);
        }
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(packet.len())
    }

    fn get_bytes_available(&self) -> usize {
        self.port.bytes_to_read().unwrap_or(0) as usize
    }
}
