//! Native CAN binding over Linux SocketCAN. The packed address is the 29-bit extended id.

use std::io;
use std::time::Duration;

use log::debug;
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket};

use crate::motor::protocol::frame_codec::AddressEncoding;
use crate::motor::protocol::transport::{RawFrame, Transport, TransportError};

pub const ADDRESS_ENCODING: AddressEncoding = AddressEncoding::Identifier;

pub struct SocketCanTransport {
    socket: CanSocket,
}

impl SocketCanTransport {
    pub fn open(ifname: &str) -> io::Result<Self> {
        let socket = CanSocket::open(ifname)?;
        Ok(Self { socket })
    }

    pub fn from_socket(socket: CanSocket) -> Self {
        Self { socket }
    }
}

/// Converts an outgoing frame to an extended-id CAN frame.
fn to_can_frame(frame: &RawFrame) -> Result<CanFrame, TransportError> {
    let wire_id = ADDRESS_ENCODING.encode(frame.id);
    let id = ExtendedId::new(wire_id).ok_or(TransportError::InvalidIdentifier(wire_id))?;
    CanFrame::new(id, &frame.data).ok_or(TransportError::PayloadTooLong(frame.data.len()))
}

fn to_raw(frame: &CanFrame) -> RawFrame {
    let id = match frame.id() {
        Id::Extended(id) => ADDRESS_ENCODING.decode(id.as_raw()),
        Id::Standard(id) => id.as_raw() as u32,
    };
    RawFrame::new(id, frame.data().to_vec())
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl Transport for SocketCanTransport {
    fn send(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
        self.socket.write_frame(&to_can_frame(frame)?)?;
        Ok(())
    }

    fn try_receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, TransportError> {
        match self.socket.read_frame_timeout(timeout) {
            Ok(frame) => Ok(Some(to_raw(&frame))),
            Err(err) if is_timeout(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Drains frames already queued in the socket so the next read sees a fresh reply.
    fn clear(&mut self) -> Result<(), TransportError> {
        self.socket.set_nonblocking(true)?;
        let mut dropped = 0usize;
        let result = loop {
            match self.socket.read_frame() {
                Ok(_) => dropped += 1,
                Err(err) if is_timeout(&err) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.socket.set_nonblocking(false)?;
        if dropped > 0 {
            debug!("dropped {dropped} stale CAN frames");
        }
        result.map_err(TransportError::from)
    }
}
