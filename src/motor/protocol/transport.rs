use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

use crate::motor::protocol::frame_codec::PAYLOAD_LEN;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload of {0} bytes does not fit in one frame")]
    PayloadTooLong(usize),
    #[error("identifier {0:#010x} is not a valid extended CAN id")]
    InvalidIdentifier(u32),
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("transport lock poisoned")]
    Poisoned,
}

/// A frame as seen by a transport binding: the packed address word and up to eight data bytes.
///
/// Received frames may carry fewer than eight bytes when the wire delivered a truncated reply.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub id: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(id: u32, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    pub fn is_complete(&self) -> bool {
        self.data.len() >= PAYLOAD_LEN
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {:08X} | Data:", self.id)?;
        for byte in &self.data {
            write!(f, " 0x{byte:02X}")?;
        }
        Ok(())
    }
}

/// Frame-level channel to one or more motors.
///
/// Implementations serialize the packed address however their wire requires. `try_receive`
/// returns `Ok(None)` once `timeout` has elapsed without a frame and never blocks longer.
pub trait Transport {
    fn send(&mut self, frame: &RawFrame) -> Result<(), TransportError>;

    fn try_receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, TransportError>;

    /// Drops any frames queued before the next request.
    fn clear(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// One request/response exchange. Bus-sharing handles override this to hold their lock for
    /// the whole exchange.
    fn transact(
        &mut self,
        frame: &RawFrame,
        timeout: Duration,
        clear_first: bool,
    ) -> Result<Option<RawFrame>, TransportError> {
        if clear_first {
            self.clear()?;
        }
        self.send(frame)?;
        self.try_receive(timeout)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
        (**self).send(frame)
    }

    fn try_receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, TransportError> {
        (**self).try_receive(timeout)
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        (**self).clear()
    }

    fn transact(
        &mut self,
        frame: &RawFrame,
        timeout: Duration,
        clear_first: bool,
    ) -> Result<Option<RawFrame>, TransportError> {
        (**self).transact(frame, timeout, clear_first)
    }
}

/// Cloneable handle to a transport shared by several motor sessions on one bus.
///
/// Every exchange runs under a single lock so replies cannot be consumed by another session.
#[derive(Debug)]
pub struct SharedTransport<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for SharedTransport<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SharedTransport<T> {
    pub fn new(transport: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, T>, TransportError> {
        self.inner.lock().map_err(|_| TransportError::Poisoned)
    }
}

impl<T: Transport> Transport for SharedTransport<T> {
    fn send(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
        self.lock()?.send(frame)
    }

    fn try_receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, TransportError> {
        self.lock()?.try_receive(timeout)
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.lock()?.clear()
    }

    fn transact(
        &mut self,
        frame: &RawFrame,
        timeout: Duration,
        clear_first: bool,
    ) -> Result<Option<RawFrame>, TransportError> {
        self.lock()?.transact(frame, timeout, clear_first)
    }
}
