//! Byte-level serial transport
//!
//! The driver talks to the device only through [`SerialLink`]: send a byte,
//! count buffered bytes, look at a buffered byte without removing it, and
//! remove bytes explicitly. Keeping peek and consume separate means a frame
//! is always read in full before any of it is dropped from the buffer.
//!
//! [`RxQueue`] is the owned receive FIFO that host-side implementations
//! (the real serial port and the mock meter) fill and the driver drains.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod settings;

use crate::error::MeterResult;
use std::collections::VecDeque;

pub use mock::{MockMeter, ResponseMode};
#[cfg(feature = "instrument_serial")]
pub use serial::SerialPortLink;
pub use settings::{Parity, SerialSettings, DEFAULT_BAUD_RATE};

/// Default receive buffer size, matching the firmware UART ring buffer.
pub const DEFAULT_RX_CAPACITY: usize = 256;

/// Serial collaborator required by the driver.
pub trait SerialLink {
    /// Transmit one byte.
    fn send_byte(&mut self, byte: u8) -> MeterResult<()>;

    /// Number of received bytes waiting in the buffer.
    ///
    /// Takes `&mut self` so host implementations can move bytes from the OS
    /// into their buffer here.
    fn bytes_available(&mut self) -> usize;

    /// Buffered byte at `offset` from the oldest, without removing it.
    fn peek_byte(&self, offset: usize) -> Option<u8>;

    /// Drop up to `n` of the oldest buffered bytes.
    fn consume(&mut self, n: usize);

    /// Transmit a whole frame.
    fn send(&mut self, bytes: &[u8]) -> MeterResult<()> {
        for &b in bytes {
            self.send_byte(b)?;
        }
        Ok(())
    }

    /// Drop every buffered byte and return how many were dropped.
    fn discard_all(&mut self) -> usize {
        let n = self.bytes_available();
        self.consume(n);
        n
    }
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn send_byte(&mut self, byte: u8) -> MeterResult<()> {
        (**self).send_byte(byte)
    }

    fn bytes_available(&mut self) -> usize {
        (**self).bytes_available()
    }

    fn peek_byte(&self, offset: usize) -> Option<u8> {
        (**self).peek_byte(offset)
    }

    fn consume(&mut self, n: usize) {
        (**self).consume(n)
    }

    fn send(&mut self, bytes: &[u8]) -> MeterResult<()> {
        (**self).send(bytes)
    }
}

/// Bounded FIFO of received bytes with separate peek and consume.
///
/// Bytes pushed while the queue is full are dropped and counted, like a
/// UART ring buffer overrun.
#[derive(Debug, Clone)]
pub struct RxQueue {
    buf: VecDeque<u8>,
    capacity: usize,
    overruns: u64,
}

impl RxQueue {
    /// Create a queue holding at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            overruns: 0,
        }
    }

    /// Append received bytes. Returns how many were stored.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let room = self.capacity.saturating_sub(self.buf.len());
        let stored = bytes.len().min(room);
        self.buf.extend(&bytes[..stored]);
        let dropped = bytes.len() - stored;
        if dropped > 0 {
            self.overruns += dropped as u64;
            tracing::warn!(dropped, capacity = self.capacity, "RX buffer overrun");
        }
        stored
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Byte at `offset` from the oldest.
    pub fn peek(&self, offset: usize) -> Option<u8> {
        self.buf.get(offset).copied()
    }

    /// Drop up to `n` of the oldest bytes. Returns how many were dropped.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
        n
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Total bytes lost to overruns.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Maximum number of buffered bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RxQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RX_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_consume() {
        let mut q = RxQueue::with_capacity(8);
        q.push(&[1, 2, 3]);
        assert_eq!(q.peek(0), Some(1));
        assert_eq!(q.peek(2), Some(3));
        assert_eq!(q.peek(3), None);
        assert_eq!(q.len(), 3);

        assert_eq!(q.consume(2), 2);
        assert_eq!(q.peek(0), Some(3));
        assert_eq!(q.consume(10), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn overrun_drops_newest_bytes() {
        let mut q = RxQueue::with_capacity(4);
        assert_eq!(q.push(&[1, 2, 3]), 3);
        assert_eq!(q.push(&[4, 5, 6]), 1);
        assert_eq!(q.len(), 4);
        assert_eq!(q.overruns(), 2);
        assert_eq!(q.peek(3), Some(4));
    }
}
