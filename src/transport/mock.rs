//! Simulated HT7017 for testing without hardware.
//!
//! `MockMeter` implements [`SerialLink`] from the driver's side of the wire:
//! bytes the driver sends are parsed as requests, and replies are queued in
//! the receive buffer the driver reads from.
//!
//! Reply latency is modelled explicitly. With auto-delivery on (the
//! default) a reply lands in the receive buffer as soon as the request's
//! last byte is sent. With it off, replies wait in a pending queue until the
//! test calls [`MockMeter::deliver`] or [`MockMeter::deliver_bytes`].
//!
//! # Example
//!
//! ```
//! use ht7017::transport::{MockMeter, SerialLink};
//!
//! let mut meter = MockMeter::new();
//! meter.set_register(0x08, 0x291000);
//! meter.send(&[0x6A, 0x08]).unwrap();
//! assert_eq!(meter.bytes_available(), 4);
//! ```

use crate::error::MeterResult;
use crate::protocol::frame::{encode_response, FRAME_HEAD, WRITE_ENABLE_LEN, WRITE_ENABLE_REGISTER};
use crate::protocol::registers::{REG_FREQ_U, REG_POWER_P1, REG_RMS_I1, REG_RMS_U};
use crate::transport::{RxQueue, SerialLink};
use std::collections::{HashMap, VecDeque};

/// How the mock answers a read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMode {
    /// Well-formed response
    Respond,
    /// No response at all
    Silent,
    /// Correct data bytes with the checksum inverted
    CorruptChecksum,
    /// Only the first `n` bytes of the response
    Truncate(usize),
    /// These bytes instead of a response
    Raw(Vec<u8>),
}

/// Simulated metering IC on the far end of the serial link.
#[derive(Debug)]
pub struct MockMeter {
    registers: HashMap<u8, u32>,
    modes: HashMap<u8, ResponseMode>,
    scripted: VecDeque<ResponseMode>,
    inbox: Vec<u8>,
    pending: VecDeque<u8>,
    rx: RxQueue,
    auto_deliver: bool,
    sent: Vec<u8>,
    requests: Vec<u8>,
    write_enables: usize,
}

impl MockMeter {
    /// Empty register map, replies delivered immediately.
    pub fn new() -> Self {
        Self {
            registers: HashMap::new(),
            modes: HashMap::new(),
            scripted: VecDeque::new(),
            inbox: Vec::new(),
            pending: VecDeque::new(),
            rx: RxQueue::default(),
            auto_deliver: true,
            sent: Vec::new(),
            requests: Vec::new(),
            write_enables: 0,
        }
    }

    /// Meter loaded with a plausible mains reading: about 244 V, 1.5 A,
    /// 50 Hz and 366 W with the reference calibration.
    pub fn reference() -> Self {
        let mut meter = Self::new();
        meter.set_register(REG_RMS_U, 0x29_1000);
        meter.set_register(REG_RMS_I1, 15_000);
        meter.set_register(REG_FREQ_U, 5_000);
        meter.set_register(REG_POWER_P1, 73_200);
        meter
    }

    /// Hold replies until [`deliver`](Self::deliver) is called.
    pub fn with_manual_delivery(mut self) -> Self {
        self.auto_deliver = false;
        self
    }

    /// Set the raw 24-bit content of a register.
    pub fn set_register(&mut self, address: u8, raw: u32) {
        self.registers.insert(address, raw);
    }

    /// Persistent reply behaviour for one register.
    pub fn set_mode(&mut self, address: u8, mode: ResponseMode) {
        self.modes.insert(address, mode);
    }

    /// One-shot behaviour for the next request, whatever its register.
    /// Scripted modes are used in order before per-register modes.
    pub fn script(&mut self, mode: ResponseMode) {
        self.scripted.push_back(mode);
    }

    /// Put bytes straight into the receive buffer, as line noise would.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.push(bytes);
    }

    /// Move every pending reply byte into the receive buffer.
    pub fn deliver(&mut self) {
        let n = self.pending.len();
        self.deliver_bytes(n);
    }

    /// Move up to `n` pending reply bytes into the receive buffer.
    pub fn deliver_bytes(&mut self, n: usize) {
        let n = n.min(self.pending.len());
        let bytes: Vec<u8> = self.pending.drain(..n).collect();
        self.rx.push(&bytes);
    }

    /// Drop replies that have not been delivered yet.
    pub fn drop_pending(&mut self) {
        self.pending.clear();
    }

    /// Reply bytes not yet delivered.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Every byte the driver has sent.
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Registers the driver has requested, in order.
    pub fn requests(&self) -> &[u8] {
        &self.requests
    }

    /// Number of write-enable sequences received.
    pub fn write_enables(&self) -> usize {
        self.write_enables
    }

    /// Forget the sent-byte and request logs. Counters and queued replies
    /// are kept.
    pub fn clear_history(&mut self) {
        self.sent.clear();
        self.requests.clear();
    }

    fn parse_inbox(&mut self) {
        loop {
            while self.inbox.first().is_some_and(|&b| b != FRAME_HEAD) {
                self.inbox.remove(0);
            }
            if self.inbox.len() < 2 {
                return;
            }
            if self.inbox[1] == WRITE_ENABLE_REGISTER {
                if self.inbox.len() < WRITE_ENABLE_LEN {
                    return;
                }
                self.inbox.drain(..WRITE_ENABLE_LEN);
                self.write_enables += 1;
                continue;
            }
            let register = self.inbox[1] & 0x7F;
            self.inbox.drain(..2);
            self.answer(register);
        }
    }

    fn answer(&mut self, register: u8) {
        self.requests.push(register);

        let mode = self
            .scripted
            .pop_front()
            .or_else(|| self.modes.get(&register).cloned())
            .unwrap_or(ResponseMode::Respond);

        // Only modes built from the register content need a stored value;
        // unknown registers are otherwise silent.
        let reply: Vec<u8> = match mode {
            ResponseMode::Silent => return,
            ResponseMode::Raw(bytes) => bytes,
            mode => {
                let Some(&raw) = self.registers.get(&register) else {
                    return;
                };
                let frame = encode_response(register, raw);
                match mode {
                    ResponseMode::CorruptChecksum => {
                        let mut bad = frame;
                        bad[3] = !bad[3];
                        bad.to_vec()
                    }
                    ResponseMode::Truncate(n) => frame[..n.min(frame.len())].to_vec(),
                    _ => frame.to_vec(),
                }
            }
        };

        if self.auto_deliver {
            self.rx.push(&reply);
        } else {
            self.pending.extend(reply);
        }
    }
}

impl Default for MockMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for MockMeter {
    fn send_byte(&mut self, byte: u8) -> MeterResult<()> {
        self.sent.push(byte);
        self.inbox.push(byte);
        self.parse_inbox();
        Ok(())
    }

    fn bytes_available(&mut self) -> usize {
        self.rx.len()
    }

    fn peek_byte(&self, offset: usize) -> Option<u8> {
        self.rx.peek(offset)
    }

    fn consume(&mut self, n: usize) {
        self.rx.consume(n);
    }
}
