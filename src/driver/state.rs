//! Mutable driver state: protocol bookkeeping and latest measurements.

use crate::protocol::Quantity;
use serde::Serialize;

/// Frame and failure counters.
///
/// These are the observability channel for failure rates; nothing in the
/// driver raises on a protocol failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Read requests sent
    pub tx: u64,
    /// Responses accepted
    pub good_frames: u64,
    /// Responses rejected for a bad checksum
    pub bad_frames: u64,
    /// Scheduler ticks that found a request still unanswered
    pub misses: u64,
    /// Registers given up on after exhausting retries
    pub abandoned: u64,
    /// Stale bytes thrown away before a request or after a miss
    pub discarded_bytes: u64,
    /// Write-enable sequences sent
    pub write_enables: u64,
}

/// Request/response bookkeeping shared by the scheduler and the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolState {
    /// Index into the register table of the register being serviced
    pub current_register_index: usize,
    /// Misses in a row on the current register
    pub consecutive_misses: u32,
    /// A request is out and neither resolved nor abandoned
    pub awaiting_response: bool,
    /// Frame and failure counters
    pub counters: Counters,
}

impl ProtocolState {
    /// Initial state for a table of `table_len` registers.
    ///
    /// The index starts on the last entry so the first scheduler tick
    /// advances onto entry 0.
    pub fn new(table_len: usize) -> Self {
        Self {
            current_register_index: table_len.saturating_sub(1),
            consecutive_misses: 0,
            awaiting_response: false,
            counters: Counters::default(),
        }
    }

    pub(crate) fn advance(&mut self, table_len: usize) {
        self.current_register_index = (self.current_register_index + 1) % table_len.max(1);
        self.consecutive_misses = 0;
    }
}

/// Latest value of each measured quantity, in physical units.
///
/// Starts at zero. A field only changes when a valid frame for its register
/// is accepted, so a failed read leaves the last good value in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MeasurementSet {
    /// Volts
    pub voltage: f64,
    /// Amps
    pub current: f64,
    /// Watts, negative when power flows back to the grid
    pub power: f64,
    /// Hertz
    pub frequency: f64,
}

impl MeasurementSet {
    /// Value for `quantity`.
    pub fn get(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Voltage => self.voltage,
            Quantity::Current => self.current,
            Quantity::Power => self.power,
            Quantity::Frequency => self.frequency,
        }
    }

    pub(crate) fn set(&mut self, quantity: Quantity, value: f64) {
        match quantity {
            Quantity::Voltage => self.voltage = value,
            Quantity::Current => self.current = value,
            Quantity::Power => self.power = value,
            Quantity::Frequency => self.frequency = value,
        }
    }
}
