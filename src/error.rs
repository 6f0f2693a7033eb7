//! Error types for the HT7017 driver.
//!
//! The driver never treats a protocol failure as fatal. Protocol-level
//! failures are returned to the caller so they can be logged, but the state
//! machine has already recorded them in its counters and moved on by the time
//! the caller sees them.
//!
//! ## Error Hierarchy
//!
//! - **`FrameError`**: the only error the frame codec can produce. A response
//!   whose checksum does not match the request that elicited it.
//! - **`MeterError`**: everything above the codec.
//!   - `Frame`: wraps a [`FrameError`] seen by the collector.
//!   - `NoResponse`: the scheduler gave up on a register after its retries.
//!   - `MalformedPartial`: fewer than a full frame of stale bytes was found
//!     before a new request and thrown away.
//!   - `InvalidRegisterTable` / `InvalidScale` / `UnknownQuantity`: rejected
//!     calibration or table input.
//!   - `Config` / `Configuration`: figment parse errors and semantic
//!     validation errors respectively.
//!   - `Io` / `Serial`: transport failures from the host side.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type MeterResult<T> = std::result::Result<T, MeterError>;

/// Frame codec error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The trailing checksum byte does not match the one computed from the
    /// request header, the requested register and the three data bytes.
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed locally
        expected: u8,
        /// Checksum byte received from the device
        actual: u8,
    },
}

/// Driver error.
#[derive(Error, Debug)]
pub enum MeterError {
    #[error("Register {register:#04x}: {source}")]
    Frame {
        register: u8,
        #[source]
        source: FrameError,
    },

    #[error("Register {register:#04x} did not answer after {attempts} attempts")]
    NoResponse { register: u8, attempts: u32 },

    #[error("Discarded {len} stale byte(s) that did not form a frame")]
    MalformedPartial { len: usize },

    #[error("Invalid register table: {0}")]
    InvalidRegisterTable(String),

    #[error("Invalid scale {scale} for {quantity}: must be finite and positive")]
    InvalidScale { quantity: String, scale: f64 },

    #[error("Unknown quantity '{0}' (expected voltage, current, power or frequency)")]
    UnknownQuantity(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(String),
}

impl MeterError {
    /// Whether the driver keeps running normally after this error.
    ///
    /// Protocol failures only leave one measurement stale for a cycle.
    /// Configuration and transport failures need operator attention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MeterError::Frame { .. } | MeterError::NoResponse { .. } | MeterError::MalformedPartial { .. }
        )
    }
}

impl From<figment::Error> for MeterError {
    fn from(value: figment::Error) -> Self {
        MeterError::Config(Box::new(value))
    }
}

#[cfg(feature = "instrument_serial")]
impl From<serialport::Error> for MeterError {
    fn from(value: serialport::Error) -> Self {
        MeterError::Serial(value.to_string())
    }
}
