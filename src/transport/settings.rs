//! Serial line settings for the HT7017 UART.

use serde::{Deserialize, Serialize};

/// Baud rate fixed by the HT7017 UART.
pub const DEFAULT_BAUD_RATE: u32 = 4800;

/// Parity setting of the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// 8E1, as specified for the HT7017
    #[default]
    Even,
    /// 8N1, for clone chips that ignore the parity requirement
    None,
}

/// Serial line configuration.
///
/// Data bits (8) and stop bits (1) are fixed by the device and not
/// configurable.
///
/// # Example
/// ```
/// use ht7017::transport::{Parity, SerialSettings};
///
/// let settings = SerialSettings::new("/dev/ttyUSB0").with_parity(Parity::None);
/// assert_eq!(settings.baud_rate, 4800);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Line speed
    pub baud_rate: u32,
    /// Parity
    pub parity: Parity,
    /// Receive buffer size in bytes
    pub rx_capacity: usize,
}

impl SerialSettings {
    /// Settings for `port` with the device defaults (4800 8E1).
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::Even,
            rx_capacity: super::DEFAULT_RX_CAPACITY,
        }
    }

    /// Set the parity.
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the receive buffer size.
    pub fn with_rx_capacity(mut self, rx_capacity: usize) -> Self {
        self.rx_capacity = rx_capacity;
        self
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        #[cfg(windows)]
        let port = "COM3";
        #[cfg(not(windows))]
        let port = "/dev/ttyUSB0";
        Self::new(port)
    }
}
