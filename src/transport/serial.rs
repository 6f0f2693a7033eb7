//! Serial port transport for a real HT7017
//!
//! Wraps the `serialport` crate. The driver must never block, so reads are
//! opportunistic: every call to [`SerialLink::bytes_available`] moves
//! whatever the OS has already received into the owned [`RxQueue`] and
//! returns immediately.

use crate::error::{MeterError, MeterResult};
use crate::transport::{Parity, RxQueue, SerialLink, SerialSettings};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

/// Non-blocking serial link backed by an OS serial port.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
    rx: RxQueue,
    settings: SerialSettings,
}

impl SerialPortLink {
    /// Open the port described by `settings`.
    ///
    /// # Errors
    /// Returns [`MeterError::Serial`] if the port cannot be opened.
    pub fn open(settings: &SerialSettings) -> MeterResult<Self> {
        let parity = match settings.parity {
            Parity::Even => serialport::Parity::Even,
            Parity::None => serialport::Parity::None,
        };

        let port = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(parity)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| {
                MeterError::Serial(format!(
                    "Failed to open serial port '{}' at {} baud: {}",
                    settings.port, settings.baud_rate, e
                ))
            })?;

        debug!(
            port = %settings.port,
            baud = settings.baud_rate,
            parity = ?settings.parity,
            "Serial port opened"
        );

        Ok(Self {
            port,
            rx: RxQueue::with_capacity(settings.rx_capacity),
            settings: settings.clone(),
        })
    }

    /// Settings the port was opened with.
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Bytes lost because the receive buffer was full.
    pub fn overruns(&self) -> u64 {
        self.rx.overruns()
    }

    fn pump(&mut self) {
        let waiting = match self.port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => {
                warn!(error = %e, "Failed to query serial RX count");
                return;
            }
        };
        if waiting == 0 {
            return;
        }

        let mut buf = vec![0u8; waiting];
        match self.port.read(&mut buf) {
            Ok(n) => {
                self.rx.push(&buf[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => warn!(error = %e, "Serial read error"),
        }
    }
}

impl SerialLink for SerialPortLink {
    fn send_byte(&mut self, byte: u8) -> MeterResult<()> {
        self.port.write_all(&[byte])?;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> MeterResult<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn bytes_available(&mut self) -> usize {
        self.pump();
        self.rx.len()
    }

    fn peek_byte(&self, offset: usize) -> Option<u8> {
        self.rx.peek(offset)
    }

    fn consume(&mut self, n: usize) {
        self.rx.consume(n);
    }
}

impl std::fmt::Debug for SerialPortLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortLink")
            .field("settings", &self.settings)
            .field("buffered", &self.rx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_port_reports_serial_error() {
        let settings = SerialSettings::new("/dev/does-not-exist-ht7017");
        match SerialPortLink::open(&settings) {
            Err(MeterError::Serial(msg)) => assert!(msg.contains("does-not-exist-ht7017")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
