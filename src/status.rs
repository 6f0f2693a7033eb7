//! Status snapshot for diagnostics pages and logs.
//!
//! The driver does not format anything itself. `DriverStatus` collects the
//! raw numbers a status reporter needs (measurements, counters and the
//! calibration in effect) into one serializable value.

use crate::driver::{Counters, Ht7017Driver, MeasurementSet};
use crate::protocol::{Conversion, Quantity};
use crate::transport::SerialLink;
use serde::Serialize;

/// Calibration of one register.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationEntry {
    /// Quantity measured
    pub quantity: Quantity,
    /// Register address
    pub address: u8,
    /// Scale factor
    pub scale: f64,
    /// Conversion rule
    pub conversion: Conversion,
}

/// Point-in-time view of the driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverStatus {
    /// Latest measurements
    pub measurements: MeasurementSet,
    /// Frame and failure counters
    pub counters: Counters,
    /// Calibration per polled register
    pub calibration: Vec<CalibrationEntry>,
    /// Register currently being serviced
    pub current_register: u8,
    /// A request is outstanding
    pub awaiting_response: bool,
    /// Misses in a row on the current register
    pub consecutive_misses: u32,
    /// Most recent protocol failure
    pub last_error: Option<String>,
}

impl DriverStatus {
    pub(crate) fn capture<L: SerialLink>(driver: &Ht7017Driver<L>) -> Self {
        let state = driver.state();
        Self {
            measurements: *driver.measurements(),
            counters: *driver.counters(),
            calibration: driver
                .table()
                .iter()
                .map(|d| CalibrationEntry {
                    quantity: d.quantity,
                    address: d.address,
                    scale: d.scale,
                    conversion: d.conversion,
                })
                .collect(),
            current_register: driver.table().get(state.current_register_index).address,
            awaiting_response: state.awaiting_response,
            consecutive_misses: state.consecutive_misses,
            last_error: driver.last_error().map(str::to_string),
        }
    }

    /// Fraction of sent requests that produced an accepted frame.
    pub fn success_rate(&self) -> Option<f64> {
        if self.counters.tx == 0 {
            None
        } else {
            Some(self.counters.good_frames as f64 / self.counters.tx as f64)
        }
    }

    /// One-line summary, e.g. for a periodic log line.
    pub fn summary(&self) -> String {
        let m = &self.measurements;
        format!(
            "V={:.1}V I={:.3}A P={:.1}W F={:.1}Hz (tx={} good={} bad={} miss={})",
            m.voltage,
            m.current,
            m.power,
            m.frequency,
            self.counters.tx,
            self.counters.good_frames,
            self.counters.bad_frames,
            self.counters.misses
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::{DriverOptions, Ht7017Driver};
    use crate::protocol::RegisterTable;
    use crate::transport::MockMeter;

    #[test]
    fn snapshot_serializes_to_json() {
        let mut driver = Ht7017Driver::new(
            MockMeter::reference(),
            RegisterTable::reference(),
            DriverOptions::default(),
        );
        driver.on_second_tick().unwrap();
        driver.on_fast_tick();

        let status = driver.status();
        assert_eq!(status.success_rate(), Some(1.0));
        assert_eq!(status.calibration.len(), 4);
        assert!(status.summary().starts_with("V=244.3V"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["counters"]["good_frames"], 1);
        assert_eq!(json["calibration"][0]["quantity"], "voltage");
        assert_eq!(json["calibration"][3]["conversion"], "multiply");
    }

    #[test]
    fn success_rate_undefined_before_first_request() {
        let driver = Ht7017Driver::new(
            MockMeter::new(),
            RegisterTable::reference(),
            DriverOptions::default(),
        );
        assert_eq!(driver.status().success_rate(), None);
    }
}
