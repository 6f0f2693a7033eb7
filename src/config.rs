//! Configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (the HT7017 reference setup)
//! 2. `config/ht7017.toml`, or the file given on the command line
//! 3. Environment variables prefixed with `HT7017_`, using `__` between
//!    section and key (`HT7017_SERIAL__PORT=/dev/ttyS1`)
//!
//! # Example
//! ```no_run
//! use ht7017::config::MeterConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MeterConfig::load()?;
//! config.validate()?;
//! println!("Polling {} at {} baud", config.serial.port, config.serial.baud_rate);
//! # Ok(())
//! # }
//! ```

use crate::driver::{DriverOptions, WriteEnablePolicy, DEFAULT_MAX_RETRIES};
use crate::error::{MeterError, MeterResult};
use crate::logging::{parse_log_level, OutputFormat};
use crate::protocol::frame::RESPONSE_LEN;
use crate::protocol::{Conversion, Quantity, RegisterTable};
use crate::transport::SerialSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/ht7017.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "HT7017_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial line
    pub serial: SerialSettings,
    /// Tick timing and retry policy
    pub scheduler: SchedulerConfig,
    /// Write-enable unlock
    pub write_enable: WriteEnablePolicy,
    /// Scale factors
    pub calibration: CalibrationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name, used in log output
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "ht7017".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
        }
    }
}

/// Tick timing and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Misses on one register before moving on
    pub max_retries: u32,
    /// Collector period
    #[serde(with = "humantime_serde")]
    pub fast_tick: Duration,
    /// Scheduler period
    #[serde(with = "humantime_serde")]
    pub slow_tick: Duration,
    /// Send a request on every Nth scheduler tick
    pub request_every_ticks: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            fast_tick: Duration::from_millis(50),
            slow_tick: Duration::from_secs(1),
            request_every_ticks: 1,
        }
    }
}

/// Scale factor and conversion rule of one quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    /// How `scale` is applied to the raw value
    #[serde(default)]
    pub conversion: Conversion,
    /// Calibration constant
    pub scale: f64,
}

impl ChannelCalibration {
    fn new(conversion: Conversion, scale: f64) -> Self {
        Self { conversion, scale }
    }
}

/// Calibration of every polled quantity.
///
/// Defaults match [`RegisterTable::reference`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// RMS voltage
    pub voltage: ChannelCalibration,
    /// RMS current
    pub current: ChannelCalibration,
    /// Active power
    pub power: ChannelCalibration,
    /// Line frequency
    pub frequency: ChannelCalibration,
    /// Raw magnitudes at or below this read as zero
    pub noise_threshold: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        let table = RegisterTable::reference();
        let channel = |q: Quantity| {
            table
                .by_quantity(q)
                .map(|d| ChannelCalibration::new(d.conversion, d.scale))
                .unwrap_or(ChannelCalibration::new(Conversion::Divide, 1.0))
        };
        Self {
            voltage: channel(Quantity::Voltage),
            current: channel(Quantity::Current),
            power: channel(Quantity::Power),
            frequency: channel(Quantity::Frequency),
            noise_threshold: 0,
        }
    }
}

impl CalibrationConfig {
    /// Calibration of one quantity.
    pub fn channel(&self, quantity: Quantity) -> &ChannelCalibration {
        match quantity {
            Quantity::Voltage => &self.voltage,
            Quantity::Current => &self.current,
            Quantity::Power => &self.power,
            Quantity::Frequency => &self.frequency,
        }
    }

    /// Mutable calibration of one quantity.
    pub fn channel_mut(&mut self, quantity: Quantity) -> &mut ChannelCalibration {
        match quantity {
            Quantity::Voltage => &mut self.voltage,
            Quantity::Current => &mut self.current,
            Quantity::Power => &mut self.power,
            Quantity::Frequency => &mut self.frequency,
        }
    }
}

impl MeterConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> MeterResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// Environment variables use the `HT7017_` prefix and `__` as the
    /// section separator, e.g. `HT7017_SCHEDULER__MAX_RETRIES=5`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> MeterResult<Self> {
        let config: MeterConfig = Figment::from(Serialized::defaults(MeterConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> MeterResult<()> {
        parse_log_level(&self.application.log_level)?;

        if self.serial.port.trim().is_empty() {
            return Err(MeterError::Configuration(
                "serial.port must not be empty".to_string(),
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(MeterError::Configuration(
                "serial.baud_rate must be greater than 0".to_string(),
            ));
        }
        if self.serial.rx_capacity < RESPONSE_LEN {
            return Err(MeterError::Configuration(format!(
                "serial.rx_capacity {} cannot hold a {}-byte response",
                self.serial.rx_capacity, RESPONSE_LEN
            )));
        }

        let scheduler = &self.scheduler;
        if scheduler.max_retries == 0 {
            return Err(MeterError::Configuration(
                "scheduler.max_retries must be at least 1".to_string(),
            ));
        }
        if scheduler.request_every_ticks == 0 {
            return Err(MeterError::Configuration(
                "scheduler.request_every_ticks must be at least 1".to_string(),
            ));
        }
        if scheduler.fast_tick.is_zero() || scheduler.slow_tick.is_zero() {
            return Err(MeterError::Configuration(
                "scheduler tick periods must be non-zero".to_string(),
            ));
        }
        if scheduler.fast_tick > scheduler.slow_tick {
            return Err(MeterError::Configuration(format!(
                "scheduler.fast_tick ({:?}) is longer than scheduler.slow_tick ({:?})",
                scheduler.fast_tick, scheduler.slow_tick
            )));
        }

        if self.write_enable.register & 0x80 != 0 {
            return Err(MeterError::Configuration(format!(
                "write_enable.register {:#04x} has bit 7 set",
                self.write_enable.register
            )));
        }

        self.register_table().map(|_| ())
    }

    /// Register table with this configuration's calibration applied.
    pub fn register_table(&self) -> MeterResult<RegisterTable> {
        let mut table = RegisterTable::reference();
        for quantity in Quantity::ALL {
            let channel = self.calibration.channel(quantity);
            table.set_conversion(quantity, channel.conversion)?;
            table.set_scale(quantity, channel.scale)?;
        }
        Ok(table)
    }

    /// Driver options from the `[scheduler]`, `[write_enable]` and
    /// `[calibration]` sections.
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            max_retries: self.scheduler.max_retries,
            request_every_ticks: self.scheduler.request_every_ticks,
            noise_threshold: self.calibration.noise_threshold,
            write_enable: self.write_enable,
        }
    }
}
