//! Register table and calibration scaling
//!
//! The table is an ordered list of [`RegisterDescriptor`]s. The scheduler
//! walks it one entry per tick and wraps around at the end. Scale factors are
//! data: different shunts and voltage dividers need different constants, so
//! nothing here assumes a single correct value.

use crate::error::{MeterError, MeterResult};
use crate::protocol::frame::{sign_extend_24, RAW_MAX};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// RMS current register.
pub const REG_RMS_I1: u8 = 0x06;
/// RMS voltage register.
pub const REG_RMS_U: u8 = 0x08;
/// Line frequency register.
pub const REG_FREQ_U: u8 = 0x09;
/// Active power register (24-bit two's complement).
pub const REG_POWER_P1: u8 = 0x0A;

/// Physical quantity measured by one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    /// RMS voltage in volts
    Voltage,
    /// RMS current in amps
    Current,
    /// Active power in watts
    Power,
    /// Line frequency in hertz
    Frequency,
}

impl Quantity {
    /// All quantities, in reporting order.
    pub const ALL: [Quantity; 4] = [
        Quantity::Voltage,
        Quantity::Current,
        Quantity::Power,
        Quantity::Frequency,
    ];

    /// Lower-case name, as used in configuration and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Quantity::Voltage => "voltage",
            Quantity::Current => "current",
            Quantity::Power => "power",
            Quantity::Frequency => "frequency",
        }
    }

    /// Unit symbol.
    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Voltage => "V",
            Quantity::Current => "A",
            Quantity::Power => "W",
            Quantity::Frequency => "Hz",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Quantity {
    type Err = MeterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "voltage" | "u" | "v" => Ok(Quantity::Voltage),
            "current" | "i" | "a" => Ok(Quantity::Current),
            "power" | "p" | "w" | "active_power" => Ok(Quantity::Power),
            "frequency" | "freq" | "f" | "hz" => Ok(Quantity::Frequency),
            other => Err(MeterError::UnknownQuantity(other.to_string())),
        }
    }
}

/// How a scale factor turns a raw register value into a physical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    /// `raw / scale`
    #[default]
    Divide,
    /// `raw * scale`
    Multiply,
    /// `scale / raw`, for period registers read against a reference clock.
    /// A zero period reads as zero.
    Reciprocal,
}

impl Conversion {
    fn apply(self, raw: f64, scale: f64) -> f64 {
        match self {
            Conversion::Divide => raw / scale,
            Conversion::Multiply => raw * scale,
            Conversion::Reciprocal if raw == 0.0 => 0.0,
            Conversion::Reciprocal => scale / raw,
        }
    }
}

/// One measurable register on the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterDescriptor {
    /// Register address (bit 7 clear)
    pub address: u8,
    /// Calibration constant, see [`Conversion`]
    pub scale: f64,
    /// Human-readable name
    pub name: &'static str,
    /// Quantity this register measures
    pub quantity: Quantity,
    /// Whether the raw value is 24-bit two's complement
    pub signed: bool,
    /// Rule combining the raw value with `scale`
    pub conversion: Conversion,
}

impl RegisterDescriptor {
    /// Descriptor for an unsigned register using [`Conversion::Divide`].
    pub fn new(address: u8, quantity: Quantity, scale: f64) -> Self {
        Self {
            address,
            scale,
            name: quantity.name(),
            quantity,
            signed: false,
            conversion: Conversion::Divide,
        }
    }

    /// Mark the register as 24-bit two's complement.
    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// Use a different conversion rule.
    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = conversion;
        self
    }

    /// Interpret the register's raw 24-bit value as a signed or unsigned
    /// integer.
    pub fn raw_to_int(&self, raw: u32) -> i64 {
        if self.signed {
            i64::from(sign_extend_24(raw))
        } else {
            i64::from(raw & RAW_MAX)
        }
    }

    /// Convert a raw value into the register's physical unit.
    ///
    /// Magnitudes at or below `noise_threshold` read as exactly zero.
    pub fn scale_raw(&self, raw: u32, noise_threshold: u32) -> f64 {
        let value = self.raw_to_int(raw);
        if value.unsigned_abs() <= u64::from(noise_threshold) {
            return 0.0;
        }
        self.conversion.apply(value as f64, self.scale)
    }
}

fn check_scale(quantity: Quantity, scale: f64) -> MeterResult<()> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(MeterError::InvalidScale {
            quantity: quantity.name().to_string(),
            scale,
        })
    }
}

/// Ordered, validated set of registers polled by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterTable {
    entries: Vec<RegisterDescriptor>,
}

impl RegisterTable {
    /// Build a table, rejecting empty tables, duplicate addresses or
    /// quantities, addresses with the write bit set and unusable scales.
    pub fn new(entries: Vec<RegisterDescriptor>) -> MeterResult<Self> {
        if entries.is_empty() {
            return Err(MeterError::InvalidRegisterTable(
                "table must contain at least one register".into(),
            ));
        }

        for (i, entry) in entries.iter().enumerate() {
            if entry.address & 0x80 != 0 {
                return Err(MeterError::InvalidRegisterTable(format!(
                    "{} register address {:#04x} has the write bit set",
                    entry.name, entry.address
                )));
            }
            check_scale(entry.quantity, entry.scale)?;
            for other in &entries[..i] {
                if other.address == entry.address {
                    return Err(MeterError::InvalidRegisterTable(format!(
                        "duplicate register address {:#04x}",
                        entry.address
                    )));
                }
                if other.quantity == entry.quantity {
                    return Err(MeterError::InvalidRegisterTable(format!(
                        "quantity {} appears twice",
                        entry.quantity
                    )));
                }
            }
        }

        Ok(Self { entries })
    }

    /// Table matching the HT7017 reference register map: voltage, current,
    /// frequency, then active power.
    pub fn reference() -> Self {
        Self {
            entries: vec![
                RegisterDescriptor::new(REG_RMS_U, Quantity::Voltage, 11_015.3),
                RegisterDescriptor::new(REG_RMS_I1, Quantity::Current, 10_000.0),
                RegisterDescriptor::new(REG_FREQ_U, Quantity::Frequency, 100.0),
                RegisterDescriptor::new(REG_POWER_P1, Quantity::Power, 0.005)
                    .signed()
                    .with_conversion(Conversion::Multiply),
            ],
        }
    }

    /// Number of registers in the rotation.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a constructed table.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptor at `index`, wrapping around the table.
    pub fn get(&self, index: usize) -> &RegisterDescriptor {
        &self.entries[index % self.entries.len()]
    }

    /// Descriptor for a quantity, if the table polls it.
    pub fn by_quantity(&self, quantity: Quantity) -> Option<&RegisterDescriptor> {
        self.entries.iter().find(|e| e.quantity == quantity)
    }

    /// Descriptor for a register address.
    pub fn by_address(&self, address: u8) -> Option<&RegisterDescriptor> {
        self.entries.iter().find(|e| e.address == address)
    }

    /// Iterate in rotation order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.entries.iter()
    }

    /// Change the calibration scale of one quantity.
    ///
    /// # Errors
    /// Rejects scales that are not finite and positive, and quantities not in the table.
    pub fn set_scale(&mut self, quantity: Quantity, scale: f64) -> MeterResult<()> {
        check_scale(quantity, scale)?;
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.quantity == quantity)
            .ok_or_else(|| MeterError::UnknownQuantity(quantity.name().to_string()))?;
        entry.scale = scale;
        Ok(())
    }

    /// Change the conversion rule of one quantity.
    pub fn set_conversion(&mut self, quantity: Quantity, conversion: Conversion) -> MeterResult<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.quantity == quantity)
            .ok_or_else(|| MeterError::UnknownQuantity(quantity.name().to_string()))?;
        entry.conversion = conversion;
        Ok(())
    }
}

impl Default for RegisterTable {
    fn default() -> Self {
        Self::reference()
    }
}
