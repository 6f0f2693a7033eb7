//! # HT7017 Energy Meter Driver
//!
//! Polling driver for the HT7017 single-phase metering IC over its 4800 baud
//! half-duplex UART. The driver is tick-driven and never blocks: the host
//! calls [`Ht7017Driver::on_second_tick`] once per second to schedule reads
//! and [`Ht7017Driver::on_fast_tick`] as often as it likes to collect
//! responses. Voltage, current, active power and line frequency are read in
//! rotation and exposed as scaled floating-point values.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: Frame codec (request, response, checksum, write-enable)
//!   and the register table with calibration scaling.
//! - **`transport`**: The [`SerialLink`] trait the driver is written against,
//!   a `serialport` implementation and a simulated meter for tests.
//! - **`driver`**: The scheduler/collector state machine and its counters.
//! - **`status`**: Serializable snapshot for status reporters.
//! - **`config`**: Figment-based configuration (TOML file plus environment).
//! - **`logging`**: `tracing-subscriber` setup for the binary and tests.
//! - **`error`**: `MeterError` and `FrameError`.
//!
//! ## Example
//!
//! ```
//! use ht7017::{DriverOptions, Ht7017Driver, MockMeter, RegisterTable};
//!
//! let mut driver = Ht7017Driver::new(
//!     MockMeter::reference(),
//!     RegisterTable::reference(),
//!     DriverOptions::default(),
//! );
//! for _ in 0..4 {
//!     driver.on_second_tick().unwrap();
//!     driver.on_fast_tick();
//! }
//! assert_eq!(driver.good_frames(), 4);
//! assert!((driver.frequency() - 50.0).abs() < 1e-9);
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod status;
pub mod transport;

pub use config::MeterConfig;
pub use driver::{Collected, DriverOptions, Ht7017Driver, TickOutcome, WriteEnablePolicy};
pub use error::{FrameError, MeterError, MeterResult};
pub use protocol::{Conversion, Quantity, RegisterDescriptor, RegisterTable};
pub use status::DriverStatus;
pub use transport::{MockMeter, SerialLink, SerialSettings};
#[cfg(feature = "instrument_serial")]
pub use transport::SerialPortLink;
