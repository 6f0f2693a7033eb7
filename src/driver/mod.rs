//! HT7017 polling driver
//!
//! The driver is a pair of tick functions over one owned state record:
//!
//! - [`Ht7017Driver::on_second_tick`] is the request scheduler. It picks the
//!   register to read, applies the retry/give-up policy to a request that
//!   was never answered, discards stale bytes and sends the next request.
//! - [`Ht7017Driver::on_fast_tick`] is the response collector. Once a full
//!   response is buffered it reads it, validates it against the register
//!   that was requested, and only then removes it from the buffer.
//!
//! Neither function blocks. There is no wall-clock timeout: a request that
//! has not been resolved by the next scheduler tick is a miss. The
//! scheduler runs the collector itself before deciding on a miss, so a host
//! that can only call the one-second tick still reads every response.
//!
//! # Example
//!
//! ```
//! use ht7017::driver::{DriverOptions, Ht7017Driver};
//! use ht7017::protocol::RegisterTable;
//! use ht7017::transport::MockMeter;
//!
//! let mut driver = Ht7017Driver::new(
//!     MockMeter::reference(),
//!     RegisterTable::reference(),
//!     DriverOptions::default(),
//! );
//! driver.on_second_tick().unwrap(); // request voltage
//! driver.on_fast_tick();            // collect the reply
//! assert!((driver.voltage() - 244.30).abs() < 0.01);
//! ```

pub mod state;

use crate::error::{MeterError, MeterResult};
use crate::protocol::frame::{
    decode_response, encode_request, encode_write_enable, RESPONSE_LEN, WRITE_ENABLE_KEY,
    WRITE_ENABLE_REGISTER,
};
use crate::protocol::{Conversion, Quantity, RegisterTable};
use crate::status::DriverStatus;
use crate::transport::SerialLink;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use state::{Counters, MeasurementSet, ProtocolState};

/// Default number of misses before a register is skipped for this cycle.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// When to send the write-enable unlock sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteEnablePolicy {
    /// Send once from [`Ht7017Driver::begin`]
    pub on_startup: bool,
    /// Resend after this many read requests (0 = never)
    pub interval_requests: u32,
    /// Unlock register
    pub register: u8,
    /// Unlock key
    pub key: u8,
}

impl Default for WriteEnablePolicy {
    fn default() -> Self {
        Self {
            on_startup: true,
            interval_requests: 0,
            register: WRITE_ENABLE_REGISTER,
            key: WRITE_ENABLE_KEY,
        }
    }
}

/// Scheduling and decoding options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Misses on one register before it is abandoned for this cycle
    pub max_retries: u32,
    /// Act on every Nth scheduler tick only (1 = every tick)
    pub request_every_ticks: u32,
    /// Raw magnitudes at or below this read as zero
    pub noise_threshold: u32,
    /// Write-enable handling
    pub write_enable: WriteEnablePolicy,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            request_every_ticks: 1,
            noise_threshold: 0,
            write_enable: WriteEnablePolicy::default(),
        }
    }
}

/// Result of one collector pass.
#[derive(Debug)]
pub enum Collected {
    /// No request outstanding
    Idle,
    /// Request outstanding, fewer than a full frame buffered
    Waiting {
        /// Bytes currently buffered
        available: usize,
    },
    /// Valid frame decoded and stored
    Accepted {
        /// Quantity updated
        quantity: Quantity,
        /// Raw 24-bit register content
        raw: u32,
        /// Scaled value now reported for `quantity`
        value: f64,
    },
    /// Frame consumed but rejected; the measurement keeps its old value
    Rejected(MeterError),
}

/// What the scheduler did on one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not a request tick (see [`DriverOptions::request_every_ticks`])
    Skipped,
    /// Write-enable sent in place of a read request
    Unlocked,
    /// Read request sent
    Requested {
        /// Register requested
        register: u8,
        /// Same register as the previous, unanswered request
        retry: bool,
        /// Register given up on during this tick, if any
        abandoned: Option<u8>,
    },
}

/// Tick-driven HT7017 driver over a [`SerialLink`].
#[derive(Debug)]
pub struct Ht7017Driver<L> {
    link: L,
    table: RegisterTable,
    options: DriverOptions,
    state: ProtocolState,
    measurements: MeasurementSet,
    ticks: u64,
    requests_since_unlock: u32,
    resume_pending: bool,
    last_error: Option<String>,
}

impl<L: SerialLink> Ht7017Driver<L> {
    /// Create a driver. Measurements start at zero and nothing is sent
    /// until [`begin`](Self::begin) or the first scheduler tick.
    pub fn new(link: L, table: RegisterTable, options: DriverOptions) -> Self {
        let options = DriverOptions {
            max_retries: options.max_retries.max(1),
            request_every_ticks: options.request_every_ticks.max(1),
            ..options
        };
        Self {
            state: ProtocolState::new(table.len()),
            link,
            table,
            options,
            measurements: MeasurementSet::default(),
            ticks: 0,
            requests_since_unlock: 0,
            resume_pending: false,
            last_error: None,
        }
    }

    /// Drop whatever the device sent at power-up and, if configured, send
    /// the write-enable sequence.
    ///
    /// Any acknowledgement the device sends back is flushed by the first
    /// scheduler tick before its request goes out.
    pub fn begin(&mut self) -> MeterResult<()> {
        let startup = self.link.discard_all();
        if startup > 0 {
            debug!(bytes = startup, "HT7017: discarded startup bytes");
            self.state.counters.discarded_bytes += startup as u64;
        }
        if self.options.write_enable.on_startup {
            self.send_write_enable()?;
        }
        info!(
            registers = self.table.len(),
            max_retries = self.options.max_retries,
            "HT7017 initialized"
        );
        Ok(())
    }

    /// Response collector. Call as often as the host allows.
    pub fn on_fast_tick(&mut self) -> Collected {
        self.collect()
    }

    /// Request scheduler. Call once per fixed time quantum (nominally 1 s).
    ///
    /// # Errors
    /// Only transport failures while sending are returned. The request is
    /// then treated as never sent, and the next tick moves on.
    #[tracing::instrument(level = "trace", skip(self), fields(tick = self.ticks))]
    pub fn on_second_tick(&mut self) -> MeterResult<TickOutcome> {
        // Fallback for hosts that rarely run the fast tick.
        self.collect();

        self.ticks += 1;
        if (self.ticks - 1) % u64::from(self.options.request_every_ticks) != 0 {
            return Ok(TickOutcome::Skipped);
        }

        let table_len = self.table.len();
        let mut retry = false;
        let mut abandoned = None;

        if self.state.awaiting_response {
            let register = self.current_address();
            self.state.consecutive_misses += 1;
            self.state.counters.misses += 1;

            let stale = self.link.discard_all();
            self.state.counters.discarded_bytes += stale as u64;

            if self.state.consecutive_misses >= self.options.max_retries {
                let err = MeterError::NoResponse {
                    register,
                    attempts: self.state.consecutive_misses,
                };
                warn!(register, stale, "HT7017: {err}, skipping");
                self.last_error = Some(err.to_string());
                self.state.counters.abandoned += 1;
                abandoned = Some(register);
                self.state.advance(table_len);
            } else {
                warn!(
                    register,
                    miss = self.state.consecutive_misses,
                    stale,
                    "HT7017: no response, retrying"
                );
                retry = true;
            }
            self.state.awaiting_response = false;
        } else if self.resume_pending {
            retry = self.state.consecutive_misses > 0;
        } else {
            self.state.advance(table_len);
        }
        self.resume_pending = false;

        // A due unlock takes this tick's slot; the chosen register is
        // requested on the next one.
        if self.unlock_due() {
            self.flush_stale();
            self.resume_pending = true;
            self.send_write_enable()?;
            return Ok(TickOutcome::Unlocked);
        }

        self.flush_stale();

        let register = self.current_address();
        self.link.send(&encode_request(register))?;
        self.state.awaiting_response = true;
        self.state.counters.tx += 1;
        self.requests_since_unlock = self.requests_since_unlock.saturating_add(1);
        debug!(register, retry, "HT7017: sent [6A {:02X}]", register);

        Ok(TickOutcome::Requested {
            register,
            retry,
            abandoned,
        })
    }

    /// Check for a complete response and resolve the outstanding request.
    ///
    /// Shared by both ticks so there is exactly one decode path.
    fn collect(&mut self) -> Collected {
        if !self.state.awaiting_response {
            return Collected::Idle;
        }

        let available = self.link.bytes_available();
        if available < RESPONSE_LEN {
            return Collected::Waiting { available };
        }

        let mut frame = [0u8; RESPONSE_LEN];
        for (i, slot) in frame.iter_mut().enumerate() {
            match self.link.peek_byte(i) {
                Some(b) => *slot = b,
                None => return Collected::Waiting { available: i },
            }
        }

        let descriptor = self.table.get(self.state.current_register_index);
        let register = descriptor.address;
        let quantity = descriptor.quantity;
        let decoded = decode_response(register, &frame)
            .map(|raw| (raw, descriptor.scale_raw(raw, self.options.noise_threshold)));

        // Consume only after the frame has been copied out.
        self.link.consume(RESPONSE_LEN);
        self.state.awaiting_response = false;

        match decoded {
            Ok((raw, value)) => {
                self.measurements.set(quantity, value);
                self.state.counters.good_frames += 1;
                self.state.consecutive_misses = 0;
                debug!(
                    register,
                    raw,
                    value,
                    "HT7017: {quantity} = {value:.3} {}",
                    quantity.unit()
                );
                Collected::Accepted {
                    quantity,
                    raw,
                    value,
                }
            }
            Err(source) => {
                self.state.counters.bad_frames += 1;
                let err = MeterError::Frame { register, source };
                warn!(frame = ?frame, "HT7017: {err}");
                self.last_error = Some(err.to_string());
                Collected::Rejected(err)
            }
        }
    }

    fn flush_stale(&mut self) {
        let stale = self.link.discard_all();
        if stale == 0 {
            return;
        }
        self.state.counters.discarded_bytes += stale as u64;
        if stale < RESPONSE_LEN {
            debug!("HT7017: {}", MeterError::MalformedPartial { len: stale });
        } else {
            debug!(bytes = stale, "HT7017: discarded unsolicited bytes");
        }
    }

    fn unlock_due(&self) -> bool {
        let interval = self.options.write_enable.interval_requests;
        interval > 0 && self.requests_since_unlock >= interval
    }

    fn send_write_enable(&mut self) -> MeterResult<()> {
        let policy = self.options.write_enable;
        self.link
            .send(&encode_write_enable(policy.register, policy.key))?;
        self.requests_since_unlock = 0;
        self.state.counters.write_enables += 1;
        debug!("HT7017: sent write enable");
        Ok(())
    }

    fn current_address(&self) -> u8 {
        self.table.get(self.state.current_register_index).address
    }

    /// Latest voltage in volts.
    pub fn voltage(&self) -> f64 {
        self.measurements.voltage
    }

    /// Latest current in amps.
    pub fn current(&self) -> f64 {
        self.measurements.current
    }

    /// Latest active power in watts.
    pub fn power(&self) -> f64 {
        self.measurements.power
    }

    /// Latest line frequency in hertz.
    pub fn frequency(&self) -> f64 {
        self.measurements.frequency
    }

    /// All latest measurements.
    pub fn measurements(&self) -> &MeasurementSet {
        &self.measurements
    }

    /// Read requests sent.
    pub fn tx_count(&self) -> u64 {
        self.state.counters.tx
    }

    /// Responses accepted.
    pub fn good_frames(&self) -> u64 {
        self.state.counters.good_frames
    }

    /// Responses rejected.
    pub fn bad_frames(&self) -> u64 {
        self.state.counters.bad_frames
    }

    /// All counters.
    pub fn counters(&self) -> &Counters {
        &self.state.counters
    }

    /// Protocol state, for diagnostics.
    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    /// Register table in use.
    pub fn table(&self) -> &RegisterTable {
        &self.table
    }

    /// Options in effect.
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Most recent protocol failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Change a calibration scale at runtime.
    ///
    /// Takes effect from the next accepted frame; values already reported
    /// are not rescaled.
    pub fn set_scale(&mut self, quantity: Quantity, scale: f64) -> MeterResult<()> {
        self.table.set_scale(quantity, scale)?;
        info!("HT7017: {quantity} calibration set to {scale}");
        Ok(())
    }

    /// Change a conversion rule at runtime.
    pub fn set_conversion(&mut self, quantity: Quantity, conversion: Conversion) -> MeterResult<()> {
        self.table.set_conversion(quantity, conversion)?;
        info!(?conversion, "HT7017: {quantity} conversion changed");
        Ok(())
    }

    /// Snapshot for status reporters.
    pub fn status(&self) -> DriverStatus {
        DriverStatus::capture(self)
    }

    /// Underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Underlying link, mutably. Bytes consumed through this bypass the
    /// driver's bookkeeping.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Take the link back.
    pub fn into_link(self) -> L {
        self.link
    }
}
