//! CLI entry point for the HT7017 driver
//!
//! - `run`: poll a real meter on a serial port until Ctrl+C
//! - `simulate`: run the driver against the built-in simulated meter
//! - `frame`: print request and response frames for a register
//!
//! # Usage
//!
//! ```bash
//! ht7017 run --port /dev/ttyUSB0
//! ht7017 simulate --ticks 12 --silent current
//! ht7017 frame 0x08 0x29 0x10 0x00
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ht7017::config::{MeterConfig, SchedulerConfig, DEFAULT_CONFIG_PATH};
use ht7017::protocol::frame::{encode_request, encode_response};
use ht7017::transport::ResponseMode;
use ht7017::{logging, Ht7017Driver, MockMeter, Quantity, SerialLink};
use std::path::PathBuf;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::info;

#[derive(Parser)]
#[command(name = "ht7017")]
#[command(about = "Polling driver for the HT7017 energy metering IC", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a meter on a serial port until Ctrl+C
    Run {
        /// Serial port, overriding the configuration
        #[arg(long)]
        port: Option<String>,

        /// Calibration override, e.g. `--scale voltage=11015.3`
        #[arg(long = "scale", value_parser = parse_scale)]
        scales: Vec<(Quantity, f64)>,

        /// Log a status summary every N scheduler ticks (0 = never)
        #[arg(long, default_value_t = 10)]
        status_every: u64,
    },

    /// Run the driver against the simulated meter and print its status
    Simulate {
        /// Scheduler ticks to run
        #[arg(long, default_value_t = 8)]
        ticks: u32,

        /// Calibration override, e.g. `--scale power=0.01`
        #[arg(long = "scale", value_parser = parse_scale)]
        scales: Vec<(Quantity, f64)>,

        /// Quantity whose register never answers
        #[arg(long, value_parser = parse_quantity)]
        silent: Option<Quantity>,

        /// Quantity whose register answers with a bad checksum
        #[arg(long, value_parser = parse_quantity)]
        corrupt: Option<Quantity>,
    },

    /// Print the request frame for a register, and the response frame when
    /// data bytes are given
    Frame {
        /// Register address, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_byte)]
        register: u8,

        /// Response data bytes D2 D1 D0
        #[arg(value_parser = parse_byte, num_args = 0..=3)]
        data: Vec<u8>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MeterConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Run {
            port,
            scales,
            status_every,
        } => run(config, port, scales, status_every).await,
        Commands::Simulate {
            ticks,
            scales,
            silent,
            corrupt,
        } => simulate(config, ticks, scales, silent, corrupt),
        Commands::Frame { register, data } => print_frame(register, &data),
    }
}

fn apply_scales<L: SerialLink>(driver: &mut Ht7017Driver<L>, scales: &[(Quantity, f64)]) -> Result<()> {
    for &(quantity, scale) in scales {
        driver
            .set_scale(quantity, scale)
            .with_context(|| format!("Cannot apply --scale {quantity}={scale}"))?;
    }
    Ok(())
}

#[cfg(feature = "instrument_serial")]
async fn run(
    mut config: MeterConfig,
    port: Option<String>,
    scales: Vec<(Quantity, f64)>,
    status_every: u64,
) -> Result<()> {
    use ht7017::SerialPortLink;
    use tracing::warn;

    if let Some(port) = port {
        config.serial.port = port;
    }

    let link = SerialPortLink::open(&config.serial)?;
    let mut driver = Ht7017Driver::new(link, config.register_table()?, config.driver_options());
    apply_scales(&mut driver, &scales)?;
    driver.begin().context("Failed to initialize meter")?;

    info!(
        app = %config.application.name,
        port = %config.serial.port,
        "Polling HT7017, press Ctrl+C to stop"
    );

    let (mut fast, mut slow) = scheduler_intervals(&config.scheduler);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut slow_ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = fast.tick() => {
                driver.on_fast_tick();
            }
            _ = slow.tick() => {
                if let Err(e) = driver.on_second_tick() {
                    warn!(error = %e, "HT7017: request not sent");
                }
                slow_ticks += 1;
                if status_every > 0 && slow_ticks % status_every == 0 {
                    info!("{}", driver.status().summary());
                }
            }
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl+C")?;
                break;
            }
        }
    }

    info!("Shutting down");
    println!("{}", serde_json::to_string_pretty(&driver.status())?);
    Ok(())
}

/// Collector and scheduler timers for `run`.
///
/// The collector fires at once. The first scheduler tick is one period out,
/// after the startup write-enable has had time to be acknowledged.
#[cfg_attr(not(feature = "instrument_serial"), allow(dead_code))]
fn scheduler_intervals(scheduler: &SchedulerConfig) -> (Interval, Interval) {
    let mut fast = interval(scheduler.fast_tick);
    let mut slow = interval_at(Instant::now() + scheduler.slow_tick, scheduler.slow_tick);
    fast.set_missed_tick_behavior(MissedTickBehavior::Skip);
    slow.set_missed_tick_behavior(MissedTickBehavior::Delay);
    (fast, slow)
}

#[cfg(not(feature = "instrument_serial"))]
async fn run(
    _config: MeterConfig,
    _port: Option<String>,
    _scales: Vec<(Quantity, f64)>,
    _status_every: u64,
) -> Result<()> {
    anyhow::bail!("serial support not compiled in; rebuild with --features instrument_serial")
}

fn simulate(
    config: MeterConfig,
    ticks: u32,
    scales: Vec<(Quantity, f64)>,
    silent: Option<Quantity>,
    corrupt: Option<Quantity>,
) -> Result<()> {
    let table = config.register_table()?;
    let mut meter = MockMeter::reference();
    for (quantity, mode) in [
        (silent, ResponseMode::Silent),
        (corrupt, ResponseMode::CorruptChecksum),
    ] {
        if let Some(descriptor) = quantity.and_then(|q| table.by_quantity(q)) {
            meter.set_mode(descriptor.address, mode);
        }
    }

    let mut driver = Ht7017Driver::new(meter, table, config.driver_options());
    apply_scales(&mut driver, &scales)?;
    driver.begin()?;
    for _ in 0..ticks {
        driver.on_second_tick()?;
        driver.on_fast_tick();
    }

    info!("{}", driver.status().summary());
    println!("{}", serde_json::to_string_pretty(&driver.status())?);
    Ok(())
}

fn print_frame(register: u8, data: &[u8]) -> Result<()> {
    println!("request:  {}", hex(&encode_request(register)));
    match *data {
        [] => {}
        [d2, d1, d0] => {
            let raw = u32::from_be_bytes([0, d2, d1, d0]);
            println!("response: {}", hex(&encode_response(register, raw)));
        }
        _ => anyhow::bail!("expected exactly three data bytes (D2 D1 D0), got {}", data.len()),
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("'{s}' is not a byte: {e}"))
}

fn parse_quantity(s: &str) -> Result<Quantity, String> {
    s.parse().map_err(|e: ht7017::MeterError| e.to_string())
}

fn parse_scale(s: &str) -> Result<(Quantity, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected QUANTITY=SCALE, got '{s}'"))?;
    let quantity = parse_quantity(name)?;
    let scale: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("'{value}' is not a number: {e}"))?;
    Ok((quantity, scale))
}
