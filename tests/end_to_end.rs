//! End-to-end tests: configuration, driver and simulated meter together.

use ht7017::config::MeterConfig;
use ht7017::driver::{DriverOptions, Ht7017Driver, TickOutcome, WriteEnablePolicy};
use ht7017::protocol::frame::encode_response;
use ht7017::protocol::registers::{REG_POWER_P1, REG_RMS_U};
use ht7017::protocol::{Conversion, Quantity, RegisterDescriptor, RegisterTable};
use ht7017::transport::{MockMeter, ResponseMode, SerialLink};

fn poll_cycle<L: SerialLink>(driver: &mut Ht7017Driver<L>, ticks: usize) {
    for _ in 0..ticks {
        driver.on_second_tick().unwrap();
        driver.on_fast_tick();
    }
}

#[test]
fn test_voltage_reading_from_raw_frame() {
    let mut meter = MockMeter::reference();
    // Exact bytes on the wire: 29 10 00 <checksum>
    let frame = encode_response(REG_RMS_U, 0x29_1000);
    assert_eq!(frame, [0x29, 0x10, 0x00, 0x54]);
    meter.set_mode(REG_RMS_U, ResponseMode::Raw(frame.to_vec()));
    let mut driver = Ht7017Driver::new(meter, RegisterTable::reference(), DriverOptions::default());

    poll_cycle(&mut driver, 1);

    assert!((driver.voltage() - 244.30).abs() < 0.005, "got {}", driver.voltage());
    assert_eq!(driver.good_frames(), 1);
}

#[test]
fn test_negative_power_reading() {
    let mut meter = MockMeter::reference();
    meter.set_register(REG_POWER_P1, 0xFF_FFF0);
    let mut driver = Ht7017Driver::new(meter, RegisterTable::reference(), DriverOptions::default());

    // Voltage, current, frequency, then power.
    poll_cycle(&mut driver, 4);

    assert!((driver.power() - (-0.08)).abs() < 1e-9, "got {}", driver.power());
    assert!(driver.voltage() > 0.0);
}

#[test]
fn test_reference_readings() {
    let mut driver = Ht7017Driver::new(
        MockMeter::reference(),
        RegisterTable::reference(),
        DriverOptions::default(),
    );
    poll_cycle(&mut driver, 4);

    let m = driver.measurements();
    assert!((m.voltage - 244.30).abs() < 0.01);
    assert!((m.current - 1.5).abs() < 1e-9);
    assert!((m.frequency - 50.0).abs() < 1e-9);
    assert!((m.power - 366.0).abs() < 1e-9);
    for q in Quantity::ALL {
        assert_eq!(m.get(q), driver.status().measurements.get(q));
    }
}

#[test]
fn test_host_with_only_one_second_tick() {
    let mut driver = Ht7017Driver::new(
        MockMeter::reference(),
        RegisterTable::reference(),
        DriverOptions::default(),
    );

    // The scheduler collects the previous answer itself.
    for _ in 0..9 {
        driver.on_second_tick().unwrap();
    }

    assert_eq!(driver.tx_count(), 9);
    assert_eq!(driver.good_frames(), 8);
    assert_eq!(driver.counters().misses, 0);
    assert!((driver.frequency() - 50.0).abs() < 1e-9);
}

#[test]
fn test_startup_sequence_with_write_enable() {
    let mut meter = MockMeter::reference();
    meter.inject(&[0x00, 0xFF]);
    let mut driver = Ht7017Driver::new(meter, RegisterTable::reference(), DriverOptions::default());

    driver.begin().unwrap();
    poll_cycle(&mut driver, 4);

    assert_eq!(
        &driver.link().sent()[..6],
        &[0x6A, 0x52, 0x00, 0x00, 0x32, 0xEE]
    );
    assert_eq!(driver.link().write_enables(), 1);
    assert_eq!(driver.good_frames(), 4);
}

#[test]
fn test_periodic_write_enable_keeps_rotation() {
    let options = DriverOptions {
        write_enable: WriteEnablePolicy {
            on_startup: false,
            interval_requests: 4,
            ..WriteEnablePolicy::default()
        },
        ..DriverOptions::default()
    };
    let mut driver = Ht7017Driver::new(MockMeter::reference(), RegisterTable::reference(), options);

    let outcomes: Vec<TickOutcome> = (0..10)
        .map(|_| {
            let outcome = driver.on_second_tick().unwrap();
            driver.on_fast_tick();
            outcome
        })
        .collect();

    assert_eq!(outcomes[4], TickOutcome::Unlocked);
    assert_eq!(outcomes[9], TickOutcome::Unlocked);
    assert_eq!(driver.link().write_enables(), 2);
    assert_eq!(driver.tx_count(), 8);
    assert_eq!(driver.good_frames(), 8);
    assert_eq!(driver.counters().misses, 0);
}

#[test]
fn test_driver_built_from_config() {
    let mut config = MeterConfig::default();
    config.calibration.power.scale = 0.01;
    config.scheduler.request_every_ticks = 2;
    config.validate().unwrap();

    let mut meter = MockMeter::reference();
    meter.set_register(REG_POWER_P1, 0xFF_FFF0);
    let mut driver = Ht7017Driver::new(meter, config.register_table().unwrap(), config.driver_options());

    for _ in 0..8 {
        driver.on_second_tick().unwrap();
        driver.on_fast_tick();
    }
    assert_eq!(driver.tx_count(), 4);
    assert!((driver.power() + 0.16).abs() < 1e-9);
}

#[test]
fn test_custom_table_with_reciprocal_frequency() {
    let mut meter = MockMeter::new();
    meter.set_register(0x09, 20_000);
    let table = RegisterTable::new(vec![RegisterDescriptor::new(0x09, Quantity::Frequency, 1_000_000.0)
        .with_conversion(Conversion::Reciprocal)])
    .unwrap();
    let mut driver = Ht7017Driver::new(meter, table, DriverOptions::default());

    poll_cycle(&mut driver, 1);
    assert!((driver.frequency() - 50.0).abs() < 1e-9);
}

#[test]
fn test_status_snapshot_is_json() {
    let mut meter = MockMeter::reference();
    meter.set_mode(REG_RMS_U, ResponseMode::Silent);
    let mut driver = Ht7017Driver::new(meter, RegisterTable::reference(), DriverOptions::default());
    poll_cycle(&mut driver, 5);

    let status = driver.status();
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["counters"]["abandoned"], 1);
    assert_eq!(json["measurements"]["voltage"], 0.0);
    assert_eq!(json["calibration"][0]["address"], 8);
    assert!(json["last_error"].as_str().unwrap().contains("0x08"));
}
