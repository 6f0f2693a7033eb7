//! Integration tests for the scheduler/collector state machine
//!
//! These run the driver against `MockMeter` and check the retry policy,
//! stale-byte handling and the counters that report them.

use ht7017::driver::{Collected, DriverOptions, Ht7017Driver, TickOutcome};
use ht7017::protocol::frame::encode_response;
use ht7017::protocol::registers::{REG_FREQ_U, REG_POWER_P1, REG_RMS_I1, REG_RMS_U};
use ht7017::protocol::{Quantity, RegisterDescriptor, RegisterTable};
use ht7017::transport::{MockMeter, ResponseMode, SerialLink};
use tracing_test::traced_test;

fn driver_with(meter: MockMeter) -> Ht7017Driver<MockMeter> {
    Ht7017Driver::new(meter, RegisterTable::reference(), DriverOptions::default())
}

// =============================================================================
// Rotation
// =============================================================================

#[test]
fn test_round_robin_order_with_fast_ticks() {
    let mut driver = driver_with(MockMeter::reference());

    for _ in 0..8 {
        driver.on_second_tick().unwrap();
        assert!(matches!(driver.on_fast_tick(), Collected::Accepted { .. }));
    }

    assert_eq!(
        driver.link().requests(),
        &[
            REG_RMS_U, REG_RMS_I1, REG_FREQ_U, REG_POWER_P1,
            REG_RMS_U, REG_RMS_I1, REG_FREQ_U, REG_POWER_P1,
        ]
    );
    assert_eq!(driver.tx_count(), 8);
    assert_eq!(driver.good_frames(), 8);
    assert_eq!(driver.bad_frames(), 0);
}

#[test]
fn test_at_most_one_request_outstanding() {
    let mut meter = MockMeter::reference().with_manual_delivery();
    meter.set_mode(REG_RMS_U, ResponseMode::Silent);
    let mut driver = driver_with(meter);

    for _ in 0..10 {
        let sent_before = driver.link().sent().len();
        driver.on_second_tick().unwrap();
        // Each scheduler tick adds exactly one two-byte request.
        assert_eq!(driver.link().sent().len() - sent_before, 2);
        driver.link_mut().deliver();
        driver.on_fast_tick();
        assert!(!driver.state().awaiting_response || driver.link_mut().bytes_available() == 0);
    }
    assert_eq!(driver.tx_count(), 10);
}

// =============================================================================
// Retry policy
// =============================================================================

#[traced_test]
#[test]
fn test_silent_register_is_retried_then_abandoned() {
    let mut meter = MockMeter::reference();
    meter.set_mode(REG_RMS_U, ResponseMode::Silent);
    let mut driver = driver_with(meter);

    let outcomes: Vec<TickOutcome> = (0..5)
        .map(|_| {
            let outcome = driver.on_second_tick().unwrap();
            driver.on_fast_tick();
            outcome
        })
        .collect();

    assert_eq!(
        outcomes[0],
        TickOutcome::Requested {
            register: REG_RMS_U,
            retry: false,
            abandoned: None
        }
    );
    assert_eq!(
        outcomes[1],
        TickOutcome::Requested {
            register: REG_RMS_U,
            retry: true,
            abandoned: None
        }
    );
    assert_eq!(
        outcomes[2],
        TickOutcome::Requested {
            register: REG_RMS_U,
            retry: true,
            abandoned: None
        }
    );
    // Third miss: give up on voltage and move straight to current.
    assert_eq!(
        outcomes[3],
        TickOutcome::Requested {
            register: REG_RMS_I1,
            retry: false,
            abandoned: Some(REG_RMS_U)
        }
    );
    assert_eq!(
        outcomes[4],
        TickOutcome::Requested {
            register: REG_FREQ_U,
            retry: false,
            abandoned: None
        }
    );

    assert_eq!(
        driver.link().requests(),
        &[REG_RMS_U, REG_RMS_U, REG_RMS_U, REG_RMS_I1, REG_FREQ_U]
    );
    assert_eq!(driver.counters().misses, 3);
    assert_eq!(driver.counters().abandoned, 1);
    assert_eq!(driver.state().consecutive_misses, 0);
    assert_eq!(driver.voltage(), 0.0);
    assert!(driver.current() > 0.0);
    assert_eq!(
        driver.last_error(),
        Some("Register 0x08 did not answer after 3 attempts")
    );

    assert!(logs_contain("no response, retrying"));
    assert!(logs_contain("did not answer after 3 attempts"));
}

#[test]
fn test_late_answer_resets_miss_count() {
    let meter = MockMeter::reference().with_manual_delivery();
    let mut driver = driver_with(meter);

    driver.on_second_tick().unwrap();
    driver.link_mut().drop_pending();
    driver.on_second_tick().unwrap();
    driver.link_mut().drop_pending();
    assert_eq!(driver.state().consecutive_misses, 1);

    // The third attempt is answered before the next scheduler tick.
    driver.on_second_tick().unwrap();
    assert_eq!(driver.state().consecutive_misses, 2);
    driver.link_mut().deliver();
    assert!(matches!(
        driver.on_fast_tick(),
        Collected::Accepted {
            quantity: Quantity::Voltage,
            ..
        }
    ));
    assert_eq!(driver.state().consecutive_misses, 0);

    assert!(matches!(
        driver.on_second_tick().unwrap(),
        TickOutcome::Requested {
            register: REG_RMS_I1,
            retry: false,
            abandoned: None
        }
    ));
    assert_eq!(driver.counters().abandoned, 0);
}

#[test]
fn test_max_retries_is_configurable() {
    let mut meter = MockMeter::reference();
    meter.set_mode(REG_RMS_U, ResponseMode::Silent);
    let options = DriverOptions {
        max_retries: 1,
        ..DriverOptions::default()
    };
    let mut driver = Ht7017Driver::new(meter, RegisterTable::reference(), options);

    driver.on_second_tick().unwrap();
    assert!(matches!(
        driver.on_second_tick().unwrap(),
        TickOutcome::Requested {
            register: REG_RMS_I1,
            abandoned: Some(REG_RMS_U),
            ..
        }
    ));
}

#[test]
fn test_single_register_table_keeps_polling_after_abandon() {
    let mut meter = MockMeter::new();
    meter.set_register(REG_POWER_P1, 0x00_0100);
    meter.set_mode(REG_POWER_P1, ResponseMode::Silent);
    let table = RegisterTable::new(vec![
        RegisterDescriptor::new(REG_POWER_P1, Quantity::Power, 1.0).signed()
    ])
    .unwrap();
    let mut driver = Ht7017Driver::new(meter, table, DriverOptions::default());

    for _ in 0..7 {
        driver.on_second_tick().unwrap();
    }
    assert_eq!(driver.link().requests(), &[REG_POWER_P1; 7]);
    assert_eq!(driver.counters().abandoned, 2);
}

// =============================================================================
// Stale bytes
// =============================================================================

#[test]
fn test_truncated_reply_is_never_joined_with_the_next_one() {
    let mut meter = MockMeter::reference();
    meter.script(ResponseMode::Truncate(2));
    let mut driver = driver_with(meter);

    driver.on_second_tick().unwrap();
    assert!(matches!(
        driver.on_fast_tick(),
        Collected::Waiting { available: 2 }
    ));

    // The retry flushes the two orphaned bytes before asking again.
    assert!(matches!(
        driver.on_second_tick().unwrap(),
        TickOutcome::Requested {
            register: REG_RMS_U,
            retry: true,
            ..
        }
    ));
    assert_eq!(driver.counters().discarded_bytes, 2);

    assert!(matches!(driver.on_fast_tick(), Collected::Accepted { .. }));
    assert!((driver.voltage() - 244.30).abs() < 0.01);
    assert_eq!(driver.bad_frames(), 0);
}

#[test]
fn test_unsolicited_bytes_are_flushed_before_request() {
    let mut meter = MockMeter::reference();
    meter.inject(&[0x55, 0xAA, 0x00, 0x12, 0x34, 0x56, 0x78]);
    let mut driver = driver_with(meter);

    driver.on_second_tick().unwrap();
    assert!(matches!(
        driver.on_fast_tick(),
        Collected::Accepted {
            quantity: Quantity::Voltage,
            ..
        }
    ));
    assert_eq!(driver.counters().discarded_bytes, 7);
}

#[test]
fn test_duplicate_reply_leftover_is_discarded() {
    let meter = MockMeter::reference().with_manual_delivery();
    let mut driver = driver_with(meter);

    // First request unanswered in time, retried; both answers then arrive.
    driver.on_second_tick().unwrap();
    driver.on_second_tick().unwrap();
    driver.link_mut().deliver();
    assert_eq!(driver.link_mut().bytes_available(), 8);

    assert!(matches!(driver.on_fast_tick(), Collected::Accepted { .. }));
    assert_eq!(driver.link_mut().bytes_available(), 4);
    // Nothing outstanding: the second copy stays put until the scheduler.
    assert!(matches!(driver.on_fast_tick(), Collected::Idle));

    driver.on_second_tick().unwrap();
    assert_eq!(driver.counters().discarded_bytes, 4);
    assert_eq!(driver.link().requests().last(), Some(&REG_RMS_I1));
    driver.link_mut().deliver();
    assert!(matches!(
        driver.on_fast_tick(),
        Collected::Accepted {
            quantity: Quantity::Current,
            ..
        }
    ));
}

#[test]
fn test_short_trailer_after_good_reply_is_discarded() {
    for trailer_len in 1..=3 {
        let trailer = [0x6A, 0x08, 0x29];
        let mut reply = encode_response(REG_RMS_U, 0x29_1000).to_vec();
        reply.extend_from_slice(&trailer[..trailer_len]);

        let mut meter = MockMeter::reference();
        meter.script(ResponseMode::Raw(reply));
        let mut driver = driver_with(meter);

        driver.on_second_tick().unwrap();
        assert!(matches!(
            driver.on_fast_tick(),
            Collected::Accepted {
                quantity: Quantity::Voltage,
                ..
            }
        ));
        assert_eq!(driver.link_mut().bytes_available(), trailer_len);

        driver.on_second_tick().unwrap();
        assert_eq!(driver.counters().discarded_bytes, trailer_len as u64);
        assert!(
            matches!(
                driver.on_fast_tick(),
                Collected::Accepted {
                    quantity: Quantity::Current,
                    ..
                }
            ),
            "trailer of {trailer_len} bytes leaked into the next reply"
        );
        assert_eq!(driver.bad_frames(), 0);
        assert_eq!(driver.good_frames(), 2);
    }
}

#[traced_test]
#[test]
fn test_reply_for_previous_register_fails_checksum() {
    let meter = MockMeter::reference().with_manual_delivery();
    let options = DriverOptions {
        max_retries: 1,
        ..DriverOptions::default()
    };
    let mut driver = Ht7017Driver::new(meter, RegisterTable::reference(), options);

    driver.on_second_tick().unwrap(); // voltage, never delivered in time
    driver.on_second_tick().unwrap(); // voltage abandoned, current requested

    // Only the late voltage reply arrives; it is checked against current.
    driver.link_mut().deliver_bytes(4);
    assert!(matches!(driver.on_fast_tick(), Collected::Rejected(_)));
    assert_eq!(driver.bad_frames(), 1);
    assert_eq!(driver.current(), 0.0);
    assert_eq!(driver.voltage(), 0.0);
    assert!(logs_contain("checksum mismatch"));
}

// =============================================================================
// Counters
// =============================================================================

#[test]
fn test_counters_account_for_every_request() {
    let mut meter = MockMeter::reference();
    meter.set_mode(REG_RMS_I1, ResponseMode::CorruptChecksum);
    meter.set_mode(REG_FREQ_U, ResponseMode::Silent);
    let mut driver = driver_with(meter);

    for _ in 0..12 {
        driver.on_second_tick().unwrap();
        driver.on_fast_tick();
    }

    let c = *driver.counters();
    assert!(c.good_frames + c.bad_frames + c.misses <= c.tx);
    assert!(c.bad_frames > 0);
    assert!(c.abandoned > 0);
    assert!(driver.voltage() > 0.0);
    assert!(driver.power() > 0.0);
    assert_eq!(driver.current(), 0.0);
    assert_eq!(driver.frequency(), 0.0);
}
