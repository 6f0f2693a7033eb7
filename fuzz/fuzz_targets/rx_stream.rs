//! Fuzz target for the driver fed arbitrary serial traffic.
//!
//! Tests:
//! - Random bytes and tick interleavings never panic
//! - At most one request is outstanding and counters stay consistent
//! - Measurements stay finite

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ht7017::driver::{DriverOptions, Ht7017Driver};
use ht7017::protocol::RegisterTable;
use ht7017::transport::{MockMeter, ResponseMode};

#[derive(Debug, Arbitrary)]
enum Step {
    SecondTick,
    FastTick,
    Deliver,
    DeliverBytes(u8),
    Inject(Vec<u8>),
    Script(Reply),
}

#[derive(Debug, Arbitrary)]
enum Reply {
    Respond,
    Silent,
    CorruptChecksum,
    Truncate(u8),
    Raw(Vec<u8>),
}

impl From<Reply> for ResponseMode {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Respond => ResponseMode::Respond,
            Reply::Silent => ResponseMode::Silent,
            Reply::CorruptChecksum => ResponseMode::CorruptChecksum,
            Reply::Truncate(n) => ResponseMode::Truncate(usize::from(n % 4)),
            Reply::Raw(bytes) => ResponseMode::Raw(bytes.into_iter().take(16).collect()),
        }
    }
}

#[derive(Debug, Arbitrary)]
struct Input {
    max_retries: u8,
    steps: Vec<Step>,
}

fuzz_target!(|input: Input| {
    let options = DriverOptions {
        max_retries: u32::from(input.max_retries % 5),
        ..DriverOptions::default()
    };
    let meter = MockMeter::reference().with_manual_delivery();
    let mut driver = Ht7017Driver::new(meter, RegisterTable::reference(), options);

    for step in input.steps.into_iter().take(256) {
        match step {
            Step::SecondTick => {
                let _ = driver.on_second_tick();
            }
            Step::FastTick => {
                driver.on_fast_tick();
            }
            Step::Deliver => driver.link_mut().deliver(),
            Step::DeliverBytes(n) => driver.link_mut().deliver_bytes(usize::from(n)),
            Step::Inject(bytes) => driver.link_mut().inject(&bytes[..bytes.len().min(64)]),
            Step::Script(reply) => driver.link_mut().script(reply.into()),
        }

        let c = driver.counters();
        assert!(c.good_frames + c.bad_frames + c.misses <= c.tx);
        assert!(driver.state().consecutive_misses <= driver.options().max_retries);
        assert!(driver.state().current_register_index < driver.table().len());
        for value in [driver.voltage(), driver.current(), driver.power(), driver.frequency()] {
            assert!(value.is_finite());
        }
    }
});
