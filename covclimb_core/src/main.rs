//! In-process demo: climbs towards the magic prefix a toy harness branches on.

use covclimb_core::coverage::{CoverageSet, Location};
use covclimb_core::executor::InProcessExecutor;
use covclimb_core::fuzzer::{Fuzzer, SearchSettings};
use covclimb_core::monitor::ConsoleMonitor;
use covclimb_core::mutator::ReplaceByteMutator;
use covclimb_core::observer::MockCoverageObserver;

use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::time::Instant;

const MAGIC: &[u8] = b"CRASH!";

fn my_harness(data: &[u8]) {
    if data.starts_with(MAGIC) {
        panic!("CRASH input detected by harness!");
    }
}

/// One location per matched byte of the magic prefix, like the branches of a
/// byte-by-byte comparison would produce.
fn prefix_coverage(data: &[u8]) -> CoverageSet {
    let matched = data
        .iter()
        .zip(MAGIC)
        .take_while(|(got, want)| got == want)
        .count();
    (0..=matched as u64)
        .map(|depth| Location::new("harness", 0x1000 + depth * 0x10))
        .collect()
}

fn main() -> Result<(), anyhow::Error> {
    let mut rng = ChaCha8Rng::from_seed([0u8; 32]);

    let executor = InProcessExecutor::new(my_harness);
    let observer = MockCoverageObserver::new(prefix_coverage);
    let settings = SearchSettings {
        input_len: MAGIC.len(),
        max_attempts_per_position: Some(10_000),
    };
    let mut fuzzer = Fuzzer::new(executor, observer, ReplaceByteMutator, settings);

    let start_time = Instant::now();
    let summary = fuzzer.run(&mut rng, &mut ConsoleMonitor::new())?;
    println!(
        "Search finished in {:.2?}: {} executions, {} traces, input {:?}",
        start_time.elapsed(),
        summary.executions,
        summary.total_coverage,
        String::from_utf8_lossy(&summary.input)
    );
    Ok(())
}
