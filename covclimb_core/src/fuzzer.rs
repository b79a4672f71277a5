//! Coverage-guided hill climbing over the bytes of a fixed-size input.
//!
//! Positions are settled strictly left to right. For each one the engine keeps
//! drawing a random value for that byte until the target reaches a location it
//! has never reached before, then commits the candidate and moves on. Settled
//! positions are never revisited.

use crate::coverage::CoverageSet;
use crate::executor::Executor;
use crate::feedback::CoverageFeedback;
use crate::input::random_input;
use crate::monitor::{Monitor, SearchEvent};
use crate::mutator::Mutator;
use crate::observer::{CoverageObserver, Observer};
use log::{debug, info, warn};
use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSettings {
    pub input_len: usize,
    /// Non-hit attempts allowed per position before it is left as is.
    /// `None` retries forever, which hangs on a byte that cannot influence
    /// coverage.
    pub max_attempts_per_position: Option<u64>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            input_len: crate::config::DEFAULT_INPUT_LEN,
            max_attempts_per_position: None,
        }
    }
}

/// Where a session ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub input: Vec<u8>,
    pub input_md5: String,
    pub total_coverage: usize,
    pub executions: u64,
    pub hits: usize,
    /// Positions whose attempt cap ran out, in order.
    pub abandoned_positions: Vec<usize>,
}

enum PositionOutcome {
    Hit,
    GaveUp,
}

pub struct Fuzzer<E, O, M> {
    executor: E,
    observer: O,
    mutator: M,
    feedback: CoverageFeedback,
    settings: SearchSettings,
    accepted: Vec<u8>,
    executions: u64,
}

impl<E, O, M> Fuzzer<E, O, M>
where
    E: Executor<Vec<u8>>,
    O: CoverageObserver,
{
    pub fn new(executor: E, observer: O, mutator: M, settings: SearchSettings) -> Self {
        Self {
            executor,
            observer,
            mutator,
            feedback: CoverageFeedback::new(),
            settings,
            accepted: Vec::new(),
            executions: 0,
        }
    }

    /// The currently accepted input.
    pub fn accepted(&self) -> &[u8] {
        &self.accepted
    }

    pub fn coverage(&self) -> &CoverageSet {
        self.feedback.global()
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Runs a full session starting from `input_len` random bytes.
    pub fn run<R>(
        &mut self,
        rng: &mut R,
        monitor: &mut dyn Monitor,
    ) -> Result<SessionSummary, anyhow::Error>
    where
        R: Rng + ?Sized,
        M: Mutator<Vec<u8>, R>,
    {
        let initial = random_input(self.settings.input_len, rng);
        self.run_from(initial, rng, monitor)
    }

    /// Runs a full session starting from `initial`.
    pub fn run_from<R>(
        &mut self,
        initial: Vec<u8>,
        rng: &mut R,
        monitor: &mut dyn Monitor,
    ) -> Result<SessionSummary, anyhow::Error>
    where
        R: Rng + ?Sized,
        M: Mutator<Vec<u8>, R>,
    {
        info!(
            "Starting search over {} byte(s), attempt cap {:?}",
            initial.len(),
            self.settings.max_attempts_per_position
        );

        let baseline = self.execute(&initial)?;
        let total = self.feedback.init(&baseline);
        self.accepted = initial;
        monitor.on_event(&SearchEvent::Baseline {
            total,
            input: &self.accepted,
        });

        let mut hits = 0;
        let mut abandoned_positions = Vec::new();
        for position in 0..self.accepted.len() {
            match self.settle_position(position, rng, monitor)? {
                PositionOutcome::Hit => hits += 1,
                PositionOutcome::GaveUp => abandoned_positions.push(position),
            }
        }

        let summary = SessionSummary {
            input: self.accepted.clone(),
            input_md5: format!("{:x}", md5::compute(&self.accepted)),
            total_coverage: self.feedback.total(),
            executions: self.executions,
            hits,
            abandoned_positions,
        };
        info!(
            "Search finished: {} traces after {} executions, {} hit(s), {} position(s) abandoned",
            summary.total_coverage,
            summary.executions,
            summary.hits,
            summary.abandoned_positions.len()
        );
        Ok(summary)
    }

    fn settle_position<R>(
        &mut self,
        position: usize,
        rng: &mut R,
        monitor: &mut dyn Monitor,
    ) -> Result<PositionOutcome, anyhow::Error>
    where
        R: Rng + ?Sized,
        M: Mutator<Vec<u8>, R>,
    {
        let mut attempts: u64 = 0;
        loop {
            if let Some(cap) = self.settings.max_attempts_per_position {
                if attempts >= cap {
                    warn!(
                        "No new coverage at position {position} after {attempts} attempts, moving on"
                    );
                    monitor.on_event(&SearchEvent::GaveUp { position, attempts });
                    return Ok(PositionOutcome::GaveUp);
                }
            }
            attempts += 1;

            let candidate = self.mutator.mutate(&self.accepted, position, rng)?;
            let coverage = self.execute(&candidate)?;
            if !self.feedback.is_interesting(&coverage) {
                continue;
            }

            let total = self.feedback.commit(&coverage);
            self.accepted = candidate;
            debug!(
                "Position {position} settled to {:#04x} after {attempts} attempt(s), input md5 {:x}",
                self.accepted[position],
                md5::compute(&self.accepted)
            );
            monitor.on_event(&SearchEvent::NewCoverage {
                position,
                attempts,
                total,
                input: &self.accepted,
            });
            return Ok(PositionOutcome::Hit);
        }
    }

    fn execute(&mut self, input: &Vec<u8>) -> Result<CoverageSet, anyhow::Error> {
        let status = {
            let mut observers: [&mut dyn Observer; 1] = [&mut self.observer];
            self.executor.execute_sync(input, &mut observers)?
        };
        self.executions += 1;
        let coverage = self.observer.take_coverage();
        debug!(
            "Execution {}: {status:?}, {} location(s)",
            self.executions,
            coverage.len()
        );
        Ok(coverage)
    }
}
