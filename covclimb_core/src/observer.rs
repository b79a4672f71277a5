use crate::coverage::CoverageSet;
use crate::executor::{ExecutionStatus, ProcessOutput};
use crate::trace::{self, DEFAULT_TRACE_EXTENSION};
use log::warn;
use std::any::Any;
use std::path::{Path, PathBuf};

/// An `Observer` monitors the execution of a target with a given input and
/// collects data about that execution.
///
/// Observers are invoked by an `Executor` before (`pre_exec`) and after
/// (`post_exec`) the target is run. Any error they return is fatal for the
/// execution and is propagated by the executor.
pub trait Observer {
    /// Returns a static string name identifying the observer.
    fn name(&self) -> &'static str;

    /// Called by the `Executor` immediately before the target program is executed.
    ///
    /// Typically resets whatever the previous execution left behind.
    fn pre_exec(&mut self) -> Result<(), anyhow::Error>;

    /// Called by the `Executor` once the target has fully finished.
    ///
    /// # Arguments
    /// * `status`: The `ExecutionStatus` reported by the `Executor`.
    /// * `target_output`: Executor-specific data about the run. `CommandExecutor`
    ///   passes a `ProcessOutput`; in-process executors pass `None`.
    /// * `input`: The bytes that were just executed.
    fn post_exec(
        &mut self,
        status: &ExecutionStatus,
        target_output: Option<&dyn Any>,
        input: &[u8],
    ) -> Result<(), anyhow::Error>;

    /// Drops any data collected so far.
    fn reset(&mut self) -> Result<(), anyhow::Error>;
}

/// An observer whose product is the coverage of the last execution.
pub trait CoverageObserver: Observer {
    /// Coverage of the most recent execution; empty after a reset.
    fn coverage(&self) -> &CoverageSet;

    /// Moves the coverage of the most recent execution out, leaving it empty.
    fn take_coverage(&mut self) -> CoverageSet;
}

/// An observer that performs no actions and collects no data.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoOpObserver;

impl Observer for NoOpObserver {
    fn name(&self) -> &'static str {
        "NoOpObserver"
    }

    fn pre_exec(&mut self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    fn post_exec(
        &mut self,
        _status: &ExecutionStatus,
        _target_output: Option<&dyn Any>,
        _input: &[u8],
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }

    fn reset(&mut self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Collects SanitizerCoverage traces written by a child process.
///
/// After each run it looks up `<module>.<pid>.<extension>` files of the
/// child's pid in `trace_dir`, decodes them and deletes them. A run that left
/// no trace file is an error: the target is not instrumented, or the
/// instrumentation was not told to dump coverage.
#[derive(Debug, Clone)]
pub struct SancovObserver {
    trace_dir: PathBuf,
    extension: String,
    last_coverage: CoverageSet,
}

impl SancovObserver {
    pub fn new(trace_dir: impl Into<PathBuf>) -> Self {
        Self::with_extension(trace_dir, DEFAULT_TRACE_EXTENSION)
    }

    pub fn with_extension(trace_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            trace_dir: trace_dir.into(),
            extension: extension.into(),
            last_coverage: CoverageSet::new(),
        }
    }

    pub fn trace_dir(&self) -> &Path {
        &self.trace_dir
    }
}

impl Observer for SancovObserver {
    fn name(&self) -> &'static str {
        "SancovObserver"
    }

    fn pre_exec(&mut self) -> Result<(), anyhow::Error> {
        self.reset()
    }

    fn post_exec(
        &mut self,
        status: &ExecutionStatus,
        target_output: Option<&dyn Any>,
        _input: &[u8],
    ) -> Result<(), anyhow::Error> {
        let output = target_output
            .and_then(|out| out.downcast_ref::<ProcessOutput>())
            .ok_or_else(|| {
                anyhow::anyhow!("SancovObserver needs the ProcessOutput of a spawned target")
            })?;

        if *status == ExecutionStatus::Timeout {
            // A killed child may have dumped partial coverage or none at all.
            let removed = trace::discard_traces(&self.trace_dir, output.pid, &self.extension)?;
            warn!(
                "Target pid {} timed out, discarded {removed} trace file(s)",
                output.pid
            );
            self.last_coverage = CoverageSet::new();
            return Ok(());
        }

        self.last_coverage = trace::collect_coverage(&self.trace_dir, output.pid, &self.extension)?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), anyhow::Error> {
        self.last_coverage = CoverageSet::new();
        Ok(())
    }
}

impl CoverageObserver for SancovObserver {
    fn coverage(&self) -> &CoverageSet {
        &self.last_coverage
    }

    fn take_coverage(&mut self) -> CoverageSet {
        std::mem::take(&mut self.last_coverage)
    }
}

/// Derives coverage directly from the executed bytes through a closure.
///
/// Stands in for real instrumentation when the target is an in-process
/// harness, which makes the search engine testable without spawning anything.
pub struct MockCoverageObserver<F>
where
    F: FnMut(&[u8]) -> CoverageSet,
{
    coverage_fn: F,
    last_coverage: CoverageSet,
}

impl<F> MockCoverageObserver<F>
where
    F: FnMut(&[u8]) -> CoverageSet,
{
    pub fn new(coverage_fn: F) -> Self {
        Self {
            coverage_fn,
            last_coverage: CoverageSet::new(),
        }
    }
}

impl<F> Observer for MockCoverageObserver<F>
where
    F: FnMut(&[u8]) -> CoverageSet,
{
    fn name(&self) -> &'static str {
        "MockCoverageObserver"
    }

    fn pre_exec(&mut self) -> Result<(), anyhow::Error> {
        self.reset()
    }

    fn post_exec(
        &mut self,
        _status: &ExecutionStatus,
        _target_output: Option<&dyn Any>,
        input: &[u8],
    ) -> Result<(), anyhow::Error> {
        self.last_coverage = (self.coverage_fn)(input);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), anyhow::Error> {
        self.last_coverage = CoverageSet::new();
        Ok(())
    }
}

impl<F> CoverageObserver for MockCoverageObserver<F>
where
    F: FnMut(&[u8]) -> CoverageSet,
{
    fn coverage(&self) -> &CoverageSet {
        &self.last_coverage
    }

    fn take_coverage(&mut self) -> CoverageSet {
        std::mem::take(&mut self.last_coverage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::Location;
    use crate::trace::{TraceError, WordSize, encode_trace};
    use std::fs;
    use tempfile::tempdir;

    fn process_output(pid: u32) -> ProcessOutput {
        ProcessOutput {
            pid,
            exit_code: Some(0),
            signal: None,
        }
    }

    #[test]
    fn no_op_observer_behaves_as_expected() {
        let mut observer = NoOpObserver;
        assert_eq!(observer.name(), "NoOpObserver");
        assert!(observer.pre_exec().is_ok());
        assert!(observer.post_exec(&ExecutionStatus::Ok, None, &[1, 2, 3]).is_ok());
        assert!(observer.reset().is_ok());
    }

    #[test]
    fn sancov_observer_decodes_traces_of_the_reported_pid() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("target.321.sancov"),
            encode_trace(WordSize::Bits32, &[0x10, 0x11]).unwrap(),
        )
        .unwrap();

        let mut observer = SancovObserver::new(dir.path());
        observer.pre_exec().unwrap();
        let output = process_output(321);
        observer
            .post_exec(&ExecutionStatus::Ok, Some(&output as &dyn Any), &[])
            .unwrap();

        assert_eq!(observer.coverage().len(), 2);
        assert!(observer.coverage().contains(&Location::new("target", 0x11)));
        assert!(!dir.path().join("target.321.sancov").exists());

        let taken = observer.take_coverage();
        assert_eq!(taken.len(), 2);
        assert!(observer.coverage().is_empty());
    }

    #[test]
    fn sancov_observer_collects_coverage_of_crashed_runs() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("target.9.sancov"),
            encode_trace(WordSize::Bits64, &[0xabc]).unwrap(),
        )
        .unwrap();

        let mut observer = SancovObserver::new(dir.path());
        let output = ProcessOutput {
            pid: 9,
            exit_code: None,
            signal: Some(11),
        };
        let status = ExecutionStatus::Crash("Terminated by signal 11".to_string());
        observer.post_exec(&status, Some(&output as &dyn Any), &[]).unwrap();
        assert_eq!(observer.coverage().tokens(), vec!["target+abc".to_string()]);
    }

    #[test]
    fn sancov_observer_fails_when_no_trace_was_written() {
        let dir = tempdir().unwrap();
        let mut observer = SancovObserver::new(dir.path());
        let output = process_output(4242);
        let err = observer
            .post_exec(&ExecutionStatus::Ok, Some(&output as &dyn Any), &[])
            .unwrap_err();
        match err.downcast_ref::<TraceError>() {
            Some(TraceError::MissingTraces { pid, .. }) => assert_eq!(*pid, 4242),
            other => panic!("Expected MissingTraces, got {other:?}"),
        }
    }

    #[test]
    fn sancov_observer_discards_traces_of_timed_out_runs() {
        let dir = tempdir().unwrap();
        let partial = dir.path().join("target.77.sancov");
        fs::write(&partial, [0x32, 0xff]).unwrap();

        let mut observer = SancovObserver::new(dir.path());
        let output = process_output(77);
        observer
            .post_exec(&ExecutionStatus::Timeout, Some(&output as &dyn Any), &[])
            .unwrap();
        assert!(observer.coverage().is_empty());
        assert!(!partial.exists());

        // Nothing written at all is fine for a timed-out run too.
        observer
            .post_exec(&ExecutionStatus::Timeout, Some(&output as &dyn Any), &[])
            .unwrap();
    }

    #[test]
    fn sancov_observer_requires_process_output() {
        let dir = tempdir().unwrap();
        let mut observer = SancovObserver::new(dir.path());
        assert!(observer.post_exec(&ExecutionStatus::Ok, None, &[]).is_err());
    }

    #[test]
    fn mock_coverage_observer_maps_input_to_coverage() {
        let mut observer = MockCoverageObserver::new(|data: &[u8]| {
            data.iter()
                .map(|&b| Location::new("mock", u64::from(b)))
                .collect()
        });
        assert_eq!(observer.name(), "MockCoverageObserver");
        observer.pre_exec().unwrap();
        observer.post_exec(&ExecutionStatus::Ok, None, &[1, 1, 2]).unwrap();
        assert_eq!(
            observer.coverage().tokens(),
            vec!["mock+1".to_string(), "mock+2".to_string()]
        );
        observer.reset().unwrap();
        assert!(observer.coverage().is_empty());
    }
}
