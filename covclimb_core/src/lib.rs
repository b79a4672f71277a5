pub mod config;
pub mod coverage;
pub mod executor;
pub mod feedback;
pub mod fuzzer;
pub mod input;
pub mod monitor;
pub mod mutator;
pub mod observer;
pub mod trace;

pub use config::CovclimbConfig;
pub use coverage::{CoverageSet, Location};
pub use executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionStatus, Executor, InProcessExecutor,
};
pub use feedback::CoverageFeedback;
pub use fuzzer::{Fuzzer, SearchSettings, SessionSummary};
pub use input::Input;
pub use monitor::{ConsoleMonitor, Monitor, SearchEvent};
pub use mutator::{Mutator, ReplaceByteMutator};
pub use observer::{
    CoverageObserver, MockCoverageObserver, NoOpObserver, Observer, SancovObserver,
};
pub use trace::{TraceError, WordSize};
