use crate::coverage::CoverageSet;

/// Owns the cumulative coverage of a session and decides which executions
/// count as hits.
///
/// The global set only ever grows: it starts from the baseline run and every
/// committed execution is unioned into it.
#[derive(Debug, Default, Clone)]
pub struct CoverageFeedback {
    global: CoverageSet,
}

impl CoverageFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &'static str {
        "CoverageFeedback"
    }

    /// Seeds the global set with the coverage of the baseline execution.
    pub fn init(&mut self, baseline: &CoverageSet) -> usize {
        self.global.merge(baseline);
        self.global.len()
    }

    /// Whether unioning `coverage` into the global set would strictly grow it.
    pub fn is_interesting(&self, coverage: &CoverageSet) -> bool {
        self.global.count_new(coverage) > 0
    }

    /// Unions `coverage` into the global set and returns the new total.
    pub fn commit(&mut self, coverage: &CoverageSet) -> usize {
        self.global.merge(coverage);
        self.global.len()
    }

    pub fn global(&self) -> &CoverageSet {
        &self.global
    }

    pub fn total(&self) -> usize {
        self.global.len()
    }
}
