//! Configuration for pipeline execution.

use serde::{Deserialize, Serialize};

/// The concurrency policy a pipeline runs its steps under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Concurrency {
    /// One worker; execution order equals build order.
    Sequential,
    /// A pool of workers; only set-equality of executed steps is guaranteed.
    Parallel {
        /// Number of workers (clamped to at least 1).
        workers: usize,
    },
}

impl Concurrency {
    /// The number of runner workers this policy translates to.
    pub fn worker_count(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Parallel { workers } => (*workers).max(1),
        }
    }
}

/// Configuration for a pipeline.
///
/// # Examples
///
/// ```ignore
/// use stepflow::pipeline::PipelineConfig;
///
/// let config = PipelineConfig::new()
///     .with_fail_fast(false)
///     .with_parallel_workers(4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// When true, the first step failure halts dispatch of remaining steps;
    /// when false, everything already scheduled runs to completion before the
    /// aggregate failure is reported.
    pub fail_fast: bool,
    /// The concurrency policy.
    pub concurrency: Concurrency,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults: fail-fast, sequential.
    pub fn new() -> Self {
        Self {
            fail_fast: true,
            concurrency: Concurrency::Sequential,
        }
    }

    /// Sets the fail-fast policy.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Runs steps on a single worker in build order.
    pub fn with_sequential(mut self) -> Self {
        self.concurrency = Concurrency::Sequential;
        self
    }

    /// Runs steps on a pool of `workers` workers.
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.concurrency = Concurrency::Parallel { workers };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_sequential_fail_fast() {
        let config = PipelineConfig::default();
        assert!(config.fail_fast);
        assert_eq!(config.concurrency, Concurrency::Sequential);
        assert_eq!(config.concurrency.worker_count(), 1);
    }

    #[test]
    fn builder_chain() {
        let config = PipelineConfig::new()
            .with_fail_fast(false)
            .with_parallel_workers(4);

        assert!(!config.fail_fast);
        assert_eq!(config.concurrency.worker_count(), 4);
    }

    #[test]
    fn parallel_worker_count_is_at_least_one() {
        let config = PipelineConfig::new().with_parallel_workers(0);
        assert_eq!(config.concurrency.worker_count(), 1);
    }
}
