//! Error types for runner operations.

use std::time::Duration;
use thiserror::Error;

/// Errors recorded or returned by a [`StepRunner`](super::StepRunner).
///
/// The runner never returns an error for a single step synchronously; step
/// failures are recorded and surface either through the failure listener or
/// through the aggregate that [`wait`](super::StepRunner::wait) re-throws.
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    /// The runner stopped dispatching because cancellation was observed
    /// before its queue was drained.
    #[error("runner was cancelled before draining its queue")]
    Cancelled,

    /// A step's `run` returned an error.
    #[error("step '{step}' failed: {message}")]
    StepFailed {
        /// Name of the failed step.
        step: String,
        /// The failure message, as reported by the step.
        message: String,
    },

    /// `wait_timeout` elapsed before the workers finished.
    ///
    /// In-flight work continues unaffected; only the caller's block is bounded.
    #[error("wait timed out after {timeout:?}")]
    WaitTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A step was added to a queue that has already been sealed.
    #[error("queue is sealed; no further steps can be added")]
    QueueSealed,

    /// A worker task panicked.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    /// The union of all errors recorded by all workers.
    #[error("runner finished with {} error(s)", .0.len())]
    Aggregate(Vec<RunnerError>),
}

impl RunnerError {
    /// Returns true if this error (or, for an aggregate, every contained
    /// error) represents cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Aggregate(errors) => {
                !errors.is_empty() && errors.iter().all(RunnerError::is_cancelled)
            }
            _ => false,
        }
    }
}
