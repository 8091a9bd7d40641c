//! Error types for pipeline operations.

use thiserror::Error;

use crate::runner::RunnerError;

/// Errors returned by pipeline `prepare` and `run`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// One or more steps failed.
    ///
    /// The display form is the full report: one
    /// `Step '<name>' failed with error: <message>` entry per failed step, in
    /// discovery order, joined with `; `.
    #[error("{report}")]
    StepsFailed {
        /// The semicolon-joined failure report.
        report: String,
        /// Names of the failed steps, in discovery order.
        failed_steps: Vec<String>,
    },

    /// Cancellation was observed before any step failure was recorded.
    #[error("pipeline run was cancelled")]
    Cancelled,

    /// The pipeline has been closed; no further prepare/run calls are valid.
    #[error("pipeline has been closed")]
    Closed,

    /// Step building failed; `run` stays blocked until the pipeline is
    /// discarded.
    #[error("failed to build steps: {message}")]
    Prepare {
        /// The builder's failure message.
        message: String,
    },

    /// The step producer failed while yielding steps.
    ///
    /// This aborts the pipeline immediately and takes precedence over any
    /// step aggregate, independent of the fail-fast policy.
    #[error("step producer failed: {message}")]
    Producer {
        /// The producer's failure message.
        message: String,
    },

    /// An operation on the underlying runner failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}
