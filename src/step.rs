//! The step contract: the smallest schedulable unit of work.
//!
//! A [`Step`] is executed by a runner under a concurrency policy. It performs
//! its work in `run`, observing the supplied cancellation token, and reports
//! failure through [`StepError`].

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The outcome of a step that did not complete normally.
#[derive(Debug, Error)]
pub enum StepError {
    /// The step observed cancellation and unwound without finishing.
    #[error("step was cancelled")]
    Cancelled,

    /// Reserved sentinel: stop dispatching further queued steps.
    ///
    /// The step that raises this did not fail; the runner records it as
    /// executed and stops taking new work.
    #[error("runner stop requested")]
    StopRequested,

    /// Any other failure.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl StepError {
    /// Creates an ordinary failure from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(anyhow::anyhow!(message.into()))
    }

    /// Returns true if this error represents cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A unit of work scheduled by a runner.
///
/// Steps are shared as `Arc<dyn Step>`; the runner holding the last reference
/// owns their teardown. A step that touches shared external state must
/// synchronize itself: the engine only serializes access to its own
/// bookkeeping.
///
/// # Examples
///
/// ```ignore
/// use stepflow::step::{Step, StepError};
///
/// struct CopyStep { name: String }
///
/// #[async_trait::async_trait]
/// impl Step for CopyStep {
///     fn name(&self) -> &str {
///         &self.name
///     }
///
///     async fn run(&self, cancellation: CancellationToken) -> Result<(), StepError> {
///         if cancellation.is_cancelled() {
///             return Err(StepError::Cancelled);
///         }
///         // ... do the work ...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync {
    /// The step's display name, used in failure reports.
    fn name(&self) -> &str;

    /// Performs the work.
    ///
    /// Cancellation is cooperative: the engine checks the token between
    /// steps, but a running step is expected to observe it itself; the
    /// engine cannot forcibly abort it.
    async fn run(&self, cancellation: CancellationToken) -> Result<(), StepError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_error_preserves_message() {
        let err = StepError::failed("disk full");
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn cancelled_is_not_a_failure() {
        assert!(StepError::Cancelled.is_cancelled());
        assert!(!StepError::failed("x").is_cancelled());
    }
}
