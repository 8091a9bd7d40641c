//! Pipelines: prepare a step set, drive a runner, aggregate failures.
//!
//! A pipeline orchestrates two idempotent phases. **Prepare** builds the step
//! set exactly once, no matter how often it is called. **Run** creates the
//! runner (once), feeds it, waits for it to quiesce, and converts the
//! recorded per-step failures into a single [`PipelineError::StepsFailed`]
//! according to the fail-fast/fail-slow policy.
//!
//! [`Pipeline`] materializes its full step set up front; use
//! [`StreamingPipeline`] when steps are produced lazily while workers are
//! already draining.

pub mod config;
pub mod error;
mod streaming;

pub use config::{Concurrency, PipelineConfig};
pub use error::PipelineError;
pub use streaming::{StepProducer, StepStream, StreamingPipeline};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::runner::{ExecutedStep, FailureAction, FailureListener, StepFailure, StepRunner};
use crate::step::Step;

/// Builds the full step set for a batch [`Pipeline`].
///
/// Invoked at most once per pipeline instance; a failure is remembered and
/// keeps blocking `run` on later calls.
#[async_trait]
pub trait StepBuilder: Send + Sync {
    /// Builds the steps, in the order a sequential pipeline should run them.
    async fn build(
        &mut self,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<Vec<Arc<dyn Step>>>;
}

/// A batch pipeline: the step set is materialized once, then executed.
pub struct Pipeline {
    config: PipelineConfig,
    state: AsyncMutex<PipelineState>,
    cancel_source: CancellationToken,
    failed: AtomicBool,
    closed: AtomicBool,
}

struct PipelineState {
    builder: Option<Box<dyn StepBuilder>>,
    steps: Option<Vec<Arc<dyn Step>>>,
    build_error: Option<String>,
    runner: Option<Arc<StepRunner>>,
    run_token: Option<CancellationToken>,
}

impl Pipeline {
    /// Creates a pipeline over the given step builder.
    pub fn new(builder: Box<dyn StepBuilder>, config: PipelineConfig) -> Self {
        Self {
            config,
            state: AsyncMutex::new(PipelineState {
                builder: Some(builder),
                steps: None,
                build_error: None,
                runner: None,
                run_token: None,
            }),
            cancel_source: CancellationToken::new(),
            failed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// True once a run has recorded step failures (or a producer failure).
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Builds the step set. Idempotent: only the first call builds.
    pub async fn prepare(&self, cancellation: CancellationToken) -> Result<(), PipelineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if state.steps.is_some() {
            return Ok(());
        }
        if let Some(message) = &state.build_error {
            return Err(PipelineError::Prepare {
                message: message.clone(),
            });
        }
        let Some(mut builder) = state.builder.take() else {
            return Err(PipelineError::Prepare {
                message: "step builder unavailable".to_string(),
            });
        };
        match builder.build(&cancellation).await {
            Ok(steps) => {
                debug!(count = steps.len(), "step set built");
                state.steps = Some(steps);
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                state.build_error = Some(message.clone());
                Err(PipelineError::Prepare { message })
            }
        }
    }

    /// Runs the pipeline to completion.
    ///
    /// Prepares first if needed, executes the steps under the configured
    /// policy, and waits for the runner to quiesce before evaluating the
    /// outcome. Under fail-fast this means in-flight steps are still given
    /// the chance to unwind.
    pub async fn run(&self, cancellation: CancellationToken) -> Result<(), PipelineError> {
        self.ensure_open()?;
        self.prepare(cancellation.clone()).await?;

        let (runner, run_token) = {
            let mut state = self.state.lock().await;
            if let (Some(runner), Some(token)) = (&state.runner, &state.run_token) {
                (Arc::clone(runner), token.clone())
            } else {
                let runner = Arc::new(match self.config.concurrency {
                    Concurrency::Sequential => StepRunner::sequential(),
                    Concurrency::Parallel { workers } => StepRunner::parallel(workers),
                });
                runner.set_failure_listener(Arc::new(PolicyListener {
                    fail_fast: self.config.fail_fast,
                }));

                let steps = state.steps.as_ref().map(Vec::as_slice).unwrap_or_default();
                for step in steps {
                    runner.add_step(Arc::clone(step))?;
                }

                let run_token = linked_token(&cancellation, &self.cancel_source);
                info!(
                    steps = steps.len(),
                    workers = runner.worker_count(),
                    fail_fast = self.config.fail_fast,
                    "pipeline run started"
                );
                runner.start(run_token.clone());
                state.runner = Some(Arc::clone(&runner));
                state.run_token = Some(run_token.clone());
                (runner, run_token)
            }
        };

        // The runner's aggregate is step-level detail; the pipeline derives
        // its own report from the executed set below.
        let _ = runner.wait().await;

        let outcome = evaluate(&runner.executed_steps(), run_token.is_cancelled());
        if matches!(outcome, Err(PipelineError::StepsFailed { .. })) {
            self.failed.store(true, Ordering::SeqCst);
        }
        outcome
    }

    /// Requests cancellation of the current (or next) run.
    ///
    /// This triggers the pipeline's internal cancellation source, which is
    /// linked with the caller token for each run.
    pub fn cancel(&self) {
        self.cancel_source.cancel();
    }

    /// Tears the pipeline down: drops the runner and every step it owns.
    ///
    /// Idempotent. Any later `prepare`/`run` call fails with
    /// [`PipelineError::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_source.cancel();
        let mut state = self.state.lock().await;
        state.runner = None;
        state.steps = None;
        state.builder = None;
    }

    fn ensure_open(&self) -> Result<(), PipelineError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PipelineError::Closed)
        } else {
            Ok(())
        }
    }
}

/// The pipeline's failure listener: under fail-fast, the first real failure
/// halts dispatch of everything still queued.
pub(crate) struct PolicyListener {
    pub(crate) fail_fast: bool,
}

impl FailureListener for PolicyListener {
    fn on_step_failure(&self, failure: &StepFailure) -> FailureAction {
        if self.fail_fast && !failure.cancelled {
            info!(step = %failure.step, "fail-fast: halting remaining steps");
            FailureAction::HaltPending
        } else {
            FailureAction::Continue
        }
    }
}

/// Merges the caller token and the pipeline's internal cancellation source
/// into one token for this run, so either alone stops dispatch.
pub(crate) fn linked_token(
    caller: &CancellationToken,
    internal: &CancellationToken,
) -> CancellationToken {
    let linked = CancellationToken::new();
    // An already-cancelled source must take effect before any worker can
    // dispatch, so it is checked here rather than left to the forwarder.
    if caller.is_cancelled() || internal.is_cancelled() {
        linked.cancel();
        return linked;
    }
    let forward = linked.clone();
    let caller = caller.clone();
    let internal = internal.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = caller.cancelled() => forward.cancel(),
            _ = internal.cancelled() => forward.cancel(),
        }
    });
    linked
}

/// Converts the executed-step record into the pipeline outcome.
///
/// Steps whose recorded error is a cancellation were attempted but are not
/// failures; if only cancellations were recorded the run reports
/// [`PipelineError::Cancelled`].
pub(crate) fn evaluate(
    executed: &[ExecutedStep],
    cancelled: bool,
) -> Result<(), PipelineError> {
    let mut failed_steps = Vec::new();
    let mut entries = Vec::new();
    for record in executed {
        if let Some(err) = record.error() {
            if err.is_cancelled() {
                continue;
            }
            failed_steps.push(record.name().to_string());
            entries.push(format!(
                "Step '{}' failed with error: {}",
                record.name(),
                err
            ));
        }
    }

    if !entries.is_empty() {
        return Err(PipelineError::StepsFailed {
            report: entries.join("; "),
            failed_steps,
        });
    }
    if cancelled {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepError;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Step for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _cancellation: CancellationToken) -> Result<(), StepError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn evaluate_reports_failures_in_discovery_order() {
        let runner = StepRunner::sequential();
        runner.add_step(Arc::new(Named("a"))).unwrap();
        runner.run(CancellationToken::new()).await.unwrap();

        let mut executed = runner.executed_steps();
        // Attach a failure record by re-running a failing step through a
        // second runner, then combining the snapshots.
        let failing = StepRunner::sequential();
        struct Bad;
        #[async_trait]
        impl Step for Bad {
            fn name(&self) -> &str {
                "bad"
            }
            async fn run(&self, _c: CancellationToken) -> Result<(), StepError> {
                Err(StepError::failed("boom"))
            }
        }
        failing.add_step(Arc::new(Bad)).unwrap();
        let _ = failing.run(CancellationToken::new()).await;
        executed.extend(failing.executed_steps());

        let err = evaluate(&executed, false).unwrap_err();
        match err {
            PipelineError::StepsFailed {
                report,
                failed_steps,
            } => {
                assert_eq!(report, "Step 'bad' failed with error: boom");
                assert_eq!(failed_steps, vec!["bad".to_string()]);
            }
            other => panic!("unexpected outcome: {other}"),
        }
    }

    #[tokio::test]
    async fn evaluate_prefers_failures_over_cancellation() {
        let failing = StepRunner::sequential();
        struct Bad;
        #[async_trait]
        impl Step for Bad {
            fn name(&self) -> &str {
                "bad"
            }
            async fn run(&self, _c: CancellationToken) -> Result<(), StepError> {
                Err(StepError::failed("boom"))
            }
        }
        failing.add_step(Arc::new(Bad)).unwrap();
        let _ = failing.run(CancellationToken::new()).await;

        let err = evaluate(&failing.executed_steps(), true).unwrap_err();
        assert!(matches!(err, PipelineError::StepsFailed { .. }));
    }

    #[test]
    fn evaluate_empty_set_succeeds() {
        assert!(evaluate(&[], false).is_ok());
        assert!(matches!(
            evaluate(&[], true),
            Err(PipelineError::Cancelled)
        ));
    }
}
