//! The runner engine: workers draining a step queue under a concurrency
//! policy.
//!
//! One engine type, [`StepRunner`], covers all three execution shapes. The
//! queue strategy chosen at construction decides the semantics:
//!
//! - [`sequential`](StepRunner::sequential): one worker over a FIFO queue;
//!   execution order equals enqueue order, including steps added mid-run.
//! - [`parallel`](StepRunner::parallel): N workers over a pre-populated FIFO
//!   queue; late additions are consumed opportunistically.
//! - [`producer_consumer`](StepRunner::producer_consumer): N workers over a
//!   sealable queue with blocking take; producers call
//!   [`add_step`](StepRunner::add_step) and [`finish`](StepRunner::finish)
//!   while the workers are already running.
//!
//! A runner never fails synchronously on a single step: failures are recorded
//! on the executed-step record, pushed into the runner's error bag, and
//! reported through the synchronous [`FailureListener`], whose answer can halt
//! further dispatch before the next step is taken.

pub mod error;
pub mod queue;

pub use error::RunnerError;
pub use queue::{FifoQueue, SealableQueue, StepQueue};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::diagnostics;
use crate::step::{Step, StepError};

/// Record of a step whose `run` was invoked, failed ones included.
///
/// Steps that were merely queued but never started do not appear here.
#[derive(Clone)]
pub struct ExecutedStep {
    step: Arc<dyn Step>,
    error: Option<Arc<StepError>>,
}

impl ExecutedStep {
    /// The executed step.
    pub fn step(&self) -> &Arc<dyn Step> {
        &self.step
    }

    /// The step's display name.
    pub fn name(&self) -> &str {
        self.step.name()
    }

    /// The error captured from a failing `run`, if any.
    pub fn error(&self) -> Option<&StepError> {
        self.error.as_deref()
    }
}

impl std::fmt::Debug for ExecutedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutedStep")
            .field("name", &self.name())
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

/// A step-failure notification, delivered synchronously from the worker that
/// observed the failure.
#[derive(Debug, Clone)]
pub struct StepFailure {
    /// Name of the failed step.
    pub step: String,
    /// The captured error.
    pub error: Arc<StepError>,
    /// True if cancellation was already in effect when the failure was
    /// recorded (caller token, sticky flag, or the error itself).
    pub cancelled: bool,
}

/// The listener's verdict on a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Keep dispatching queued steps.
    Continue,
    /// Halt dispatch of all pending steps; in-flight steps finish on their
    /// own terms.
    HaltPending,
}

/// Receives step failures as they are recorded.
///
/// The notification is synchronous: the worker does not take another step
/// until the listener has answered, so a `HaltPending` verdict reliably
/// prevents queued siblings from starting.
pub trait FailureListener: Send + Sync {
    /// Called once per failed step, from the worker that ran it.
    fn on_step_failure(&self, failure: &StepFailure) -> FailureAction;
}

/// The step-execution engine.
pub struct StepRunner {
    queue: Arc<dyn StepQueue>,
    worker_count: usize,
    executed: Arc<Mutex<Vec<ExecutedStep>>>,
    errors: Arc<Mutex<Vec<RunnerError>>>,
    listener: Arc<Mutex<Option<Arc<dyn FailureListener>>>>,
    /// Sticky cancellation: once set it is never cleared, and no further
    /// steps are dispatched. Distinct from the caller's token.
    halt: CancellationToken,
    /// Graceful-stop latch, set by a `StopRequested` step.
    stop: CancellationToken,
    started: AtomicBool,
    done_tx: Arc<watch::Sender<bool>>,
    done_rx: watch::Receiver<bool>,
}

impl StepRunner {
    /// A runner with a custom queue strategy.
    pub fn with_queue(queue: Arc<dyn StepQueue>, workers: usize) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            queue,
            worker_count: workers.max(1),
            executed: Arc::new(Mutex::new(Vec::new())),
            errors: Arc::new(Mutex::new(Vec::new())),
            listener: Arc::new(Mutex::new(None)),
            halt: CancellationToken::new(),
            stop: CancellationToken::new(),
            started: AtomicBool::new(false),
            done_tx: Arc::new(done_tx),
            done_rx,
        }
    }

    /// One worker draining a FIFO queue in enqueue order.
    pub fn sequential() -> Self {
        Self::with_queue(Arc::new(FifoQueue::new()), 1)
    }

    /// N workers draining a pre-populated FIFO queue.
    pub fn parallel(workers: usize) -> Self {
        Self::with_queue(Arc::new(FifoQueue::new()), workers)
    }

    /// N workers draining a sealable producer-consumer queue.
    pub fn producer_consumer(workers: usize) -> Self {
        Self::with_queue(Arc::new(SealableQueue::new()), workers)
    }

    /// Number of workers this runner dispatches on.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Queues a step.
    ///
    /// Steps queued before [`start`](Self::start) are guaranteed consumed;
    /// whether later additions are picked up depends on the queue strategy.
    pub fn add_step(&self, step: Arc<dyn Step>) -> Result<(), RunnerError> {
        self.queue.push(step)
    }

    /// Seals the queue: no more additions, workers finish the remainder.
    pub fn finish(&self) {
        self.queue.seal();
    }

    /// Installs the failure listener. Replaces any previous listener.
    pub fn set_failure_listener(&self, listener: Arc<dyn FailureListener>) {
        *self.listener.lock().expect("listener lock poisoned") = Some(listener);
    }

    /// Snapshot of every step whose `run` was invoked, in discovery order.
    pub fn executed_steps(&self) -> Vec<ExecutedStep> {
        self.executed.lock().expect("executed lock poisoned").clone()
    }

    /// The aggregate union of all worker errors, if any were recorded.
    pub fn error(&self) -> Option<RunnerError> {
        let errors = self.errors.lock().expect("errors lock poisoned");
        if errors.is_empty() {
            None
        } else {
            Some(RunnerError::Aggregate(errors.clone()))
        }
    }

    /// True once the sticky cancellation flag has been raised.
    pub fn halted(&self) -> bool {
        self.halt.is_cancelled()
    }

    /// Spawns the workers. Idempotent; only the first call has an effect.
    ///
    /// Workers check `cancellation` and the sticky flag before every
    /// dispatch; a running step receives `cancellation` and is expected to
    /// observe it itself.
    pub fn start(&self, cancellation: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = Vec::with_capacity(self.worker_count);
        for worker in 0..self.worker_count {
            let ctx = WorkerContext {
                queue: Arc::clone(&self.queue),
                executed: Arc::clone(&self.executed),
                errors: Arc::clone(&self.errors),
                listener: Arc::clone(&self.listener),
                token: cancellation.clone(),
                halt: self.halt.clone(),
                stop: self.stop.clone(),
            };
            let span = info_span!("runner_worker", worker);
            handles.push(tokio::spawn(drain(ctx).instrument(span)));
        }

        let errors = Arc::clone(&self.errors);
        let done = Arc::clone(&self.done_tx);
        tokio::spawn(async move {
            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => errors.lock().expect("errors lock poisoned").push(err),
                    Err(join_err) => errors
                        .lock()
                        .expect("errors lock poisoned")
                        .push(RunnerError::WorkerPanicked(join_err.to_string())),
                }
            }
            let _ = done.send(true);
        });
    }

    /// Starts the workers and waits for them to finish.
    ///
    /// The returned future completes when all workers have finished. Its
    /// completion and a concurrent [`wait`](Self::wait) call are raced
    /// independently; no ordering is promised between the two.
    pub async fn run(&self, cancellation: CancellationToken) -> Result<(), RunnerError> {
        self.start(cancellation);
        self.wait().await
    }

    /// Waits until all workers have finished, then re-throws the aggregate
    /// if any worker recorded an error.
    pub async fn wait(&self) -> Result<(), RunnerError> {
        self.completed().await;
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Like [`wait`](Self::wait), but bounds the block.
    ///
    /// On timeout the error is returned to the caller while background work
    /// continues unaffected.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), RunnerError> {
        if tokio::time::timeout(timeout, self.completed())
            .await
            .is_err()
        {
            return Err(RunnerError::WaitTimeout { timeout });
        }
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn completed(&self) {
        let mut rx = self.done_rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("worker_count", &self.worker_count)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("halted", &self.halted())
            .finish()
    }
}

struct WorkerContext {
    queue: Arc<dyn StepQueue>,
    executed: Arc<Mutex<Vec<ExecutedStep>>>,
    errors: Arc<Mutex<Vec<RunnerError>>>,
    listener: Arc<Mutex<Option<Arc<dyn FailureListener>>>>,
    token: CancellationToken,
    halt: CancellationToken,
    stop: CancellationToken,
}

impl WorkerContext {
    fn record(&self, step: Arc<dyn Step>, error: Option<Arc<StepError>>) {
        self.executed
            .lock()
            .expect("executed lock poisoned")
            .push(ExecutedStep { step, error });
    }
}

/// One worker's drain loop, shared by all runner variants.
async fn drain(ctx: WorkerContext) -> Result<(), RunnerError> {
    loop {
        if ctx.stop.is_cancelled() {
            return Ok(());
        }
        if ctx.token.is_cancelled() || ctx.halt.is_cancelled() {
            debug!("cancellation observed; worker stops dispatching");
            return Err(RunnerError::Cancelled);
        }

        let step = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return Err(RunnerError::Cancelled),
            _ = ctx.halt.cancelled() => return Err(RunnerError::Cancelled),
            _ = ctx.stop.cancelled() => return Ok(()),
            step = ctx.queue.take() => match step {
                Some(step) => step,
                None => return Ok(()),
            },
        };

        let name = step.name().to_string();
        debug!(step = %name, "step execution started");

        match step.run(ctx.token.clone()).await {
            Ok(()) => {
                ctx.record(step, None);
                debug!(step = %name, "step completed");
            }
            Err(StepError::StopRequested) => {
                // The sentinel is not a failure: record the step as executed
                // and latch the stop so every worker winds down.
                ctx.record(step, None);
                info!(step = %name, "step requested stop; halting dispatch");
                ctx.stop.cancel();
                return Ok(());
            }
            Err(err) => {
                let err = Arc::new(err);
                let cancelled =
                    ctx.token.is_cancelled() || ctx.halt.is_cancelled() || err.is_cancelled();

                ctx.record(step, Some(Arc::clone(&err)));
                ctx.errors
                    .lock()
                    .expect("errors lock poisoned")
                    .push(RunnerError::StepFailed {
                        step: name.clone(),
                        message: err.to_string(),
                    });

                warn!(step = %name, error = %err, cancelled, "step failed");
                diagnostics::sink().message(&format!("Step '{name}' failed with error: {err}"));

                let failure = StepFailure {
                    step: name,
                    error: Arc::clone(&err),
                    cancelled,
                };
                let action = {
                    let guard = ctx.listener.lock().expect("listener lock poisoned");
                    guard.as_ref().map(|l| l.on_step_failure(&failure))
                };

                if cancelled || action == Some(FailureAction::HaltPending) {
                    ctx.halt.cancel();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct OkStep(&'static str);

    #[async_trait]
    impl Step for OkStep {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _cancellation: CancellationToken) -> Result<(), StepError> {
            Ok(())
        }
    }

    #[test]
    fn worker_count_is_at_least_one() {
        assert_eq!(StepRunner::parallel(0).worker_count(), 1);
        assert_eq!(StepRunner::sequential().worker_count(), 1);
        assert_eq!(StepRunner::producer_consumer(4).worker_count(), 4);
    }

    #[tokio::test]
    async fn error_is_none_before_any_failure() {
        let runner = StepRunner::sequential();
        runner.add_step(Arc::new(OkStep("a"))).unwrap();
        runner.run(CancellationToken::new()).await.unwrap();

        assert!(runner.error().is_none());
        assert!(!runner.halted());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let runner = StepRunner::sequential();
        runner.add_step(Arc::new(OkStep("a"))).unwrap();

        let token = CancellationToken::new();
        runner.start(token.clone());
        runner.start(token);
        runner.wait().await.unwrap();

        assert_eq!(runner.executed_steps().len(), 1);
    }
}
