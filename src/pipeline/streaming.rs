//! The producer-consumer pipeline: steps are produced lazily while workers
//! are already draining.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::{PipelineConfig, PipelineError, PolicyListener, evaluate, linked_token};
use crate::runner::StepRunner;
use crate::step::Step;

/// A lazily produced step sequence. Items may take arbitrarily long to
/// arrive, and the producer itself may fail mid-sequence.
pub type StepStream = BoxStream<'static, anyhow::Result<Arc<dyn Step>>>;

/// Creates the step stream for a [`StreamingPipeline`].
///
/// Invoked at most once per pipeline instance.
#[async_trait]
pub trait StepProducer: Send + Sync {
    /// Builds the lazy step sequence.
    async fn produce(&mut self, cancellation: &CancellationToken) -> anyhow::Result<StepStream>;
}

/// A pipeline whose steps are pumped into a running producer-consumer runner.
///
/// Workers start before the full step set exists; the stream is fed into
/// [`StepRunner::add_step`] concurrently with execution and the queue is
/// sealed once production ends. A failure of the *producer* aborts the whole
/// pipeline immediately, independent of the fail-fast policy; fail-fast only
/// governs failures of steps that were already produced.
pub struct StreamingPipeline {
    config: PipelineConfig,
    state: AsyncMutex<StreamingState>,
    cancel_source: CancellationToken,
    failed: AtomicBool,
    closed: AtomicBool,
}

struct StreamingState {
    producer: Option<Box<dyn StepProducer>>,
    stream: Option<StepStream>,
    produce_error: Option<String>,
    runner: Option<Arc<StepRunner>>,
    run_token: Option<CancellationToken>,
    pump: Option<JoinHandle<Result<(), String>>>,
    pump_error: Option<String>,
}

impl StreamingPipeline {
    /// Creates a streaming pipeline over the given step producer.
    pub fn new(producer: Box<dyn StepProducer>, config: PipelineConfig) -> Self {
        Self {
            config,
            state: AsyncMutex::new(StreamingState {
                producer: Some(producer),
                stream: None,
                produce_error: None,
                runner: None,
                run_token: None,
                pump: None,
                pump_error: None,
            }),
            cancel_source: CancellationToken::new(),
            failed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// True once a run has recorded step failures or a producer failure.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Creates the step stream. Idempotent: only the first call produces.
    pub async fn prepare(&self, cancellation: CancellationToken) -> Result<(), PipelineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if state.stream.is_some() || state.runner.is_some() {
            return Ok(());
        }
        if let Some(message) = &state.produce_error {
            return Err(PipelineError::Prepare {
                message: message.clone(),
            });
        }
        let Some(mut producer) = state.producer.take() else {
            return Err(PipelineError::Prepare {
                message: "step producer unavailable".to_string(),
            });
        };
        match producer.produce(&cancellation).await {
            Ok(stream) => {
                state.stream = Some(stream);
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                state.produce_error = Some(message.clone());
                Err(PipelineError::Prepare { message })
            }
        }
    }

    /// Runs the pipeline to completion.
    ///
    /// Starts the workers, pumps the stream into the queue concurrently, and
    /// seals the queue once production ends. The producer-failure asymmetry
    /// applies: a failed producer aborts everything at once.
    pub async fn run(&self, cancellation: CancellationToken) -> Result<(), PipelineError> {
        self.ensure_open()?;
        self.prepare(cancellation.clone()).await?;

        let (runner, run_token) = {
            let mut state = self.state.lock().await;
            if let (Some(runner), Some(token)) = (&state.runner, &state.run_token) {
                (Arc::clone(runner), token.clone())
            } else {
                let workers = self.config.concurrency.worker_count();
                let runner = Arc::new(StepRunner::producer_consumer(workers));
                runner.set_failure_listener(Arc::new(PolicyListener {
                    fail_fast: self.config.fail_fast,
                }));

                let run_token = linked_token(&cancellation, &self.cancel_source);
                info!(
                    workers,
                    fail_fast = self.config.fail_fast,
                    "streaming pipeline run started"
                );
                runner.start(run_token.clone());

                let stream = state.stream.take().ok_or_else(|| PipelineError::Prepare {
                    message: "step stream unavailable".to_string(),
                })?;
                state.pump = Some(tokio::spawn(pump(
                    stream,
                    Arc::clone(&runner),
                    run_token.clone(),
                )));
                state.runner = Some(Arc::clone(&runner));
                state.run_token = Some(run_token.clone());
                (runner, run_token)
            }
        };

        // Wait for production to end (or abort), then for the workers.
        let pump = {
            let mut state = self.state.lock().await;
            state.pump.take()
        };
        if let Some(handle) = pump {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(join_err.to_string()),
            };
            if let Err(message) = outcome {
                let mut state = self.state.lock().await;
                state.pump_error = Some(message);
            }
        }
        let _ = runner.wait().await;

        let producer_failure = {
            let state = self.state.lock().await;
            state.pump_error.clone()
        };
        if let Some(message) = producer_failure {
            self.failed.store(true, Ordering::SeqCst);
            return Err(PipelineError::Producer { message });
        }

        let outcome = evaluate(&runner.executed_steps(), run_token.is_cancelled());
        if matches!(outcome, Err(PipelineError::StepsFailed { .. })) {
            self.failed.store(true, Ordering::SeqCst);
        }
        outcome
    }

    /// Requests cancellation of the current (or next) run.
    pub fn cancel(&self) {
        self.cancel_source.cancel();
    }

    /// Tears the pipeline down. Idempotent; later calls fail with
    /// [`PipelineError::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_source.cancel();
        let mut state = self.state.lock().await;
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        state.runner = None;
        state.stream = None;
        state.producer = None;
    }

    fn ensure_open(&self) -> Result<(), PipelineError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PipelineError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Feeds the stream into the runner, sealing the queue when production ends.
///
/// A producer error cancels the run token so dispatch stops at once, then
/// surfaces as the pump outcome.
async fn pump(
    mut stream: StepStream,
    runner: Arc<StepRunner>,
    run_token: CancellationToken,
) -> Result<(), String> {
    loop {
        let next = tokio::select! {
            biased;
            _ = run_token.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            None => break,
            Some(Ok(step)) => {
                debug!(step = %step.name(), "step produced");
                if let Err(err) = runner.add_step(step) {
                    runner.finish();
                    return Err(err.to_string());
                }
            }
            Some(Err(err)) => {
                warn!(error = %err, "step producer failed; aborting pipeline");
                run_token.cancel();
                runner.finish();
                return Err(err.to_string());
            }
        }
    }
    runner.finish();
    Ok(())
}
