//! Integration tests for the streaming (producer-consumer) pipeline.
//!
//! Steps are pumped into running workers as the producer yields them. The
//! key asymmetry: a failure of the producer aborts the whole pipeline
//! immediately, independent of the fail-fast policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use stepflow::{
    PipelineConfig, PipelineError, Step, StepError, StepProducer, StepStream, StreamingPipeline,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Steps & Producers
// ============================================================================

struct RecordingStep {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingStep {
    fn shared(name: impl Into<String>, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Step> {
        Arc::new(Self {
            name: name.into(),
            log: Arc::clone(log),
        })
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _cancellation: CancellationToken) -> Result<(), StepError> {
        self.log.lock().await.push(self.name.clone());
        Ok(())
    }
}

struct FailingStep {
    name: String,
    message: String,
}

#[async_trait]
impl Step for FailingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _cancellation: CancellationToken) -> Result<(), StepError> {
        Err(StepError::failed(self.message.clone()))
    }
}

/// Yields a fixed item list as the step stream.
struct ItemsProducer {
    items: Vec<anyhow::Result<Arc<dyn Step>>>,
}

impl ItemsProducer {
    fn new(items: Vec<anyhow::Result<Arc<dyn Step>>>) -> Box<Self> {
        Box::new(Self { items })
    }
}

#[async_trait]
impl StepProducer for ItemsProducer {
    async fn produce(&mut self, _cancellation: &CancellationToken) -> anyhow::Result<StepStream> {
        Ok(stream::iter(std::mem::take(&mut self.items)).boxed())
    }
}

/// Yields steps with a delay between them, so workers are already draining
/// while production continues.
struct SlowProducer {
    names: Vec<String>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl StepProducer for SlowProducer {
    async fn produce(&mut self, _cancellation: &CancellationToken) -> anyhow::Result<StepStream> {
        let log = Arc::clone(&self.log);
        let names = std::mem::take(&mut self.names);
        let stream = stream::unfold(
            (names.into_iter(), log),
            |(mut names, log)| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let name = names.next()?;
                let step: anyhow::Result<Arc<dyn Step>> =
                    Ok(RecordingStep::shared(name, &log));
                Some((step, (names, log)))
            },
        );
        Ok(stream.boxed())
    }
}

/// Yields one good step, then never ends.
struct NeverEndingProducer {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl StepProducer for NeverEndingProducer {
    async fn produce(&mut self, _cancellation: &CancellationToken) -> anyhow::Result<StepStream> {
        let first: anyhow::Result<Arc<dyn Step>> =
            Ok(RecordingStep::shared("first", &self.log));
        Ok(stream::iter(vec![first]).chain(stream::pending()).boxed())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn all_produced_steps_execute() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let items = (0..5)
        .map(|i| Ok(RecordingStep::shared(format!("step_{i}"), &log)))
        .collect();
    let pipeline = StreamingPipeline::new(
        ItemsProducer::new(items),
        PipelineConfig::new().with_parallel_workers(2),
    );

    pipeline.run(CancellationToken::new()).await.unwrap();
    assert_eq!(log.lock().await.len(), 5);
    assert!(!pipeline.failed());
}

#[tokio::test]
async fn steps_are_consumed_while_still_being_produced() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = StreamingPipeline::new(
        Box::new(SlowProducer {
            names: (0..4).map(|i| format!("slow_{i}")).collect(),
            log: Arc::clone(&log),
        }),
        PipelineConfig::new().with_parallel_workers(2),
    );

    pipeline.run(CancellationToken::new()).await.unwrap();
    assert_eq!(log.lock().await.len(), 4);
}

#[tokio::test]
async fn producer_failure_aborts_even_when_fail_slow() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let items = vec![
        Ok(RecordingStep::shared("early", &log)),
        Err(anyhow::anyhow!("producer broke")),
    ];
    let pipeline = StreamingPipeline::new(
        ItemsProducer::new(items),
        PipelineConfig::new()
            .with_fail_fast(false)
            .with_parallel_workers(2),
    );

    let err = pipeline.run(CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "step producer failed: producer broke");
    assert!(pipeline.failed());
}

#[tokio::test]
async fn step_failures_aggregate_under_fail_slow() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let items: Vec<anyhow::Result<Arc<dyn Step>>> = vec![
        Ok(Arc::new(FailingStep {
            name: "bad".to_string(),
            message: "bust".to_string(),
        })),
        Ok(RecordingStep::shared("good", &log)),
    ];
    let pipeline = StreamingPipeline::new(
        ItemsProducer::new(items),
        PipelineConfig::new().with_fail_fast(false),
    );

    let err = pipeline.run(CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "Step 'bad' failed with error: bust");
    assert_eq!(*log.lock().await, vec!["good"]);
    assert!(pipeline.failed());
}

#[tokio::test]
async fn cancelled_before_production_is_a_cancellation_outcome() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let items = vec![Ok(RecordingStep::shared("queued", &log))];
    let pipeline = StreamingPipeline::new(ItemsProducer::new(items), PipelineConfig::new());

    let token = CancellationToken::new();
    token.cancel();

    let err = pipeline.run(token).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert!(!pipeline.failed());
}

#[tokio::test]
async fn explicit_cancel_ends_an_open_ended_run() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = StreamingPipeline::new(
        Box::new(NeverEndingProducer {
            log: Arc::clone(&log),
        }),
        PipelineConfig::new().with_parallel_workers(2),
    );

    let (outcome, ()) = tokio::join!(pipeline.run(CancellationToken::new()), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        pipeline.cancel();
    });

    assert!(matches!(outcome.unwrap_err(), PipelineError::Cancelled));
    // The step produced before cancellation still ran to completion.
    assert_eq!(*log.lock().await, vec!["first"]);
}

#[tokio::test]
async fn closed_pipeline_rejects_run() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let items = vec![Ok(RecordingStep::shared("queued", &log))];
    let pipeline = StreamingPipeline::new(ItemsProducer::new(items), PipelineConfig::new());

    pipeline.close().await;
    assert!(matches!(
        pipeline.run(CancellationToken::new()).await.unwrap_err(),
        PipelineError::Closed
    ));
}
