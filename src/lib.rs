//! 'stepflow' - A step-execution engine for Rust applications.
//!
//! This library executes sets of work units ("steps") under a concurrency
//! policy: sequentially, on a fixed worker pool, or as a producer-consumer
//! where steps are still being produced while workers drain them. It handles
//! the coordination that is easy to get wrong (cooperative cancellation,
//! dynamic step injection into a running queue, and fail-fast/fail-slow
//! failure aggregation) and leaves the work itself to your [`Step`]
//! implementations.
//!
//! # Layers
//!
//! - [`step`]: the unit-of-work contract.
//! - [`runner`]: the engine. Workers drain a queue strategy, with a sticky
//!   cancellation flag, a graceful-stop sentinel, and synchronous failure
//!   notification.
//! - [`pipeline`]: orchestration. Idempotent prepare/run phases convert
//!   recorded per-step failures into one aggregate outcome.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stepflow::{Pipeline, PipelineConfig, StepBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! let pipeline = Pipeline::new(
//!     Box::new(MyStepBuilder::new()),
//!     PipelineConfig::new().with_fail_fast(false).with_parallel_workers(4),
//! );
//!
//! pipeline.run(CancellationToken::new()).await?;
//! ```

pub mod diagnostics;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod step;

pub use diagnostics::DiagnosticSink;
pub use pipeline::{
    Concurrency, Pipeline, PipelineConfig, PipelineError, StepBuilder, StepProducer, StepStream,
    StreamingPipeline,
};
pub use runner::{
    ExecutedStep, FailureAction, FailureListener, FifoQueue, RunnerError, SealableQueue,
    StepFailure, StepQueue, StepRunner,
};
pub use step::{Step, StepError};
