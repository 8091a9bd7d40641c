//! Diagnostic sink for human-readable engine messages.
//!
//! Runners emit a short message to the sink whenever a step fails or is
//! cancelled. The sink has no behavioral effect on scheduling; it exists so
//! embedding applications can surface engine events in their own channels.
//! When nothing is registered, messages are forwarded to `tracing`.

use std::sync::{Arc, OnceLock};

use thiserror::Error;

/// Receives human-readable engine messages.
pub trait DiagnosticSink: Send + Sync {
    /// Called with one message per event.
    fn message(&self, message: &str);
}

/// Returned when a sink is registered twice.
#[derive(Debug, Error)]
#[error("a diagnostic sink has already been registered")]
pub struct SinkAlreadyRegistered;

static SINK: OnceLock<Arc<dyn DiagnosticSink>> = OnceLock::new();

/// Registers the process-wide diagnostic sink.
///
/// May be called at most once; a second registration is an illegal operation.
pub fn register_sink(sink: Arc<dyn DiagnosticSink>) -> Result<(), SinkAlreadyRegistered> {
    SINK.set(sink).map_err(|_| SinkAlreadyRegistered)
}

/// Resolves the current sink: the registered one, or a default that forwards
/// to `tracing`.
pub fn sink() -> Arc<dyn DiagnosticSink> {
    match SINK.get() {
        Some(sink) => Arc::clone(sink),
        None => Arc::new(TracingSink),
    }
}

/// Default sink: forwards messages to the `tracing` subscriber.
struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn message(&self, message: &str) {
        tracing::warn!(target: "stepflow::diagnostics", "{message}");
    }
}
