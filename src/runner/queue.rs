//! Queue strategies feeding the runner's workers.
//!
//! The runner is a single engine parameterized by a [`StepQueue`]: the
//! strategy object decides whether a take waits for more work
//! ([`SealableQueue`]) or treats an empty queue as exhausted ([`FifoQueue`]).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

use crate::runner::RunnerError;
use crate::step::Step;

/// The queue a runner drains, selected at construction.
#[async_trait]
pub trait StepQueue: Send + Sync {
    /// Adds a step to the queue.
    ///
    /// Fails with [`RunnerError::QueueSealed`] once the queue has been sealed.
    fn push(&self, step: Arc<dyn Step>) -> Result<(), RunnerError>;

    /// Takes the next step, waiting if the queue may still produce items.
    ///
    /// Returns `None` once the queue is exhausted.
    async fn take(&self) -> Option<Arc<dyn Step>>;

    /// Seals the queue: no more pushes, and waiting takers unblock once the
    /// remaining items are drained.
    fn seal(&self);
}

/// A pre-populated FIFO queue.
///
/// `take` never waits: an empty queue means the work is exhausted. Steps may
/// still be pushed while a run is in progress and remain visible to the drain
/// loop, but once a worker observes the queue empty it stops, so late
/// additions are consumed on a best-effort basis only.
#[derive(Default)]
pub struct FifoQueue {
    items: Mutex<VecDeque<Arc<dyn Step>>>,
}

impl FifoQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of steps currently queued.
    pub fn len(&self) -> usize {
        self.items.lock().expect("queue lock poisoned").len()
    }

    /// Returns true if no steps are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StepQueue for FifoQueue {
    fn push(&self, step: Arc<dyn Step>) -> Result<(), RunnerError> {
        self.items
            .lock()
            .expect("queue lock poisoned")
            .push_back(step);
        Ok(())
    }

    async fn take(&self) -> Option<Arc<dyn Step>> {
        self.items.lock().expect("queue lock poisoned").pop_front()
    }

    fn seal(&self) {}
}

/// A producer-consumer queue: concurrent `push`, blocking `take`, explicit
/// sealing.
///
/// Workers taking from an empty-but-unsealed queue wait until an item arrives
/// or the queue is sealed and drained. Pushing after [`seal`](StepQueue::seal)
/// is an illegal operation.
pub struct SealableQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Arc<dyn Step>>>>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Arc<dyn Step>>>,
}

impl SealableQueue {
    /// Creates an open queue.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: AsyncMutex::new(receiver),
        }
    }

    /// Returns true once the queue has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.sender.lock().expect("queue lock poisoned").is_none()
    }
}

impl Default for SealableQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepQueue for SealableQueue {
    fn push(&self, step: Arc<dyn Step>) -> Result<(), RunnerError> {
        let guard = self.sender.lock().expect("queue lock poisoned");
        match guard.as_ref() {
            Some(sender) => sender.send(step).map_err(|_| RunnerError::QueueSealed),
            None => Err(RunnerError::QueueSealed),
        }
    }

    async fn take(&self) -> Option<Arc<dyn Step>> {
        // Workers serialize on the receiver; an idle worker holding the lock
        // is itself waiting for an item, so the others lose nothing.
        self.receiver.lock().await.recv().await
    }

    fn seal(&self) {
        // Dropping the sender closes the channel; takers drain what is left
        // and then observe `None`.
        self.sender.lock().expect("queue lock poisoned").take();
    }
}
