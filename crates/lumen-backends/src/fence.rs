//! Completion tokens for asynchronous backend work

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

/// Something a [`Fence`] can block on.
pub trait FenceSignal: Send + Sync {
    /// Block until the operation finished and return its outcome.
    fn wait(&self) -> Result<()>;

    fn is_signaled(&self) -> bool;
}

/// Completion token of one asynchronous operation.
///
/// An invalid fence (`Fence::invalid()`, `Fence::default()`) stands for "no
/// token was requested"; waiting on it returns immediately.
#[derive(Clone, Default)]
pub struct Fence {
    signal: Option<Arc<dyn FenceSignal>>,
}

impl Fence {
    pub fn new(signal: Arc<dyn FenceSignal>) -> Self {
        Self { signal: Some(signal) }
    }

    pub fn invalid() -> Self {
        Self { signal: None }
    }

    pub fn is_valid(&self) -> bool {
        self.signal.is_some()
    }

    /// Whether the operation has finished. Invalid fences count as finished.
    pub fn is_signaled(&self) -> bool {
        self.signal.as_ref().is_none_or(|signal| signal.is_signaled())
    }

    /// Block until the operation completes; reports its failure, if any.
    pub fn wait(&self) -> Result<()> {
        match &self.signal {
            Some(signal) => signal.wait(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("valid", &self.is_valid())
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// One-shot signal completed by a queue worker.
#[derive(Default)]
pub struct CompletionSignal {
    outcome: Mutex<Option<Result<()>>>,
    done: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record the outcome and wake every waiter. Later calls are ignored.
    pub fn complete(&self, outcome: Result<()>) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.done.notify_all();
        }
    }
}

impl FenceSignal for CompletionSignal {
    fn wait(&self) -> Result<()> {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.done.wait(&mut slot);
        }
    }

    fn is_signaled(&self) -> bool {
        self.outcome.lock().is_some()
    }
}

/// How a backend accepted an operation.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Finished before the call returned.
    Completed,
    /// Queued; the fence is invalid unless one was requested.
    Queued(Fence),
}

impl Submission {
    pub fn is_async(&self) -> bool {
        matches!(self, Submission::Queued(_))
    }
}
