//! Ordered submission queues served by worker threads

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::error::{BackendError, Result};
use crate::fence::CompletionSignal;

pub(crate) type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

type Message = (Job, Option<Arc<CompletionSignal>>);

#[derive(Default)]
struct QueueState {
    outstanding: usize,
    first_error: Option<BackendError>,
}

#[derive(Default)]
struct QueueShared {
    state: Mutex<QueueState>,
    idle: Condvar,
}

/// One in-order queue. Jobs run on a dedicated thread in submission order.
pub(crate) struct CpuQueue {
    index: usize,
    sender: Mutex<Option<Sender<Message>>>,
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CpuQueue {
    pub fn new(index: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Message>();
        let shared = Arc::new(QueueShared::default());
        let worker_shared = Arc::clone(&shared);

        let worker = thread::Builder::new()
            .name(format!("lumen-cpu-queue-{index}"))
            .spawn(move || {
                for (job, signal) in receiver {
                    let result = panic::catch_unwind(AssertUnwindSafe(job))
                        .unwrap_or_else(|_| Err(BackendError::DeviceLost("kernel job panicked".to_string())));

                    if let Some(signal) = signal {
                        signal.complete(result.clone());
                    }

                    let mut state = worker_shared.state.lock();
                    if let Err(err) = result {
                        state.first_error.get_or_insert(err);
                    }
                    state.outstanding -= 1;
                    if state.outstanding == 0 {
                        worker_shared.idle.notify_all();
                    }
                }
            })
            .map_err(|err| BackendError::DeviceUnavailable(format!("cannot spawn queue worker: {err}")))?;

        Ok(Self {
            index,
            sender: Mutex::new(Some(sender)),
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn submit(&self, job: Job, signal: Option<Arc<CompletionSignal>>) -> Result<()> {
        self.shared.state.lock().outstanding += 1;

        let sent = match self.sender.lock().as_ref() {
            Some(sender) => sender.send((job, signal)).is_ok(),
            None => false,
        };
        if !sent {
            let mut state = self.shared.state.lock();
            state.outstanding -= 1;
            if state.outstanding == 0 {
                self.shared.idle.notify_all();
            }
            return Err(BackendError::DeviceLost(format!("queue {} is shut down", self.index)));
        }
        Ok(())
    }

    /// Block until no job is queued or running. Errors stay recorded.
    pub fn drain(&self) {
        let mut state = self.shared.state.lock();
        while state.outstanding > 0 {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Drain and take the first failure since the previous call.
    pub fn wait_idle(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        while state.outstanding > 0 {
            self.shared.idle.wait(&mut state);
        }
        match state.first_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for CpuQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish queued jobs and exit.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::warn!(queue = self.index, "queue worker terminated abnormally");
            }
        }
    }
}
