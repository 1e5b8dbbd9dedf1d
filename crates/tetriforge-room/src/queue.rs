//! Per-room FIFO serializer for gameplay actions.
//!
//! Network-facing threads push actions with [`ActionQueue::enqueue`] and
//! return immediately. One consumer task per room pops them in arrival
//! order and runs them one at a time, so two gameplay mutations of the
//! same room never overlap.
//!
//! ```text
//! enqueue ──→ [ VecDeque ] ──→ consumer task ──→ action()
//!                               ↑ idles on Notify, or `poll` at most
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// A queued gameplay mutation.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    name: String,
    actions: Mutex<VecDeque<Action>>,
    wake: Notify,
}

impl Shared {
    fn actions(&self) -> MutexGuard<'_, VecDeque<Action>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Worker {
    token: CancellationToken,
    exited: watch::Receiver<bool>,
}

/// Serializes actions for one room.
pub struct ActionQueue {
    shared: Arc<Shared>,
    poll: Duration,
    worker: Mutex<Option<Worker>>,
}

impl ActionQueue {
    pub fn new(name: impl Into<String>, poll: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                actions: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
            }),
            poll: poll.max(Duration::from_millis(1)),
            worker: Mutex::new(None),
        }
    }

    /// Appends an action. Never blocks and never runs it on the caller.
    pub fn enqueue(&self, action: impl FnOnce() + Send + 'static) {
        self.shared.actions().push_back(Box::new(action));
        self.shared.wake.notify_one();
    }

    /// Spawns the consumer on `runtime`. Returns `false` if one is already
    /// running.
    pub fn start(&self, runtime: &Handle) -> bool {
        let mut worker = self.worker();
        if worker.as_ref().is_some_and(|w| !w.token.is_cancelled()) {
            return false;
        }
        let token = CancellationToken::new();
        let (exited_tx, exited) = watch::channel(false);
        runtime.spawn(consume(
            Arc::clone(&self.shared),
            token.clone(),
            self.poll,
            exited_tx,
        ));
        *worker = Some(Worker { token, exited });
        debug!(queue = %self.shared.name, "action queue started");
        true
    }

    /// Signals the consumer to exit and discards pending actions.
    pub fn stop(&self) {
        if let Some(worker) = self.worker().as_ref() {
            worker.token.cancel();
        }
        self.clear();
        debug!(queue = %self.shared.name, "action queue stopped");
    }

    /// Waits until the consumer has exited, at most `timeout`.
    ///
    /// Returns `true` if it exited (or never ran).
    pub async fn wait(&self, timeout: Duration) -> bool {
        let exited = self.worker().as_ref().map(|w| w.exited.clone());
        let Some(mut exited) = exited else {
            return true;
        };
        // A dropped sender also means the consumer task is gone.
        tokio::time::timeout(timeout, exited.wait_for(|done| *done))
            .await
            .is_ok()
    }

    /// Discards actions that have not started yet.
    pub fn clear(&self) {
        let dropped = {
            let mut actions = self.shared.actions();
            let dropped = actions.len();
            actions.clear();
            dropped
        };
        if dropped > 0 {
            trace!(queue = %self.shared.name, dropped, "pending actions discarded");
        }
    }

    pub fn len(&self) -> usize {
        self.shared.actions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.actions().is_empty()
    }

    /// Whether a consumer is running and has not been told to stop.
    pub fn is_running(&self) -> bool {
        self.worker()
            .as_ref()
            .is_some_and(|w| !w.token.is_cancelled() && !*w.exited.borrow())
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ActionQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.worker().as_ref() {
            worker.token.cancel();
        }
    }
}

async fn consume(
    shared: Arc<Shared>,
    token: CancellationToken,
    poll: Duration,
    exited: watch::Sender<bool>,
) {
    trace!(queue = %shared.name, "consumer running");
    while !token.is_cancelled() {
        let next = shared.actions().pop_front();
        match next {
            Some(action) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(action)) {
                    error!(
                        queue = %shared.name,
                        panic = panic_message(panic.as_ref()),
                        "action panicked"
                    );
                }
            }
            None => {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = shared.wake.notified() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        }
    }
    exited.send_replace(true);
    trace!(queue = %shared.name, "consumer exited");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
