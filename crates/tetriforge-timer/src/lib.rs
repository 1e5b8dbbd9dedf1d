//! Cancellable timers for Tetriforge.
//!
//! Rooms need two kinds of delayed work: a one-shot (the vote-kick
//! timeout) and a periodic task with an initial delay (sudden death).
//! Both run as Tokio tasks and are controlled through a [`TimerHandle`].
//!
//! # Cancellation
//!
//! A handle cancels its task when [`TimerHandle::cancel`] is called or when
//! the handle is dropped. Cancelling twice is a no-op. Cancellation only
//! stops *future* firings: a callback that already started runs to
//! completion, so callbacks that mutate shared state should still check a
//! generation counter of their own.
//!
//! ```ignore
//! let timers = TimerService::new(tokio::runtime::Handle::current());
//! let handle = timers.once("vote-kick", Duration::from_secs(10), move || {
//!     room.vote_timed_out(generation);
//! });
//! // ...the vote resolved early:
//! handle.cancel();
//! ```

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{self, Instant as TokioInstant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Spawns timers on a Tokio runtime.
///
/// Cheap to clone; all clones spawn on the same runtime.
#[derive(Debug, Clone)]
pub struct TimerService {
    runtime: Handle,
}

impl TimerService {
    /// Creates a service that spawns on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Creates a service on the runtime of the calling context, if any.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// The runtime timers are spawned on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Runs `f` once after `delay`, unless cancelled first.
    pub fn once<F>(&self, name: &'static str, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = child.cancelled() => {
                    trace!(timer = name, "one-shot timer cancelled");
                }
                _ = time::sleep(delay) => {
                    trace!(timer = name, "one-shot timer fired");
                    f();
                }
            }
        });
        TimerHandle { token }
    }

    /// Runs `f` after `delay`, then every `period`, until cancelled.
    ///
    /// Late firings are skipped rather than bunched up.
    pub fn periodic<F>(
        &self,
        name: &'static str,
        delay: Duration,
        period: Duration,
        mut f: F,
    ) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        // `interval_at` panics on a zero period.
        let period = period.max(Duration::from_millis(1));
        self.runtime.spawn(async move {
            let mut interval = time::interval_at(TokioInstant::now() + delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = child.cancelled() => {
                        trace!(timer = name, "periodic timer cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        trace!(timer = name, "periodic timer fired");
                        f();
                    }
                }
            }
        });
        TimerHandle { token }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Controls one scheduled timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    /// Stops the timer. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
