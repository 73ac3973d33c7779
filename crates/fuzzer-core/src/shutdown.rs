//! Shutdown coordination for every concurrent participant of a run.
//!
//! A single [`CancellationToken`] is the stop broadcast: each task races its
//! bounded waits against it. A [`TaskTracker`] is the counting join: the run
//! is over once every tracked task has returned.
//!
//! ```text
//! Created -> Validated -> Probing -> Running -> Stopping -> Stopped
//!                            |                                 ^
//!                            +------------[probe failed]-------+
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::FuzzError;

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Validated,
    Probing,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Created => "created",
            EngineState::Validated => "validated",
            EngineState::Probing => "probing",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// What ended the run. Only the first trigger is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every counted job was processed.
    Completed,
    /// The max-runtime timer fired.
    MaxRuntime,
    /// `stop()` was called from outside.
    Requested,
    /// A fatal error occurred.
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Completed => "done",
            StopReason::MaxRuntime => "timed out",
            StopReason::Requested => "stopped",
            StopReason::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: EngineState,
    error: Option<FuzzError>,
}

/// Cheaply cloneable handle shared by the engine and all of its tasks.
#[derive(Clone)]
pub struct Shutdown {
    token: CancellationToken,
    tracker: TaskTracker,
    reason: Arc<OnceLock<StopReason>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            reason: Arc::new(OnceLock::new()),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: EngineState::Created,
                error: None,
            })),
        }
    }

    /// Acquires the lifecycle lock, recovering from poison if necessary.
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned lifecycle mutex");
            poisoned.into_inner()
        })
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    /// Move to `next`. `Stopped` is terminal.
    pub fn set_state(&self, next: EngineState) {
        let mut lifecycle = self.lock();
        if lifecycle.state != EngineState::Stopped {
            lifecycle.state = next;
        }
    }

    /// Broadcast stop. Returns true only for the first trigger.
    pub fn trigger(&self, reason: StopReason) -> bool {
        let won = self.reason.set(reason).is_ok();
        {
            let mut lifecycle = self.lock();
            if matches!(
                lifecycle.state,
                EngineState::Probing | EngineState::Running
            ) {
                lifecycle.state = EngineState::Stopping;
            }
        }
        self.token.cancel();
        won
    }

    /// Record a fatal error and stop the run.
    pub fn fail(&self, error: FuzzError) {
        self.record_error(error);
        self.trigger(StopReason::Failed);
    }

    /// Overwrite the lifecycle error slot.
    pub fn record_error(&self, error: FuzzError) {
        self.lock().error = Some(error);
    }

    pub fn error(&self) -> Option<FuzzError> {
        self.lock().error.clone()
    }

    /// Spawn a participant whose lifetime counts toward [`join`](Self::join).
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Participants that have not returned yet.
    pub fn live_count(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every participant has returned, then mark the run stopped.
    ///
    /// Returns immediately when nothing is alive, so it is safe to call
    /// repeatedly and after the run has ended.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.lock().state = EngineState::Stopped;
    }
}
