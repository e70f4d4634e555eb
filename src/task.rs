// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Single-slot background task runner
//!
//! Runs one blocking operation at a time on a worker thread and hands its
//! outcome back to the thread that owns the runner. The owner calls
//! [`TaskRunner::poll`] from its event loop (every [`POLL_INTERVAL`]); the
//! success or error handler runs there, never on the worker.
//!
//! Cancellation is cooperative. [`TaskRunner::cancel`] only raises a flag;
//! work that never checks its [`CancelToken`] runs to completion.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{AssistantError, Result};

/// Interval at which the owner polls for a finished task
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative cancellation flag shared with running work
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is raised, for use with `?` in loops
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AssistantError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Lifecycle of the runner's single slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

enum Delivery<M> {
    Pending,
    Done(M, TaskState),
}

struct InFlight<M> {
    name: String,
    cancel: CancelToken,
    deliver: Box<dyn FnMut() -> Delivery<M>>,
}

/// Runs at most one background task and routes its outcome to handlers
///
/// Handlers turn the outcome into a message of type `M` which `poll` returns
/// to the caller, so all state changes happen on the owner's thread.
pub struct TaskRunner<M> {
    slot: Option<InFlight<M>>,
    last_state: TaskState,
}

impl<M: 'static> Default for TaskRunner<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: 'static> TaskRunner<M> {
    pub fn new() -> Self {
        Self {
            slot: None,
            last_state: TaskState::Idle,
        }
    }

    /// Start `work` on a worker thread
    ///
    /// Returns `false` and leaves the running task untouched if the slot is
    /// occupied. A task occupies the slot until `poll` has delivered it.
    pub fn submit<T, W, S, E>(&mut self, name: &str, work: W, on_success: S, on_error: E) -> bool
    where
        T: Send + 'static,
        W: FnOnce(CancelToken) -> Result<T> + Send + 'static,
        S: FnOnce(T) -> M + 'static,
        E: FnOnce(AssistantError) -> M + 'static,
    {
        if self.slot.is_some() {
            debug!("Rejected task '{}': '{}' still running", name, self.current_name().unwrap_or(""));
            return false;
        }

        let cancel = CancelToken::new();
        let (tx, rx) = sync_channel::<Result<T>>(1);
        let worker_token = cancel.clone();
        let worker_name = name.to_string();

        let spawned = thread::Builder::new()
            .name(format!("rpa4you-{}", name))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(worker_token)))
                    .unwrap_or_else(|payload| {
                        let reason = panic_message(&*payload);
                        warn!("Task '{}' panicked: {}", worker_name, reason);
                        Err(AssistantError::WorkerPanicked(reason))
                    });
                // The receiver only goes away if the runner was dropped
                let _ = tx.send(outcome);
            });

        let deliver = match spawned {
            Ok(_) => make_delivery(rx, on_success, on_error),
            Err(e) => {
                // Report spawn failure through the same path as any other error
                let mut on_error = Some(on_error);
                let mut error = Some(AssistantError::FileSystem(e));
                Box::new(move || match (on_error.take(), error.take()) {
                    (Some(handler), Some(err)) => Delivery::Done(handler(err), TaskState::Failed),
                    _ => Delivery::Pending,
                }) as Box<dyn FnMut() -> Delivery<M>>
            }
        };

        debug!("Started task '{}'", name);
        self.slot = Some(InFlight {
            name: name.to_string(),
            cancel,
            deliver,
        });
        self.last_state = TaskState::Running;
        true
    }

    /// Deliver the finished task's message, if any
    ///
    /// Never blocks. Returns `None` while the task is still running or when
    /// the runner is idle.
    pub fn poll(&mut self) -> Option<M> {
        let in_flight = self.slot.as_mut()?;
        match (in_flight.deliver)() {
            Delivery::Pending => None,
            Delivery::Done(message, state) => {
                debug!("Task '{}' finished: {:?}", in_flight.name, state);
                self.slot = None;
                self.last_state = state;
                Some(message)
            }
        }
    }

    /// Block the current thread, polling every [`POLL_INTERVAL`], until the
    /// running task is delivered
    pub fn wait(&mut self) -> Option<M> {
        while self.slot.is_some() {
            if let Some(message) = self.poll() {
                return Some(message);
            }
            thread::sleep(POLL_INTERVAL);
        }
        None
    }

    /// Ask the running task to stop (best effort)
    pub fn cancel(&self) {
        if let Some(in_flight) = &self.slot {
            debug!("Cancellation requested for '{}'", in_flight.name);
            in_flight.cancel.cancel();
        }
    }

    /// Token of the running task, for signal handlers
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.slot.as_ref().map(|s| s.cancel.clone())
    }

    pub fn is_running(&self) -> bool {
        self.slot.is_some()
    }

    /// `Running` while a task occupies the slot, otherwise how the last one
    /// ended (`Idle` before the first)
    pub fn state(&self) -> TaskState {
        self.last_state
    }

    pub fn current_name(&self) -> Option<&str> {
        self.slot.as_ref().map(|s| s.name.as_str())
    }
}

fn make_delivery<T, M, S, E>(rx: Receiver<Result<T>>, on_success: S, on_error: E) -> Box<dyn FnMut() -> Delivery<M>>
where
    T: 'static,
    M: 'static,
    S: FnOnce(T) -> M + 'static,
    E: FnOnce(AssistantError) -> M + 'static,
{
    let mut handlers = Some((on_success, on_error));
    Box::new(move || {
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return Delivery::Pending,
            Err(TryRecvError::Disconnected) => Err(AssistantError::WorkerPanicked(
                "worker exited without reporting".to_string(),
            )),
        };
        let Some((on_success, on_error)) = handlers.take() else {
            return Delivery::Pending;
        };
        match outcome {
            Ok(value) => Delivery::Done(on_success(value), TaskState::Succeeded),
            Err(AssistantError::Cancelled) => {
                Delivery::Done(on_error(AssistantError::Cancelled), TaskState::Cancelled)
            }
            Err(e) => Delivery::Done(on_error(e), TaskState::Failed),
        }
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
