//! Policy-driven task launching.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use crate::error::TaskError;
use crate::task::future::Future;
use crate::task::state::SharedState;
use crate::thread::Thread;

/// How [`launch`] schedules the task body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// Spawn a worker thread immediately; the body starts before the
    /// future is observed.
    Async,
    /// Run the body inline on the first thread that waits on the future.
    /// If nobody ever waits, the body never runs.
    Deferred,
    /// Defer until first observed, then spawn a worker thread to run the
    /// body while the waiter blocks.
    Auto,
}

/// Launches `body` under the given policy and returns its future.
///
/// Failures in the launch machinery itself are captured into the future: a
/// panic in the body becomes [`TaskError::Panicked`], a failed thread spawn
/// becomes [`TaskError::SpawnFailed`]. `launch` never propagates them
/// synchronously.
pub fn launch<T, F>(policy: Launch, body: F) -> Future<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let state = SharedState::new();
    match policy {
        Launch::Async => spawn_worker(Arc::clone(&state), body),
        Launch::Deferred => {
            // The hook lives inside the state, so it holds a weak handle
            // to avoid keeping the state alive through itself.
            let weak = Arc::downgrade(&state);
            state.set_wait_hook(Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    run_body(&state, body);
                }
            }));
        }
        Launch::Auto => {
            let weak: Weak<SharedState<T>> = Arc::downgrade(&state);
            state.set_wait_hook(Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    spawn_worker(state, body);
                }
            }));
        }
    }
    Future::from_state(state)
}

fn run_body<T>(state: &Arc<SharedState<T>>, body: impl FnOnce() -> T) {
    let outcome = match catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => Ok(value),
        Err(payload) => Err(TaskError::panicked(payload.as_ref())),
    };
    if state.complete(outcome).is_err() {
        tracing::warn!("launch worker found the state already completed");
    }
}

fn spawn_worker<T, F>(state: Arc<SharedState<T>>, body: F)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let worker_state = Arc::clone(&state);
    match Thread::spawn(move || run_body(&worker_state, body)) {
        Ok(worker) => worker.detach(),
        Err(err) => {
            let _ = state.complete(Err(TaskError::SpawnFailed(Arc::new(err))));
        }
    }
}
