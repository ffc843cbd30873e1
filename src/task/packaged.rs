//! A callable bundled with its own completion state.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{FutureErrc, FutureError, TaskError};
use crate::task::future::Future;
use crate::task::state::SharedState;

/// Wraps a callable so its return value (or panic) completes a future.
///
/// Running the task at most once stores the callable's result into the
/// shared state; a panic is captured as [`TaskError::Panicked`] instead of
/// unwinding into the caller. Running it again without [`PackagedTask::reset`]
/// is a protocol error. `reset` re-arms the same callable with a fresh
/// state; outstanding futures on the old state observe a broken promise.
pub struct PackagedTask<T> {
    task: Option<Box<dyn FnMut() -> T + Send>>,
    state: Arc<SharedState<T>>,
}

impl<T> PackagedTask<T> {
    /// Creates a task wrapping `task`.
    #[must_use]
    pub fn new(task: impl FnMut() -> T + Send + 'static) -> Self {
        Self {
            task: Some(Box::new(task)),
            state: SharedState::new(),
        }
    }

    /// Returns true while the task still holds its callable.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.task.is_some()
    }

    /// Retrieves the future for the current arming of this task.
    ///
    /// # Errors
    ///
    /// Returns [`FutureErrc::FutureAlreadyRetrieved`] on the second and
    /// later calls for the same arming.
    pub fn future(&self) -> Result<Future<T>, FutureError> {
        self.state.mark_future_retrieved()?;
        Ok(Future::from_state(Arc::clone(&self.state)))
    }

    /// Runs the callable and completes the future with its result.
    ///
    /// # Errors
    ///
    /// Returns [`FutureErrc::NoState`] if the callable is gone and
    /// [`FutureErrc::PromiseAlreadySatisfied`] if this arming already ran;
    /// in that case the callable is not invoked again.
    pub fn run(&mut self) -> Result<(), FutureError> {
        let Some(task) = self.task.as_mut() else {
            return Err(FutureError::new(FutureErrc::NoState));
        };
        if self.state.is_satisfied() {
            return Err(FutureError::new(FutureErrc::PromiseAlreadySatisfied));
        }
        let outcome = match catch_unwind(AssertUnwindSafe(|| task())) {
            Ok(value) => Ok(value),
            Err(payload) => Err(TaskError::panicked(payload.as_ref())),
        };
        self.state.complete(outcome)
    }

    /// Re-arms the task with a fresh shared state, keeping the callable.
    ///
    /// Futures retrieved from the previous arming observe a broken promise
    /// if that arming never ran.
    ///
    /// # Errors
    ///
    /// Returns [`FutureErrc::NoState`] if the callable is gone.
    pub fn reset(&mut self) -> Result<(), FutureError> {
        if self.task.is_none() {
            return Err(FutureError::new(FutureErrc::NoState));
        }
        let previous = std::mem::replace(&mut self.state, SharedState::new());
        previous.abandon();
        Ok(())
    }
}

impl<T> Drop for PackagedTask<T> {
    fn drop(&mut self) {
        self.state.abandon();
    }
}

impl<T> std::fmt::Debug for PackagedTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackagedTask")
            .field("valid", &self.is_valid())
            .field("satisfied", &self.state.is_satisfied())
            .finish()
    }
}
