//! The shared completion state behind a promise/future pair.

use std::sync::{Arc, Condvar as StdCondvar, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::error::{FutureErrc, FutureError, TaskError};
use crate::task::future::FutureStatus;

pub(crate) type Outcome<T> = Result<T, TaskError>;

type WaitHook = Box<dyn FnOnce() + Send>;

/// Write-once result slot shared by one producer and its consumers.
///
/// The mutex guards every flag; the condition variable is broadcast on
/// publication so all waiters (a shared future may have several) wake and
/// recheck readiness. `ready` is tracked separately from the slot being
/// occupied: `set_value_at_thread_exit` stores the outcome early but only
/// publishes it from the thread-exit hook.
pub(crate) struct SharedState<T> {
    inner: StdMutex<Inner<T>>,
    ready_cv: StdCondvar,
}

struct Inner<T> {
    outcome: Option<Outcome<T>>,
    ready: bool,
    future_retrieved: bool,
    on_wait: Option<WaitHook>,
}

impl<T> SharedState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StdMutex::new(Inner {
                outcome: None,
                ready: false,
                future_retrieved: false,
                on_wait: None,
            }),
            ready_cv: StdCondvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the single future retrieval.
    pub(crate) fn mark_future_retrieved(&self) -> Result<(), FutureError> {
        let mut inner = self.lock();
        if inner.future_retrieved {
            return Err(FutureError::new(FutureErrc::FutureAlreadyRetrieved));
        }
        inner.future_retrieved = true;
        Ok(())
    }

    /// Stores the outcome and publishes it to waiters.
    pub(crate) fn complete(&self, outcome: Outcome<T>) -> Result<(), FutureError> {
        let mut inner = self.lock();
        if inner.outcome.is_some() {
            return Err(FutureError::new(FutureErrc::PromiseAlreadySatisfied));
        }
        inner.outcome = Some(outcome);
        inner.ready = true;
        drop(inner);
        self.ready_cv.notify_all();
        Ok(())
    }

    /// Stores the outcome without publishing it; see [`Self::publish`].
    pub(crate) fn store_unpublished(&self, outcome: Outcome<T>) -> Result<(), FutureError> {
        let mut inner = self.lock();
        if inner.outcome.is_some() {
            return Err(FutureError::new(FutureErrc::PromiseAlreadySatisfied));
        }
        inner.outcome = Some(outcome);
        Ok(())
    }

    /// Makes a previously stored outcome visible and wakes waiters.
    pub(crate) fn publish(&self) {
        let mut inner = self.lock();
        if inner.outcome.is_some() && !inner.ready {
            inner.ready = true;
            drop(inner);
            self.ready_cv.notify_all();
        }
    }

    /// Synthesizes a broken-promise failure if nothing was ever stored.
    pub(crate) fn abandon(&self) {
        let mut inner = self.lock();
        if inner.outcome.is_none() {
            tracing::debug!("producer abandoned; storing broken promise");
            inner.outcome = Some(Err(TaskError::BrokenPromise));
            inner.ready = true;
            drop(inner);
            self.ready_cv.notify_all();
        }
    }

    /// Installs the one-shot hook run at the start of the first wait.
    pub(crate) fn set_wait_hook(&self, hook: WaitHook) {
        self.lock().on_wait = Some(hook);
    }

    fn take_wait_hook(&self) -> Option<WaitHook> {
        self.lock().on_wait.take()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.lock().ready
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        self.lock().outcome.is_some()
    }

    /// Blocks until the outcome is published, triggering any pending
    /// deferred work first.
    ///
    /// The hook is taken under the lock but invoked outside it; racing
    /// waiters that lose the take fall through to the condition variable
    /// and are woken when the winner's hook completes the state.
    pub(crate) fn wait(&self) {
        if let Some(hook) = self.take_wait_hook() {
            hook();
        }
        let mut inner = self.lock();
        while !inner.ready {
            inner = self
                .ready_cv
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Waits for publication until `deadline`.
    ///
    /// A pending wait hook is not triggered: timed waits report
    /// [`FutureStatus::Deferred`] instead of starting deferred work.
    pub(crate) fn wait_deadline(&self, deadline: Instant) -> FutureStatus {
        let mut inner = self.lock();
        if inner.on_wait.is_some() && !inner.ready {
            return FutureStatus::Deferred;
        }
        while !inner.ready {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return FutureStatus::Timeout;
            };
            let (reacquired, result) = self
                .ready_cv
                .wait_timeout(inner, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            inner = reacquired;
            if result.timed_out() && !inner.ready {
                return FutureStatus::Timeout;
            }
        }
        FutureStatus::Ready
    }

    /// Extracts the outcome; the slot must be published.
    pub(crate) fn take_outcome(&self) -> Outcome<T> {
        self.lock()
            .outcome
            .take()
            .unwrap_or(Err(TaskError::BrokenPromise))
    }
}

impl<T: Clone> SharedState<T> {
    /// Clones the published outcome, leaving it in place for other readers.
    pub(crate) fn clone_outcome(&self) -> Outcome<T> {
        match &self.lock().outcome {
            Some(outcome) => outcome.clone(),
            None => Err(TaskError::BrokenPromise),
        }
    }
}
