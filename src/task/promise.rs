//! The producing half of a one-shot result channel.

use std::sync::Arc;

use crate::error::{FutureError, TaskError};
use crate::task::future::Future;
use crate::task::state::SharedState;
use crate::thread::at_thread_exit;

/// The write side of a shared completion state.
///
/// A promise stores its result exactly once; the paired [`Future`] is
/// retrieved at most once. Dropping a promise that never produced a result
/// stores [`TaskError::BrokenPromise`] so waiters do not hang.
pub struct Promise<T> {
    state: Arc<SharedState<T>>,
}

impl<T> Promise<T> {
    /// Creates a promise with a fresh, empty shared state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SharedState::new(),
        }
    }

    /// Retrieves the future for this promise.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FutureErrc::FutureAlreadyRetrieved`] on the second
    /// and later calls.
    pub fn future(&self) -> Result<Future<T>, FutureError> {
        self.state.mark_future_retrieved()?;
        Ok(Future::from_state(Arc::clone(&self.state)))
    }

    /// Stores the success value and wakes all waiters.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FutureErrc::PromiseAlreadySatisfied`] if a result
    /// was already stored.
    pub fn set_value(&self, value: T) -> Result<(), FutureError> {
        self.state.complete(Ok(value))
    }

    /// Stores a failure and wakes all waiters.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FutureErrc::PromiseAlreadySatisfied`] if a result
    /// was already stored.
    pub fn set_error(&self, error: TaskError) -> Result<(), FutureError> {
        self.state.complete(Err(error))
    }
}

impl<T: 'static> Promise<T> {
    /// Stores the success value now but publishes it only when the calling
    /// thread exits, after its stack has unwound.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FutureErrc::PromiseAlreadySatisfied`] if a result
    /// was already stored.
    pub fn set_value_at_thread_exit(&self, value: T) -> Result<(), FutureError> {
        self.state.store_unpublished(Ok(value))?;
        let state = Arc::clone(&self.state);
        at_thread_exit(move || state.publish());
        Ok(())
    }

    /// Stores a failure now but publishes it only when the calling thread
    /// exits.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FutureErrc::PromiseAlreadySatisfied`] if a result
    /// was already stored.
    pub fn set_error_at_thread_exit(&self, error: TaskError) -> Result<(), FutureError> {
        self.state.store_unpublished(Err(error))?;
        let state = Arc::clone(&self.state);
        at_thread_exit(move || state.publish());
        Ok(())
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        self.state.abandon();
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("satisfied", &self.state.is_satisfied())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FutureErrc;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn set_value_then_get_round_trips() {
        init_test("set_value_then_get_round_trips");
        let promise = Promise::new();
        let future = promise.future().expect("first retrieval");
        promise.set_value(42_u32).expect("first set");
        let value = future.get().expect("success outcome");
        crate::assert_with_log!(value == 42, "round trip", 42_u32, value);
        crate::test_complete!("set_value_then_get_round_trips");
    }

    #[test]
    fn second_set_reports_already_satisfied() {
        init_test("second_set_reports_already_satisfied");
        let promise = Promise::new();
        promise.set_value(1_u8).expect("first set");
        let err = promise.set_value(2_u8).expect_err("second set must fail");
        crate::assert_with_log!(
            err.code() == FutureErrc::PromiseAlreadySatisfied,
            "code",
            FutureErrc::PromiseAlreadySatisfied,
            err.code()
        );
        crate::test_complete!("second_set_reports_already_satisfied");
    }

    #[test]
    fn second_future_retrieval_fails() {
        init_test("second_future_retrieval_fails");
        let promise = Promise::<()>::new();
        let _future = promise.future().expect("first retrieval");
        let err = promise.future().expect_err("second retrieval must fail");
        crate::assert_with_log!(
            err.code() == FutureErrc::FutureAlreadyRetrieved,
            "code",
            FutureErrc::FutureAlreadyRetrieved,
            err.code()
        );
        crate::test_complete!("second_future_retrieval_fails");
    }

    #[test]
    fn dropped_promise_breaks_the_future() {
        init_test("dropped_promise_breaks_the_future");
        let promise = Promise::<u32>::new();
        let future = promise.future().expect("retrieval");
        drop(promise);
        let err = future.get().expect_err("must observe failure");
        crate::assert_with_log!(err.is_broken_promise(), "broken", true, err.is_broken_promise());
        crate::test_complete!("dropped_promise_breaks_the_future");
    }

    #[test]
    fn value_at_thread_exit_publishes_after_unwind() {
        init_test("value_at_thread_exit_publishes_after_unwind");
        let promise = Promise::new();
        let future = promise.future().expect("retrieval");
        let worker = crate::thread::Thread::spawn(move || {
            promise
                .set_value_at_thread_exit(7_u32)
                .expect("store for exit");
            // Not yet published while the thread body is still running.
        })
        .expect("spawn");
        worker.join();
        let value = future.get().expect("published at exit");
        crate::assert_with_log!(value == 7, "value", 7_u32, value);
        crate::test_complete!("value_at_thread_exit_publishes_after_unwind");
    }

    #[test]
    fn error_at_thread_exit_publishes_failure() {
        init_test("error_at_thread_exit_publishes_failure");
        let promise = Promise::<u32>::new();
        let future = promise.future().expect("retrieval");
        let worker = crate::thread::Thread::spawn(move || {
            promise
                .set_error_at_thread_exit(TaskError::BrokenPromise)
                .expect("store for exit");
        })
        .expect("spawn");
        worker.join();
        let err = future.get().expect_err("failure published at exit");
        crate::assert_with_log!(err.is_broken_promise(), "kind", true, err.is_broken_promise());
        crate::test_complete!("error_at_thread_exit_publishes_failure");
    }
}
