//! The consuming and shared read sides of a completion state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::TaskError;
use crate::task::state::SharedState;

/// Result of a timed wait on a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    /// The outcome is published; `get` will not block.
    Ready,
    /// The deadline expired before the outcome was published.
    Timeout,
    /// The task is deferred and has not started; timed waits never trigger
    /// deferred work.
    Deferred,
}

/// The one-shot read side of a shared completion state.
///
/// `get` consumes the future, so reading twice is a compile error rather
/// than a runtime protocol violation. Use [`Future::share`] when several
/// readers need the same outcome.
pub struct Future<T> {
    state: Arc<SharedState<T>>,
}

impl<T> Future<T> {
    pub(crate) fn from_state(state: Arc<SharedState<T>>) -> Self {
        Self { state }
    }

    /// Returns true if the outcome is published and `get` will not block.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Blocks until the outcome is published, running deferred work if this
    /// future belongs to a deferred launch.
    pub fn wait(&self) {
        self.state.wait();
    }

    /// Waits for the outcome for at most `timeout`.
    #[must_use]
    pub fn wait_for(&self, timeout: Duration) -> FutureStatus {
        self.wait_until(Instant::now() + timeout)
    }

    /// Waits for the outcome until the absolute `deadline`.
    #[must_use]
    pub fn wait_until(&self, deadline: Instant) -> FutureStatus {
        self.state.wait_deadline(deadline)
    }

    /// Waits for and extracts the outcome, consuming the future.
    ///
    /// # Errors
    ///
    /// Returns the [`TaskError`] the producer stored: a broken promise, a
    /// captured panic, a typed failure, or a spawn failure.
    pub fn get(self) -> Result<T, TaskError> {
        self.state.wait();
        self.state.take_outcome()
    }

    /// Converts this future into a repeatable, cloneable reader.
    #[must_use]
    pub fn share(self) -> SharedFuture<T> {
        SharedFuture { state: self.state }
    }
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// A cloneable, repeatable reader over a shared completion state.
///
/// All clones observe the same outcome; `get` clones the stored value (or
/// failure) instead of consuming it.
pub struct SharedFuture<T> {
    state: Arc<SharedState<T>>,
}

impl<T> SharedFuture<T> {
    /// Returns true if the outcome is published and `get` will not block.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Blocks until the outcome is published, running deferred work if this
    /// future belongs to a deferred launch.
    pub fn wait(&self) {
        self.state.wait();
    }

    /// Waits for the outcome for at most `timeout`.
    #[must_use]
    pub fn wait_for(&self, timeout: Duration) -> FutureStatus {
        self.wait_until(Instant::now() + timeout)
    }

    /// Waits for the outcome until the absolute `deadline`.
    #[must_use]
    pub fn wait_until(&self, deadline: Instant) -> FutureStatus {
        self.state.wait_deadline(deadline)
    }
}

impl<T: Clone> SharedFuture<T> {
    /// Waits for the outcome and returns a clone of it.
    ///
    /// # Errors
    ///
    /// Returns a clone of the [`TaskError`] the producer stored.
    pub fn get(&self) -> Result<T, TaskError> {
        self.state.wait();
        self.state.clone_outcome()
    }
}

impl<T> Clone for SharedFuture<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for SharedFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Promise;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn timed_wait_times_out_then_becomes_ready() {
        init_test("timed_wait_times_out_then_becomes_ready");
        let promise = Promise::new();
        let future = promise.future().expect("retrieval");

        let status = future.wait_for(Duration::from_millis(5));
        crate::assert_with_log!(
            status == FutureStatus::Timeout,
            "before set",
            FutureStatus::Timeout,
            status
        );

        promise.set_value(9_i32).expect("set");
        let status = future.wait_for(Duration::from_millis(5));
        crate::assert_with_log!(
            status == FutureStatus::Ready,
            "after set",
            FutureStatus::Ready,
            status
        );
        crate::test_complete!("timed_wait_times_out_then_becomes_ready");
    }

    #[test]
    fn shared_future_clones_observe_same_value() {
        init_test("shared_future_clones_observe_same_value");
        let promise = Promise::new();
        let shared = promise.future().expect("retrieval").share();
        let second = shared.clone();
        promise.set_value(String::from("shared")).expect("set");

        let first_read = shared.get().expect("first reader");
        let second_read = second.get().expect("second reader");
        crate::assert_with_log!(first_read == "shared", "first", "shared", first_read);
        crate::assert_with_log!(second_read == "shared", "second", "shared", second_read);
        // Repeatable on the same handle.
        let again = shared.get().expect("repeat read");
        crate::assert_with_log!(again == "shared", "repeat", "shared", again);
        crate::test_complete!("shared_future_clones_observe_same_value");
    }

    #[test]
    fn shared_future_clones_observe_same_failure() {
        init_test("shared_future_clones_observe_same_failure");
        let promise = Promise::<u32>::new();
        let shared = promise.future().expect("retrieval").share();
        let second = shared.clone();
        drop(promise);

        let first_err = shared.get().expect_err("first reader");
        let second_err = second.get().expect_err("second reader");
        crate::assert_with_log!(
            first_err.is_broken_promise(),
            "first kind",
            true,
            first_err.is_broken_promise()
        );
        crate::assert_with_log!(
            second_err.is_broken_promise(),
            "second kind",
            true,
            second_err.is_broken_promise()
        );
        crate::test_complete!("shared_future_clones_observe_same_failure");
    }

    #[test]
    fn wait_blocks_until_producer_completes() {
        init_test("wait_blocks_until_producer_completes");
        let promise = Promise::new();
        let future = promise.future().expect("retrieval");

        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            promise.set_value(5_u64).expect("set");
        });
        let value = future.get().expect("outcome");
        crate::assert_with_log!(value == 5, "value", 5_u64, value);
        producer.join().expect("producer panicked");
        crate::test_complete!("wait_blocks_until_producer_completes");
    }
}
