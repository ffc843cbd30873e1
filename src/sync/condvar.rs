//! Condition variables over the crate's mutexes and arbitrary lock types.
//!
//! Both variants are built on the same internal bridge: an auxiliary mutex
//! and platform condition variable. A waiter locks the auxiliary mutex,
//! releases the caller's lock, then parks on the auxiliary pair; a notifier
//! takes the auxiliary mutex before signalling. Because the auxiliary mutex
//! is held across the caller-lock release, a notification sent in that
//! window cannot be lost.
//!
//! All waits tolerate spurious wake-ups; the predicate-accepting forms loop
//! internally. Timed predicate forms recheck the predicate once after a
//! reported timeout, since the wake and the deadline can race.

use std::sync::{Arc, Condvar as StdCondvar, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use crate::cancel::{StopCallback, StopToken};
use crate::sync::mutex::{LockError, Mutex, MutexGuard};

/// Whether a timed wait returned because of the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeoutResult {
    /// The wait returned due to a notification (or spurious wake).
    NoTimeout,
    /// The deadline expired.
    TimedOut,
}

impl WaitTimeoutResult {
    /// True if the wait returned because the deadline expired.
    #[must_use]
    pub const fn timed_out(self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

#[derive(Debug, Default)]
struct Bridge {
    lock: StdMutex<()>,
    cv: StdCondvar,
}

impl Bridge {
    fn notify_one(&self) {
        let _hold = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cv.notify_one();
    }

    fn notify_all(&self) {
        let _hold = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cv.notify_all();
    }

    /// Parks the calling thread; `release` must unlock the caller's lock.
    ///
    /// Returns whether the deadline expired (always `NoTimeout` when
    /// `deadline` is `None`).
    fn park(&self, release: impl FnOnce(), deadline: Option<Instant>) -> WaitTimeoutResult {
        let held = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        release();
        match deadline {
            None => {
                let held = self.cv.wait(held).unwrap_or_else(PoisonError::into_inner);
                drop(held);
                WaitTimeoutResult::NoTimeout
            }
            Some(deadline) => {
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    drop(held);
                    return WaitTimeoutResult::TimedOut;
                };
                let (held, result) = self
                    .cv
                    .wait_timeout(held, remaining)
                    .unwrap_or_else(PoisonError::into_inner);
                drop(held);
                if result.timed_out() {
                    WaitTimeoutResult::TimedOut
                } else {
                    WaitTimeoutResult::NoTimeout
                }
            }
        }
    }

    /// Parks like [`Bridge::park`], but skips the wait if `cancelled` holds
    /// once the auxiliary lock is held.
    ///
    /// The caller's lock is released either way, so the caller relocks and
    /// rechecks. A cancellation signalled after the auxiliary lock is taken
    /// blocks in the notifier until this thread is parked, so it cannot be
    /// lost.
    fn park_checked(
        &self,
        cancelled: impl FnOnce() -> bool,
        release: impl FnOnce(),
        deadline: Option<Instant>,
    ) -> WaitTimeoutResult {
        let held = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = cancelled();
        release();
        if skip {
            drop(held);
            return WaitTimeoutResult::NoTimeout;
        }
        match deadline {
            None => {
                let held = self.cv.wait(held).unwrap_or_else(PoisonError::into_inner);
                drop(held);
                WaitTimeoutResult::NoTimeout
            }
            Some(deadline) => {
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    drop(held);
                    return WaitTimeoutResult::TimedOut;
                };
                let (held, result) = self
                    .cv
                    .wait_timeout(held, remaining)
                    .unwrap_or_else(PoisonError::into_inner);
                drop(held);
                if result.timed_out() {
                    WaitTimeoutResult::TimedOut
                } else {
                    WaitTimeoutResult::NoTimeout
                }
            }
        }
    }
}

// ============================================================================
// Condvar
// ============================================================================

/// A condition variable for [`Mutex`] guards.
///
/// `wait` atomically releases the guard's mutex and blocks, reacquiring the
/// mutex before returning.
#[derive(Debug, Default, Clone)]
pub struct Condvar {
    bridge: Arc<Bridge>,
}

impl Condvar {
    /// Creates a new condition variable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes one blocked waiter.
    pub fn notify_one(&self) {
        self.bridge.notify_one();
    }

    /// Wakes all blocked waiters.
    pub fn notify_all(&self) {
        self.bridge.notify_all();
    }

    /// Blocks until notified, releasing `guard` while waiting.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>, LockError> {
        let mutex = guard.mutex();
        self.bridge.park(move || drop(guard), None);
        mutex.lock()
    }

    /// Blocks until notified or `timeout` elapses.
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> Result<(MutexGuard<'a, T>, WaitTimeoutResult), LockError> {
        self.wait_deadline(guard, Instant::now() + timeout)
    }

    /// Blocks until notified or the absolute `deadline` passes.
    pub fn wait_deadline<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        deadline: Instant,
    ) -> Result<(MutexGuard<'a, T>, WaitTimeoutResult), LockError> {
        let mutex = guard.mutex();
        let result = self.bridge.park(move || drop(guard), Some(deadline));
        Ok((mutex.lock()?, result))
    }

    /// Blocks while `pred` returns true, tolerating spurious wakes.
    pub fn wait_while<'a, T, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut pred: F,
    ) -> Result<MutexGuard<'a, T>, LockError>
    where
        F: FnMut(&T) -> bool,
    {
        while pred(&guard) {
            guard = self.wait(guard)?;
        }
        Ok(guard)
    }

    /// Blocks while `pred` returns true, up to `timeout`.
    ///
    /// The predicate is rechecked once after a reported timeout; the
    /// returned flag is `TimedOut` only if the deadline expired *and* the
    /// predicate still held.
    pub fn wait_timeout_while<'a, T, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        timeout: Duration,
        mut pred: F,
    ) -> Result<(MutexGuard<'a, T>, WaitTimeoutResult), LockError>
    where
        F: FnMut(&T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while pred(&guard) {
            let (reacquired, result) = self.wait_deadline(guard, deadline)?;
            guard = reacquired;
            if result.timed_out() {
                let expired = pred(&guard);
                return Ok((
                    guard,
                    if expired {
                        WaitTimeoutResult::TimedOut
                    } else {
                        WaitTimeoutResult::NoTimeout
                    },
                ));
            }
        }
        Ok((guard, WaitTimeoutResult::NoTimeout))
    }

    /// Blocks while `pred` returns true, returning early on a stop request.
    ///
    /// Cancellation is checked both before and after each wait. The returned
    /// flag is true when the predicate no longer holds at return; a stopped
    /// wait whose predicate still holds returns false.
    pub fn wait_while_or_stopped<'a, T, F>(
        &self,
        token: &StopToken,
        mut guard: MutexGuard<'a, T>,
        mut pred: F,
    ) -> Result<(MutexGuard<'a, T>, bool), LockError>
    where
        F: FnMut(&T) -> bool,
    {
        let bridge = Arc::clone(&self.bridge);
        let _wake_on_stop = StopCallback::new(token, move || bridge.notify_all());
        loop {
            if !pred(&guard) {
                return Ok((guard, true));
            }
            if token.stop_requested() {
                let done = !pred(&guard);
                return Ok((guard, done));
            }
            let mutex = guard.mutex();
            // The stop flag is rechecked under the auxiliary lock; the
            // wake-on-stop callback takes the same lock, so a request
            // cannot slip in between the check and the park.
            self.bridge
                .park_checked(|| token.stop_requested(), move || drop(guard), None);
            guard = mutex.lock()?;
        }
    }

    /// Like [`Condvar::wait_while_or_stopped`], but also bounded by
    /// `timeout`.
    ///
    /// Returns the guard together with the predicate's value at return. A
    /// false return therefore means the wait ended on a stop request or on
    /// the deadline with the condition still unsatisfied.
    pub fn wait_timeout_while_or_stopped<'a, T, F>(
        &self,
        token: &StopToken,
        mut guard: MutexGuard<'a, T>,
        timeout: Duration,
        mut pred: F,
    ) -> Result<(MutexGuard<'a, T>, bool), LockError>
    where
        F: FnMut(&T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let bridge = Arc::clone(&self.bridge);
        let _wake_on_stop = StopCallback::new(token, move || bridge.notify_all());
        loop {
            if !pred(&guard) {
                return Ok((guard, true));
            }
            if token.stop_requested() {
                let done = !pred(&guard);
                return Ok((guard, done));
            }
            let mutex = guard.mutex();
            let result = self.bridge.park_checked(
                || token.stop_requested(),
                move || drop(guard),
                Some(deadline),
            );
            guard = mutex.lock()?;
            if result.timed_out() {
                let done = !pred(&guard);
                return Ok((guard, done));
            }
        }
    }
}

// ============================================================================
// CondvarAny
// ============================================================================

/// Minimal relock capability required by [`CondvarAny`].
///
/// Any lock that can be reacquired from a shared reference qualifies; the
/// guard type carries the actual ownership.
pub trait Lock {
    /// The guard proving the lock is held.
    type Guard<'a>
    where
        Self: 'a;

    /// Blocks until the lock is acquired.
    fn lock(&self) -> Self::Guard<'_>;
}

impl<T> Lock for Mutex<T> {
    type Guard<'a>
        = MutexGuard<'a, T>
    where
        Self: 'a;

    fn lock(&self) -> MutexGuard<'_, T> {
        Mutex::lock(self).expect("mutex poisoned")
    }
}

impl<T> Lock for StdMutex<T> {
    type Guard<'a>
        = std::sync::MutexGuard<'a, T>
    where
        Self: 'a;

    fn lock(&self) -> std::sync::MutexGuard<'_, T> {
        StdMutex::lock(self).unwrap_or_else(PoisonError::into_inner)
    }
}

/// A condition variable usable with any [`Lock`] implementation.
///
/// The caller's lock is bridged through the internal auxiliary pair exactly
/// as for [`Condvar`]; the lock type only needs to support release (by
/// dropping its guard) and blocking reacquisition.
#[derive(Debug, Default, Clone)]
pub struct CondvarAny {
    bridge: Arc<Bridge>,
}

impl CondvarAny {
    /// Creates a new condition variable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes one blocked waiter.
    pub fn notify_one(&self) {
        self.bridge.notify_one();
    }

    /// Wakes all blocked waiters.
    pub fn notify_all(&self) {
        self.bridge.notify_all();
    }

    /// Blocks until notified, releasing the caller's guard while waiting.
    pub fn wait<'a, L: Lock>(&self, lock: &'a L, guard: L::Guard<'a>) -> L::Guard<'a> {
        self.bridge.park(move || drop(guard), None);
        lock.lock()
    }

    /// Blocks until notified or `timeout` elapses.
    pub fn wait_timeout<'a, L: Lock>(
        &self,
        lock: &'a L,
        guard: L::Guard<'a>,
        timeout: Duration,
    ) -> (L::Guard<'a>, WaitTimeoutResult) {
        let result = self
            .bridge
            .park(move || drop(guard), Some(Instant::now() + timeout));
        (lock.lock(), result)
    }

    /// Blocks while `pred` returns true, returning early on a stop request.
    ///
    /// The returned flag carries the predicate's value at return, so a
    /// stopped wait whose condition never held returns false.
    pub fn wait_while_or_stopped<'a, L, F>(
        &self,
        token: &StopToken,
        lock: &'a L,
        mut guard: L::Guard<'a>,
        mut pred: F,
    ) -> (L::Guard<'a>, bool)
    where
        L: Lock,
        F: FnMut(&L::Guard<'a>) -> bool,
    {
        let bridge = Arc::clone(&self.bridge);
        let _wake_on_stop = StopCallback::new(token, move || bridge.notify_all());
        loop {
            if !pred(&guard) {
                return (guard, true);
            }
            if token.stop_requested() {
                let done = !pred(&guard);
                return (guard, done);
            }
            self.bridge
                .park_checked(|| token.stop_requested(), move || drop(guard), None);
            guard = lock.lock();
        }
    }
}
