//! Counting semaphore with permit guards.
//!
//! A semaphore controls access to a finite number of resources through
//! permits. The counter starts at the initial count given at construction
//! and may start at zero for signalling use; an optional maximum caps the
//! counter, and `release` beyond that maximum is a caller bug and panics.
//!
//! Acquired permits are RAII guards: dropping a permit returns its count to
//! the semaphore and wakes waiters. [`SemaphorePermit::forget`] leaks the
//! count for callers pairing a manual release elsewhere.

use std::sync::{Condvar as StdCondvar, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

/// Error returned when a non-blocking or timed acquisition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryAcquireError {
    /// Not enough permits were available.
    NoPermits,
    /// The deadline expired before enough permits became available.
    Timeout,
}

impl std::fmt::Display for TryAcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPermits => write!(f, "no semaphore permits available"),
            Self::Timeout => write!(f, "semaphore acquire timed out"),
        }
    }
}

impl std::error::Error for TryAcquireError {}

/// A counting semaphore for limiting concurrent access.
#[derive(Debug)]
pub struct Semaphore {
    available: StdMutex<usize>,
    cvar: StdCondvar,
    max_permits: usize,
}

impl Semaphore {
    /// Creates a semaphore with `permits` initially available and no
    /// effective cap on the counter.
    ///
    /// `new(0)` is the start-empty signalling shape: a waiter blocks in
    /// [`Semaphore::acquire`] until another thread releases.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self::with_max_permits(permits, usize::MAX)
    }

    /// Creates a semaphore with `permits` initially available and the
    /// counter capped at `max_permits`.
    ///
    /// # Panics
    ///
    /// Panics if `permits` exceeds `max_permits`.
    #[must_use]
    pub fn with_max_permits(permits: usize, max_permits: usize) -> Self {
        assert!(
            permits <= max_permits,
            "initial permits exceed semaphore capacity"
        );
        Self {
            available: StdMutex::new(permits),
            cvar: StdCondvar::new(),
            max_permits,
        }
    }

    /// Returns the number of currently available permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        *self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the maximum number of permits.
    #[must_use]
    pub const fn max_permits(&self) -> usize {
        self.max_permits
    }

    fn check_count(&self, count: usize) {
        assert!(count > 0, "cannot acquire 0 permits");
        assert!(
            count <= self.max_permits,
            "cannot acquire more permits than semaphore capacity"
        );
    }

    /// Acquires `count` permits, blocking until they are available.
    pub fn acquire(&self, count: usize) -> SemaphorePermit<'_> {
        self.check_count(count);
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *available < count {
            available = self
                .cvar
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= count;
        SemaphorePermit {
            semaphore: self,
            count,
        }
    }

    /// Attempts to acquire `count` permits without blocking.
    pub fn try_acquire(&self, count: usize) -> Result<SemaphorePermit<'_>, TryAcquireError> {
        self.check_count(count);
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *available < count {
            return Err(TryAcquireError::NoPermits);
        }
        *available -= count;
        Ok(SemaphorePermit {
            semaphore: self,
            count,
        })
    }

    /// Attempts to acquire `count` permits, waiting at most `timeout`.
    pub fn try_acquire_for(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<SemaphorePermit<'_>, TryAcquireError> {
        self.try_acquire_until(count, Instant::now() + timeout)
    }

    /// Attempts to acquire `count` permits until the absolute `deadline`.
    pub fn try_acquire_until(
        &self,
        count: usize,
        deadline: Instant,
    ) -> Result<SemaphorePermit<'_>, TryAcquireError> {
        self.check_count(count);
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *available < count {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(TryAcquireError::Timeout);
            };
            let (reacquired, result) = self
                .cvar
                .wait_timeout(available, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            available = reacquired;
            if result.timed_out() && *available < count {
                return Err(TryAcquireError::Timeout);
            }
        }
        *available -= count;
        Ok(SemaphorePermit {
            semaphore: self,
            count,
        })
    }

    /// Returns `count` permits to the semaphore and wakes waiters.
    ///
    /// # Panics
    ///
    /// Panics if the release would push the counter past the maximum.
    pub fn release(&self, count: usize) {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let total = available
            .checked_add(count)
            .filter(|&total| total <= self.max_permits);
        let Some(total) = total else {
            panic!("semaphore release past capacity");
        };
        *available = total;
        drop(available);
        self.cvar.notify_all();
    }
}

/// A held batch of permits; returned to the semaphore on drop.
#[must_use = "permits are returned immediately if the guard is not held"]
#[derive(Debug)]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
    count: usize,
}

impl SemaphorePermit<'_> {
    /// Returns the number of permits held.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Forgets the permit without returning it to the semaphore.
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release(self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::Arc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn acquire_decrements_and_release_restores() {
        init_test("acquire_decrements_and_release_restores");
        let sem = Semaphore::new(5);
        let permit = sem.acquire(2);
        let available = sem.available_permits();
        crate::assert_with_log!(available == 3, "after acquire", 3usize, available);
        drop(permit);
        let available = sem.available_permits();
        crate::assert_with_log!(available == 5, "after release", 5usize, available);
        crate::test_complete!("acquire_decrements_and_release_restores");
    }

    #[test]
    fn try_acquire_fails_when_exhausted() {
        init_test("try_acquire_fails_when_exhausted");
        let sem = Semaphore::new(1);
        let held = sem.try_acquire(1).expect("first acquire");
        let refused = sem.try_acquire(1);
        let no_permits = matches!(refused, Err(TryAcquireError::NoPermits));
        crate::assert_with_log!(no_permits, "exhausted", true, no_permits);
        drop(held);
        crate::test_complete!("try_acquire_fails_when_exhausted");
    }

    #[test]
    fn timed_acquire_times_out_then_succeeds() {
        init_test("timed_acquire_times_out_then_succeeds");
        let sem = Arc::new(Semaphore::new(1));
        let held = sem.try_acquire(1).expect("initial");

        let contender = Arc::clone(&sem);
        let handle = std::thread::spawn(move || {
            contender
                .try_acquire_for(1, Duration::from_millis(10))
                .is_ok()
        });
        let acquired = handle.join().expect("contender panicked");
        crate::assert_with_log!(!acquired, "timed out", false, acquired);

        drop(held);
        let permit = sem.try_acquire_for(1, Duration::from_millis(100));
        crate::assert_with_log!(permit.is_ok(), "after release", true, permit.is_ok());
        crate::test_complete!("timed_acquire_times_out_then_succeeds");
    }

    #[test]
    fn blocking_handoff_between_threads() {
        init_test("blocking_handoff_between_threads");
        let sem = Arc::new(Semaphore::new(1));
        let held = sem.try_acquire(1).expect("initial");

        let waiter_sem = Arc::clone(&sem);
        let waiter = std::thread::spawn(move || {
            let permit = waiter_sem.acquire(1);
            permit.count()
        });

        std::thread::sleep(Duration::from_millis(10));
        drop(held);
        let count = waiter.join().expect("waiter panicked");
        crate::assert_with_log!(count == 1, "handoff", 1usize, count);
        crate::test_complete!("blocking_handoff_between_threads");
    }

    #[test]
    #[should_panic(expected = "semaphore release past capacity")]
    fn release_past_capacity_panics() {
        let sem = Semaphore::with_max_permits(2, 2);
        sem.release(1);
    }

    #[test]
    fn start_empty_semaphore_signals_a_waiter() {
        init_test("start_empty_semaphore_signals_a_waiter");
        let sem = Arc::new(Semaphore::new(0));

        let waiter_sem = Arc::clone(&sem);
        let waiter = std::thread::spawn(move || {
            waiter_sem.acquire(1).forget();
        });

        std::thread::sleep(Duration::from_millis(10));
        sem.release(1);
        waiter.join().expect("waiter panicked");
        let available = sem.available_permits();
        crate::assert_with_log!(available == 0, "permit consumed", 0usize, available);
        crate::test_complete!("start_empty_semaphore_signals_a_waiter");
    }

    #[test]
    fn forget_leaks_the_permit() {
        init_test("forget_leaks_the_permit");
        let sem = Semaphore::new(3);
        sem.acquire(2).forget();
        let available = sem.available_permits();
        crate::assert_with_log!(available == 1, "leaked", 1usize, available);
        sem.release(2);
        let available = sem.available_permits();
        crate::assert_with_log!(available == 3, "restored", 3usize, available);
        crate::test_complete!("forget_leaks_the_permit");
    }
}
