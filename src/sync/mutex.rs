//! Mutual exclusion: raw mutexes, a data-carrying mutex, and multi-lock
//! acquisition.
//!
//! The raw primitives ([`RawMutex`], [`RecursiveMutex`]) expose the bare
//! lock/try-lock/unlock surface needed to compose them generically (see
//! [`lock_all`]). [`Mutex`] layers data ownership and RAII guards on top of
//! [`RawMutex`] so ordinary callers never touch `unlock` by hand.
//!
//! # Unlock precondition
//!
//! `RawLock::unlock` requires that the calling thread currently holds the
//! lock. This is a documented precondition, not a runtime check; the
//! guard-based [`Mutex`] API makes the misuse unrepresentable.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar as StdCondvar, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Minimal lock capability: blocking, non-blocking, and release.
///
/// Implemented by [`RawMutex`] and [`RecursiveMutex`]; object-safe so
/// heterogeneous lock sets can be acquired together via [`lock_all`].
pub trait RawLock {
    /// Blocks until the lock is acquired.
    fn lock(&self);
    /// Attempts to acquire without blocking. Returns `true` on success.
    fn try_lock(&self) -> bool;
    /// Releases the lock. The caller must currently hold it.
    fn unlock(&self);
}

/// Error returned when locking a poisoned [`Mutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// A panic occurred while the lock was held.
    Poisoned,
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poisoned => write!(f, "mutex poisoned"),
        }
    }
}

impl std::error::Error for LockError {}

/// Error returned when a non-blocking or timed lock attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLockError {
    /// The lock is held by another thread.
    WouldBlock,
    /// The deadline expired before the lock became available.
    Timeout,
    /// A panic occurred while the lock was held.
    Poisoned,
}

impl std::fmt::Display for TryLockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WouldBlock => write!(f, "mutex is locked"),
            Self::Timeout => write!(f, "mutex lock timed out"),
            Self::Poisoned => write!(f, "mutex poisoned"),
        }
    }
}

impl std::error::Error for TryLockError {}

// ============================================================================
// RawMutex
// ============================================================================

/// A non-recursive mutex with blocking, non-blocking, and timed acquisition.
///
/// Re-locking from the owning thread deadlocks, as for any non-recursive
/// mutex. Timed acquisition translates a deadline expiry into `false`
/// rather than an error.
#[derive(Debug, Default)]
pub struct RawMutex {
    state: StdMutex<bool>,
    cvar: StdCondvar,
}

impl RawMutex {
    /// Creates an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StdMutex::new(false),
            cvar: StdCondvar::new(),
        }
    }

    /// Returns true if the mutex is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attempts to acquire the mutex, waiting at most `timeout`.
    ///
    /// Returns `true` if the lock was acquired, `false` on deadline expiry.
    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        self.try_lock_until(Instant::now() + timeout)
    }

    /// Attempts to acquire the mutex until the absolute `deadline`.
    pub fn try_lock_until(&self, deadline: Instant) -> bool {
        let mut locked = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *locked {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (guard, result) = self
                .cvar
                .wait_timeout(locked, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            locked = guard;
            if result.timed_out() && *locked {
                return false;
            }
        }
        *locked = true;
        true
    }
}

impl RawLock for RawMutex {
    fn lock(&self) {
        let mut locked = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *locked {
            locked = self
                .cvar
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
    }

    fn try_lock(&self) -> bool {
        let mut locked = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }

    fn unlock(&self) {
        let mut locked = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(*locked, "unlock of an unheld RawMutex");
        *locked = false;
        drop(locked);
        self.cvar.notify_one();
    }
}

// ============================================================================
// RecursiveMutex
// ============================================================================

#[derive(Debug, Default)]
struct RecursiveState {
    owner: Option<ThreadId>,
    depth: u32,
}

/// A mutex that may be re-locked by the thread that already holds it.
///
/// Each `lock` by the owner increments a depth counter; the mutex is
/// released when `unlock` has been called once per acquisition.
#[derive(Debug, Default)]
pub struct RecursiveMutex {
    state: StdMutex<RecursiveState>,
    cvar: StdCondvar,
}

impl RecursiveMutex {
    /// Creates an unlocked recursive mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current recursion depth held by the calling thread.
    #[must_use]
    pub fn held_depth(&self) -> u32 {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.owner == Some(std::thread::current().id()) {
            state.depth
        } else {
            0
        }
    }
}

impl RawLock for RecursiveMutex {
    fn lock(&self) {
        let me = std::thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.owner == Some(me) {
            state.depth += 1;
            return;
        }
        while state.owner.is_some() {
            state = self
                .cvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.owner = Some(me);
        state.depth = 1;
    }

    fn try_lock(&self) -> bool {
        let me = std::thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.owner {
            Some(owner) if owner == me => {
                state.depth += 1;
                true
            }
            Some(_) => false,
            None => {
                state.owner = Some(me);
                state.depth = 1;
                true
            }
        }
    }

    fn unlock(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert_eq!(
            state.owner,
            Some(std::thread::current().id()),
            "unlock of a RecursiveMutex not held by this thread"
        );
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.cvar.notify_one();
        }
    }
}

// ============================================================================
// Multi-lock acquisition
// ============================================================================

/// Acquires every lock in `locks` without deadlocking against other callers.
///
/// Sequential try-lock with full backoff: the starting lock is acquired
/// blocking, the rest are try-locked in order; on the first failure all held
/// locks are released and the next round starts at the lock that was
/// contended. All locks are held when this returns; release them with
/// [`RawLock::unlock`] (or [`unlock_all`]) in any order.
pub fn lock_all(locks: &[&dyn RawLock]) {
    if locks.is_empty() {
        return;
    }
    let n = locks.len();
    let mut start = 0;
    loop {
        locks[start].lock();
        let mut contended = None;
        let mut acquired = 1;
        for i in 1..n {
            let idx = (start + i) % n;
            if locks[idx].try_lock() {
                acquired += 1;
            } else {
                contended = Some(idx);
                break;
            }
        }
        let Some(idx) = contended else {
            return;
        };
        tracing::trace!(start, contended = idx, "lock_all backoff");
        for i in 0..acquired {
            locks[(start + i) % n].unlock();
        }
        std::thread::yield_now();
        start = idx;
    }
}

/// Attempts to acquire every lock in `locks` without blocking.
///
/// On success all locks are held. On failure no locks are held and the index
/// of the first unavailable lock is returned.
pub fn try_lock_all(locks: &[&dyn RawLock]) -> Result<(), usize> {
    for (i, lock) in locks.iter().enumerate() {
        if !lock.try_lock() {
            for held in &locks[..i] {
                held.unlock();
            }
            return Err(i);
        }
    }
    Ok(())
}

/// Releases every lock in `locks`. Each must be held by the caller.
pub fn unlock_all(locks: &[&dyn RawLock]) {
    for lock in locks {
        lock.unlock();
    }
}

// ============================================================================
// Mutex<T>
// ============================================================================

/// A data-carrying mutex with RAII guards.
///
/// Built on [`RawMutex`] for the locking protocol; the protected value lives
/// in an interior cell acquired only after the logical lock is won, so no
/// unsafe code is needed.
///
/// # Poisoning
///
/// If a thread panics while holding the guard, the mutex is marked poisoned
/// and later lock attempts fail with [`LockError::Poisoned`].
#[derive(Debug, Default)]
pub struct Mutex<T> {
    raw: RawMutex,
    poisoned: AtomicBool,
    data: StdRwLock<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(),
            poisoned: AtomicBool::new(false),
            data: StdRwLock::new(value),
        }
    }

    /// Returns true if the mutex is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Returns true if a panic occurred while the lock was held.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Consumes the mutex, returning the protected value.
    pub fn into_inner(self) -> T {
        self.data
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self) -> MutexGuard<'_, T> {
        let inner = self
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        MutexGuard {
            mutex: self,
            inner: Some(inner),
        }
    }

    /// Acquires the mutex, blocking until it is available.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>, LockError> {
        if self.is_poisoned() {
            return Err(LockError::Poisoned);
        }
        self.raw.lock();
        Ok(self.guard())
    }

    /// Attempts to acquire the mutex without blocking.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, TryLockError> {
        if self.is_poisoned() {
            return Err(TryLockError::Poisoned);
        }
        if self.raw.try_lock() {
            Ok(self.guard())
        } else {
            Err(TryLockError::WouldBlock)
        }
    }

    /// Attempts to acquire the mutex, waiting at most `timeout`.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<MutexGuard<'_, T>, TryLockError> {
        self.try_lock_until(Instant::now() + timeout)
    }

    /// Attempts to acquire the mutex until the absolute `deadline`.
    pub fn try_lock_until(&self, deadline: Instant) -> Result<MutexGuard<'_, T>, TryLockError> {
        if self.is_poisoned() {
            return Err(TryLockError::Poisoned);
        }
        if self.raw.try_lock_until(deadline) {
            Ok(self.guard())
        } else {
            Err(TryLockError::Timeout)
        }
    }

    pub(crate) fn raw(&self) -> &RawMutex {
        &self.raw
    }
}

/// RAII guard for [`Mutex`]; releases the lock on every exit path.
#[must_use = "the lock is released immediately if the guard is not held"]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    inner: Option<std::sync::RwLockWriteGuard<'a, T>>,
}

impl<'a, T> MutexGuard<'a, T> {
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_ref().expect("guard accessed after release")
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("guard accessed after release")
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.mutex.poisoned.store(true, Ordering::Release);
        }
        // Release the data cell before the logical lock so the next owner
        // never blocks on the cell.
        self.inner = None;
        self.mutex.raw.unlock();
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
    fn raw_mutex_lock_unlock() {
        init_test("raw_mutex_lock_unlock");
        let mutex = RawMutex::new();
        mutex.lock();
        crate::assert_with_log!(mutex.is_locked(), "locked", true, mutex.is_locked());
        let reentry = mutex.try_lock();
        crate::assert_with_log!(!reentry, "try_lock while held", false, reentry);
        mutex.unlock();
        crate::assert_with_log!(!mutex.is_locked(), "unlocked", false, mutex.is_locked());
        crate::test_complete!("raw_mutex_lock_unlock");
    }

    #[test]
    fn raw_mutex_timed_lock_times_out() {
        init_test("raw_mutex_timed_lock_times_out");
        let mutex = Arc::new(RawMutex::new());
        mutex.lock();

        let contender = Arc::clone(&mutex);
        let handle = std::thread::spawn(move || contender.try_lock_for(Duration::from_millis(20)));
        let acquired = handle.join().expect("contender panicked");
        crate::assert_with_log!(!acquired, "timed lock expired", false, acquired);
        mutex.unlock();

        let acquired = mutex.try_lock_for(Duration::from_millis(20));
        crate::assert_with_log!(acquired, "timed lock after release", true, acquired);
        mutex.unlock();
        crate::test_complete!("raw_mutex_timed_lock_times_out");
    }

    #[test]
    fn recursive_mutex_reenters() {
        init_test("recursive_mutex_reenters");
        let mutex = RecursiveMutex::new();
        mutex.lock();
        mutex.lock();
        let ok = mutex.try_lock();
        crate::assert_with_log!(ok, "owner try_lock", true, ok);
        let depth = mutex.held_depth();
        crate::assert_with_log!(depth == 3, "depth", 3u32, depth);
        mutex.unlock();
        mutex.unlock();
        mutex.unlock();
        let depth = mutex.held_depth();
        crate::assert_with_log!(depth == 0, "released", 0u32, depth);
        crate::test_complete!("recursive_mutex_reenters");
    }

    #[test]
    fn recursive_mutex_excludes_other_threads() {
        init_test("recursive_mutex_excludes_other_threads");
        let mutex = Arc::new(RecursiveMutex::new());
        mutex.lock();
        let contender = Arc::clone(&mutex);
        let handle = std::thread::spawn(move || contender.try_lock());
        let acquired = handle.join().expect("contender panicked");
        crate::assert_with_log!(!acquired, "other thread excluded", false, acquired);
        mutex.unlock();
        crate::test_complete!("recursive_mutex_excludes_other_threads");
    }

    #[test]
    fn mutex_guard_protects_data() {
        init_test("mutex_guard_protects_data");
        let mutex = Mutex::new(41);
        {
            let mut guard = mutex.lock().expect("lock");
            *guard += 1;
        }
        let value = *mutex.lock().expect("lock");
        crate::assert_with_log!(value == 42, "value", 42, value);
        crate::test_complete!("mutex_guard_protects_data");
    }

    #[test]
    fn mutex_try_lock_contended() {
        init_test("mutex_try_lock_contended");
        let mutex = Mutex::new(());
        let guard = mutex.lock().expect("lock");
        let second = mutex.try_lock();
        let would_block = matches!(second, Err(TryLockError::WouldBlock));
        crate::assert_with_log!(would_block, "contended", true, would_block);
        drop(guard);
        let third = mutex.try_lock();
        crate::assert_with_log!(third.is_ok(), "available", true, third.is_ok());
        crate::test_complete!("mutex_try_lock_contended");
    }

    #[test]
    fn mutex_poisoned_by_panic() {
        init_test("mutex_poisoned_by_panic");
        let mutex = Arc::new(Mutex::new(0));
        let poisoner = Arc::clone(&mutex);
        let result = std::thread::spawn(move || {
            let _guard = poisoner.lock().expect("lock");
            panic!("poison");
        })
        .join();
        crate::assert_with_log!(result.is_err(), "panicked", true, result.is_err());
        let poisoned = mutex.is_poisoned();
        crate::assert_with_log!(poisoned, "poisoned", true, poisoned);
        let err = mutex.lock();
        let refused = matches!(err, Err(LockError::Poisoned));
        crate::assert_with_log!(refused, "lock refused", true, refused);
        crate::test_complete!("mutex_poisoned_by_panic");
    }

    #[test]
    fn try_lock_all_reports_contended_index() {
        init_test("try_lock_all_reports_contended_index");
        let a = RawMutex::new();
        let b = RawMutex::new();
        let c = RawMutex::new();
        b.lock();
        let locks: [&dyn RawLock; 3] = [&a, &b, &c];
        let result = try_lock_all(&locks);
        let failed_at = result.err();
        crate::assert_with_log!(failed_at == Some(1), "contended index", Some(1), failed_at);
        // Nothing else may still be held after backoff.
        crate::assert_with_log!(!a.is_locked(), "a released", false, a.is_locked());
        crate::assert_with_log!(!c.is_locked(), "c untouched", false, c.is_locked());
        b.unlock();

        let result = try_lock_all(&locks);
        crate::assert_with_log!(result.is_ok(), "all acquired", true, result.is_ok());
        unlock_all(&locks);
        crate::test_complete!("try_lock_all_reports_contended_index");
    }

    #[test]
    fn lock_all_under_contention() {
        init_test("lock_all_under_contention");
        let locks = Arc::new((RawMutex::new(), RawMutex::new(), RawMutex::new()));
        let mut handles = Vec::new();
        for worker in 0..4 {
            let locks = Arc::clone(&locks);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let set: [&dyn RawLock; 3] = [&locks.0, &locks.1, &locks.2];
                    lock_all(&set);
                    unlock_all(&set);
                }
                worker
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        crate::assert_with_log!(!locks.0.is_locked(), "all released", false, locks.0.is_locked());
        crate::test_complete!("lock_all_under_contention");
    }
}
