//! Reader-writer lock built from one mutex and two wake channels.
//!
//! At most one writer OR any number of readers (bounded by a configurable
//! maximum), never both. The invariant is enforced entirely through counters
//! guarded by an internal mutex; two condition variables separate the wake
//! channels so writer and reader admission never race ambiguously:
//!
//! - `writer_gate`: writers wait here, both for the previous writer to leave
//!   and for the reader count to drain to zero
//! - `reader_gate`: readers wait here while a writer is active or the reader
//!   count is saturated
//!
//! A writer claims the writer slot *before* waiting for readers to drain, so
//! incoming readers queue behind it and the writer cannot starve.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar as StdCondvar, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};

/// Default cap on concurrently admitted readers.
pub const DEFAULT_MAX_READERS: usize = usize::MAX;

#[derive(Debug)]
struct RwState {
    writer_active: bool,
    active_readers: usize,
    max_readers: usize,
}

/// A reader-writer lock.
///
/// Shared (read) access is granted to any number of threads up to the
/// configured maximum; exclusive (write) access excludes everything else.
#[derive(Debug)]
pub struct RwLock<T> {
    state: StdMutex<RwState>,
    writer_gate: StdCondvar,
    reader_gate: StdCondvar,
    data: StdRwLock<T>,
}

impl<T> RwLock<T> {
    /// Creates a new lock holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_max_readers(value, DEFAULT_MAX_READERS)
    }

    /// Creates a new lock with a cap on concurrent readers.
    ///
    /// # Panics
    ///
    /// Panics if `max_readers` is zero.
    #[must_use]
    pub fn with_max_readers(value: T, max_readers: usize) -> Self {
        assert!(max_readers > 0, "reader capacity must be non-zero");
        Self {
            state: StdMutex::new(RwState {
                writer_active: false,
                active_readers: 0,
                max_readers,
            }),
            writer_gate: StdCondvar::new(),
            reader_gate: StdCondvar::new(),
            data: StdRwLock::new(value),
        }
    }

    /// Returns the number of currently admitted readers.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active_readers
    }

    /// Returns true if a writer currently holds the lock.
    #[must_use]
    pub fn writer_active(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .writer_active
    }

    /// Consumes the lock, returning the protected value.
    pub fn into_inner(self) -> T {
        self.data
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires shared access, blocking while a writer is active or the
    /// reader count is saturated.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.writer_active || state.active_readers == state.max_readers {
            state = self
                .reader_gate
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.active_readers += 1;
        drop(state);
        let inner = self.data.read().unwrap_or_else(PoisonError::into_inner);
        RwLockReadGuard {
            lock: self,
            inner: Some(inner),
        }
    }

    /// Attempts to acquire shared access without blocking.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.writer_active || state.active_readers == state.max_readers {
            return None;
        }
        state.active_readers += 1;
        drop(state);
        let inner = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Some(RwLockReadGuard {
            lock: self,
            inner: Some(inner),
        })
    }

    /// Acquires exclusive access, blocking until no writer is active and the
    /// reader count has drained to zero.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.writer_active {
            state = self
                .writer_gate
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.writer_active = true;
        while state.active_readers > 0 {
            state = self
                .writer_gate
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(state);
        let inner = self.data.write().unwrap_or_else(PoisonError::into_inner);
        RwLockWriteGuard {
            lock: self,
            inner: Some(inner),
        }
    }

    /// Attempts to acquire exclusive access without blocking.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.writer_active || state.active_readers > 0 {
            return None;
        }
        state.writer_active = true;
        drop(state);
        let inner = self.data.write().unwrap_or_else(PoisonError::into_inner);
        Some(RwLockWriteGuard {
            lock: self,
            inner: Some(inner),
        })
    }

    fn release_shared(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(state.active_readers > 0, "shared release without a reader");
        state.active_readers -= 1;
        let drained = state.active_readers == 0;
        let freed_slot = state.active_readers == state.max_readers - 1;
        drop(state);
        if drained {
            // Broadcast: writer_gate carries both the slot wait and the
            // drain wait, and a single wake landing on a slot waiter would
            // be swallowed while the slot owner sleeps on the drain.
            self.writer_gate.notify_all();
        }
        if freed_slot {
            self.reader_gate.notify_one();
        }
    }

    fn release_exclusive(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(state.writer_active, "exclusive release without a writer");
        state.writer_active = false;
        drop(state);
        self.writer_gate.notify_one();
        self.reader_gate.notify_all();
    }
}

/// Shared-access RAII guard for [`RwLock`].
#[must_use = "the lock is released immediately if the guard is not held"]
pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
    inner: Option<std::sync::RwLockReadGuard<'a, T>>,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_ref().expect("guard accessed after release")
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.inner = None;
        self.lock.release_shared();
    }
}

/// Exclusive-access RAII guard for [`RwLock`].
#[must_use = "the lock is released immediately if the guard is not held"]
pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
    inner: Option<std::sync::RwLockWriteGuard<'a, T>>,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_ref().expect("guard accessed after release")
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("guard accessed after release")
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.inner = None;
        self.lock.release_exclusive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::Arc;
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn multiple_readers_coexist() {
        init_test("multiple_readers_coexist");
        let lock = RwLock::new(7);
        let first = lock.read();
        let second = lock.read();
        crate::assert_with_log!(*first == 7, "first read", 7, *first);
        crate::assert_with_log!(*second == 7, "second read", 7, *second);
        let count = lock.reader_count();
        crate::assert_with_log!(count == 2, "reader count", 2usize, count);
        crate::test_complete!("multiple_readers_coexist");
    }

    #[test]
    fn writer_excluded_while_readers_active() {
        init_test("writer_excluded_while_readers_active");
        let lock = RwLock::new(0);
        let reader = lock.read();
        let refused = lock.try_write().is_none();
        crate::assert_with_log!(refused, "try_write under reader", true, refused);
        drop(reader);
        let admitted = lock.try_write().is_some();
        crate::assert_with_log!(admitted, "try_write after drain", true, admitted);
        crate::test_complete!("writer_excluded_while_readers_active");
    }

    #[test]
    fn readers_excluded_while_writer_active() {
        init_test("readers_excluded_while_writer_active");
        let lock = RwLock::new(0);
        let writer = lock.try_write().expect("write");
        let refused = lock.try_read().is_none();
        crate::assert_with_log!(refused, "try_read under writer", true, refused);
        drop(writer);
        let admitted = lock.try_read().is_some();
        crate::assert_with_log!(admitted, "try_read after writer", true, admitted);
        crate::test_complete!("readers_excluded_while_writer_active");
    }

    #[test]
    fn reader_saturation_blocks_admission() {
        init_test("reader_saturation_blocks_admission");
        let lock = RwLock::with_max_readers(0, 2);
        let first = lock.read();
        let second = lock.read();
        let refused = lock.try_read().is_none();
        crate::assert_with_log!(refused, "saturated", true, refused);
        drop(first);
        let admitted = lock.try_read().is_some();
        crate::assert_with_log!(admitted, "slot freed", true, admitted);
        drop(second);
        crate::test_complete!("reader_saturation_blocks_admission");
    }

    #[test]
    fn pending_writer_waits_for_reader_drain() {
        init_test("pending_writer_waits_for_reader_drain");
        let lock = Arc::new(RwLock::new(0u32));
        let reader = lock.read();

        let writer_lock = Arc::clone(&lock);
        let writer = std::thread::spawn(move || {
            let mut guard = writer_lock.write();
            *guard = 99;
        });

        // Give the writer time to claim the writer slot and park.
        std::thread::sleep(Duration::from_millis(20));
        let writer_admitted = lock.writer_active();
        crate::assert_with_log!(writer_admitted, "writer slot claimed", true, writer_admitted);
        crate::assert_with_log!(*reader == 0, "reader sees old value", 0u32, *reader);
        drop(reader);

        writer.join().expect("writer panicked");
        let value = *lock.read();
        crate::assert_with_log!(value == 99, "writer ran after drain", 99u32, value);
        crate::test_complete!("pending_writer_waits_for_reader_drain");
    }

    #[test]
    fn drain_wake_reaches_the_slot_owner_past_queued_writers() {
        init_test("drain_wake_reaches_the_slot_owner_past_queued_writers");
        use crate::test_utils::assert_completes_within;

        let lock = Arc::new(RwLock::new(0u32));
        let reader = lock.read();

        // One writer claims the slot and parks on the drain; the other
        // queues behind it on the slot. The last reader leaving must wake
        // the slot owner even with another writer camped on the same gate.
        let mut writers = Vec::new();
        for _ in 0..2 {
            let lock = Arc::clone(&lock);
            writers.push(std::thread::spawn(move || {
                *lock.write() += 1;
            }));
        }
        std::thread::sleep(Duration::from_millis(20));
        drop(reader);

        assert_completes_within(Duration::from_secs(5), "queued writers admitted", move || {
            for writer in writers {
                writer.join().expect("writer panicked");
            }
        });
        let value = *lock.read();
        crate::assert_with_log!(value == 2, "both writers ran", 2u32, value);
        crate::test_complete!("drain_wake_reaches_the_slot_owner_past_queued_writers");
    }

    #[test]
    fn exclusion_invariant_under_stress() {
        init_test("exclusion_invariant_under_stress");
        use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

        let lock = Arc::new(RwLock::new(0u64));
        // Side-channel occupancy counters: readers inside, writers inside.
        let readers_inside = Arc::new(AtomicIsize::new(0));
        let writers_inside = Arc::new(AtomicIsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for worker in 0..4usize {
            let lock = Arc::clone(&lock);
            let readers_inside = Arc::clone(&readers_inside);
            let writers_inside = Arc::clone(&writers_inside);
            let violations = Arc::clone(&violations);
            handles.push(std::thread::spawn(move || {
                for i in 0..200usize {
                    if (worker + i) % 4 == 0 {
                        let mut guard = lock.write();
                        let writers = writers_inside.fetch_add(1, Ordering::SeqCst);
                        let readers = readers_inside.load(Ordering::SeqCst);
                        if writers != 0 || readers != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        *guard += 1;
                        writers_inside.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        let guard = lock.read();
                        readers_inside.fetch_add(1, Ordering::SeqCst);
                        if writers_inside.load(Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        let _ = *guard;
                        readers_inside.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        let count = violations.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 0, "no exclusion violations", 0usize, count);
        crate::test_complete!("exclusion_invariant_under_stress");
    }
}
