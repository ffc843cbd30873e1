//! Single-use countdown latch.
//!
//! A latch starts at a non-negative count and only ever decreases; reaching
//! zero is terminal and wakes every waiter. Unlike a semaphore it cannot be
//! reset or re-armed, which makes it the right shape for one-shot handoffs
//! (the stop-callback teardown handshake uses one internally).

use std::sync::{Condvar as StdCondvar, Mutex as StdMutex, PoisonError};

/// A single-use countdown synchronization point.
#[derive(Debug)]
pub struct Latch {
    count: StdMutex<usize>,
    cvar: StdCondvar,
}

impl Latch {
    /// Creates a latch with the given initial count.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            count: StdMutex::new(count),
            cvar: StdCondvar::new(),
        }
    }

    /// Returns the current count.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decrements the count by `n`, clamped at zero.
    ///
    /// If the count reaches zero, all waiters are woken. Decrementing an
    /// already-zero latch is a no-op; the count never goes negative.
    pub fn count_down(&self, n: usize) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(n);
        let reached_zero = *count == 0;
        drop(count);
        if reached_zero {
            self.cvar.notify_all();
        }
    }

    /// Returns true if the count has reached zero, without blocking.
    #[must_use]
    pub fn try_wait(&self) -> bool {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) == 0
    }

    /// Blocks until the count reaches zero.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .cvar
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Decrements by `n` and then waits for the count to reach zero.
    pub fn arrive_and_wait(&self, n: usize) {
        self.count_down(n);
        self.wait();
    }
}
