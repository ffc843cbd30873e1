//! Blocking synchronization primitives.
//!
//! This module provides the lock layer the rest of the crate is built on:
//! everything here blocks the calling OS thread, never an async task.
//!
//! # Primitives
//!
//! - [`RawMutex`] / [`RecursiveMutex`]: bare lock/try-lock/unlock surface,
//!   timed acquisition, multi-lock deadlock avoidance via [`lock_all`]
//! - [`Mutex`]: data-carrying mutex with RAII guards
//! - [`Condvar`] / [`CondvarAny`]: condition variables with predicate,
//!   timed, and stop-token-aware waits
//! - [`RwLock`]: reader-writer lock built from one mutex and two wake
//!   channels, with reader-count saturation
//! - [`Semaphore`]: counting semaphore with blocking and timed acquisition
//! - [`Latch`]: single-use countdown; terminal once it reaches zero
//!
//! # Blocking discipline
//!
//! Each primitive guards its own mutable state with exactly one internal
//! mutex; condition variables are used only for wait/notify, never as a
//! substitute for mutual exclusion. Timed waits are best-effort: a timeout
//! result does not guarantee the condition is still false, so predicates are
//! rechecked once after a reported timeout.

mod condvar;
mod latch;
mod mutex;
mod rwlock;
mod semaphore;

pub use condvar::{Condvar, CondvarAny, Lock, WaitTimeoutResult};
pub use latch::Latch;
pub use mutex::{
    lock_all, try_lock_all, unlock_all, LockError, Mutex, MutexGuard, RawLock, RawMutex,
    RecursiveMutex, TryLockError,
};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use semaphore::{Semaphore, SemaphorePermit, TryAcquireError};
