//! Parcore: blocking concurrency runtime support for OS threads.
//!
//! # Overview
//!
//! Parcore provides the runtime-support layer a threaded program leans on:
//! mutual exclusion, condition variables, counting and one-shot coordination,
//! cooperative cancellation, thread lifecycle management, and a
//! promise/future protocol for cross-thread result handoff.
//!
//! # Core Guarantees
//!
//! - **Exactly-once completion**: a promise reaches `success` or `error`
//!   exactly once; racing setters see a typed protocol error
//! - **No hangs from abandonment**: dropping an unfulfilled promise delivers
//!   a broken-promise error to every waiter instead of blocking forever
//! - **Level-triggered cancellation**: a stop request, once made, stays
//!   observable; callbacks run exactly once, late registrations run inline
//! - **Safe callback teardown**: destroying a stop callback that is mid-run
//!   on another thread blocks until that run completes
//! - **Graceful thread shutdown**: a `JThread` requests stop and joins on
//!   drop, turning "forgot to clean up" into cooperative shutdown
//!
//! # Module Structure
//!
//! - [`sync`]: Mutexes, condition variables, reader-writer locks,
//!   semaphores, latches
//! - [`cancel`]: Stop tokens, stop sources, stop callbacks
//! - [`thread`]: Thread and jthread lifecycle, thread-exit hooks
//! - [`task`]: Promise/future/packaged-task protocol and launch policies
//! - [`error`]: Error taxonomy for the futures protocol and task outcomes
//! - [`test_logging`]: Phase/assertion reporting harness for tests
//! - [`test_utils`]: Shared test initialization and assertion macros

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod error;
pub mod sync;
pub mod task;
pub mod test_logging;
pub mod test_utils;
pub mod thread;

// Re-exports for convenient access to core types
pub use cancel::{StopCallback, StopSource, StopToken};
pub use error::{FutureErrc, FutureError, PanicPayload, TaskError};
pub use sync::{
    Condvar, CondvarAny, Latch, Mutex, MutexGuard, RawLock, RawMutex, RecursiveMutex, RwLock,
    Semaphore, WaitTimeoutResult,
};
pub use task::{launch, Future, FutureStatus, Launch, PackagedTask, Promise, SharedFuture};
pub use thread::{at_thread_exit, JThread, Thread};
