//! One-shot task results: promises, futures, packaged tasks, launch policies.
//!
//! The pieces share one [`state::SharedState`] per task: a mutex-guarded
//! slot holding the eventual `Result<T, TaskError>`, a condition variable
//! for blocked waiters, and a one-shot wait hook that deferred launches use
//! to run lazily. Completion is write-once; a second set is a protocol
//! error, never a silent overwrite.
//!
//! Reading through a [`Future`] consumes it (`get` takes `self`, so a
//! second read is a compile error); [`SharedFuture`] is the repeatable,
//! cloneable reader for `T: Clone`. A [`Promise`] dropped without producing
//! a result stores [`crate::TaskError::BrokenPromise`] so waiters observe a
//! failure instead of hanging forever.
//!
//! [`launch`] is the policy-driven entry point: eager (a worker thread is
//! spawned immediately), deferred (the body runs inline on the first
//! waiter), or automatic (the first waiter triggers a worker-thread spawn).

mod future;
mod launch;
mod packaged;
mod promise;
mod state;

pub use future::{Future, FutureStatus, SharedFuture};
pub use launch::{launch, Launch};
pub use packaged::PackagedTask;
pub use promise::Promise;
