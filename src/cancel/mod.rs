//! Cooperative cancellation: stop tokens, stop sources, stop callbacks.
//!
//! A [`StopSource`] owns a cancellation domain; [`StopToken`]s observe it and
//! [`StopCallback`]s run exactly once when a stop is requested. Cancellation
//! is level-triggered and monotonic: once requested, forever requested.
//!
//! # Shared stop state
//!
//! All handles share one state object holding a composite atomic word
//! (bit 0 = "stop requested", higher bits = live source count) so a single
//! atomic read answers both "is it stopped" and "can it still be stopped".
//! Registered callbacks live in a mutex-guarded ordered registry keyed by
//! registration id; the id doubles as the deregistration handle, which
//! avoids the use-after-free hazards of an intrusive list.
//!
//! # Delivery and teardown
//!
//! The caller that wins the 0→1 transition of the request bit delivers every
//! registered callback exactly once, front to back, invoking each outside
//! the registry lock and re-acquiring it between invocations. A callback
//! registered after the bit is set runs inline at registration. Destroying a
//! [`StopCallback`] whose body is mid-run on another thread blocks on a
//! single-use handoff until that run completes; if the destroying thread is
//! the delivering thread itself, the wait is skipped.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::thread::ThreadId;

use crate::sync::Latch;
use crate::thread::abort_fatal;

const STOP_REQUESTED_BIT: u64 = 1;
const SOURCE_UNIT: u64 = 2;

type BoxedCallback = Box<dyn FnOnce() + Send>;

struct Entry {
    /// Taken by the delivering thread immediately before invocation.
    callback: Option<BoxedCallback>,
    /// Counted down once the invocation has returned.
    finished: Arc<Latch>,
}

#[derive(Default)]
struct Registry {
    entries: BTreeMap<u64, Entry>,
    next_id: u64,
    /// The thread currently delivering callbacks, while any are in flight.
    executor: Option<ThreadId>,
}

struct StopState {
    /// Bit 0: stop requested (monotonic). Higher bits: live source count.
    flags: AtomicU64,
    registry: StdMutex<Registry>,
}

impl StopState {
    fn new() -> Self {
        Self {
            flags: AtomicU64::new(SOURCE_UNIT),
            registry: StdMutex::new(Registry::default()),
        }
    }

    fn stop_requested(&self) -> bool {
        self.flags.load(Ordering::Acquire) & STOP_REQUESTED_BIT != 0
    }

    fn stop_possible(&self) -> bool {
        let flags = self.flags.load(Ordering::Acquire);
        flags & STOP_REQUESTED_BIT != 0 || flags >= SOURCE_UNIT
    }

    /// Performs the 0→1 transition and delivers callbacks.
    ///
    /// Returns true only for the winning caller.
    fn request_stop(self: &Arc<Self>) -> bool {
        let prev = self.flags.fetch_or(STOP_REQUESTED_BIT, Ordering::AcqRel);
        if prev & STOP_REQUESTED_BIT != 0 {
            return false;
        }
        tracing::debug!("stop requested; delivering callbacks");
        loop {
            let mut registry = self
                .registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            registry.executor = Some(std::thread::current().id());
            let Some((&id, entry)) = registry.entries.iter_mut().next() else {
                registry.executor = None;
                break;
            };
            let callback = entry.callback.take();
            let finished = Arc::clone(&entry.finished);
            drop(registry);

            // Invoked outside the lock so a callback may touch this same
            // stop state without self-deadlocking. Callbacks must not
            // panic: an unwind here would skip the remaining callbacks and
            // strand any destructor waiting on the finished handoff.
            if let Some(callback) = callback {
                if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    abort_fatal("panic escaped stop callback");
                }
            }

            let mut registry = self
                .registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            registry.entries.remove(&id);
            drop(registry);
            finished.count_down(1);
        }
        true
    }
}

// ============================================================================
// StopSource
// ============================================================================

/// Owner of a cancellation domain; can request a stop.
pub struct StopSource {
    state: Arc<StopState>,
}

impl StopSource {
    /// Creates a new cancellation domain with one live source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(StopState::new()),
        }
    }

    /// Returns an observer token for this domain.
    #[must_use]
    pub fn token(&self) -> StopToken {
        StopToken {
            state: Arc::clone(&self.state),
        }
    }

    /// Requests a stop.
    ///
    /// Returns true only for the call that performs the actual transition;
    /// that call also delivers every registered callback exactly once before
    /// returning. All other callers observe false.
    pub fn request_stop(&self) -> bool {
        self.state.request_stop()
    }

    /// Returns true if a stop has been requested in this domain.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.state.stop_requested()
    }

    /// Returns true while a stop request is still possible (or was made).
    #[must_use]
    pub fn stop_possible(&self) -> bool {
        self.state.stop_possible()
    }
}

impl Default for StopSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StopSource {
    fn clone(&self) -> Self {
        self.state.flags.fetch_add(SOURCE_UNIT, Ordering::AcqRel);
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Drop for StopSource {
    fn drop(&mut self) {
        self.state.flags.fetch_sub(SOURCE_UNIT, Ordering::AcqRel);
    }
}

impl PartialEq for StopSource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for StopSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSource")
            .field("stop_requested", &self.stop_requested())
            .field("stop_possible", &self.stop_possible())
            .finish()
    }
}

// ============================================================================
// StopToken
// ============================================================================

/// Lightweight observer handle for a cancellation domain.
#[derive(Clone)]
pub struct StopToken {
    state: Arc<StopState>,
}

impl StopToken {
    /// Returns true if a stop has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.state.stop_requested()
    }

    /// Returns true if a stop has been requested or any source is alive.
    ///
    /// Once this returns false it stays false: every source is gone and the
    /// request bit was never set, so indefinite waits on this token should
    /// stop blocking.
    #[must_use]
    pub fn stop_possible(&self) -> bool {
        self.state.stop_possible()
    }
}

impl PartialEq for StopToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("stop_requested", &self.stop_requested())
            .field("stop_possible", &self.stop_possible())
            .finish()
    }
}

// ============================================================================
// StopCallback
// ============================================================================

/// A callback registered to run exactly once on stop request.
///
/// If the stop was already requested at registration time the callback runs
/// inline, immediately, on the registering thread. Dropping the handle
/// deregisters the callback; see the module docs for the mid-execution
/// teardown guarantee.
pub struct StopCallback {
    registration: Option<(Arc<StopState>, u64)>,
}

impl StopCallback {
    /// Registers `callback` against the token's domain.
    pub fn new(token: &StopToken, callback: impl FnOnce() + Send + 'static) -> Self {
        let state = Arc::clone(&token.state);
        let mut registry = state
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.stop_requested() {
            // Late registration: run inline, never queued.
            drop(registry);
            callback();
            return Self { registration: None };
        }
        if !state.stop_possible() {
            // No source left; the callback can never run.
            return Self { registration: None };
        }
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.insert(
            id,
            Entry {
                callback: Some(Box::new(callback)),
                finished: Arc::new(Latch::new(1)),
            },
        );
        drop(registry);
        Self {
            registration: Some((state, id)),
        }
    }
}

impl Drop for StopCallback {
    fn drop(&mut self) {
        let Some((state, id)) = self.registration.take() else {
            return;
        };
        let mut registry = state
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let destroying_from_executor = registry.executor == Some(std::thread::current().id());
        let Some(entry) = registry.entries.get_mut(&id) else {
            // Already executed and unlinked.
            return;
        };
        if entry.callback.is_some() {
            // Not yet started; unlink before it can run.
            registry.entries.remove(&id);
            return;
        }
        // In flight. Unless we are the delivering thread itself (a callback
        // destroying a callback), wait for the invocation to finish so the
        // body is never touched after destruction begins.
        let finished = Arc::clone(&entry.finished);
        drop(registry);
        if !destroying_from_executor {
            finished.wait();
        }
    }
}

impl std::fmt::Debug for StopCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopCallback")
            .field("registered", &self.registration.is_some())
            .finish()
    }
}
