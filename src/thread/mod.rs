//! Thread handles with strict join discipline and exit hooks.
//!
//! [`Thread`] wraps an OS thread with the strict ownership rule that a handle
//! must be joined or detached before it is dropped; dropping a joinable
//! handle is a fatal programming error and aborts the process rather than
//! silently leaking a running thread. [`JThread`] relaxes that rule by owning
//! a cancellation domain: its destructor requests a stop and then joins, so
//! scope exit is always safe.
//!
//! [`at_thread_exit`] registers a hook that runs when the calling thread
//! finishes, after its stack has unwound. Hooks run in registration order.

use std::cell::RefCell;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{Builder, JoinHandle, ThreadId};

use crate::cancel::{StopSource, StopToken};

thread_local! {
    static EXIT_HOOKS: ExitHooks = const { ExitHooks(RefCell::new(Vec::new())) };
}

struct ExitHooks(RefCell<Vec<Box<dyn FnOnce()>>>);

impl Drop for ExitHooks {
    fn drop(&mut self) {
        let pending = std::mem::take(&mut *self.0.borrow_mut());
        for hook in pending {
            hook();
        }
    }
}

/// Registers `hook` to run when the calling thread finishes.
///
/// On a spawned [`Thread`] or [`JThread`], hooks run after the thread body
/// has returned, in registration order. A hook registered while the exit
/// hooks are already draining runs immediately on the spot.
pub fn at_thread_exit(hook: impl FnOnce() + 'static) {
    let mut hook: Option<Box<dyn FnOnce()>> = Some(Box::new(hook));
    let _ = EXIT_HOOKS.try_with(|hooks| {
        if let Some(hook) = hook.take() {
            hooks.0.borrow_mut().push(hook);
        }
    });
    // Thread-local storage is tearing down; too late to queue.
    if let Some(hook) = hook {
        hook();
    }
}

pub(crate) fn abort_fatal(context: &str) -> ! {
    tracing::error!(context, "unrecoverable condition; aborting");
    std::process::abort();
}

/// An owned handle to a spawned thread.
///
/// The handle must be consumed by [`Thread::join`] or [`Thread::detach`];
/// dropping it while still joinable aborts the process.
#[derive(Debug)]
pub struct Thread {
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Spawns a thread running `body`.
    ///
    /// A panic escaping `body` is fatal and aborts the process.
    pub fn spawn(body: impl FnOnce() + Send + 'static) -> io::Result<Self> {
        let handle = Builder::new().spawn(move || {
            if catch_unwind(AssertUnwindSafe(body)).is_err() {
                abort_fatal("panic escaped thread body");
            }
        })?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Returns true while the handle still owns a running or unjoined thread.
    #[must_use]
    pub fn is_joinable(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the identifier of the underlying thread.
    ///
    /// # Panics
    ///
    /// Panics if the handle has already been joined or detached.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.handle
            .as_ref()
            .map(|handle| handle.thread().id())
            .unwrap_or_else(|| panic!("thread handle is not joinable"))
    }

    /// Blocks until the thread finishes and consumes the handle.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            // The trampoline aborts on panic, so join cannot observe one.
            let _ = handle.join();
        }
    }

    /// Releases ownership; the thread keeps running unobserved.
    pub fn detach(mut self) {
        self.handle.take();
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.handle.is_some() && !std::thread::panicking() {
            abort_fatal("joinable thread handle dropped");
        }
    }
}

/// A thread handle that owns a cancellation domain and joins on drop.
///
/// The body receives a [`StopToken`] tied to the handle's [`StopSource`].
/// Dropping the handle requests a stop and then joins, so a `JThread` never
/// outlives its scope and never aborts for lack of a join.
#[derive(Debug)]
pub struct JThread {
    source: StopSource,
    thread: Option<Thread>,
}

impl JThread {
    /// Spawns a thread running `body` with a stop token for this handle.
    pub fn spawn(body: impl FnOnce(StopToken) + Send + 'static) -> io::Result<Self> {
        let source = StopSource::new();
        let token = source.token();
        let thread = Thread::spawn(move || body(token))?;
        Ok(Self {
            source,
            thread: Some(thread),
        })
    }

    /// Returns the stop source owned by this handle.
    #[must_use]
    pub fn stop_source(&self) -> StopSource {
        self.source.clone()
    }

    /// Returns a stop token observing this handle's domain.
    #[must_use]
    pub fn stop_token(&self) -> StopToken {
        self.source.token()
    }

    /// Requests a stop on this handle's domain.
    pub fn request_stop(&self) -> bool {
        self.source.request_stop()
    }

    /// Returns true while the handle still owns the thread.
    #[must_use]
    pub fn is_joinable(&self) -> bool {
        self.thread.as_ref().is_some_and(Thread::is_joinable)
    }

    /// Returns the identifier of the underlying thread.
    ///
    /// # Panics
    ///
    /// Panics if the handle has already been joined or detached.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.thread
            .as_ref()
            .map(Thread::id)
            .unwrap_or_else(|| panic!("thread handle is not joinable"))
    }

    /// Blocks until the thread finishes, without requesting a stop.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            thread.join();
        }
    }

    /// Releases ownership without stopping the thread.
    pub fn detach(mut self) {
        if let Some(thread) = self.thread.take() {
            thread.detach();
        }
    }
}

impl Drop for JThread {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.source.request_stop();
            thread.join();
        }
    }
}
