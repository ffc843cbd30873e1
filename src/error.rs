//! Error types for the futures protocol and task outcomes.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Protocol misuse (double-set, double-retrieve, moved-from handles) is
//!   reported synchronously to the violating caller and is recoverable
//! - Panics inside task bodies are isolated and converted to
//!   [`TaskError::Panicked`]; they never cross a thread boundary raw
//! - Platform failures (thread creation) are wrapped, not leaked as raw
//!   error numbers
//!
//! # Taxonomy
//!
//! - [`FutureError`] / [`FutureErrc`]: violations of the promise/future
//!   protocol itself. Always synchronous, always recoverable.
//! - [`TaskError`]: the failure a waiter observes through a future. Covers
//!   abandoned promises, captured panics, user errors, and spawn failures
//!   funneled into the promise by the eager launch path.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Protocol-violation codes for the promise/future protocol.
///
/// Mirrors the classic futures error taxonomy: each code identifies one way
/// a caller can misuse the protocol, so callers can match on the code
/// portably instead of comparing message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FutureErrc {
    /// The promise was destroyed before supplying a result.
    BrokenPromise,
    /// `get_future` was called a second time on the same promise.
    FutureAlreadyRetrieved,
    /// A result was already stored in the shared state.
    PromiseAlreadySatisfied,
    /// The handle has no shared state (moved-from or defaulted).
    NoState,
}

impl FutureErrc {
    /// Returns the canonical message for this code.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::BrokenPromise => "broken promise",
            Self::FutureAlreadyRetrieved => "future already retrieved",
            Self::PromiseAlreadySatisfied => "promise already satisfied",
            Self::NoState => "no associated state",
        }
    }
}

impl fmt::Display for FutureErrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Error raised for misuse of the promise/future protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("future error: {code}")]
pub struct FutureError {
    /// The specific protocol violation.
    pub code: FutureErrc,
}

impl FutureError {
    /// Creates an error carrying the given code.
    #[must_use]
    pub const fn new(code: FutureErrc) -> Self {
        Self { code }
    }

    /// Returns the protocol-violation code.
    #[must_use]
    pub const fn code(&self) -> FutureErrc {
        self.code
    }
}

impl From<FutureErrc> for FutureError {
    fn from(code: FutureErrc) -> Self {
        Self { code }
    }
}

/// A captured panic, reduced to its human-readable message.
///
/// Task bodies run under `catch_unwind`; the raw payload is downcast to a
/// string here so the capture is `Clone` and can be observed repeatedly
/// through a [`crate::SharedFuture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload(String);

impl PanicPayload {
    /// Extracts the message from a `catch_unwind` payload.
    #[must_use]
    pub fn from_unwind(payload: &(dyn Any + Send)) -> Self {
        if let Some(s) = payload.downcast_ref::<&'static str>() {
            Self((*s).to_string())
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Self(s.clone())
        } else {
            Self("panic payload of unknown type".to_string())
        }
    }

    /// Creates a payload from a plain message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The failure a waiter observes through a future.
///
/// Cloneable so a shared future can hand the same failure to every reader.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The promise was dropped without ever producing a result.
    #[error("broken promise: the producer was destroyed before completing")]
    BrokenPromise,
    /// The task body panicked; the payload was captured.
    #[error("task panicked: {0}")]
    Panicked(PanicPayload),
    /// The task body reported a typed error.
    #[error("task failed: {0}")]
    Failed(#[source] Arc<dyn std::error::Error + Send + Sync>),
    /// The eager launch path could not create its worker thread.
    #[error("task thread could not be spawned: {0}")]
    SpawnFailed(#[source] Arc<std::io::Error>),
}

impl TaskError {
    /// Wraps a user error.
    #[must_use]
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(err))
    }

    /// Captures a panic payload from `catch_unwind`.
    #[must_use]
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        Self::Panicked(PanicPayload::from_unwind(payload))
    }

    /// True if this failure is the broken-promise synthesis.
    #[must_use]
    pub const fn is_broken_promise(&self) -> bool {
        matches!(self, Self::BrokenPromise)
    }

    /// True if this failure is a captured panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn errc_messages_are_stable() {
        init_test("errc_messages_are_stable");
        let msg = FutureErrc::BrokenPromise.to_string();
        crate::assert_with_log!(msg == "broken promise", "broken promise text", "broken promise", msg);
        let msg = FutureErrc::FutureAlreadyRetrieved.to_string();
        crate::assert_with_log!(
            msg == "future already retrieved",
            "retrieved text",
            "future already retrieved",
            msg
        );
        crate::test_complete!("errc_messages_are_stable");
    }

    #[test]
    fn future_error_carries_code() {
        init_test("future_error_carries_code");
        let err = FutureError::new(FutureErrc::PromiseAlreadySatisfied);
        let code = err.code();
        crate::assert_with_log!(
            code == FutureErrc::PromiseAlreadySatisfied,
            "code",
            FutureErrc::PromiseAlreadySatisfied,
            code
        );
        crate::test_complete!("future_error_carries_code");
    }

    #[test]
    fn panic_payload_downcasts_common_types() {
        init_test("panic_payload_downcasts_common_types");
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        let payload = PanicPayload::from_unwind(boxed.as_ref());
        crate::assert_with_log!(
            payload.message() == "static message",
            "static str payload",
            "static message",
            payload.message()
        );

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let payload = PanicPayload::from_unwind(boxed.as_ref());
        crate::assert_with_log!(
            payload.message() == "owned message",
            "string payload",
            "owned message",
            payload.message()
        );
        crate::test_complete!("panic_payload_downcasts_common_types");
    }

    #[test]
    fn task_error_classification() {
        init_test("task_error_classification");
        let broken = TaskError::BrokenPromise;
        crate::assert_with_log!(broken.is_broken_promise(), "broken", true, broken.is_broken_promise());
        let panicked = TaskError::Panicked(PanicPayload::new("boom"));
        crate::assert_with_log!(panicked.is_panic(), "panic", true, panicked.is_panic());
        crate::test_complete!("task_error_classification");
    }
}
