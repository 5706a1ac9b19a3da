//! Error taxonomy for the reactive engine.
//!
//! Most failures here are not errors at all: disposing an effect twice is a
//! no-op, and a computation that captures no dependencies simply never
//! re-runs. The one real failure mode is a user computation panicking.
//!
//! Propagation policy:
//!
//! - A panicking `Computed` closure unwinds to the caller of `get()`; the
//!   computed stays dirty so the next read retries. [`Computed::try_get`]
//!   converts the unwind into a [`ReactiveError`] for callers that must not
//!   panic.
//! - A panicking effect closure unwinds out of `Effect::new` on the initial
//!   synchronous run, but is caught, logged, and isolated by the scheduler
//!   on batched re-runs so one broken binding cannot starve the rest.
//!
//! [`Computed::try_get`]: crate::reactive::Computed::try_get

use std::any::Any;

use thiserror::Error;

/// Errors surfaced by the reactive engine.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A user-supplied computation panicked while being evaluated.
    #[error("reactive computation panicked: {0}")]
    ComputationFailed(String),
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
