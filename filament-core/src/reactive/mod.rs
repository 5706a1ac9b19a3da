//! Reactive primitives.
//!
//! This module implements the core reactive system: signals, computeds, and
//! effects, plus the dependency context and batch scheduler that connect
//! them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`Signal`] is a container for mutable state. Reading it inside a
//! tracking context (a computed or effect) registers that context as a
//! dependent; writing it notifies every stale dependent through the batch
//! scheduler. Each signal carries a monotonic version counter bumped on
//! every effective change.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result and re-evaluates
//! lazily, only when one of its dependencies actually changed. Version
//! stamps keep the staleness check cheap and bound recomputation to at most
//! once per external write, even in diamond-shaped graphs.
//!
//! ## Effects
//!
//! An [`Effect`] is a side-effecting computation that runs when its
//! dependencies change. Effects synchronize reactive state with the outside
//! world: widget properties, logging, timers. The constructor's return value
//! is the owning handle; dropping it (or calling `dispose`) stops the
//! effect.
//!
//! ## Batching
//!
//! [`batch`] groups several writes so dependents run once at scope exit.
//! Writes outside a batch flush immediately.
//!
//! # Implementation notes
//!
//! Dependency discovery is automatic: a thread-local context records which
//! observer is currently running, and every read registers against it. This
//! approach (transparent reactivity) is the one used by SolidJS, Vue 3, and
//! Leptos.

mod computed;
mod context;
mod effect;
mod error;
mod observer;
mod scheduler;
mod signal;

pub use computed::Computed;
pub use context::untracked;
pub use effect::{Cleanup, Effect};
pub use error::ReactiveError;
pub use observer::{DependencyId, ObserverId};
pub use scheduler::batch;
pub use signal::Signal;

/// Shared read capability of [`Signal`] and [`Computed`].
///
/// Consumers that can bind to either a raw cell or a derived value (widget
/// property bindings, for instance) accept `impl Readable<T>` and treat the
/// two uniformly. Reads through this trait track dependencies exactly like
/// the inherent `get` methods.
pub trait Readable<T> {
    /// Get the current value, tracking a dependency if an observer is
    /// running.
    fn get(&self) -> T;

    /// Get the current value without establishing a dependency.
    fn get_untracked(&self) -> T;

    /// The source's current version.
    fn version(&self) -> u64;
}
