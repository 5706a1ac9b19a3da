//! Signal implementation.
//!
//! A Signal is the fundamental reactive primitive: a mutable cell holding a
//! value and a change counter.
//!
//! # How signals work
//!
//! 1. When a signal is read inside an observer run (a computed recompute or
//!    an effect execution), the signal registers that observer as a
//!    dependent and the observer records the version it saw.
//!
//! 2. When a signal's value changes, its version is bumped by exactly one
//!    and every dependent whose seen version is now behind is handed to the
//!    batch scheduler.
//!
//! 3. Writing a value equal to the current one is a no-op: no version bump,
//!    no notifications.
//!
//! # Ownership
//!
//! `Signal<T>` is a cheap clone sharing one underlying cell. The observer
//! set holds only weak references, so a signal never keeps an effect or a
//! computed alive; dropping the owning handle is enough to collect them.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::context;
use super::observer::{DependencyId, ObserverSet, Source};
use super::scheduler;
use super::Readable;

/// A reactive cell holding a value of type `T`.
///
/// `T` must support equality comparison: writes are filtered through
/// `PartialEq` so that setting an unchanged value never wakes dependents.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value (tracks a dependency inside an effect or computed)
/// let value = count.get();
///
/// // Update the value (notifies dependents through the batch scheduler)
/// count.set(5);
/// ```
pub struct Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

struct SignalInner<T> {
    /// Identity of this signal in dependency maps.
    id: DependencyId,

    /// The current value.
    value: RwLock<T>,

    /// Monotonic change counter. Bumped by exactly one per effective write.
    version: AtomicU64,

    /// Dependents, held weakly.
    observers: ObserverSet,
}

impl<T> Source for SignalInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn dependency_id(&self) -> DependencyId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn maybe_changed(&self, since: u64) -> bool {
        self.version() > since
    }

    fn remove_observer(&self, observer: super::observer::ObserverId) {
        self.observers.remove(observer);
    }
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: DependencyId::new(),
                value: RwLock::new(initial),
                version: AtomicU64::new(0),
                observers: ObserverSet::new(),
            }),
        }
    }

    /// Get the current value.
    ///
    /// When called inside an observer run this also registers the running
    /// observer as a dependent and records the version it saw.
    pub fn get(&self) -> T {
        if let Some(observer) = context::current_observer() {
            self.inner.observers.register(&observer);
            let source: Arc<dyn Source> = self.inner.clone();
            observer.record_source(&source);
        }
        self.inner.value.read().clone()
    }

    /// Get the current value without establishing a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value and notify dependents.
    ///
    /// Writing a value equal to the current one is a no-op. Otherwise the
    /// version advances by one and every stale dependent is enqueued; if no
    /// batch is open, the write opens and flushes one itself, so dependents
    /// have run by the time `set` returns.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.inner.value.write();
            if *guard == value {
                trace!(signal = self.inner.id.raw(), "unchanged write skipped");
                return;
            }
            *guard = value;
        }
        let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(signal = self.inner.id.raw(), version, "signal changed");

        scheduler::batch(|| self.notify_observers(version));
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.inner.value.read();
            f(&guard)
        };
        self.set(new_value);
    }

    /// Enqueue every live dependent whose seen version is behind `version`.
    fn notify_observers(&self, version: u64) {
        for observer in self.inner.observers.snapshot() {
            if !observer.is_active() {
                self.inner.observers.remove(observer.observer_id());
                continue;
            }
            if observer.is_stale_for(self.inner.id, version) {
                scheduler::enqueue(observer);
            }
        }
    }

    /// The signal's current version.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// The raw identity of this signal.
    pub fn id(&self) -> u64 {
        self.inner.id.raw()
    }

    /// Number of registered dependents (live or not yet pruned).
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }
}

impl<T> Readable<T> for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn get(&self) -> T {
        Signal::get(self)
    }

    fn get_untracked(&self) -> T {
        Signal::get_untracked(self)
    }

    fn version(&self) -> u64 {
        Signal::version(self)
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id.raw())
            .field("value", &self.get_untracked())
            .field("version", &self.version())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}
