//! Computed implementation.
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How computeds work
//!
//! 1. A computed starts dirty; the first `get` runs the closure and caches
//!    the result.
//!
//! 2. The closure runs under the dependency context, so every signal or
//!    computed it reads is recorded together with the version seen. Old
//!    edges are severed first: branches not taken on the new run leave no
//!    stale subscriptions behind.
//!
//! 3. When a dependency changes, the computed marks itself dirty during the
//!    flush and passes the notification on to its own dependents. It does
//!    not recompute yet.
//!
//!    Recomputation is lazy: it happens on the next `get`, and the version
//!    clock guarantees it happens at most once per external write no matter
//!    how many paths lead to the computed (diamond graphs included).
//!
//! 4. The computed's own version is bumped only when the recomputed value
//!    differs from the cache, so equal recomputes do not invalidate
//!    dependents.
//!
//! # Failure
//!
//! A panicking closure unwinds to the caller of `get`; the computed stays
//! dirty and the next `get` retries. Nothing is cached on failure.

use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use super::context::{self, ObserverScope};
use super::error::{panic_message, ReactiveError};
use super::observer::{DependencyId, DependencySet, Observer, ObserverId, ObserverSet, Source};
use super::scheduler;
use super::Readable;

/// A memoized value derived from other reactive values.
///
/// `T` must support equality comparison so that recomputes which produce an
/// unchanged value do not ripple further.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(2);
/// let count_clone = count.clone();
/// let doubled = Computed::new(move || count_clone.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    /// Identity of this computed when acting as a dependency.
    id: DependencyId,

    /// The computation.
    compute: Box<dyn Fn() -> T + Send + Sync>,

    /// Cached result (`None` until first computed).
    cached: Mutex<Option<T>>,

    /// Whether the cache is known to be invalid.
    dirty: AtomicBool,

    /// Bumped only when a recompute produces a different value.
    version: AtomicU64,

    /// What this computed read on its last recompute.
    deps: DependencySet,

    /// Who depends on this computed, held weakly.
    observers: ObserverSet,
}

impl<T> ComputedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn needs_recompute(&self) -> bool {
        self.dirty.load(Ordering::Acquire) || self.deps.any_stale()
    }

    /// Run the closure under the dependency context and refresh the cache.
    ///
    /// The dirty flag is raised for the duration of the run, so a panic
    /// leaves the computed dirty and the next read retries.
    fn recompute(self: &Arc<Self>) {
        self.dirty.store(true, Ordering::Release);
        self.deps.detach_all();

        let new_value = {
            let weak: Weak<dyn Observer> = Arc::<Self>::downgrade(self);
            let _scope = ObserverScope::enter(self.deps.id(), weak);
            (self.compute)()
        };

        let changed = {
            let mut cached = self.cached.lock();
            let changed = cached.as_ref() != Some(&new_value);
            *cached = Some(new_value);
            changed
        };

        if changed {
            let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
            trace!(computed = self.id.raw(), version, "recomputed, value changed");
            // Wake dependents that saw an older version. Inside a flush the
            // puller is deduplicated away; outside one, the batch wrapper
            // flushes before returning to the caller.
            scheduler::batch(|| {
                for observer in self.observers.snapshot() {
                    if observer.is_active() && observer.is_stale_for(self.id, version) {
                        scheduler::enqueue(observer);
                    }
                }
            });
        } else {
            trace!(computed = self.id.raw(), "recomputed, value unchanged");
        }
        self.dirty.store(false, Ordering::Release);
    }
}

impl<T> Source for ComputedInner<T>
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
        self.version() > since || self.dirty.load(Ordering::Acquire) || self.deps.any_stale()
    }

    fn remove_observer(&self, observer: ObserverId) {
        self.observers.remove(observer);
    }
}

impl<T> Observer for ComputedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn observer_id(&self) -> ObserverId {
        self.deps.id()
    }

    fn is_active(&self) -> bool {
        // A computed stays notifiable for as long as it is alive.
        true
    }

    fn record_source(&self, source: &Arc<dyn Source>) {
        self.deps.record(source);
    }

    fn is_stale_for(&self, dep: DependencyId, version: u64) -> bool {
        self.deps.is_stale_for(dep, version)
    }

    /// A dependency changed: mark dirty and pass the notification on.
    ///
    /// The new value of this computed is unknown until someone pulls it, so
    /// dependents are enqueued unconditionally; an already dirty computed
    /// has already propagated and stops the wave here.
    fn notify(self: Arc<Self>) {
        if self.dirty.load(Ordering::Acquire) {
            return;
        }
        if !self.deps.any_stale() {
            trace!(computed = self.id.raw(), "notification ignored, inputs unchanged");
            return;
        }
        self.dirty.store(true, Ordering::Release);
        for observer in self.observers.snapshot() {
            if observer.is_active() {
                scheduler::enqueue(observer);
            }
        }
    }
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new computed with the given closure.
    ///
    /// The closure does not run immediately; it runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ComputedInner {
                id: DependencyId::new(),
                compute: Box::new(compute),
                cached: Mutex::new(None),
                dirty: AtomicBool::new(true),
                version: AtomicU64::new(0),
                deps: DependencySet::new(),
                observers: ObserverSet::new(),
            }),
        }
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Repeated calls with no intervening dependency change return the
    /// cached value without re-invoking the closure. A panicking closure
    /// unwinds to the caller and the computed stays dirty.
    pub fn get(&self) -> T {
        if self.inner.needs_recompute() {
            self.inner.recompute();
        }

        // Behave like a signal towards our own dependents.
        if let Some(observer) = context::current_observer() {
            self.inner.observers.register(&observer);
            let source: Arc<dyn Source> = self.inner.clone();
            observer.record_source(&source);
        }

        self.inner
            .cached
            .lock()
            .clone()
            .expect("clean computed always has a cached value")
    }

    /// Like [`get`](Computed::get), but converts a panicking closure into a
    /// [`ReactiveError`] instead of unwinding.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        catch_unwind(AssertUnwindSafe(|| self.get()))
            .map_err(|payload| ReactiveError::ComputationFailed(panic_message(payload.as_ref())))
    }

    /// The computed's current version.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Whether the cache is currently invalid.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// The raw identity of this computed.
    pub fn id(&self) -> u64 {
        self.inner.id.raw()
    }

    /// Number of dependencies recorded on the last recompute.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.len()
    }

    /// Number of registered dependents (live or not yet pruned).
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }
}

impl<T> Readable<T> for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn get(&self) -> T {
        Computed::get(self)
    }

    fn get_untracked(&self) -> T {
        context::untracked(|| Computed::get(self))
    }

    fn version(&self) -> u64 {
        Computed::version(self)
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id.raw())
            .field("dirty", &self.is_dirty())
            .field("version", &self.version())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn computes_on_first_access() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let computed = Computed::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(computed.get(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeated_gets_use_the_cache() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let signal = Signal::new(3);
        let signal_clone = signal.clone();
        let computed = Computed::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            signal_clone.get() * 2
        });

        assert_eq!(computed.get(), 6);
        assert_eq!(computed.get(), 6);
        assert_eq!(computed.get(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recomputes_when_a_dependency_changes() {
        let signal = Signal::new(5);
        let signal_clone = signal.clone();
        let computed = Computed::new(move || signal_clone.get() * 2);

        assert_eq!(computed.get(), 10);

        signal.set(7);
        assert_eq!(computed.get(), 14);
    }

    #[test]
    fn version_bumps_only_on_value_change() {
        let signal = Signal::new(1);
        let signal_clone = signal.clone();
        // Collapses odd/even to a boolean, so +2 leaves the value unchanged.
        let parity = Computed::new(move || signal_clone.get() % 2 == 0);

        assert!(!parity.get());
        assert_eq!(parity.version(), 1);

        signal.set(3);
        assert!(!parity.get());
        assert_eq!(parity.version(), 1);

        signal.set(4);
        assert!(parity.get());
        assert_eq!(parity.version(), 2);
    }

    #[test]
    fn computed_chains_recompute_through() {
        let base = Signal::new(5);
        let base_clone = base.clone();
        let doubled = Computed::new(move || base_clone.get() * 2);
        let doubled_clone = doubled.clone();
        let plus_ten = Computed::new(move || doubled_clone.get() + 10);

        assert_eq!(doubled.get(), 10);
        assert_eq!(plus_ten.get(), 20);

        base.set(10);
        assert_eq!(doubled.get(), 20);
        assert_eq!(plus_ten.get(), 30);
    }

    #[test]
    fn stale_dependencies_are_pruned_on_recompute() {
        let gate = Signal::new(true);
        let left = Signal::new(1);
        let right = Signal::new(2);

        let gate_clone = gate.clone();
        let left_clone = left.clone();
        let right_clone = right.clone();
        let picked = Computed::new(move || {
            if gate_clone.get() {
                left_clone.get()
            } else {
                right_clone.get()
            }
        });

        assert_eq!(picked.get(), 1);
        assert_eq!(left.observer_count(), 1);
        assert_eq!(right.observer_count(), 0);

        gate.set(false);
        assert_eq!(picked.get(), 2);
        assert_eq!(left.observer_count(), 0);
        assert_eq!(right.observer_count(), 1);
    }

    #[test]
    fn panicking_compute_stays_dirty_and_retries() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let should_fail = Signal::new(true);
        let should_fail_clone = should_fail.clone();

        let computed = Computed::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if should_fail_clone.get() {
                panic!("compute failed");
            }
            99
        });

        let hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let result = computed.try_get();
        std::panic::set_hook(hook);

        assert!(matches!(result, Err(ReactiveError::ComputationFailed(_))));
        assert!(computed.is_dirty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // No error caching: the next read retries cleanly.
        should_fail.set(false);
        assert_eq!(computed.get(), 99);
        assert!(!computed.is_dirty());
    }
}
