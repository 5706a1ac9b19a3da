//! Effect implementation.
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Effects are the roots that drive observable
//! behavior: pushing a value into a widget property, logging, writing to a
//! file.
//!
//! # How effects work
//!
//! 1. The closure runs once, synchronously, at construction; reads made
//!    during the run establish the initial dependency set.
//!
//! 2. When any dependency changes, the effect is enqueued with the batch
//!    scheduler and re-runs during the flush. Before each re-run the old
//!    dependency edges are severed and rebuilt from the reads that actually
//!    happen.
//!
//! 3. The closure may return a cleanup. The cleanup runs immediately before
//!    the next run and on disposal.
//!
//! # Ownership and disposal
//!
//! The `Effect` value returned by the constructor is the owning handle:
//! sources hold the effect only weakly, so dropping the handle is enough to
//! stop and collect it. `dispose` is explicit, idempotent, and terminal; it
//! runs the pending cleanup and removes the effect from every source's
//! observer set immediately.
//!
//! # Failure
//!
//! A closure that panics during the initial construction-time run unwinds
//! to the caller of `new` (nothing else has been scheduled yet). A panic
//! during a scheduled re-run is caught and logged by the scheduler and does
//! not prevent other queued observers from running.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::context::ObserverScope;
use super::observer::{DependencyId, DependencySet, Observer, ObserverId, Source};

/// Cleanup returned by an effect closure. Runs once, before the next run or
/// on disposal, whichever comes first.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// A side-effecting subscriber that re-runs when its dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// let count_clone = count.clone();
///
/// let effect = Effect::new(move || {
///     println!("count is {}", count_clone.get());
/// });
/// // Printed "count is 0" already.
///
/// count.set(5); // Prints "count is 5".
/// drop(effect); // Or effect.dispose(); further writes print nothing.
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

struct EffectInner {
    /// The effect body. Returns an optional cleanup.
    run_fn: Box<dyn Fn() -> Option<Cleanup> + Send + Sync>,

    /// Cleanup left behind by the most recent run.
    cleanup: Mutex<Option<Cleanup>>,

    /// Cleared exactly once, by `dispose`.
    active: AtomicBool,

    /// What the effect read on its most recent run.
    deps: DependencySet,

    /// Completed runs, for diagnostics and tests.
    run_count: AtomicUsize,
}

impl EffectInner {
    /// Execute one run: prior cleanup, edge rebuild, closure, new cleanup.
    fn execute(self: &Arc<Self>) {
        if !self.active.load(Ordering::Acquire) {
            trace!(effect = self.deps.id().raw(), "skipping run, disposed");
            return;
        }

        if let Some(cleanup) = self.cleanup.lock().take() {
            cleanup();
        }
        self.deps.detach_all();

        let cleanup = {
            let weak: Weak<dyn Observer> = Arc::<Self>::downgrade(self);
            let _scope = ObserverScope::enter(self.deps.id(), weak);
            (self.run_fn)()
        };

        *self.cleanup.lock() = cleanup;
        self.run_count.fetch_add(1, Ordering::Relaxed);
        trace!(
            effect = self.deps.id().raw(),
            dependencies = self.deps.len(),
            "effect ran"
        );
    }

    /// Deactivate, run the pending cleanup, sever all edges. Idempotent.
    fn dispose(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!(effect = self.deps.id().raw(), "effect disposed");
        if let Some(cleanup) = self.cleanup.lock().take() {
            cleanup();
        }
        self.deps.detach_all();
    }
}

impl Observer for EffectInner {
    fn observer_id(&self) -> ObserverId {
        self.deps.id()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn record_source(&self, source: &Arc<dyn Source>) {
        self.deps.record(source);
    }

    fn is_stale_for(&self, dep: DependencyId, version: u64) -> bool {
        self.deps.is_stale_for(dep, version)
    }

    fn notify(self: Arc<Self>) {
        self.execute();
    }
}

impl Effect {
    /// Create a new effect with no cleanup.
    ///
    /// The closure runs immediately to establish the initial dependencies;
    /// a panic in this first run unwinds to the caller.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_cleanup(move || {
            run();
            None
        })
    }

    /// Create a new effect whose closure may return a cleanup.
    ///
    /// The cleanup runs immediately before the next run and on disposal.
    pub fn with_cleanup<F>(run: F) -> Self
    where
        F: Fn() -> Option<Cleanup> + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            run_fn: Box::new(run),
            cleanup: Mutex::new(None),
            active: AtomicBool::new(true),
            deps: DependencySet::new(),
            run_count: AtomicUsize::new(0),
        });
        inner.execute();
        Self { inner }
    }

    /// Permanently stop the effect.
    ///
    /// Runs the pending cleanup, removes the effect from every dependency's
    /// observer set, and prevents all future runs. Calling `dispose` more
    /// than once is a no-op.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether the effect is still live.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Number of dependencies captured by the most recent run.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.len()
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        // The handle owns the effect; letting it go out of scope disposes.
        self.inner.dispose();
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.deps.id().raw())
            .field("active", &self.is_active())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_once_on_creation() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_a_dependency_changes() {
        let signal = Signal::new(0);
        let observed = Arc::new(AtomicI32::new(-1));

        let signal_clone = signal.clone();
        let observed_clone = observed.clone();
        let effect = Effect::new(move || {
            observed_clone.store(signal_clone.get(), Ordering::SeqCst);
        });

        assert_eq!(observed.load(Ordering::SeqCst), 0);

        signal.set(42);
        assert_eq!(observed.load(Ordering::SeqCst), 42);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn dispose_stops_reruns_and_severs_edges() {
        let signal = Signal::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let signal_clone = signal.clone();
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            signal_clone.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(signal.observer_count(), 1);

        effect.dispose();
        assert!(!effect.is_active());
        assert_eq!(signal.observer_count(), 0);

        signal.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Disposal is idempotent.
        effect.dispose();
        assert!(!effect.is_active());
    }

    #[test]
    fn dropping_the_handle_disposes() {
        let signal = Signal::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let signal_clone = signal.clone();
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            signal_clone.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        drop(effect);

        signal.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(signal.observer_count(), 0);
    }

    #[test]
    fn cleanup_runs_before_each_rerun_and_on_dispose() {
        let signal = Signal::new(0);
        let cleanups = Arc::new(AtomicI32::new(0));

        let signal_clone = signal.clone();
        let cleanups_clone = cleanups.clone();
        let effect = Effect::with_cleanup(move || {
            signal_clone.get();
            let cleanups = cleanups_clone.clone();
            Some(Box::new(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            }) as Cleanup)
        });

        assert_eq!(cleanups.load(Ordering::SeqCst), 0);

        // Re-run: the previous cleanup fires first.
        signal.set(1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        // Disposal fires the final pending cleanup, exactly once.
        effect.dispose();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
        effect.dispose();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn effect_with_no_dependencies_never_reruns() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        let unrelated = Signal::new(0);
        unrelated.set(1);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn effect_rebuilds_dependencies_each_run() {
        let gate = Signal::new(true);
        let left = Signal::new(1);
        let right = Signal::new(2);
        let runs = Arc::new(AtomicI32::new(0));

        let gate_clone = gate.clone();
        let left_clone = left.clone();
        let right_clone = right.clone();
        let runs_clone = runs.clone();
        let _effect = Effect::new(move || {
            if gate_clone.get() {
                left_clone.get();
            } else {
                right_clone.get();
            }
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);

        gate.set(false);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(left.observer_count(), 0);

        // The untaken branch no longer triggers the effect.
        left.set(10);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        right.set(20);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
