//! Observer and source plumbing for the reactive graph.
//!
//! Two capability traits connect the graph:
//!
//! - [`Source`] is anything that can be depended on (a signal or a computed).
//!   Sources carry a monotonic version counter that is bumped on every
//!   effective change, so dependents can decide cheaply whether they are
//!   stale without recomputing anything.
//!
//! - [`Observer`] is anything that can be notified of a change (a computed
//!   or an effect). Observers are held by sources only through weak
//!   references, so dropping the owning handle is enough to collect them.
//!
//! The shared bookkeeping lives in two small containers: [`DependencySet`]
//! (what an observer read during its last run, keyed by dependency identity)
//! and [`ObserverSet`] (who is subscribed to a source, keyed by observer
//! identity). Both use insertion-ordered maps so notification order follows
//! first-read / first-subscribe order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

/// Unique identifier for an observer (computed or effect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Generate a new unique observer ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a dependency (signal or computed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyId(u64);

impl DependencyId {
    /// Generate a new unique dependency ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for DependencyId {
    fn default() -> Self {
        Self::new()
    }
}

/// A value that observers can depend on.
pub(crate) trait Source: Send + Sync {
    /// The identity of this source in dependency maps.
    fn dependency_id(&self) -> DependencyId;

    /// Current version. Bumped by exactly one on every effective change.
    fn version(&self) -> u64;

    /// Whether this source may hold a different value than it did when a
    /// dependent last saw version `since`. For signals this is a plain
    /// version comparison; computeds also report true while they are dirty
    /// or while any of their own dependencies has advanced.
    fn maybe_changed(&self, since: u64) -> bool;

    /// Drop the edge to `observer`. Called when an observer rebuilds its
    /// dependency set or is disposed.
    fn remove_observer(&self, observer: ObserverId);
}

/// A computation that can be notified when a dependency changes.
pub(crate) trait Observer: Send + Sync {
    fn observer_id(&self) -> ObserverId;

    /// False once the observer is disposed. Checked at dequeue time.
    fn is_active(&self) -> bool;

    /// Record a source read while this observer was the current context.
    fn record_source(&self, source: &Arc<dyn Source>);

    /// Whether `version` of dependency `dep` is newer than what this
    /// observer saw on its last run.
    fn is_stale_for(&self, dep: DependencyId, version: u64) -> bool;

    /// React to a change notification. Invoked by the scheduler during a
    /// flush: computeds mark themselves dirty and propagate, effects re-run.
    fn notify(self: Arc<Self>);
}

/// One tracked dependency edge: the version seen at the last run plus a
/// non-owning handle back to the source.
struct TrackedSource {
    seen_version: u64,
    source: Weak<dyn Source>,
}

/// The set of sources an observer read during its most recent run.
///
/// Rebuilt from scratch on every run: `detach_all` severs the observer side
/// of every edge, then reads re-record themselves. Branches that were not
/// taken on the new run therefore leave no stale edges behind.
pub(crate) struct DependencySet {
    id: ObserverId,
    sources: Mutex<IndexMap<DependencyId, TrackedSource>>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self {
            id: ObserverId::new(),
            sources: Mutex::new(IndexMap::new()),
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Record a read of `source`, remembering its current version.
    pub fn record(&self, source: &Arc<dyn Source>) {
        self.sources.lock().insert(
            source.dependency_id(),
            TrackedSource {
                seen_version: source.version(),
                source: Arc::downgrade(source),
            },
        );
    }

    /// Whether `version` of `dep` is ahead of what was seen last run.
    ///
    /// An unknown dependency counts as stale: no version information means
    /// no basis for skipping the update.
    pub fn is_stale_for(&self, dep: DependencyId, version: u64) -> bool {
        match self.sources.lock().get(&dep) {
            Some(tracked) => version > tracked.seen_version,
            None => true,
        }
    }

    /// Whether any tracked source may have changed since the last run.
    pub fn any_stale(&self) -> bool {
        let sources = self.sources.lock();
        sources.values().any(|tracked| {
            tracked
                .source
                .upgrade()
                .is_some_and(|source| source.maybe_changed(tracked.seen_version))
        })
    }

    /// Sever every edge: unsubscribe from all tracked sources and clear.
    pub fn detach_all(&self) {
        let drained: Vec<TrackedSource> = {
            let mut sources = self.sources.lock();
            sources.drain(..).map(|(_, tracked)| tracked).collect()
        };
        for tracked in drained {
            if let Some(source) = tracked.source.upgrade() {
                source.remove_observer(self.id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sources.lock().len()
    }
}

/// The observers subscribed to a source, held weakly.
///
/// A source never owns its observers; the owning handle (the `Effect` value
/// or the last `Computed` clone) decides their lifetime. Dead entries are
/// pruned whenever a snapshot is taken.
pub(crate) struct ObserverSet {
    observers: Mutex<IndexMap<ObserverId, Weak<dyn Observer>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(IndexMap::new()),
        }
    }

    /// Subscribe `observer`. Re-subscribing is idempotent.
    pub fn register(&self, observer: &Arc<dyn Observer>) {
        self.observers
            .lock()
            .insert(observer.observer_id(), Arc::downgrade(observer));
    }

    /// Remove the observer with the given ID, if present.
    pub fn remove(&self, id: ObserverId) {
        self.observers.lock().shift_remove(&id);
    }

    /// Snapshot the live observers in subscription order, dropping entries
    /// whose owner has gone away.
    pub fn snapshot(&self) -> SmallVec<[Arc<dyn Observer>; 4]> {
        let mut observers = self.observers.lock();
        let mut live = SmallVec::new();
        observers.retain(|_, weak| match weak.upgrade() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });
        live
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }
}
