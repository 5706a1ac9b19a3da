//! Dependency context.
//!
//! The context tracks which observer is currently running. This enables
//! automatic dependency discovery: when a signal or computed is read, the
//! current observer is registered as a dependent and the version it saw is
//! recorded.
//!
//! # Implementation
//!
//! A thread-local stack holds the currently executing observer. Entering a
//! run (an effect execution or a computed recompute) pushes a frame; the
//! frame is popped when the returned guard drops, so the stack stays
//! balanced even if the run panics.
//!
//! Nesting works naturally: a computed recomputing in the middle of an
//! effect run pushes its own frame, and reads made during the recompute are
//! attributed to the computed, not the effect.
//!
//! An [`untracked`] scope pushes an empty frame, so reads inside it are
//! attributed to no one.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use super::observer::{Observer, ObserverId};

thread_local! {
    static OBSERVER_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// One entry in the observer stack. `None` marks an untracked scope.
struct Frame {
    observer: Option<(ObserverId, Weak<dyn Observer>)>,
}

/// Guard that pops its frame when dropped.
pub(crate) struct ObserverScope {
    entered: Option<ObserverId>,
}

impl ObserverScope {
    /// Enter a run for the given observer. Reads performed until the guard
    /// drops are recorded against it.
    pub fn enter(id: ObserverId, observer: Weak<dyn Observer>) -> Self {
        OBSERVER_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                observer: Some((id, observer)),
            });
        });
        Self { entered: Some(id) }
    }

    /// Enter a scope in which reads are not tracked.
    fn enter_untracked() -> Self {
        OBSERVER_STACK.with(|stack| {
            stack.borrow_mut().push(Frame { observer: None });
        });
        Self { entered: None }
    }
}

impl Drop for ObserverScope {
    fn drop(&mut self) {
        OBSERVER_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Catch mismatched push/pop pairs early in debug builds.
            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.observer.as_ref().map(|(id, _)| *id),
                    self.entered,
                    "observer context mismatch on exit"
                );
            }
        });
    }
}

/// The observer currently running on this thread, if any and still alive.
pub(crate) fn current_observer() -> Option<Arc<dyn Observer>> {
    OBSERVER_STACK.with(|stack| {
        stack
            .borrow()
            .last()
            .and_then(|frame| frame.observer.as_ref())
            .and_then(|(_, weak)| weak.upgrade())
    })
}

/// Run `f` without tracking dependencies.
///
/// Reads performed inside `f` do not subscribe the surrounding effect or
/// computed, so later changes to those values will not re-run it.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = ObserverScope::enter_untracked();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::observer::{DependencyId, Source};
    use parking_lot::Mutex;

    struct NamedObserver {
        id: ObserverId,
    }

    impl NamedObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: ObserverId::new(),
            })
        }
    }

    impl Observer for NamedObserver {
        fn observer_id(&self) -> ObserverId {
            self.id
        }

        fn is_active(&self) -> bool {
            true
        }

        fn record_source(&self, _source: &Arc<dyn Source>) {}

        fn is_stale_for(&self, _dep: DependencyId, _version: u64) -> bool {
            true
        }

        fn notify(self: Arc<Self>) {}
    }

    fn enter(observer: &Arc<NamedObserver>) -> ObserverScope {
        let weak: Weak<dyn Observer> = Arc::<NamedObserver>::downgrade(observer);
        ObserverScope::enter(observer.id, weak)
    }

    #[test]
    fn context_tracks_current_observer() {
        let observer = NamedObserver::new();

        assert!(current_observer().is_none());
        {
            let _scope = enter(&observer);
            let current = current_observer().expect("observer should be current");
            assert_eq!(current.observer_id(), observer.id);
        }
        assert!(current_observer().is_none());
    }

    #[test]
    fn nested_scopes_restore_outer_observer() {
        let outer = NamedObserver::new();
        let inner = NamedObserver::new();

        let _outer_scope = enter(&outer);
        assert_eq!(current_observer().unwrap().observer_id(), outer.id);

        {
            let _inner_scope = enter(&inner);
            assert_eq!(current_observer().unwrap().observer_id(), inner.id);
        }

        assert_eq!(current_observer().unwrap().observer_id(), outer.id);
    }

    #[test]
    fn untracked_scope_hides_the_observer() {
        let observer = NamedObserver::new();
        let _scope = enter(&observer);

        let seen = Mutex::new(None);
        untracked(|| {
            *seen.lock() = Some(current_observer().is_none());
        });

        assert_eq!(*seen.lock(), Some(true));
        // Outer scope is visible again.
        assert!(current_observer().is_some());
    }

    #[test]
    fn dead_observer_is_not_current() {
        let observer = NamedObserver::new();
        let weak: Weak<dyn Observer> = Arc::<NamedObserver>::downgrade(&observer);
        let _scope = ObserverScope::enter(observer.id, weak);

        drop(observer);
        assert!(current_observer().is_none());
    }
}
