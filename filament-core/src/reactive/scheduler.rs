//! Batch scheduler.
//!
//! The scheduler coalesces change notifications so that each observer runs
//! at most once per externally visible update. A write to a signal opens a
//! batch if none is open, enqueues the signal's stale observers, and flushes
//! when the outermost batch closes. [`batch`] lets callers group several
//! writes into one flush.
//!
//! # Queue semantics
//!
//! - FIFO: within one flush, observers run in first-enqueued order.
//! - Deduplicated: an observer enqueued several times in one batch runs
//!   once. Dedup happens at flush time, by observer identity.
//! - Fixed point: observers enqueued *during* a flush (a computed marking a
//!   downstream effect dirty) are appended to the same queue and processed
//!   before the flush returns.
//! - Disposed effects are skipped at dequeue time, not at enqueue time.
//!
//! # Threading
//!
//! The engine runs on a single logical thread (the host UI's event-loop
//! thread), so the depth counter and queue are thread-local: a write made on
//! another thread batches and flushes on that thread. Observer runs are
//! never concurrent within a thread; the per-node bookkeeping maps carry
//! their own locks.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, trace};

use super::error::panic_message;
use super::observer::{Observer, ObserverId};

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = const {
        RefCell::new(SchedulerState {
            depth: 0,
            flushing: false,
            queue: VecDeque::new(),
        })
    };
}

struct SchedulerState {
    /// Reentrant batch depth. Only the outermost close triggers a flush.
    depth: usize,
    /// Guards against reentrant flushes when an observer writes a signal.
    flushing: bool,
    /// Pending notifications, in enqueue order. May contain duplicates;
    /// they collapse to a single execution at flush time.
    queue: VecDeque<Arc<dyn Observer>>,
}

/// Open a batch. Must be paired with [`close_batch`].
pub(crate) fn open_batch() {
    SCHEDULER.with(|state| {
        state.borrow_mut().depth += 1;
    });
}

/// Close a batch. Closing the outermost batch flushes the queue.
pub(crate) fn close_batch() {
    let should_flush = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        state.depth = state.depth.saturating_sub(1);
        state.depth == 0 && !state.flushing
    });
    if should_flush {
        flush();
    }
}

/// Append an observer to the pending queue.
pub(crate) fn enqueue(observer: Arc<dyn Observer>) {
    trace!(observer = observer.observer_id().raw(), "enqueue");
    SCHEDULER.with(|state| {
        state.borrow_mut().queue.push_back(observer);
    });
}

/// Drain the queue, running each distinct observer once.
///
/// A panicking observer is logged and does not abort the flush; every other
/// queued observer still runs.
fn flush() {
    let entered = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        if state.flushing || state.queue.is_empty() {
            false
        } else {
            state.flushing = true;
            true
        }
    });
    if !entered {
        return;
    }

    let mut processed: HashSet<ObserverId> = HashSet::new();
    let mut executed = 0usize;

    loop {
        let next = SCHEDULER.with(|state| state.borrow_mut().queue.pop_front());
        let Some(observer) = next else {
            break;
        };

        let id = observer.observer_id();
        if !processed.insert(id) {
            trace!(observer = id.raw(), "skipping duplicate");
            continue;
        }
        if !observer.is_active() {
            trace!(observer = id.raw(), "skipping disposed observer");
            continue;
        }

        executed += 1;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| Arc::clone(&observer).notify())) {
            error!(
                observer = id.raw(),
                panic = %panic_message(&payload),
                "observer panicked during flush; continuing with remaining observers"
            );
        }
    }

    SCHEDULER.with(|state| state.borrow_mut().flushing = false);
    debug!(executed, "flush complete");
}

/// RAII guard so a batch closes even if the body panics.
struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        close_batch();
    }
}

/// Group several writes into a single coalesced flush.
///
/// Observers that depend on more than one of the written signals run once
/// when the outermost batch closes, not once per write. Batches nest; only
/// the outermost one flushes.
///
/// # Example
///
/// ```rust,ignore
/// let width = Signal::new(10);
/// let height = Signal::new(20);
///
/// batch(|| {
///     width.set(30);
///     height.set(40);
/// });
/// // An effect reading both ran once, not twice.
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    open_batch();
    let _guard = BatchGuard;
    f()
}
