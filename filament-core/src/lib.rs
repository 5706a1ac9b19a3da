//! Filament Core
//!
//! This crate provides the reactive state-propagation engine underlying the
//! Filament UI framework:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - Automatic dependency tracking through a scoped observer context
//! - A batched, deduplicating update scheduler
//! - Per-source version clocks for cheap staleness checks
//!
//! The binding layer that maps reactive values onto platform view
//! properties, the layout engine, and animation timers all consume this
//! crate's public contract; none of them contain graph logic of their own.
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_core::{Signal, Computed, Effect, batch};
//!
//! let count = Signal::new(0);
//!
//! let count_clone = count.clone();
//! let doubled = Computed::new(move || count_clone.get() * 2);
//!
//! let count_clone = count.clone();
//! let doubled_clone = doubled.clone();
//! let effect = Effect::new(move || {
//!     println!("count: {}, doubled: {}", count_clone.get(), doubled_clone.get());
//! });
//!
//! count.set(5);
//! // Effect re-ran once: "count: 5, doubled: 10"
//!
//! batch(|| {
//!     count.set(6);
//!     count.set(7);
//! });
//! // Effect re-ran once more, seeing only the final values.
//!
//! drop(effect); // Stops the effect.
//! ```

pub mod reactive;

pub use reactive::{batch, untracked, Cleanup, Computed, Effect, Readable, ReactiveError, Signal};
