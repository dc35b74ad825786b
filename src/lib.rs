//! Reactive value containers for GUI state.
//!
//! The crate is built around three layers:
//!
//! - [`Watcher<T>`](watcher::Watcher): an observable box. Assignments are
//!   equality-gated, listeners run synchronously, and disposal under safe
//!   mode turns late mutations into no-ops.
//! - [`CachedWatcher<T, S>`](cached::CachedWatcher): a watcher whose value
//!   survives restarts via an asynchronous key-value store behind a
//!   [`StoreHandle`](store::StoreHandle). Persistence is best-effort and
//!   never blocks or rolls back the in-memory value.
//! - [`gate`]: rebuild gating for UI bindings — predicate suppression,
//!   throttle windows, and multi-source aggregation over anything
//!   [`Listenable`](watcher::Listenable).
//!
//! Everything is single-threaded and cooperative; the asynchronous edges
//! (cache reads and writes, debounce timers) run on a
//! [`Scheduler`](scheduler::Scheduler) such as the `futures`-backed
//! [`LocalScheduler`](scheduler::LocalScheduler).
//!
//! ```
//! use watchkit::prelude::*;
//!
//! let counter = Watcher::new(0);
//! let mut handle = counter.on_change(|v| println!("counter is now {v}"));
//!
//! counter.set(1); // notifies
//! counter.set(1); // equal value: nothing happens
//! handle.unsubscribe();
//! ```

pub mod cached;
pub mod gate;
pub mod prelude;
pub mod rc;
pub mod scheduler;
pub mod store;
pub mod subscription;
pub mod watcher;

pub use prelude::*;
