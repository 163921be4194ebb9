//! Small building blocks for sharing state and results between threads.
//!
//! This library provides three independent primitives that take care of the locking and
//! result-passing that would otherwise be re-implemented at every call site. They can be used
//! separately or together.
//!
//! # Overview
//!
//! ## Maps
//!
//! [`Map`] is a [`HashMap`][std::collections::HashMap] guarded by a reader/writer lock. Any number
//! of threads can read from it at the same time, while writes are exclusive. It can be created in
//! a `const` context and only allocates once something is stored in it.
//!
//! ## Async results
//!
//! [`run_async`] runs a closure on its own thread and hands back an [`AsyncResult`]: a
//! single-value channel that yields the closure's return value once and is closed afterwards.
//!
//! [`try_run`] is its synchronous sibling for fallible code: it runs a closure on the current
//! thread and reduces both panics and returned errors to `false`. [`attempt`] does the same but
//! keeps the cause around as a [`Failure`].
//!
//! ## Fan-out
//!
//! [`Fanout`] is a registry of subscriber channels. Every value passed to [`Fanout::notify`] is
//! delivered to every registered [`Subscriber`][fanout::Subscriber]. See the [`fanout`] module for
//! the exact registration and delivery rules.
//!
//! # Usage
//!
//! Computing values in the background, collecting them in a shared [`Map`], and announcing every
//! finished key to interested parties:
//!
//! ```
//! use std::sync::Arc;
//! use sharekit::{run_async, Fanout, Map};
//!
//! let squares = Arc::new(Map::new());
//! let announcements = Fanout::builder().capacity(8).build();
//! let log = announcements.listen("log");
//!
//! let results: Vec<_> = (1..=4u64)
//!     .map(|n| {
//!         let squares = squares.clone();
//!         run_async(move || {
//!             squares.store(n, n * n);
//!             n
//!         })
//!     })
//!     .collect();
//!
//! for result in &results {
//!     let n = result.recv().expect("task has panicked");
//!     announcements.notify([n]);
//! }
//!
//! assert_eq!(squares.get(&3u64), 9);
//! let mut announced: Vec<_> = std::iter::from_fn(|| log.try_recv().ok().flatten()).collect();
//! announced.sort();
//! assert_eq!(announced, [1, 2, 3, 4]);
//! ```
//!
//! # Locking discipline
//!
//! None of the operations in this crate report errors. Misuse shows up as a deadlock instead:
//!
//! - A callback passed to [`Map::range`] must not modify the same [`Map`], since the read lock is
//!   held for the whole iteration and is not reentrant.
//! - Subscribers of a [`Fanout`] with bounded channels have to be drained (or dropped), since
//!   [`Fanout::notify`] waits for them. [`Fanout::notify_timeout`] can be used to put a bound on
//!   that wait.

pub mod empty;
pub mod fanout;
mod map;
mod sync;
mod task;

pub use fanout::Fanout;
pub use map::Map;
pub use task::{attempt, run_async, try_run, AsyncResult, Failure, TaskBuilder};
