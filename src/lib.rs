//! Lock-free elimination-backoff stack for Rust
//!
//! A [`Treiber stack`](https://en.wikipedia.org/wiki/Treiber_stack) serializes every push and
//! pop on one CAS of its top pointer, which becomes the bottleneck under contention.
//! `EliminationBackoffStack` keeps that CAS as the fast path, but a thread whose CAS fails
//! backs off into an array of exchangers. There a push and a pop can meet and cancel each
//! other out: the value moves straight from one thread to the other and the shared top is
//! never touched. The more threads contend, the more pairs eliminate, so the stack scales
//! where a plain Treiber stack saturates.
//!
//! Each thread keeps an adaptive `RangePolicy` choosing how many exchangers it spreads over:
//! the range widens after a successful exchange and narrows after a timeout.
//!
//! Popped nodes are reclaimed by `HazardEpoch`, a practical implementation of
//! [`Hazard Pointers`](http://www.cs.otago.ac.nz/cosc440/readings/hazard-pointers.pdf) that
//! uses a global incremental version to decide when no thread can still observe a node,
//! which also rules out the [`ABA problem`](https://en.wikipedia.org/wiki/ABA_problem) on the
//! top pointer.
//!
//! # Examples
//!
//! ```
//! use rs_elimination::elimination_backoff_stack::EliminationBackoffStack;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let stack = Arc::new(EliminationBackoffStack::default());
//! let threads: Vec<_> = (0..4)
//!     .map(|t| {
//!         let stack = stack.clone();
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 stack.push(t * 100 + i);
//!             }
//!         })
//!     })
//!     .collect();
//! for t in threads {
//!     t.join().unwrap();
//! }
//! let mut count = 0;
//! while stack.pop().is_ok() {
//!     count += 1;
//! }
//! assert_eq!(count, 400);
//! ```

mod hazard_pointer;
mod stats;
pub mod util;
pub mod error;
pub mod hazard_epoch;
pub mod spin_lock;
pub mod thread_table;
pub mod lockfree_stack;
pub mod exchanger;
pub mod elimination_array;
pub mod range_policy;
pub mod config;
pub mod elimination_backoff_stack;

pub use crate::config::StackConfig;
pub use crate::elimination_backoff_stack::EliminationBackoffStack;
pub use crate::error::{EmptyStack, ExchangeTimeout, Status};
pub use crate::range_policy::RangePolicy;
pub use crate::stats::EliminationStats;

#[macro_use]
extern crate log;

#[macro_use]
extern crate cfg_if;
