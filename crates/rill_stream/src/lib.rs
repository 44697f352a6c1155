//! Rill Stream Runtime
//!
//! The reactive substrate underneath the Rill component engine:
//!
//! - **Streams**: lazy, multicast, push-based value sequences
//! - **Operators**: map, filter, fold, merge, combine, flatten, remember, ...
//! - **Scheduler**: a virtual clock driving debounce, delay and deferred work
//!
//! # Example
//!
//! ```rust
//! use rill_stream::{Recorder, Scheduler, Subject};
//!
//! let scheduler = Scheduler::new();
//! let clicks = Subject::new();
//!
//! let total = clicks
//!     .stream()
//!     .fold(0, |acc, n: &i32| acc + n)
//!     .debounce(&scheduler, 5);
//! let rec = Recorder::new(&total);
//!
//! clicks.push(1);
//! clicks.push(2);
//! scheduler.run_until_idle();
//! assert_eq!(rec.values(), vec![3]);
//! ```

pub mod operators;
pub mod recorder;
pub mod scheduler;
pub mod stream;
pub mod time;

pub use recorder::Recorder;
pub use scheduler::{Scheduler, TaskId};
pub use stream::{Emitter, Stream, Subject, Subscription, Teardown};
