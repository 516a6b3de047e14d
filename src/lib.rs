//! Stackful coroutines multiplexed over a small pool of shared stacks.
//!
//! A coroutine is ordinary blocking-looking code that suspends only at
//! `await`-style calls. While it is parked, its live stack bytes are copied
//! out so another coroutine can run on the same physical stack; the
//! [`SharedDispatcher`] bounds how many stacks exist at once.
//!
//! On top of that sit [`Future`]/[`Promise`] single-assignment results,
//! [`Channel`]s in four buffering flavors, and [`CoScope`] for canceling
//! groups of them together.
//!
//! # Example
//!
//! ```no_run
//! use costack::{SchedulerExt, SchedulerHandle, WorkerPool, coroutine};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let pool: SchedulerHandle = Arc::new(WorkerPool::new("worker", 4).unwrap());
//! let answer = pool.coroutine_future(|| {
//!     coroutine::delay(Duration::from_millis(10))?;
//!     Ok(42)
//! });
//! answer.when_success(|value| println!("answer: {value}"));
//! ```

mod arch;
pub mod channel;
pub mod common;
mod context;
pub mod coroutine;
pub mod dispatcher;
pub mod error;
pub mod future;
pub mod scheduler;
pub mod scope;
mod sync;
pub mod timer;

pub use channel::{BufferType, Channel, Receiver, Sender};
pub use common::Config;
pub use coroutine::{Completion, CoroutineHandle};
pub use dispatcher::SharedDispatcher;
pub use error::{Error, OfferError, Result};
pub use future::{Future, Promise};
pub use scheduler::{Immediate, Scheduler, SchedulerExt, SchedulerHandle, Task, WorkerPool};
pub use scope::{Cancellable, CoScope};
