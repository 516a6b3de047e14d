//! Coroutine entry points and suspension points.
//!
//! # Example
//!
//! ```no_run
//! use costack::coroutine;
//! use std::thread;
//!
//! coroutine::start(|| {
//!     let answer: u32 = coroutine::await_value(|callback| {
//!         thread::spawn(move || callback(42));
//!     })
//!     .unwrap();
//!     println!("got {answer}");
//! });
//! ```
//!
//! Every `await_*` function fails with [`Error::CalledOutsideCoroutine`]
//! when the calling thread is not running a coroutine, and with
//! [`Error::Canceled`] once the coroutine has been canceled.

mod shared;

pub use shared::Completion;
pub(crate) use shared::SharedCoroutine;

use crate::error::{Error, Result};
use crate::scheduler::{SchedulerExt, SchedulerHandle, immediate};
use crate::timer;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Start a coroutine right here on the calling thread.
///
/// It runs until its first suspension, then resumes on whichever thread
/// completes what it awaits.
pub fn start<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    immediate().start_coroutine(task);
}

/// Whether the calling code runs inside a coroutine.
pub fn is_inside() -> bool {
    shared::is_inside()
}

/// Handle to the coroutine running on this thread.
pub fn current() -> Result<CoroutineHandle> {
    shared::current()
        .map(|coroutine| CoroutineHandle { coroutine })
        .ok_or(Error::CalledOutsideCoroutine)
}

/// Handle to one coroutine, usable from any thread.
#[derive(Clone)]
pub struct CoroutineHandle {
    coroutine: Arc<SharedCoroutine>,
}

impl CoroutineHandle {
    /// Request cancellation. The coroutine observes it at its current or
    /// next suspension point. Repeated calls have no further effect.
    pub fn cancel(&self) {
        self.coroutine.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.coroutine.is_canceled()
    }

    /// How many times the coroutine actually left its stack.
    pub fn suspend_count(&self) -> usize {
        self.coroutine.suspend_count()
    }

    pub fn id(&self) -> u64 {
        self.coroutine.id()
    }

    pub(crate) fn downgrade(&self) -> Weak<SharedCoroutine> {
        Arc::downgrade(&self.coroutine)
    }

    pub(crate) fn when_finished(&self, callback: Box<dyn FnOnce() + Send>) {
        self.coroutine.when_finished(callback);
    }
}

/// Suspend until the [`Completion`] given to `starter` is completed.
///
/// `starter` runs synchronously and typically hands the completion to a
/// callback-based API. Completing it before `starter` returns does not
/// suspend at all.
pub fn await_with<T, F>(starter: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Completion<T>),
{
    let coroutine = shared::current().ok_or(Error::CalledOutsideCoroutine)?;
    coroutine.await_with(starter)
}

/// Await a callback that carries no value.
pub fn await_unit<F>(starter: F) -> Result<()>
where
    F: FnOnce(Arc<dyn Fn() + Send + Sync>),
{
    await_with(|completion: Completion<()>| {
        starter(Arc::new(move || {
            completion.complete(());
        }))
    })
}

/// Await a callback that carries one value.
pub fn await_value<T, F>(starter: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<dyn Fn(T) + Send + Sync>),
{
    await_with(|completion: Completion<T>| {
        starter(Arc::new(move |value| {
            completion.complete(value);
        }))
    })
}

/// Await a callback that carries two values.
pub fn await_pair<A, B, F>(starter: F) -> Result<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnOnce(Arc<dyn Fn(A, B) + Send + Sync>),
{
    await_with(|completion: Completion<(A, B)>| {
        starter(Arc::new(move |a, b| {
            completion.complete((a, b));
        }))
    })
}

/// Await a callback that carries three values.
pub fn await_triple<A, B, C, F>(starter: F) -> Result<(A, B, C)>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    F: FnOnce(Arc<dyn Fn(A, B, C) + Send + Sync>),
{
    await_with(|completion: Completion<(A, B, C)>| {
        starter(Arc::new(move |a, b, c| {
            completion.complete((a, b, c));
        }))
    })
}

/// Run `task` with `scheduler` driving the current coroutine, then return
/// to the coroutine's own scheduler.
pub fn await_on<T, F>(scheduler: &SchedulerHandle, task: F) -> Result<T>
where
    F: FnOnce() -> T,
{
    let coroutine = shared::current().ok_or(Error::CalledOutsideCoroutine)?;
    coroutine.await_on(Arc::clone(scheduler), task)
}

/// Suspend the current coroutine for `duration`.
pub fn delay(duration: Duration) -> Result<()> {
    let mut timer = None;
    let result = await_with(|completion: Completion<()>| {
        timer = Some(timer::schedule(duration, move || {
            completion.complete(());
        }));
    });
    if result.is_err()
        && let Some(timer) = timer
    {
        timer.cancel();
    }
    result
}
