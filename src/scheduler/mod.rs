//! Where coroutine steps run.
//!
//! A [`Scheduler`] only has to run a closure "soon". Every start, resume
//! and restart of a coroutine is handed to the scheduler the coroutine is
//! currently bound to, so the scheduler decides which thread executes the
//! code between two suspension points.

mod pool;

pub use pool::WorkerPool;

use crate::channel::{BufferType, Channel, Receiver, Sender};
use crate::coroutine;
use crate::dispatcher::SharedDispatcher;
use crate::error::{Error, Result, panic_message};
use crate::future::{Future, Promise};
use crate::scope::{Cancellable, CoScope};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

/// A unit of work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks at the next opportunity.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, task: Task);
}

/// Shared handle coroutines keep to their scheduler.
pub type SchedulerHandle = Arc<dyn Scheduler>;

/// Runs every task inline on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Scheduler for Immediate {
    fn schedule(&self, task: Task) {
        task()
    }
}

/// Process-wide handle to [`Immediate`].
pub fn immediate() -> SchedulerHandle {
    static IMMEDIATE: OnceLock<SchedulerHandle> = OnceLock::new();
    IMMEDIATE.get_or_init(|| Arc::new(Immediate)).clone()
}

/// Coroutine builders available on every scheduler handle.
///
/// All of them use [`SharedDispatcher::global`].
pub trait SchedulerExt {
    /// Start a fire-and-forget coroutine.
    fn start_coroutine<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static;

    /// Start a coroutine that is canceled together with `scope`.
    fn start_coroutine_in<F>(&self, scope: &CoScope, task: F)
    where
        F: FnOnce() + Send + 'static;

    /// Start a coroutine and return a future of its result.
    ///
    /// Canceling the future cancels the coroutine. A panic in `task`
    /// completes the future with [`Error::Panicked`].
    fn coroutine_future<T, F>(&self, task: F) -> Future<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T> + Send + 'static;

    /// Start a coroutine that owns the receiving half of a new channel and
    /// return the sending half.
    fn actor<M, F>(&self, buffer: BufferType, body: F) -> Sender<M>
    where
        M: Send + 'static,
        F: FnOnce(Receiver<M>) + Send + 'static;

    /// Run `task` under this scheduler from inside a coroutine, then hop
    /// back to the coroutine's own scheduler.
    fn await_on<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> T;
}

impl SchedulerExt for SchedulerHandle {
    fn start_coroutine<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        SharedDispatcher::global().execute(self, task);
    }

    fn start_coroutine_in<F>(&self, scope: &CoScope, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let scope = scope.downgrade();
        self.start_coroutine(move || {
            let Some(scope) = scope.upgrade() else {
                return;
            };
            let Ok(current) = coroutine::current() else {
                return;
            };
            scope.add(&current);
            drop(scope);
            if current.is_canceled() {
                return;
            }
            task();
        });
    }

    fn coroutine_future<T, F>(&self, task: F) -> Future<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();
        self.start_coroutine(move || {
            if let Ok(current) = coroutine::current() {
                promise.when_canceled(current.cancel_hook());
            }
            if promise.is_canceled() {
                return;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(task))
                .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload.as_ref()))));
            promise.complete(result);
        });
        future
    }

    fn actor<M, F>(&self, buffer: BufferType, body: F) -> Sender<M>
    where
        M: Send + 'static,
        F: FnOnce(Receiver<M>) + Send + 'static,
    {
        let (sender, receiver) = Channel::new(buffer).split();
        self.start_coroutine(move || {
            if let Ok(current) = coroutine::current() {
                receiver.when_canceled(current.cancel_hook());
            }
            if receiver.is_canceled() {
                return;
            }
            body(receiver);
        });
        sender
    }

    fn await_on<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        coroutine::await_on(self, task)
    }
}
