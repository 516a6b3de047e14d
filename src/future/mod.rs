//! Single-assignment results shared by any number of subscribers.
//!
//! A [`Future`] is completed at most once; every callback registered before
//! or after that moment sees the same result. Derived futures (`map`,
//! `flat_map`, ...) remember their parent, so canceling the end of a chain
//! cancels its source.

mod ops;
mod promise;

pub use promise::Promise;

use crate::coroutine::{self, Completion};
use crate::error::{Error, Result};
use crate::scheduler::{SchedulerExt, immediate};
use crate::sync::CallbackStack;
use crate::timer;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// Upward link of a derived future.
trait CancelParent: Send + Sync {
    fn cancel(&self);
}

pub(crate) struct Inner<T> {
    result: OnceLock<Result<T>>,
    callbacks: CallbackStack<Result<T>>,
    parent: Option<Weak<dyn CancelParent>>,
}

impl<T: Clone + Send + Sync + 'static> Inner<T> {
    fn set_result(&self, result: Result<T>) -> bool {
        if self.result.set(result).is_err() {
            return false;
        }
        if let Some(result) = self.result.get() {
            self.callbacks.close(result.clone());
        }
        true
    }

    fn add_callback(&self, callback: Callback<T>) {
        if let Err(callback) = self.callbacks.append(callback)
            && let Some(result) = self.result.get()
        {
            callback(result.clone());
        }
    }

    fn cancel(&self) {
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.cancel();
        }
        self.set_result(Err(Error::Canceled));
    }
}

impl<T: Clone + Send + Sync + 'static> CancelParent for Inner<T> {
    fn cancel(&self) {
        Inner::cancel(self);
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // nobody can complete us any more
        if !self.callbacks.is_empty() {
            self.callbacks.close_with(|| Err(Error::Canceled));
        }
    }
}

/// Read side of a single-assignment result.
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("result", &self.inner.result.get())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Future<T> {
    pub(crate) fn pending() -> Self {
        Future {
            inner: Arc::new(Inner {
                result: OnceLock::new(),
                callbacks: CallbackStack::new(),
                parent: None,
            }),
        }
    }

    /// A pending future whose cancellation also cancels `parent`.
    pub(crate) fn derived<P: Clone + Send + Sync + 'static>(parent: &Future<P>) -> Self {
        let parent: Arc<dyn CancelParent> = parent.inner.clone();
        Future {
            inner: Arc::new(Inner {
                result: OnceLock::new(),
                callbacks: CallbackStack::new(),
                parent: Some(Arc::downgrade(&parent)),
            }),
        }
    }

    /// Hand a promise to `setup` and return its future.
    pub fn new<F>(setup: F) -> Self
    where
        F: FnOnce(Promise<T>),
    {
        let promise = Promise::new();
        let future = promise.future();
        setup(promise);
        future
    }

    /// An already completed future.
    pub fn ready(result: Result<T>) -> Self {
        Future {
            inner: Arc::new(Inner {
                result: OnceLock::from(result),
                callbacks: CallbackStack::closed(),
                parent: None,
            }),
        }
    }

    /// Run `task` in a new coroutine on the calling thread.
    ///
    /// Canceling the future cancels the coroutine.
    pub fn spawn<F>(task: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        immediate().coroutine_future(task)
    }

    /// The result, once there is one.
    pub fn result(&self) -> Option<Result<T>> {
        self.inner.result.get().cloned()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.result.get().is_some()
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.result.get(), Some(Err(Error::Canceled)))
    }

    /// Cancel the whole chain this future was derived from, then complete
    /// this future with [`Error::Canceled`] unless it already has a result.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub(crate) fn set_result(&self, result: Result<T>) -> bool {
        self.inner.set_result(result)
    }

    pub(crate) fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        self.inner.add_callback(Box::new(callback));
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner<T>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<Inner<T>>) -> Self {
        Future { inner }
    }

    /// Run `callback` with the result; immediately if it is already known.
    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        self.add_callback(callback);
    }

    pub fn when_success<F>(&self, callback: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.add_callback(move |result| {
            if let Ok(value) = result {
                callback(value);
            }
        });
    }

    pub fn when_failure<F>(&self, callback: F)
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.add_callback(move |result| {
            if let Err(error) = result {
                callback(error);
            }
        });
    }

    pub fn when_canceled<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_callback(move |result| {
            if let Err(Error::Canceled) = result {
                callback();
            }
        });
    }

    /// Run `callback` once completed, whatever the outcome.
    pub fn when_done<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_callback(move |_| callback());
    }

    /// Wait for the result inside a coroutine.
    ///
    /// Returns without suspending when the result is already known.
    pub fn await_value(&self) -> Result<T> {
        if let Some(result) = self.result() {
            return result;
        }
        coroutine::await_with(|completion: Completion<Result<T>>| {
            self.add_callback(move |result| {
                completion.complete(result);
            });
        })?
    }

    /// Like [`await_value`](Self::await_value) but gives up with
    /// [`Error::Timeout`] after `timeout`.
    pub fn await_timeout(&self, timeout: Duration) -> Result<T> {
        if let Some(result) = self.result() {
            return result;
        }
        let mut timer = None;
        let outcome = coroutine::await_with(|completion: Completion<Result<T>>| {
            let on_timeout = completion.clone();
            self.add_callback(move |result| {
                completion.complete(result);
            });
            timer = Some(timer::schedule(timeout, move || {
                on_timeout.complete(Err(Error::Timeout));
            }));
        });
        if let Some(timer) = timer {
            timer.cancel();
        }
        outcome?
    }
}
