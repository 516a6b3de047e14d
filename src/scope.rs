//! Grouped cancellation.
//!
//! A [`CoScope`] remembers how to cancel every item added to it without
//! keeping the items alive. Canceling the scope, or dropping its last
//! handle, cancels whatever has not completed yet.

use crate::channel::{Channel, Receiver, Sender};
use crate::coroutine::CoroutineHandle;
use crate::future::{Future, Promise};
use crate::sync::{CallbackStack, lock};
use log::trace;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Hook = Box<dyn FnOnce() + Send + 'static>;

/// Something a [`CoScope`] can cancel.
pub trait Cancellable {
    fn cancel(&self);

    /// Cancel this item later without keeping it alive.
    fn cancel_hook(&self) -> Hook;

    /// Run `callback` once the item completed, whatever the outcome.
    fn when_finished(&self, callback: Hook);
}

struct ScopeInner {
    /// `None` once canceled.
    items: Mutex<Option<HashMap<usize, Hook>>>,
    next_key: AtomicUsize,
    completion: CallbackStack<()>,
}

impl ScopeInner {
    fn remove(&self, key: usize) {
        if let Some(items) = lock(&self.items).as_mut() {
            items.remove(&key);
        }
    }

    fn cancel(&self) {
        let Some(items) = lock(&self.items).take() else {
            return;
        };
        trace!("scope canceled with {} items", items.len());
        self.completion.close(());
        for hook in items.into_values() {
            hook();
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A group of cancellable items canceled together.
#[derive(Clone)]
pub struct CoScope {
    inner: Arc<ScopeInner>,
}

impl fmt::Debug for CoScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoScope")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

impl Default for CoScope {
    fn default() -> Self {
        CoScope::new()
    }
}

impl CoScope {
    pub fn new() -> Self {
        CoScope {
            inner: Arc::new(ScopeInner {
                items: Mutex::new(Some(HashMap::new())),
                next_key: AtomicUsize::new(0),
                completion: CallbackStack::new(),
            }),
        }
    }

    /// Track `item`. An item added to a canceled scope is canceled at once.
    pub fn add<C: Cancellable + ?Sized>(&self, item: &C) {
        let hook = item.cancel_hook();
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        let rejected = match lock(&self.inner.items).as_mut() {
            Some(items) => {
                items.insert(key, hook);
                None
            }
            None => Some(hook),
        };
        if let Some(hook) = rejected {
            hook();
            return;
        }
        let scope = Arc::downgrade(&self.inner);
        item.when_finished(Box::new(move || {
            if let Some(scope) = scope.upgrade() {
                scope.remove(key);
            }
        }));
    }

    /// Cancel every tracked item. Later calls do nothing.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        lock(&self.inner.items).is_none()
    }

    /// No item left to cancel.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner.items)
            .as_ref()
            .is_none_or(|items| items.is_empty())
    }

    /// Run `callback` once the scope is canceled.
    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(callback) = self.inner.completion.append(Box::new(move |()| callback())) {
            callback(());
        }
    }

    pub(crate) fn downgrade(&self) -> WeakScope {
        WeakScope {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// A scope reference that does not keep the scope from canceling on drop.
pub(crate) struct WeakScope {
    inner: Weak<ScopeInner>,
}

impl WeakScope {
    pub(crate) fn upgrade(&self) -> Option<CoScope> {
        self.inner.upgrade().map(|inner| CoScope { inner })
    }
}

impl<T: Clone + Send + Sync + 'static> Cancellable for Future<T> {
    fn cancel(&self) {
        Future::cancel(self);
    }

    fn cancel_hook(&self) -> Hook {
        let inner = self.downgrade();
        Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                Future::from_inner(inner).cancel();
            }
        })
    }

    fn when_finished(&self, callback: Hook) {
        self.when_done(callback);
    }
}

impl<T: Clone + Send + Sync + 'static> Cancellable for Promise<T> {
    fn cancel(&self) {
        Future::cancel(self);
    }

    fn cancel_hook(&self) -> Hook {
        Cancellable::cancel_hook(&**self)
    }

    fn when_finished(&self, callback: Hook) {
        self.when_done(callback);
    }
}

impl<T: Send + 'static> Cancellable for Sender<T> {
    fn cancel(&self) {
        Sender::cancel(self);
    }

    fn cancel_hook(&self) -> Hook {
        let core = self.downgrade();
        Box::new(move || {
            if let Some(core) = core.upgrade() {
                core.cancel();
            }
        })
    }

    fn when_finished(&self, callback: Hook) {
        self.when_complete(callback);
    }
}

impl<T: Send + 'static> Cancellable for Receiver<T> {
    fn cancel(&self) {
        Receiver::cancel(self);
    }

    fn cancel_hook(&self) -> Hook {
        let core = self.downgrade();
        Box::new(move || {
            if let Some(core) = core.upgrade() {
                core.cancel();
            }
        })
    }

    fn when_finished(&self, callback: Hook) {
        self.when_complete(callback);
    }
}

impl<T: Send + 'static> Cancellable for Channel<T> {
    fn cancel(&self) {
        Channel::cancel(self);
    }

    fn cancel_hook(&self) -> Hook {
        Cancellable::cancel_hook(&self.receiver())
    }

    fn when_finished(&self, callback: Hook) {
        self.when_complete(callback);
    }
}

impl Cancellable for CoroutineHandle {
    fn cancel(&self) {
        CoroutineHandle::cancel(self);
    }

    fn cancel_hook(&self) -> Hook {
        let coroutine = self.downgrade();
        Box::new(move || {
            if let Some(coroutine) = coroutine.upgrade() {
                coroutine.cancel();
            }
        })
    }

    fn when_finished(&self, callback: Hook) {
        CoroutineHandle::when_finished(self, callback);
    }
}
