use super::Future;
use crate::error::{Error, Result};
use std::fmt;
use std::ops::Deref;

/// Write side of a [`Future`].
///
/// Only the first of `succeed`, `fail`, `complete` or a resolved
/// `complete_with` takes effect; later calls are ignored.
pub struct Promise<T> {
    future: Future<T>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            future: self.future.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Promise").field(&self.future).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Promise::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    pub fn new() -> Self {
        Promise {
            future: Future::pending(),
        }
    }

    /// Read-only handle to the same result.
    pub fn future(&self) -> Future<T> {
        self.future.clone()
    }

    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, error: Error) -> bool {
        self.complete(Err(error))
    }

    /// Set the result. Returns `false` if it was already set.
    pub fn complete(&self, result: Result<T>) -> bool {
        self.future.set_result(result)
    }

    /// Complete with whatever `other` completes with.
    pub fn complete_with(&self, other: &Future<T>) {
        let target = self.future.downgrade();
        other.add_callback(move |result| {
            if let Some(inner) = target.upgrade() {
                Future::from_inner(inner).set_result(result);
            }
        });
    }
}

impl<T> Deref for Promise<T> {
    type Target = Future<T>;

    fn deref(&self) -> &Future<T> {
        &self.future
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn first_result_wins() {
        let promise = Promise::new();
        assert!(promise.succeed(1));
        assert!(!promise.succeed(2));
        assert!(!promise.fail(Error::Timeout));
        assert_eq!(promise.result().unwrap().unwrap(), 1);
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let promise = Promise::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let seen = seen.clone();
            promise.when_success(move |value| seen.lock().unwrap().push((label, value)));
        }
        promise.succeed(7);
        let late = seen.clone();
        promise.when_success(move |value| late.lock().unwrap().push(("late", value)));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", 7), ("b", 7), ("c", 7), ("late", 7)]
        );
    }

    #[test]
    fn complete_with_forwards_the_result() {
        let source = Promise::<&'static str>::new();
        let target = Promise::new();
        target.complete_with(&source);
        assert!(!target.is_completed());
        source.succeed("done");
        assert_eq!(target.result().unwrap().unwrap(), "done");
    }

    #[test]
    fn dropping_a_pending_future_fails_its_callbacks() {
        let seen = Arc::new(Mutex::new(None));
        {
            let promise = Promise::<u8>::new();
            let seen = seen.clone();
            promise.when_complete(move |result| *seen.lock().unwrap() = Some(result));
        }
        assert!(matches!(*seen.lock().unwrap(), Some(Err(Error::Canceled))));
    }
}
