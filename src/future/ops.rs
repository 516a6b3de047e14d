//! Future transformations.
//!
//! Every operator returns a future derived from `self`: canceling the
//! result cancels `self` too. When `self` already has a result the
//! transformation runs right away on the calling thread, otherwise on
//! whichever thread completes `self`.

use super::Future;
use crate::error::{Error, Result};

impl<T: Clone + Send + Sync + 'static> Future<T> {
    fn derive<U, F>(&self, transform: F) -> Future<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Result<T>, Future<U>) + Send + 'static,
    {
        if let Some(result) = self.result() {
            let derived = Future::pending();
            transform(result, derived.clone());
            return derived;
        }
        // the parent keeps the pending chain alive, the chain only
        // points back up weakly
        let derived = Future::derived(self);
        let target = derived.clone();
        self.add_callback(move |result| transform(result, target));
        derived
    }

    /// Transform a successful value.
    pub fn map<U, F>(&self, transform: F) -> Future<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.derive(move |result, derived| {
            derived.set_result(result.map(transform));
        })
    }

    /// Turn a failure into a new result.
    pub fn recover<F>(&self, transform: F) -> Future<T>
    where
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        self.derive(move |result, derived| {
            derived.set_result(result.or_else(transform));
        })
    }

    /// Transform the whole result.
    pub fn map_result<U, F>(&self, transform: F) -> Future<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Result<T>) -> Result<U> + Send + 'static,
    {
        self.derive(move |result, derived| {
            derived.set_result(transform(result));
        })
    }

    /// Chain a future-returning step after a success.
    pub fn flat_map<U, F>(&self, transform: F) -> Future<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        self.flat_map_result(move |result| match result {
            Ok(value) => transform(value),
            Err(error) => Future::ready(Err(error)),
        })
    }

    /// Chain a future-returning step after a failure.
    pub fn flat_map_error<F>(&self, transform: F) -> Future<T>
    where
        F: FnOnce(Error) -> Future<T> + Send + 'static,
    {
        self.flat_map_result(move |result| match result {
            Ok(value) => Future::ready(Ok(value)),
            Err(error) => transform(error),
        })
    }

    /// Chain a future-returning step after any result.
    pub fn flat_map_result<U, F>(&self, transform: F) -> Future<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(Result<T>) -> Future<U> + Send + 'static,
    {
        self.derive(move |result, derived| {
            let next = transform(result);
            // a canceled chain cancels the inner step as well
            let upstream = next.downgrade();
            derived.when_canceled(move || {
                if let Some(inner) = upstream.upgrade() {
                    Future::from_inner(inner).cancel();
                }
            });
            next.add_callback(move |result| {
                derived.set_result(result);
            });
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::future::{Future, Promise};

    #[test]
    fn map_applies_on_success() {
        let promise = Promise::<u32>::new();
        let doubled = promise.map(|value| value * 2);
        assert!(!doubled.is_completed());
        promise.succeed(21);
        assert_eq!(doubled.result().unwrap().unwrap(), 42);
    }

    #[test]
    fn map_on_completed_future_runs_immediately() {
        let text = Future::ready(Ok(5)).map(|value: i32| value.to_string());
        assert_eq!(text.result().unwrap().unwrap(), "5");
    }

    #[test]
    fn recover_replaces_failure() {
        let promise = Promise::<u32>::new();
        let recovered = promise.recover(|error| {
            assert!(error.is_timeout());
            Ok(0)
        });
        promise.fail(Error::Timeout);
        assert_eq!(recovered.result().unwrap().unwrap(), 0);
    }

    #[test]
    fn flat_map_waits_for_inner_future() {
        let outer = Promise::<u32>::new();
        let inner = Promise::<u32>::new();
        let inner_future = inner.future();
        let chained = outer.flat_map(move |value| inner_future.map(move |other| value + other));
        outer.succeed(1);
        assert!(!chained.is_completed());
        inner.succeed(2);
        assert_eq!(chained.result().unwrap().unwrap(), 3);
    }

    #[test]
    fn flat_map_error_skips_success() {
        let chained = Future::ready(Ok(9u8)).flat_map_error(|_| Future::ready(Ok(0)));
        assert_eq!(chained.result().unwrap().unwrap(), 9);
    }

    #[test]
    fn canceling_derived_cancels_the_chain() {
        let root = Promise::<u32>::new();
        let tail = root.map(|value| value + 1).map(|value| value * 2);
        tail.cancel();
        assert!(root.is_canceled());
        assert!(tail.is_canceled());
        assert!(!root.succeed(1));
    }

    #[test]
    fn map_result_sees_failures() {
        let promise = Promise::<u32>::new();
        let described = promise.map_result(|result| match result {
            Ok(value) => Ok(format!("ok {value}")),
            Err(error) => Ok(format!("err {error}")),
        });
        promise.fail(Error::Closed);
        assert!(described.result().unwrap().unwrap().starts_with("err"));
    }
}
