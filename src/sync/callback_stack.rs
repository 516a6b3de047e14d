use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

const EMPTY: usize = 0;
const CLOSED: usize = 1;

struct Node<T> {
    callback: Callback<T>,
    next: usize,
}

/// Lock-free list of one-shot callbacks that is closed exactly once.
///
/// Any number of threads may [`append`](Self::append); the thread that
/// [`close`](Self::close)s it runs every registered callback, oldest first.
/// Appending to a closed stack hands the callback back to the caller.
pub(crate) struct CallbackStack<T> {
    head: AtomicUsize,
    _marker: PhantomData<Callback<T>>,
}

unsafe impl<T> Send for CallbackStack<T> {}
unsafe impl<T> Sync for CallbackStack<T> {}

impl<T> CallbackStack<T> {
    pub(crate) const fn new() -> Self {
        CallbackStack {
            head: AtomicUsize::new(EMPTY),
            _marker: PhantomData,
        }
    }

    pub(crate) const fn closed() -> Self {
        CallbackStack {
            head: AtomicUsize::new(CLOSED),
            _marker: PhantomData,
        }
    }

    /// No callback is waiting (either none was added or it is closed).
    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) <= CLOSED
    }

    /// Register `callback`, or return it if the stack is already closed.
    pub(crate) fn append(&self, callback: Callback<T>) -> Result<(), Callback<T>> {
        let node = Box::into_raw(Box::new(Node {
            callback,
            next: EMPTY,
        }));
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if head == CLOSED {
                let node = unsafe { Box::from_raw(node) };
                return Err(node.callback);
            }
            unsafe { (*node).next = head };
            match self.head.compare_exchange_weak(
                head,
                node as usize,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => head = actual,
            }
        }
    }

    /// Close the stack and run every registered callback with a clone of
    /// `value`. Returns `false` if it had already been closed.
    pub(crate) fn close(&self, value: T) -> bool
    where
        T: Clone,
    {
        self.close_with(|| value.clone())
    }

    /// Close the stack, producing a fresh value for every callback.
    pub(crate) fn close_with(&self, mut make: impl FnMut() -> T) -> bool {
        let head = self.head.swap(CLOSED, Ordering::AcqRel);
        if head == CLOSED {
            return false;
        }
        for callback in take_in_order(head) {
            callback(make());
        }
        true
    }
}

impl<T> Drop for CallbackStack<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        if head > CLOSED {
            drop(take_in_order::<T>(head));
        }
    }
}

/// Unlink a detached list, oldest registration first.
fn take_in_order<T>(mut address: usize) -> Vec<Callback<T>> {
    let mut callbacks = Vec::new();
    while address > CLOSED {
        let node = unsafe { Box::from_raw(address as *mut Node<T>) };
        address = node.next;
        callbacks.push(node.callback);
    }
    callbacks.reverse();
    callbacks
}

impl<T> Default for CallbackStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn runs_in_registration_order() {
        let stack = CallbackStack::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            assert!(
                stack
                    .append(Box::new(move |v: u32| seen.lock().unwrap().push(v + i)))
                    .is_ok()
            );
        }
        assert!(!stack.is_empty());
        assert!(stack.close(10));
        assert!(!stack.close(20));
        assert_eq!(*seen.lock().unwrap(), vec![10, 11, 12]);
    }

    #[test]
    fn append_after_close_is_refused() {
        let stack = CallbackStack::<u8>::closed();
        assert!(stack.is_empty());
        let callback = stack.append(Box::new(|_| {})).unwrap_err();
        callback(1);
    }

    #[test]
    fn concurrent_append_and_close() {
        let stack = Arc::new(CallbackStack::<()>::new());
        let hits = Arc::new(Mutex::new(0usize));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stack = stack.clone();
                let hits = hits.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let hits = hits.clone();
                        let callback: Callback<()> = Box::new(move |_| *hits.lock().unwrap() += 1);
                        if let Err(callback) = stack.append(callback) {
                            callback(());
                        }
                    }
                })
            })
            .collect();
        stack.close(());
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*hits.lock().unwrap(), 2000);
    }
}
