//! Lock-free building blocks shared across the runtime.

mod atomic_tuple;
mod callback_stack;
mod fifo;

pub(crate) use atomic_tuple::AtomicTuple;
pub(crate) use callback_stack::CallbackStack;
pub(crate) use fifo::Fifo;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a runtime-internal mutex, ignoring poisoning.
///
/// Panicking user code never runs while one of these locks is held.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
