use std::sync::atomic::{AtomicU64, Ordering};

/// Two `i32` fields updated together through one 64-bit CAS.
#[derive(Debug)]
pub(crate) struct AtomicTuple(AtomicU64);

impl AtomicTuple {
    pub(crate) const fn new(first: i32, second: i32) -> Self {
        AtomicTuple(AtomicU64::new(pack(first, second)))
    }

    pub(crate) fn load(&self) -> (i32, i32) {
        unpack(self.0.load(Ordering::Acquire))
    }

    /// Apply `f` until the CAS sticks. Returns `(old, new)`.
    pub(crate) fn update<F>(&self, mut f: F) -> ((i32, i32), (i32, i32))
    where
        F: FnMut(i32, i32) -> (i32, i32),
    {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let old = unpack(current);
            let new = f(old.0, old.1);
            match self.0.compare_exchange_weak(
                current,
                pack(new.0, new.1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (old, new),
                Err(actual) => current = actual,
            }
        }
    }
}

const fn pack(first: i32, second: i32) -> u64 {
    ((first as u32 as u64) << 32) | second as u32 as u64
}

const fn unpack(value: u64) -> (i32, i32) {
    ((value >> 32) as u32 as i32, value as u32 as i32)
}
