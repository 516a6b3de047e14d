use crossbeam_queue::SegQueue;
use std::hint;
use std::thread;

/// Unbounded MPMC queue whose consumers may know an element is on its way
/// before the producer has pushed it.
pub(crate) struct Fifo<T> {
    queue: SegQueue<T>,
}

impl<T> Fifo<T> {
    pub(crate) fn new() -> Self {
        Fifo {
            queue: SegQueue::new(),
        }
    }

    pub(crate) fn push(&self, value: T) {
        self.queue.push(value);
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Pop, spinning until an element shows up.
    ///
    /// Only call this after a counter has promised that a push is in flight.
    pub(crate) fn blocking_pop(&self) -> T {
        let mut spins = 0u32;
        loop {
            if let Some(value) = self.queue.pop() {
                return value;
            }
            if spins < 64 {
                hint::spin_loop();
                spins += 1;
            } else {
                thread::yield_now();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let fifo = Fifo::new();
        for i in 0..5 {
            fifo.push(i);
        }
        assert_eq!(fifo.len(), 5);
        let drained: Vec<_> = std::iter::from_fn(|| fifo.pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn blocking_pop_waits_for_late_push() {
        let fifo = Arc::new(Fifo::new());
        let producer = fifo.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push("late");
        });
        assert_eq!(fifo.blocking_pop(), "late");
        handle.join().unwrap();
    }
}
