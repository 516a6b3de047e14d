//! Process-wide timer thread.
//!
//! Callbacks sit in a min-heap keyed by deadline (FIFO among equal
//! deadlines) and run on the `costack-timer` thread once due. They should
//! be short: a coroutine resumed from a callback runs on its own scheduler,
//! not on the timer thread, unless that scheduler is [`Immediate`].
//!
//! [`Immediate`]: crate::scheduler::Immediate

use crate::error::panic_message;
use crate::sync::lock;
use log::{debug, error};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Entry in the timer heap
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    canceled: Arc<AtomicBool>,
    callback: Box<dyn FnOnce() + Send>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse order for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerHeap {
    entries: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerHeap {
    fn push(
        &mut self,
        deadline: Instant,
        canceled: Arc<AtomicBool>,
        callback: Box<dyn FnOnce() + Send>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(TimerEntry {
            deadline,
            seq,
            canceled,
            callback,
        });
    }

    /// Pop everything due at `now`, in firing order.
    fn pop_expired(&mut self, now: Instant) -> Vec<TimerEntry> {
        let mut expired = Vec::new();
        while self.entries.peek().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = self.entries.pop() {
                expired.push(entry);
            }
        }
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.entries.peek().map(|entry| entry.deadline)
    }
}

struct TimerService {
    heap: Mutex<TimerHeap>,
    condvar: Condvar,
}

fn service() -> &'static TimerService {
    static SERVICE: OnceLock<TimerService> = OnceLock::new();
    static STARTED: OnceLock<()> = OnceLock::new();

    let service = SERVICE.get_or_init(|| TimerService {
        heap: Mutex::new(TimerHeap::default()),
        condvar: Condvar::new(),
    });
    STARTED.get_or_init(|| {
        if let Err(err) = thread::Builder::new()
            .name("costack-timer".into())
            .spawn(move || timer_loop(service))
        {
            panic!("failed to spawn the timer thread: {err}");
        }
        debug!("timer thread started");
    });
    service
}

fn timer_loop(service: &'static TimerService) {
    let mut heap = lock(&service.heap);
    loop {
        let expired = heap.pop_expired(Instant::now());
        if !expired.is_empty() {
            // Drop lock before running callbacks, they may schedule timers
            drop(heap);
            for entry in expired {
                if entry.canceled.load(Ordering::SeqCst) {
                    continue;
                }
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry.callback)) {
                    error!("timer callback panicked: {}", panic_message(payload.as_ref()));
                }
            }
            heap = lock(&service.heap);
            continue;
        }

        heap = match heap.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                service
                    .condvar
                    .wait_timeout(heap, timeout)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => service
                .condvar
                .wait(heap)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}

/// Cancels a scheduled callback. Dropping the handle does not cancel.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    canceled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Prevent the callback from running, if it has not started yet.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// Run `callback` on the timer thread after `delay`.
pub fn schedule<F>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let canceled = Arc::new(AtomicBool::new(false));
    let deadline = Instant::now() + delay;
    let service = service();
    {
        let mut heap = lock(&service.heap);
        let wake = heap.next_deadline().is_none_or(|next| deadline < next);
        heap.push(deadline, Arc::clone(&canceled), Box::new(callback));
        if wake {
            service.condvar.notify_one();
        }
    }
    TimerHandle { canceled }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn heap_orders_by_deadline_then_insertion() {
        let mut heap = TimerHeap::default();
        let now = Instant::now();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, offset) in [("c", 30), ("a", 10), ("b1", 20), ("b2", 20)] {
            let order = order.clone();
            heap.push(
                now + Duration::from_millis(offset),
                Arc::new(AtomicBool::new(false)),
                Box::new(move || order.lock().unwrap().push(label)),
            );
        }
        assert!(heap.pop_expired(now).is_empty());
        for entry in heap.pop_expired(now + Duration::from_millis(25)) {
            (entry.callback)();
        }
        assert_eq!(*order.lock().unwrap(), vec!["a", "b1", "b2"]);
        assert_eq!(heap.next_deadline(), Some(now + Duration::from_millis(30)));
    }

    #[test]
    fn fires_after_delay() {
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        schedule(Duration::from_millis(30), move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn canceled_timer_never_fires() {
        let (tx, rx) = mpsc::channel();
        let handle = schedule(Duration::from_millis(20), move || tx.send(()).unwrap());
        handle.cancel();
        assert!(handle.is_canceled());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
