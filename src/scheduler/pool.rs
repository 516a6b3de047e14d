//! Fixed-size pool of named worker threads draining a shared FIFO of tasks.

use super::{Scheduler, Task};
use crate::error::panic_message;
use crate::sync::lock;
use log::{debug, error};
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// Tasks waiting for a worker plus idle bookkeeping.
struct RunQueue {
    /// Queue of runnable tasks
    runnable: VecDeque<Task>,
    /// Number of idle workers (waiting on condvar)
    idle_workers: usize,
    /// Set once the pool is dropped; workers drain and exit
    shutdown: bool,
}

struct Shared {
    queue: Mutex<RunQueue>,
    condvar: Condvar,
}

/// A [`Scheduler`] backed by OS threads.
///
/// Tasks run in FIFO order on whichever worker is free. Dropping the pool
/// lets the workers finish every queued task before they exit.
pub struct WorkerPool {
    name: String,
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers named `{name}-{index}`.
    pub fn new(name: impl Into<String>, threads: usize) -> io::Result<WorkerPool> {
        let name = name.into();
        let shared = Arc::new(Shared {
            queue: Mutex::new(RunQueue {
                runnable: VecDeque::new(),
                idle_workers: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });

        let mut pool = WorkerPool {
            name,
            shared,
            handles: Vec::with_capacity(threads),
        };
        for worker_id in 0..threads.max(1) {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{worker_id}", pool.name))
                .spawn(move || worker_loop(&shared))?;
            pool.handles.push(handle);
        }
        debug!("[{}] started {} workers", pool.name, pool.handles.len());
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }
}

impl Scheduler for WorkerPool {
    fn schedule(&self, task: Task) {
        let mut q = lock(&self.shared.queue);
        q.runnable.push_back(task);

        // Wake up an idle worker if any
        if q.idle_workers > 0 {
            self.shared.condvar.notify_one();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        lock(&self.shared.queue).shutdown = true;
        self.shared.condvar.notify_all();

        // The last handle may be released by one of our own tasks.
        let me = thread::current().id();
        for handle in self.handles.drain(..) {
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
        debug!("[{}] shut down", self.name);
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut q = lock(&shared.queue);
            loop {
                if let Some(task) = q.runnable.pop_front() {
                    break task;
                }
                if q.shutdown {
                    return;
                }
                q.idle_workers += 1;
                q = shared
                    .condvar
                    .wait(q)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                q.idle_workers -= 1;
            }
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!(
                "[{}] task panicked: {}",
                thread::current().name().unwrap_or("worker"),
                panic_message(payload.as_ref())
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_tasks_on_named_threads() {
        let pool = WorkerPool::new("unit", 2).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..8 {
            let tx = tx.clone();
            pool.schedule(Box::new(move || {
                let name = thread::current().name().unwrap().to_string();
                tx.send((i, name)).unwrap();
            }));
        }
        let mut seen: Vec<_> = rx.iter().take(8).collect();
        seen.sort();
        assert_eq!(seen.len(), 8);
        assert!(seen.iter().all(|(_, name)| name.starts_with("unit-")));
    }

    #[test]
    fn survives_panicking_task() {
        let pool = WorkerPool::new("sturdy", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.schedule(Box::new(|| panic!("task failure")));
        pool.schedule(Box::new(move || tx.send(42).unwrap()));
        assert_eq!(rx.recv().unwrap(), 42);
    }

    #[test]
    fn drop_drains_queue() {
        let (tx, rx) = mpsc::channel();
        {
            let pool = WorkerPool::new("drain", 1).unwrap();
            for i in 0..16 {
                let tx = tx.clone();
                pool.schedule(Box::new(move || tx.send(i).unwrap()));
            }
        }
        drop(tx);
        assert_eq!(rx.iter().count(), 16);
    }
}
