//! Pool of shared stacks.
//!
//! Coroutines are started on a free [`SharedQueue`] taken from the pool (or
//! a fresh one). A queue goes back to the pool whenever its stack is free:
//! always while it still hosts parked coroutines, and only up to the
//! configured capacity once it is empty. Surplus empty queues are dropped,
//! which unmaps their stacks.

mod queue;

pub(crate) use queue::SharedQueue;

use crate::common::Config;
use crate::scheduler::SchedulerHandle;
use crate::sync::lock;
use log::debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// How a start or resume step left the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoutineState {
    Finished,
    Suspended,
    Restarting,
}

/// Stack accounting shared with every queue of one dispatcher.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl Stats {
    fn stack_mapped(&self) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
    }

    fn stack_unmapped(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Multiplexes coroutines over a bounded set of physical stacks.
pub struct SharedDispatcher {
    config: Config,
    pool: Mutex<VecDeque<Arc<SharedQueue>>>,
    stats: Arc<Stats>,
}

impl SharedDispatcher {
    pub fn new(config: Config) -> Arc<Self> {
        debug!(
            "dispatcher: {} byte stacks, {} pooled queues",
            config.stack_size, config.pool_capacity
        );
        Arc::new(SharedDispatcher {
            config,
            pool: Mutex::new(VecDeque::new()),
            stats: Arc::default(),
        })
    }

    /// The process-wide dispatcher, configured from the environment.
    pub fn global() -> &'static Arc<SharedDispatcher> {
        static GLOBAL: OnceLock<Arc<SharedDispatcher>> = OnceLock::new();
        GLOBAL.get_or_init(|| SharedDispatcher::new(Config::from_env()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start `task` as a coroutine; `scheduler` runs the start and every
    /// later resume.
    pub fn execute<F>(self: &Arc<Self>, scheduler: &SchedulerHandle, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let dispatcher = Arc::clone(self);
        let bound = Arc::clone(scheduler);
        scheduler.schedule(Box::new(move || {
            let queue = dispatcher.free_queue();
            queue.start(&dispatcher, bound, Box::new(task));
        }));
    }

    fn free_queue(&self) -> Arc<SharedQueue> {
        {
            let mut pool = lock(&self.pool);
            while let Some(queue) = pool.pop_front() {
                queue.in_pool.store(false, Ordering::SeqCst);
                if queue.occupy() {
                    return queue;
                }
            }
        }
        SharedQueue::new(
            self.config.stack_size,
            self.config.guard_page,
            Arc::clone(&self.stats),
        )
    }

    /// Take back a queue whose stack just became free.
    pub(crate) fn push(&self, queue: Arc<SharedQueue>) {
        let mut pool = lock(&self.pool);
        if queue.in_pool.swap(true, Ordering::SeqCst) {
            return;
        }
        if queue.started() != 0 {
            pool.push_back(queue);
        } else if pool.len() < self.config.pool_capacity {
            pool.push_front(queue);
        } else {
            debug!("queue {} discarded, pool is full", queue.id());
            drop(pool);
            drop(queue);
        }
    }

    /// Physical stacks currently mapped by this dispatcher.
    pub fn live_stacks(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    /// Highest value [`live_stacks`](Self::live_stacks) ever reached.
    pub fn peak_stacks(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Queues waiting in the pool.
    pub fn idle_queues(&self) -> usize {
        lock(&self.pool).len()
    }
}
