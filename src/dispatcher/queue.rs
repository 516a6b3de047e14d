//! A single physical stack time-shared by many coroutines.

use super::{RoutineState, SharedDispatcher, Stats};
use crate::context::{Block, ExecutionContext};
use crate::coroutine::SharedCoroutine;
use crate::scheduler::SchedulerHandle;
use crate::sync::{AtomicTuple, Fifo};
use log::{debug, trace, warn};
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const RUNNING: i32 = 0;
const FREE: i32 = 1;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

pub(crate) struct SharedQueue {
    id: usize,
    context: ExecutionContext,
    /// Coroutine whose bytes are currently on the stack.
    resident: UnsafeCell<Option<Arc<SharedCoroutine>>>,
    /// Coroutines started here that have not finished yet.
    started: AtomicUsize,
    pub(super) in_pool: AtomicBool,
    /// `(RUNNING | FREE, resumes waiting in prepared)`
    state_and_count: AtomicTuple,
    prepared: Fifo<Arc<SharedCoroutine>>,
    stats: Arc<Stats>,
}

// `resident` is only touched by the thread that holds the queue RUNNING.
unsafe impl Send for SharedQueue {}
unsafe impl Sync for SharedQueue {}

impl SharedQueue {
    /// A new queue is handed out immediately, so it starts RUNNING.
    pub(super) fn new(stack_size: usize, guard_page: bool, stats: Arc<Stats>) -> Arc<Self> {
        let queue = SharedQueue {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            context: ExecutionContext::new(stack_size, guard_page),
            resident: UnsafeCell::new(None),
            started: AtomicUsize::new(0),
            in_pool: AtomicBool::new(false),
            state_and_count: AtomicTuple::new(RUNNING, 0),
            prepared: Fifo::new(),
            stats,
        };
        queue.stats.stack_mapped();
        debug!("queue {} created", queue.id);
        Arc::new(queue)
    }

    pub(crate) fn context(&self) -> *const ExecutionContext {
        &self.context
    }

    pub(super) fn id(&self) -> usize {
        self.id
    }

    pub(super) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Claim a pooled queue. Fails if someone resumed it meanwhile.
    pub(super) fn occupy(&self) -> bool {
        self.state_and_count.update(|_, count| (RUNNING, count)).0.0 == FREE
    }

    fn resident(&self) -> Option<Arc<SharedCoroutine>> {
        unsafe { (*self.resident.get()).clone() }
    }

    fn replace_resident(
        &self,
        coroutine: Option<Arc<SharedCoroutine>>,
    ) -> Option<Arc<SharedCoroutine>> {
        unsafe { std::mem::replace(&mut *self.resident.get(), coroutine) }
    }

    pub(super) fn start(
        self: &Arc<Self>,
        dispatcher: &Arc<SharedDispatcher>,
        scheduler: SchedulerHandle,
        block: Block,
    ) {
        if let Some(parked) = self.resident() {
            parked.save_stack();
        }
        let coroutine = SharedCoroutine::new(self, dispatcher, scheduler);
        self.replace_resident(Some(Arc::clone(&coroutine)));
        self.started.fetch_add(1, Ordering::SeqCst);
        trace!("queue {} starts coroutine {}", self.id, coroutine.id());
        let state = coroutine.start(block);
        self.reschedule(state);
    }

    /// Wake `coroutine` from any thread. Served now if the stack is free,
    /// otherwise after the coroutines already waiting for it.
    pub(crate) fn resume(self: &Arc<Self>, coroutine: Arc<SharedCoroutine>) {
        let (old, _) = self.state_and_count.update(|state, count| {
            if state == FREE {
                (RUNNING, count)
            } else {
                (RUNNING, count + 1)
            }
        });
        if old.0 == FREE {
            self.resume_on_queue(coroutine);
        } else {
            self.prepared.push(coroutine);
        }
    }

    fn resume_on_queue(self: &Arc<Self>, coroutine: Arc<SharedCoroutine>) {
        let resident = self.resident();
        if !resident.as_ref().is_some_and(|r| Arc::ptr_eq(r, &coroutine)) {
            if let Some(parked) = resident {
                parked.save_stack();
            }
            coroutine.restore_stack();
            self.replace_resident(Some(Arc::clone(&coroutine)));
        }

        let queue = Arc::clone(self);
        coroutine.scheduler().schedule(Box::new(move || {
            let state = coroutine.resume();
            queue.reschedule(state);
        }));
    }

    fn reschedule(self: &Arc<Self>, state: RoutineState) {
        match state {
            RoutineState::Finished => {
                self.started.fetch_sub(1, Ordering::SeqCst);
                let finished = self.replace_resident(None);
                let dispatcher = finished.as_ref().and_then(|c| c.dispatcher());
                if let Some(coroutine) = finished {
                    coroutine.mark_finished();
                }
                self.perform_next(dispatcher);
            }
            RoutineState::Suspended => {
                let dispatcher = self.resident().and_then(|c| c.dispatcher());
                self.perform_next(dispatcher);
            }
            RoutineState::Restarting => {
                let Some(coroutine) = self.resident() else {
                    return;
                };
                let queue = Arc::clone(self);
                coroutine.scheduler().schedule(Box::new(move || {
                    let state = coroutine.resume();
                    queue.reschedule(state);
                }));
            }
        }
    }

    /// Serve the oldest prepared resume, or hand the queue back to the pool.
    fn perform_next(self: &Arc<Self>, dispatcher: Option<Arc<SharedDispatcher>>) {
        let (_, (state, _)) = self.state_and_count.update(|_, count| {
            if count > 0 {
                (RUNNING, count - 1)
            } else {
                (FREE, 0)
            }
        });
        if state == FREE {
            match dispatcher {
                Some(dispatcher) => dispatcher.push(Arc::clone(self)),
                None => warn!("queue {} outlived its dispatcher", self.id),
            }
        } else {
            let next = self.prepared.blocking_pop();
            self.resume_on_queue(next);
        }
    }
}

impl Drop for SharedQueue {
    fn drop(&mut self) {
        self.stats.stack_unmapped();
        debug!(
            "queue {} released ({} bytes of stack)",
            self.id,
            self.context.stack_size()
        );
    }
}
