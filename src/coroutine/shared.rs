//! One logical coroutine living on a shared stack.
//!
//! State machine:
//! - `RUNNING`: executing (or about to) on its queue's stack
//! - `SUSPENDING`: inside an await, the suspension has not happened yet
//! - `SUSPENDED`: parked; the queue may evict its stack bytes
//! - `RESTARTING`: parked so the next step runs under a new scheduler

use crate::context::{Block, ExecutionContext, SuspendPoint};
use crate::dispatcher::{RoutineState, SharedDispatcher, SharedQueue};
use crate::error::{Error, Result};
use crate::scheduler::SchedulerHandle;
use crate::sync::{CallbackStack, lock};
use log::{trace, warn};
use std::cell::{RefCell, UnsafeCell};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

const RUNNING: u8 = 0;
const SUSPENDING: u8 = 1;
const SUSPENDED: u8 = 2;
const RESTARTING: u8 = 3;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Arc<SharedCoroutine>>> = const { RefCell::new(None) };
}

/// The coroutine running on this thread, if any.
///
/// Never inlined: a coroutine may continue on another thread after a
/// suspension, so the thread-local address must be looked up again.
#[inline(never)]
pub(crate) fn current() -> Option<Arc<SharedCoroutine>> {
    CURRENT.with(|current| current.borrow().clone())
}

#[inline(never)]
pub(crate) fn is_inside() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

#[inline(never)]
fn replace_current(coroutine: Option<Arc<SharedCoroutine>>) -> Option<Arc<SharedCoroutine>> {
    CURRENT.with(|current| current.replace(coroutine))
}

pub(crate) struct SharedCoroutine {
    id: u64,
    queue: Weak<SharedQueue>,
    dispatcher: Weak<SharedDispatcher>,
    /// Owned by `queue`, which outlives every step of this coroutine.
    context: *const ExecutionContext,
    scheduler: Mutex<SchedulerHandle>,
    state: AtomicU8,
    canceled: AtomicBool,
    /// Fire-once guard shared with the completion of the pending await.
    tag: AtomicUsize,
    suspensions: AtomicUsize,
    /// Live stack bytes while evicted from the physical stack.
    stack_buffer: UnsafeCell<Option<Vec<u8>>>,
    /// Allocated on first suspension.
    suspend_point: UnsafeCell<Option<Box<SuspendPoint>>>,
    finished: CallbackStack<()>,
}

// The cells are only touched by whoever holds the queue.
unsafe impl Send for SharedCoroutine {}
unsafe impl Sync for SharedCoroutine {}

impl SharedCoroutine {
    pub(crate) fn new(
        queue: &Arc<SharedQueue>,
        dispatcher: &Arc<SharedDispatcher>,
        scheduler: SchedulerHandle,
    ) -> Arc<Self> {
        Arc::new(SharedCoroutine {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            queue: Arc::downgrade(queue),
            dispatcher: Arc::downgrade(dispatcher),
            context: queue.context(),
            scheduler: Mutex::new(scheduler),
            state: AtomicU8::new(RUNNING),
            canceled: AtomicBool::new(false),
            tag: AtomicUsize::new(0),
            suspensions: AtomicUsize::new(0),
            stack_buffer: UnsafeCell::new(None),
            suspend_point: UnsafeCell::new(None),
            finished: CallbackStack::new(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn dispatcher(&self) -> Option<Arc<SharedDispatcher>> {
        self.dispatcher.upgrade()
    }

    pub(crate) fn scheduler(&self) -> SchedulerHandle {
        lock(&self.scheduler).clone()
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub(crate) fn suspend_count(&self) -> usize {
        self.suspensions.load(Ordering::Relaxed)
    }

    fn context(&self) -> &ExecutionContext {
        unsafe { &*self.context }
    }

    // steps driven by the queue

    pub(crate) fn start(self: &Arc<Self>, block: Block) -> RoutineState {
        self.perform_as_current(|| {
            let finished = self.context().start(block);
            self.perform(finished)
        })
    }

    pub(crate) fn resume(self: &Arc<Self>) -> RoutineState {
        self.perform_as_current(|| self.perform(self.resume_context()))
    }

    fn resume_context(&self) -> bool {
        let point = unsafe { (*self.suspend_point.get()).as_deref() }
            .map_or(ptr::null(), |point| point as *const SuspendPoint);
        debug_assert!(!point.is_null(), "resumed a coroutine that never suspended");
        trace!("coroutine {} resumes", self.id);
        unsafe { self.context().resume(point) }
    }

    fn perform(&self, mut finished: bool) -> RoutineState {
        loop {
            if finished {
                return RoutineState::Finished;
            }
            match self.state.load(Ordering::SeqCst) {
                SUSPENDING => {
                    if self
                        .state
                        .compare_exchange(SUSPENDING, SUSPENDED, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        return RoutineState::Suspended;
                    }
                }
                // completed while we were still on our way out
                RUNNING => finished = self.resume_context(),
                RESTARTING => return RoutineState::Restarting,
                _ => return RoutineState::Suspended,
            }
        }
    }

    fn perform_as_current<R>(self: &Arc<Self>, step: impl FnOnce() -> R) -> R {
        let previous = replace_current(Some(Arc::clone(self)));
        let result = step();
        replace_current(previous);
        result
    }

    /// Notify completion observers once the body has returned.
    pub(crate) fn mark_finished(&self) {
        trace!("coroutine {} finished", self.id);
        self.finished.close(());
    }

    pub(crate) fn when_finished(&self, callback: Box<dyn FnOnce() + Send>) {
        if let Err(callback) = self.finished.append(Box::new(move |()| callback())) {
            callback(());
        }
    }

    // stack eviction

    /// Copy the live part of the stack out to the heap.
    pub(crate) fn save_stack(&self) {
        let Some(sp) = self.stack_pointer() else {
            return;
        };
        let top = self.context().stack_top();
        let bytes = unsafe { std::slice::from_raw_parts(sp as *const u8, top - sp) }.to_vec();
        trace!("coroutine {} evicted ({} bytes)", self.id, bytes.len());
        unsafe { *self.stack_buffer.get() = Some(bytes) };
    }

    /// Copy bytes saved by [`save_stack`](Self::save_stack) back in place.
    pub(crate) fn restore_stack(&self) {
        let (Some(sp), Some(bytes)) = (self.stack_pointer(), unsafe {
            (*self.stack_buffer.get()).take()
        }) else {
            return;
        };
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), sp as *mut u8, bytes.len()) };
    }

    fn stack_pointer(&self) -> Option<usize> {
        unsafe { (*self.suspend_point.get()).as_ref() }.map(|point| point.stack_pointer())
    }

    // called from the coroutine's own stack

    fn suspend(&self) {
        let point = unsafe { (*self.suspend_point.get()).get_or_insert_with(Box::default) };
        let point: *mut SuspendPoint = &mut **point;
        self.suspensions.fetch_add(1, Ordering::Relaxed);
        trace!("coroutine {} suspends", self.id);
        unsafe { self.context().suspend(point) };
    }

    /// Suspend until `complete` is handed a value, unless canceled first.
    pub(crate) fn await_with<T, F>(self: &Arc<Self>, starter: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Completion<T>),
    {
        if self.is_canceled() {
            return Err(Error::Canceled);
        }
        self.state.store(SUSPENDING, Ordering::SeqCst);
        let tag = self.tag.load(Ordering::SeqCst);
        let slot = Arc::new(Slot(UnsafeCell::new(None)));

        starter(Completion {
            inner: Arc::new(CompletionInner {
                coroutine: Arc::clone(self),
                tag,
                slot: Arc::clone(&slot),
            }),
        });

        if self.state.load(Ordering::SeqCst) == SUSPENDING {
            self.suspend();
        }
        // retire this await so stale completions cannot reach the next one
        let _ = self
            .tag
            .compare_exchange(tag, tag.wrapping_add(1), Ordering::SeqCst, Ordering::SeqCst);

        if self.is_canceled() {
            return Err(Error::Canceled);
        }
        unsafe { (*slot.0.get()).take() }.ok_or(Error::Canceled)
    }

    /// Run `task` with `scheduler` driving this coroutine, then switch back.
    pub(crate) fn await_on<T>(
        self: &Arc<Self>,
        scheduler: SchedulerHandle,
        task: impl FnOnce() -> T,
    ) -> Result<T> {
        if self.is_canceled() {
            return Err(Error::Canceled);
        }
        let previous = self.scheduler();
        self.set_scheduler(scheduler);
        let result = if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(task())
        };
        self.set_scheduler(previous);
        result
    }

    /// Force a hand-off to the queue so the next step is scheduled by
    /// `scheduler`.
    fn set_scheduler(&self, scheduler: SchedulerHandle) {
        *lock(&self.scheduler) = scheduler;
        self.state.store(RESTARTING, Ordering::SeqCst);
        trace!("coroutine {} restarts on a new scheduler", self.id);
        self.suspend();
        self.state.store(RUNNING, Ordering::SeqCst);
    }

    // called from anywhere

    pub(crate) fn cancel(self: &Arc<Self>) {
        if !self.canceled.swap(true, Ordering::SeqCst) {
            trace!("coroutine {} canceled", self.id);
        }
        self.resume_if_suspended();
    }

    fn resume_if_suspended(self: &Arc<Self>) {
        loop {
            match self.state.load(Ordering::SeqCst) {
                SUSPENDING => {
                    // the await has not parked yet; it will see RUNNING
                    if self
                        .state
                        .compare_exchange(SUSPENDING, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        return;
                    }
                }
                SUSPENDED => {
                    if self
                        .state
                        .compare_exchange(SUSPENDED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        match self.queue.upgrade() {
                            Some(queue) => queue.resume(Arc::clone(self)),
                            None => warn!("coroutine {} lost its queue, cannot resume", self.id),
                        }
                        return;
                    }
                }
                _ => return,
            }
        }
    }
}

struct Slot<T>(UnsafeCell<Option<T>>);

// Written once by the completion that wins the tag, read after resumption.
unsafe impl<T: Send> Sync for Slot<T> {}

struct CompletionInner<T> {
    coroutine: Arc<SharedCoroutine>,
    tag: usize,
    slot: Arc<Slot<T>>,
}

/// Resumes a suspended await with a value. Only the first delivery counts.
///
/// Cheap to clone and safe to call from any thread.
pub struct Completion<T> {
    inner: Arc<CompletionInner<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Completion {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Completion<T> {
    /// Deliver `value`. Returns `false` if this await was already completed
    /// or has returned.
    pub fn complete(&self, value: T) -> bool {
        self.try_complete(value).is_ok()
    }

    /// Like [`complete`](Self::complete) but hands `value` back when it was
    /// not delivered.
    pub fn try_complete(&self, value: T) -> std::result::Result<(), T> {
        let inner = &self.inner;
        let claimed = inner
            .coroutine
            .tag
            .compare_exchange(
                inner.tag,
                inner.tag.wrapping_add(1),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if !claimed {
            return Err(value);
        }
        unsafe { *inner.slot.0.get() = Some(value) };
        inner.coroutine.resume_if_suspended();
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.inner.coroutine.tag.load(Ordering::SeqCst) != self.inner.tag
    }
}
