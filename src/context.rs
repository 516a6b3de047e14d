//! Execution context: one mapped stack plus the jump state needed to enter,
//! leave and re-enter it.
//!
//! - [`Stack`]: an `mmap`ed region with an optional guard page at its low end
//! - [`ExecutionContext`]: runs a block on the stack and switches between the
//!   stack and whoever called [`start`](ExecutionContext::start) or
//!   [`resume`](ExecutionContext::resume)
//! - [`SuspendPoint`]: where a suspended block left its stack; its saved
//!   registers sit just above that address

use crate::common::{Context, context_switch, entry_argument, page_size};
use crate::error::panic_message;
use log::{debug, error};
use std::cell::{Cell, UnsafeCell};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

/// Work run on a fresh stack.
pub type Block = Box<dyn FnOnce() + Send + 'static>;

/// A memory mapping used as a downward-growing stack.
#[derive(Debug)]
pub struct Stack {
    base: *mut u8,
    len: usize,
    guard: usize,
}

unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl Stack {
    /// Map `size` usable bytes, plus one inaccessible page below them when
    /// `guard_page` is set. `size` must be a multiple of the page size.
    pub fn new(size: usize, guard_page: bool) -> io::Result<Stack> {
        let guard = if guard_page { page_size() } else { 0 };
        let len = size + guard;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                STACK_FLAGS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        if guard != 0 && unsafe { libc::mprotect(base, guard, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(base, len) };
            return Err(err);
        }

        Ok(Stack {
            base: base.cast(),
            len,
            guard,
        })
    }

    /// Highest usable address, 16-byte aligned.
    pub fn top(&self) -> usize {
        (self.base as usize + self.len) & !0xF
    }

    /// Lowest usable address, just above the guard page.
    pub fn bottom(&self) -> usize {
        self.base as usize + self.guard
    }

    pub fn size(&self) -> usize {
        self.len - self.guard
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            if self.guard != 0 {
                libc::mprotect(
                    self.base.cast(),
                    self.guard,
                    libc::PROT_READ | libc::PROT_WRITE,
                );
            }
            libc::munmap(self.base.cast(), self.len);
        }
    }
}

#[cfg(not(any(target_os = "freebsd", target_os = "dragonfly", target_os = "macos")))]
const STACK_FLAGS: libc::c_int = libc::MAP_STACK | libc::MAP_PRIVATE | libc::MAP_ANON;
#[cfg(any(target_os = "freebsd", target_os = "dragonfly", target_os = "macos"))]
const STACK_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

/// Stack position of a block that left through
/// [`ExecutionContext::suspend`].
#[derive(Debug, Default)]
pub struct SuspendPoint {
    context: Context,
}

impl SuspendPoint {
    /// Lowest live address of the suspended block's stack.
    pub fn stack_pointer(&self) -> usize {
        self.context.stack_pointer()
    }
}

/// One physical stack and the state needed to hop on and off it.
///
/// Only one thread may drive a context at a time; the owner serializes
/// every call.
pub struct ExecutionContext {
    stack: Stack,
    /// Where `suspend` and a finishing block jump back to. Rewritten by
    /// every `start` and `resume`.
    return_point: UnsafeCell<Context>,
    finished: Cell<bool>,
    block: Cell<Option<Block>>,
}

unsafe impl Send for ExecutionContext {}
unsafe impl Sync for ExecutionContext {}

impl ExecutionContext {
    /// Map a new stack.
    ///
    /// # Panics
    /// When the operating system refuses the mapping.
    pub fn new(stack_size: usize, guard_page: bool) -> Self {
        let stack = match Stack::new(stack_size, guard_page) {
            Ok(stack) => stack,
            Err(err) => panic!("failed to map a {stack_size} byte coroutine stack: {err}"),
        };
        debug!(
            "mapped stack {:#x}..{:#x} (guard page: {guard_page})",
            stack.bottom(),
            stack.top()
        );
        ExecutionContext {
            stack,
            return_point: UnsafeCell::new(Context::default()),
            finished: Cell::new(false),
            block: Cell::new(None),
        }
    }

    pub fn stack_top(&self) -> usize {
        self.stack.top()
    }

    pub fn stack_size(&self) -> usize {
        self.stack.size()
    }

    /// Run `block` from the top of the stack.
    ///
    /// Returns `true` when the block ran to completion and `false` when it
    /// called [`suspend`](Self::suspend).
    pub fn start(&self, block: Block) -> bool {
        self.block.set(Some(block));
        let entry = Context::new(
            self.stack.top(),
            trampoline as *const () as usize,
            self as *const ExecutionContext as u64,
        );
        self.enter(&entry)
    }

    /// Continue a block parked at `from`. Same return convention as
    /// [`start`](Self::start).
    ///
    /// # Safety
    /// `from` must have been filled by [`suspend`](Self::suspend) on this
    /// context and the stack bytes above its stack pointer must be the ones
    /// that were there at that moment.
    pub unsafe fn resume(&self, from: *const SuspendPoint) -> bool {
        let target = unsafe { &(*from).context as *const Context };
        self.enter(target)
    }

    /// Park the running block at `to` and jump back to the pending `start`
    /// or `resume`, which then returns `false`.
    ///
    /// # Safety
    /// Must be called from a block running on this context's stack. `to`
    /// must stay valid until the block is resumed.
    pub unsafe fn suspend(&self, to: *mut SuspendPoint) {
        self.finished.set(false);
        let save = unsafe { &mut (*to).context as *mut Context };
        context_switch(save, self.return_point.get());
    }

    fn enter(&self, target: *const Context) -> bool {
        context_switch(self.return_point.get(), target);
        self.finished.get()
    }
}

/// First frame on every stack.
///
/// The context pointer arrives through the register loaded by
/// [`Context::new`].
extern "C" fn trampoline() {
    let context = entry_argument() as *const ExecutionContext;
    let context = unsafe { &*context };

    if let Some(block) = context.block.take()
        && let Err(payload) = panic::catch_unwind(AssertUnwindSafe(block))
    {
        error!("coroutine panicked: {}", panic_message(payload.as_ref()));
    }

    context.finished.set(true);
    let mut exit = Context::default();
    context_switch(&mut exit, context.return_point.get());
    unreachable!("a finished stack was resumed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::round_to_pages;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Shared {
        context: *const ExecutionContext,
        point: *mut SuspendPoint,
    }
    unsafe impl Send for Shared {}

    #[test]
    fn stack_bounds() {
        let size = round_to_pages(40 * 1024);
        let stack = Stack::new(size, true).unwrap();
        assert_eq!(stack.top() % 16, 0);
        assert_eq!(stack.size(), size);
        assert!(stack.top() - stack.bottom() <= size);
    }

    #[test]
    fn runs_to_completion() {
        let context = ExecutionContext::new(round_to_pages(64 * 1024), true);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        assert!(context.start(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn suspend_and_resume() {
        let context = ExecutionContext::new(round_to_pages(64 * 1024), false);
        let mut point = SuspendPoint::default();
        let shared = Shared {
            context: &context,
            point: &mut point,
        };
        let steps = Arc::new(AtomicUsize::new(0));
        let counter = steps.clone();

        let finished = context.start(Box::new(move || {
            let shared = shared;
            counter.fetch_add(1, Ordering::SeqCst);
            unsafe { (*shared.context).suspend(shared.point) };
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(!finished);
        assert_eq!(steps.load(Ordering::SeqCst), 1);
        let sp = point.stack_pointer();
        assert!(sp < context.stack_top());
        assert!(sp > context.stack_top() - context.stack_size());

        assert!(unsafe { context.resume(&point) });
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panic_is_contained() {
        let context = ExecutionContext::new(round_to_pages(64 * 1024), true);
        assert!(context.start(Box::new(|| panic!("boom"))));
        // the stack is reusable afterwards
        assert!(context.start(Box::new(|| {})));
    }
}
