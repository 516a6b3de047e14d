//! x86_64 stack switch
//!
//! The System V callee-saved registers are pushed onto the stack being left,
//! so a [`Context`] is just the stack pointer after those pushes. Evicting
//! the live part of a stack therefore also evicts its saved registers.

use std::arch::asm;
use std::arch::naked_asm;

/// Callee-saved registers spilled by [`context_switch`], lowest address
/// first: r15, r14, r13, r12, rbx, rbp.
const SAVED_REGISTERS: usize = 6;

/// Where a stack was left.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Context {
    rsp: u64,
}

impl Context {
    /// Lay out a first frame at the top of a fresh stack.
    ///
    /// `argument` lands in r15 and `entry` is where the final `ret` of
    /// [`context_switch`] goes. `stack_top` must be 16-byte aligned.
    pub fn new(stack_top: usize, entry: usize, argument: u64) -> Self {
        // [pad][entry][rbp rbx r12 r13 r14][r15] growing down; after the
        // pops and `ret`, RSP is 16n+8 as if `entry` had been called.
        let frame = stack_top - 16 - SAVED_REGISTERS * 8;
        unsafe {
            let slots = frame as *mut u64;
            std::ptr::write_bytes(slots, 0, SAVED_REGISTERS + 2);
            slots.write(argument);
            slots.add(SAVED_REGISTERS).write(entry as u64);
        }
        Context { rsp: frame as u64 }
    }

    /// Lowest live address of the stack this context was taken from.
    pub fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }
}

/// Read the argument placed by [`Context::new`].
///
/// Must be the first thing the entry function does.
#[inline(always)]
pub fn entry_argument() -> u64 {
    let argument: u64;
    unsafe {
        asm!(
            "mov {}, r15",
            out(reg) argument,
            options(nomem, nostack, preserves_flags)
        );
    }
    argument
}

/// Spill the callee-saved registers, record the stack pointer in `old` and
/// continue from `new`.
///
/// Returns when some other stack switches back to `old`.
///
/// # Safety
/// Both pointers must be valid. `new` must come from [`Context::new`] or
/// from an earlier `context_switch`, and the stack it refers to must still
/// hold the bytes it held when that state was captured.
#[unsafe(naked)]
pub extern "C" fn context_switch(_old: *mut Context, _new: *const Context) {
    // rdi = old, rsi = new
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}
