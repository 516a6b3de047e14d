//! aarch64 stack switch
//!
//! Same scheme as x86_64: the AAPCS64 callee-saved set (x19-x28, fp, lr and
//! the low halves of v8-v15) is stored in a frame on the stack being left,
//! and a [`Context`] only remembers where that frame is.

use std::arch::asm;
use std::arch::naked_asm;

/// Bytes of the register frame built by [`context_switch`]: ten register
/// pairs, so sp stays 16-byte aligned.
const FRAME_SIZE: usize = 0xa0;
/// Offset of lr (x30) within the frame.
const LR_OFFSET: usize = 0x58;

/// Where a stack was left.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Context {
    sp: u64,
}

impl Context {
    /// Lay out a first frame at the top of a fresh stack.
    ///
    /// `argument` lands in x19 and `entry` in lr, which the final `ret` of
    /// [`context_switch`] branches to. `stack_top` must be 16-byte aligned.
    pub fn new(stack_top: usize, entry: usize, argument: u64) -> Self {
        let frame = stack_top - FRAME_SIZE;
        unsafe {
            std::ptr::write_bytes(frame as *mut u8, 0, FRAME_SIZE);
            (frame as *mut u64).write(argument);
            ((frame + LR_OFFSET) as *mut u64).write(entry as u64);
        }
        Context { sp: frame as u64 }
    }

    /// Lowest live address of the stack this context was taken from.
    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
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
            "mov {}, x19",
            out(reg) argument,
            options(nomem, nostack, preserves_flags)
        );
    }
    argument
}

/// Store the callee-saved registers, record the stack pointer in `old` and
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
    // x0 = old, x1 = new
    naked_asm!(
        "sub sp, sp, #0xa0",
        "stp x19, x20, [sp, #0x00]",
        "stp x21, x22, [sp, #0x10]",
        "stp x23, x24, [sp, #0x20]",
        "stp x25, x26, [sp, #0x30]",
        "stp x27, x28, [sp, #0x40]",
        "stp x29, x30, [sp, #0x50]",
        "stp d8, d9, [sp, #0x60]",
        "stp d10, d11, [sp, #0x70]",
        "stp d12, d13, [sp, #0x80]",
        "stp d14, d15, [sp, #0x90]",
        "mov x9, sp",
        "str x9, [x0]",
        "ldr x9, [x1]",
        "mov sp, x9",
        "ldp x19, x20, [sp, #0x00]",
        "ldp x21, x22, [sp, #0x10]",
        "ldp x23, x24, [sp, #0x20]",
        "ldp x25, x26, [sp, #0x30]",
        "ldp x27, x28, [sp, #0x40]",
        "ldp x29, x30, [sp, #0x50]",
        "ldp d8, d9, [sp, #0x60]",
        "ldp d10, d11, [sp, #0x70]",
        "ldp d12, d13, [sp, #0x80]",
        "ldp d14, d15, [sp, #0x90]",
        "add sp, sp, #0xa0",
        "ret",
    );
}
