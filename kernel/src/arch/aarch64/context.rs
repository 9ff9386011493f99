//! Register context switch.
//!
//! A suspended task is exactly its saved stack pointer: the switch
//! pushes the callee-saved registers (x19–x28, fp, lr) onto the old
//! task's stack, stores the resulting SP, loads the new task's SP and
//! pops. A brand-new task gets a hand-built frame whose saved lr
//! points at the scheduler trampoline, so the first switch "returns"
//! into the task entry.

/// Bytes of one saved register frame: x19..x28 + x29 + x30.
const FRAME_SIZE: usize = 12 * 8;

core::arch::global_asm!(
    ".global context_switch_asm",
    "context_switch_asm:",
    // x0 = &mut old_sp, x1 = new_sp
    "sub sp, sp, #96",
    "stp x19, x20, [sp, #0]",
    "stp x21, x22, [sp, #16]",
    "stp x23, x24, [sp, #32]",
    "stp x25, x26, [sp, #48]",
    "stp x27, x28, [sp, #64]",
    "stp x29, x30, [sp, #80]",
    "mov x9, sp",
    "str x9, [x0]",
    "mov sp, x1",
    "ldp x19, x20, [sp, #0]",
    "ldp x21, x22, [sp, #16]",
    "ldp x23, x24, [sp, #32]",
    "ldp x25, x26, [sp, #48]",
    "ldp x27, x28, [sp, #64]",
    "ldp x29, x30, [sp, #80]",
    "add sp, sp, #96",
    "ret",
);

extern "C" {
    fn context_switch_asm(old_sp: *mut usize, new_sp: usize);
}

/// Switch register contexts. Returns when something switches back.
///
/// # Safety
/// Both stack pointers must reference valid, correctly laid-out task
/// stacks, and interrupts must be masked across the call.
pub unsafe fn context_switch(old_sp: *mut usize, new_sp: usize) {
    unsafe {
        context_switch_asm(old_sp, new_sp);
    }
}

/// Build the initial saved frame for a fresh task so the first switch
/// lands in `entry`. Returns the saved stack pointer.
pub fn init_task_context(stack_top: usize, entry: extern "C" fn() -> !) -> usize {
    let sp = (stack_top - FRAME_SIZE) & !15;
    let frame = sp as *mut u64;
    // SAFETY: the caller owns the stack; the frame lies inside it.
    unsafe {
        for i in 0..10 {
            frame.add(i).write(0); // x19..x28
        }
        frame.add(10).write(0); // x29: terminate frame chain
        frame.add(11).write(entry as usize as u64); // x30: first "return"
    }
    sp
}
