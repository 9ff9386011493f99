//! Host stand-ins for the aarch64 layer.
//!
//! Unit tests exercise scheduler bookkeeping, not real context
//! switches, so the switch itself is unreachable here.

pub fn install_vectors() {}

/// # Safety
/// Never actually switches on the host; calling it is a test bug.
pub unsafe fn context_switch(_old_sp: *mut usize, _new_sp: usize) {
    unreachable!("context switch on host");
}

pub fn init_task_context(stack_top: usize, _entry: extern "C" fn() -> !) -> usize {
    stack_top
}
