//! EL1 exception vector table.
//!
//! All sixteen slots funnel into one of three stubs: synchronous
//! exceptions (SVC → syscall dispatch, anything else fatal), IRQs
//! (claim/dispatch via `traps`, then the preempt check), and an
//! invalid stub for the classes this kernel never takes. Each stub
//! saves the full [`TrapFrame`](crate::arch::TrapFrame) on the
//! interrupted task's stack.

use crate::arch::TrapFrame;

core::arch::global_asm!(
    // Save x0..x30 + elr + spsr (272 bytes, 16-aligned).
    ".macro save_frame",
    "sub sp, sp, #272",
    "stp x0, x1, [sp, #0]",
    "stp x2, x3, [sp, #16]",
    "stp x4, x5, [sp, #32]",
    "stp x6, x7, [sp, #48]",
    "stp x8, x9, [sp, #64]",
    "stp x10, x11, [sp, #80]",
    "stp x12, x13, [sp, #96]",
    "stp x14, x15, [sp, #112]",
    "stp x16, x17, [sp, #128]",
    "stp x18, x19, [sp, #144]",
    "stp x20, x21, [sp, #160]",
    "stp x22, x23, [sp, #176]",
    "stp x24, x25, [sp, #192]",
    "stp x26, x27, [sp, #208]",
    "stp x28, x29, [sp, #224]",
    "str x30, [sp, #240]",
    "mrs x10, elr_el1",
    "mrs x11, spsr_el1",
    "stp x10, x11, [sp, #248]",
    ".endm",
    ".macro restore_frame",
    "ldp x10, x11, [sp, #248]",
    "msr elr_el1, x10",
    "msr spsr_el1, x11",
    "ldr x30, [sp, #240]",
    "ldp x28, x29, [sp, #224]",
    "ldp x26, x27, [sp, #208]",
    "ldp x24, x25, [sp, #192]",
    "ldp x22, x23, [sp, #176]",
    "ldp x20, x21, [sp, #160]",
    "ldp x18, x19, [sp, #144]",
    "ldp x16, x17, [sp, #128]",
    "ldp x14, x15, [sp, #112]",
    "ldp x12, x13, [sp, #96]",
    "ldp x10, x11, [sp, #80]",
    "ldp x8, x9, [sp, #64]",
    "ldp x6, x7, [sp, #48]",
    "ldp x4, x5, [sp, #32]",
    "ldp x2, x3, [sp, #16]",
    "ldp x0, x1, [sp, #0]",
    "add sp, sp, #272",
    ".endm",
    // One 128-byte vector slot branching to a stub.
    ".macro ventry target",
    ".align 7",
    "b \\target",
    ".endm",
    "el1_sync_stub:",
    "save_frame",
    "mov x0, sp",
    "bl exception_sync",
    "restore_frame",
    "eret",
    "el1_irq_stub:",
    "save_frame",
    "bl exception_irq",
    "restore_frame",
    "eret",
    "invalid_stub:",
    "save_frame",
    "mov x0, sp",
    "bl exception_invalid",
    "1:",
    "wfe",
    "b 1b",
    ".align 11",
    ".global vector_table",
    "vector_table:",
    // Current EL with SP_EL0.
    "ventry invalid_stub",
    "ventry invalid_stub",
    "ventry invalid_stub",
    "ventry invalid_stub",
    // Current EL with SP_ELx — the kernel's own exceptions.
    "ventry el1_sync_stub",
    "ventry el1_irq_stub",
    "ventry invalid_stub",
    "ventry invalid_stub",
    // Lower EL, aarch64.
    "ventry invalid_stub",
    "ventry invalid_stub",
    "ventry invalid_stub",
    "ventry invalid_stub",
    // Lower EL, aarch32.
    "ventry invalid_stub",
    "ventry invalid_stub",
    "ventry invalid_stub",
    "ventry invalid_stub",
);

/// Point VBAR_EL1 at the table. Must run before interrupts unmask.
pub fn install_vectors() {
    extern "C" {
        static vector_table: u8;
    }
    unsafe {
        let addr = &vector_table as *const u8 as u64;
        core::arch::asm!(
            "msr vbar_el1, {}",
            "isb",
            in(reg) addr,
            options(nomem, nostack),
        );
    }
}

/// SVC exception class in ESR_EL1.EC.
const EC_SVC64: u64 = 0b010101;

#[no_mangle]
extern "C" fn exception_sync(frame: *mut TrapFrame) {
    let esr: u64;
    unsafe {
        core::arch::asm!("mrs {}, esr_el1", out(reg) esr, options(nomem, nostack));
    }
    let ec = (esr >> 26) & 0x3F;

    if ec == EC_SVC64 {
        // SAFETY: the vector stub hands us the live frame on this stack.
        let frame = unsafe { &mut *frame };
        let nr = frame.x[8] as usize;
        let result = crate::syscall::dispatch(
            nr,
            frame.x[0] as usize,
            frame.x[1] as usize,
            frame.x[2] as usize,
        );
        frame.x[0] = result as u64;
        return;
    }

    let far: u64;
    let elr: u64;
    unsafe {
        core::arch::asm!("mrs {}, far_el1", out(reg) far, options(nomem, nostack));
        core::arch::asm!("mrs {}, elr_el1", out(reg) elr, options(nomem, nostack));
    }
    panic!(
        "unhandled sync exception: esr={:#x} ec={:#b} far={:#x} elr={:#x}",
        esr, ec, far, elr
    );
}

#[no_mangle]
extern "C" fn exception_irq() {
    crate::traps::irq_entry();
    // Exception return path: switch now if the tick asked for it.
    crate::task::scheduler::preempt_if_pending();
}

#[no_mangle]
extern "C" fn exception_invalid(frame: *mut TrapFrame) {
    let esr: u64;
    unsafe {
        core::arch::asm!("mrs {}, esr_el1", out(reg) esr, options(nomem, nostack));
    }
    let elr = unsafe { (*frame).elr };
    panic!("exception from unexpected vector: esr={:#x} elr={:#x}", esr, elr);
}
