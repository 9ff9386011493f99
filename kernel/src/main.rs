//! Boot binary: the assembly prologue and nothing else.
//!
//! `_start` runs from the load address with the MMU off: it parks
//! secondary cores, sets the boot stack, zeroes `.bss` and jumps into
//! [`skylark_kernel::boot::kernel_main`]. Everything after that point
//! lives in the library crate.
#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
core::arch::global_asm!(
    ".section .text.boot",
    ".global _start",
    "_start:",
    // Mask everything until the vector table is installed.
    "msr daifset, #0xf",
    // Park all cores except core 0.
    "mrs x0, mpidr_el1",
    "and x0, x0, #3",
    "cbz x0, 2f",
    "1:",
    "wfe",
    "b 1b",
    "2:",
    // Boot stack, then clear .bss.
    "ldr x0, =__boot_stack_top",
    "mov sp, x0",
    "ldr x0, =__bss_start",
    "ldr x1, =__bss_end",
    "3:",
    "cmp x0, x1",
    "b.hs 4f",
    "str xzr, [x0], #8",
    "b 3b",
    "4:",
    "bl kernel_entry",
    "5:",
    "wfe",
    "b 5b",
);

/// First Rust code after reset.
#[cfg(target_os = "none")]
#[no_mangle]
unsafe extern "C" fn kernel_entry() -> ! {
    skylark_kernel::boot::kernel_main()
}

#[cfg(not(target_os = "none"))]
fn main() {
    // Host build: the kernel only runs on the target; `cargo test`
    // exercises the library crate.
}
