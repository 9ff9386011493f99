//! Kernel panic handler.
//!
//! A kernel panic means a violated invariant — corrupt task state, a
//! failed canary check, an impossible condition. The handler prints a
//! trace over the UART (bypassing the console lock) and parks the core.

use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    khal::uart::panic_write_str("\n=== KERNEL PANIC ===\n");
    if let Some(location) = info.location() {
        klog::kprintln!("  at {}:{}", location.file(), location.line());
    }
    klog::kprintln!("  {}", info.message());
    khal::uart::panic_write_str("=== system halted ===\n");
    khal::cpu::halt_forever()
}
