//! Monotonic millisecond clock.
//!
//! Derived from the generic-timer cycle counter, truncated to 32 bits
//! of milliseconds. The EL1 physical timer fires roughly every
//! millisecond purely to drive preemption; waking timed sleepers
//! happens in [`poll_and_advance`], which the scheduler runs on every
//! dispatch round.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Cycle counter value at boot; now_ms counts from here.
static BOOT_CYCLES: AtomicU64 = AtomicU64::new(0);

/// Last millisecond value observed by `poll_and_advance`.
static LAST_POLL_MS: AtomicU32 = AtomicU32::new(0);

/// Record the clock epoch and start the preempt tick.
pub fn init() {
    BOOT_CYCLES.store(khal::timer::counter(), Ordering::Relaxed);
    let _ = crate::traps::register(khal::board::TIMER_IRQ, timer_irq, 0);
    khal::timer::arm(khal::timer::ticks_per_ms());
}

/// Timer interrupt: rearm for the next tick. The common interrupt
/// entry already sets the preempt flag.
fn timer_irq(_arg: usize) {
    khal::timer::arm(khal::timer::ticks_per_ms());
}

/// Monotonic 32-bit millisecond reading.
pub fn now_ms() -> u32 {
    let boot = BOOT_CYCLES.load(Ordering::Relaxed);
    let elapsed = khal::timer::counter().wrapping_sub(boot);
    (elapsed / khal::timer::ticks_per_ms()) as u32
}

/// Observe the clock, and if it moved since the last poll, let the
/// scheduler wake timed waiters whose deadline passed.
pub fn poll_and_advance() {
    let now = now_ms();
    let last = LAST_POLL_MS.swap(now, Ordering::Relaxed);
    if now != last {
        crate::task::scheduler::wake_timed(now);
    }
}

/// Block the calling task for at least `ms` milliseconds. The wake
/// may be late (scheduler-tick resolution), never early.
pub fn sleep_ms(ms: u32) {
    let wake_at = now_ms().wrapping_add(ms);
    crate::task::scheduler::block_until(wake_at);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic() {
        init();
        let a = now_ms();
        let b = now_ms();
        let c = now_ms();
        assert!(b >= a);
        assert!(c >= b);
    }
}
