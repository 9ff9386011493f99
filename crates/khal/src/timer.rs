//! ARM generic timer access.
//!
//! The cycle counter (`CNTPCT_EL0`) and its frequency (`CNTFRQ_EL0`)
//! give the kernel its monotonic clock; the EL1 physical timer
//! provides the periodic scheduler tick (PPI, `board::TIMER_IRQ`).

#[cfg(target_arch = "aarch64")]
mod imp {
    use aarch64_cpu::registers::{CNTFRQ_EL0, CNTPCT_EL0, CNTP_CTL_EL0, CNTP_TVAL_EL0};
    use tock_registers::interfaces::{Readable, Writeable};

    /// Counter frequency in Hz.
    #[inline]
    pub fn frequency() -> u64 {
        CNTFRQ_EL0.get()
    }

    /// Raw cycle counter.
    #[inline]
    pub fn counter() -> u64 {
        CNTPCT_EL0.get()
    }

    /// Program the EL1 physical timer to fire in `cycles` counter ticks
    /// and enable it.
    pub fn arm(cycles: u64) {
        CNTP_TVAL_EL0.set(cycles);
        CNTP_CTL_EL0.write(CNTP_CTL_EL0::ENABLE::SET + CNTP_CTL_EL0::IMASK::CLEAR);
    }

    /// Disable the EL1 physical timer.
    pub fn disarm() {
        CNTP_CTL_EL0.write(CNTP_CTL_EL0::ENABLE::CLEAR);
    }
}

#[cfg(not(target_arch = "aarch64"))]
mod imp {
    //! Host fallbacks: a fake counter that advances on every read, so
    //! clock logic remains testable.

    use core::sync::atomic::{AtomicU64, Ordering};

    static FAKE_COUNTER: AtomicU64 = AtomicU64::new(0);

    pub fn frequency() -> u64 {
        1_000_000
    }

    pub fn counter() -> u64 {
        FAKE_COUNTER.fetch_add(1000, Ordering::Relaxed)
    }

    pub fn arm(_cycles: u64) {}

    pub fn disarm() {}
}

pub use imp::*;

/// Counter ticks per millisecond.
#[inline]
pub fn ticks_per_ms() -> u64 {
    frequency() / 1000
}
