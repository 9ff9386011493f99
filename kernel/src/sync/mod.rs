//! Kernel synchronization primitives.
//!
//! Two tools cover every shared structure in this kernel: the
//! interrupt-masking ticket [`spinlock::SpinLock`], and the bare
//! `khal::cpu::irq_save`/`irq_restore` pair for the byte rings that
//! must stay safe against the polled interrupt path. The rule from
//! the scheduler's point of view: a critical section either masks
//! interrupts or holds no lock across a potential yield.

pub mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard};
