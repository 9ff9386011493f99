// =============================================================================
// Skylark — Ticket Spinlock
// =============================================================================
//
// A ticket spinlock: two counters, `next_ticket` and `now_serving`.
// Lock takes a ticket and spins until served; unlock increments
// `now_serving`. Waiters are served in FIFO order.
//
// IRQ SAFETY: the lock masks interrupts for as long as it is held and
// restores the previous state on unlock, so nested lock/unlock pairs
// and acquisition from interrupt handlers both behave. On aarch64 the
// atomics compile to load-exclusive/store-exclusive pairs; the release
// ordering on unlock is the data memory barrier the ring-buffer users
// rely on.
// =============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use khal::cpu;

/// A ticket-based spinlock that disables interrupts while held.
pub struct SpinLock<T> {
    /// The next ticket to be dispensed.
    next_ticket: AtomicU32,
    /// The ticket number currently being served.
    now_serving: AtomicU32,
    /// The protected data; the lock enforces exclusive access at runtime.
    data: UnsafeCell<T>,
}

// SAFETY: the lock ensures only one context accesses T at a time.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, masking IRQs first. The returned guard
    /// releases the lock and restores the IRQ state on drop.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let irq_was_enabled = cpu::irq_save();

        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            core::hint::spin_loop();
        }

        SpinLockGuard {
            lock: self,
            irq_was_enabled,
        }
    }

    /// Acquire without spinning: `None` if the lock is held. Used from
    /// contexts where spinning could deadlock against the interrupted
    /// holder.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let irq_was_enabled = cpu::irq_save();

        let current = self.now_serving.load(Ordering::Relaxed);
        let result = self.next_ticket.compare_exchange(
            current,
            current + 1,
            Ordering::Acquire,
            Ordering::Relaxed,
        );

        match result {
            Ok(_) => Some(SpinLockGuard {
                lock: self,
                irq_was_enabled,
            }),
            Err(_) => {
                cpu::irq_restore(irq_was_enabled);
                None
            }
        }
    }

    /// Direct access when `&mut self` already proves exclusivity
    /// (initialization, tests).
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// RAII guard for a held spinlock.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    irq_was_enabled: bool,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: we hold the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
        cpu::irq_restore(self.irq_was_enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock_roundtrip() {
        let lock = SpinLock::new(5u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn sequential_lockers_observe_writes() {
        let lock = SpinLock::new(0u64);
        for i in 0..100 {
            let mut g = lock.lock();
            assert_eq!(*g, i);
            *g += 1;
        }
    }
}
