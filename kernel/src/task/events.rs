//! Named-event wait/wake.
//!
//! A task parks itself on an opaque 64-bit key; any other context can
//! wake every waiter on that key. The scheduler tracks waiters by id,
//! so a waiter that gets killed simply never comes back — there is no
//! record to leak.
//!
//! Key space: each subsystem builds keys with the constructors below
//! so they cannot collide.

use crate::task::scheduler;

const CLASS_PTY_IN: u64 = 1 << 32;
const CLASS_PTY_OUT: u64 = 2 << 32;
const CLASS_INPUT: u64 = 3 << 32;

/// Key for "bytes arrived in pty `slot`'s input ring".
pub const fn pty_in(slot: usize) -> u64 {
    CLASS_PTY_IN | slot as u64
}

/// Key for "bytes arrived in pty `slot`'s output ring".
pub const fn pty_out(slot: usize) -> u64 {
    CLASS_PTY_OUT | slot as u64
}

/// Key for "an input event is available".
pub const INPUT_READY: u64 = CLASS_INPUT;

/// Park the calling task until `key` is woken.
pub fn wait(key: u64) {
    scheduler::wait_event(key);
}

/// Wake every task parked on `key`; returns the number woken.
pub fn wake(key: u64) -> usize {
    scheduler::wake_event(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_constructors_do_not_collide() {
        assert_ne!(pty_in(0), pty_out(0));
        assert_ne!(pty_in(1), pty_in(2));
        assert_ne!(pty_out(3), INPUT_READY);
    }
}
