// =============================================================================
// Skylark — Interrupt Plumbing
// =============================================================================
//
// A fixed-capacity table maps interrupt number → (handler, argument).
// Registration unmasks the line at the GIC. The common entry point,
// called from the exception vector, claims pending interrupts,
// dispatches by number, signals end-of-interrupt and sets the
// scheduler's preempt-request flag.
//
// Devices on the legacy polled path register a poll callback instead;
// the scheduler invokes those once per dispatch round.
// =============================================================================

use core::sync::atomic::{AtomicBool, Ordering};

use crate::sync::SpinLock;

/// Interrupt lines the table covers (SPIs on the virt machine all fit).
pub const MAX_LINES: usize = 128;

/// An installed interrupt handler with its opaque argument.
#[derive(Clone, Copy)]
struct Slot {
    handler: fn(usize),
    arg: usize,
}

static HANDLERS: SpinLock<[Option<Slot>; MAX_LINES]> = SpinLock::new([None; MAX_LINES]);

/// Poll callbacks for devices serviced from the scheduler loop.
static POLLERS: SpinLock<[Option<fn()>; 8]> = SpinLock::new([None; 8]);

/// Set by every taken interrupt; consumed on the exception return path.
static PREEMPT_PENDING: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapError {
    /// Interrupt number outside the table.
    InvalidLine,
    /// All poller slots taken.
    NoSpace,
}

/// Bring up the interrupt controller and install the vector table.
pub fn init() {
    crate::arch::install_vectors();
    khal::gic::init();
}

/// Install `handler` for `intid` and unmask the line.
pub fn register(intid: u32, handler: fn(usize), arg: usize) -> Result<(), TrapError> {
    let idx = intid as usize;
    if idx >= MAX_LINES {
        return Err(TrapError::InvalidLine);
    }
    HANDLERS.lock()[idx] = Some(Slot { handler, arg });
    khal::gic::enable(intid);
    Ok(())
}

/// Remove the handler for `intid` and mask the line.
pub fn unregister(intid: u32) {
    let idx = intid as usize;
    if idx < MAX_LINES {
        khal::gic::disable(intid);
        HANDLERS.lock()[idx] = None;
    }
}

/// Register a callback for the scheduler's legacy poll round.
pub fn register_poller(poll: fn()) -> Result<(), TrapError> {
    let mut pollers = POLLERS.lock();
    for slot in pollers.iter_mut() {
        if slot.is_none() {
            *slot = Some(poll);
            return Ok(());
        }
    }
    Err(TrapError::NoSpace)
}

/// Run every registered poll callback. Called by the scheduler during
/// its dispatch round.
pub fn poll_devices() {
    let pollers = *POLLERS.lock();
    for poll in pollers.iter().flatten() {
        poll();
    }
}

/// Installed handler for a claimed interrupt id. Ids outside the
/// table (GICv2-reserved IAR values, lines past 128) resolve to no
/// handler rather than wrapping onto a live slot.
fn handler_for(intid: u32) -> Option<Slot> {
    let idx = intid as usize;
    if idx >= MAX_LINES {
        return None;
    }
    HANDLERS.lock()[idx]
}

/// Common interrupt entry: claim, dispatch, complete, request preempt.
/// Called from the IRQ vector with interrupts masked.
pub fn irq_entry() {
    loop {
        let intid = khal::gic::claim();
        if intid == khal::gic::SPURIOUS {
            break;
        }
        if let Some(slot) = handler_for(intid) {
            (slot.handler)(slot.arg);
        } else {
            log::warn!("spurious interrupt {}", intid);
        }
        khal::gic::complete(intid);
    }
    request_preempt();
}

/// Ask the scheduler to reschedule at the next opportunity.
pub fn request_preempt() {
    PREEMPT_PENDING.store(true, Ordering::Relaxed);
}

/// Consume the preempt request, returning whether one was pending.
pub fn take_preempt() -> bool {
    PREEMPT_PENDING.swap(false, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    static POLL_HITS: AtomicUsize = AtomicUsize::new(0);

    fn bump() {
        POLL_HITS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn register_rejects_out_of_range_lines() {
        fn noop(_: usize) {}
        assert_eq!(
            register(MAX_LINES as u32, noop, 0),
            Err(TrapError::InvalidLine)
        );
    }

    #[test]
    fn out_of_table_ids_never_wrap_onto_a_live_slot() {
        fn noop(_: usize) {}
        // Line 5 has a handler; a claimed id of 128 + 5 must not
        // resolve to it, nor may the reserved IAR values 1020..=1022.
        register(5, noop, 0).unwrap();
        assert!(handler_for(5).is_some());
        assert!(handler_for(MAX_LINES as u32 + 5).is_none());
        for reserved in 1020..=1022 {
            assert!(handler_for(reserved).is_none());
        }
        unregister(5);
    }

    #[test]
    fn pollers_run_on_poll_devices() {
        register_poller(bump).unwrap();
        let before = POLL_HITS.load(Ordering::Relaxed);
        poll_devices();
        assert!(POLL_HITS.load(Ordering::Relaxed) > before);
    }

    #[test]
    fn preempt_flag_is_consumed_once() {
        request_preempt();
        assert!(take_preempt());
        assert!(!take_preempt());
    }
}
