//! Input pipeline: normalized keyboard and pointer event rings.
//!
//! The virtio input driver pushes raw `(type, code, value)` triples
//! here; the compositor drains them. Key and pointer streams go to
//! separate bounded rings behind one lock. Overflow drops the newest
//! event.

use crate::sync::SpinLock;

/// Event type: key press/release.
pub const EV_KEY: u16 = 1;
/// Event type: relative pointer motion.
pub const EV_REL: u16 = 2;
/// Event type: absolute pointer position.
pub const EV_ABS: u16 = 3;

/// Codes at or above this are buttons, not keys (virtio delivers mouse
/// buttons as key events).
pub const BUTTON_CODE_BASE: u16 = 0x100;

/// What kind of device produced an event. The transport tags events at
/// the source so the button heuristic only applies where it is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Keyboard,
    Pointer,
    Unknown,
}

/// A normalized input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub etype: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    pub const fn new(etype: u16, code: u16, value: i32) -> Self {
        Self { etype, code, value }
    }
}

const RING_SIZE: usize = 64;

struct EventRing {
    buf: [InputEvent; RING_SIZE],
    read: usize,
    write: usize,
    count: usize,
}

impl EventRing {
    const fn new() -> Self {
        Self {
            buf: [InputEvent::new(0, 0, 0); RING_SIZE],
            read: 0,
            write: 0,
            count: 0,
        }
    }

    fn push(&mut self, event: InputEvent) {
        if self.count >= RING_SIZE {
            return; // full — drop the newest
        }
        self.buf[self.write] = event;
        self.write = (self.write + 1) % RING_SIZE;
        self.count += 1;
    }

    fn pop(&mut self) -> Option<InputEvent> {
        if self.count == 0 {
            return None;
        }
        let event = self.buf[self.read];
        self.read = (self.read + 1) % RING_SIZE;
        self.count -= 1;
        Some(event)
    }
}

struct Pipeline {
    keys: EventRing,
    pointer: EventRing,
}

static PIPELINE: SpinLock<Pipeline> = SpinLock::new(Pipeline {
    keys: EventRing::new(),
    pointer: EventRing::new(),
});

/// Which ring an event belongs in.
fn is_pointer_event(kind: DeviceKind, event: &InputEvent) -> bool {
    match event.etype {
        EV_REL | EV_ABS => true,
        EV_KEY => match kind {
            DeviceKind::Pointer => true,
            // Keyboards never emit codes in the button range; when they
            // do (or the device kind is unknown) treat them as buttons.
            DeviceKind::Keyboard | DeviceKind::Unknown => event.code >= BUTTON_CODE_BASE,
        },
        _ => false,
    }
}

/// Push a raw event from a device into the right ring.
pub fn push(kind: DeviceKind, event: InputEvent) {
    let mut pipeline = PIPELINE.lock();
    if is_pointer_event(kind, &event) {
        pipeline.pointer.push(event);
    } else if event.etype == EV_KEY {
        pipeline.keys.push(event);
    }
    // EV_SYN and anything else: not queued.
}

/// Pop the next key event (non-blocking).
pub fn pop_key() -> Option<InputEvent> {
    PIPELINE.lock().keys.pop()
}

/// Pop the next pointer event (non-blocking).
pub fn pop_pointer() -> Option<InputEvent> {
    PIPELINE.lock().pointer.pop()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests run against a private Pipeline so parallel test threads
    // never share ring state.
    fn route(p: &mut Pipeline, kind: DeviceKind, event: InputEvent) {
        if is_pointer_event(kind, &event) {
            p.pointer.push(event);
        } else if event.etype == EV_KEY {
            p.keys.push(event);
        }
    }

    fn fresh() -> Pipeline {
        Pipeline {
            keys: EventRing::new(),
            pointer: EventRing::new(),
        }
    }

    #[test]
    fn key_events_reach_the_key_ring() {
        let mut p = fresh();
        route(&mut p, DeviceKind::Keyboard, InputEvent::new(EV_KEY, 30, 1));
        assert_eq!(p.keys.pop(), Some(InputEvent::new(EV_KEY, 30, 1)));
        assert_eq!(p.pointer.pop(), None);
    }

    #[test]
    fn high_key_codes_are_reclassified_as_buttons() {
        let mut p = fresh();
        // BTN_LEFT arrives as a key event with code 0x110.
        route(&mut p, DeviceKind::Unknown, InputEvent::new(EV_KEY, 0x110, 1));
        assert_eq!(p.keys.pop(), None);
        assert_eq!(p.pointer.pop(), Some(InputEvent::new(EV_KEY, 0x110, 1)));
    }

    #[test]
    fn pointer_kind_key_events_skip_the_heuristic() {
        let mut p = fresh();
        route(&mut p, DeviceKind::Pointer, InputEvent::new(EV_KEY, 30, 1));
        assert_eq!(p.keys.pop(), None);
        assert!(p.pointer.pop().is_some());
    }

    #[test]
    fn motion_goes_to_the_pointer_ring() {
        let mut p = fresh();
        route(&mut p, DeviceKind::Pointer, InputEvent::new(EV_REL, 0, 5));
        route(&mut p, DeviceKind::Pointer, InputEvent::new(EV_ABS, 1, 300));
        assert_eq!(p.pointer.pop(), Some(InputEvent::new(EV_REL, 0, 5)));
        assert_eq!(p.pointer.pop(), Some(InputEvent::new(EV_ABS, 1, 300)));
    }

    #[test]
    fn syn_events_are_not_queued() {
        let mut p = fresh();
        route(&mut p, DeviceKind::Keyboard, InputEvent::new(0, 0, 0));
        assert_eq!(p.keys.pop(), None);
        assert_eq!(p.pointer.pop(), None);
    }

    #[test]
    fn overflow_drops_the_newest_event() {
        let mut p = fresh();
        for i in 0..(RING_SIZE as i32 + 10) {
            route(&mut p, DeviceKind::Keyboard, InputEvent::new(EV_KEY, 1, i));
        }
        // The first RING_SIZE survive; the overflow is gone.
        let mut last = None;
        let mut n = 0;
        while let Some(e) = p.keys.pop() {
            last = Some(e.value);
            n += 1;
        }
        assert_eq!(n, RING_SIZE);
        assert_eq!(last, Some(RING_SIZE as i32 - 1));
    }
}
