// =============================================================================
// Skylark — Windows
// =============================================================================
//
// A window is a rectangle with a content render callback, an optional
// close callback, an optional pty (for terminal-like windows), and a
// bounded input event queue behind its own spinlock. State changes out
// of Normal snapshot the rectangle; changes back restore it.
// =============================================================================

use alloc::string::String;

use kdisplay::{Rect, Surface};

use crate::sync::SpinLock;
use crate::task::input::InputEvent;

pub type WindowId = u32;

/// Content renderer: draws the window interior.
pub type RenderFn = fn(&mut Surface, &Window);

/// Invoked right before the window is removed.
pub type CloseFn = fn(&Window);

/// Pixel height of the title bar chrome.
pub const TITLE_BAR_H: u32 = 22;
/// Pixel height of the taskbar.
pub const TASKBAR_H: u32 = 28;
/// Side length of a title-bar button.
pub const BUTTON_SIZE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Normal,
    Minimized,
    Maximized,
    Fullscreen,
    /// Maximized over the taskbar as well.
    MaximizedNoBar,
}

const QUEUE_SIZE: usize = 32;

/// Per-window input queue; head/tail under the window's spinlock.
struct EventQueue {
    buf: [InputEvent; QUEUE_SIZE],
    head: usize,
    tail: usize,
}

impl EventQueue {
    const fn new() -> Self {
        Self {
            buf: [InputEvent::new(0, 0, 0); QUEUE_SIZE],
            head: 0,
            tail: 0,
        }
    }

    fn push(&mut self, event: InputEvent) {
        let next = (self.head + 1) % QUEUE_SIZE;
        if next == self.tail {
            return; // full — drop
        }
        self.buf[self.head] = event;
        self.head = next;
    }

    fn pop(&mut self) -> Option<InputEvent> {
        if self.head == self.tail {
            return None;
        }
        let event = self.buf[self.tail];
        self.tail = (self.tail + 1) % QUEUE_SIZE;
        Some(event)
    }
}

pub struct Window {
    pub id: WindowId,
    pub title: String,
    pub rect: Rect,
    /// Geometry to restore when leaving maximized/fullscreen.
    saved_rect: Rect,
    pub state: WindowState,
    pub render: Option<RenderFn>,
    pub on_close: Option<CloseFn>,
    /// Pty slot for terminal-like windows; focused keystrokes are
    /// translated and pushed into its input ring.
    pub pty: Option<usize>,
    /// Opaque pointer-sized payload for the render callback.
    pub user_data: usize,
    queue: SpinLock<EventQueue>,
}

impl Window {
    pub fn new(id: WindowId, title: &str, rect: Rect) -> Self {
        Self {
            id,
            title: String::from(title),
            rect,
            saved_rect: rect,
            state: WindowState::Normal,
            render: None,
            on_close: None,
            pty: None,
            user_data: 0,
            queue: SpinLock::new(EventQueue::new()),
        }
    }

    pub fn push_event(&self, event: InputEvent) {
        self.queue.lock().push(event);
    }

    pub fn pop_event(&self) -> Option<InputEvent> {
        self.queue.lock().pop()
    }

    /// Outer frame including chrome, as drawn on screen.
    pub fn frame(&self, screen_w: u32, screen_h: u32) -> Rect {
        match self.state {
            WindowState::Normal | WindowState::Minimized => self.rect,
            WindowState::Maximized => Rect::new(0, 0, screen_w, screen_h - TASKBAR_H),
            WindowState::Fullscreen | WindowState::MaximizedNoBar => {
                Rect::new(0, 0, screen_w, screen_h)
            }
        }
    }

    /// Interior (content) area of the frame.
    pub fn content_rect(&self, screen_w: u32, screen_h: u32) -> Rect {
        let frame = self.frame(screen_w, screen_h);
        if self.has_chrome() {
            Rect::new(
                frame.x + 1,
                frame.y + TITLE_BAR_H as i32,
                frame.w.saturating_sub(2),
                frame.h.saturating_sub(TITLE_BAR_H + 1),
            )
        } else {
            frame
        }
    }

    /// Fullscreen-style states draw no chrome.
    pub fn has_chrome(&self) -> bool {
        matches!(
            self.state,
            WindowState::Normal | WindowState::Minimized | WindowState::Maximized
        )
    }

    /// State machine: transitions out of Normal snapshot the rect,
    /// transitions back restore it.
    pub fn set_state(&mut self, new_state: WindowState) {
        if self.state == new_state {
            return;
        }
        if self.state == WindowState::Normal {
            self.saved_rect = self.rect;
        }
        if new_state == WindowState::Normal {
            self.rect = self.saved_rect;
        }
        self.state = new_state;
    }

    /// Toggle helpers used by the title-bar buttons and taskbar.
    pub fn toggle_maximized(&mut self) {
        match self.state {
            WindowState::Maximized => self.set_state(WindowState::Normal),
            _ => self.set_state(WindowState::Maximized),
        }
    }

    pub fn toggle_minimized(&mut self) {
        match self.state {
            WindowState::Minimized => self.set_state(WindowState::Normal),
            _ => self.set_state(WindowState::Minimized),
        }
    }
}

/// What a click on a window frame means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHit {
    Close,
    Maximize,
    Minimize,
    /// Title bar outside the buttons: start a drag.
    Drag,
    Content,
    Miss,
}

/// Hit-test a point against a window frame.
pub fn hit_test(frame: Rect, has_chrome: bool, x: i32, y: i32) -> FrameHit {
    if !frame.contains(x, y) {
        return FrameHit::Miss;
    }
    if !has_chrome {
        return FrameHit::Content;
    }
    let title = Rect::new(frame.x, frame.y, frame.w, TITLE_BAR_H);
    if !title.contains(x, y) {
        return FrameHit::Content;
    }
    // Buttons right-to-left: close, maximize, minimize.
    let pad = 3;
    let by = frame.y + ((TITLE_BAR_H - BUTTON_SIZE) / 2) as i32;
    let bx_close = frame.x + frame.w as i32 - (BUTTON_SIZE as i32 + pad);
    let bx_max = bx_close - (BUTTON_SIZE as i32 + pad);
    let bx_min = bx_max - (BUTTON_SIZE as i32 + pad);
    for (bx, hit) in [
        (bx_close, FrameHit::Close),
        (bx_max, FrameHit::Maximize),
        (bx_min, FrameHit::Minimize),
    ] {
        if Rect::new(bx, by, BUTTON_SIZE, BUTTON_SIZE).contains(x, y) {
            return hit;
        }
    }
    FrameHit::Drag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::input::EV_KEY;

    #[test]
    fn event_queue_is_fifo_and_bounded() {
        let w = Window::new(1, "t", Rect::new(0, 0, 100, 100));
        for i in 0..(QUEUE_SIZE as i32 + 5) {
            w.push_event(InputEvent::new(EV_KEY, 1, i));
        }
        let mut got = 0;
        while let Some(e) = w.pop_event() {
            assert_eq!(e.value, got);
            got += 1;
        }
        // One slot is sacrificed to distinguish full from empty.
        assert_eq!(got as usize, QUEUE_SIZE - 1);
    }

    #[test]
    fn state_transitions_snapshot_and_restore_the_rect() {
        let mut w = Window::new(1, "t", Rect::new(30, 40, 200, 150));
        w.set_state(WindowState::Maximized);
        w.rect = Rect::new(0, 0, 800, 600); // compositor may scribble
        w.set_state(WindowState::Normal);
        assert_eq!(w.rect, Rect::new(30, 40, 200, 150));

        w.set_state(WindowState::Fullscreen);
        w.set_state(WindowState::Normal);
        assert_eq!(w.rect, Rect::new(30, 40, 200, 150));
    }

    #[test]
    fn maximized_frame_leaves_room_for_the_taskbar() {
        let mut w = Window::new(1, "t", Rect::new(10, 10, 100, 100));
        w.set_state(WindowState::Maximized);
        assert_eq!(w.frame(800, 600), Rect::new(0, 0, 800, 600 - TASKBAR_H));
        w.set_state(WindowState::MaximizedNoBar);
        assert_eq!(w.frame(800, 600), Rect::new(0, 0, 800, 600));
    }

    #[test]
    fn hit_test_finds_buttons_title_and_content() {
        let frame = Rect::new(100, 100, 300, 200);
        assert_eq!(hit_test(frame, true, 50, 50), FrameHit::Miss);
        // Well inside the body.
        assert_eq!(hit_test(frame, true, 200, 200), FrameHit::Content);
        // Title bar away from buttons.
        assert_eq!(hit_test(frame, true, 110, 110), FrameHit::Drag);
        // Close button: rightmost.
        let close_x = 100 + 300 - (BUTTON_SIZE as i32 + 3) + 2;
        let button_y = 100 + ((TITLE_BAR_H - BUTTON_SIZE) / 2) as i32 + 2;
        assert_eq!(hit_test(frame, true, close_x, button_y), FrameHit::Close);
        // Chromeless windows are all content.
        assert_eq!(hit_test(frame, false, 110, 110), FrameHit::Content);
    }
}
