// =============================================================================
// Skylark — Compositor
// =============================================================================
//
// Owns the ordered window list (front-to-back) and the focus pointer,
// drains the input pipeline, and repaints the whole screen ~30 times a
// second from its own task: desktop, windows back-to-front with chrome
// by state, taskbar, cursor, then a GPU flush.
//
// Key events go to the focused window's queue — and, when the window
// has a pty, through the keymap into its input ring. Pointer events
// move the cursor, hit-test title-bar controls and the taskbar, and
// drag windows.
// =============================================================================

use alloc::string::String;
use alloc::vec::Vec;

use kdisplay::{Color, Rect, Surface};

use crate::sync::SpinLock;
use crate::task::input::{self, InputEvent, EV_ABS, EV_KEY, EV_REL};
use crate::task::{clock, events, pty};
use crate::wm::keymap::{self, Modifiers};
use crate::wm::window::{
    hit_test, FrameHit, RenderFn, Window, WindowId, WindowState, TASKBAR_H, TITLE_BAR_H,
};
use crate::wm::terminal;

/// Left mouse button as it arrives from virtio (key event 0x110).
const BTN_LEFT: u16 = 0x110;

/// Absolute axes are reported in this range by the tablet device.
const ABS_MAX: i32 = 32767;

/// Compose cadence: ~30 Hz.
const FRAME_MS: u32 = 33;

pub struct Wm {
    /// Draw order, front first.
    windows: Vec<Window>,
    focus: Option<WindowId>,
    next_id: WindowId,
    cursor: (i32, i32),
    left_down: bool,
    /// Dragged window and the cursor's grab offset inside it.
    drag: Option<(WindowId, i32, i32)>,
    mods: Modifiers,
    screen_w: u32,
    screen_h: u32,
}

impl Wm {
    pub fn new(screen_w: u32, screen_h: u32) -> Self {
        Self {
            windows: Vec::new(),
            focus: None,
            next_id: 1,
            cursor: (screen_w as i32 / 2, screen_h as i32 / 2),
            left_down: false,
            drag: None,
            mods: Modifiers::default(),
            screen_w,
            screen_h,
        }
    }

    pub fn create(&mut self, title: &str, rect: Rect) -> WindowId {
        let id = self.next_id;
        self.next_id += 1;
        let window = Window::new(id, title, rect);
        // New windows open in front with focus.
        self.windows.insert(0, window);
        self.focus = Some(id);
        id
    }

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn window_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.focus
    }

    /// Bring a window to the front and focus it.
    pub fn raise(&mut self, id: WindowId) {
        if let Some(pos) = self.windows.iter().position(|w| w.id == id) {
            let window = self.windows.remove(pos);
            self.windows.insert(0, window);
            self.focus = Some(id);
        }
    }

    /// Run the close callback, remove the window, and let focus fall
    /// to the new front of the list.
    pub fn close(&mut self, id: WindowId) {
        if let Some(pos) = self.windows.iter().position(|w| w.id == id) {
            if let Some(on_close) = self.windows[pos].on_close {
                on_close(&self.windows[pos]);
            }
            self.windows.remove(pos);
            if self.focus == Some(id) {
                self.focus = self.windows.first().map(|w| w.id);
            }
            if let Some((drag_id, _, _)) = self.drag {
                if drag_id == id {
                    self.drag = None;
                }
            }
        }
    }

    /// Key events go to the focused window; presses additionally feed
    /// an attached pty through the keymap.
    pub fn route_key(&mut self, event: InputEvent) {
        let pressed = event.value != 0;
        if self.mods.update(event.code, pressed) {
            return;
        }
        let focus = match self.focus {
            Some(id) => id,
            None => return,
        };
        let mods = self.mods;
        if let Some(window) = self.window(focus) {
            window.push_event(event);
            if pressed {
                if let Some(slot) = window.pty {
                    if let Some(byte) = keymap::translate(event.code, mods) {
                        pty::push_in(slot, byte);
                        events::wake(events::pty_in(slot));
                    }
                }
            }
        }
    }

    /// Pointer events update the cursor and button state, then feed
    /// hit testing or the focused window.
    pub fn route_pointer(&mut self, event: InputEvent) {
        match event.etype {
            EV_REL => match event.code {
                0 => self.cursor.0 = (self.cursor.0 + event.value).clamp(0, self.screen_w as i32 - 1),
                1 => self.cursor.1 = (self.cursor.1 + event.value).clamp(0, self.screen_h as i32 - 1),
                _ => {}
            },
            EV_ABS => match event.code {
                0 => self.cursor.0 = event.value * self.screen_w as i32 / (ABS_MAX + 1),
                1 => self.cursor.1 = event.value * self.screen_h as i32 / (ABS_MAX + 1),
                _ => {}
            },
            EV_KEY if event.code == BTN_LEFT => {
                if event.value != 0 {
                    self.left_down = true;
                    self.click();
                } else {
                    self.left_down = false;
                    self.drag = None;
                }
            }
            _ => {}
        }
        if self.left_down {
            if let Some((id, grab_x, grab_y)) = self.drag {
                let (cx, cy) = self.cursor;
                let max_y = (self.screen_h - TASKBAR_H - TITLE_BAR_H) as i32;
                if let Some(window) = self.window_mut(id) {
                    if window.state == WindowState::Normal {
                        window.rect.x = (cx - grab_x).max(0);
                        window.rect.y = (cy - grab_y).clamp(0, max_y);
                    }
                }
            }
        }
    }

    /// Left-button press: title-bar controls, drag handles, taskbar,
    /// or a plain content click.
    fn click(&mut self) {
        let (cx, cy) = self.cursor;

        // Taskbar first; it sits above everything.
        if cy >= (self.screen_h - TASKBAR_H) as i32 {
            if let Some(id) = self.taskbar_hit(cx) {
                let focused = self.focus == Some(id);
                if let Some(window) = self.window_mut(id) {
                    if window.state == WindowState::Minimized {
                        window.toggle_minimized();
                    } else if focused {
                        window.toggle_minimized();
                    }
                }
                self.raise(id);
            }
            return;
        }

        // Front-to-back hit test; minimized windows are not on screen.
        let mut action: Option<(WindowId, FrameHit, Rect)> = None;
        for window in &self.windows {
            if window.state == WindowState::Minimized {
                continue;
            }
            let frame = window.frame(self.screen_w, self.screen_h);
            let hit = hit_test(frame, window.has_chrome(), cx, cy);
            if hit != FrameHit::Miss {
                action = Some((window.id, hit, frame));
                break;
            }
        }

        let (id, hit, frame) = match action {
            Some(a) => a,
            None => return,
        };
        match hit {
            FrameHit::Close => self.close(id),
            FrameHit::Maximize => {
                self.raise(id);
                if let Some(window) = self.window_mut(id) {
                    window.toggle_maximized();
                }
            }
            FrameHit::Minimize => {
                if let Some(window) = self.window_mut(id) {
                    window.toggle_minimized();
                }
                if self.focus == Some(id) {
                    self.focus = self
                        .windows
                        .iter()
                        .find(|w| w.state != WindowState::Minimized)
                        .map(|w| w.id);
                }
            }
            FrameHit::Drag => {
                self.raise(id);
                self.drag = Some((id, cx - frame.x, cy - frame.y));
            }
            FrameHit::Content => {
                self.raise(id);
                if let Some(window) = self.window(id) {
                    window.push_event(InputEvent::new(EV_KEY, BTN_LEFT, 1));
                }
            }
            FrameHit::Miss => {}
        }
    }

    /// Which window's taskbar button sits at screen x.
    fn taskbar_hit(&self, x: i32) -> Option<WindowId> {
        let mut bx = 4i32;
        for window in self.windows.iter().rev() {
            let w = self.taskbar_button_w();
            if x >= bx && x < bx + w as i32 {
                return Some(window.id);
            }
            bx += w as i32 + 4;
        }
        None
    }

    fn taskbar_button_w(&self) -> u32 {
        120
    }

    /// Paint one full frame.
    pub fn compose(&mut self, surface: &mut Surface) {
        // Desktop.
        surface.fill_rect(
            Rect::new(0, 0, self.screen_w, self.screen_h),
            Color::new(28, 48, 68),
        );

        // Windows, back to front.
        for i in (0..self.windows.len()).rev() {
            if self.windows[i].state == WindowState::Minimized {
                continue;
            }
            let focused = self.focus == Some(self.windows[i].id);
            self.draw_window(surface, i, focused);
        }

        self.draw_taskbar(surface);
        self.draw_cursor(surface);
    }

    fn draw_window(&mut self, surface: &mut Surface, index: usize, focused: bool) {
        let (frame, chrome, title, render, content) = {
            let w = &self.windows[index];
            (
                w.frame(self.screen_w, self.screen_h),
                w.has_chrome(),
                w.title.clone(),
                w.render,
                w.content_rect(self.screen_w, self.screen_h),
            )
        };

        if chrome {
            let bar_color = if focused {
                Color::new(40, 90, 160)
            } else {
                Color::new(70, 70, 80)
            };
            surface.fill_rect(frame, Color::DARK_GRAY);
            surface.rect_outline(frame, Color::BLACK);
            surface.fill_rect(
                Rect::new(frame.x, frame.y, frame.w, TITLE_BAR_H),
                bar_color,
            );
            surface.text(frame.x + 6, frame.y + 7, &title, Color::WHITE);
            self.draw_title_buttons(surface, frame);
        }

        // Content: hand the callback a view surface over the content
        // rectangle, clipped to the screen.
        if let Some(render) = render {
            if let Some(mut view) = self.content_view(surface, content) {
                render(&mut view, &self.windows[index]);
            }
        } else {
            surface.fill_rect(content, Color::new(16, 16, 16));
        }
    }

    /// A sub-surface over the on-screen part of a content rect.
    fn content_view(&self, surface: &mut Surface, content: Rect) -> Option<Surface> {
        if content.x < 0 || content.y < 0 {
            return None;
        }
        let w = (content.w as usize).min(surface.width().saturating_sub(content.x as usize));
        let h = (content.h as usize).min(surface.height().saturating_sub(content.y as usize));
        if w == 0 || h == 0 {
            return None;
        }
        surface.view(content.x as usize, content.y as usize, w, h)
    }

    fn draw_title_buttons(&self, surface: &mut Surface, frame: Rect) {
        use crate::wm::window::BUTTON_SIZE;
        let pad = 3;
        let by = frame.y + ((TITLE_BAR_H - BUTTON_SIZE) / 2) as i32;
        let bx_close = frame.x + frame.w as i32 - (BUTTON_SIZE as i32 + pad);
        let bx_max = bx_close - (BUTTON_SIZE as i32 + pad);
        let bx_min = bx_max - (BUTTON_SIZE as i32 + pad);
        surface.fill_rect(Rect::new(bx_close, by, BUTTON_SIZE, BUTTON_SIZE), Color::RED);
        surface.text(bx_close + 4, by + 4, "x", Color::WHITE);
        surface.fill_rect(Rect::new(bx_max, by, BUTTON_SIZE, BUTTON_SIZE), Color::GRAY);
        surface.text(bx_max + 4, by + 4, "+", Color::WHITE);
        surface.fill_rect(Rect::new(bx_min, by, BUTTON_SIZE, BUTTON_SIZE), Color::GRAY);
        surface.text(bx_min + 4, by + 4, "-", Color::WHITE);
    }

    fn draw_taskbar(&self, surface: &mut Surface) {
        let bar_y = (self.screen_h - TASKBAR_H) as i32;
        surface.fill_rect(
            Rect::new(0, bar_y, self.screen_w, TASKBAR_H),
            Color::new(24, 24, 28),
        );
        let mut bx = 4i32;
        for window in self.windows.iter().rev() {
            let focused = self.focus == Some(window.id);
            let color = if focused {
                Color::new(40, 90, 160)
            } else if window.state == WindowState::Minimized {
                Color::new(40, 40, 46)
            } else {
                Color::new(60, 60, 68)
            };
            let rect = Rect::new(bx, bar_y + 3, self.taskbar_button_w(), TASKBAR_H - 6);
            surface.fill_rect(rect, color);
            let mut label: String = window.title.clone();
            label.truncate(13);
            surface.text(bx + 5, bar_y + 9, &label, Color::WHITE);
            bx += self.taskbar_button_w() as i32 + 4;
        }
    }

    fn draw_cursor(&self, surface: &mut Surface) {
        let (x, y) = self.cursor;
        // A small arrow: two edges plus fill lines.
        for i in 0..10 {
            surface.vline(x + i, y + i, y + 13 - (i * 2).min(13), Color::BLACK);
        }
        surface.line(x, y, x + 9, y + 9, Color::WHITE);
        surface.line(x, y, x, y + 13, Color::WHITE);
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen_w, self.screen_h)
    }

    /// (pty, terminal) pairs for the frame's pump phase.
    fn terminal_pairs(&self) -> Vec<(usize, usize)> {
        self.windows
            .iter()
            .filter_map(|w| w.pty.map(|p| (p, w.user_data)))
            .collect()
    }
}

// =============================================================================
// Global instance and the compose task
// =============================================================================

static WM: SpinLock<Option<Wm>> = SpinLock::new(None);

/// Framebuffer the compositor draws into: (base, width, height).
static FB: SpinLock<Option<(usize, u32, u32)>> = SpinLock::new(None);

/// Bring up the window system over an initialized GPU surface.
pub fn init(fb_base: usize, width: u32, height: u32) {
    *WM.lock() = Some(Wm::new(width, height));
    *FB.lock() = Some((fb_base, width, height));
}

pub fn is_up() -> bool {
    WM.lock().is_some()
}

/// Create a window with the full capability set.
pub fn create_window(
    title: &str,
    rect: Rect,
    render: Option<RenderFn>,
    on_close: Option<crate::wm::window::CloseFn>,
    pty_slot: Option<usize>,
    user_data: usize,
) -> Option<WindowId> {
    let mut wm = WM.lock();
    let wm = wm.as_mut()?;
    let id = wm.create(title, rect);
    if let Some(window) = wm.window_mut(id) {
        window.render = render;
        window.on_close = on_close;
        window.pty = pty_slot;
        window.user_data = user_data;
    }
    Some(id)
}

pub fn close_window(id: WindowId) {
    if let Some(wm) = WM.lock().as_mut() {
        wm.close(id);
    }
}

pub fn focused_window() -> Option<WindowId> {
    WM.lock().as_ref().and_then(|wm| wm.focused())
}

/// One frame's worth of work: drain input, pump terminals, compose,
/// flush.
fn frame() {
    let pairs = {
        let mut wm = WM.lock();
        let wm = match wm.as_mut() {
            Some(wm) => wm,
            None => return,
        };
        while let Some(event) = input::pop_key() {
            wm.route_key(event);
        }
        while let Some(event) = input::pop_pointer() {
            wm.route_pointer(event);
        }
        wm.terminal_pairs()
    };

    for (pty_slot, term) in pairs {
        terminal::pump(term, pty_slot);
    }

    let fb = *FB.lock();
    if let Some((base, width, height)) = fb {
        // SAFETY: the framebuffer region is reserved by the linker and
        // attached to the scanout; the compositor is its only writer.
        let mut surface =
            unsafe { Surface::from_raw(base as *mut u32, width as usize, height as usize, width as usize) };
        if let Some(wm) = WM.lock().as_mut() {
            wm.compose(&mut surface);
        }
        crate::drivers::virtio::gpu::flush();
    }
}

/// The compositor task: ~30 Hz via timed-wait.
pub fn compositor_task(_arg: usize) {
    loop {
        frame();
        clock::sleep_ms(FRAME_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::input::EV_KEY;

    fn key(code: u16, pressed: bool) -> InputEvent {
        InputEvent::new(EV_KEY, code, pressed as i32)
    }

    #[test]
    fn new_windows_take_focus_in_front() {
        let mut wm = Wm::new(800, 600);
        let w1 = wm.create("one", Rect::new(10, 10, 200, 150));
        let w2 = wm.create("two", Rect::new(40, 40, 200, 150));
        assert_eq!(wm.focused(), Some(w2));
        assert_eq!(wm.windows[0].id, w2);
        assert_eq!(wm.windows[1].id, w1);
    }

    #[test]
    fn keys_route_to_focus_and_fall_back_on_close() {
        let mut wm = Wm::new(800, 600);
        let w1 = wm.create("one", Rect::new(10, 10, 200, 150));
        let w2 = wm.create("two", Rect::new(40, 40, 200, 150));

        wm.route_key(key(30, true)); // 'a'
        assert!(wm.window(w2).unwrap().pop_event().is_some());
        assert!(wm.window(w1).unwrap().pop_event().is_none());

        wm.close(w2);
        assert_eq!(wm.focused(), Some(w1));
        wm.route_key(key(30, true));
        assert!(wm.window(w1).unwrap().pop_event().is_some());
    }

    #[test]
    fn close_runs_the_callback() {
        use core::sync::atomic::{AtomicU32, Ordering};
        static CLOSED: AtomicU32 = AtomicU32::new(0);
        fn on_close(w: &Window) {
            CLOSED.store(w.id, Ordering::Relaxed);
        }
        let mut wm = Wm::new(800, 600);
        let id = wm.create("bye", Rect::new(0, 0, 50, 50));
        wm.window_mut(id).unwrap().on_close = Some(on_close);
        wm.close(id);
        assert_eq!(CLOSED.load(Ordering::Relaxed), id);
        assert_eq!(wm.focused(), None);
    }

    #[test]
    fn click_on_title_bar_raises_and_starts_drag() {
        let mut wm = Wm::new(800, 600);
        let w1 = wm.create("one", Rect::new(10, 10, 200, 150));
        let _w2 = wm.create("two", Rect::new(400, 300, 200, 150));
        // Click w1's title bar (w2 is focused/front but elsewhere).
        wm.cursor = (50, 15);
        wm.left_down = true;
        wm.click();
        assert_eq!(wm.focused(), Some(w1));
        assert_eq!(wm.windows[0].id, w1);
        assert!(wm.drag.is_some());

        // Dragging moves the window with the grab offset.
        wm.route_pointer(InputEvent::new(EV_REL, 0, 30));
        let rect = wm.window(w1).unwrap().rect;
        assert_eq!(rect.x, 40);
        assert_eq!(rect.y, 10);

        // Release ends the drag.
        wm.route_pointer(key(BTN_LEFT, false));
        assert!(wm.drag.is_none());
    }

    #[test]
    fn close_button_removes_the_window() {
        let mut wm = Wm::new(800, 600);
        let w1 = wm.create("one", Rect::new(100, 100, 300, 200));
        let close_x = 100 + 300 - 19 + 2;
        wm.cursor = (close_x, 100 + 5);
        wm.click();
        assert!(wm.window(w1).is_none());
        assert_eq!(wm.focused(), None);
    }

    #[test]
    fn minimized_windows_are_skipped_by_hit_testing() {
        let mut wm = Wm::new(800, 600);
        let w1 = wm.create("one", Rect::new(100, 100, 300, 200));
        let w2 = wm.create("two", Rect::new(100, 100, 300, 200));
        wm.window_mut(w2).unwrap().set_state(WindowState::Minimized);
        wm.cursor = (110, 105);
        wm.click();
        // The click lands on w1's title bar, not the minimized w2.
        assert_eq!(wm.focused(), Some(w1));
    }

    #[test]
    fn abs_pointer_scales_to_screen() {
        let mut wm = Wm::new(800, 600);
        wm.route_pointer(InputEvent::new(EV_ABS, 0, ABS_MAX / 2));
        wm.route_pointer(InputEvent::new(EV_ABS, 1, ABS_MAX));
        assert_eq!(wm.cursor.0, 399);
        assert_eq!(wm.cursor.1, 599);
    }

    #[test]
    fn keys_feed_an_attached_pty_through_the_keymap() {
        let mut wm = Wm::new(800, 600);
        let slot = pty::create().expect("pty slot");
        let id = wm.create("term", Rect::new(0, 0, 300, 200));
        wm.window_mut(id).unwrap().pty = Some(slot);

        // Shift held: 'a' press arrives as 'A'.
        wm.route_key(key(keymap::KEY_LEFTSHIFT, true));
        wm.route_key(key(30, true));
        wm.route_key(key(30, false));
        wm.route_key(key(keymap::KEY_LEFTSHIFT, false));
        assert_eq!(pty::pop_in(slot), b'A');
        // Releases do not produce bytes.
        assert_eq!(pty::pop_in(slot), 0);
        pty::close(slot);
    }
}
