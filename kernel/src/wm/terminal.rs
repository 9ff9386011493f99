// =============================================================================
// Skylark — Terminal Buffers
// =============================================================================
//
// A terminal window owns a character grid fed from its pty's output
// ring. The compositor drains the ring into the grid once per frame
// and the window's render callback draws it. Only the handful of
// control bytes the shell emits are interpreted: newline, carriage
// return, backspace, and the clear-screen escape.
// =============================================================================

use alloc::vec;
use alloc::vec::Vec;

use kdisplay::{font, Color, Rect, Surface};

use crate::sync::SpinLock;
use crate::task::pty;
use crate::wm::window::Window;

/// A fixed character grid with a cursor.
pub struct TermBuffer {
    cols: usize,
    rows: usize,
    cells: Vec<u8>,
    cur_col: usize,
    cur_row: usize,
    /// Inside an escape sequence; bytes are swallowed until it ends.
    esc: bool,
}

impl TermBuffer {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows,
            cells: vec![b' '; cols * rows],
            cur_col: 0,
            cur_row: 0,
            esc: false,
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cell(&self, col: usize, row: usize) -> u8 {
        self.cells[row * self.cols + col]
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cur_col, self.cur_row)
    }

    fn clear(&mut self) {
        self.cells.fill(b' ');
        self.cur_col = 0;
        self.cur_row = 0;
    }

    fn scroll_up(&mut self) {
        self.cells.copy_within(self.cols.., 0);
        let last = self.cells.len() - self.cols;
        self.cells[last..].fill(b' ');
    }

    fn newline(&mut self) {
        self.cur_col = 0;
        if self.cur_row + 1 == self.rows {
            self.scroll_up();
        } else {
            self.cur_row += 1;
        }
    }

    pub fn feed(&mut self, byte: u8) {
        if self.esc {
            // Swallow until the final byte of a CSI sequence; a bare
            // ESC is terminated by any letter.
            if byte.is_ascii_alphabetic() {
                self.esc = false;
                if byte == b'J' {
                    self.clear();
                }
            }
            return;
        }
        match byte {
            0x1b => self.esc = true,
            b'\n' => self.newline(),
            b'\r' => self.cur_col = 0,
            0x08 => {
                if self.cur_col > 0 {
                    self.cur_col -= 1;
                    self.cells[self.cur_row * self.cols + self.cur_col] = b' ';
                }
            }
            b if b.is_ascii_graphic() || b == b' ' => {
                self.cells[self.cur_row * self.cols + self.cur_col] = b;
                self.cur_col += 1;
                if self.cur_col == self.cols {
                    self.newline();
                }
            }
            _ => {}
        }
    }

    pub fn feed_slice(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.feed(b);
        }
    }
}

/// Terminal buffers referenced from windows by index via `user_data`.
static TERMS: SpinLock<Vec<TermBuffer>> = SpinLock::new(Vec::new());

/// Allocate a terminal grid; returns its index for `user_data`.
pub fn alloc(cols: usize, rows: usize) -> usize {
    let mut terms = TERMS.lock();
    terms.push(TermBuffer::new(cols, rows));
    terms.len() - 1
}

/// Drain a pty's output ring into a terminal grid.
pub fn pump(term: usize, pty_slot: usize) {
    let mut terms = TERMS.lock();
    if let Some(buffer) = terms.get_mut(term) {
        while pty::has_out(pty_slot) {
            buffer.feed(pty::pop_out(pty_slot));
        }
    }
}

/// Render callback for terminal windows: `user_data` is the grid index.
pub fn render(surface: &mut Surface, window: &Window) {
    let terms = TERMS.lock();
    let buffer = match terms.get(window.user_data) {
        Some(b) => b,
        None => return,
    };
    let cell_w = font::GLYPH_WIDTH as i32;
    let cell_h = font::GLYPH_HEIGHT as i32;
    surface.fill_rect(
        Rect::new(0, 0, surface.width() as u32, surface.height() as u32),
        Color::BLACK,
    );
    for row in 0..buffer.rows() {
        for col in 0..buffer.cols() {
            let ch = buffer.cell(col, row);
            if ch != b' ' {
                surface.draw_char(
                    col as i32 * cell_w,
                    row as i32 * cell_h,
                    ch as char,
                    Color::LIGHT_GRAY,
                );
            }
        }
    }
    // Block cursor.
    let (cc, cr) = buffer.cursor();
    surface.fill_rect(
        Rect::new(cc as i32 * cell_w, cr as i32 * cell_h, cell_w as u32, cell_h as u32),
        Color::GREEN,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_bytes_advance_the_cursor() {
        let mut t = TermBuffer::new(10, 3);
        t.feed_slice(b"hi");
        assert_eq!(t.cell(0, 0), b'h');
        assert_eq!(t.cell(1, 0), b'i');
        assert_eq!(t.cursor(), (2, 0));
    }

    #[test]
    fn newline_and_carriage_return() {
        let mut t = TermBuffer::new(10, 3);
        t.feed_slice(b"ab\ncd\rC");
        assert_eq!(t.cell(0, 1), b'C');
        assert_eq!(t.cell(1, 1), b'd');
    }

    #[test]
    fn backspace_erases() {
        let mut t = TermBuffer::new(10, 3);
        t.feed_slice(b"ab\x08");
        assert_eq!(t.cell(1, 0), b' ');
        assert_eq!(t.cursor(), (1, 0));
    }

    #[test]
    fn wrapping_and_scrolling() {
        let mut t = TermBuffer::new(4, 2);
        t.feed_slice(b"abcdefgh"); // fills both rows exactly
        // After the second wrap the first row scrolled away.
        assert_eq!(t.cell(0, 0), b'e');
        assert_eq!(t.cursor(), (0, 1));
        t.feed_slice(b"zz");
        assert_eq!(t.cell(0, 1), b'z');
    }

    #[test]
    fn clear_escape_resets_the_grid() {
        let mut t = TermBuffer::new(4, 2);
        t.feed_slice(b"abc");
        t.feed_slice(b"\x1b[2J");
        assert_eq!(t.cell(0, 0), b' ');
        assert_eq!(t.cursor(), (0, 0));
    }
}
