//! Scancode → ASCII translation for pty-backed windows.
//!
//! Input arrives as Linux-style key codes from the virtio keyboard.
//! The map tracks shift and caps-lock; caps only affects letters,
//! shift also selects the symbol row.

/// Key codes this map cares about.
pub const KEY_LEFTSHIFT: u16 = 42;
pub const KEY_RIGHTSHIFT: u16 = 54;
pub const KEY_CAPSLOCK: u16 = 58;
pub const KEY_ENTER: u16 = 28;
pub const KEY_BACKSPACE: u16 = 14;
pub const KEY_TAB: u16 = 15;
pub const KEY_SPACE: u16 = 57;

/// Lowercase map indexed by key code; 0 = no printable mapping.
static PLAIN: [u8; 58] = [
    0, 0x1b, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', // 0..9
    b'9', b'0', b'-', b'=', 0x08, b'\t', b'q', b'w', b'e', b'r', // 10..19
    b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0, // 20..29
    b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', // 30..39
    b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v', b'b', b'n', // 40..49
    b'm', b',', b'.', b'/', 0, b'*', 0, b' ', // 50..57
];

/// Shifted map for the same codes.
static SHIFTED: [u8; 58] = [
    0, 0x1b, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', // 0..9
    b'(', b')', b'_', b'+', 0x08, b'\t', b'Q', b'W', b'E', b'R', // 10..19
    b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n', 0, // 20..29
    b'A', b'S', b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', // 30..39
    b'"', b'~', 0, b'|', b'Z', b'X', b'C', b'V', b'B', b'N', // 40..49
    b'M', b'<', b'>', b'?', 0, b'*', 0, b' ', // 50..57
];

/// Modifier state carried by the compositor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub caps: bool,
}

impl Modifiers {
    /// Track a key event; returns true when the event was a modifier
    /// (and should not be translated further).
    pub fn update(&mut self, code: u16, pressed: bool) -> bool {
        match code {
            KEY_LEFTSHIFT | KEY_RIGHTSHIFT => {
                self.shift = pressed;
                true
            }
            KEY_CAPSLOCK => {
                if pressed {
                    self.caps = !self.caps;
                }
                true
            }
            _ => false,
        }
    }
}

/// Translate a pressed key to ASCII, honoring shift and caps-lock.
pub fn translate(code: u16, mods: Modifiers) -> Option<u8> {
    let idx = code as usize;
    if idx >= PLAIN.len() {
        return None;
    }
    let plain = PLAIN[idx];
    if plain == 0 {
        return None;
    }
    let shifted = SHIFTED[idx];
    let is_letter = plain.is_ascii_lowercase();
    let upper = if is_letter {
        // Caps-lock flips the effect of shift for letters only.
        mods.shift != mods.caps
    } else {
        mods.shift
    };
    Some(if upper { shifted } else { plain })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_letters_and_digits() {
        let mods = Modifiers::default();
        assert_eq!(translate(30, mods), Some(b'a'));
        assert_eq!(translate(2, mods), Some(b'1'));
        assert_eq!(translate(KEY_SPACE, mods), Some(b' '));
        assert_eq!(translate(KEY_ENTER, mods), Some(b'\n'));
    }

    #[test]
    fn shift_selects_uppercase_and_symbols() {
        let mods = Modifiers {
            shift: true,
            caps: false,
        };
        assert_eq!(translate(30, mods), Some(b'A'));
        assert_eq!(translate(2, mods), Some(b'!'));
        assert_eq!(translate(12, mods), Some(b'_'));
    }

    #[test]
    fn caps_lock_only_affects_letters() {
        let mods = Modifiers {
            shift: false,
            caps: true,
        };
        assert_eq!(translate(30, mods), Some(b'A'));
        assert_eq!(translate(2, mods), Some(b'1'));
        // Shift + caps = lowercase letter, shifted symbol.
        let both = Modifiers {
            shift: true,
            caps: true,
        };
        assert_eq!(translate(30, both), Some(b'a'));
        assert_eq!(translate(2, both), Some(b'!'));
    }

    #[test]
    fn modifier_tracking() {
        let mut mods = Modifiers::default();
        assert!(mods.update(KEY_LEFTSHIFT, true));
        assert!(mods.shift);
        assert!(mods.update(KEY_LEFTSHIFT, false));
        assert!(!mods.shift);
        assert!(mods.update(KEY_CAPSLOCK, true));
        assert!(mods.caps);
        // Release does not toggle caps again.
        assert!(mods.update(KEY_CAPSLOCK, false));
        assert!(mods.caps);
        assert!(!mods.update(30, true));
    }

    #[test]
    fn unmapped_codes_translate_to_nothing() {
        let mods = Modifiers::default();
        assert_eq!(translate(0, mods), None);
        assert_eq!(translate(29, mods), None); // ctrl
        assert_eq!(translate(200, mods), None);
    }
}
