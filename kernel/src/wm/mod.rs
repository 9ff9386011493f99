//! Window system: window list, input routing, keymap, terminal
//! buffers and the compositor task.

pub mod compositor;
pub mod keymap;
pub mod terminal;
pub mod window;
