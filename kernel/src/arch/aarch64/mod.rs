//! aarch64 exception and context-switch plumbing.

mod context;
mod vectors;

pub use context::{context_switch, init_task_context};
pub use vectors::install_vectors;
