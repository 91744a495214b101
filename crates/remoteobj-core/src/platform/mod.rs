//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live under this module.
//!
//! - `process` - owner liveness checks used while waiting for a listener

pub mod process;

pub use process::{current_pid, is_process_alive};
