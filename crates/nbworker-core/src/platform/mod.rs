//! Platform abstraction layer for cross-platform compatibility.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here rather than being
//! scattered through the launcher and admin code.
//!
//! - `paths` - runtime and resource directories, load path isolation
//! - `process` - liveness checks and termination by PID

pub mod paths;
pub mod process;

pub use paths::{default_resource_dir, default_runtime_dir, load_path_isolation};
pub use process::{is_process_alive, send_terminate};
