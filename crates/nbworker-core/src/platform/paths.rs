//! Platform-specific directory paths.

use crate::config::PathsConfig;
use crate::error::{Result, WorkerError};
use std::path::PathBuf;

/// Directory shared by every client on this host for the worker's transport
/// file and log.
///
/// # Platform Behavior
/// - **Linux**: `$XDG_RUNTIME_DIR/nbworker/julia`, falling back to the local data dir
/// - **Windows/macOS**: `{local data dir}/nbworker/julia`
///
/// The directory is created if it does not exist.
pub fn default_runtime_dir() -> Result<PathBuf> {
    let base = dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .ok_or_else(|| WorkerError::Config {
            message: "Could not determine a runtime directory".to_string(),
        })?;
    let dir = base
        .join(PathsConfig::APP_DIR_NAME)
        .join(PathsConfig::RUNTIME_SUBDIR);
    std::fs::create_dir_all(&dir).map_err(|e| WorkerError::io_with_path(e, &dir))?;
    Ok(dir)
}

/// Directory holding the bundled runner scripts, installed next to the binary.
pub fn default_resource_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let exe_dir = exe.parent().ok_or_else(|| WorkerError::Config {
        message: format!("Executable path has no parent: {}", exe.display()),
    })?;
    Ok(exe_dir.join("resources").join(PathsConfig::RUNTIME_SUBDIR))
}

/// `JULIA_LOAD_PATH` value that hides the user's global environment from the worker.
///
/// # Platform Behavior
/// - **Windows**: `@;@stdlib`
/// - **Other**: `@:@stdlib`
pub fn load_path_isolation() -> &'static str {
    #[cfg(windows)]
    {
        "@;@stdlib"
    }
    #[cfg(not(windows))]
    {
        "@:@stdlib"
    }
}
