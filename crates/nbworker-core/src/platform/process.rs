//! Platform-specific process management.

use crate::error::{Result, WorkerError};
use tracing::debug;

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: `kill(pid, 0)`; `EPERM` still means the process exists
/// - **Windows**: `OpenProcess` with `PROCESS_QUERY_LIMITED_INFORMATION`
///
/// PID 0 never names a worker and is reported as not alive.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None::<Signal>) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(windows)]
    {
        is_process_alive_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        true
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn is_process_alive_windows(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    // SAFETY: OpenProcess has no preconditions; a non-null handle is closed
    // exactly once before returning.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if !handle.is_null() {
            CloseHandle(handle);
            true
        } else {
            false
        }
    }
}

/// Ask a process to terminate.
///
/// # Platform Behavior
/// - **Linux/macOS**: sends `SIGTERM` so the worker can clean up its transport file
/// - **Windows**: `taskkill /PID {pid}` without `/F`
///
/// PID 0 is rejected; on Unix it would signal the caller's own process group.
pub fn send_terminate(pid: u32) -> Result<()> {
    if pid == 0 {
        return Err(WorkerError::Internal("Refusing to signal PID 0".into()));
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| WorkerError::Internal(format!("Invalid PID {}", pid)))?;
        debug!("Sending SIGTERM to process {}", pid);
        kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|e| {
            WorkerError::Internal(format!("Failed to send SIGTERM to {}: {}", pid, e))
        })
    }

    #[cfg(windows)]
    {
        use std::process::Command;

        debug!("Terminating process {} with taskkill", pid);
        let output = Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .output()
            .map_err(|e| WorkerError::Internal(format!("Failed to run taskkill: {}", e)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(WorkerError::Internal(format!(
                "taskkill failed for {}: {}",
                pid,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(WorkerError::Internal(format!(
            "Process termination not implemented for this platform (pid {})",
            pid
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_self() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(4_000_000_000));
    }

    #[test]
    fn test_pid_zero_is_never_alive() {
        assert!(!is_process_alive(0));
    }

    #[test]
    fn test_send_terminate_rejects_pid_zero() {
        assert!(send_terminate(0).is_err());
    }

    #[test]
    fn test_send_terminate_nonexistent_fails() {
        assert!(send_terminate(4_000_000_000).is_err());
    }
}
