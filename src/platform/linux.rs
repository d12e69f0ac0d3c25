// Linux process information from the /proc filesystem

use procfs::process::Process;
use procfs::ProcError;

use crate::error::{AudioError, Result, Target};

/// Get process name from /proc/<pid>/stat
///
/// The kernel truncates `comm` to 15 bytes.
pub fn process_name(pid: u32) -> Result<String> {
    let pid_arg = i32::try_from(pid).map_err(|_| AudioError::InvalidPid(pid))?;
    let stat = Process::new(pid_arg)
        .and_then(|process| process.stat())
        .map_err(|e| match e {
            ProcError::NotFound(_) => AudioError::SessionNotFound(pid),
            ProcError::PermissionDenied(_) => AudioError::PermissionDenied(Target::Session(pid)),
            other => AudioError::backend("procfs", other),
        })?;

    Ok(stat.comm)
}
