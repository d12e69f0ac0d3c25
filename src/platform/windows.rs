// Windows process information

use windows::core::PWSTR;
use windows::Win32::Foundation::{CloseHandle, E_ACCESSDENIED};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_FORMAT,
    PROCESS_QUERY_LIMITED_INFORMATION,
};

use crate::error::{AudioError, Result, Target};

/// Get the image file name (e.g. `firefox.exe`) of process `pid`.
pub fn process_name(pid: u32) -> Result<String> {
    let path = unsafe { image_path(pid) }.map_err(|e| {
        if e.code() == E_ACCESSDENIED {
            AudioError::PermissionDenied(Target::Session(pid))
        } else {
            AudioError::backend("QueryFullProcessImageNameW", e)
        }
    })?;

    Ok(super::executable_name(&path).to_string())
}

unsafe fn image_path(pid: u32) -> windows::core::Result<String> {
    let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid)?;

    let mut buffer = vec![0u16; 1024];
    let mut size = buffer.len() as u32;
    let result = QueryFullProcessImageNameW(
        process,
        PROCESS_NAME_FORMAT(0),
        PWSTR(buffer.as_mut_ptr()),
        &mut size,
    );
    let _ = CloseHandle(process);
    result?;

    Ok(String::from_utf16_lossy(&buffer[..size as usize]))
}
