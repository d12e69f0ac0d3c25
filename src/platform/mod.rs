// Platform-specific process information
// Used to name audio sessions when the audio stack doesn't provide a name

#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "windows")]
pub use self::windows::process_name;

#[cfg(target_os = "linux")]
pub use self::linux::process_name;

/// Short executable name of process `pid`.
#[cfg(not(any(target_os = "windows", target_os = "linux")))]
pub fn process_name(pid: u32) -> crate::error::Result<String> {
    let _ = pid;
    Err(crate::error::AudioError::PlatformUnsupported)
}

/// Final component of an executable path, accepting either separator.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub(crate) fn executable_name(path: &str) -> &str {
    path.rsplit(&['\\', '/'][..]).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executable_name_strips_directories() {
        assert_eq!(
            executable_name(r"C:\Program Files\Mozilla Firefox\firefox.exe"),
            "firefox.exe"
        );
        assert_eq!(executable_name("/usr/bin/mpv"), "mpv");
        assert_eq!(executable_name("spotify"), "spotify");
    }

    #[test]
    fn own_process_has_a_name() {
        if cfg!(any(target_os = "windows", target_os = "linux")) {
            let name = process_name(std::process::id()).unwrap();
            assert!(!name.is_empty());
        }
    }
}
