// Error types shared by every backend

use std::fmt;

use thiserror::Error;

use crate::audio::Endpoint;

/// What an access-denied failure was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Endpoint(Endpoint),
    Session(u32),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Endpoint(endpoint) => write!(f, "default {} device", endpoint),
            Target::Session(pid) => write!(f, "audio session of pid {}", pid),
        }
    }
}

/// Errors returned by the mixer engine.
///
/// Every backend reports failures through these variants so callers see the
/// same shape regardless of platform.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AudioError {
    #[error("volume must be between 0.0 and 1.0, got {0}")]
    InvalidVolume(f64),

    #[error("pid must be a positive integer, got {0}")]
    InvalidPid(u32),

    #[error("no audio session found for pid {0}")]
    SessionNotFound(u32),

    #[error("no {0} device available")]
    DeviceUnavailable(Endpoint),

    #[error("permission denied for {0}")]
    PermissionDenied(Target),

    #[error("platform not supported, only Windows and Linux are supported")]
    PlatformUnsupported,

    #[error("{0} is not supported by this backend")]
    OperationUnsupported(&'static str),

    #[error("{call} failed: {message}")]
    Backend { call: &'static str, message: String },
}

/// Coarse classification handed to host bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    SessionNotFound,
    DeviceUnavailable,
    PermissionDenied,
    PlatformUnsupported,
    OperationUnsupported,
    Backend,
}

impl AudioError {
    pub(crate) fn backend(call: &'static str, message: impl fmt::Display) -> Self {
        AudioError::Backend {
            call,
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AudioError::InvalidVolume(_) | AudioError::InvalidPid(_) => ErrorKind::InvalidArgument,
            AudioError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            AudioError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            AudioError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            AudioError::PlatformUnsupported => ErrorKind::PlatformUnsupported,
            AudioError::OperationUnsupported(_) => ErrorKind::OperationUnsupported,
            AudioError::Backend { .. } => ErrorKind::Backend,
        }
    }

    /// Whether the same call may succeed later without any change on the
    /// caller's side. Only a missing device can come back on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AudioError::DeviceUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_errors_share_a_kind() {
        assert_eq!(AudioError::InvalidVolume(1.5).kind(), ErrorKind::InvalidArgument);
        assert_eq!(AudioError::InvalidPid(0).kind(), ErrorKind::InvalidArgument);
        assert_ne!(
            AudioError::SessionNotFound(42).kind(),
            AudioError::InvalidPid(0).kind()
        );
    }

    #[test]
    fn only_missing_devices_are_retryable() {
        assert!(AudioError::DeviceUnavailable(Endpoint::MasterOutput).is_retryable());
        assert!(!AudioError::SessionNotFound(7).is_retryable());
        assert!(!AudioError::PermissionDenied(Target::Session(7)).is_retryable());
        assert!(!AudioError::PlatformUnsupported.is_retryable());
    }

    #[test]
    fn messages_carry_context() {
        assert_eq!(
            AudioError::InvalidVolume(-0.1).to_string(),
            "volume must be between 0.0 and 1.0, got -0.1"
        );
        assert_eq!(
            AudioError::PermissionDenied(Target::Session(1234)).to_string(),
            "permission denied for audio session of pid 1234"
        );
        assert_eq!(
            AudioError::DeviceUnavailable(Endpoint::DefaultCapture).to_string(),
            "no capture device available"
        );
        assert_eq!(
            AudioError::backend("GetSessionEnumerator", "0x80004005").to_string(),
            "GetSessionEnumerator failed: 0x80004005"
        );
    }
}
