// Cross-platform audio mixer control
// Master (default output), microphone (default capture) and per-application
// volume and mute, through WASAPI on Windows and PulseAudio on Linux.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod platform;
pub mod session;

pub use audio::{
    AudioSession, Endpoint, NativeSession, Platform, PlatformBackend, SessionVisitor, Volume,
};
pub use config::BackendConfig;
pub use controller::AudioController;
pub use error::{AudioError, ErrorKind, Result, Target};
pub use session::SessionResolver;

/// Platform this library was compiled for. Never fails and touches no
/// native resource.
pub fn get_platform() -> Platform {
    Platform::current()
}
