// Platform-specific audio backends
// Each platform implements the PlatformBackend trait to provide mixer control

pub mod scale;

// Platform-specific modules
#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(test)]
pub(crate) mod memory;

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, Result};

// Shared data structures (platform-agnostic)

/// Linear gain in `[0.0, 1.0]`, i.e. the position of a volume slider.
///
/// A `Volume` can only be built through [`Volume::new`], which rejects
/// out-of-range values, or [`Volume::clamped`], which is meant for readings
/// coming back from the OS.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Volume(f64);

impl Volume {
    pub const SILENT: Volume = Volume(0.0);
    pub const FULL: Volume = Volume(1.0);

    pub fn new(level: f64) -> Result<Self> {
        // NaN fails the range check as well
        if (0.0..=1.0).contains(&level) {
            Ok(Volume(level))
        } else {
            Err(AudioError::InvalidVolume(level))
        }
    }

    pub fn clamped(level: f64) -> Self {
        if level.is_nan() {
            Volume::SILENT
        } else {
            Volume(level.clamp(0.0, 1.0))
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl From<Volume> for f64 {
    fn from(volume: Volume) -> f64 {
        volume.0
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Device-level mixer target. Always the current default device; the
/// backend looks it up again on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    MasterOutput,
    DefaultCapture,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::MasterOutput => f.write_str("output"),
            Endpoint::DefaultCapture => f.write_str("capture"),
        }
    }
}

/// Operating system family the engine was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Unsupported,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unsupported
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one application audio stream.
///
/// Only valid for the call that produced it: the OS may destroy the
/// underlying session at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSession {
    pub pid: u32,
    pub name: String,
    pub volume: f64,
    pub muted: bool,
}

/// Live handle to a native per-application session.
///
/// Handles are only lent out inside [`PlatformBackend::for_each_session`]
/// and never outlive that call.
pub trait NativeSession {
    fn pid(&self) -> u32;

    /// Human-readable name, `None` when nothing could be resolved.
    fn name(&self) -> Option<String>;

    fn volume(&self) -> Result<Volume>;

    /// Applies `level` and returns the value the OS reports afterwards.
    fn set_volume(&mut self, level: Volume) -> Result<Volume>;

    fn muted(&self) -> Result<bool>;

    fn set_mute(&mut self, muted: bool) -> Result<()>;

    /// Current peak amplitude of the stream.
    fn peak(&self) -> Result<f64> {
        Err(AudioError::OperationUnsupported("session peak metering"))
    }
}

/// Callback driven by [`PlatformBackend::for_each_session`]. Returning
/// `ControlFlow::Break` stops the enumeration early.
pub type SessionVisitor<'v> = dyn FnMut(&mut dyn NativeSession) -> Result<ControlFlow<()>> + 'v;

// Platform audio backend trait
// All platforms must implement these functions
pub trait PlatformBackend: Send + Sync {
    fn platform(&self) -> Platform;

    /// Volume of the current default device for `endpoint`.
    fn endpoint_volume(&self, endpoint: Endpoint) -> Result<Volume>;

    /// Sets the default device volume and returns the level read back
    /// after the write.
    fn set_endpoint_volume(&self, endpoint: Endpoint, level: Volume) -> Result<Volume>;

    fn endpoint_muted(&self, endpoint: Endpoint) -> Result<bool>;

    fn set_endpoint_mute(&self, endpoint: Endpoint, muted: bool) -> Result<()>;

    /// Human-readable name of the current default device.
    fn endpoint_name(&self, endpoint: Endpoint) -> Result<String>;

    /// Current peak amplitude on the default device.
    fn endpoint_peak(&self, endpoint: Endpoint) -> Result<f64> {
        let _ = endpoint;
        Err(AudioError::OperationUnsupported("peak metering"))
    }

    /// Enumerates the live per-application sessions of the default output
    /// device in backend order, handing each to `visit`.
    fn for_each_session(&self, visit: &mut SessionVisitor<'_>) -> Result<()>;

    fn get_master_volume(&self) -> Result<Volume> {
        self.endpoint_volume(Endpoint::MasterOutput)
    }

    fn set_master_volume(&self, level: Volume) -> Result<Volume> {
        self.set_endpoint_volume(Endpoint::MasterOutput, level)
    }

    fn is_master_muted(&self) -> Result<bool> {
        self.endpoint_muted(Endpoint::MasterOutput)
    }

    fn set_master_mute(&self, muted: bool) -> Result<()> {
        self.set_endpoint_mute(Endpoint::MasterOutput, muted)
    }

    fn get_capture_volume(&self) -> Result<Volume> {
        self.endpoint_volume(Endpoint::DefaultCapture)
    }

    fn set_capture_volume(&self, level: Volume) -> Result<Volume> {
        self.set_endpoint_volume(Endpoint::DefaultCapture, level)
    }

    fn is_capture_muted(&self) -> Result<bool> {
        self.endpoint_muted(Endpoint::DefaultCapture)
    }

    fn set_capture_mute(&self, muted: bool) -> Result<()> {
        self.set_endpoint_mute(Endpoint::DefaultCapture, muted)
    }
}

// Lets a host keep its own handle to a backend it hands to the controller.
impl<B: PlatformBackend + ?Sized> PlatformBackend for Arc<B> {
    fn platform(&self) -> Platform {
        (**self).platform()
    }

    fn endpoint_volume(&self, endpoint: Endpoint) -> Result<Volume> {
        (**self).endpoint_volume(endpoint)
    }

    fn set_endpoint_volume(&self, endpoint: Endpoint, level: Volume) -> Result<Volume> {
        (**self).set_endpoint_volume(endpoint, level)
    }

    fn endpoint_muted(&self, endpoint: Endpoint) -> Result<bool> {
        (**self).endpoint_muted(endpoint)
    }

    fn set_endpoint_mute(&self, endpoint: Endpoint, muted: bool) -> Result<()> {
        (**self).set_endpoint_mute(endpoint, muted)
    }

    fn endpoint_name(&self, endpoint: Endpoint) -> Result<String> {
        (**self).endpoint_name(endpoint)
    }

    fn endpoint_peak(&self, endpoint: Endpoint) -> Result<f64> {
        (**self).endpoint_peak(endpoint)
    }

    fn for_each_session(&self, visit: &mut SessionVisitor<'_>) -> Result<()> {
        (**self).for_each_session(visit)
    }
}
