// Audio controller: single entry point used by host bindings
// Picks the backend for the running OS on first use and validates arguments
// before anything reaches the OS. Toggles are read-then-write and not atomic
// against other callers or the user's own mixer.

use std::sync::OnceLock;

use log::{debug, info, warn};

use crate::audio::{AudioSession, Endpoint, Platform, PlatformBackend, Volume};
use crate::config::BackendConfig;
use crate::error::{AudioError, Result};
use crate::session::SessionResolver;

pub struct AudioController {
    platform: Platform,
    config: BackendConfig,
    backend: OnceLock<Option<Box<dyn PlatformBackend>>>,
}

impl Default for AudioController {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioController {
    /// Controller for the running OS, configured from the environment.
    /// No native resource is touched until the first call.
    pub fn new() -> Self {
        Self::with_config(BackendConfig::from_env())
    }

    pub fn with_config(config: BackendConfig) -> Self {
        AudioController {
            platform: Platform::current(),
            config,
            backend: OnceLock::new(),
        }
    }

    /// Controller driving an already constructed backend.
    pub fn with_backend(backend: Box<dyn PlatformBackend>) -> Self {
        AudioController {
            platform: backend.platform(),
            config: BackendConfig::default(),
            backend: OnceLock::from(Some(backend)),
        }
    }

    /// Releases the backend and every native handle it holds.
    pub fn shutdown(self) {
        if let Some(Some(backend)) = self.backend.into_inner() {
            debug!("releasing {} audio backend", backend.platform());
            drop(backend);
        }
    }

    pub fn get_platform(&self) -> Platform {
        self.platform
    }

    fn backend(&self) -> Result<&dyn PlatformBackend> {
        self.backend
            .get_or_init(|| select_backend(self.platform, &self.config))
            .as_deref()
            .ok_or(AudioError::PlatformUnsupported)
    }

    fn sessions(&self) -> Result<SessionResolver<'_>> {
        self.backend().map(SessionResolver::new)
    }

    // Master output

    pub fn get_master_volume(&self) -> Result<f64> {
        self.volume(Endpoint::MasterOutput)
    }

    /// Sets the master volume and returns the level the OS applied.
    pub fn set_master_volume(&self, level: f64) -> Result<f64> {
        self.set_volume(Endpoint::MasterOutput, level)
    }

    pub fn is_master_muted(&self) -> Result<bool> {
        self.muted(Endpoint::MasterOutput)
    }

    pub fn set_master_mute(&self, muted: bool) -> Result<()> {
        self.set_mute(Endpoint::MasterOutput, muted)
    }

    /// Flips the master mute state and returns the new state. Best-effort,
    /// see the module docs.
    pub fn toggle_master_mute(&self) -> Result<bool> {
        self.toggle_mute(Endpoint::MasterOutput)
    }

    pub fn get_master_device_name(&self) -> Result<String> {
        self.backend()?.endpoint_name(Endpoint::MasterOutput)
    }

    /// Current output peak in `[0.0, 1.0]`.
    pub fn get_master_audio_level(&self) -> Result<f64> {
        self.backend()?.endpoint_peak(Endpoint::MasterOutput)
    }

    // Default capture device

    pub fn get_microphone_volume(&self) -> Result<f64> {
        self.volume(Endpoint::DefaultCapture)
    }

    pub fn set_microphone_volume(&self, level: f64) -> Result<f64> {
        self.set_volume(Endpoint::DefaultCapture, level)
    }

    pub fn is_microphone_muted(&self) -> Result<bool> {
        self.muted(Endpoint::DefaultCapture)
    }

    pub fn set_microphone_mute(&self, muted: bool) -> Result<()> {
        self.set_mute(Endpoint::DefaultCapture, muted)
    }

    pub fn toggle_microphone_mute(&self) -> Result<bool> {
        self.toggle_mute(Endpoint::DefaultCapture)
    }

    pub fn get_microphone_device_name(&self) -> Result<String> {
        self.backend()?.endpoint_name(Endpoint::DefaultCapture)
    }

    pub fn get_microphone_audio_level(&self) -> Result<f64> {
        self.backend()?.endpoint_peak(Endpoint::DefaultCapture)
    }

    // Applications

    /// Every session currently producing audio on the default output.
    pub fn get_active_audio_apps(&self) -> Result<Vec<AudioSession>> {
        self.sessions()?.list_sessions()
    }

    pub fn find_app(&self, pid: u32) -> Result<AudioSession> {
        let resolver = self.sessions()?;
        resolver.find_session(validate_pid(pid)?)
    }

    /// Volume of the first session owned by `pid`. Processes with several
    /// streams are not averaged.
    pub fn get_app_volume(&self, pid: u32) -> Result<f64> {
        let resolver = self.sessions()?;
        resolver.session_volume(validate_pid(pid)?).map(Volume::get)
    }

    /// Sets the volume of every session owned by `pid` and returns the
    /// level applied to the first one.
    pub fn set_app_volume(&self, pid: u32, level: f64) -> Result<f64> {
        let resolver = self.sessions()?;
        let pid = validate_pid(pid)?;
        let level = Volume::new(level)?;
        resolver.set_session_volume(pid, level).map(Volume::get)
    }

    pub fn is_app_muted(&self, pid: u32) -> Result<bool> {
        let resolver = self.sessions()?;
        resolver.session_muted(validate_pid(pid)?)
    }

    pub fn set_app_mute(&self, pid: u32, muted: bool) -> Result<()> {
        let resolver = self.sessions()?;
        resolver.set_session_mute(validate_pid(pid)?, muted)
    }

    pub fn get_app_audio_level(&self, pid: u32) -> Result<f64> {
        let resolver = self.sessions()?;
        resolver.session_peak(validate_pid(pid)?)
    }

    fn volume(&self, endpoint: Endpoint) -> Result<f64> {
        self.backend()?.endpoint_volume(endpoint).map(Volume::get)
    }

    fn set_volume(&self, endpoint: Endpoint, level: f64) -> Result<f64> {
        let backend = self.backend()?;
        let level = Volume::new(level)?;
        let applied = backend.set_endpoint_volume(endpoint, level)?;
        debug!("{} volume set to {} (requested {})", endpoint, applied, level);
        Ok(applied.get())
    }

    fn muted(&self, endpoint: Endpoint) -> Result<bool> {
        self.backend()?.endpoint_muted(endpoint)
    }

    fn set_mute(&self, endpoint: Endpoint, muted: bool) -> Result<()> {
        self.backend()?.set_endpoint_mute(endpoint, muted)
    }

    fn toggle_mute(&self, endpoint: Endpoint) -> Result<bool> {
        let backend = self.backend()?;
        let muted = !backend.endpoint_muted(endpoint)?;
        backend.set_endpoint_mute(endpoint, muted)?;
        debug!("{} mute toggled to {}", endpoint, muted);
        Ok(muted)
    }
}

fn validate_pid(pid: u32) -> Result<u32> {
    if pid == 0 {
        Err(AudioError::InvalidPid(pid))
    } else {
        Ok(pid)
    }
}

#[cfg_attr(
    not(any(target_os = "windows", target_os = "linux")),
    allow(unused_variables)
)]
fn select_backend(platform: Platform, config: &BackendConfig) -> Option<Box<dyn PlatformBackend>> {
    match platform {
        #[cfg(target_os = "windows")]
        Platform::Windows => {
            info!("using WASAPI audio backend");
            Some(Box::new(crate::audio::windows::WindowsBackend::new(config.clone())))
        }
        #[cfg(target_os = "linux")]
        Platform::Linux => {
            info!("using PulseAudio backend as client {:?}", config.client_name);
            Some(Box::new(crate::audio::linux::LinuxBackend::new(config.clone())))
        }
        _ => {
            warn!("no audio backend available for platform {}", platform);
            None
        }
    }
}
