// In-memory mixer used by the unit tests to drive the controller and the
// session resolver without touching the host's audio stack.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use super::{scale, Endpoint, NativeSession, Platform, PlatformBackend, SessionVisitor, Volume};
use crate::error::{AudioError, Result, Target};

#[derive(Debug, Clone)]
struct EndpointState {
    name: String,
    volume: f64,
    muted: bool,
    peak: f64,
    present: bool,
}

#[derive(Debug, Clone)]
struct SessionState {
    pid: u32,
    name: Option<String>,
    volume: f64,
    muted: bool,
    peak: f64,
    // listed, but destroyed before any follow-up call reaches it
    gone: bool,
    denied: bool,
}

#[derive(Debug, Default)]
struct MixerState {
    endpoints: HashMap<Endpoint, EndpointState>,
    sessions: Vec<SessionState>,
    denied_endpoints: HashSet<Endpoint>,
    denied_pids: HashSet<u32>,
    os_calls: usize,
}

pub(crate) struct MemoryBackend {
    state: Mutex<MixerState>,
    quantized: bool,
}

impl MemoryBackend {
    /// Master at 0.8 and capture at 0.6, both unmuted, no sessions.
    pub(crate) fn new() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            Endpoint::MasterOutput,
            EndpointState {
                name: "Built-in Speakers".to_string(),
                volume: 0.8,
                muted: false,
                peak: 0.25,
                present: true,
            },
        );
        endpoints.insert(
            Endpoint::DefaultCapture,
            EndpointState {
                name: "Built-in Microphone".to_string(),
                volume: 0.6,
                muted: false,
                peak: 0.0,
                present: true,
            },
        );

        MemoryBackend {
            state: Mutex::new(MixerState {
                endpoints,
                ..MixerState::default()
            }),
            quantized: false,
        }
    }

    /// Store volumes with PulseAudio's integer resolution.
    pub(crate) fn quantized(mut self) -> Self {
        self.quantized = true;
        self
    }

    pub(crate) fn with_session(self, pid: u32, name: Option<&str>, volume: f64, muted: bool) -> Self {
        self.state.lock().sessions.push(SessionState {
            pid,
            name: name.map(str::to_string),
            volume,
            muted,
            peak: 0.5,
            gone: false,
            denied: false,
        });
        self
    }

    pub(crate) fn remove_endpoint(&self, endpoint: Endpoint) {
        if let Some(state) = self.state.lock().endpoints.get_mut(&endpoint) {
            state.present = false;
        }
    }

    pub(crate) fn restore_endpoint(&self, endpoint: Endpoint) {
        if let Some(state) = self.state.lock().endpoints.get_mut(&endpoint) {
            state.present = true;
        }
    }

    pub(crate) fn deny_endpoint(&self, endpoint: Endpoint) {
        self.state.lock().denied_endpoints.insert(endpoint);
    }

    pub(crate) fn deny_session(&self, pid: u32) {
        self.state.lock().denied_pids.insert(pid);
    }

    /// Denies writes to the `nth` session of `pid` only.
    pub(crate) fn deny_nth_session(&self, pid: u32, nth: usize) {
        if let Some(session) = self.state.lock().sessions.iter_mut().filter(|s| s.pid == pid).nth(nth) {
            session.denied = true;
        }
    }

    pub(crate) fn vanish_nth_session(&self, pid: u32, nth: usize) {
        if let Some(session) = self.state.lock().sessions.iter_mut().filter(|s| s.pid == pid).nth(nth) {
            session.gone = true;
        }
    }

    /// Marks every session of `pid` as destroyed while still being listed.
    pub(crate) fn vanish_sessions(&self, pid: u32) {
        for session in self.state.lock().sessions.iter_mut().filter(|s| s.pid == pid) {
            session.gone = true;
        }
    }

    /// Simulates another program (e.g. the desktop mixer) changing a value.
    pub(crate) fn external_mute(&self, endpoint: Endpoint, muted: bool) {
        if let Some(state) = self.state.lock().endpoints.get_mut(&endpoint) {
            state.muted = muted;
        }
    }

    pub(crate) fn session_volumes(&self, pid: u32) -> Vec<f64> {
        self.state
            .lock()
            .sessions
            .iter()
            .filter(|s| s.pid == pid)
            .map(|s| s.volume)
            .collect()
    }

    pub(crate) fn session_mutes(&self, pid: u32) -> Vec<bool> {
        self.state
            .lock()
            .sessions
            .iter()
            .filter(|s| s.pid == pid)
            .map(|s| s.muted)
            .collect()
    }

    pub(crate) fn os_calls(&self) -> usize {
        self.state.lock().os_calls
    }

    fn store(&self, level: Volume) -> f64 {
        if self.quantized {
            scale::quantize(level).get()
        } else {
            level.get()
        }
    }

    fn with_endpoint<T>(
        &self,
        endpoint: Endpoint,
        write: bool,
        f: impl FnOnce(&mut EndpointState) -> T,
    ) -> Result<T> {
        let mut state = self.state.lock();
        state.os_calls += 1;
        if write && state.denied_endpoints.contains(&endpoint) {
            return Err(AudioError::PermissionDenied(Target::Endpoint(endpoint)));
        }
        match state.endpoints.get_mut(&endpoint) {
            Some(device) if device.present => Ok(f(device)),
            _ => Err(AudioError::DeviceUnavailable(endpoint)),
        }
    }
}

impl PlatformBackend for MemoryBackend {
    fn platform(&self) -> Platform {
        Platform::current()
    }

    fn endpoint_volume(&self, endpoint: Endpoint) -> Result<Volume> {
        self.with_endpoint(endpoint, false, |device| Volume::clamped(device.volume))
    }

    fn set_endpoint_volume(&self, endpoint: Endpoint, level: Volume) -> Result<Volume> {
        let stored = self.store(level);
        self.with_endpoint(endpoint, true, |device| {
            device.volume = stored;
            Volume::clamped(device.volume)
        })
    }

    fn endpoint_muted(&self, endpoint: Endpoint) -> Result<bool> {
        self.with_endpoint(endpoint, false, |device| device.muted)
    }

    fn set_endpoint_mute(&self, endpoint: Endpoint, muted: bool) -> Result<()> {
        self.with_endpoint(endpoint, true, |device| device.muted = muted)
    }

    fn endpoint_name(&self, endpoint: Endpoint) -> Result<String> {
        self.with_endpoint(endpoint, false, |device| device.name.clone())
    }

    fn endpoint_peak(&self, endpoint: Endpoint) -> Result<f64> {
        self.with_endpoint(endpoint, false, |device| device.peak)
    }

    fn for_each_session(&self, visit: &mut SessionVisitor<'_>) -> Result<()> {
        let mut state = self.state.lock();
        state.os_calls += 1;
        if state.endpoints.get(&Endpoint::MasterOutput).map_or(true, |d| !d.present) {
            return Err(AudioError::DeviceUnavailable(Endpoint::MasterOutput));
        }

        let MixerState {
            sessions,
            denied_pids,
            ..
        } = &mut *state;
        for session in sessions.iter_mut() {
            let denied = session.denied || denied_pids.contains(&session.pid);
            let mut handle = MemorySession {
                state: session,
                denied,
                quantized: self.quantized,
            };
            if visit(&mut handle)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

struct MemorySession<'s> {
    state: &'s mut SessionState,
    denied: bool,
    quantized: bool,
}

impl MemorySession<'_> {
    fn live(&self) -> Result<()> {
        if self.state.gone {
            Err(AudioError::SessionNotFound(self.state.pid))
        } else {
            Ok(())
        }
    }

    fn writable(&self) -> Result<()> {
        self.live()?;
        if self.denied {
            Err(AudioError::PermissionDenied(Target::Session(self.state.pid)))
        } else {
            Ok(())
        }
    }
}

impl NativeSession for MemorySession<'_> {
    fn pid(&self) -> u32 {
        self.state.pid
    }

    fn name(&self) -> Option<String> {
        self.state.name.clone()
    }

    fn volume(&self) -> Result<Volume> {
        self.live()?;
        Ok(Volume::clamped(self.state.volume))
    }

    fn set_volume(&mut self, level: Volume) -> Result<Volume> {
        self.writable()?;
        self.state.volume = if self.quantized {
            scale::quantize(level).get()
        } else {
            level.get()
        };
        Ok(Volume::clamped(self.state.volume))
    }

    fn muted(&self) -> Result<bool> {
        self.live()?;
        Ok(self.state.muted)
    }

    fn set_mute(&mut self, muted: bool) -> Result<()> {
        self.writable()?;
        self.state.muted = muted;
        Ok(())
    }

    fn peak(&self) -> Result<f64> {
        self.live()?;
        Ok(self.state.peak)
    }
}

