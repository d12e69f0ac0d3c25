// Windows audio backend using WASAPI
// Master maps to the default render endpoint, capture to the default capture
// endpoint and application sessions to the render endpoint's audio sessions.

use std::ffi::c_void;

use log::{debug, trace};
use windows::core::{Interface, GUID, HRESULT};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::{BOOL, RPC_E_CHANGED_MODE};
use windows::Win32::Media::Audio::Endpoints::{IAudioEndpointVolume, IAudioMeterInformation};
use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, EDataFlow, IAudioSessionControl2, IAudioSessionManager2,
    IMMDevice, IMMDeviceEnumerator, ISimpleAudioVolume, MMDeviceEnumerator,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED, STGM_READ,
};

use super::{Endpoint, NativeSession, Platform, PlatformBackend, SessionVisitor, Volume};
use crate::config::BackendConfig;
use crate::error::{AudioError, Result, Target};
use crate::platform;

const E_ACCESSDENIED: u32 = 0x8007_0005;
const E_NOTFOUND: u32 = 0x8007_0490;
const AUDCLNT_E_DEVICE_INVALIDATED: u32 = 0x8889_0004;

/// WASAPI implementation of [`PlatformBackend`].
///
/// COM objects are apartment-bound, so nothing is cached between calls:
/// every operation initializes COM on the calling thread, resolves the
/// current default endpoint and releases everything before returning.
pub struct WindowsBackend {
    _private: (),
}

impl WindowsBackend {
    pub fn new(config: BackendConfig) -> Self {
        debug!("WASAPI backend for client {:?}", config.client_name);
        WindowsBackend { _private: () }
    }
}

impl PlatformBackend for WindowsBackend {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn endpoint_volume(&self, endpoint: Endpoint) -> Result<Volume> {
        with_endpoint_volume(endpoint, "IAudioEndpointVolume::GetMasterVolumeLevelScalar", |v| unsafe {
            v.GetMasterVolumeLevelScalar()
        })
        .map(|level| Volume::clamped(f64::from(level)))
    }

    fn set_endpoint_volume(&self, endpoint: Endpoint, level: Volume) -> Result<Volume> {
        with_endpoint_volume(endpoint, "IAudioEndpointVolume::SetMasterVolumeLevelScalar", |v| unsafe {
            v.SetMasterVolumeLevelScalar(level.get() as f32, std::ptr::null::<GUID>())?;
            v.GetMasterVolumeLevelScalar()
        })
        .map(|level| Volume::clamped(f64::from(level)))
    }

    fn endpoint_muted(&self, endpoint: Endpoint) -> Result<bool> {
        with_endpoint_volume(endpoint, "IAudioEndpointVolume::GetMute", |v| unsafe { v.GetMute() })
            .map(|muted| muted.as_bool())
    }

    fn set_endpoint_mute(&self, endpoint: Endpoint, muted: bool) -> Result<()> {
        with_endpoint_volume(endpoint, "IAudioEndpointVolume::SetMute", |v| unsafe {
            v.SetMute(BOOL::from(muted), std::ptr::null::<GUID>())
        })
    }

    fn endpoint_name(&self, endpoint: Endpoint) -> Result<String> {
        let _com = ComGuard::new()?;
        let device = default_device(endpoint)?;
        let target = Target::Endpoint(endpoint);

        let name = unsafe {
            let store = device
                .OpenPropertyStore(STGM_READ)
                .map_err(|e| classify(e, "IMMDevice::OpenPropertyStore", target))?;
            store
                .GetValue(&PKEY_Device_FriendlyName)
                .map_err(|e| classify(e, "IPropertyStore::GetValue", target))?
        };
        Ok(name.to_string())
    }

    fn endpoint_peak(&self, endpoint: Endpoint) -> Result<f64> {
        let _com = ComGuard::new()?;
        let device = default_device(endpoint)?;
        let target = Target::Endpoint(endpoint);

        let peak = unsafe {
            let meter: IAudioMeterInformation = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| classify(e, "IMMDevice::Activate", target))?;
            meter
                .GetPeakValue()
                .map_err(|e| classify(e, "IAudioMeterInformation::GetPeakValue", target))?
        };
        Ok(Volume::clamped(f64::from(peak)).get())
    }

    fn for_each_session(&self, visit: &mut SessionVisitor<'_>) -> Result<()> {
        let _com = ComGuard::new()?;
        let device = default_device(Endpoint::MasterOutput)?;
        let target = Target::Endpoint(Endpoint::MasterOutput);

        let sessions = unsafe {
            let manager: IAudioSessionManager2 = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| classify(e, "IMMDevice::Activate", target))?;
            manager
                .GetSessionEnumerator()
                .map_err(|e| classify(e, "IAudioSessionManager2::GetSessionEnumerator", target))?
        };
        let count = unsafe { sessions.GetCount() }
            .map_err(|e| classify(e, "IAudioSessionEnumerator::GetCount", target))?;
        trace!("{} WASAPI session(s) on the default render endpoint", count);

        for index in 0..count {
            // sessions expiring between GetCount and GetSession are skipped
            let Ok(control) = (unsafe { sessions.GetSession(index) }) else {
                debug!("WASAPI session #{} expired before it could be opened", index);
                continue;
            };
            let Some(mut session) = WasapiSession::from_control(control) else {
                continue;
            };
            if visit(&mut session)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// Keeps COM initialized on the current thread for the lifetime of the guard.
struct ComGuard {
    uninitialize: bool,
}

impl ComGuard {
    fn new() -> Result<Self> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            // the host already runs this thread in a single-threaded
            // apartment, which WASAPI accepts; that init isn't ours to undo
            return Ok(ComGuard {
                uninitialize: false,
            });
        }
        hr.ok()
            .map_err(|e| AudioError::backend("CoInitializeEx", e))?;
        Ok(ComGuard { uninitialize: true })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.uninitialize {
            unsafe { CoUninitialize() };
        }
    }
}

fn data_flow(endpoint: Endpoint) -> EDataFlow {
    match endpoint {
        Endpoint::MasterOutput => eRender,
        Endpoint::DefaultCapture => eCapture,
    }
}

// Must be called while a ComGuard is alive.
fn default_device(endpoint: Endpoint) -> Result<IMMDevice> {
    let target = Target::Endpoint(endpoint);
    unsafe {
        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
            .map_err(|e| classify(e, "CoCreateInstance(MMDeviceEnumerator)", target))?;
        enumerator
            .GetDefaultAudioEndpoint(data_flow(endpoint), eConsole)
            .map_err(|e| classify(e, "IMMDeviceEnumerator::GetDefaultAudioEndpoint", target))
    }
}

fn with_endpoint_volume<T>(
    endpoint: Endpoint,
    call: &'static str,
    f: impl FnOnce(&IAudioEndpointVolume) -> windows::core::Result<T>,
) -> Result<T> {
    let _com = ComGuard::new()?;
    let device = default_device(endpoint)?;
    let target = Target::Endpoint(endpoint);

    let volume: IAudioEndpointVolume = unsafe { device.Activate(CLSCTX_ALL, None) }
        .map_err(|e| classify(e, "IMMDevice::Activate", target))?;
    f(&volume).map_err(|e| classify(e, call, target))
}

struct WasapiSession {
    pid: u32,
    control: IAudioSessionControl2,
    volume: ISimpleAudioVolume,
}

impl WasapiSession {
    /// `None` for the system sounds session and anything not owned by a
    /// single process.
    fn from_control(control: windows::Win32::Media::Audio::IAudioSessionControl) -> Option<Self> {
        let control: IAudioSessionControl2 = control.cast().ok()?;
        let pid = unsafe { control.GetProcessId() }.ok().filter(|pid| *pid != 0)?;
        let volume: ISimpleAudioVolume = control.cast().ok()?;
        Some(WasapiSession {
            pid,
            control,
            volume,
        })
    }

    fn target(&self) -> Target {
        Target::Session(self.pid)
    }

    fn display_name(&self) -> Option<String> {
        unsafe {
            let raw = self.control.GetDisplayName().ok()?;
            if raw.is_null() {
                return None;
            }
            let name = raw.to_string().ok();
            CoTaskMemFree(Some(raw.0 as *const c_void));
            // "@%SystemRoot%\..." style names are resource references
            name.filter(|n| !n.trim().is_empty() && !n.starts_with('@'))
        }
    }
}

impl NativeSession for WasapiSession {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn name(&self) -> Option<String> {
        self.display_name()
            .or_else(|| platform::process_name(self.pid).ok())
    }

    fn volume(&self) -> Result<Volume> {
        let level = unsafe { self.volume.GetMasterVolume() }
            .map_err(|e| classify(e, "ISimpleAudioVolume::GetMasterVolume", self.target()))?;
        Ok(Volume::clamped(f64::from(level)))
    }

    fn set_volume(&mut self, level: Volume) -> Result<Volume> {
        unsafe {
            self.volume
                .SetMasterVolume(level.get() as f32, std::ptr::null::<GUID>())
        }
        .map_err(|e| classify(e, "ISimpleAudioVolume::SetMasterVolume", self.target()))?;
        self.volume()
    }

    fn muted(&self) -> Result<bool> {
        let muted = unsafe { self.volume.GetMute() }
            .map_err(|e| classify(e, "ISimpleAudioVolume::GetMute", self.target()))?;
        Ok(muted.as_bool())
    }

    fn set_mute(&mut self, muted: bool) -> Result<()> {
        unsafe { self.volume.SetMute(BOOL::from(muted), std::ptr::null::<GUID>()) }
            .map_err(|e| classify(e, "ISimpleAudioVolume::SetMute", self.target()))
    }

    fn peak(&self) -> Result<f64> {
        let meter: IAudioMeterInformation = self
            .control
            .cast()
            .map_err(|e| classify(e, "IAudioSessionControl2::QueryInterface", self.target()))?;
        let peak = unsafe { meter.GetPeakValue() }
            .map_err(|e| classify(e, "IAudioMeterInformation::GetPeakValue", self.target()))?;
        Ok(Volume::clamped(f64::from(peak)).get())
    }
}

fn classify(err: windows::core::Error, call: &'static str, target: Target) -> AudioError {
    classify_hresult(err.code(), call, target).unwrap_or_else(|| AudioError::backend(call, err))
}

/// Maps the HRESULTs with a dedicated error kind; `None` for anything else.
fn classify_hresult(code: HRESULT, call: &'static str, target: Target) -> Option<AudioError> {
    let error = match code.0 as u32 {
        E_ACCESSDENIED => AudioError::PermissionDenied(target),
        E_NOTFOUND | AUDCLNT_E_DEVICE_INVALIDATED => match target {
            Target::Endpoint(endpoint) => AudioError::DeviceUnavailable(endpoint),
            Target::Session(pid) => AudioError::SessionNotFound(pid),
        },
        _ => return None,
    };
    debug!("{} returned {:#010x}: {}", call, code.0 as u32, error);
    Some(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_maps_to_permission_denied() {
        let err = classify_hresult(HRESULT(E_ACCESSDENIED as i32), "SetMute", Target::Session(9));
        assert_eq!(err, Some(AudioError::PermissionDenied(Target::Session(9))));
    }

    #[test]
    fn invalidated_device_depends_on_target() {
        let code = HRESULT(AUDCLNT_E_DEVICE_INVALIDATED as i32);
        assert_eq!(
            classify_hresult(code, "GetMute", Target::Endpoint(Endpoint::DefaultCapture)),
            Some(AudioError::DeviceUnavailable(Endpoint::DefaultCapture))
        );
        assert_eq!(
            classify_hresult(code, "GetMute", Target::Session(9)),
            Some(AudioError::SessionNotFound(9))
        );
        assert_eq!(
            classify_hresult(HRESULT(E_NOTFOUND as i32), "GetDefaultAudioEndpoint", Target::Endpoint(Endpoint::MasterOutput)),
            Some(AudioError::DeviceUnavailable(Endpoint::MasterOutput))
        );
    }

    #[test]
    fn unknown_hresults_are_left_to_the_caller() {
        assert_eq!(classify_hresult(HRESULT(0x8000_4005_u32 as i32), "Activate", Target::Session(1)), None);
    }

    #[test]
    fn data_flow_follows_endpoint() {
        assert_eq!(data_flow(Endpoint::MasterOutput), eRender);
        assert_eq!(data_flow(Endpoint::DefaultCapture), eCapture);
    }

    #[test]
    fn com_guard_nests() {
        let outer = ComGuard::new().unwrap();
        let inner = ComGuard::new().unwrap();
        drop(inner);
        drop(outer);
    }
}
