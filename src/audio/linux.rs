// Linux audio backend using PulseAudio
// Works against PulseAudio and PipeWire's pulse server alike. Master maps to
// the default sink, capture to the default source and application sessions
// to sink inputs.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::introspect::{SinkInfo, SinkInputInfo, SourceInfo};
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use libpulse_binding::error::{Code, PAErr};
use libpulse_binding::mainloop::threaded::Mainloop;
use libpulse_binding::operation::{Operation, State as OperationState};
use libpulse_binding::proplist::{properties, Proplist};
use libpulse_binding::volume::{ChannelVolumes, Volume as PaVolume};
use log::{debug, info};
use parking_lot::Mutex;

use super::{scale, Endpoint, NativeSession, Platform, PlatformBackend, SessionVisitor, Volume};
use crate::config::BackendConfig;
use crate::error::{AudioError, Result, Target};
use crate::platform;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// PulseAudio implementation of [`PlatformBackend`].
///
/// Holds a single client connection, opened on first use and reopened when
/// the server went away. The mutex around it is held for the duration of
/// each call.
pub struct LinuxBackend {
    config: BackendConfig,
    connection: Mutex<Option<PulseConnection>>,
}

impl LinuxBackend {
    pub fn new(config: BackendConfig) -> Self {
        LinuxBackend {
            config,
            connection: Mutex::new(None),
        }
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut PulseConnection) -> Result<T>) -> Result<T> {
        let mut slot = self.connection.lock();
        let mut conn = match slot.take() {
            Some(mut conn) => {
                if conn.is_ready() {
                    conn
                } else {
                    info!("PulseAudio connection lost, reconnecting");
                    drop(conn);
                    PulseConnection::open(&self.config.client_name)?
                }
            }
            None => PulseConnection::open(&self.config.client_name)?,
        };
        let result = f(&mut conn);
        *slot = Some(conn);
        result
    }
}

impl PlatformBackend for LinuxBackend {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn endpoint_volume(&self, endpoint: Endpoint) -> Result<Volume> {
        self.with_connection(|conn| {
            let device = conn.device(endpoint)?;
            Ok(scale::from_native(device.raw))
        })
    }

    fn set_endpoint_volume(&self, endpoint: Endpoint, level: Volume) -> Result<Volume> {
        self.with_connection(|conn| {
            let device = conn.device(endpoint)?;
            let volumes = channel_volumes(device.channels, level);
            conn.set_device_volume(endpoint, &device.name, &volumes)?;

            // report what the server actually stored
            let device = conn.device(endpoint)?;
            Ok(scale::from_native(device.raw))
        })
    }

    fn endpoint_muted(&self, endpoint: Endpoint) -> Result<bool> {
        self.with_connection(|conn| Ok(conn.device(endpoint)?.muted))
    }

    fn set_endpoint_mute(&self, endpoint: Endpoint, muted: bool) -> Result<()> {
        self.with_connection(|conn| {
            let name = conn.default_device_name(endpoint)?;
            conn.set_device_mute(endpoint, &name, muted)
        })
    }

    fn endpoint_name(&self, endpoint: Endpoint) -> Result<String> {
        self.with_connection(|conn| {
            let device = conn.device(endpoint)?;
            Ok(device.description.unwrap_or(device.name))
        })
    }

    // PulseAudio doesn't provide direct peak values; metering would need a
    // recording stream on the monitor source, so endpoint_peak keeps the
    // unsupported default.

    fn for_each_session(&self, visit: &mut SessionVisitor<'_>) -> Result<()> {
        self.with_connection(|conn| {
            let streams = conn.sink_inputs()?;
            debug!("{} sink input(s) with an owning process", streams.len());
            for stream in streams {
                let mut session = PulseSession {
                    conn: &mut *conn,
                    stream,
                };
                if visit(&mut session)?.is_break() {
                    break;
                }
            }
            Ok(())
        })
    }
}

/// Default sink or source as last read from the server.
#[derive(Debug, Clone)]
struct DeviceSnapshot {
    name: String,
    description: Option<String>,
    raw: u32,
    channels: u8,
    muted: bool,
}

impl DeviceSnapshot {
    fn from_sink(info: &SinkInfo) -> Option<Self> {
        Some(DeviceSnapshot {
            name: info.name.as_ref()?.to_string(),
            description: info.description.as_ref().map(|d| d.to_string()),
            raw: info.volume.avg().0,
            channels: info.volume.len(),
            muted: info.mute,
        })
    }

    fn from_source(info: &SourceInfo) -> Option<Self> {
        Some(DeviceSnapshot {
            name: info.name.as_ref()?.to_string(),
            description: info.description.as_ref().map(|d| d.to_string()),
            raw: info.volume.avg().0,
            channels: info.volume.len(),
            muted: info.mute,
        })
    }
}

/// Sink input owned by a known process.
#[derive(Debug, Clone)]
struct StreamSnapshot {
    index: u32,
    pid: u32,
    name: Option<String>,
    raw: u32,
    channels: u8,
    muted: bool,
}

impl StreamSnapshot {
    fn from_info(info: &SinkInputInfo) -> Option<Self> {
        let pid = info
            .proplist
            .get_str(properties::APPLICATION_PROCESS_ID)
            .and_then(|pid| pid.trim().parse::<u32>().ok())
            .filter(|pid| *pid > 0)?;

        let name = info
            .proplist
            .get_str(properties::APPLICATION_NAME)
            .or_else(|| info.proplist.get_str(properties::APPLICATION_PROCESS_BINARY))
            .or_else(|| info.name.as_ref().map(|n| n.to_string()))
            .filter(|name| !name.trim().is_empty());

        Some(StreamSnapshot {
            index: info.index,
            pid,
            name,
            raw: info.volume.avg().0,
            channels: info.volume.len(),
            muted: info.mute,
        })
    }
}

// Field order matters: the context must be released before its mainloop.
struct PulseConnection {
    context: Context,
    mainloop: Mainloop,
}

// SAFETY: the mainloop and context are only touched by the thread holding
// LinuxBackend's mutex, and every access to context state happens under the
// threaded mainloop lock as libpulse requires. Nothing inside is cloned out
// of the connection.
unsafe impl Send for PulseConnection {}

impl PulseConnection {
    fn open(client_name: &str) -> Result<Self> {
        let mut proplist =
            Proplist::new().ok_or_else(|| AudioError::backend("pa_proplist_new", "out of memory"))?;
        proplist
            .set_str(properties::APPLICATION_NAME, client_name)
            .map_err(|_| AudioError::backend("pa_proplist_sets", "invalid application name"))?;

        let mut mainloop = Mainloop::new()
            .ok_or_else(|| AudioError::backend("pa_threaded_mainloop_new", "out of memory"))?;
        let mut context = Context::new_with_proplist(&mainloop, client_name, &proplist)
            .ok_or_else(|| AudioError::backend("pa_context_new", "out of memory"))?;

        context
            .connect(None, ContextFlagSet::NOFLAGS, None)
            .map_err(|e| AudioError::backend("pa_context_connect", format!("{:?}", e)))?;
        mainloop
            .start()
            .map_err(|e| AudioError::backend("pa_threaded_mainloop_start", format!("{:?}", e)))?;

        // from here on Drop disconnects and stops the mainloop
        let mut conn = PulseConnection { context, mainloop };
        conn.mainloop.lock();
        let ready = conn.wait_ready();
        conn.mainloop.unlock();
        ready?;

        info!("connected to PulseAudio server as {:?}", client_name);
        Ok(conn)
    }

    // Must be called with the mainloop lock held.
    fn wait_ready(&mut self) -> Result<()> {
        loop {
            match self.context.get_state() {
                ContextState::Ready => return Ok(()),
                ContextState::Failed | ContextState::Terminated => {
                    return Err(AudioError::backend(
                        "pa_context_connect",
                        format!("{:?}", self.context.errno()),
                    ));
                }
                _ => self.yield_to_mainloop(),
            }
        }
    }

    fn is_ready(&mut self) -> bool {
        self.mainloop.lock();
        let state = self.context.get_state();
        self.mainloop.unlock();
        matches!(state, ContextState::Ready)
    }

    fn yield_to_mainloop(&mut self) {
        self.mainloop.unlock();
        thread::sleep(POLL_INTERVAL);
        self.mainloop.lock();
    }

    // Must be called with the mainloop lock held. There is no timeout: a
    // server that never answers blocks the caller.
    fn wait_for<F: ?Sized>(&mut self, operation: &Operation<F>, call: &'static str) -> Result<()> {
        loop {
            match operation.get_state() {
                OperationState::Done => return Ok(()),
                OperationState::Cancelled => {
                    return Err(AudioError::backend(call, format!("{:?}", self.context.errno())));
                }
                OperationState::Running => {}
            }
            if let ContextState::Failed | ContextState::Terminated = self.context.get_state() {
                return Err(AudioError::backend(call, "connection to the server was lost"));
            }
            self.yield_to_mainloop();
        }
    }

    fn default_device_name(&mut self, endpoint: Endpoint) -> Result<String> {
        let slot = Arc::new(Mutex::new(None));
        let result = Arc::clone(&slot);

        self.mainloop.lock();
        let operation = self.context.introspect().get_server_info(move |server_info| {
            let name = match endpoint {
                Endpoint::MasterOutput => server_info.default_sink_name.as_ref(),
                Endpoint::DefaultCapture => server_info.default_source_name.as_ref(),
            };
            *result.lock() = name.map(|n| n.to_string());
        });
        let done = self.wait_for(&operation, "pa_context_get_server_info");
        self.mainloop.unlock();
        done?;

        let name = slot.lock().take();
        name.filter(|n| !n.is_empty())
            .ok_or(AudioError::DeviceUnavailable(endpoint))
    }

    fn device(&mut self, endpoint: Endpoint) -> Result<DeviceSnapshot> {
        let name = self.default_device_name(endpoint)?;
        let slot = Arc::new(Mutex::new(None));
        let result = Arc::clone(&slot);

        self.mainloop.lock();
        let introspect = self.context.introspect();
        let done = match endpoint {
            Endpoint::MasterOutput => {
                let operation = introspect.get_sink_info_by_name(&name, move |list| {
                    if let ListResult::Item(info) = list {
                        *result.lock() = DeviceSnapshot::from_sink(info);
                    }
                });
                self.wait_for(&operation, "pa_context_get_sink_info_by_name")
            }
            Endpoint::DefaultCapture => {
                let operation = introspect.get_source_info_by_name(&name, move |list| {
                    if let ListResult::Item(info) = list {
                        *result.lock() = DeviceSnapshot::from_source(info);
                    }
                });
                self.wait_for(&operation, "pa_context_get_source_info_by_name")
            }
        };
        self.mainloop.unlock();
        done?;

        // the default can be removed between the two queries
        let device = slot.lock().take();
        device.ok_or(AudioError::DeviceUnavailable(endpoint))
    }

    // Must be called with the mainloop lock held.
    fn complete<F: ?Sized>(
        &mut self,
        operation: &Operation<F>,
        call: &'static str,
        success: &Mutex<bool>,
        target: Target,
    ) -> Result<()> {
        self.wait_for(operation, call)?;
        if *success.lock() {
            Ok(())
        } else {
            Err(classify(self.context.errno(), call, target))
        }
    }

    fn set_device_volume(
        &mut self,
        endpoint: Endpoint,
        name: &str,
        volumes: &ChannelVolumes,
    ) -> Result<()> {
        let success = Arc::new(Mutex::new(false));
        let result = Arc::clone(&success);
        let callback: Box<dyn FnMut(bool)> = Box::new(move |ok| *result.lock() = ok);

        self.mainloop.lock();
        let mut introspect = self.context.introspect();
        let (operation, call) = match endpoint {
            Endpoint::MasterOutput => (
                introspect.set_sink_volume_by_name(name, volumes, Some(callback)),
                "pa_context_set_sink_volume_by_name",
            ),
            Endpoint::DefaultCapture => (
                introspect.set_source_volume_by_name(name, volumes, Some(callback)),
                "pa_context_set_source_volume_by_name",
            ),
        };
        let done = self.complete(&operation, call, &success, Target::Endpoint(endpoint));
        self.mainloop.unlock();
        done
    }

    fn set_device_mute(&mut self, endpoint: Endpoint, name: &str, muted: bool) -> Result<()> {
        let success = Arc::new(Mutex::new(false));
        let result = Arc::clone(&success);
        let callback: Box<dyn FnMut(bool)> = Box::new(move |ok| *result.lock() = ok);

        self.mainloop.lock();
        let mut introspect = self.context.introspect();
        let (operation, call) = match endpoint {
            Endpoint::MasterOutput => (
                introspect.set_sink_mute_by_name(name, muted, Some(callback)),
                "pa_context_set_sink_mute_by_name",
            ),
            Endpoint::DefaultCapture => (
                introspect.set_source_mute_by_name(name, muted, Some(callback)),
                "pa_context_set_source_mute_by_name",
            ),
        };
        let done = self.complete(&operation, call, &success, Target::Endpoint(endpoint));
        self.mainloop.unlock();
        done
    }

    fn sink_inputs(&mut self) -> Result<Vec<StreamSnapshot>> {
        let slot = Arc::new(Mutex::new(Vec::new()));
        let result = Arc::clone(&slot);

        self.mainloop.lock();
        let operation = self.context.introspect().get_sink_input_info_list(move |list| {
            if let ListResult::Item(info) = list {
                match StreamSnapshot::from_info(info) {
                    Some(stream) => result.lock().push(stream),
                    None => debug!("skipping sink input #{} without a process id", info.index),
                }
            }
        });
        let done = self.wait_for(&operation, "pa_context_get_sink_input_info_list");
        self.mainloop.unlock();
        done?;

        let streams = std::mem::take(&mut *slot.lock());
        Ok(streams)
    }

    fn sink_input(&mut self, index: u32) -> Result<Option<StreamSnapshot>> {
        let slot = Arc::new(Mutex::new(None));
        let result = Arc::clone(&slot);

        self.mainloop.lock();
        let operation = self.context.introspect().get_sink_input_info(index, move |list| {
            if let ListResult::Item(info) = list {
                *result.lock() = StreamSnapshot::from_info(info);
            }
        });
        // a destroyed index completes the query with no item
        let done = self.wait_for(&operation, "pa_context_get_sink_input_info");
        self.mainloop.unlock();
        done?;

        let stream = slot.lock().take();
        Ok(stream)
    }

    fn set_stream_volume(&mut self, stream: &StreamSnapshot, level: Volume) -> Result<()> {
        let success = Arc::new(Mutex::new(false));
        let result = Arc::clone(&success);
        let volumes = channel_volumes(stream.channels, level);

        self.mainloop.lock();
        let operation = self.context.introspect().set_sink_input_volume(
            stream.index,
            &volumes,
            Some(Box::new(move |ok| *result.lock() = ok)),
        );
        let done = self.complete(
            &operation,
            "pa_context_set_sink_input_volume",
            &success,
            Target::Session(stream.pid),
        );
        self.mainloop.unlock();
        done
    }

    fn set_stream_mute(&mut self, stream: &StreamSnapshot, muted: bool) -> Result<()> {
        let success = Arc::new(Mutex::new(false));
        let result = Arc::clone(&success);

        self.mainloop.lock();
        let operation = self.context.introspect().set_sink_input_mute(
            stream.index,
            muted,
            Some(Box::new(move |ok| *result.lock() = ok)),
        );
        let done = self.complete(
            &operation,
            "pa_context_set_sink_input_mute",
            &success,
            Target::Session(stream.pid),
        );
        self.mainloop.unlock();
        done
    }
}

impl Drop for PulseConnection {
    fn drop(&mut self) {
        self.mainloop.lock();
        self.context.disconnect();
        self.mainloop.unlock();
        self.mainloop.stop();
        debug!("PulseAudio connection closed");
    }
}

struct PulseSession<'c> {
    conn: &'c mut PulseConnection,
    stream: StreamSnapshot,
}

impl NativeSession for PulseSession<'_> {
    fn pid(&self) -> u32 {
        self.stream.pid
    }

    fn name(&self) -> Option<String> {
        self.stream
            .name
            .clone()
            .or_else(|| platform::process_name(self.stream.pid).ok())
    }

    fn volume(&self) -> Result<Volume> {
        Ok(scale::from_native(self.stream.raw))
    }

    fn set_volume(&mut self, level: Volume) -> Result<Volume> {
        self.conn.set_stream_volume(&self.stream, level)?;
        match self.conn.sink_input(self.stream.index)? {
            Some(stream) => {
                self.stream = stream;
                Ok(scale::from_native(self.stream.raw))
            }
            None => Err(AudioError::SessionNotFound(self.stream.pid)),
        }
    }

    fn muted(&self) -> Result<bool> {
        Ok(self.stream.muted)
    }

    fn set_mute(&mut self, muted: bool) -> Result<()> {
        self.conn.set_stream_mute(&self.stream, muted)?;
        self.stream.muted = muted;
        Ok(())
    }
}

/// Same level on every channel of an object with `channels` channels.
fn channel_volumes(channels: u8, level: Volume) -> ChannelVolumes {
    let mut volumes = ChannelVolumes::default();
    volumes.set(channels.max(1), PaVolume(scale::to_native(level)));
    volumes
}

/// Maps a failed PulseAudio request onto the engine's error kinds.
fn classify(err: PAErr, call: &'static str, target: Target) -> AudioError {
    if err == PAErr::from(Code::Access) {
        AudioError::PermissionDenied(target)
    } else if err == PAErr::from(Code::NoEntity) {
        match target {
            Target::Endpoint(endpoint) => AudioError::DeviceUnavailable(endpoint),
            Target::Session(pid) => AudioError::SessionNotFound(pid),
        }
    } else {
        AudioError::backend(call, format!("{:?}", err))
    }
}
