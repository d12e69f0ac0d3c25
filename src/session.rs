// Resolution of process ids to live per-application sessions
// Nothing is cached: every call walks the backend's current session set again.
// A process can own several sessions (one per stream); writes go to all of
// them, reads report the first one in enumeration order.

use std::ops::ControlFlow;

use log::{debug, warn};

use crate::audio::{AudioSession, NativeSession, PlatformBackend, Volume};
use crate::error::{AudioError, Result};

pub struct SessionResolver<'b> {
    backend: &'b dyn PlatformBackend,
}

impl<'b> SessionResolver<'b> {
    pub fn new(backend: &'b dyn PlatformBackend) -> Self {
        SessionResolver { backend }
    }

    /// Snapshot of every session currently producing audio.
    ///
    /// Sessions destroyed while the snapshot is taken are left out.
    pub fn list_sessions(&self) -> Result<Vec<AudioSession>> {
        let mut sessions = Vec::new();
        self.backend
            .for_each_session(&mut |session: &mut dyn NativeSession| {
                match snapshot(session) {
                    Ok(found) => sessions.push(found),
                    Err(AudioError::SessionNotFound(pid)) => {
                        debug!("session of pid {} ended during enumeration", pid);
                    }
                    Err(e) => return Err(e),
                }
                Ok(ControlFlow::Continue(()))
            })?;
        Ok(sessions)
    }

    pub fn find_session(&self, pid: u32) -> Result<AudioSession> {
        self.with_first(pid, snapshot)
    }

    /// Volume of the first session owned by `pid`.
    pub fn session_volume(&self, pid: u32) -> Result<Volume> {
        self.with_first(pid, |session| session.volume())
    }

    pub fn session_muted(&self, pid: u32) -> Result<bool> {
        self.with_first(pid, |session| session.muted())
    }

    pub fn session_peak(&self, pid: u32) -> Result<f64> {
        self.with_first(pid, |session| session.peak())
    }

    /// Applies `level` to every session of `pid` and returns the level read
    /// back from the first one.
    pub fn set_session_volume(&self, pid: u32, level: Volume) -> Result<Volume> {
        let applied = self.for_all(
            pid,
            |session| session.volume(),
            |session| session.set_volume(level),
            |session, prior| session.set_volume(*prior).map(drop),
        )?;
        debug!("set volume {} on {} session(s) of pid {}", level, applied.len(), pid);
        applied
            .into_iter()
            .next()
            .ok_or(AudioError::SessionNotFound(pid))
    }

    pub fn set_session_mute(&self, pid: u32, muted: bool) -> Result<()> {
        let applied = self.for_all(
            pid,
            |session| session.muted(),
            |session| session.set_mute(muted),
            |session, prior| session.set_mute(*prior),
        )?;
        debug!("set mute {} on {} session(s) of pid {}", muted, applied.len(), pid);
        Ok(())
    }

    fn with_first<T>(
        &self,
        pid: u32,
        mut read: impl FnMut(&mut dyn NativeSession) -> Result<T>,
    ) -> Result<T> {
        let mut found = None;
        self.backend
            .for_each_session(&mut |session: &mut dyn NativeSession| {
                if session.pid() != pid {
                    return Ok(ControlFlow::Continue(()));
                }
                match read(session) {
                    Ok(value) => {
                        found = Some(value);
                        Ok(ControlFlow::Break(()))
                    }
                    // this stream is gone, the process may still own another
                    Err(AudioError::SessionNotFound(_)) => Ok(ControlFlow::Continue(())),
                    Err(e) => Err(e),
                }
            })?;
        found.ok_or(AudioError::SessionNotFound(pid))
    }

    /// Runs `write` on every session of `pid`, saving each session's prior
    /// state first. An error other than a vanished session aborts the walk
    /// and the sessions already written get their prior state back, so the
    /// pid is left either fully updated or untouched.
    fn for_all<P, T>(
        &self,
        pid: u32,
        save: impl Fn(&dyn NativeSession) -> Result<P>,
        mut write: impl FnMut(&mut dyn NativeSession) -> Result<T>,
        restore: impl Fn(&mut dyn NativeSession, &P) -> Result<()>,
    ) -> Result<Vec<T>> {
        let mut results = Vec::new();
        // one entry per session of `pid` reached, `None` when it was skipped
        let mut priors: Vec<Option<P>> = Vec::new();

        let walk = self
            .backend
            .for_each_session(&mut |session: &mut dyn NativeSession| {
                if session.pid() != pid {
                    return Ok(ControlFlow::Continue(()));
                }
                let prior = match save(&*session) {
                    Ok(prior) => prior,
                    Err(AudioError::SessionNotFound(_)) => {
                        priors.push(None);
                        return Ok(ControlFlow::Continue(()));
                    }
                    Err(e) => return Err(e),
                };
                match write(session) {
                    Ok(value) => {
                        results.push(value);
                        priors.push(Some(prior));
                    }
                    Err(AudioError::SessionNotFound(_)) => {
                        debug!("session of pid {} ended before it could be updated", pid);
                        priors.push(None);
                    }
                    Err(e) => return Err(e),
                }
                Ok(ControlFlow::Continue(()))
            });

        if let Err(e) = walk {
            if priors.iter().any(Option::is_some) {
                self.roll_back(pid, &priors, &restore);
            }
            return Err(e);
        }

        if results.is_empty() {
            Err(AudioError::SessionNotFound(pid))
        } else {
            Ok(results)
        }
    }

    /// Best-effort undo of a partially applied write. Sessions are matched by
    /// their position among the sessions of `pid` in enumeration order.
    fn roll_back<P>(
        &self,
        pid: u32,
        priors: &[Option<P>],
        restore: &impl Fn(&mut dyn NativeSession, &P) -> Result<()>,
    ) {
        let mut position = 0;
        let undone = self
            .backend
            .for_each_session(&mut |session: &mut dyn NativeSession| {
                if session.pid() != pid {
                    return Ok(ControlFlow::Continue(()));
                }
                let index = position;
                position += 1;
                match priors.get(index) {
                    Some(Some(prior)) => {
                        if let Err(e) = restore(session, prior) {
                            warn!("could not restore session #{} of pid {}: {}", index, pid, e);
                        }
                    }
                    Some(None) => {}
                    None => return Ok(ControlFlow::Break(())),
                }
                Ok(ControlFlow::Continue(()))
            });

        match undone {
            Ok(()) => debug!("restored sessions of pid {} after a failed write", pid),
            Err(e) => warn!("could not restore sessions of pid {}: {}", pid, e),
        }
    }
}

fn snapshot(session: &mut dyn NativeSession) -> Result<AudioSession> {
    let pid = session.pid();
    let volume = session.volume()?;
    let muted = session.muted()?;
    let name = session.name().unwrap_or_else(|| {
        warn!("could not resolve a name for the audio session of pid {}", pid);
        String::new()
    });

    Ok(AudioSession {
        pid,
        name,
        volume: volume.get(),
        muted,
    })
}
