//! Sensor channels: the client-facing end of a chain.
//!
//! A [`SensorChannel`] reads one chain output and publishes every record
//! as a [`SensorFrame`] for each active session. Sessions attach when a
//! client requests the sensor and become active on `start`; the chain runs
//! while at least one session is active.

use crate::error::{HubError, Result};
use crate::hub::arbitration::IntervalDecision;
use crate::hub::chain::Chain;
use crate::hub::registry::Lease;
use crate::pipeline::packet::Payload;
use crate::pipeline::port::SinkHandle;
use crate::pipeline::reader::{BufferReader, Pusher};
use crate::types::{DataRange, SensorFrame, SensorStatus, SessionId};
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;

struct Tap {
    id: String,
    active: RwLock<Vec<SessionId>>,
    frames: Sender<SensorFrame>,
}

impl Tap {
    fn publish<T: Payload>(&self, values: &[T]) {
        let active = self.active.read();
        for value in values {
            for &session in active.iter() {
                let frame = SensorFrame {
                    session,
                    sensor: self.id.clone(),
                    payload: value.clone().into_payload(),
                };
                match self.frames.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::trace!("Frame channel full, dropping frame for session {}", session);
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        }
    }
}

pub struct SensorChannel {
    tap: Arc<Tap>,
    sessions: Mutex<Vec<SessionId>>,
    // Joined to the chain output for the channel's whole lifetime.
    _reader: Arc<dyn Pusher>,
    chain: Lease<Chain>,
}

impl SensorChannel {
    /// Tap `output` of `chain`, publishing `T` records to `frames`.
    pub fn new<T: Payload>(
        id: &str,
        chain: Lease<Chain>,
        output: &str,
        frames: Sender<SensorFrame>,
        chunk: usize,
    ) -> Result<Self> {
        let buffer = chain
            .output(output)
            .ok_or_else(|| HubError::PortNotFound {
                component: chain.id().to_string(),
                port: output.to_string(),
            })?;
        let tap = Arc::new(Tap {
            id: id.to_string(),
            active: RwLock::new(Vec::new()),
            frames,
        });

        let reader = BufferReader::<T>::new(chunk);
        reader.join_any(&buffer)?;
        let weak = Arc::downgrade(&tap);
        let sink = SinkHandle::new("frames", move |values: &[T]| {
            if let Some(tap) = weak.upgrade() {
                tap.publish(values);
            }
        });
        reader.source().join(&sink);

        Ok(Self {
            tap,
            sessions: Mutex::new(Vec::new()),
            _reader: reader,
            chain,
        })
    }

    pub fn id(&self) -> &str {
        &self.tap.id
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn add_session(&self, session: SessionId) {
        let mut sessions = self.sessions.lock();
        if !sessions.contains(&session) {
            sessions.push(session);
        }
    }

    pub fn has_session(&self, session: SessionId) -> bool {
        self.sessions.lock().contains(&session)
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        self.sessions.lock().clone()
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.tap.active.read().clone()
    }

    pub fn is_active(&self, session: SessionId) -> bool {
        self.tap.active.read().contains(&session)
    }

    fn check(&self, session: SessionId) -> Result<()> {
        if self.has_session(session) {
            Ok(())
        } else {
            Err(HubError::UnknownSession(session))
        }
    }

    /// Activate `session`. Requests the adaptor's default interval on its
    /// behalf unless it already asked for one, and starts the chain for the
    /// first active session. Returns `Ok(false)` if the session was already
    /// active.
    pub fn start(&self, session: SessionId) -> Result<bool> {
        self.check(session)?;
        let mut active = self.tap.active.write();
        if active.contains(&session) {
            return Ok(false);
        }
        if self.chain.adaptor().interval_request(session).is_none() {
            self.chain.request_default_interval(session)?;
        }
        if active.is_empty() {
            if let Err(e) = self.chain.start() {
                self.chain.remove_interval_request(session);
                return Err(e);
            }
        }
        active.push(session);
        tracing::debug!("Session {} started on '{}'", session, self.id());
        Ok(true)
    }

    /// Deactivate `session`, dropping its interval request. The chain stops
    /// with the last active session. Returns `false` if it was not active.
    pub fn stop(&self, session: SessionId) -> bool {
        let last = {
            let mut active = self.tap.active.write();
            let Some(pos) = active.iter().position(|s| *s == session) else {
                return false;
            };
            active.remove(pos);
            active.is_empty()
        };
        // Not under the session lock: stopping joins the polling thread,
        // which may be publishing.
        self.chain.remove_interval_request(session);
        if last {
            self.chain.stop();
        }
        tracing::debug!("Session {} stopped on '{}'", session, self.id());
        true
    }

    /// Detach `session` completely: stop it and forget every request it made.
    pub fn remove_session(&self, session: SessionId) -> bool {
        self.stop(session);
        let removed = {
            let mut sessions = self.sessions.lock();
            let before = sessions.len();
            sessions.retain(|s| *s != session);
            sessions.len() != before
        };
        self.chain.remove_session(session);
        removed
    }

    pub fn set_interval(&self, session: SessionId, interval_ms: u32) -> Result<IntervalDecision> {
        self.check(session)?;
        self.chain.set_interval_request(session, interval_ms)
    }

    pub fn set_standby_override(&self, session: SessionId, enabled: bool) -> Result<bool> {
        self.check(session)?;
        Ok(self.chain.set_standby_override_request(session, enabled))
    }

    pub fn set_data_range(&self, session: SessionId, range: DataRange) -> Result<bool> {
        self.check(session)?;
        Ok(self.chain.request_data_range(session, range))
    }

    pub fn status(&self, ref_count: usize) -> SensorStatus {
        SensorStatus {
            id: self.id().to_string(),
            ref_count,
            running: self.chain.is_running(),
            sessions: self.sessions(),
            active_sessions: self.active_sessions(),
        }
    }
}

impl Drop for SensorChannel {
    fn drop(&mut self) {
        let active = std::mem::take(&mut *self.tap.active.write());
        if !active.is_empty() {
            tracing::debug!("Sensor '{}' dropped with {} active sessions", self.id(), active.len());
            self.chain.stop();
        }
    }
}

impl fmt::Debug for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorChannel")
            .field("id", &self.id())
            .field("chain", &self.chain.id())
            .field("sessions", &self.sessions())
            .field("active", &self.active_sessions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdaptorSettings, HubConfig};
    use crate::hub::manager::SensorManager;
    use crate::pipeline::packet::TimedXyz;
    use crate::plugins::{self, ACCELEROMETER_ADAPTOR, ACCELEROMETER_CHAIN, ACCELEROMETER_OUTPUT};
    use crossbeam_channel::{bounded, Receiver};
    use std::collections::HashSet;
    use std::time::Duration;

    fn manager() -> SensorManager {
        let mut config = HubConfig::default();
        config.adaptors.insert(
            ACCELEROMETER_ADAPTOR.into(),
            AdaptorSettings {
                default_interval_ms: 2,
                ..AdaptorSettings::new(ACCELEROMETER_ADAPTOR)
            },
        );
        let m = SensorManager::new(config);
        plugins::install_builtin(&m);
        m.load_plugin(ACCELEROMETER_CHAIN).unwrap();
        m
    }

    fn channel(m: &SensorManager, capacity: usize) -> (SensorChannel, Receiver<SensorFrame>) {
        let (tx, rx) = bounded(capacity);
        let chain = m.request_chain(ACCELEROMETER_CHAIN).unwrap();
        let channel =
            SensorChannel::new::<TimedXyz>("testsensor", chain, ACCELEROMETER_OUTPUT, tx, 8)
                .unwrap();
        (channel, rx)
    }

    fn sessions_seen(rx: &Receiver<SensorFrame>, frames: usize) -> HashSet<SessionId> {
        let mut seen = HashSet::new();
        for _ in 0..frames {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(frame) => {
                    assert_eq!(frame.sensor, "testsensor");
                    seen.insert(frame.session);
                }
                Err(_) => break,
            }
        }
        seen
    }

    #[test]
    fn test_missing_output() {
        let m = manager();
        let (tx, _rx) = bounded(4);
        let chain = m.request_chain(ACCELEROMETER_CHAIN).unwrap();
        let err = SensorChannel::new::<TimedXyz>("testsensor", chain, "gyroscope", tx, 8)
            .unwrap_err();
        assert!(matches!(err, HubError::PortNotFound { .. }));
    }

    #[test]
    fn test_start_requires_attached_session() {
        let m = manager();
        let (channel, _rx) = channel(&m, 4);
        assert!(matches!(
            channel.start(SessionId(1)),
            Err(HubError::UnknownSession(_))
        ));
        assert!(!channel.stop(SessionId(1)));
        assert!(!channel.chain().is_running());
    }

    #[test]
    fn test_frames_follow_active_sessions() {
        let m = manager();
        let (channel, rx) = channel(&m, 256);
        let (a, b) = (SessionId(1), SessionId(2));
        channel.add_session(a);
        channel.add_session(b);

        assert!(channel.start(a).unwrap());
        assert!(!channel.start(a).unwrap());
        assert!(channel.start(b).unwrap());
        assert_eq!(channel.chain().start_count(), 1);
        assert_eq!(sessions_seen(&rx, 20), HashSet::from([a, b]));

        assert!(channel.stop(a));
        assert!(channel.chain().is_running());
        while rx.try_recv().is_ok() {}
        assert_eq!(sessions_seen(&rx, 10), HashSet::from([b]));

        assert!(channel.stop(b));
        assert!(!channel.chain().is_running());
    }

    #[test]
    fn test_start_keeps_explicit_interval() {
        let m = manager();
        let (channel, _rx) = channel(&m, 4);
        let s = SessionId(3);
        channel.add_session(s);

        channel.set_interval(s, 40).unwrap();
        channel.start(s).unwrap();
        assert_eq!(channel.chain().adaptor().interval_request(s), Some(40));

        channel.stop(s);
        assert_eq!(channel.chain().adaptor().interval_request(s), None);
    }

    #[test]
    fn test_full_frame_channel_never_blocks_stop() {
        let m = manager();
        let (channel, rx) = channel(&m, 1);
        let s = SessionId(1);
        channel.add_session(s);
        channel.start(s).unwrap();

        std::thread::sleep(Duration::from_millis(30));
        assert!(channel.stop(s));
        assert!(!channel.chain().is_running());
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_remove_session_forgets_requests() {
        let m = manager();
        let (channel, _rx) = channel(&m, 4);
        let s = SessionId(5);
        channel.add_session(s);
        channel.start(s).unwrap();
        channel.set_standby_override(s, true).unwrap();
        assert!(channel.chain().adaptor().standby_override());

        assert!(channel.remove_session(s));
        assert!(!channel.has_session(s));
        assert!(!channel.chain().adaptor().standby_override());
        assert!(channel.set_interval(s, 10).is_err());
    }
}
