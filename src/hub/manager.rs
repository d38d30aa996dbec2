//! Shared-resource manager and session control surface.
//!
//! The manager owns one [`Registry`] per instance class (adaptors, chains,
//! sensors, filters), the plugin loader and the session table. Factories
//! receive the manager as their context, so a chain factory can request
//! its adaptor and a sensor factory its chain.
//!
//! # Sessions
//!
//! `request_sensor` hands out a fresh [`SessionId`] together with a lease on
//! the sensor channel; `release_sensor` drops both. Every other session
//! call is keyed by the session id alone.
//!
//! # Lock order
//!
//! session table → sensor slot → chain slot → adaptor slot → adaptor state.
//! Nothing on the data path (polling thread → buffers → readers → frame
//! channel) takes any of these, so stopping hardware while holding them
//! is safe.

use crate::config::{AdaptorSettings, HubConfig};
use crate::error::{HubError, Result};
use crate::hub::adaptor::DeviceAdaptor;
use crate::hub::arbitration::IntervalDecision;
use crate::hub::chain::Chain;
use crate::hub::loader::PluginLoader;
use crate::hub::registry::{Lease, Registry};
use crate::hub::sensor::SensorChannel;
use crate::pipeline::filter::Filter;
use crate::types::{DataRange, HubStatus, SensorFrame, SessionId};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

struct SessionEntry {
    sensor_id: String,
    channel: Lease<SensorChannel>,
}

pub struct SensorManager {
    config: HubConfig,
    adaptors: Registry<dyn DeviceAdaptor, SensorManager>,
    chains: Registry<Chain, SensorManager>,
    sensors: Registry<SensorChannel, SensorManager>,
    filters: Registry<dyn Filter, SensorManager>,
    loader: PluginLoader,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    next_session: AtomicU32,
    frames_tx: Sender<SensorFrame>,
    frames_rx: Receiver<SensorFrame>,
    display_on: AtomicBool,
}

impl SensorManager {
    pub fn new(config: HubConfig) -> Self {
        let (frames_tx, frames_rx) = bounded(config.frame_channel_capacity.max(1));

        let adaptors = Registry::<dyn DeviceAdaptor, SensorManager>::new("adaptor")
            .with_create_hook(|id, adaptor| {
                adaptor.start_adaptor().map_err(|e| {
                    tracing::warn!("Adaptor '{}' failed to start: {}", id, e);
                    HubError::AdaptorNotStarted(id.to_string())
                })
            })
            .with_destroy_hook(|id, adaptor| {
                tracing::debug!("Stopping adaptor '{}' before destruction", id);
                adaptor.stop_adaptor();
            });
        let chains =
            Registry::<Chain, SensorManager>::new("chain").with_destroy_hook(|_, chain| {
                chain.shutdown();
            });

        let manager = Self {
            adaptors,
            chains,
            sensors: Registry::new("sensor"),
            filters: Registry::new("filter"),
            loader: PluginLoader::new(),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU32::new(1),
            frames_tx,
            frames_rx,
            display_on: AtomicBool::new(true),
            config,
        };

        for (id, settings) in &manager.config.adaptors {
            manager.adaptors.register_instance(id, &settings.type_name);
        }
        for (id, type_name) in &manager.config.chains {
            manager.chains.register_instance(id, type_name);
        }
        for (id, type_name) in &manager.config.sensors {
            manager.sensors.register_instance(id, type_name);
        }
        manager
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    /// Settings of adaptor `id`, defaults if it has none.
    pub fn adaptor_settings(&self, id: &str) -> AdaptorSettings {
        self.config.adaptors.get(id).cloned().unwrap_or_default()
    }

    /// Sender used by sensor channels to publish frames.
    pub fn frame_sender(&self) -> Sender<SensorFrame> {
        self.frames_tx.clone()
    }

    /// Frames published for every active session.
    pub fn frames(&self) -> Receiver<SensorFrame> {
        self.frames_rx.clone()
    }

    // ==================== Registration ====================

    pub fn register_adaptor_type<F>(&self, type_name: &str, factory: F) -> bool
    where
        F: Fn(&str, &SensorManager) -> Result<Arc<dyn DeviceAdaptor>> + Send + Sync + 'static,
    {
        self.adaptors.register_type(type_name, factory)
    }

    pub fn register_chain_type<F>(&self, type_name: &str, factory: F) -> bool
    where
        F: Fn(&str, &SensorManager) -> Result<Arc<Chain>> + Send + Sync + 'static,
    {
        self.chains.register_type(type_name, factory)
    }

    pub fn register_sensor_type<F>(&self, type_name: &str, factory: F) -> bool
    where
        F: Fn(&str, &SensorManager) -> Result<Arc<SensorChannel>> + Send + Sync + 'static,
    {
        self.sensors.register_type(type_name, factory)
    }

    pub fn register_filter_type<F>(&self, type_name: &str, factory: F) -> bool
    where
        F: Fn(&str, &SensorManager) -> Result<Arc<dyn Filter>> + Send + Sync + 'static,
    {
        self.filters.register_type(type_name, factory)
    }

    /// Declare adaptor `id` of `type_name`, unless the config already did.
    pub fn register_adaptor(&self, id: &str, type_name: &str) {
        if !self.adaptors.has_instance(id) {
            self.adaptors.register_instance(id, type_name);
        }
    }

    pub fn register_chain(&self, id: &str, type_name: &str) {
        if !self.chains.has_instance(id) {
            self.chains.register_instance(id, type_name);
        }
    }

    pub fn register_sensor(&self, id: &str, type_name: &str) {
        if !self.sensors.has_instance(id) {
            self.sensors.register_instance(id, type_name);
        }
    }

    pub fn has_sensor(&self, id: &str) -> bool {
        self.sensors.has_instance(id)
    }

    // ==================== Shared instances ====================

    /// Get a lease on adaptor `id`, constructing and starting it on first use.
    pub fn request_adaptor(&self, id: &str) -> Result<Lease<dyn DeviceAdaptor>> {
        self.adaptors.request(id, self)
    }

    pub fn request_chain(&self, id: &str) -> Result<Lease<Chain>> {
        self.chains.request(id, self)
    }

    /// Filters are never shared: every call builds a new one.
    pub fn instantiate_filter(&self, type_name: &str) -> Result<Arc<dyn Filter>> {
        self.filters.instantiate(type_name, self)
    }

    pub fn adaptor_ref_count(&self, id: &str) -> usize {
        self.adaptors.ref_count(id)
    }

    pub fn chain_ref_count(&self, id: &str) -> usize {
        self.chains.ref_count(id)
    }

    pub fn sensor_ref_count(&self, id: &str) -> usize {
        self.sensors.ref_count(id)
    }

    // ==================== Sessions ====================

    /// Open a session on sensor `id`. Parameters after `;` are ignored for
    /// the lookup.
    pub fn request_sensor(&self, id: &str) -> Result<SessionId> {
        let clean = id.split(';').next().unwrap_or(id);
        let channel = self.sensors.request(clean, self).map_err(|e| {
            tracing::warn!("Failed to request sensor '{}': {}", clean, e);
            e
        })?;

        let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        channel.add_session(session);
        self.sessions.lock().insert(
            session,
            SessionEntry {
                sensor_id: clean.to_string(),
                channel,
            },
        );
        tracing::info!("Session {} opened on '{}'", session, clean);
        Ok(session)
    }

    /// Close `session` on sensor `id`, forgetting all its requests. The
    /// sensor (and whatever it uses) is destroyed with its last session.
    pub fn release_sensor(&self, id: &str, session: SessionId) -> Result<()> {
        if id.contains(';') {
            tracing::warn!("Cannot release '{}': parameters are not allowed", id);
            return Err(HubError::unknown_id("sensor", id));
        }

        let entry = {
            let mut sessions = self.sessions.lock();
            match sessions.get(&session) {
                None => return Err(HubError::UnknownSession(session)),
                Some(entry) if entry.sensor_id != id => {
                    return Err(HubError::Lifecycle(format!(
                        "Session {} does not belong to '{}'",
                        session, id
                    )));
                }
                Some(_) => sessions.remove(&session),
            }
        };

        if let Some(entry) = entry {
            entry.channel.remove_session(session);
            tracing::info!("Session {} released from '{}'", session, id);
        }
        Ok(())
    }

    fn with_channel<R>(
        &self,
        session: SessionId,
        f: impl FnOnce(&SensorChannel) -> Result<R>,
    ) -> Result<R> {
        let sessions = self.sessions.lock();
        let entry = sessions
            .get(&session)
            .ok_or(HubError::UnknownSession(session))?;
        f(&entry.channel)
    }

    /// Start delivering frames to `session`. `Ok(false)` if it already was.
    pub fn start(&self, session: SessionId) -> Result<bool> {
        self.with_channel(session, |c| c.start(session))
    }

    /// Stop delivering frames to `session`. `Ok(false)` if it was not started.
    pub fn stop(&self, session: SessionId) -> Result<bool> {
        self.with_channel(session, |c| Ok(c.stop(session)))
    }

    pub fn set_interval(&self, session: SessionId, interval_ms: u32) -> Result<IntervalDecision> {
        self.with_channel(session, |c| c.set_interval(session, interval_ms))
    }

    pub fn set_standby_override(&self, session: SessionId, enabled: bool) -> Result<bool> {
        self.with_channel(session, |c| c.set_standby_override(session, enabled))
    }

    pub fn set_data_range(&self, session: SessionId, range: DataRange) -> Result<bool> {
        self.with_channel(session, |c| c.set_data_range(session, range))
    }

    /// The client behind `session` went away: stop and release it.
    pub fn lost_client(&self, session: SessionId) -> bool {
        let Some(sensor_id) = self.sensor_of(session) else {
            tracing::debug!("Lost client for unknown session {}", session);
            return false;
        };
        tracing::info!("Client of session {} lost, releasing '{}'", session, sensor_id);
        self.release_sensor(&sensor_id, session).is_ok()
    }

    pub fn sensor_of(&self, session: SessionId) -> Option<String> {
        self.sessions
            .lock()
            .get(&session)
            .map(|e| e.sensor_id.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    // ==================== Power ====================

    /// Display on resumes every live adaptor; display off puts every
    /// adaptor without a standby override into standby.
    pub fn set_display_state(&self, on: bool) {
        let previous = self.display_on.swap(on, Ordering::Relaxed);
        if previous == on {
            return;
        }
        tracing::info!("Display {}", if on { "on" } else { "off" });
        self.adaptors.for_each_live(|id, _, adaptor| {
            let changed = adaptor.set_screen_blanked(!on);
            tracing::debug!("Adaptor '{}' screen blanked={} changed={}", id, !on, changed);
        });
    }

    pub fn display_on(&self) -> bool {
        self.display_on.load(Ordering::Relaxed)
    }

    // ==================== Plugins ====================

    pub fn load_plugin(&self, name: &str) -> Result<Vec<String>> {
        self.loader.load(name, self)
    }

    /// Load every plugin listed in the config. All are attempted; the first
    /// failure is returned.
    pub fn load_autoload_plugins(&self) -> Result<()> {
        let mut first_error = None;
        for name in &self.config.plugins {
            if let Err(e) = self.load_plugin(name) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ==================== Diagnostics ====================

    pub fn status(&self) -> HubStatus {
        let mut status = HubStatus {
            loaded_plugins: self.loader.loaded(),
            display_on: self.display_on(),
            ..Default::default()
        };
        self.adaptors
            .for_each_live(|_, count, a| status.adaptors.push(a.status(count)));
        self.chains
            .for_each_live(|_, count, c| status.chains.push(c.status(count)));
        self.sensors
            .for_each_live(|_, count, s| status.sensors.push(s.status(count)));
        status
    }

    /// Release every session. Instances still alive afterwards are leaked
    /// leases held outside the manager and are logged.
    pub fn shutdown(&self) {
        let entries: Vec<(SessionId, SessionEntry)> = self.sessions.lock().drain().collect();
        for (session, entry) in entries {
            entry.channel.remove_session(session);
        }

        for id in self.sensors.live_ids() {
            tracing::error!("Sensor '{}' still alive at shutdown", id);
        }
        for id in self.chains.live_ids() {
            tracing::error!("Chain '{}' still alive at shutdown", id);
        }
        for id in self.adaptors.live_ids() {
            tracing::error!("Adaptor '{}' still alive at shutdown", id);
        }
        tracing::info!("Sensor manager shut down");
    }
}

impl fmt::Debug for SensorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorManager")
            .field("adaptors", &self.adaptors.live_ids())
            .field("chains", &self.chains.live_ids())
            .field("sensors", &self.sensors.live_ids())
            .field("sessions", &self.session_count())
            .finish()
    }
}
