//! DeviceAdaptor trait for the leaf producers of the hub
//!
//! An adaptor wraps one hardware source and publishes its samples into one
//! or more named ring buffers ("adapted sensors"). It is shared between
//! every chain that uses it, so it is also the point where the sessions'
//! interval, standby-override and data-range requests are arbitrated.
//!
//! Implementations provide the hardware hooks ([`DeviceAdaptor::start_hardware`],
//! [`DeviceAdaptor::stop_hardware`], [`DeviceAdaptor::apply_interval`]); the
//! lifecycle and arbitration logic lives in the provided methods, backed by
//! an [`AdaptorCore`].

use crate::error::{HubError, Result};
use crate::hub::arbitration::{
    DataRangeArbiter, DataRangeDecision, IntervalArbiter, IntervalDecision, StandbyOverrides,
};
use crate::pipeline::ring_buffer::AnyBuffer;
use crate::types::{AdaptorStatus, DataRange, SessionId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;

/// One named output of an adaptor.
#[derive(Debug)]
pub struct AdaptedSensor {
    name: String,
    description: String,
    buffer: AnyBuffer,
    listeners: usize,
}

impl AdaptedSensor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn buffer(&self) -> &AnyBuffer {
        &self.buffer
    }

    /// Number of chains currently listening on this output.
    pub fn listeners(&self) -> usize {
        self.listeners
    }
}

/// Mutable adaptor state, guarded by one lock.
#[derive(Debug)]
pub struct AdaptorState {
    pub sensors: Vec<AdaptedSensor>,
    pub interval: IntervalArbiter,
    pub current_interval: IntervalDecision,
    pub overrides: StandbyOverrides,
    pub data_ranges: DataRangeArbiter,
    pub sessions: HashSet<SessionId>,
    /// Hardware is delivering samples.
    pub running: bool,
    /// At least one listener wants the hardware running.
    pub should_run: bool,
    /// In standby: hardware stopped on purpose, state preserved.
    pub suspended: bool,
    pub screen_blanked: bool,
}

impl AdaptorState {
    fn sensor_mut(&mut self, name: &str) -> Option<&mut AdaptedSensor> {
        self.sensors.iter_mut().find(|s| s.name == name)
    }

    fn total_listeners(&self) -> usize {
        self.sensors.iter().map(|s| s.listeners).sum()
    }
}

/// Shared bookkeeping every adaptor embeds.
#[derive(Debug)]
pub struct AdaptorCore {
    id: String,
    state: Mutex<AdaptorState>,
}

impl AdaptorCore {
    pub fn new(id: impl Into<String>, interval: IntervalArbiter, data_ranges: DataRangeArbiter) -> Self {
        let current_interval = interval.evaluate();
        Self {
            id: id.into(),
            state: Mutex::new(AdaptorState {
                sensors: Vec::new(),
                interval,
                current_interval,
                overrides: StandbyOverrides::new(),
                data_ranges,
                sessions: HashSet::new(),
                running: false,
                should_run: false,
                suspended: false,
                screen_blanked: false,
            }),
        }
    }

    /// Publish a named output buffer.
    pub fn add_adapted_sensor(&self, name: &str, description: &str, buffer: AnyBuffer) {
        let mut state = self.state.lock();
        state.sensors.retain(|s| s.name != name);
        state.sensors.push(AdaptedSensor {
            name: name.to_string(),
            description: description.to_string(),
            buffer,
            listeners: 0,
        });
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, AdaptorState> {
        self.state.lock()
    }
}

/// Unified interface for hardware adaptors
///
/// Implementations must be `Send + Sync`: one instance is shared by every
/// chain that requested it, and its hardware loop runs on its own thread.
pub trait DeviceAdaptor: Send + Sync {
    /// Shared state.
    fn core(&self) -> &AdaptorCore;

    /// Power up and begin delivering samples at the current interval.
    fn start_hardware(&self) -> Result<()>;

    /// Stop delivering samples. Must be idempotent.
    fn stop_hardware(&self);

    /// Apply a newly arbitrated interval. Called with the state lock held,
    /// so it must not call back into the adaptor.
    fn apply_interval(&self, _interval_ms: u32) {}

    /// Apply a newly arbitrated data range.
    fn apply_data_range(&self, _range: &DataRange) {}

    /// One-time setup after construction. A failure destroys the instance.
    fn start_adaptor(&self) -> Result<()> {
        Ok(())
    }

    /// Teardown before destruction. Stops the hardware regardless of
    /// outstanding listeners.
    fn stop_adaptor(&self) {
        let mut state = self.core().lock();
        if state.running {
            self.stop_hardware();
        }
        for sensor in &mut state.sensors {
            sensor.listeners = 0;
        }
        state.running = false;
        state.should_run = false;
    }

    fn id(&self) -> &str {
        self.core().id()
    }

    /// Output buffer published under `name`.
    fn buffer(&self, name: &str) -> Option<AnyBuffer> {
        self.core()
            .lock()
            .sensors
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.buffer.clone())
    }

    fn sensor_names(&self) -> Vec<String> {
        self.core().lock().sensors.iter().map(|s| s.name.clone()).collect()
    }

    /// Add a listener to `name`, starting the hardware for the first one.
    ///
    /// While suspended the hardware is left off unless a standby override
    /// is active; it starts on [`DeviceAdaptor::resume`].
    fn start_sensor(&self, name: &str) -> Result<()> {
        let mut state = self.core().lock();
        let Some(sensor) = state.sensor_mut(name) else {
            tracing::warn!("Adaptor '{}': sensor '{}' not found", self.id(), name);
            return Err(HubError::unknown_id("adapted sensor", name));
        };
        sensor.listeners += 1;

        if state.running {
            return Ok(());
        }
        state.should_run = true;

        if state.suspended && !state.overrides.effective() {
            tracing::debug!("Adaptor '{}' suspended, deferring start", self.id());
            return Ok(());
        }
        state.suspended = false;

        self.apply_interval(state.current_interval.interval_ms);
        if let Err(e) = self.start_hardware() {
            tracing::warn!("Failed to start adaptor '{}': {}", self.id(), e);
            if let Some(sensor) = state.sensor_mut(name) {
                sensor.listeners -= 1;
            }
            state.should_run = state.total_listeners() > 0;
            return Err(e);
        }
        state.running = true;
        tracing::debug!("Adaptor '{}' started for '{}'", self.id(), name);
        Ok(())
    }

    /// Remove a listener from `name`, stopping the hardware after the last
    /// one. Returns `false` if there was no listener to remove.
    fn stop_sensor(&self, name: &str) -> bool {
        let mut state = self.core().lock();
        let Some(sensor) = state.sensor_mut(name) else {
            tracing::warn!("Adaptor '{}': sensor '{}' not found", self.id(), name);
            return false;
        };
        if sensor.listeners == 0 {
            return false;
        }
        sensor.listeners -= 1;

        if state.total_listeners() == 0 {
            if state.running {
                self.stop_hardware();
            }
            state.running = false;
            state.should_run = false;
            tracing::debug!("Adaptor '{}' stopped", self.id());
        }
        true
    }

    /// Enter standby. Returns `false` if already suspended or if a session
    /// holds a standby override; session and interval state are kept.
    fn standby(&self) -> bool {
        let mut state = self.core().lock();
        if state.suspended {
            return false;
        }
        if state.overrides.effective() {
            tracing::debug!("Adaptor '{}' not going to standby: override active", self.id());
            return false;
        }
        state.suspended = true;
        if state.running {
            tracing::debug!("Adaptor '{}' going to standby", self.id());
            self.stop_hardware();
            state.running = false;
        }
        true
    }

    /// Leave standby, restarting the hardware with the current arbitration
    /// if anyone is listening. Returns `false` if not suspended or the
    /// restart failed; a failed restart stays suspended so the next resume
    /// retries it.
    fn resume(&self) -> bool {
        let mut state = self.core().lock();
        if !state.suspended {
            return false;
        }
        if !state.should_run {
            state.suspended = false;
            return true;
        }
        tracing::debug!("Adaptor '{}' resuming from standby", self.id());
        self.apply_interval(state.current_interval.interval_ms);
        match self.start_hardware() {
            Ok(()) => {
                state.suspended = false;
                state.running = true;
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to resume adaptor '{}' from standby, left suspended: {}",
                    self.id(),
                    e
                );
                false
            }
        }
    }

    /// Display state hint. Blanking enters standby, unblanking resumes.
    fn set_screen_blanked(&self, blanked: bool) -> bool {
        self.core().lock().screen_blanked = blanked;
        if blanked {
            self.standby()
        } else {
            self.resume()
        }
    }

    /// Record `session`'s interval request and apply the arbitrated result.
    fn set_interval_request(&self, session: SessionId, interval_ms: u32) -> Result<IntervalDecision> {
        let mut state = self.core().lock();
        let decision = state.interval.set_request(session, interval_ms)?;
        state.sessions.insert(session);
        apply_decision(self, &mut state, decision);
        Ok(decision)
    }

    /// Request the configured default interval on behalf of `session`.
    fn request_default_interval(&self, session: SessionId) -> Result<IntervalDecision> {
        let default_ms = self.core().lock().interval.default_ms();
        self.set_interval_request(session, default_ms)
    }

    fn remove_interval_request(&self, session: SessionId) -> IntervalDecision {
        let mut state = self.core().lock();
        let decision = state.interval.remove_request(session);
        apply_decision(self, &mut state, decision);
        decision
    }

    fn interval(&self) -> IntervalDecision {
        self.core().lock().current_interval
    }

    /// Interval `session` currently asks for, if any.
    fn interval_request(&self, session: SessionId) -> Option<u32> {
        self.core().lock().interval.request_of(session)
    }

    /// Record `session`'s standby-override flag and return the effective
    /// override. Turning it on wakes a suspended adaptor; turning it off
    /// while the screen is blanked sends the adaptor back to standby.
    fn set_standby_override_request(&self, session: SessionId, enabled: bool) -> bool {
        let (effective, blanked, suspended) = {
            let mut state = self.core().lock();
            if enabled {
                state.sessions.insert(session);
            }
            let effective = state.overrides.set(session, enabled);
            (effective, state.screen_blanked, state.suspended)
        };
        tracing::debug!(
            "Session {} requested standby override for '{}': {} (effective {})",
            session,
            self.id(),
            enabled,
            effective
        );
        if effective && suspended {
            self.resume();
        } else if !effective && blanked && !suspended {
            self.standby();
        }
        effective
    }

    fn standby_override(&self) -> bool {
        self.core().lock().overrides.effective()
    }

    /// Queue a data-range request. Returns `true` if the current range changed.
    fn request_data_range(&self, session: SessionId, range: DataRange) -> bool {
        let mut state = self.core().lock();
        state.sessions.insert(session);
        let changed = state.data_ranges.request(session, range);
        if changed {
            if let Some(current) = state.data_ranges.current() {
                self.apply_data_range(&current.range);
            }
        }
        changed
    }

    fn remove_data_range_request(&self, session: SessionId) -> bool {
        let mut state = self.core().lock();
        let changed = state.data_ranges.remove(session);
        if changed {
            if let Some(current) = state.data_ranges.current() {
                self.apply_data_range(&current.range);
            }
        }
        changed
    }

    fn current_data_range(&self) -> Option<DataRangeDecision> {
        self.core().lock().data_ranges.current()
    }

    /// Forget everything `session` asked for.
    fn remove_session(&self, session: SessionId) {
        self.remove_interval_request(session);
        self.set_standby_override_request(session, false);
        self.remove_data_range_request(session);
        self.core().lock().sessions.remove(&session);
    }

    fn is_running(&self) -> bool {
        self.core().lock().running
    }

    fn is_suspended(&self) -> bool {
        self.core().lock().suspended
    }

    fn listeners(&self, name: &str) -> usize {
        self.core()
            .lock()
            .sensors
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.listeners)
            .unwrap_or(0)
    }

    fn status(&self, ref_count: usize) -> AdaptorStatus {
        let state = self.core().lock();
        AdaptorStatus {
            id: self.id().to_string(),
            ref_count,
            running: state.running,
            suspended: state.suspended,
            interval_ms: state.current_interval.interval_ms,
            interval_winner: state.current_interval.winner,
            standby_override: state.overrides.effective(),
            sessions: state.sessions.len(),
        }
    }
}

fn apply_decision<A: DeviceAdaptor + ?Sized>(
    adaptor: &A,
    state: &mut AdaptorState,
    decision: IntervalDecision,
) {
    if state.current_interval != decision {
        if let Some(winner) = decision.winner {
            tracing::debug!(
                "Setting new interval for '{}': session {} won with {} ms",
                adaptor.id(),
                winner,
                decision.interval_ms
            );
        }
        state.current_interval = decision;
        adaptor.apply_interval(decision.interval_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::arbitration::ZeroPolicy;
    use crate::pipeline::packet::TimedXyz;
    use crate::pipeline::ring_buffer::RingBuffer;
    use crate::types::IntervalRange;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    struct FakeAdaptor {
        core: AdaptorCore,
        starts: AtomicUsize,
        stops: AtomicUsize,
        interval: AtomicU32,
        fail_start: AtomicBool,
    }

    impl FakeAdaptor {
        fn new() -> Self {
            let interval = IntervalArbiter::new(
                "fake",
                100,
                vec![IntervalRange::new(0, 1000)],
                ZeroPolicy::UseDefault,
            )
            .unwrap();
            let core = AdaptorCore::new("fake", interval, DataRangeArbiter::default());
            core.add_adapted_sensor(
                "accelerometer",
                "test output",
                AnyBuffer::new(RingBuffer::<TimedXyz>::new(4)),
            );
            Self {
                core,
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                interval: AtomicU32::new(0),
                fail_start: AtomicBool::new(false),
            }
        }
    }

    impl DeviceAdaptor for FakeAdaptor {
        fn core(&self) -> &AdaptorCore {
            &self.core
        }

        fn start_hardware(&self) -> Result<()> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(HubError::Device("no device".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop_hardware(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn apply_interval(&self, interval_ms: u32) {
            self.interval.store(interval_ms, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_listener_counting() {
        let a = FakeAdaptor::new();
        a.start_sensor("accelerometer").unwrap();
        a.start_sensor("accelerometer").unwrap();
        assert_eq!(a.starts.load(Ordering::SeqCst), 1);
        assert_eq!(a.listeners("accelerometer"), 2);

        assert!(a.stop_sensor("accelerometer"));
        assert!(a.is_running());
        assert!(a.stop_sensor("accelerometer"));
        assert!(!a.is_running());
        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
        assert!(!a.stop_sensor("accelerometer"));
    }

    #[test]
    fn test_unknown_sensor() {
        let a = FakeAdaptor::new();
        assert!(a.start_sensor("gyroscope").is_err());
        assert!(!a.stop_sensor("gyroscope"));
        assert!(a.buffer("gyroscope").is_none());
        assert!(a.buffer("accelerometer").is_some());
    }

    #[test]
    fn test_failed_start_rolls_back_listener() {
        let a = FakeAdaptor::new();
        a.fail_start.store(true, Ordering::SeqCst);
        assert!(a.start_sensor("accelerometer").is_err());
        assert_eq!(a.listeners("accelerometer"), 0);
        assert!(!a.is_running());
    }

    #[test]
    fn test_standby_and_resume() {
        let a = FakeAdaptor::new();
        a.start_sensor("accelerometer").unwrap();

        assert!(!a.resume());
        assert!(a.standby());
        assert!(!a.is_running());
        assert!(!a.standby());

        assert!(a.resume());
        assert!(a.is_running());
        assert_eq!(a.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_resume_stays_suspended() {
        let a = FakeAdaptor::new();
        a.start_sensor("accelerometer").unwrap();
        assert!(a.standby());

        a.fail_start.store(true, Ordering::SeqCst);
        assert!(!a.resume());
        assert!(a.is_suspended());
        assert!(!a.is_running());

        // The next resume retries the hardware.
        a.fail_start.store(false, Ordering::SeqCst);
        assert!(a.resume());
        assert!(!a.is_suspended());
        assert!(a.is_running());
        assert_eq!(a.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_override_blocks_standby() {
        let a = FakeAdaptor::new();
        a.start_sensor("accelerometer").unwrap();
        a.set_standby_override_request(SessionId(1), true);
        assert!(!a.standby());
        assert!(a.is_running());

        // Override dropped while blanked: back to standby.
        a.set_screen_blanked(true);
        a.set_standby_override_request(SessionId(1), false);
        assert!(a.is_suspended());
        assert!(!a.is_running());
    }

    #[test]
    fn test_override_wakes_suspended_adaptor() {
        let a = FakeAdaptor::new();
        a.start_sensor("accelerometer").unwrap();
        assert!(a.set_screen_blanked(true));
        assert!(!a.is_running());

        a.set_standby_override_request(SessionId(2), true);
        assert!(a.is_running());
        assert!(!a.is_suspended());
    }

    #[test]
    fn test_start_while_suspended_is_deferred() {
        let a = FakeAdaptor::new();
        assert!(a.standby());
        a.start_sensor("accelerometer").unwrap();
        assert!(!a.is_running());
        assert!(a.resume());
        assert!(a.is_running());
    }

    #[test]
    fn test_interval_applied_to_hardware() {
        let a = FakeAdaptor::new();
        a.set_interval_request(SessionId(1), 100).unwrap();
        let d = a.set_interval_request(SessionId(2), 0).unwrap();
        assert_eq!(d.interval_ms, 100);
        assert_eq!(d.winner, Some(SessionId(1)));
        assert_eq!(a.interval.load(Ordering::SeqCst), 100);

        a.set_interval_request(SessionId(2), 20).unwrap();
        assert_eq!(a.interval.load(Ordering::SeqCst), 20);
        a.remove_session(SessionId(2));
        assert_eq!(a.interval().interval_ms, 100);

        assert!(a.set_interval_request(SessionId(3), 5000).is_err());
        assert_eq!(a.interval().interval_ms, 100);
    }

    #[test]
    fn test_stop_adaptor_clears_listeners() {
        let a = FakeAdaptor::new();
        a.start_sensor("accelerometer").unwrap();
        a.start_sensor("accelerometer").unwrap();
        a.stop_adaptor();
        assert_eq!(a.listeners("accelerometer"), 0);
        assert!(!a.is_running());
        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
    }
}
