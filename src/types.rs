//! Core data types for the sensor hub
//!
//! This module contains the small value types shared between the resource
//! manager, the arbitration logic and the client-facing surface.
//!
//! # Main Types
//!
//! - [`SessionId`] - Client handle against one logical sensor
//! - [`IntervalRange`] - Allowed polling interval span declared by an adaptor
//! - [`DataRange`] - Measurement range / resolution pair
//! - [`SensorFrame`] - One sample addressed to one session
//! - [`HubStatus`] - Serializable snapshot of every live instance

use crate::pipeline::packet::SamplePayload;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client session handle. Allocated from 1 upwards; never reused while the
/// process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Never handed out to a client.
    pub const INVALID: SessionId = SessionId(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Inclusive interval span in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalRange {
    pub min: u32,
    pub max: u32,
}

impl IntervalRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, value: u32) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Measurement range and resolution in sensor units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataRange {
    pub min: f64,
    pub max: f64,
    pub resolution: f64,
}

impl DataRange {
    pub const fn new(min: f64, max: f64, resolution: f64) -> Self {
        Self {
            min,
            max,
            resolution,
        }
    }
}

impl Default for DataRange {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// A sample addressed to one client session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorFrame {
    pub session: SessionId,
    pub sensor: String,
    pub payload: SamplePayload,
}

/// Snapshot of one live adaptor.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptorStatus {
    pub id: String,
    pub ref_count: usize,
    pub running: bool,
    pub suspended: bool,
    pub interval_ms: u32,
    pub interval_winner: Option<SessionId>,
    pub standby_override: bool,
    pub sessions: usize,
}

/// Snapshot of one live chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainStatus {
    pub id: String,
    pub ref_count: usize,
    pub running: bool,
    pub outputs: Vec<String>,
}

/// Snapshot of one live sensor channel.
#[derive(Debug, Clone, Serialize)]
pub struct SensorStatus {
    pub id: String,
    pub ref_count: usize,
    pub running: bool,
    pub sessions: Vec<SessionId>,
    pub active_sessions: Vec<SessionId>,
}

/// Everything the manager currently holds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStatus {
    pub adaptors: Vec<AdaptorStatus>,
    pub chains: Vec<ChainStatus>,
    pub sensors: Vec<SensorStatus>,
    pub loaded_plugins: Vec<String>,
    pub display_on: bool,
}
