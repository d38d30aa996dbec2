//! Per-instance settings nested in the hub configuration
//!
//! # Main Types
//!
//! - [`AdaptorSettings`] - Type, interval policy and data ranges of one adaptor
//! - [`TransformSettings`] - Device mounting transforms (`acc_trans_matrix`)

use crate::error::{HubError, Result};
use crate::hub::arbitration::{DataRangeArbiter, IntervalArbiter, ZeroPolicy};
use crate::hub::simulated::SimulatedPattern;
use crate::pipeline::nodes::{CoordinateAlign, Matrix3, IDENTITY};
use crate::types::{DataRange, IntervalRange};
use serde::{Deserialize, Serialize};

/// Default interval for adaptors without explicit settings
pub const DEFAULT_INTERVAL_MS: u32 = 100;

/// Settings for one adaptor instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptorSettings {
    /// Factory type building this adaptor
    #[serde(rename = "type")]
    pub type_name: String,

    /// Interval used when no session asked for one
    pub default_interval_ms: u32,

    /// Allowed interval spans as `[min, max]` pairs; empty allows everything
    pub intervals: Vec<[u32; 2]>,

    /// Treat an all-zero request set as "slowest" instead of the default
    pub zero_is_slowest: bool,

    /// Selectable measurement ranges, first one is the default
    pub data_ranges: Vec<DataRange>,

    /// Pattern for simulated hardware
    pub pattern: Option<SimulatedPattern>,
}

impl Default for AdaptorSettings {
    fn default() -> Self {
        Self {
            type_name: String::new(),
            default_interval_ms: DEFAULT_INTERVAL_MS,
            intervals: Vec::new(),
            zero_is_slowest: false,
            data_ranges: Vec::new(),
            pattern: None,
        }
    }
}

impl AdaptorSettings {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn interval_ranges(&self) -> Vec<IntervalRange> {
        self.intervals
            .iter()
            .map(|[min, max]| IntervalRange::new(*min, *max))
            .collect()
    }

    /// Build the interval arbiter for adaptor `id`.
    ///
    /// Fails with [`HubError::InvalidInterval`] if the default interval is
    /// outside every declared range, and with [`HubError::Config`] if a
    /// range has `min > max`.
    pub fn interval_arbiter(&self, id: &str) -> Result<IntervalArbiter> {
        if let Some([min, max]) = self.intervals.iter().find(|[min, max]| min > max) {
            return Err(HubError::Config(format!(
                "Adaptor '{}': interval range [{}, {}] is empty",
                id, min, max
            )));
        }
        let policy = if self.zero_is_slowest {
            ZeroPolicy::Slowest
        } else {
            ZeroPolicy::UseDefault
        };
        IntervalArbiter::new(id, self.default_interval_ms, self.interval_ranges(), policy)
    }

    pub fn data_range_arbiter(&self) -> DataRangeArbiter {
        DataRangeArbiter::new(self.data_ranges.clone())
    }
}

/// Mounting transforms of the device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSettings {
    /// Accelerometer alignment, nine row-major integers
    pub acc_trans_matrix: Option<Vec<i32>>,
}

impl TransformSettings {
    /// The accelerometer matrix, or identity if unset. A malformed matrix is
    /// logged and ignored.
    pub fn accelerometer_matrix(&self) -> Matrix3 {
        let Some(values) = &self.acc_trans_matrix else {
            return IDENTITY;
        };
        match CoordinateAlign::from_slice(values) {
            Some(align) => *align.matrix(),
            None => {
                tracing::warn!(
                    "acc_trans_matrix needs 9 values, got {}; using identity",
                    values.len()
                );
                IDENTITY
            }
        }
    }
}
