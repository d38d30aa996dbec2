//! Payload records that flow through ports and ring buffers.
//!
//! The set of payload types is closed: every record implements the sealed
//! [`Payload`] trait, which ties it to exactly one [`PayloadKind`] tag. Port
//! joins compare tags, so a source can never be wired to a sink of a
//! different record type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime tag of a payload type. One variant per record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// Three-axis timestamped sample (acceleration, magnetic field, angular rate).
    TimedXyz,
    /// Single unsigned timestamped value (ambient light, proximity).
    TimedUnsigned,
    /// Device posture classification.
    Pose,
    /// Combined acceleration + magnetic + angular-rate record.
    FusedXyz,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadKind::TimedXyz => "TimedXyz",
            PayloadKind::TimedUnsigned => "TimedUnsigned",
            PayloadKind::Pose => "Pose",
            PayloadKind::FusedXyz => "FusedXyz",
        };
        f.write_str(name)
    }
}

mod private {
    pub trait Sealed {}
}

/// A record type that may travel through the pipeline.
///
/// Sealed: only the record types in this module implement it.
pub trait Payload: private::Sealed + Clone + Default + Send + Sync + 'static {
    const KIND: PayloadKind;

    /// Timestamp in microseconds (monotonic, producer-defined epoch).
    fn timestamp_us(&self) -> u64;

    /// Wrap into the closed payload enum used at the client boundary.
    fn into_payload(self) -> SamplePayload;
}

/// Timestamped three-axis sample in device units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedXyz {
    pub timestamp_us: u64,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl TimedXyz {
    pub fn new(timestamp_us: u64, x: i32, y: i32, z: i32) -> Self {
        Self {
            timestamp_us,
            x,
            y,
            z,
        }
    }
}

/// Timestamped scalar sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedUnsigned {
    pub timestamp_us: u64,
    pub value: u32,
}

/// Coarse device posture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Undefined,
    LeftUp,
    RightUp,
    BottomUp,
    BottomDown,
    FaceDown,
    FaceUp,
}

/// Timestamped posture classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pose {
    pub timestamp_us: u64,
    pub orientation: Orientation,
}

/// One sample from each of the three motion sensors, aligned in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusedXyz {
    pub timestamp_us: u64,
    pub acceleration: TimedXyz,
    pub magnetic: TimedXyz,
    pub angular_rate: TimedXyz,
}

/// Closed union of every payload type, used where records leave the
/// typed pipeline (client frames, diagnostics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum SamplePayload {
    TimedXyz(TimedXyz),
    TimedUnsigned(TimedUnsigned),
    Pose(Pose),
    FusedXyz(FusedXyz),
}

impl SamplePayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            SamplePayload::TimedXyz(_) => PayloadKind::TimedXyz,
            SamplePayload::TimedUnsigned(_) => PayloadKind::TimedUnsigned,
            SamplePayload::Pose(_) => PayloadKind::Pose,
            SamplePayload::FusedXyz(_) => PayloadKind::FusedXyz,
        }
    }

    pub fn timestamp_us(&self) -> u64 {
        match self {
            SamplePayload::TimedXyz(p) => p.timestamp_us,
            SamplePayload::TimedUnsigned(p) => p.timestamp_us,
            SamplePayload::Pose(p) => p.timestamp_us,
            SamplePayload::FusedXyz(p) => p.timestamp_us,
        }
    }
}

macro_rules! impl_payload {
    ($ty:ident) => {
        impl private::Sealed for $ty {}

        impl Payload for $ty {
            const KIND: PayloadKind = PayloadKind::$ty;

            #[inline]
            fn timestamp_us(&self) -> u64 {
                self.timestamp_us
            }

            fn into_payload(self) -> SamplePayload {
                SamplePayload::$ty(self)
            }
        }
    };
}

impl_payload!(TimedXyz);
impl_payload!(TimedUnsigned);
impl_payload!(Pose);
impl_payload!(FusedXyz);

/// Property values that can be sent to configurable components.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Matrix([[i32; 3]; 3]),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<[[i32; 3]; 3]> {
        match self {
            ConfigValue::Matrix(m) => Some(*m),
            _ => None,
        }
    }
}
