//! Simulated accelerometer hardware.
//!
//! Generates three-axis samples from a fixed pattern. Used by the built-in
//! accelerometer adaptor when no real device is present, and by tests.

use crate::error::{HubError, Result};
use crate::hub::polling::{monotonic_us, SampleSource};
use crate::pipeline::packet::TimedXyz;
use serde::{Deserialize, Serialize};

/// One g in device units (mg).
pub const ONE_G: i32 = 1000;

/// Sample pattern of a [`SimulatedSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum SimulatedPattern {
    /// Device lying still at the given attitude.
    Still { x: i32, y: i32, z: i32 },
    /// Gravity vector rotating around the z axis, one turn per `period` samples.
    Rotate { period: u32 },
    /// Cycle through fixed vectors.
    Sequence { values: Vec<[i32; 3]> },
}

impl Default for SimulatedPattern {
    fn default() -> Self {
        SimulatedPattern::Still {
            x: 0,
            y: 0,
            z: -ONE_G,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedSource {
    pattern: SimulatedPattern,
    step: u64,
    open: bool,
}

impl SimulatedSource {
    pub fn new(pattern: SimulatedPattern) -> Self {
        Self {
            pattern,
            step: 0,
            open: false,
        }
    }

    pub fn pattern(&self) -> &SimulatedPattern {
        &self.pattern
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Samples produced since construction.
    pub fn steps(&self) -> u64 {
        self.step
    }

    fn vector(&self) -> Option<[i32; 3]> {
        match &self.pattern {
            SimulatedPattern::Still { x, y, z } => Some([*x, *y, *z]),
            SimulatedPattern::Rotate { period } => {
                let period = u64::from((*period).max(1));
                let phase = (self.step % period) as f64 / period as f64;
                let angle = phase * std::f64::consts::TAU;
                let g = f64::from(ONE_G);
                Some([
                    (angle.cos() * g).round() as i32,
                    (angle.sin() * g).round() as i32,
                    0,
                ])
            }
            SimulatedPattern::Sequence { values } => {
                if values.is_empty() {
                    return None;
                }
                Some(values[(self.step % values.len() as u64) as usize])
            }
        }
    }
}

impl SampleSource for SimulatedSource {
    type Sample = TimedXyz;

    fn open(&mut self) -> Result<()> {
        if let SimulatedPattern::Sequence { values } = &self.pattern {
            if values.is_empty() {
                return Err(HubError::Device("empty simulated sequence".into()));
            }
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read_sample(&mut self) -> Result<Option<TimedXyz>> {
        if !self.open {
            return Err(HubError::Device("simulated source not open".into()));
        }
        let Some([x, y, z]) = self.vector() else {
            return Ok(None);
        };
        self.step += 1;
        Ok(Some(TimedXyz::new(monotonic_us(), x, y, z)))
    }
}
