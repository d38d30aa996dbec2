//! Rotates three-axis samples into the device frame.
//!
//! Each output axis is the dot product of one matrix row with the input
//! vector. The matrix comes from the `acc_trans_matrix` setting or the
//! `"matrix"` property; it defaults to identity.

use crate::pipeline::filter::FilterLogic;
use crate::pipeline::packet::{ConfigValue, TimedXyz};

pub type Matrix3 = [[i32; 3]; 3];

pub const IDENTITY: Matrix3 = [[1, 0, 0], [0, 1, 0], [0, 0, 1]];

pub struct CoordinateAlign {
    matrix: Matrix3,
}

impl CoordinateAlign {
    pub fn new(matrix: Matrix3) -> Self {
        Self { matrix }
    }

    /// Build from nine row-major values. Returns `None` for any other length.
    pub fn from_slice(values: &[i32]) -> Option<Self> {
        if values.len() != 9 {
            return None;
        }
        let mut matrix = [[0; 3]; 3];
        for (i, v) in values.iter().enumerate() {
            matrix[i / 3][i % 3] = *v;
        }
        Some(Self::new(matrix))
    }

    pub fn matrix(&self) -> &Matrix3 {
        &self.matrix
    }

    fn align(&self, s: &TimedXyz) -> TimedXyz {
        // Summed in i64, saturated back to the sample range.
        let row = |r: &[i32; 3]| -> i32 {
            let v = i64::from(r[0]) * i64::from(s.x)
                + i64::from(r[1]) * i64::from(s.y)
                + i64::from(r[2]) * i64::from(s.z);
            v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
        };
        TimedXyz {
            timestamp_us: s.timestamp_us,
            x: row(&self.matrix[0]),
            y: row(&self.matrix[1]),
            z: row(&self.matrix[2]),
        }
    }
}

impl Default for CoordinateAlign {
    fn default() -> Self {
        Self::new(IDENTITY)
    }
}

impl FilterLogic<TimedXyz, TimedXyz> for CoordinateAlign {
    fn name(&self) -> &str {
        "coordinatealignfilter"
    }

    fn on_data(&mut self, input: &[TimedXyz], output: &mut Vec<TimedXyz>) {
        output.extend(input.iter().map(|s| self.align(s)));
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) {
        if key == "matrix" {
            match value.as_matrix() {
                Some(m) => self.matrix = m,
                None => tracing::warn!("coordinatealignfilter: 'matrix' expects a 3x3 matrix"),
            }
        }
    }
}
