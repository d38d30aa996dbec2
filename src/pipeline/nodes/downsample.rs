//! Averages every `buffer_size` samples into one.
//!
//! Samples older than `timeout` relative to the newest one are discarded
//! before averaging, so a stalled stream does not blend stale readings into
//! the next output.

use crate::pipeline::filter::FilterLogic;
use crate::pipeline::packet::{ConfigValue, TimedXyz};
use std::collections::VecDeque;

pub struct Downsample {
    buffer_size: usize,
    /// Maximum sample age in microseconds. `None` disables ageing.
    timeout_us: Option<u64>,
    pending: VecDeque<TimedXyz>,
}

impl Downsample {
    pub fn new(buffer_size: usize, timeout_ms: Option<u64>) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            timeout_us: timeout_ms.map(|ms| ms.saturating_mul(1000)),
            pending: VecDeque::new(),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_us.map(|us| us / 1000)
    }

    fn push(&mut self, sample: &TimedXyz) -> Option<TimedXyz> {
        self.pending.push_back(*sample);

        while let Some(front) = self.pending.front() {
            let too_many = self.pending.len() > self.buffer_size;
            let too_old = self
                .timeout_us
                .is_some_and(|t| sample.timestamp_us.saturating_sub(front.timestamp_us) > t);
            if too_many || too_old {
                self.pending.pop_front();
            } else {
                break;
            }
        }

        if self.pending.len() < self.buffer_size {
            return None;
        }

        let count = self.pending.len() as i64;
        let (x, y, z) = self.pending.iter().fold((0i64, 0i64, 0i64), |(x, y, z), s| {
            (x + s.x as i64, y + s.y as i64, z + s.z as i64)
        });
        self.pending.clear();

        let out = TimedXyz::new(
            sample.timestamp_us,
            (x / count) as i32,
            (y / count) as i32,
            (z / count) as i32,
        );
        tracing::trace!("Downsampled: {}, {}, {}", out.x, out.y, out.z);
        Some(out)
    }
}

impl Default for Downsample {
    fn default() -> Self {
        Self::new(1, None)
    }
}

impl FilterLogic<TimedXyz, TimedXyz> for Downsample {
    fn name(&self) -> &str {
        "downsamplefilter"
    }

    fn on_data(&mut self, input: &[TimedXyz], output: &mut Vec<TimedXyz>) {
        for sample in input {
            if let Some(out) = self.push(sample) {
                output.push(out);
            }
        }
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) {
        match key {
            "buffer_size" => {
                if let Some(n) = value.as_int() {
                    self.buffer_size = n.max(1) as usize;
                    tracing::debug!("Downsample buffer size = {}", self.buffer_size);
                }
            }
            "timeout_ms" => {
                if let Some(ms) = value.as_int() {
                    self.timeout_us = (ms > 0).then(|| (ms as u64).saturating_mul(1000));
                    tracing::debug!("Downsample timeout = {} ms", ms);
                }
            }
            _ => {}
        }
    }

    fn on_reset(&mut self) {
        self.pending.clear();
    }
}
