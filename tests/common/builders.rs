//! Test data builders for adaptors and arbiters

use sensorhub_rs::hub::{
    DataRangeArbiter, IntervalArbiter, PollingAdaptor, SampleSource, ZeroPolicy,
};
use sensorhub_rs::types::{DataRange, IntervalRange};

/// Builder for polling adaptors over an arbitrary sample source
pub struct AdaptorBuilder {
    id: String,
    output: String,
    capacity: usize,
    default_ms: u32,
    ranges: Vec<IntervalRange>,
    zero_policy: ZeroPolicy,
    data_ranges: Vec<DataRange>,
}

impl AdaptorBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            output: "accelerometer".to_string(),
            capacity: 4,
            default_ms: 10,
            ranges: Vec::new(),
            zero_policy: ZeroPolicy::UseDefault,
            data_ranges: Vec::new(),
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn default_interval(mut self, ms: u32) -> Self {
        self.default_ms = ms;
        self
    }

    pub fn allowed(mut self, min: u32, max: u32) -> Self {
        self.ranges.push(IntervalRange::new(min, max));
        self
    }

    pub fn zero_is_slowest(mut self) -> Self {
        self.zero_policy = ZeroPolicy::Slowest;
        self
    }

    pub fn data_range(mut self, range: DataRange) -> Self {
        self.data_ranges.push(range);
        self
    }

    pub fn build<S: SampleSource>(self, source: S) -> PollingAdaptor<S> {
        let interval =
            IntervalArbiter::new(&self.id, self.default_ms, self.ranges, self.zero_policy)
                .expect("valid default interval");
        PollingAdaptor::new(
            &self.id,
            &self.output,
            "test adaptor",
            source,
            self.capacity,
            interval,
            DataRangeArbiter::new(self.data_ranges),
        )
    }
}
