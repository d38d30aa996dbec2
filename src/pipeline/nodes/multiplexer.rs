//! Fuses acceleration, magnetic field and angular rate.
//!
//! The three inputs arrive on independent ports with no ordering between
//! them. The latest sample of each is held until all three are present;
//! the one that completes the set triggers a [`FusedXyz`] and clears the
//! held samples. A newer sample on an input that is already held replaces
//! the older one.

use crate::pipeline::filter::Filter;
use crate::pipeline::packet::{FusedXyz, TimedXyz};
use crate::pipeline::port::{Consumer, Producer, SinkHandle, SinkPort, Source, SourcePort};
use crate::pipeline::reader::SOURCE_PORT;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub const ACCELEROMETER_PORT: &str = "accelerometer";
pub const MAGNETOMETER_PORT: &str = "magnetometer";
pub const GYROSCOPE_PORT: &str = "gyroscope";

#[derive(Clone, Copy)]
enum Input {
    Acceleration = 0,
    Magnetic = 1,
    AngularRate = 2,
}

#[derive(Default)]
struct Held {
    samples: [Option<TimedXyz>; 3],
}

pub struct XyzMultiplexer {
    acceleration: SinkHandle<TimedXyz>,
    magnetic: SinkHandle<TimedXyz>,
    angular_rate: SinkHandle<TimedXyz>,
    source: Source<FusedXyz>,
    held: Mutex<Held>,
}

impl XyzMultiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let sink = |name, input| {
                let this = this.clone();
                SinkHandle::new(name, move |values: &[TimedXyz]| {
                    if let Some(mux) = this.upgrade() {
                        mux.collect(input, values);
                    }
                })
            };
            Self {
                acceleration: sink(ACCELEROMETER_PORT, Input::Acceleration),
                magnetic: sink(MAGNETOMETER_PORT, Input::Magnetic),
                angular_rate: sink(GYROSCOPE_PORT, Input::AngularRate),
                source: Source::new(SOURCE_PORT),
                held: Mutex::new(Held::default()),
            }
        })
    }

    pub fn source_port(&self) -> &Source<FusedXyz> {
        &self.source
    }

    pub fn acceleration_sink(&self) -> &SinkHandle<TimedXyz> {
        &self.acceleration
    }

    pub fn magnetic_sink(&self) -> &SinkHandle<TimedXyz> {
        &self.magnetic
    }

    pub fn angular_rate_sink(&self) -> &SinkHandle<TimedXyz> {
        &self.angular_rate
    }

    fn collect(&self, input: Input, values: &[TimedXyz]) {
        let mut held = self.held.lock();
        let mut fused = Vec::new();
        for value in values {
            held.samples[input as usize] = Some(*value);
            if let [Some(acc), Some(mag), Some(gyr)] = held.samples {
                fused.push(FusedXyz {
                    timestamp_us: value.timestamp_us,
                    acceleration: acc,
                    magnetic: mag,
                    angular_rate: gyr,
                });
                held.samples = [None; 3];
            }
        }
        if !fused.is_empty() {
            tracing::trace!("Multiplexer emitting {} fused samples", fused.len());
            self.source.propagate(&fused);
        }
    }
}

impl Producer for XyzMultiplexer {
    fn source(&self, name: &str) -> Option<&dyn SourcePort> {
        (name == SOURCE_PORT).then_some(&self.source as &dyn SourcePort)
    }

    fn source_names(&self) -> Vec<&'static str> {
        vec![SOURCE_PORT]
    }
}

impl Consumer for XyzMultiplexer {
    fn sink(&self, name: &str) -> Option<&dyn SinkPort> {
        match name {
            ACCELEROMETER_PORT => Some(&self.acceleration),
            MAGNETOMETER_PORT => Some(&self.magnetic),
            GYROSCOPE_PORT => Some(&self.angular_rate),
            _ => None,
        }
    }

    fn sink_names(&self) -> Vec<&'static str> {
        vec![ACCELEROMETER_PORT, MAGNETOMETER_PORT, GYROSCOPE_PORT]
    }
}

impl Filter for XyzMultiplexer {
    fn name(&self) -> &str {
        "xyzmultiplexer"
    }

    fn reset(&self) {
        *self.held.lock() = Held::default();
    }
}
