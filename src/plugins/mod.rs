//! Built-in plugins.
//!
//! | Plugin | Registers | Depends on |
//! |---|---|---|
//! | `accelerometeradaptor` | adaptor `accelerometeradaptor` (simulated hardware) | |
//! | `coordinatealignfilter` | filter type `coordinatealignfilter` | |
//! | `downsamplefilter` | filter type `downsamplefilter` | |
//! | `xyzmultiplexer` | filter type `xyzmultiplexer` | |
//! | `accelerometerchain` | chain `accelerometerchain` | adaptor, coordinate alignment |
//! | `smoothaccelerometerchain` | chain `smoothaccelerometerchain` | accelerometer chain, downsampling |
//! | `accelerometersensor` | sensor `accelerometersensor` | accelerometer chain |
//! | `smoothaccelerometersensor` | sensor `smoothaccelerometersensor` | smooth chain |
//!
//! The adaptor's interval policy, data ranges and simulated pattern come
//! from `[adaptors.accelerometeradaptor]` in the config; the alignment
//! matrix from `transforms.acc_trans_matrix`.

use crate::error::Result;
use crate::hub::adaptor::DeviceAdaptor;
use crate::hub::chain::{Chain, ChainBuilder, ChainInput};
use crate::hub::loader::Plugin;
use crate::hub::manager::SensorManager;
use crate::hub::polling::PollingAdaptor;
use crate::hub::sensor::SensorChannel;
use crate::hub::simulated::SimulatedSource;
use crate::pipeline::filter::{Filter, TransformFilter};
use crate::pipeline::nodes::{CoordinateAlign, Downsample, XyzMultiplexer};
use crate::pipeline::packet::{ConfigValue, TimedXyz};
use std::sync::Arc;

pub const ACCELEROMETER_ADAPTOR: &str = "accelerometeradaptor";
pub const COORDINATE_ALIGN_FILTER: &str = "coordinatealignfilter";
pub const DOWNSAMPLE_FILTER: &str = "downsamplefilter";
pub const XYZ_MULTIPLEXER: &str = "xyzmultiplexer";
pub const ACCELEROMETER_CHAIN: &str = "accelerometerchain";
pub const SMOOTH_ACCELEROMETER_CHAIN: &str = "smoothaccelerometerchain";
pub const ACCELEROMETER_SENSOR: &str = "accelerometersensor";
pub const SMOOTH_ACCELEROMETER_SENSOR: &str = "smoothaccelerometersensor";

/// Name of the accelerometer output on adaptors, chains and sensors.
pub const ACCELEROMETER_OUTPUT: &str = "accelerometer";

/// Samples averaged per output by the smooth chain.
const SMOOTH_WINDOW: usize = 4;

/// Plugin described by a name, dependencies and a registration function.
pub struct BuiltinPlugin {
    name: &'static str,
    dependencies: &'static [&'static str],
    register: fn(&SensorManager),
}

impl Plugin for BuiltinPlugin {
    fn name(&self) -> &str {
        self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.iter().map(|d| d.to_string()).collect()
    }

    fn register(&self, manager: &SensorManager) {
        (self.register)(manager)
    }
}

/// Every built-in plugin.
pub fn builtin() -> Vec<BuiltinPlugin> {
    vec![
        BuiltinPlugin {
            name: ACCELEROMETER_ADAPTOR,
            dependencies: &[],
            register: register_accelerometer_adaptor,
        },
        BuiltinPlugin {
            name: COORDINATE_ALIGN_FILTER,
            dependencies: &[],
            register: |m| {
                m.register_filter_type(COORDINATE_ALIGN_FILTER, |_, m| {
                    let matrix = m.config().transforms.accelerometer_matrix();
                    Ok(TransformFilter::new(CoordinateAlign::new(matrix)) as Arc<dyn Filter>)
                });
            },
        },
        BuiltinPlugin {
            name: DOWNSAMPLE_FILTER,
            dependencies: &[],
            register: |m| {
                m.register_filter_type(DOWNSAMPLE_FILTER, |_, _| {
                    Ok(TransformFilter::new(Downsample::default()) as Arc<dyn Filter>)
                });
            },
        },
        BuiltinPlugin {
            name: XYZ_MULTIPLEXER,
            dependencies: &[],
            register: |m| {
                m.register_filter_type(XYZ_MULTIPLEXER, |_, _| {
                    Ok(XyzMultiplexer::new() as Arc<dyn Filter>)
                });
            },
        },
        BuiltinPlugin {
            name: ACCELEROMETER_CHAIN,
            dependencies: &[ACCELEROMETER_ADAPTOR, COORDINATE_ALIGN_FILTER],
            register: |m| {
                m.register_chain_type(ACCELEROMETER_CHAIN, build_accelerometer_chain);
                m.register_chain(ACCELEROMETER_CHAIN, ACCELEROMETER_CHAIN);
            },
        },
        BuiltinPlugin {
            name: SMOOTH_ACCELEROMETER_CHAIN,
            dependencies: &[ACCELEROMETER_CHAIN, DOWNSAMPLE_FILTER],
            register: |m| {
                m.register_chain_type(SMOOTH_ACCELEROMETER_CHAIN, build_smooth_chain);
                m.register_chain(SMOOTH_ACCELEROMETER_CHAIN, SMOOTH_ACCELEROMETER_CHAIN);
            },
        },
        BuiltinPlugin {
            name: ACCELEROMETER_SENSOR,
            dependencies: &[ACCELEROMETER_CHAIN],
            register: |m| {
                m.register_sensor_type(ACCELEROMETER_SENSOR, |id, m| {
                    build_sensor(id, m, ACCELEROMETER_CHAIN)
                });
                m.register_sensor(ACCELEROMETER_SENSOR, ACCELEROMETER_SENSOR);
            },
        },
        BuiltinPlugin {
            name: SMOOTH_ACCELEROMETER_SENSOR,
            dependencies: &[SMOOTH_ACCELEROMETER_CHAIN],
            register: |m| {
                m.register_sensor_type(SMOOTH_ACCELEROMETER_SENSOR, |id, m| {
                    build_sensor(id, m, SMOOTH_ACCELEROMETER_CHAIN)
                });
                m.register_sensor(SMOOTH_ACCELEROMETER_SENSOR, SMOOTH_ACCELEROMETER_SENSOR);
            },
        },
    ]
}

/// Add every built-in plugin to the manager's catalogue.
pub fn install_builtin(manager: &SensorManager) {
    for plugin in builtin() {
        manager.loader().add(Arc::new(plugin));
    }
}

fn register_accelerometer_adaptor(manager: &SensorManager) {
    manager.register_adaptor_type(ACCELEROMETER_ADAPTOR, |id, m| {
        let settings = m.adaptor_settings(id);
        let source = SimulatedSource::new(settings.pattern.clone().unwrap_or_default());
        let adaptor = PollingAdaptor::new(
            id,
            ACCELEROMETER_OUTPUT,
            "simulated accelerometer",
            source,
            m.config().buffer_capacity,
            settings.interval_arbiter(id)?,
            settings.data_range_arbiter(),
        );
        Ok(Arc::new(adaptor) as Arc<dyn DeviceAdaptor>)
    });
    manager.register_adaptor(ACCELEROMETER_ADAPTOR, ACCELEROMETER_ADAPTOR);
}

fn build_accelerometer_chain(id: &str, m: &SensorManager) -> Result<Arc<Chain>> {
    let input = ChainInput::Adaptor {
        adaptor: m.request_adaptor(ACCELEROMETER_ADAPTOR)?,
        sensor: ACCELEROMETER_OUTPUT.to_string(),
    };
    let align = m.instantiate_filter(COORDINATE_ALIGN_FILTER)?;
    let capacity = m.config().buffer_capacity;
    let chain = ChainBuilder::new(id, input)
        .reader::<TimedXyz>("reader", m.config().reader_chunk)?
        .filter("coordinatealign", align)?
        .output::<TimedXyz>(ACCELEROMETER_OUTPUT, "aligned acceleration", capacity)?
        .join("reader", "source", "coordinatealign", "sink")?
        .join("coordinatealign", "source", ACCELEROMETER_OUTPUT, "sink")?
        .build();
    Ok(Arc::new(chain))
}

fn build_smooth_chain(id: &str, m: &SensorManager) -> Result<Arc<Chain>> {
    let input = ChainInput::Chain {
        chain: m.request_chain(ACCELEROMETER_CHAIN)?,
        output: ACCELEROMETER_OUTPUT.to_string(),
    };
    let downsample = m.instantiate_filter(DOWNSAMPLE_FILTER)?;
    downsample.set_property("buffer_size", &ConfigValue::Int(SMOOTH_WINDOW as i64));
    let capacity = m.config().buffer_capacity;
    let chain = ChainBuilder::new(id, input)
        .reader::<TimedXyz>("reader", m.config().reader_chunk)?
        .filter("downsample", downsample)?
        .output::<TimedXyz>(ACCELEROMETER_OUTPUT, "averaged acceleration", capacity)?
        .join("reader", "source", "downsample", "sink")?
        .join("downsample", "source", ACCELEROMETER_OUTPUT, "sink")?
        .build();
    Ok(Arc::new(chain))
}

fn build_sensor(id: &str, m: &SensorManager, chain: &str) -> Result<Arc<SensorChannel>> {
    let chain = m.request_chain(chain)?;
    let channel = SensorChannel::new::<TimedXyz>(
        id,
        chain,
        ACCELEROMETER_OUTPUT,
        m.frame_sender(),
        m.config().reader_chunk,
    )?;
    Ok(Arc::new(channel))
}
