//! # SensorHub-RS: Sensor Hub Daemon Core
//!
//! The core of a sensor daemon: hardware adaptors publish samples into ring
//! buffers, filter chains transform them, and logical sensors hand the
//! result to client sessions. Adaptors and chains are shared between every
//! client that needs them and arbitrate conflicting requests (polling
//! interval, standby override, data range) between sessions.
//!
//! ## Architecture
//!
//! - **Pipeline**: typed ring buffers, readers, filters and bins
//! - **Hub**: shared adaptors/chains/sensors, arbitration, plugin loading
//! - **Plugins**: the built-in simulated accelerometer stack
//! - **Communication**: crossbeam channels between the polling threads and
//!   the client layer
//!
//! ## Configuration
//!
//! The hub reads `sensorhub.toml` (and a `conf.d` drop-in directory) from
//! the platform config directory under `sensorhub`:
//!
//! - **Linux**: `~/.config/sensorhub/`
//! - **macOS**: `~/Library/Application Support/sensorhub/`
//! - **Windows**: `%APPDATA%\sensorhub\`
//!
//! ## Example
//!
//! ```ignore
//! use sensorhub_rs::{config::HubConfig, plugins, SensorManager};
//!
//! let manager = SensorManager::new(HubConfig::load_default());
//! plugins::install_builtin(&manager);
//! manager.load_plugin(plugins::ACCELEROMETER_SENSOR)?;
//!
//! let session = manager.request_sensor("accelerometersensor")?;
//! manager.set_interval(session, 20)?;
//! manager.start(session)?;
//!
//! for frame in manager.frames().iter().take(10) {
//!     println!("{:?}", frame.payload);
//! }
//! manager.release_sensor("accelerometersensor", session)?;
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod pipeline;
pub mod plugins;
pub mod types;

// Re-export commonly used types
pub use config::HubConfig;
pub use error::{HubError, Result, ResultExt};
pub use hub::{Chain, DeviceAdaptor, Lease, Plugin, SensorChannel, SensorManager};
pub use pipeline::{RingBuffer, SamplePayload, TimedXyz};
pub use types::{DataRange, HubStatus, SensorFrame, SessionId};
