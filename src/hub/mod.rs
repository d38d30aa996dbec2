//! Shared-resource layer of the hub.
//!
//! Adaptors own hardware and publish samples into ring buffers. Chains
//! read an adaptor (or another chain), run filters and expose named
//! outputs. Sensor channels are what clients see: they map sessions onto a
//! chain output and forward frames. The [`SensorManager`] keeps exactly one
//! live instance per id of each and arbitrates what the sessions ask for.
//!
//! ```text
//! SensorManager
//!   ├─ Registry<dyn DeviceAdaptor> ── PollingAdaptor ── SampleSource
//!   ├─ Registry<Chain>             ── Bin (reader → filters → outputs)
//!   ├─ Registry<SensorChannel>     ── frames ──► client layer
//!   └─ PluginLoader
//! ```

pub mod adaptor;
pub mod arbitration;
pub mod chain;
pub mod loader;
pub mod manager;
pub mod polling;
pub mod registry;
pub mod sensor;
pub mod simulated;

pub use adaptor::{AdaptedSensor, AdaptorCore, AdaptorState, DeviceAdaptor};
pub use arbitration::{
    DataRangeArbiter, DataRangeDecision, IntervalArbiter, IntervalDecision, StandbyOverrides,
    ZeroPolicy,
};
pub use chain::{Chain, ChainBuilder, ChainInput, ChainOutput};
pub use loader::{Plugin, PluginLoader};
pub use manager::SensorManager;
pub use polling::{monotonic_us, PollStats, PollingAdaptor, SampleSource};
pub use registry::{Lease, Registry};
pub use sensor::SensorChannel;
pub use simulated::{SimulatedPattern, SimulatedSource};
