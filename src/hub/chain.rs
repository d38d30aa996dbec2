//! Chains: shareable, pre-wired pipelines.
//!
//! A [`Chain`] bundles one upstream input (an adaptor output, or another
//! chain), a [`Bin`] of readers and filters, and one or more named output
//! ring buffers. It is built once by its plugin factory through a
//! [`ChainBuilder`] and then shared through the manager's registry.
//!
//! # Design
//!
//! - **Counted start** - the first `start` starts the upstream input and
//!   the bin; the matching last `stop` stops them.
//! - **Interval source** - chains never arbitrate. Interval, standby
//!   override and data range requests are forwarded upstream until they
//!   reach the adaptor.
//! - **Inline draining** - readers drain on the thread that wrote into
//!   their buffer, usually the adaptor's polling thread.

use crate::error::{HubError, Result};
use crate::hub::adaptor::DeviceAdaptor;
use crate::hub::arbitration::{DataRangeDecision, IntervalDecision};
use crate::hub::registry::Lease;
use crate::pipeline::bin::{Bin, BinComponent};
use crate::pipeline::filter::Filter;
use crate::pipeline::packet::{ConfigValue, Payload};
use crate::pipeline::port::Consumer;
use crate::pipeline::reader::{BufferReader, Pusher};
use crate::pipeline::ring_buffer::{AnyBuffer, RingBuffer};
use crate::types::{ChainStatus, DataRange, SessionId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Where a chain gets its data from.
pub enum ChainInput {
    /// One adapted sensor of an adaptor.
    Adaptor {
        adaptor: Lease<dyn DeviceAdaptor>,
        sensor: String,
    },
    /// One output of another chain.
    Chain { chain: Lease<Chain>, output: String },
}

impl ChainInput {
    fn buffer(&self) -> Option<AnyBuffer> {
        match self {
            ChainInput::Adaptor { adaptor, sensor } => adaptor.buffer(sensor),
            ChainInput::Chain { chain, output } => chain.output(output),
        }
    }

    fn start(&self) -> Result<()> {
        match self {
            ChainInput::Adaptor { adaptor, sensor } => adaptor.start_sensor(sensor),
            ChainInput::Chain { chain, .. } => chain.start().map(|_| ()),
        }
    }

    fn stop(&self) {
        match self {
            ChainInput::Adaptor { adaptor, sensor } => {
                adaptor.stop_sensor(sensor);
            }
            ChainInput::Chain { chain, .. } => {
                chain.stop();
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            ChainInput::Adaptor { adaptor, sensor } => format!("{}.{}", adaptor.id(), sensor),
            ChainInput::Chain { chain, output } => format!("{}.{}", chain.id(), output),
        }
    }
}

/// A named output buffer of a chain.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub name: String,
    pub description: String,
    pub buffer: AnyBuffer,
}

pub struct Chain {
    id: String,
    bin: Mutex<Bin>,
    outputs: Vec<ChainOutput>,
    starts: Mutex<usize>,
    // Dropped after the bin so readers unjoin before the input goes away.
    input: ChainInput,
}

impl Chain {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input(&self) -> &ChainInput {
        &self.input
    }

    /// The adaptor at the root of this chain's input.
    pub fn adaptor(&self) -> &dyn DeviceAdaptor {
        match &self.input {
            ChainInput::Adaptor { adaptor, .. } => &**adaptor,
            ChainInput::Chain { chain, .. } => chain.adaptor(),
        }
    }

    pub fn output(&self, name: &str) -> Option<AnyBuffer> {
        self.outputs
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.buffer.clone())
    }

    pub fn outputs(&self) -> &[ChainOutput] {
        &self.outputs
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.name.clone()).collect()
    }

    /// Start the chain. Only the first start reaches the input and bin;
    /// returns `Ok(true)` in that case.
    pub fn start(&self) -> Result<bool> {
        let mut starts = self.starts.lock();
        if *starts > 0 {
            *starts += 1;
            return Ok(false);
        }
        self.input
            .start()
            .map_err(|e| e.with_context(format!("Failed to start chain '{}'", self.id)))?;
        self.bin.lock().start();
        *starts = 1;
        tracing::debug!("Chain '{}' started", self.id);
        Ok(true)
    }

    /// Undo one [`Chain::start`]. Returns `false` if the chain was not
    /// started.
    pub fn stop(&self) -> bool {
        let mut starts = self.starts.lock();
        match *starts {
            0 => {
                tracing::warn!("Chain '{}' stopped while not started", self.id);
                false
            }
            1 => {
                *starts = 0;
                self.bin.lock().stop();
                self.input.stop();
                tracing::debug!("Chain '{}' stopped", self.id);
                true
            }
            _ => {
                *starts -= 1;
                true
            }
        }
    }

    /// Drop every outstanding start. Used right before destruction.
    pub fn shutdown(&self) {
        let mut starts = self.starts.lock();
        if *starts > 0 {
            tracing::debug!("Chain '{}' shut down with {} starts", self.id, *starts);
            *starts = 0;
            self.bin.lock().stop();
            self.input.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        *self.starts.lock() > 0
    }

    pub fn start_count(&self) -> usize {
        *self.starts.lock()
    }

    /// Set a property on the filter registered as `filter` in the bin.
    pub fn set_filter_property(&self, filter: &str, key: &str, value: &ConfigValue) -> Result<()> {
        let bin = self.bin.lock();
        match bin.get(filter) {
            Some(BinComponent::Filter(f)) => {
                f.set_property(key, value);
                Ok(())
            }
            _ => Err(HubError::unknown_id("filter", filter)),
        }
    }

    pub fn describe_edges(&self) -> Vec<String> {
        self.bin.lock().describe_edges()
    }

    pub fn set_interval_request(&self, session: SessionId, interval_ms: u32) -> Result<IntervalDecision> {
        self.adaptor().set_interval_request(session, interval_ms)
    }

    pub fn request_default_interval(&self, session: SessionId) -> Result<IntervalDecision> {
        self.adaptor().request_default_interval(session)
    }

    pub fn remove_interval_request(&self, session: SessionId) -> IntervalDecision {
        self.adaptor().remove_interval_request(session)
    }

    pub fn set_standby_override_request(&self, session: SessionId, enabled: bool) -> bool {
        self.adaptor().set_standby_override_request(session, enabled)
    }

    pub fn request_data_range(&self, session: SessionId, range: DataRange) -> bool {
        self.adaptor().request_data_range(session, range)
    }

    pub fn current_data_range(&self) -> Option<DataRangeDecision> {
        self.adaptor().current_data_range()
    }

    pub fn remove_session(&self, session: SessionId) {
        self.adaptor().remove_session(session);
    }

    pub fn status(&self, ref_count: usize) -> ChainStatus {
        ChainStatus {
            id: self.id.clone(),
            ref_count,
            running: self.is_running(),
            outputs: self.output_names(),
        }
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id)
            .field("input", &self.input.describe())
            .field("outputs", &self.output_names())
            .field("starts", &self.start_count())
            .finish()
    }
}

/// Assembles a [`Chain`].
///
/// ```ignore
/// let chain = ChainBuilder::new("accelerometerchain", input)
///     .reader::<TimedXyz>("reader", 128)?
///     .filter("coordinatealign", align)?
///     .output::<TimedXyz>("accelerometer", "aligned samples", 128)?
///     .join("reader", "source", "coordinatealign", "sink")?
///     .join("coordinatealign", "source", "accelerometer", "sink")?
///     .build();
/// ```
pub struct ChainBuilder {
    id: String,
    input: ChainInput,
    bin: Bin,
    outputs: Vec<ChainOutput>,
}

impl ChainBuilder {
    pub fn new(id: &str, input: ChainInput) -> Self {
        Self {
            id: id.to_string(),
            input,
            bin: Bin::new(id),
            outputs: Vec::new(),
        }
    }

    /// Add a reader joined to the chain's input buffer.
    pub fn reader<T: Payload>(mut self, name: &str, chunk: usize) -> Result<Self> {
        let buffer = self.input.buffer().ok_or_else(|| HubError::PortNotFound {
            component: self.input.describe(),
            port: "buffer".to_string(),
        })?;
        let reader = BufferReader::<T>::new(chunk);
        reader.join_any(&buffer)?;
        self.bin.add(reader as Arc<dyn Pusher>, name)?;
        Ok(self)
    }

    pub fn filter(mut self, name: &str, filter: Arc<dyn Filter>) -> Result<Self> {
        self.bin.add(filter, name)?;
        Ok(self)
    }

    /// Add a named output buffer. Its sink port is `"sink"`.
    pub fn output<T: Payload>(mut self, name: &str, description: &str, capacity: usize) -> Result<Self> {
        let buffer = RingBuffer::<T>::new(capacity);
        self.bin.add(Arc::clone(&buffer) as Arc<dyn Consumer>, name)?;
        self.outputs.push(ChainOutput {
            name: name.to_string(),
            description: description.to_string(),
            buffer: AnyBuffer::new(buffer),
        });
        Ok(self)
    }

    pub fn join(mut self, producer: &str, source: &str, consumer: &str, sink: &str) -> Result<Self> {
        self.bin.try_join(producer, source, consumer, sink)?;
        Ok(self)
    }

    pub fn build(self) -> Chain {
        tracing::debug!(
            "Built chain '{}' on {}: {:?}",
            self.id,
            self.input.describe(),
            self.bin.describe_edges()
        );
        Chain {
            id: self.id,
            bin: Mutex::new(self.bin),
            outputs: self.outputs,
            starts: Mutex::new(0),
            input: self.input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::arbitration::{DataRangeArbiter, IntervalArbiter, ZeroPolicy};
    use crate::hub::polling::PollingAdaptor;
    use crate::hub::registry::Registry;
    use crate::hub::simulated::{SimulatedPattern, SimulatedSource};
    use crate::pipeline::filter::TransformFilter;
    use crate::pipeline::nodes::CoordinateAlign;
    use crate::pipeline::packet::{TimedUnsigned, TimedXyz};
    use crate::pipeline::reader::BufferReader;
    use crate::pipeline::port::SinkHandle;
    use std::time::{Duration, Instant};

    fn adaptor_registry() -> Registry<dyn DeviceAdaptor> {
        let registry: Registry<dyn DeviceAdaptor> = Registry::new("adaptor");
        registry.register_type("simulated", |id, _| {
            let interval = IntervalArbiter::new(id, 1, vec![], ZeroPolicy::UseDefault)?;
            let source = SimulatedSource::new(SimulatedPattern::Sequence {
                values: vec![[1, 2, 3]],
            });
            Ok(Arc::new(PollingAdaptor::new(
                id,
                "accelerometer",
                "test",
                source,
                16,
                interval,
                DataRangeArbiter::default(),
            )) as Arc<dyn DeviceAdaptor>)
        });
        registry.register_instance("accelerometeradaptor", "simulated");
        registry
    }

    fn swap_xy() -> Arc<dyn Filter> {
        TransformFilter::new(CoordinateAlign::new([[0, 1, 0], [1, 0, 0], [0, 0, 1]]))
    }

    fn build(registry: &Registry<dyn DeviceAdaptor>) -> Chain {
        let input = ChainInput::Adaptor {
            adaptor: registry.request("accelerometeradaptor", &()).unwrap(),
            sensor: "accelerometer".into(),
        };
        ChainBuilder::new("accelerometerchain", input)
            .reader::<TimedXyz>("reader", 8)
            .and_then(|b| b.filter("coordinatealign", swap_xy()))
            .and_then(|b| b.output::<TimedXyz>("accelerometer", "aligned", 8))
            .and_then(|b| b.join("reader", "source", "coordinatealign", "sink"))
            .and_then(|b| b.join("coordinatealign", "source", "accelerometer", "sink"))
            .unwrap()
            .build()
    }

    #[test]
    fn test_chain_transforms_adaptor_output() {
        let registry = adaptor_registry();
        let chain = build(&registry);

        let out = chain.output("accelerometer").unwrap().downcast::<TimedXyz>().unwrap();
        let reader = BufferReader::new(8);
        reader.join_buffer(&out);
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let got = Arc::clone(&got);
            SinkHandle::new("sink", move |v: &[TimedXyz]| got.lock().extend_from_slice(v))
        };
        reader.source().join(&sink);

        assert!(chain.start().unwrap());
        let deadline = Instant::now() + Duration::from_secs(5);
        while got.lock().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(chain.stop());

        let first = got.lock()[0];
        assert_eq!((first.x, first.y, first.z), (2, 1, 3));
    }

    #[test]
    fn test_counted_start_stop() {
        let registry = adaptor_registry();
        let chain = build(&registry);

        assert!(!chain.stop());
        assert!(chain.start().unwrap());
        assert!(!chain.start().unwrap());
        assert!(chain.adaptor().is_running());

        assert!(chain.stop());
        assert!(chain.is_running());
        assert!(chain.stop());
        assert!(!chain.is_running());
        assert!(!chain.adaptor().is_running());
    }

    #[test]
    fn test_shared_adaptor_survives_one_chain() {
        let registry = adaptor_registry();
        let a = build(&registry);
        let b = build(&registry);
        assert_eq!(registry.ref_count("accelerometeradaptor"), 2);

        a.start().unwrap();
        b.start().unwrap();
        assert_eq!(a.adaptor().listeners("accelerometer"), 2);

        drop(a);
        assert!(registry.is_live("accelerometeradaptor"));
        b.shutdown();
        assert!(!b.adaptor().is_running());
        drop(b);
        assert!(!registry.is_live("accelerometeradaptor"));
    }

    #[test]
    fn test_wrong_reader_type_is_rejected() {
        let registry = adaptor_registry();
        let input = ChainInput::Adaptor {
            adaptor: registry.request("accelerometeradaptor", &()).unwrap(),
            sensor: "accelerometer".into(),
        };
        let err = ChainBuilder::new("bad", input)
            .reader::<TimedUnsigned>("reader", 8)
            .err()
            .unwrap();
        assert!(matches!(err, HubError::TypeMismatch { .. }));
    }

    #[test]
    fn test_missing_input_sensor() {
        let registry = adaptor_registry();
        let input = ChainInput::Adaptor {
            adaptor: registry.request("accelerometeradaptor", &()).unwrap(),
            sensor: "gyroscope".into(),
        };
        let err = ChainBuilder::new("bad", input).reader::<TimedXyz>("reader", 8).err();
        assert!(matches!(err, Some(HubError::PortNotFound { .. })));
    }

    #[test]
    fn test_interval_forwarded_to_adaptor() {
        let registry = adaptor_registry();
        let chain = build(&registry);
        chain.set_interval_request(SessionId(3), 40).unwrap();
        assert_eq!(chain.adaptor().interval().interval_ms, 40);
        assert_eq!(chain.adaptor().interval().winner, Some(SessionId(3)));
        chain.remove_session(SessionId(3));
        assert_eq!(chain.adaptor().interval().winner, None);
    }

    #[test]
    fn test_set_filter_property() {
        let registry = adaptor_registry();
        let chain = build(&registry);
        let identity = ConfigValue::Matrix([[1, 0, 0], [0, 1, 0], [0, 0, 1]]);
        assert!(chain.set_filter_property("coordinatealign", "matrix", &identity).is_ok());
        assert!(chain.set_filter_property("reader", "matrix", &identity).is_err());
    }
}
