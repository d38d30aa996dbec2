//! Filters: components that are both a consumer and a producer.
//!
//! Most filters map one input stream to one output stream. Those implement
//! [`FilterLogic`] and are wrapped in a [`TransformFilter`], which provides
//! the `"sink"` and `"source"` ports. Filters with several inputs implement
//! [`Filter`] directly.

use crate::pipeline::packet::{ConfigValue, Payload};
use crate::pipeline::port::{Consumer, Producer, SinkHandle, SinkPort, Source, SourcePort};
use crate::pipeline::reader::SOURCE_PORT;
use crate::pipeline::ring_buffer::SINK_PORT;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::trace;

/// A filter as seen by a bin.
pub trait Filter: Producer + Consumer {
    fn name(&self) -> &str;

    /// Apply a named property. Unknown keys are ignored.
    fn set_property(&self, _key: &str, _value: &ConfigValue) {}

    /// Drop any partially accumulated state.
    fn reset(&self) {}
}

/// Single-input, single-output transformation.
pub trait FilterLogic<I: Payload, O: Payload>: Send + 'static {
    fn name(&self) -> &str;

    /// Transform `input` and append results to `output`. May append
    /// nothing (accumulating filters) or several records per input.
    fn on_data(&mut self, input: &[I], output: &mut Vec<O>);

    fn on_config_change(&mut self, _key: &str, _value: &ConfigValue) {}

    fn on_reset(&mut self) {}
}

struct TransformState<L, O> {
    logic: L,
    output: Vec<O>,
}

/// Adapter turning a [`FilterLogic`] into a wired [`Filter`].
pub struct TransformFilter<I: Payload, O: Payload, L: FilterLogic<I, O>> {
    sink: SinkHandle<I>,
    source: Source<O>,
    name: String,
    // Held across propagate so batches leave in the order they arrived.
    state: Mutex<TransformState<L, O>>,
}

impl<I, O, L> TransformFilter<I, O, L>
where
    I: Payload,
    O: Payload,
    L: FilterLogic<I, O>,
{
    pub fn new(logic: L) -> Arc<Self> {
        let name = logic.name().to_string();
        Arc::new_cyclic(|this: &Weak<Self>| {
            let this = this.clone();
            Self {
                sink: SinkHandle::new(SINK_PORT, move |values: &[I]| {
                    if let Some(filter) = this.upgrade() {
                        filter.filter(values);
                    }
                }),
                source: Source::new(SOURCE_PORT),
                name,
                state: Mutex::new(TransformState {
                    logic,
                    output: Vec::new(),
                }),
            }
        })
    }

    pub fn sink_handle(&self) -> &SinkHandle<I> {
        &self.sink
    }

    pub fn source_port(&self) -> &Source<O> {
        &self.source
    }

    /// Run the logic on `values` and propagate whatever it produced.
    pub fn filter(&self, values: &[I]) {
        let mut state = self.state.lock();
        let TransformState { logic, output } = &mut *state;
        output.clear();
        logic.on_data(values, output);
        if !output.is_empty() {
            trace!(filter = %self.name, n_in = values.len(), n_out = output.len(), "Filtered");
            self.source.propagate(output);
        }
    }

    /// Inspect the wrapped logic.
    pub fn with_logic<R>(&self, f: impl FnOnce(&L) -> R) -> R {
        f(&self.state.lock().logic)
    }
}

impl<I, O, L> Producer for TransformFilter<I, O, L>
where
    I: Payload,
    O: Payload,
    L: FilterLogic<I, O>,
{
    fn source(&self, name: &str) -> Option<&dyn SourcePort> {
        (name == SOURCE_PORT).then_some(&self.source as &dyn SourcePort)
    }

    fn source_names(&self) -> Vec<&'static str> {
        vec![SOURCE_PORT]
    }
}

impl<I, O, L> Consumer for TransformFilter<I, O, L>
where
    I: Payload,
    O: Payload,
    L: FilterLogic<I, O>,
{
    fn sink(&self, name: &str) -> Option<&dyn SinkPort> {
        (name == SINK_PORT).then_some(&self.sink as &dyn SinkPort)
    }

    fn sink_names(&self) -> Vec<&'static str> {
        vec![SINK_PORT]
    }
}

impl<I, O, L> Filter for TransformFilter<I, O, L>
where
    I: Payload,
    O: Payload,
    L: FilterLogic<I, O>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn set_property(&self, key: &str, value: &ConfigValue) {
        self.state.lock().logic.on_config_change(key, value);
    }

    fn reset(&self) {
        self.state.lock().logic.on_reset();
    }
}
