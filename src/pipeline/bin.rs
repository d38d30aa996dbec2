//! Bin: a named container that wires components together by port name.
//!
//! Components and their ports live in arenas indexed by [`ComponentId`] and
//! [`PortId`]; edges refer to ports by index only. The bin keeps its
//! components alive but does not drive them. Data moves because ring
//! buffers wake readers, not because the bin schedules anything.

use crate::error::{HubError, Result};
use crate::pipeline::filter::Filter;
use crate::pipeline::id::{ComponentId, PortId};
use crate::pipeline::packet::PayloadKind;
use crate::pipeline::port::{Consumer, PortDirection, SinkPort, SourcePort};
use crate::pipeline::reader::Pusher;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Anything a bin can hold.
#[derive(Clone)]
pub enum BinComponent {
    Pusher(Arc<dyn Pusher>),
    Consumer(Arc<dyn Consumer>),
    Filter(Arc<dyn Filter>),
}

impl BinComponent {
    pub fn role(&self) -> &'static str {
        match self {
            BinComponent::Pusher(_) => "pusher",
            BinComponent::Consumer(_) => "consumer",
            BinComponent::Filter(_) => "filter",
        }
    }

    pub fn source(&self, name: &str) -> Option<&dyn SourcePort> {
        match self {
            BinComponent::Pusher(p) => p.source(name),
            BinComponent::Filter(f) => f.source(name),
            BinComponent::Consumer(_) => None,
        }
    }

    pub fn sink(&self, name: &str) -> Option<&dyn SinkPort> {
        match self {
            BinComponent::Consumer(c) => c.sink(name),
            BinComponent::Filter(f) => f.sink(name),
            BinComponent::Pusher(_) => None,
        }
    }

    fn source_names(&self) -> Vec<&'static str> {
        match self {
            BinComponent::Pusher(p) => p.source_names(),
            BinComponent::Filter(f) => f.source_names(),
            BinComponent::Consumer(_) => Vec::new(),
        }
    }

    fn sink_names(&self) -> Vec<&'static str> {
        match self {
            BinComponent::Consumer(c) => c.sink_names(),
            BinComponent::Filter(f) => f.sink_names(),
            BinComponent::Pusher(_) => Vec::new(),
        }
    }
}

impl fmt::Debug for BinComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role())
    }
}

impl From<Arc<dyn Pusher>> for BinComponent {
    fn from(p: Arc<dyn Pusher>) -> Self {
        BinComponent::Pusher(p)
    }
}

impl From<Arc<dyn Consumer>> for BinComponent {
    fn from(c: Arc<dyn Consumer>) -> Self {
        BinComponent::Consumer(c)
    }
}

impl From<Arc<dyn Filter>> for BinComponent {
    fn from(f: Arc<dyn Filter>) -> Self {
        BinComponent::Filter(f)
    }
}

struct ComponentSlot {
    name: String,
    component: BinComponent,
    ports: Vec<PortId>,
}

/// One port of one component, as registered in the bin.
#[derive(Debug, Clone)]
pub struct PortEntry {
    pub component: ComponentId,
    pub name: &'static str,
    pub direction: PortDirection,
    pub kind: PayloadKind,
}

/// A source-to-sink connection made through the bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: PortId,
    pub to: PortId,
}

#[derive(Default)]
pub struct Bin {
    name: String,
    components: Vec<ComponentSlot>,
    by_name: HashMap<String, ComponentId>,
    ports: Vec<PortEntry>,
    edges: Vec<Edge>,
    running: bool,
}

impl Bin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `component` under `name`. Names are unique across every
    /// component role in this bin.
    pub fn add(&mut self, component: impl Into<BinComponent>, name: &str) -> Result<ComponentId> {
        if self.by_name.contains_key(name) {
            tracing::error!("Bin '{}': component name '{}' already in use", self.name, name);
            return Err(HubError::DuplicateName(name.to_string()));
        }
        let component = component.into();
        let id = ComponentId(self.components.len() as u32);

        let mut ports = Vec::new();
        for port in component.source_names() {
            if let Some(p) = component.source(port) {
                ports.push(self.push_port(id, port, PortDirection::Output, p.kind()));
            }
        }
        for port in component.sink_names() {
            if let Some(p) = component.sink(port) {
                ports.push(self.push_port(id, port, PortDirection::Input, p.kind()));
            }
        }

        tracing::debug!(
            "Bin '{}': added {} '{}' as {:?} with {} ports",
            self.name,
            component.role(),
            name,
            id,
            ports.len()
        );
        self.components.push(ComponentSlot {
            name: name.to_string(),
            component,
            ports,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    fn push_port(
        &mut self,
        component: ComponentId,
        name: &'static str,
        direction: PortDirection,
        kind: PayloadKind,
    ) -> PortId {
        let id = PortId(self.ports.len() as u32);
        self.ports.push(PortEntry {
            component,
            name,
            direction,
            kind,
        });
        id
    }

    /// Connect `producer.source` to `consumer.sink`. Returns `false` and
    /// logs if either side does not resolve or the payload types differ;
    /// existing wiring is left untouched in that case.
    pub fn join(&mut self, producer: &str, source: &str, consumer: &str, sink: &str) -> bool {
        match self.try_join(producer, source, consumer, sink) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Bin '{}': join {}.{} -> {}.{} failed: {}",
                    self.name,
                    producer,
                    source,
                    consumer,
                    sink,
                    e
                );
                false
            }
        }
    }

    /// Like [`Bin::join`], reporting the reason for failure.
    pub fn try_join(&mut self, producer: &str, source: &str, consumer: &str, sink: &str) -> Result<()> {
        let (from, to) = self.resolve(producer, source, consumer, sink)?;
        let src = self.source_port(from)?;
        let dst = self.sink_port(to)?;
        src.join_port(dst)?;
        let edge = Edge { from, to };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        Ok(())
    }

    /// Undo a join made through this bin.
    pub fn unjoin(&mut self, producer: &str, source: &str, consumer: &str, sink: &str) -> bool {
        let result = self.resolve(producer, source, consumer, sink).and_then(|(from, to)| {
            let removed = self.source_port(from)?.unjoin_port(self.sink_port(to)?)?;
            Ok((Edge { from, to }, removed))
        });
        match result {
            Ok((edge, removed)) => {
                self.edges.retain(|e| *e != edge);
                removed
            }
            Err(e) => {
                tracing::warn!("Bin '{}': unjoin failed: {}", self.name, e);
                false
            }
        }
    }

    fn resolve(&self, producer: &str, source: &str, consumer: &str, sink: &str) -> Result<(PortId, PortId)> {
        let from = self.find_port(producer, source, PortDirection::Output)?;
        let to = self.find_port(consumer, sink, PortDirection::Input)?;
        Ok((from, to))
    }

    fn find_port(&self, component: &str, port: &str, direction: PortDirection) -> Result<PortId> {
        let not_found = || HubError::PortNotFound {
            component: component.to_string(),
            port: port.to_string(),
        };
        let id = self.by_name.get(component).ok_or_else(not_found)?;
        self.components[id.index()]
            .ports
            .iter()
            .copied()
            .find(|p| {
                let entry = &self.ports[p.index()];
                entry.name == port && entry.direction == direction
            })
            .ok_or_else(not_found)
    }

    fn source_port(&self, id: PortId) -> Result<&dyn SourcePort> {
        let entry = &self.ports[id.index()];
        let slot = &self.components[entry.component.index()];
        slot.component
            .source(entry.name)
            .ok_or_else(|| HubError::PortNotFound {
                component: slot.name.clone(),
                port: entry.name.to_string(),
            })
    }

    fn sink_port(&self, id: PortId) -> Result<&dyn SinkPort> {
        let entry = &self.ports[id.index()];
        let slot = &self.components[entry.component.index()];
        slot.component
            .sink(entry.name)
            .ok_or_else(|| HubError::PortNotFound {
                component: slot.name.clone(),
                port: entry.name.to_string(),
            })
    }

    /// Mark the bin running. Returns `false` if it already was.
    pub fn start(&mut self) -> bool {
        if self.running {
            tracing::warn!("Bin '{}' already started", self.name);
            return false;
        }
        self.running = true;
        tracing::debug!("Bin '{}' started", self.name);
        true
    }

    /// Mark the bin stopped. Returns `false` if it was not running.
    pub fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        tracing::debug!("Bin '{}' stopped", self.name);
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn get(&self, name: &str) -> Option<&BinComponent> {
        self.by_name
            .get(name)
            .map(|id| &self.components[id.index()].component)
    }

    pub fn id_of(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.name.as_str())
    }

    pub fn port(&self, id: PortId) -> Option<&PortEntry> {
        self.ports.get(id.index())
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Every pusher in the bin, in insertion order.
    pub fn pushers(&self) -> Vec<Arc<dyn Pusher>> {
        self.components
            .iter()
            .filter_map(|c| match &c.component {
                BinComponent::Pusher(p) => Some(Arc::clone(p)),
                _ => None,
            })
            .collect()
    }

    /// Human-readable edge list, e.g. `reader.source -> filter.sink`.
    pub fn describe_edges(&self) -> Vec<String> {
        self.edges
            .iter()
            .map(|e| format!("{} -> {}", self.port_label(e.from), self.port_label(e.to)))
            .collect()
    }

    fn port_label(&self, id: PortId) -> String {
        let entry = &self.ports[id.index()];
        format!("{}.{}", self.components[entry.component.index()].name, entry.name)
    }
}

impl fmt::Debug for Bin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bin")
            .field("name", &self.name)
            .field("components", &self.components.len())
            .field("edges", &self.edges.len())
            .field("running", &self.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::packet::{TimedUnsigned, TimedXyz};
    use crate::pipeline::reader::BufferReader;
    use crate::pipeline::ring_buffer::RingBuffer;

    fn reader<T: crate::pipeline::packet::Payload>() -> Arc<dyn Pusher> {
        BufferReader::<T>::new(16)
    }

    fn buffer<T: crate::pipeline::packet::Payload>() -> Arc<dyn Consumer> {
        RingBuffer::<T>::new(16)
    }

    #[test]
    fn test_names_are_disjoint_across_roles() {
        let mut bin = Bin::new("test");
        bin.add(reader::<TimedXyz>(), "a").unwrap();
        let err = bin.add(buffer::<TimedXyz>(), "a").unwrap_err();
        assert!(matches!(err, HubError::DuplicateName(ref n) if n == "a"));
        assert_eq!(bin.len(), 1);
    }

    #[test]
    fn test_join_records_edge_and_moves_data() {
        let mut bin = Bin::new("test");
        let src = BufferReader::<TimedXyz>::new(16);
        let input = RingBuffer::<TimedXyz>::new(4);
        let output = RingBuffer::<TimedXyz>::new(4);
        src.join_buffer(&input);

        bin.add(src.clone() as Arc<dyn Pusher>, "reader").unwrap();
        bin.add(output.clone() as Arc<dyn Consumer>, "out").unwrap();
        assert!(bin.join("reader", "source", "out", "sink"));
        assert_eq!(bin.describe_edges(), vec!["reader.source -> out.sink"]);

        let key = crate::pipeline::id::ReaderKey::next();
        output.join(key, None);
        input.write(&[TimedXyz::new(1, 1, 2, 3)]);
        assert_eq!(output.available(key), 1);
    }

    #[test]
    fn test_join_type_mismatch_has_no_effect() {
        let mut bin = Bin::new("test");
        let src = BufferReader::<TimedXyz>::new(16);
        bin.add(src.clone() as Arc<dyn Pusher>, "p").unwrap();
        bin.add(buffer::<TimedUnsigned>(), "c").unwrap();

        assert!(!bin.join("p", "source", "c", "sink"));
        assert!(matches!(
            bin.try_join("p", "source", "c", "sink"),
            Err(HubError::TypeMismatch { .. })
        ));
        assert_eq!(src.source().sink_count(), 0);
        assert!(bin.edges().is_empty());
    }

    #[test]
    fn test_join_unresolved_names() {
        let mut bin = Bin::new("test");
        bin.add(reader::<TimedXyz>(), "p").unwrap();
        bin.add(buffer::<TimedXyz>(), "c").unwrap();
        assert!(!bin.join("missing", "source", "c", "sink"));
        assert!(!bin.join("p", "nope", "c", "sink"));
        // A sink name on the producer side must not resolve.
        assert!(!bin.join("c", "sink", "c", "sink"));
    }

    #[test]
    fn test_unjoin() {
        let mut bin = Bin::new("test");
        let src = BufferReader::<TimedXyz>::new(16);
        bin.add(src.clone() as Arc<dyn Pusher>, "p").unwrap();
        bin.add(buffer::<TimedXyz>(), "c").unwrap();
        assert!(bin.join("p", "source", "c", "sink"));
        assert!(bin.unjoin("p", "source", "c", "sink"));
        assert_eq!(src.source().sink_count(), 0);
        assert!(bin.edges().is_empty());
        assert!(!bin.unjoin("p", "source", "c", "sink"));
    }

    #[test]
    fn test_start_stop_bookkeeping() {
        let mut bin = Bin::new("test");
        assert!(!bin.stop());
        assert!(bin.start());
        assert!(!bin.start());
        assert!(bin.is_running());
        assert!(bin.stop());
        assert!(!bin.is_running());
    }
}
