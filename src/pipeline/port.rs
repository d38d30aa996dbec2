//! Typed ports and the producer/consumer interfaces built on them.
//!
//! A [`Source<T>`] keeps an ordered list of joined [`SinkHandle<T>`]s and
//! calls each of them synchronously on `propagate`. Components expose their
//! ports by name through [`Producer`] / [`Consumer`]; the erased
//! [`SourcePort`] / [`SinkPort`] views let a `Bin` wire components it only
//! knows by name, with the payload tag checked before any downcast.

use crate::error::{HubError, Result};
use crate::pipeline::id::ReaderKey;
use crate::pipeline::packet::{Payload, PayloadKind};
use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

type SinkFn<T> = dyn Fn(&[T]) + Send + Sync;

/// Input port: binds a port name to one callback on the owning component.
pub struct SinkHandle<T: Payload> {
    key: ReaderKey,
    name: &'static str,
    callback: Arc<SinkFn<T>>,
}

impl<T: Payload> Clone for SinkHandle<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            name: self.name,
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T: Payload> SinkHandle<T> {
    pub fn new<F>(name: &'static str, callback: F) -> Self
    where
        F: Fn(&[T]) + Send + Sync + 'static,
    {
        Self {
            key: ReaderKey::next(),
            name,
            callback: Arc::new(callback),
        }
    }

    #[inline]
    pub fn key(&self) -> ReaderKey {
        self.key
    }

    #[inline]
    pub fn collect(&self, values: &[T]) {
        (self.callback)(values)
    }
}

impl<T: Payload> std::fmt::Debug for SinkHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("name", &self.name)
            .field("kind", &T::KIND)
            .field("key", &self.key)
            .finish()
    }
}

/// Output port fanning out to every joined sink, in join order.
pub struct Source<T: Payload> {
    name: &'static str,
    sinks: RwLock<Vec<SinkHandle<T>>>,
}

impl<T: Payload> Source<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// Join a sink. Joining the same sink twice is a no-op returning `false`.
    pub fn join(&self, sink: &SinkHandle<T>) -> bool {
        let mut sinks = self.sinks.write();
        if sinks.iter().any(|s| s.key == sink.key) {
            return false;
        }
        sinks.push(sink.clone());
        true
    }

    pub fn unjoin(&self, sink: &SinkHandle<T>) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|s| s.key != sink.key);
        sinks.len() != before
    }

    /// Deliver `values` to every joined sink, synchronously.
    pub fn propagate(&self, values: &[T]) {
        if values.is_empty() {
            return;
        }
        // Snapshot so a sink may rewire this source from inside its callback.
        let sinks = self.sinks.read().clone();
        for sink in &sinks {
            sink.collect(values);
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_joined(&self, sink: &SinkHandle<T>) -> bool {
        self.sinks.read().iter().any(|s| s.key == sink.key)
    }
}

impl<T: Payload> std::fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("kind", &T::KIND)
            .field("sinks", &self.sink_count())
            .finish()
    }
}

/// Type-erased view of a [`Source<T>`].
pub trait SourcePort: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> PayloadKind;
    fn sink_count(&self) -> usize;

    /// Join after comparing payload tags. A mismatch leaves both ports untouched.
    fn join_port(&self, sink: &dyn SinkPort) -> Result<bool>;
    fn unjoin_port(&self, sink: &dyn SinkPort) -> Result<bool>;
}

/// Type-erased view of a [`SinkHandle<T>`].
pub trait SinkPort: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> PayloadKind;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Payload> SinkPort for SinkHandle<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> PayloadKind {
        T::KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Payload> Source<T> {
    fn typed_sink<'a>(&self, sink: &'a dyn SinkPort) -> Result<&'a SinkHandle<T>> {
        let mismatch = || HubError::TypeMismatch {
            source_kind: T::KIND,
            sink_kind: sink.kind(),
        };
        if sink.kind() != T::KIND {
            return Err(mismatch());
        }
        sink.as_any()
            .downcast_ref::<SinkHandle<T>>()
            .ok_or_else(mismatch)
    }
}

impl<T: Payload> SourcePort for Source<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> PayloadKind {
        T::KIND
    }

    fn sink_count(&self) -> usize {
        Source::sink_count(self)
    }

    fn join_port(&self, sink: &dyn SinkPort) -> Result<bool> {
        let sink = self.typed_sink(sink)?;
        Ok(self.join(sink))
    }

    fn unjoin_port(&self, sink: &dyn SinkPort) -> Result<bool> {
        let sink = self.typed_sink(sink)?;
        Ok(self.unjoin(sink))
    }
}

/// A component exposing named output ports.
pub trait Producer: Send + Sync {
    fn source(&self, name: &str) -> Option<&dyn SourcePort>;
    fn source_names(&self) -> Vec<&'static str>;
}

/// A component exposing named input ports.
pub trait Consumer: Send + Sync {
    fn sink(&self, name: &str) -> Option<&dyn SinkPort>;
    fn sink_names(&self) -> Vec<&'static str>;
}
