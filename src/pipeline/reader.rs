//! Buffer readers (pushers).
//!
//! A [`BufferReader`] is joined to at most one ring buffer at a time. When
//! the buffer wakes it, the reader drains everything available in chunks
//! and forwards each chunk through its `"source"` port. By default the
//! drain runs inline on the writer's thread; a threaded bin can redirect
//! the wake to its own notifier and drain on its thread instead.

use crate::error::{HubError, Result};
use crate::pipeline::id::ReaderKey;
use crate::pipeline::packet::Payload;
use crate::pipeline::port::{Producer, Source, SourcePort};
use crate::pipeline::ring_buffer::{AnyBuffer, RingBuffer};
use crate::pipeline::wake::Wake;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Name of the single output port every reader exposes.
pub const SOURCE_PORT: &str = "source";

/// Type-erased interface to a reader, used by bins.
pub trait Pusher: Producer {
    /// Drain all available items. Returns how many were forwarded.
    fn push_new_data(&self) -> usize;

    /// Route wakeups to `target` instead of draining inline. `None`
    /// restores inline draining.
    fn set_wake_target(&self, target: Option<Arc<dyn Wake>>);

    /// Join an erased buffer, checking its payload kind.
    fn join_any(&self, buffer: &AnyBuffer) -> Result<bool>;

    fn unjoin_buffer(&self) -> bool;
}

pub struct BufferReader<T: Payload> {
    key: ReaderKey,
    chunk: usize,
    source: Source<T>,
    buffer: Mutex<Option<Arc<RingBuffer<T>>>>,
    wake_target: Mutex<Option<Arc<dyn Wake>>>,
    // Held for the whole drain so two wakers never interleave chunks.
    scratch: Mutex<Vec<T>>,
    this: Weak<Self>,
}

impl<T: Payload> BufferReader<T> {
    pub fn new(chunk: usize) -> Arc<Self> {
        let chunk = chunk.max(1);
        Arc::new_cyclic(|this| Self {
            key: ReaderKey::next(),
            chunk,
            source: Source::new(SOURCE_PORT),
            buffer: Mutex::new(None),
            wake_target: Mutex::new(None),
            scratch: Mutex::new(Vec::with_capacity(chunk)),
            this: this.clone(),
        })
    }

    #[inline]
    pub fn key(&self) -> ReaderKey {
        self.key
    }

    pub fn source(&self) -> &Source<T> {
        &self.source
    }

    /// Join `buffer`, leaving any previously joined buffer first.
    pub fn join_buffer(&self, buffer: &Arc<RingBuffer<T>>) -> bool {
        let mut slot = self.buffer.lock();
        if let Some(previous) = slot.take() {
            previous.unjoin(self.key);
        }
        let waker: Weak<dyn Wake> = self.this.clone();
        let joined = buffer.join(self.key, Some(waker));
        if joined {
            *slot = Some(Arc::clone(buffer));
            debug!(key = ?self.key, kind = %T::KIND, "Reader joined buffer");
        }
        joined
    }

    pub fn joined_buffer(&self) -> Option<Arc<RingBuffer<T>>> {
        self.buffer.lock().clone()
    }

    fn drain(&self) -> usize {
        let Some(buffer) = self.buffer.lock().clone() else {
            return 0;
        };
        let mut scratch = self.scratch.lock();
        let mut total = 0;
        loop {
            scratch.clear();
            let n = buffer.read(self.key, self.chunk, &mut scratch);
            if n == 0 {
                break;
            }
            total += n;
            self.source.propagate(&scratch);
        }
        if total > 0 {
            trace!(key = ?self.key, total, "Reader drained");
        }
        total
    }
}

impl<T: Payload> Wake for BufferReader<T> {
    fn wake(&self) {
        let target = self.wake_target.lock().clone();
        match target {
            Some(target) => target.wake(),
            None => {
                self.drain();
            }
        }
    }
}

impl<T: Payload> Producer for BufferReader<T> {
    fn source(&self, name: &str) -> Option<&dyn SourcePort> {
        (name == SOURCE_PORT).then_some(&self.source as &dyn SourcePort)
    }

    fn source_names(&self) -> Vec<&'static str> {
        vec![SOURCE_PORT]
    }
}

impl<T: Payload> Pusher for BufferReader<T> {
    fn push_new_data(&self) -> usize {
        self.drain()
    }

    fn set_wake_target(&self, target: Option<Arc<dyn Wake>>) {
        *self.wake_target.lock() = target;
    }

    fn join_any(&self, buffer: &AnyBuffer) -> Result<bool> {
        let typed = buffer.downcast::<T>().ok_or(HubError::TypeMismatch {
            source_kind: buffer.kind(),
            sink_kind: T::KIND,
        })?;
        Ok(self.join_buffer(&typed))
    }

    fn unjoin_buffer(&self) -> bool {
        match self.buffer.lock().take() {
            Some(buffer) => buffer.unjoin(self.key),
            None => false,
        }
    }
}

impl<T: Payload> Drop for BufferReader<T> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.get_mut().take() {
            buffer.unjoin(self.key);
        }
    }
}
