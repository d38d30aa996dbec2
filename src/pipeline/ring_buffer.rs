//! Fixed-capacity, multi-reader circular buffer.
//!
//! The buffer is the only place where producer and consumer threads meet.
//! Writers append under a short lock and then call every joined reader's
//! wake hook with the lock released. Readers copy out at their own pace;
//! a reader that falls more than `capacity` writes behind is moved forward
//! to the oldest retained item and the skip is counted.

use crate::pipeline::id::ReaderKey;
use crate::pipeline::packet::{Payload, PayloadKind};
use crate::pipeline::port::{Consumer, SinkHandle, SinkPort};
use crate::pipeline::wake::Wake;
use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Name of the single input port every ring buffer exposes.
pub const SINK_PORT: &str = "sink";

struct ReaderState {
    key: ReaderKey,
    cursor: u64,
    overruns: u64,
    waker: Option<Weak<dyn Wake>>,
}

struct Inner<T> {
    slots: Vec<T>,
    write_count: u64,
    readers: Vec<ReaderState>,
}

impl<T> Inner<T> {
    fn reader_mut(&mut self, key: ReaderKey) -> Option<&mut ReaderState> {
        self.readers.iter_mut().find(|r| r.key == key)
    }

    fn wakers(&self) -> Vec<Arc<dyn Wake>> {
        self.readers
            .iter()
            .filter_map(|r| r.waker.as_ref().and_then(Weak::upgrade))
            .collect()
    }
}

pub struct RingBuffer<T: Payload> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    sink: SinkHandle<T>,
}

impl<T: Payload> RingBuffer<T> {
    /// Create a buffer holding `capacity` items. A capacity of zero is
    /// raised to one.
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let sink = SinkHandle::new(SINK_PORT, move |values: &[T]| {
                if let Some(buffer) = weak.upgrade() {
                    buffer.write(values);
                }
            });
            Self {
                capacity,
                inner: Mutex::new(Inner {
                    slots: vec![T::default(); capacity],
                    write_count: 0,
                    readers: Vec::new(),
                }),
                sink,
            }
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn write_count(&self) -> u64 {
        self.inner.lock().write_count
    }

    pub fn reader_count(&self) -> usize {
        self.inner.lock().readers.len()
    }

    /// Typed input port, for joining sources to this buffer directly.
    pub fn sink_handle(&self) -> &SinkHandle<T> {
        &self.sink
    }

    /// Register a reader. Its cursor starts at the current write count, so
    /// no history is delivered. Returns `false` if `key` is already joined.
    pub fn join(&self, key: ReaderKey, waker: Option<Weak<dyn Wake>>) -> bool {
        let mut inner = self.inner.lock();
        if inner.readers.iter().any(|r| r.key == key) {
            return false;
        }
        let cursor = inner.write_count;
        inner.readers.push(ReaderState {
            key,
            cursor,
            overruns: 0,
            waker,
        });
        debug!(?key, cursor, "Reader joined ring buffer");
        true
    }

    pub fn unjoin(&self, key: ReaderKey) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.readers.len();
        inner.readers.retain(|r| r.key != key);
        let removed = inner.readers.len() != before;
        if removed {
            debug!(?key, "Reader left ring buffer");
        }
        removed
    }

    pub fn is_joined(&self, key: ReaderKey) -> bool {
        self.inner.lock().readers.iter().any(|r| r.key == key)
    }

    /// Append `values`, then notify every joined reader.
    pub fn write(&self, values: &[T]) {
        if values.is_empty() {
            return;
        }
        {
            let mut inner = self.inner.lock();
            for value in values {
                let index = (inner.write_count % self.capacity as u64) as usize;
                inner.slots[index] = value.clone();
                inner.write_count += 1;
            }
            trace!(n = values.len(), write_count = inner.write_count, "Ring buffer write");
        }
        self.wake_up_readers();
    }

    /// Borrow the next slot for in-place filling. Nothing becomes visible
    /// to readers until [`SlotGuard::commit`]; dropping the guard discards
    /// the partial record.
    pub fn next_slot(&self) -> SlotGuard<'_, T> {
        let inner = self.inner.lock();
        let index = (inner.write_count % self.capacity as u64) as usize;
        SlotGuard {
            buffer: self,
            inner,
            index,
        }
    }

    /// Copy up to `max` unread items for `key` into `out`, oldest first.
    /// Returns the number of items copied; zero for an unknown reader.
    pub fn read(&self, key: ReaderKey, max: usize, out: &mut Vec<T>) -> usize {
        let mut inner = self.inner.lock();
        let write_count = inner.write_count;
        let capacity = self.capacity as u64;

        let Some(reader) = inner.reader_mut(key) else {
            return 0;
        };

        if write_count - reader.cursor > capacity {
            let skipped = write_count - capacity - reader.cursor;
            reader.cursor = write_count - capacity;
            reader.overruns += 1;
            debug!(?key, skipped, overruns = reader.overruns, "Reader overrun");
        }

        let start = reader.cursor;
        let n = ((write_count - start) as usize).min(max);
        reader.cursor += n as u64;

        out.reserve(n);
        for cursor in start..start + n as u64 {
            out.push(inner.slots[(cursor % capacity) as usize].clone());
        }
        n
    }

    /// Number of unread items for `key`, capped at capacity.
    pub fn available(&self, key: ReaderKey) -> usize {
        let inner = self.inner.lock();
        inner
            .readers
            .iter()
            .find(|r| r.key == key)
            .map(|r| ((inner.write_count - r.cursor) as usize).min(self.capacity))
            .unwrap_or(0)
    }

    /// How many times `key` was moved forward because it fell too far behind.
    pub fn overruns(&self, key: ReaderKey) -> u64 {
        self.inner
            .lock()
            .readers
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.overruns)
            .unwrap_or(0)
    }

    /// Call every live reader's wake hook. Hooks run without the buffer
    /// lock held, so they may read from this buffer synchronously.
    pub fn wake_up_readers(&self) {
        let wakers = self.inner.lock().wakers();
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T: Payload> Consumer for RingBuffer<T> {
    fn sink(&self, name: &str) -> Option<&dyn SinkPort> {
        (name == SINK_PORT).then_some(&self.sink as &dyn SinkPort)
    }

    fn sink_names(&self) -> Vec<&'static str> {
        vec![SINK_PORT]
    }
}

impl<T: Payload> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RingBuffer")
            .field("kind", &T::KIND)
            .field("capacity", &self.capacity)
            .field("write_count", &inner.write_count)
            .field("readers", &inner.readers.len())
            .finish()
    }
}

/// In-place write handle returned by [`RingBuffer::next_slot`].
pub struct SlotGuard<'a, T: Payload> {
    buffer: &'a RingBuffer<T>,
    inner: MutexGuard<'a, Inner<T>>,
    index: usize,
}

impl<'a, T: Payload> SlotGuard<'a, T> {
    /// Publish the slot and wake readers.
    pub fn commit(mut self) {
        self.inner.write_count += 1;
        let buffer = self.buffer;
        drop(self);
        buffer.wake_up_readers();
    }
}

impl<T: Payload> Deref for SlotGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.slots[self.index]
    }
}

impl<T: Payload> DerefMut for SlotGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        let index = self.index;
        &mut self.inner.slots[index]
    }
}

/// A ring buffer with its payload type erased, as stored in chains and
/// adaptors where output buffers of different types share one map.
#[derive(Clone)]
pub struct AnyBuffer {
    kind: PayloadKind,
    buffer: Arc<dyn Any + Send + Sync>,
    consumer: Arc<dyn Consumer>,
}

impl AnyBuffer {
    pub fn new<T: Payload>(buffer: Arc<RingBuffer<T>>) -> Self {
        Self {
            kind: T::KIND,
            consumer: buffer.clone(),
            buffer,
        }
    }

    #[inline]
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Recover the typed buffer. `None` if `T` is not the stored type.
    pub fn downcast<T: Payload>(&self) -> Option<Arc<RingBuffer<T>>> {
        if self.kind != T::KIND {
            return None;
        }
        Arc::clone(&self.buffer).downcast::<RingBuffer<T>>().ok()
    }

    pub fn as_consumer(&self) -> Arc<dyn Consumer> {
        Arc::clone(&self.consumer)
    }
}

impl std::fmt::Debug for AnyBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyBuffer").field("kind", &self.kind).finish()
    }
}
