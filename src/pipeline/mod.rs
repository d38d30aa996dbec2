//! Typed event-routing fabric.
//!
//! Data flows from a producer into a ring buffer, is drained by a reader,
//! and forwarded through filters into further ring buffers. Ports are typed
//! by payload record; joins are checked by payload tag.
//!
//! # Architecture
//!
//! ```text
//! [Adaptor] ──► RingBuffer ──► [BufferReader] ──► [Filter] ──► RingBuffer ──► ...
//!                  │ wake
//!                  └──────────► reader drains (inline, or on a ThreadedBin thread)
//! ```
//!
//! # Design
//!
//! - **Sealed payloads** - every record type maps to one `PayloadKind` tag.
//! - **Arena-indexed bins** - components and ports are addressed by index.
//! - **Coalesced wakeups** - a capacity-1 channel between writer and drainer.
//! - **Lossy by staleness** - a slow reader skips to the newest `N` items.

pub mod bin;
pub mod executor;
pub mod filter;
pub mod id;
pub mod nodes;
pub mod packet;
pub mod port;
pub mod reader;
pub mod ring_buffer;
pub mod wake;

pub use bin::{Bin, BinComponent, Edge, PortEntry};
pub use executor::ThreadedBin;
pub use filter::{Filter, FilterLogic, TransformFilter};
pub use id::{ComponentId, PortId, ReaderKey};
pub use packet::{
    ConfigValue, FusedXyz, Orientation, Payload, PayloadKind, Pose, SamplePayload, TimedUnsigned,
    TimedXyz,
};
pub use port::{
    Consumer, PortDirection, Producer, SinkHandle, SinkPort, Source, SourcePort,
};
pub use reader::{BufferReader, Pusher};
pub use ring_buffer::{AnyBuffer, RingBuffer, SlotGuard};
pub use wake::{Notifier, Wake};
