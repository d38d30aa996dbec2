//! Identity types for the pipeline system.
//!
//! `ComponentId` and `PortId` are newtypes over `u32` that serve as direct
//! array indices into a `Bin`'s arenas, providing O(1) lookup. `ReaderKey`
//! identifies a ring buffer reader independently of any bin.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Index into `Bin::components`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ComponentId(pub u32);

impl ComponentId {
    pub const INVALID: ComponentId = ComponentId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "ComponentId(INVALID)")
        } else {
            write!(f, "ComponentId({})", self.0)
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Index into `Bin::ports`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub u32);

impl PortId {
    pub const INVALID: PortId = PortId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PortId(INVALID)")
        } else {
            write!(f, "PortId({})", self.0)
        }
    }
}

/// Process-unique identity of a ring buffer reader or a sink binding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReaderKey(u64);

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

impl ReaderKey {
    /// Allocate a fresh key. Keys are never reused.
    pub fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ReaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReaderKey({})", self.0)
    }
}
