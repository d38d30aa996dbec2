//! Arbitration of per-session requests into one effective adaptor setting.
//!
//! # Interval
//!
//! Every session may request a polling interval. The shortest positive
//! request wins because it satisfies every other session's latency bound.
//! Ties go to the earliest request; updating a request keeps its position.
//! Zero means "push mode, no polling" and never wins against a positive
//! request. When nothing positive is requested the configured default
//! applies, unless the adaptor treats zero as its slowest valid setting.
//!
//! # Standby override
//!
//! The effective override is the OR of every session's flag.
//!
//! # Data range
//!
//! Range requests queue in arrival order and the head of the queue wins.
//! With an empty queue the first available range is current.

use crate::error::{HubError, Result};
use crate::types::{DataRange, IntervalRange, SessionId};
use std::collections::VecDeque;

/// What to do when no session requests a positive interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroPolicy {
    /// Fall back to the configured default interval.
    #[default]
    UseDefault,
    /// Zero is a real setting: the slowest rate the hardware offers.
    Slowest,
}

/// Outcome of interval evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalDecision {
    pub interval_ms: u32,
    /// `None` when the default applied.
    pub winner: Option<SessionId>,
}

#[derive(Debug, Clone)]
pub struct IntervalArbiter {
    node: String,
    default_ms: u32,
    allowed: Vec<IntervalRange>,
    zero_policy: ZeroPolicy,
    requests: Vec<(SessionId, u32)>,
}

impl IntervalArbiter {
    /// `allowed` lists the valid spans; empty means every value is valid.
    /// The default itself must be valid.
    pub fn new(
        node: impl Into<String>,
        default_ms: u32,
        allowed: Vec<IntervalRange>,
        zero_policy: ZeroPolicy,
    ) -> Result<Self> {
        let arbiter = Self {
            node: node.into(),
            default_ms,
            allowed,
            zero_policy,
            requests: Vec::new(),
        };
        if !arbiter.is_valid(default_ms) {
            return Err(HubError::InvalidInterval {
                node: arbiter.node,
                value: default_ms,
            });
        }
        Ok(arbiter)
    }

    pub fn is_valid(&self, value: u32) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|r| r.contains(value))
    }

    pub fn default_ms(&self) -> u32 {
        self.default_ms
    }

    pub fn allowed(&self) -> &[IntervalRange] {
        &self.allowed
    }

    pub fn zero_policy(&self) -> ZeroPolicy {
        self.zero_policy
    }

    /// Record `session`'s request and re-evaluate. An invalid value is
    /// rejected without touching existing requests.
    pub fn set_request(&mut self, session: SessionId, value: u32) -> Result<IntervalDecision> {
        if !self.is_valid(value) {
            tracing::warn!(
                "Invalid interval requested for node '{}' by session '{}': {}",
                self.node,
                session,
                value
            );
            return Err(HubError::InvalidInterval {
                node: self.node.clone(),
                value,
            });
        }
        match self.requests.iter_mut().find(|(s, _)| *s == session) {
            Some(entry) => entry.1 = value,
            None => self.requests.push((session, value)),
        }
        Ok(self.evaluate())
    }

    /// Drop `session`'s request, if any, and re-evaluate.
    pub fn remove_request(&mut self, session: SessionId) -> IntervalDecision {
        self.requests.retain(|(s, _)| *s != session);
        self.evaluate()
    }

    pub fn request_of(&self, session: SessionId) -> Option<u32> {
        self.requests
            .iter()
            .find(|(s, _)| *s == session)
            .map(|(_, v)| *v)
    }

    pub fn requests(&self) -> &[(SessionId, u32)] {
        &self.requests
    }

    pub fn evaluate(&self) -> IntervalDecision {
        let fallback = IntervalDecision {
            interval_ms: self.default_ms,
            winner: None,
        };
        let Some(&(first, _)) = self.requests.first() else {
            return fallback;
        };

        let mut best: Option<(SessionId, u32)> = None;
        for &(session, value) in &self.requests {
            if value == 0 {
                continue;
            }
            if best.map_or(true, |(_, b)| value < b) {
                best = Some((session, value));
            }
        }

        match (best, self.zero_policy) {
            (Some((session, value)), _) => IntervalDecision {
                interval_ms: value,
                winner: Some(session),
            },
            (None, ZeroPolicy::Slowest) => IntervalDecision {
                interval_ms: 0,
                winner: Some(first),
            },
            (None, ZeroPolicy::UseDefault) => fallback,
        }
    }
}

/// Set of sessions asking to keep the adaptor running through standby.
#[derive(Debug, Clone, Default)]
pub struct StandbyOverrides {
    sessions: Vec<SessionId>,
}

impl StandbyOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `session`'s flag. Returns the effective override afterwards.
    pub fn set(&mut self, session: SessionId, enabled: bool) -> bool {
        if enabled {
            if !self.sessions.contains(&session) {
                self.sessions.push(session);
            }
        } else {
            self.sessions.retain(|s| *s != session);
        }
        self.effective()
    }

    pub fn remove(&mut self, session: SessionId) -> bool {
        self.set(session, false)
    }

    #[inline]
    pub fn effective(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn is_set(&self, session: SessionId) -> bool {
        self.sessions.contains(&session)
    }
}

/// Currently applied data range and the session that asked for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRangeDecision {
    pub range: DataRange,
    pub session: Option<SessionId>,
}

#[derive(Debug, Clone, Default)]
pub struct DataRangeArbiter {
    available: Vec<DataRange>,
    queue: VecDeque<(SessionId, DataRange)>,
}

impl DataRangeArbiter {
    pub fn new(available: Vec<DataRange>) -> Self {
        Self {
            available,
            queue: VecDeque::new(),
        }
    }

    pub fn available(&self) -> &[DataRange] {
        &self.available
    }

    pub fn current(&self) -> Option<DataRangeDecision> {
        match self.queue.front() {
            Some(&(session, range)) => Some(DataRangeDecision {
                range,
                session: Some(session),
            }),
            None => self.available.first().map(|&range| DataRangeDecision {
                range,
                session: None,
            }),
        }
    }

    /// Queue `session`'s request, replacing any earlier one in place.
    /// Ranges not on offer are ignored. Returns `true` if the current
    /// range changed.
    pub fn request(&mut self, session: SessionId, range: DataRange) -> bool {
        if !self.available.contains(&range) {
            tracing::warn!("Session {} requested unavailable data range {:?}", session, range);
            return false;
        }
        let before = self.current().map(|d| d.range);
        match self.queue.iter_mut().find(|(s, _)| *s == session) {
            Some(entry) => entry.1 = range,
            None => self.queue.push_back((session, range)),
        }
        before != self.current().map(|d| d.range)
    }

    /// Remove `session`'s request. Returns `true` if the current range changed.
    pub fn remove(&mut self, session: SessionId) -> bool {
        let before = self.current().map(|d| d.range);
        let len = self.queue.len();
        self.queue.retain(|(s, _)| *s != session);
        if self.queue.len() == len {
            tracing::debug!("No data range request for session {}", session);
            return false;
        }
        before != self.current().map(|d| d.range)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
