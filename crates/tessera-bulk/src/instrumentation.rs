//! Observability collaborator for batch reads.
//!
//! The resolver reports the duration of every batch read through an injected
//! [`Instrumentation`] instead of global state:
//!
//! - [`NoopInstrumentation`]: discards everything (the default).
//! - [`AtomicInstrumentation`]: lock-free per-operation call counts, total
//!   and maximum latency.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tessera_bulk::{AtomicInstrumentation, Instrumentation, operations};
//!
//! let metrics = Arc::new(AtomicInstrumentation::new());
//! metrics.record(operations::MEMBERSHIPS, Duration::from_micros(250));
//!
//! let stats = metrics.stats(operations::MEMBERSHIPS).unwrap();
//! assert_eq!(stats.calls, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Receives the duration of named operations.
pub trait Instrumentation: Send + Sync {
    fn record(&self, name: &'static str, duration: Duration);
}

/// Instrumentation that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {
    fn record(&self, _name: &'static str, _duration: Duration) {}
}

/// Names of the batch reads issued by the resolver.
pub mod operations {
    pub const GROUPS: &str = "groups";
    pub const ATTRIBUTE_TYPES: &str = "attribute_types";
    pub const STATEMENT_INDEX: &str = "statement_index";
    pub const DIRECT_ATTRIBUTES: &str = "direct_attributes";
    pub const GLOBAL_ATTRIBUTES: &str = "global_attributes";
    pub const ENTITY_ATTRIBUTES: &str = "entity_attributes";
    pub const MEMBERSHIPS: &str = "memberships";
    pub const ENTITY_MEMBERSHIPS: &str = "entity_memberships";
    pub const IDENTITIES: &str = "identities";
    pub const ENTITIES: &str = "entities";

    /// Every known operation, in reporting order.
    pub const ALL: [&str; 10] = [
        GROUPS,
        ATTRIBUTE_TYPES,
        STATEMENT_INDEX,
        DIRECT_ATTRIBUTES,
        GLOBAL_ATTRIBUTES,
        ENTITY_ATTRIBUTES,
        MEMBERSHIPS,
        ENTITY_MEMBERSHIPS,
        IDENTITIES,
        ENTITIES,
    ];
}

/// Aggregated timings of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    pub name: &'static str,
    pub calls: u64,
    pub total_ns: u64,
    pub max_ns: u64,
}

impl OperationStats {
    /// Mean latency, zero if the operation never ran.
    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_ns / self.calls)
        }
    }
}

#[derive(Debug)]
struct Counter {
    calls: AtomicU64,
    total_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl Counter {
    const fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            max_ns: AtomicU64::new(0),
        }
    }

    fn record(&self, nanos: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(nanos, Ordering::Relaxed);
        self.max_ns.fetch_max(nanos, Ordering::Relaxed);
    }

    fn load(&self, name: &'static str) -> OperationStats {
        OperationStats {
            name,
            calls: self.calls.load(Ordering::Relaxed),
            total_ns: self.total_ns.load(Ordering::Relaxed),
            max_ns: self.max_ns.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.total_ns.store(0, Ordering::Relaxed);
        self.max_ns.store(0, Ordering::Relaxed);
    }
}

/// Lock-free counters for the operations in [`operations::ALL`].
///
/// Unknown operation names are folded into an `other` bucket.
#[derive(Debug)]
pub struct AtomicInstrumentation {
    counters: [Counter; operations::ALL.len()],
    other: Counter,
}

impl Default for AtomicInstrumentation {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicInstrumentation {
    pub const OTHER: &'static str = "other";

    pub const fn new() -> Self {
        Self {
            counters: [const { Counter::new() }; operations::ALL.len()],
            other: Counter::new(),
        }
    }

    fn counter(&self, name: &str) -> &Counter {
        operations::ALL
            .iter()
            .position(|op| *op == name)
            .map_or(&self.other, |i| &self.counters[i])
    }

    /// Stats of one operation, `None` for an unknown name.
    pub fn stats(&self, name: &str) -> Option<OperationStats> {
        if name == Self::OTHER {
            return Some(self.other.load(Self::OTHER));
        }
        operations::ALL
            .iter()
            .position(|op| *op == name)
            .map(|i| self.counters[i].load(operations::ALL[i]))
    }

    /// Stats of every operation that ran at least once.
    pub fn snapshot(&self) -> Vec<OperationStats> {
        operations::ALL
            .iter()
            .zip(&self.counters)
            .map(|(name, counter)| counter.load(*name))
            .chain(std::iter::once(self.other.load(Self::OTHER)))
            .filter(|stats| stats.calls > 0)
            .collect()
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.reset();
        }
        self.other.reset();
    }
}

impl Instrumentation for AtomicInstrumentation {
    fn record(&self, name: &'static str, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.counter(name).record(nanos);
    }
}
