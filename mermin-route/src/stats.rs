//! Lock-free statistics counters and their reportable snapshot.
//!
//! Counters are plain `AtomicU64`s so the reporter can read them while the
//! route cache lock is held by a resolving thread. Every component lists its
//! counters explicitly in its `report()` implementation.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::Serialize;

/// A snapshot of counters, keyed by counter name.
pub type Stats = BTreeMap<String, StatValue>;

/// A single reported value: either a counter or a nested group of counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Counter(u64),
    Group(Stats),
}

impl StatValue {
    /// Returns the counter value, or `None` for a nested group.
    pub fn as_counter(&self) -> Option<u64> {
        match self {
            Self::Counter(v) => Some(*v),
            Self::Group(_) => None,
        }
    }

    /// Returns the nested group, or `None` for a counter.
    pub fn as_group(&self) -> Option<&Stats> {
        match self {
            Self::Counter(_) => None,
            Self::Group(g) => Some(g),
        }
    }
}

impl From<u64> for StatValue {
    fn from(v: u64) -> Self {
        Self::Counter(v)
    }
}

impl From<Stats> for StatValue {
    fn from(g: Stats) -> Self {
        Self::Group(g)
    }
}

/// Something that can produce a point-in-time snapshot of its counters.
pub trait StatsReporter: Send + Sync {
    fn report(&self) -> Stats;
}

/// Monotonic unsigned counter updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the counter. Only gauge-like counters (live entry counts) use this.
    pub fn dec(&self) {
        // saturates at zero
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Builds a [`Stats`] map from `(name, counter)` pairs.
pub(crate) fn collect<'a>(counters: impl IntoIterator<Item = (&'a str, &'a Counter)>) -> Stats {
    counters
        .into_iter()
        .map(|(name, counter)| (name.to_string(), StatValue::Counter(counter.get())))
        .collect()
}
