//! Performance counters the pool manager reports into.
//!
//! The manager only calls [`PoolCounters::increment`] and
//! [`PoolCounters::decrement`]; exporting the values is left to the
//! embedder. [`AtomicCounters`] keeps them in memory with lock-free atomics.

use std::sync::atomic::{AtomicI64, Ordering};

/// Counters maintained by the pool manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Physical connections opened by a provider.
    HardConnects,
    /// Physical connections closed.
    HardDisconnects,
    /// Connections currently open outside any pool.
    NonPooledConnections,
    ActiveConnectionPoolGroups,
    /// Groups pruned from the live map and waiting for release.
    InactiveConnectionPoolGroups,
    ActiveConnectionPools,
    /// Pools shut down and waiting for their connections to drain.
    InactiveConnectionPools,
}

impl Counter {
    pub const ALL: [Counter; 7] = [
        Counter::HardConnects,
        Counter::HardDisconnects,
        Counter::NonPooledConnections,
        Counter::ActiveConnectionPoolGroups,
        Counter::InactiveConnectionPoolGroups,
        Counter::ActiveConnectionPools,
        Counter::InactiveConnectionPools,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Counter::HardConnects => "hard_connects",
            Counter::HardDisconnects => "hard_disconnects",
            Counter::NonPooledConnections => "non_pooled_connections",
            Counter::ActiveConnectionPoolGroups => "active_connection_pool_groups",
            Counter::InactiveConnectionPoolGroups => "inactive_connection_pool_groups",
            Counter::ActiveConnectionPools => "active_connection_pools",
            Counter::InactiveConnectionPools => "inactive_connection_pools",
        };
        f.write_str(name)
    }
}

/// Sink for counter updates.
pub trait PoolCounters: Send + Sync {
    fn increment(&self, counter: Counter);
    fn decrement(&self, counter: Counter);
}

/// Discards every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCounters;

impl PoolCounters for NoopCounters {
    fn increment(&self, _counter: Counter) {}
    fn decrement(&self, _counter: Counter) {}
}

/// In-memory counters.
#[derive(Debug, Default)]
pub struct AtomicCounters {
    values: [AtomicI64; Counter::ALL.len()],
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter.
    pub fn get(&self, counter: Counter) -> i64 {
        self.values[counter.index()].load(Ordering::Relaxed)
    }

    /// `(counter, value)` pairs for every counter.
    pub fn snapshot(&self) -> Vec<(Counter, i64)> {
        Counter::ALL.iter().map(|c| (*c, self.get(*c))).collect()
    }
}

impl PoolCounters for AtomicCounters {
    fn increment(&self, counter: Counter) {
        self.values[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn decrement(&self, counter: Counter) {
        self.values[counter.index()].fetch_sub(1, Ordering::Relaxed);
    }
}
