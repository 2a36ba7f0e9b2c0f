//! warpgrid-connpool — connection pool lifecycle manager for WarpGrid.
//!
//! Creates, reuses, quarantines and retires expensive backend connections
//! behind logical connection strings. Backends plug in through the
//! [`ConnectionProvider`] trait; this crate never speaks a wire protocol.
//!
//! # Architecture
//!
//! ```text
//! ConnectionFactory
//!   ├── live map: connection string → PoolGroup   (ArcSwap, copy-on-write)
//!   │   └── PoolGroup (Active | Disabled)
//!   │       ├── parsed options, provider info, cached metadata
//!   │       └── ConnectionPool (lazy, at most one)
//!   │           └── idle connections + semaphore bounded by max_pool_size
//!   ├── pools pending release    (shut down, waiting for returns)
//!   ├── groups pending release   (pruned out of the live map)
//!   └── PruningTimer             (4m initial delay, then every 30s)
//! ```
//!
//! # Lifecycle
//!
//! A request resolves the owner's group (creating it on first sight), then
//! the group's pool, then checks out an idle connection or opens a new one
//! through the provider. Dropping the [`PooledConnection`] returns it.
//!
//! The pruning sweep evicts idle connections past their `idle_timeout`,
//! moves groups whose pool owns nothing out of the live map, and finalizes
//! pools once every checked-out connection has come back. A handle whose
//! group was pruned gets a fresh group with the same options on its next
//! request.

pub mod config;
pub mod connection;
pub mod counters;
pub mod error;
pub mod factory;
pub mod group;
pub mod handle;
pub mod options;
pub mod pool;
pub mod provider;
pub mod timer;

#[cfg(test)]
mod test_support;

pub use config::{ConnPoolConfig, FactoryConfig};
pub use connection::PooledConnection;
pub use counters::{AtomicCounters, Counter, NoopCounters, PoolCounters};
pub use error::{PoolError, PoolResult};
pub use factory::ConnectionFactory;
pub use group::{PoolGroup, PoolLookup};
pub use handle::ConnectionHandle;
pub use options::PoolGroupOptions;
pub use pool::{ConnectionPool, PoolId, PoolStats};
pub use provider::{ConnectionOptions, ConnectionProvider, PhysicalConnection};
pub use timer::PruningTimer;
