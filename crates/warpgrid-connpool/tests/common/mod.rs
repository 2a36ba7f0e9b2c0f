//! Shared fixtures: an in-memory backend provider with call counters.

#![allow(dead_code)]

use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use warpgrid_connpool::{
    AtomicCounters, ConnectionFactory, ConnectionHandle, ConnectionOptions, ConnectionPool,
    ConnectionProvider, FactoryConfig, PhysicalConnection, PoolGroupOptions,
};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output. Controlled by `RUST_LOG`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── MemoryBackend ───────────────────────────────────────────────────

pub struct MemoryConnection {
    pub serial: u64,
    closed: Arc<AtomicU64>,
}

impl PhysicalConnection for MemoryConnection {
    fn close(&mut self) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MemoryOptions {
    key: String,
}

impl ConnectionOptions for MemoryOptions {
    fn connection_string(&self) -> &str {
        &self.key
    }
}

/// Provider whose "connections" are serial numbers. `alias=<name>` expands
/// to `host=<name>`; `pooling=false` disables pooling for that string.
pub struct MemoryBackend {
    pool_options: PoolGroupOptions,
    creates: AtomicU64,
    parses: AtomicU64,
    closed: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new(pool_options: PoolGroupOptions) -> Self {
        Self {
            pool_options,
            creates: AtomicU64::new(0),
            parses: AtomicU64::new(0),
            closed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn parses(&self) -> u64 {
        self.parses.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConnectionProvider for MemoryBackend {
    type Connection = MemoryConnection;
    type Options = MemoryOptions;
    type ProviderInfo = ();
    type MetaData = ();

    fn parse_options(
        &self,
        connection_string: &str,
        _previous: Option<&MemoryOptions>,
    ) -> anyhow::Result<MemoryOptions> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        let key = match connection_string.strip_prefix("alias=") {
            Some(name) => format!("host={name}"),
            None => connection_string.to_string(),
        };
        Ok(MemoryOptions { key })
    }

    fn pool_group_options(&self, options: &MemoryOptions) -> Option<PoolGroupOptions> {
        if options.key.contains("pooling=false") {
            Some(self.pool_options.clone().without_pooling())
        } else {
            Some(self.pool_options.clone())
        }
    }

    fn provider_info(&self, _options: &MemoryOptions) {}

    fn create(
        &self,
        _options: &MemoryOptions,
        _provider_info: &(),
        _pool: Option<&ConnectionPool<Self>>,
        _owner: &ConnectionHandle<Self>,
    ) -> anyhow::Result<MemoryConnection> {
        let serial = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemoryConnection {
            serial,
            closed: Arc::clone(&self.closed),
        })
    }

    fn create_metadata_factory(
        &self,
        _options: &MemoryOptions,
        _connection: &mut MemoryConnection,
    ) -> anyhow::Result<((), bool)> {
        Ok(((), true))
    }
}

// ── Factory helpers ─────────────────────────────────────────────────

pub fn pool_options(max_pool_size: usize) -> PoolGroupOptions {
    PoolGroupOptions::default()
        .with_size(0, max_pool_size)
        .with_load_balance_timeout(Duration::from_millis(200))
}

/// A factory without a pruning timer; tests drive sweeps by hand.
pub fn factory(
    pool_options: PoolGroupOptions,
) -> (Arc<ConnectionFactory<MemoryBackend>>, Arc<AtomicCounters>) {
    init_tracing();
    let counters = Arc::new(AtomicCounters::new());
    let factory = ConnectionFactory::with_counters(
        MemoryBackend::new(pool_options),
        FactoryConfig::default(),
        counters.clone(),
    );
    (factory, counters)
}
