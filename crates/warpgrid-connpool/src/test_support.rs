//! Mock provider shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::handle::ConnectionHandle;
use crate::options::PoolGroupOptions;
use crate::pool::ConnectionPool;
use crate::provider::{ConnectionOptions, ConnectionProvider, PhysicalConnection};

#[derive(Debug)]
pub(crate) struct MockConnection {
    pub serial: u64,
    alive: Arc<AtomicBool>,
    closed: Arc<AtomicU64>,
}

impl PhysicalConnection for MockConnection {
    fn ping(&mut self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct MockOptions {
    connection_string: String,
}

impl ConnectionOptions for MockOptions {
    fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// Provider whose connections are plain counters.
///
/// - `alias=<name>` expands to `host=<name>`.
/// - strings containing `invalid` fail to parse.
/// - strings containing `nopool` disable pooling.
pub(crate) struct MockProvider {
    pub pool_options: Mutex<PoolGroupOptions>,
    pub creates: AtomicU64,
    pub parses: AtomicU64,
    pub metadata_builds: AtomicU64,
    pub metadata_cacheable: AtomicBool,
    pub fail_create: AtomicBool,
    pub alive: Arc<AtomicBool>,
    pub closed: Arc<AtomicU64>,
}

impl MockProvider {
    pub fn new(pool_options: PoolGroupOptions) -> Self {
        Self {
            pool_options: Mutex::new(pool_options),
            creates: AtomicU64::new(0),
            parses: AtomicU64::new(0),
            metadata_builds: AtomicU64::new(0),
            metadata_cacheable: AtomicBool::new(true),
            fail_create: AtomicBool::new(false),
            alive: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }
}

impl ConnectionProvider for MockProvider {
    type Connection = MockConnection;
    type Options = MockOptions;
    type ProviderInfo = String;
    type MetaData = u64;

    fn parse_options(
        &self,
        connection_string: &str,
        _previous: Option<&MockOptions>,
    ) -> anyhow::Result<MockOptions> {
        self.parses.fetch_add(1, Ordering::Relaxed);
        if connection_string.contains("invalid") {
            anyhow::bail!("unrecognized keyword in connection string");
        }
        let connection_string = match connection_string.strip_prefix("alias=") {
            Some(name) => format!("host={name}"),
            None => connection_string.to_string(),
        };
        Ok(MockOptions { connection_string })
    }

    fn pool_group_options(&self, options: &MockOptions) -> Option<PoolGroupOptions> {
        let pool_options = self.pool_options.lock().clone();
        if options.connection_string.contains("nopool") {
            Some(pool_options.without_pooling())
        } else {
            Some(pool_options)
        }
    }

    fn provider_info(&self, options: &MockOptions) -> String {
        format!("info:{}", options.connection_string)
    }

    fn create(
        &self,
        _options: &MockOptions,
        _provider_info: &String,
        _pool: Option<&ConnectionPool<Self>>,
        _owner: &ConnectionHandle<Self>,
    ) -> anyhow::Result<MockConnection> {
        if self.fail_create.load(Ordering::Relaxed) {
            anyhow::bail!("connection refused");
        }
        let serial = self.creates.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(MockConnection {
            serial,
            alive: Arc::clone(&self.alive),
            closed: Arc::clone(&self.closed),
        })
    }

    fn create_metadata_factory(
        &self,
        _options: &MockOptions,
        connection: &mut MockConnection,
    ) -> anyhow::Result<(u64, bool)> {
        self.metadata_builds.fetch_add(1, Ordering::Relaxed);
        Ok((
            connection.serial,
            self.metadata_cacheable.load(Ordering::Relaxed),
        ))
    }
}

pub(crate) fn test_options() -> PoolGroupOptions {
    PoolGroupOptions::default()
        .with_size(0, 3)
        .with_load_balance_timeout(std::time::Duration::from_millis(100))
}
