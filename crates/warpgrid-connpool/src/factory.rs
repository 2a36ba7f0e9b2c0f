//! Connection factory — the top-level coordinator.
//!
//! Maps connection strings to [`PoolGroup`]s, routes connection requests to
//! the right pool, and runs the three-phase pruning sweep that retires idle
//! pools and groups through two deferred release queues.
//!
//! The live map is published through an [`ArcSwap`]: readers take a lock-free
//! snapshot, writers serialize on `groups_write_lock` and store a freshly
//! copied map.
//!
//! Lock order: `groups_write_lock` → group state → pool state / pool release
//! queue. No lock is held while awaiting.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::FactoryConfig;
use crate::connection::PooledConnection;
use crate::counters::{Counter, NoopCounters, PoolCounters};
use crate::error::{PoolError, PoolResult};
use crate::group::{PoolGroup, PoolLookup};
use crate::handle::ConnectionHandle;
use crate::pool::{ConnectionPool, PoolStats};
use crate::provider::{ConnectionOptions, ConnectionProvider};
use crate::timer::PruningTimer;

type GroupMap<P> = HashMap<String, Arc<PoolGroup<P>>>;

/// Attempts `get_connection` makes when its group or pool is retired
/// mid-request.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

pub struct ConnectionFactory<P: ConnectionProvider> {
    provider: Arc<P>,
    config: FactoryConfig,
    counters: Arc<dyn PoolCounters>,
    groups: ArcSwap<GroupMap<P>>,
    groups_write_lock: Mutex<()>,
    pools_to_release: Mutex<Vec<Arc<ConnectionPool<P>>>>,
    groups_to_release: Mutex<Vec<Arc<PoolGroup<P>>>>,
    pruning_timer: Mutex<Option<PruningTimer>>,
}

impl<P: ConnectionProvider> ConnectionFactory<P> {
    /// Build a factory without a pruning timer.
    pub fn new(provider: P, config: FactoryConfig) -> Arc<Self> {
        Self::with_counters(provider, config, Arc::new(NoopCounters))
    }

    pub fn with_counters(
        provider: P,
        config: FactoryConfig,
        counters: Arc<dyn PoolCounters>,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider: Arc::new(provider),
            config,
            counters,
            groups: ArcSwap::from_pointee(HashMap::new()),
            groups_write_lock: Mutex::new(()),
            pools_to_release: Mutex::new(Vec::new()),
            groups_to_release: Mutex::new(Vec::new()),
            pruning_timer: Mutex::new(None),
        })
    }

    /// Build a factory and, when enabled in `config`, start its pruning
    /// timer. Must be called from within a tokio runtime.
    pub fn start(provider: P, config: FactoryConfig) -> PoolResult<Arc<Self>> {
        let factory = Self::new(provider, config);
        if factory.config.pruning_enabled {
            factory.start_pruning()?;
        }
        Ok(factory)
    }

    /// Spawn the pruning timer unless one is already running. Fails on a
    /// zero pruning interval.
    pub fn start_pruning(self: &Arc<Self>) -> PoolResult<()> {
        let mut timer = self.pruning_timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        *timer = Some(PruningTimer::start(
            Arc::downgrade(self),
            self.config.pruning_initial_delay,
            self.config.pruning_interval,
        )?);
        Ok(())
    }

    pub fn stop_pruning(&self) {
        let timer = self.pruning_timer.lock().take();
        if let Some(timer) = timer {
            timer.stop();
        }
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub(crate) fn provider_arc(&self) -> &Arc<P> {
        &self.provider
    }

    pub(crate) fn counters(&self) -> &Arc<dyn PoolCounters> {
        &self.counters
    }

    // ── Connection requests ─────────────────────────────────────────

    /// Hand out a connection for `owner`'s connection string.
    ///
    /// Pooled groups check out from their pool, waiting at most the group's
    /// `load_balance_timeout` before failing with [`PoolError::Timeout`].
    /// Non-pooled groups open a standalone connection that is closed when
    /// dropped. Provider errors propagate unchanged.
    pub async fn get_connection(
        &self,
        owner: &ConnectionHandle<P>,
    ) -> PoolResult<PooledConnection<P>> {
        let mut last_error = PoolError::GroupDisabled;
        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let group = self.owner_pool_group(owner)?;
            let pool = match group.get_connection_pool(self) {
                PoolLookup::Pooled(pool) => pool,
                PoolLookup::NonPooled => return self.open_non_pooled(&group, owner),
                PoolLookup::Disabled => {
                    debug!(attempt, "pool group disabled during acquire, retrying");
                    last_error = PoolError::GroupDisabled;
                    continue;
                }
            };

            match pool.acquire(owner).await {
                Ok(Some(conn)) => return Ok(conn),
                Ok(None) => {
                    return Err(PoolError::Timeout {
                        pool: pool.id(),
                        timeout: pool.pool_options().load_balance_timeout,
                    });
                }
                Err(e @ PoolError::PoolShutDown(_)) => {
                    debug!(attempt, pool = %pool.id(), "pool shut down during acquire, retrying");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    fn open_non_pooled(
        &self,
        group: &PoolGroup<P>,
        owner: &ConnectionHandle<P>,
    ) -> PoolResult<PooledConnection<P>> {
        let conn = self
            .provider
            .create(group.options(), group.provider_info(), None, owner)
            .map_err(PoolError::ConnectionCreation)?;
        self.counters.increment(Counter::HardConnects);
        self.counters.increment(Counter::NonPooledConnections);
        debug!("opened non-pooled connection");
        Ok(PooledConnection::standalone(conn, Arc::clone(&self.counters)))
    }

    /// The live group for `owner`, resolving (or resurrecting) it when the
    /// handle has none cached or its cached group was pruned.
    fn owner_pool_group(&self, owner: &ConnectionHandle<P>) -> PoolResult<Arc<PoolGroup<P>>> {
        let cached = owner.pool_group();
        if let Some(group) = cached.as_ref().filter(|g| !g.is_disabled()) {
            return Ok(Arc::clone(group));
        }
        let group = self
            .get_pool_group(owner.connection_string(), cached.as_ref())?
            .ok_or_else(|| PoolError::Configuration("connection string is empty".to_string()))?;
        owner.set_pool_group(Arc::clone(&group));
        Ok(group)
    }

    // ── Pool groups ─────────────────────────────────────────────────

    /// Look up the group for `connection_string`, creating it if absent.
    ///
    /// Returns `None` for an empty string. When `previous` (or the map's
    /// entry) is a disabled group, a fresh group is built from its options
    /// without re-parsing. Otherwise the string is parsed by the provider;
    /// if parsing expands it, the lookup is retried once under the expanded
    /// key. Concurrent callers for the same key always get the same group.
    pub fn get_pool_group(
        &self,
        connection_string: &str,
        previous: Option<&Arc<PoolGroup<P>>>,
    ) -> PoolResult<Option<Arc<PoolGroup<P>>>> {
        if connection_string.is_empty() {
            return Ok(None);
        }
        if let Some(group) = self.live_group(connection_string) {
            return Ok(Some(group));
        }

        let disabled = previous
            .filter(|g| g.is_disabled())
            .cloned()
            .or_else(|| {
                self.groups
                    .load()
                    .get(connection_string)
                    .filter(|g| g.is_disabled())
                    .cloned()
            });
        if let Some(disabled) = disabled {
            if let Some(group) = self.live_group(disabled.connection_string()) {
                return Ok(Some(group));
            }
            debug!("resurrecting disabled pool group");
            return Ok(Some(self.install_group(disabled.resurrect())));
        }

        self.resolve_pool_group(connection_string, None, true).map(Some)
    }

    fn resolve_pool_group(
        &self,
        key: &str,
        previous_options: Option<&P::Options>,
        allow_expand: bool,
    ) -> PoolResult<Arc<PoolGroup<P>>> {
        if let Some(group) = self.live_group(key) {
            return Ok(group);
        }

        let options = self
            .provider
            .parse_options(key, previous_options)
            .map_err(|e| PoolError::Configuration(format!("{e:#}")))?;
        if allow_expand && options.connection_string() != key {
            let expanded = options.connection_string().to_string();
            return self.resolve_pool_group(&expanded, Some(&options), false);
        }

        let pool_options = self.provider.pool_group_options(&options);
        if let Some(pool_options) = &pool_options {
            pool_options.validate()?;
        }
        let provider_info = self.provider.provider_info(&options);
        let candidate = PoolGroup::new(
            key.to_string(),
            Arc::new(options),
            pool_options,
            provider_info,
        );
        Ok(self.install_group(candidate))
    }

    /// Publish `candidate` unless a concurrent caller already installed a
    /// group under the same key, in which case that one wins.
    fn install_group(&self, candidate: PoolGroup<P>) -> Arc<PoolGroup<P>> {
        let _guard = self.groups_write_lock.lock();
        let current = self.groups.load();
        if let Some(existing) = current.get(candidate.connection_string()) {
            debug_assert!(
                !existing.is_disabled(),
                "disabled pool group left in the live map"
            );
            return Arc::clone(existing);
        }

        let group = Arc::new(candidate);
        let mut next: GroupMap<P> = (**current).clone();
        next.insert(group.connection_string().to_string(), Arc::clone(&group));
        let groups = next.len();
        self.groups.store(Arc::new(next));
        self.counters.increment(Counter::ActiveConnectionPoolGroups);
        info!(groups, pooled = group.is_pooled(), "pool group created");
        group
    }

    fn live_group(&self, key: &str) -> Option<Arc<PoolGroup<P>>> {
        self.groups
            .load()
            .get(key)
            .filter(|g| !g.is_disabled())
            .cloned()
    }

    // ── Clearing ────────────────────────────────────────────────────

    /// Clear the pool behind `connection_string`, if one exists. Never
    /// creates a group.
    pub fn clear_pool(&self, connection_string: &str) -> PoolResult<()> {
        if connection_string.is_empty() {
            return Ok(());
        }
        let group = match self.live_group(connection_string) {
            Some(group) => Some(group),
            None => {
                let options = self
                    .provider
                    .parse_options(connection_string, None)
                    .map_err(|e| PoolError::Configuration(format!("{e:#}")))?;
                self.live_group(options.connection_string())
            }
        };
        if let Some(group) = group {
            group.clear();
        }
        Ok(())
    }

    /// Clear the pool `owner` resolves to.
    pub fn clear_pool_for(&self, owner: &ConnectionHandle<P>) -> PoolResult<()> {
        match owner.pool_group().filter(|g| !g.is_disabled()) {
            Some(group) => {
                group.clear();
                Ok(())
            }
            None => self.clear_pool(owner.connection_string()),
        }
    }

    pub fn clear_all_pools(&self) {
        let groups = self.groups.load();
        for group in groups.values() {
            group.clear();
        }
        info!(groups = groups.len(), "cleared all connection pools");
    }

    // ── Release and pruning ─────────────────────────────────────────

    /// Shut `pool` down and park it until it owns no connections. With
    /// `clearing`, connections checked out now are destroyed on return as
    /// well. Queuing an already queued pool only shuts it down again.
    pub fn queue_pool_for_release(&self, pool: Arc<ConnectionPool<P>>, clearing: bool) {
        pool.shutdown();
        if clearing {
            pool.clear();
        }
        if !pool.mark_queued() {
            return;
        }
        info!(pool = %pool.id(), remaining = pool.count(), "connection pool queued for release");
        self.pools_to_release.lock().push(pool);
        self.counters.decrement(Counter::ActiveConnectionPools);
        self.counters.increment(Counter::InactiveConnectionPools);
    }

    /// Run one pruning sweep:
    ///
    /// 1. release parked pools whose connections have all come back;
    /// 2. release parked groups, handing any pool they still own to phase 1;
    /// 3. prune every live group, moving the ones that emptied out of the
    ///    live map and into the group release queue.
    pub fn prune_connection_pool_groups(&self) {
        self.release_pending_pools();
        self.release_pending_groups();
        self.prune_live_groups();
    }

    fn release_pending_pools(&self) {
        let pending = std::mem::take(&mut *self.pools_to_release.lock());
        if pending.is_empty() {
            return;
        }

        let mut survivors = Vec::new();
        for pool in pending {
            pool.clear();
            if pool.count() == 0 {
                self.counters.decrement(Counter::InactiveConnectionPools);
                info!(pool = %pool.id(), "connection pool released");
            } else {
                survivors.push(pool);
            }
        }

        if !survivors.is_empty() {
            let mut queue = self.pools_to_release.lock();
            survivors.append(&mut *queue);
            *queue = survivors;
        }
    }

    fn release_pending_groups(&self) {
        let pending = std::mem::take(&mut *self.groups_to_release.lock());
        for group in pending {
            group.release_pools(self);
            self.counters.decrement(Counter::InactiveConnectionPoolGroups);
            debug!("pool group released");
        }
    }

    fn prune_live_groups(&self) {
        let _guard = self.groups_write_lock.lock();
        let current = self.groups.load_full();

        let mut kept = GroupMap::<P>::with_capacity(current.len());
        let mut pruned = Vec::new();
        for (key, group) in current.iter() {
            if group.prune(self) {
                pruned.push(Arc::clone(group));
            } else {
                kept.insert(key.clone(), Arc::clone(group));
            }
        }
        if pruned.is_empty() {
            return;
        }

        let remaining = kept.len();
        self.groups.store(Arc::new(kept));
        info!(pruned = pruned.len(), remaining, "pruned idle pool groups");

        let mut queue = self.groups_to_release.lock();
        for group in pruned {
            self.counters.decrement(Counter::ActiveConnectionPoolGroups);
            self.counters.increment(Counter::InactiveConnectionPoolGroups);
            queue.push(group);
        }
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// The live group stored under `key`, without parsing or creating.
    pub fn pool_group(&self, key: &str) -> Option<Arc<PoolGroup<P>>> {
        self.live_group(key)
    }

    pub fn pool_stats(&self, key: &str) -> Option<PoolStats> {
        self.live_group(key)?.connection_pool().map(|pool| pool.stats())
    }

    pub fn group_count(&self) -> usize {
        self.groups.load().len()
    }

    pub fn pending_pool_releases(&self) -> usize {
        self.pools_to_release.lock().len()
    }

    pub fn pending_group_releases(&self) -> usize {
        self.groups_to_release.lock().len()
    }

    /// The metadata factory of `owner`'s group, built from `connection` if
    /// not cached yet.
    pub fn metadata_factory(
        &self,
        owner: &ConnectionHandle<P>,
        connection: &mut PooledConnection<P>,
    ) -> PoolResult<Arc<P::MetaData>> {
        let group = self.owner_pool_group(owner)?;
        group.metadata_factory(&self.provider, &mut **connection)
    }
}

impl<P: ConnectionProvider> std::fmt::Debug for ConnectionFactory<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("config", &self.config)
            .field("groups", &self.group_count())
            .field("pending_pool_releases", &self.pending_pool_releases())
            .field("pending_group_releases", &self.pending_group_releases())
            .finish_non_exhaustive()
    }
}
