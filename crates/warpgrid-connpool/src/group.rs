//! Pool group — the entry behind one (expanded) connection string.
//!
//! A group owns at most one [`ConnectionPool`], created on first use, plus
//! the provider's per-group data and a lazily cached metadata factory.
//!
//! ```text
//! Active(None) ──first pooled acquire──▶ Active(Some(pool))
//!      ▲                                      │ prune: pool empty
//!      │                                      ▼
//!      └──────── prune ◀──────────── pool queued for release
//!                  │
//!                  ▼
//!              Disabled ──next lookup──▶ new group (same options)
//! ```
//!
//! `Disabled` is terminal for the group object. A group that is absent from
//! the factory's live map has no state at all.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::counters::Counter;
use crate::error::{PoolError, PoolResult};
use crate::factory::ConnectionFactory;
use crate::options::PoolGroupOptions;
use crate::pool::ConnectionPool;
use crate::provider::ConnectionProvider;

enum GroupState<P: ConnectionProvider> {
    Active(Option<Arc<ConnectionPool<P>>>),
    Disabled,
}

/// What a connection request should do for this group.
pub enum PoolLookup<P: ConnectionProvider> {
    Pooled(Arc<ConnectionPool<P>>),
    /// Pooling is off for the group; open a standalone connection.
    NonPooled,
    /// The group was pruned; resolve a fresh one.
    Disabled,
}

pub struct PoolGroup<P: ConnectionProvider> {
    connection_string: String,
    options: Arc<P::Options>,
    pool_options: Option<PoolGroupOptions>,
    provider_info: Arc<P::ProviderInfo>,
    state: Mutex<GroupState<P>>,
    metadata: Mutex<Option<Arc<P::MetaData>>>,
}

impl<P: ConnectionProvider> PoolGroup<P> {
    pub(crate) fn new(
        connection_string: String,
        options: Arc<P::Options>,
        pool_options: Option<PoolGroupOptions>,
        provider_info: P::ProviderInfo,
    ) -> Self {
        Self {
            connection_string,
            options,
            pool_options,
            provider_info: Arc::new(provider_info),
            state: Mutex::new(GroupState::Active(None)),
            metadata: Mutex::new(None),
        }
    }

    /// The key this group is stored under.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn options(&self) -> &Arc<P::Options> {
        &self.options
    }

    pub fn pool_options(&self) -> Option<&PoolGroupOptions> {
        self.pool_options.as_ref()
    }

    pub fn provider_info(&self) -> &P::ProviderInfo {
        &self.provider_info
    }

    pub fn is_pooled(&self) -> bool {
        self.pool_options.as_ref().is_some_and(|o| o.pooling_enabled)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(*self.state.lock(), GroupState::Disabled)
    }

    /// The current pool, without creating one.
    pub fn connection_pool(&self) -> Option<Arc<ConnectionPool<P>>> {
        match &*self.state.lock() {
            GroupState::Active(pool) => pool.clone(),
            GroupState::Disabled => None,
        }
    }

    /// Resolve the pool a connection request should use, creating it on
    /// first call. A pool that was shut down behind the group's back is
    /// replaced and queued for release.
    pub fn get_connection_pool(&self, factory: &ConnectionFactory<P>) -> PoolLookup<P> {
        let Some(pool_options) = self.pool_options.as_ref().filter(|o| o.pooling_enabled) else {
            if self.is_disabled() {
                return PoolLookup::Disabled;
            }
            return PoolLookup::NonPooled;
        };

        let (pool, retired) = {
            let mut state = self.state.lock();
            let GroupState::Active(slot) = &mut *state else {
                return PoolLookup::Disabled;
            };
            if let Some(pool) = slot.as_ref().filter(|p| !p.is_shut_down()) {
                return PoolLookup::Pooled(Arc::clone(pool));
            }

            let pool = Arc::new(ConnectionPool::new(
                Arc::clone(factory.provider_arc()),
                Arc::clone(&self.options),
                Arc::clone(&self.provider_info),
                pool_options.clone(),
                Arc::clone(factory.counters()),
            ));
            factory.counters().increment(Counter::ActiveConnectionPools);
            info!(
                pool = %pool.id(),
                max_pool_size = pool_options.max_pool_size,
                "connection pool created"
            );
            (Arc::clone(&pool), slot.replace(pool))
        };

        if let Some(retired) = retired {
            factory.queue_pool_for_release(retired, false);
        }
        PoolLookup::Pooled(pool)
    }

    /// Clear the owned pool, if any.
    pub fn clear(&self) {
        if let Some(pool) = self.connection_pool() {
            pool.clear();
        }
    }

    /// Evict idle connections and, once the pool owns nothing, hand it to
    /// the factory's release queue and disable the group. Returns `true`
    /// when the group is now disabled and can leave the live map.
    pub(crate) fn prune(&self, factory: &ConnectionFactory<P>) -> bool {
        let pool = match &*self.state.lock() {
            GroupState::Disabled => return true,
            GroupState::Active(pool) => pool.clone(),
        };
        if let Some(pool) = &pool {
            pool.prune_idle();
        }

        let emptied = {
            let mut state = self.state.lock();
            let GroupState::Active(slot) = &mut *state else {
                return true;
            };
            if slot.as_ref().is_some_and(|p| !p.try_shutdown_if_empty()) {
                return false;
            }
            let emptied = slot.take();
            *state = GroupState::Disabled;
            emptied
        };

        if let Some(pool) = emptied {
            factory.queue_pool_for_release(pool, false);
        }
        debug!("pool group pruned to empty");
        true
    }

    /// Disable the group and queue any pool it still owns. Used on groups
    /// already removed from the live map.
    pub(crate) fn release_pools(&self, factory: &ConnectionFactory<P>) {
        let remaining = {
            let mut state = self.state.lock();
            let pool = match &mut *state {
                GroupState::Active(slot) => slot.take(),
                GroupState::Disabled => None,
            };
            *state = GroupState::Disabled;
            pool
        };
        if let Some(pool) = remaining {
            factory.queue_pool_for_release(pool, true);
        }
    }

    /// A fresh active group sharing this one's key, parsed options and
    /// provider info.
    pub(crate) fn resurrect(&self) -> Self {
        Self {
            connection_string: self.connection_string.clone(),
            options: Arc::clone(&self.options),
            pool_options: self.pool_options.clone(),
            provider_info: Arc::clone(&self.provider_info),
            state: Mutex::new(GroupState::Active(None)),
            metadata: Mutex::new(None),
        }
    }

    /// The group's metadata factory, built from `connection` on first use.
    /// Cached only when the provider reports the result as cacheable.
    pub fn metadata_factory(
        &self,
        provider: &P,
        connection: &mut P::Connection,
    ) -> PoolResult<Arc<P::MetaData>> {
        if let Some(cached) = self.metadata.lock().as_ref() {
            return Ok(Arc::clone(cached));
        }

        let (metadata, cacheable) = provider
            .create_metadata_factory(&self.options, connection)
            .map_err(PoolError::MetaData)?;
        let metadata = Arc::new(metadata);
        if !cacheable {
            return Ok(metadata);
        }

        // A concurrent builder may have cached first; keep theirs.
        let mut slot = self.metadata.lock();
        Ok(Arc::clone(slot.get_or_insert(metadata)))
    }
}

impl<P: ConnectionProvider> std::fmt::Debug for PoolGroup<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGroup")
            .field("pool_options", &self.pool_options)
            .field("disabled", &self.is_disabled())
            .field("pool", &self.connection_pool().map(|p| p.id()))
            .finish_non_exhaustive()
    }
}
