//! Connection pool — the bounded set of physical connections behind one
//! pool group.
//!
//! # Accounting
//!
//! ```text
//! total = idle + checked out + being opened      (never exceeds max_pool_size)
//! semaphore permits = max_pool_size - (checked out + being opened)
//! ```
//!
//! A checked-out connection holds a forgotten semaphore permit; returning
//! it adds the permit back whether the connection is re-pooled or destroyed.
//! Shutting the pool down closes the semaphore so waiters fail fast.
//!
//! `Clear()` bumps the pool's generation. Connections remember the
//! generation they were opened under and are destroyed on return once it
//! has moved on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::connection::{PooledConnection, Slot};
use crate::counters::{Counter, PoolCounters};
use crate::error::{PoolError, PoolResult};
use crate::handle::ConnectionHandle;
use crate::options::PoolGroupOptions;
use crate::provider::{ConnectionProvider, PhysicalConnection};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique pool identifier, used in logs and errors in place of the
/// connection string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u64);

impl PoolId {
    fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Pool-level statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections checked out (or being opened).
    pub active: usize,
    /// Connections sitting idle in the pool.
    pub idle: usize,
    /// Total connections (active + idle).
    pub total: usize,
    /// Number of acquires that timed out waiting for capacity.
    pub wait_count: u64,
}

struct PoolState<C> {
    /// Most recently returned at the back.
    idle: VecDeque<Slot<C>>,
    total: usize,
    generation: u64,
    shutting_down: bool,
    /// Handed to the factory's release queue.
    queued: bool,
    wait_count: u64,
}

/// Outcome of the locked part of an acquire.
enum Checkout<C> {
    Idle(Slot<C>),
    Open { generation: u64 },
}

pub struct ConnectionPool<P: ConnectionProvider> {
    id: PoolId,
    provider: Arc<P>,
    options: Arc<P::Options>,
    provider_info: Arc<P::ProviderInfo>,
    pool_options: PoolGroupOptions,
    counters: Arc<dyn PoolCounters>,
    state: Mutex<PoolState<P::Connection>>,
    semaphore: Arc<Semaphore>,
}

impl<P: ConnectionProvider> ConnectionPool<P> {
    pub(crate) fn new(
        provider: Arc<P>,
        options: Arc<P::Options>,
        provider_info: Arc<P::ProviderInfo>,
        pool_options: PoolGroupOptions,
        counters: Arc<dyn PoolCounters>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(pool_options.max_pool_size));
        Self {
            id: PoolId::next(),
            provider,
            options,
            provider_info,
            pool_options,
            counters,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                generation: 0,
                shutting_down: false,
                queued: false,
                wait_count: 0,
            }),
            semaphore,
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn pool_options(&self) -> &PoolGroupOptions {
        &self.pool_options
    }

    /// Check out a connection.
    ///
    /// Reuses the most recently returned idle connection when one passes
    /// its liveness and lifetime checks; otherwise opens a new one through
    /// the provider. When the pool is at `max_pool_size`, waits up to
    /// `load_balance_timeout` for a return and yields `Ok(None)` if none
    /// arrives. Fails with [`PoolError::PoolShutDown`] once the pool is
    /// shutting down.
    pub async fn acquire(
        self: &Arc<Self>,
        owner: &ConnectionHandle<P>,
    ) -> PoolResult<Option<PooledConnection<P>>> {
        if self.is_shut_down() {
            return Err(PoolError::PoolShutDown(self.id));
        }

        let timeout = self.pool_options.load_balance_timeout;
        let permit = match tokio::time::timeout(timeout, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::PoolShutDown(self.id)),
            Err(_) => {
                self.state.lock().wait_count += 1;
                warn!(pool = %self.id, timeout = ?timeout, "timed out waiting for a pooled connection");
                return Ok(None);
            }
        };

        let generation = loop {
            let checkout = {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return Err(PoolError::PoolShutDown(self.id));
                }
                match state.idle.pop_back() {
                    Some(slot) => Checkout::Idle(slot),
                    None => {
                        // Reserve the slot so a concurrent prune sees the pool as non-empty.
                        state.total += 1;
                        Checkout::Open {
                            generation: state.generation,
                        }
                    }
                }
            };

            match checkout {
                Checkout::Idle(mut slot) => {
                    if self.lifetime_exceeded(&slot) || !slot.conn.ping() {
                        debug!(pool = %self.id, connection = slot.id, "discarded stale idle connection");
                        self.discard(slot);
                        continue;
                    }
                    slot.last_used = tokio::time::Instant::now();
                    permit.forget();
                    debug!(pool = %self.id, connection = slot.id, "reused idle connection from pool");
                    return Ok(Some(PooledConnection::pooled(slot, Arc::clone(self))));
                }
                Checkout::Open { generation } => break generation,
            }
        };

        let conn = match self
            .provider
            .create(&self.options, &self.provider_info, Some(&**self), owner)
        {
            Ok(conn) => conn,
            Err(e) => {
                self.state.lock().total -= 1;
                debug!(pool = %self.id, error = %e, "failed to open pooled connection");
                return Err(PoolError::ConnectionCreation(e));
            }
        };
        self.counters.increment(Counter::HardConnects);

        let slot = Slot::new(conn, generation);
        permit.forget();
        debug!(pool = %self.id, connection = slot.id, "opened new pooled connection");
        Ok(Some(PooledConnection::pooled(slot, Arc::clone(self))))
    }

    /// Take back a checked-out connection.
    ///
    /// The connection is destroyed instead of re-pooled when the pool is
    /// shutting down, was cleared since it was opened, the caller marked it
    /// broken, or it outlived `connection_lifetime`.
    pub(crate) fn release(&self, mut slot: Slot<P::Connection>, broken: bool) {
        let doomed = {
            let mut state = self.state.lock();
            let reason = if state.shutting_down {
                Some("pool shut down")
            } else if slot.generation != state.generation {
                Some("pool cleared")
            } else if broken {
                Some("marked broken")
            } else if self.lifetime_exceeded(&slot) {
                Some("lifetime exceeded")
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    state.total -= 1;
                    Some((slot, reason))
                }
                None => {
                    slot.last_used = tokio::time::Instant::now();
                    debug!(
                        pool = %self.id,
                        connection = slot.id,
                        idle_count = state.idle.len() + 1,
                        "returned connection to pool"
                    );
                    state.idle.push_back(slot);
                    None
                }
            }
        };
        self.semaphore.add_permits(1);

        if let Some((slot, reason)) = doomed {
            debug!(pool = %self.id, connection = slot.id, reason, "destroying connection on return");
            slot.destroy(self.counters.as_ref());
        }
    }

    /// Destroy every idle connection. Checked-out connections are destroyed
    /// when they come back.
    pub fn clear(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.generation += 1;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.total -= drained.len();
            drained
        };
        if !drained.is_empty() {
            info!(pool = %self.id, closed = drained.len(), "cleared idle connections");
        }
        for slot in drained {
            slot.destroy(self.counters.as_ref());
        }
    }

    /// Stop handing out connections. Idle connections are destroyed now,
    /// checked-out ones on return. Pending and future acquires fail fast.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.state.lock();
            if !state.shutting_down {
                info!(pool = %self.id, total = state.total, "connection pool shutting down");
            }
            state.shutting_down = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.total -= drained.len();
            drained
        };
        self.semaphore.close();
        for slot in drained {
            slot.destroy(self.counters.as_ref());
        }
    }

    /// Shut the pool down only if it owns no connections at all. Returns
    /// whether it did.
    pub(crate) fn try_shutdown_if_empty(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.total != 0 {
                return false;
            }
            state.shutting_down = true;
        }
        self.semaphore.close();
        debug!(pool = %self.id, "empty connection pool shut down");
        true
    }

    /// Flag the pool as queued for release. Returns `false` if it already
    /// was.
    pub(crate) fn mark_queued(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.queued, true)
    }

    /// Evict idle connections unused for `idle_timeout`, oldest first,
    /// never dropping the pool below `min_pool_size`. Returns the number
    /// evicted.
    pub fn prune_idle(&self) -> usize {
        let Some(idle_timeout) = self.pool_options.idle_timeout else {
            return 0;
        };
        let evicted = {
            let mut state = self.state.lock();
            let mut evicted = Vec::new();
            while state.total > self.pool_options.min_pool_size {
                let expired = state
                    .idle
                    .front()
                    .is_some_and(|slot| slot.last_used.elapsed() >= idle_timeout);
                if !expired {
                    break;
                }
                if let Some(slot) = state.idle.pop_front() {
                    state.total -= 1;
                    evicted.push(slot);
                }
            }
            evicted
        };
        let count = evicted.len();
        if count > 0 {
            info!(
                pool = %self.id,
                evicted = count,
                idle_timeout = ?idle_timeout,
                "evicted idle connections"
            );
        }
        for slot in evicted {
            slot.destroy(self.counters.as_ref());
        }
        count
    }

    /// Connections still owned by the pool: idle, checked out, or being opened.
    pub fn count(&self) -> usize {
        self.state.lock().total
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            active: state.total - state.idle.len(),
            idle: state.idle.len(),
            total: state.total,
            wait_count: state.wait_count,
        }
    }

    fn lifetime_exceeded(&self, slot: &Slot<P::Connection>) -> bool {
        self.pool_options
            .connection_lifetime
            .is_some_and(|lifetime: Duration| slot.created_at.elapsed() > lifetime)
    }

    /// Drop a connection the pool already holds no permit for.
    fn discard(&self, slot: Slot<P::Connection>) {
        self.state.lock().total -= 1;
        slot.destroy(self.counters.as_ref());
    }
}

// ── Debug impl (cannot auto-derive due to dyn trait) ────────────────

impl<P: ConnectionProvider> std::fmt::Debug for ConnectionPool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("pool_options", &self.pool_options)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
