//! Checked-out connection guard.
//!
//! A [`PooledConnection`] exclusively owns its physical connection while the
//! caller holds it. Dropping the guard hands the connection back: pooled
//! connections return to their pool (which may destroy them instead), and
//! non-pooled connections are closed on the spot.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::counters::{Counter, PoolCounters};
use crate::pool::{ConnectionPool, PoolId};
use crate::provider::{ConnectionProvider, PhysicalConnection};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A physical connection plus the bookkeeping the pool keeps for it.
#[derive(Debug)]
pub(crate) struct Slot<C> {
    pub(crate) conn: C,
    pub(crate) id: u64,
    pub(crate) created_at: Instant,
    pub(crate) last_used: Instant,
    /// Clear generation of the pool when this connection was opened.
    pub(crate) generation: u64,
}

impl<C: PhysicalConnection> Slot<C> {
    pub(crate) fn new(conn: C, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            conn,
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            created_at: now,
            last_used: now,
            generation,
        }
    }

    /// Close the physical connection. A failed close is logged and the
    /// connection still counts as gone.
    pub(crate) fn destroy(mut self, counters: &dyn PoolCounters) {
        if let Err(e) = self.conn.close() {
            warn!(connection = self.id, error = %e, "failed to close physical connection");
        }
        counters.increment(Counter::HardDisconnects);
    }
}

enum Origin<P: ConnectionProvider> {
    Pool(Arc<ConnectionPool<P>>),
    Standalone(Arc<dyn PoolCounters>),
}

/// A connection handed out by the [`ConnectionFactory`](crate::ConnectionFactory).
pub struct PooledConnection<P: ConnectionProvider> {
    /// Always `Some` until the guard is dropped.
    slot: Option<Slot<P::Connection>>,
    origin: Origin<P>,
    broken: bool,
}

impl<P: ConnectionProvider> PooledConnection<P> {
    pub(crate) fn pooled(slot: Slot<P::Connection>, pool: Arc<ConnectionPool<P>>) -> Self {
        Self {
            slot: Some(slot),
            origin: Origin::Pool(pool),
            broken: false,
        }
    }

    pub(crate) fn standalone(conn: P::Connection, counters: Arc<dyn PoolCounters>) -> Self {
        Self {
            slot: Some(Slot::new(conn, 0)),
            origin: Origin::Standalone(counters),
            broken: false,
        }
    }

    fn slot(&self) -> &Slot<P::Connection> {
        self.slot.as_ref().expect("connection slot present until drop")
    }

    /// Process-unique id of the underlying physical connection.
    pub fn id(&self) -> u64 {
        self.slot().id
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.origin, Origin::Pool(_))
    }

    /// The pool this connection returns to, if pooled.
    pub fn pool_id(&self) -> Option<PoolId> {
        match &self.origin {
            Origin::Pool(pool) => Some(pool.id()),
            Origin::Standalone(_) => None,
        }
    }

    /// When the physical connection was opened.
    pub fn created_at(&self) -> Instant {
        self.slot().created_at
    }

    /// Destroy the connection on return instead of re-pooling it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<P: ConnectionProvider> Deref for PooledConnection<P> {
    type Target = P::Connection;

    fn deref(&self) -> &Self::Target {
        &self.slot().conn
    }
}

impl<P: ConnectionProvider> DerefMut for PooledConnection<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self
            .slot
            .as_mut()
            .expect("connection slot present until drop")
            .conn
    }
}

impl<P: ConnectionProvider> Drop for PooledConnection<P> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        match &self.origin {
            Origin::Pool(pool) => pool.release(slot, self.broken),
            Origin::Standalone(counters) => {
                debug!(connection = slot.id, "closing non-pooled connection");
                slot.destroy(counters.as_ref());
                counters.decrement(Counter::NonPooledConnections);
            }
        }
    }
}

impl<P: ConnectionProvider> std::fmt::Debug for PooledConnection<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.slot.as_ref().map(|s| s.id))
            .field("pool", &self.pool_id())
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}
