//! The owning handle — a caller's logical connection.
//!
//! A handle names a connection string and remembers the pool group it was
//! last resolved to, so repeated acquires skip the map lookup. When that
//! group has since been pruned, the factory resurrects a replacement from
//! the cached group's options and swaps it in here.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::group::PoolGroup;
use crate::provider::ConnectionProvider;

pub struct ConnectionHandle<P: ConnectionProvider> {
    connection_string: String,
    pool_group: Mutex<Option<Arc<PoolGroup<P>>>>,
}

impl<P: ConnectionProvider> ConnectionHandle<P> {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            pool_group: Mutex::new(None),
        }
    }

    /// The raw connection string, before any provider expansion.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// The pool group this handle last resolved to, possibly disabled.
    pub fn pool_group(&self) -> Option<Arc<PoolGroup<P>>> {
        self.pool_group.lock().clone()
    }

    pub(crate) fn set_pool_group(&self, group: Arc<PoolGroup<P>>) {
        *self.pool_group.lock() = Some(group);
    }
}

// ── Debug impl (connection string may carry credentials) ────────────

impl<P: ConnectionProvider> std::fmt::Debug for ConnectionHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("resolved", &self.pool_group.lock().is_some())
            .finish_non_exhaustive()
    }
}
