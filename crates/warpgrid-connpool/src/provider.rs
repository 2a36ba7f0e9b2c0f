//! Collaborator interfaces supplied by each database back-end.
//!
//! The pool manager never speaks a wire protocol or parses a dialect; a
//! [`ConnectionProvider`] does both. One provider instance is held per
//! back-end by its [`ConnectionFactory`](crate::ConnectionFactory).

use crate::handle::ConnectionHandle;
use crate::options::PoolGroupOptions;
use crate::pool::ConnectionPool;

/// An open physical connection (socket, session, file handle).
pub trait PhysicalConnection: Send + 'static {
    /// Liveness check run before an idle connection is handed out again.
    /// Returning `false` destroys the connection.
    fn ping(&mut self) -> bool {
        true
    }

    /// Close the underlying transport. Errors are logged; the connection is
    /// considered destroyed either way.
    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Parsed, validated connection options.
pub trait ConnectionOptions: Send + Sync + 'static {
    /// The normalized (possibly expanded) connection string. When it differs
    /// from the string that was parsed, the pool group is keyed by this one.
    fn connection_string(&self) -> &str;
}

/// Back-end strategy for opening connections and deriving pool policy.
pub trait ConnectionProvider: Send + Sync + Sized + 'static {
    type Connection: PhysicalConnection;
    type Options: ConnectionOptions;
    /// Opaque per-group data the provider wants handed back on every create.
    type ProviderInfo: Send + Sync + 'static;
    /// Schema metadata helper cached per pool group.
    type MetaData: Send + Sync + 'static;

    /// Parse and validate a raw connection string. `previous` is the result
    /// of an earlier parse when the string is being re-parsed after expansion.
    fn parse_options(
        &self,
        connection_string: &str,
        previous: Option<&Self::Options>,
    ) -> anyhow::Result<Self::Options>;

    /// Pooling policy for a group. `None` disables pooling for it.
    fn pool_group_options(&self, options: &Self::Options) -> Option<PoolGroupOptions>;

    fn provider_info(&self, options: &Self::Options) -> Self::ProviderInfo;

    /// Open one physical connection. `pool` is `None` on the non-pooled path.
    fn create(
        &self,
        options: &Self::Options,
        provider_info: &Self::ProviderInfo,
        pool: Option<&ConnectionPool<Self>>,
        owner: &ConnectionHandle<Self>,
    ) -> anyhow::Result<Self::Connection>;

    /// Build the metadata helper for a group. The returned flag says whether
    /// the result may be cached on the group.
    fn create_metadata_factory(
        &self,
        options: &Self::Options,
        connection: &mut Self::Connection,
    ) -> anyhow::Result<(Self::MetaData, bool)>;
}
