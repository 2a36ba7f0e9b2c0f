//! Pool sizing policy attached to a pool group.

use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{PoolError, PoolResult};

/// Immutable pooling policy for one logical connection string.
///
/// Derived once by the provider when a pool group is created and shared
/// unchanged by any group resurrected from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolGroupOptions {
    /// Idle connections are never evicted below this count (default: 0).
    pub min_pool_size: usize,
    /// Maximum connections (idle + checked out) per pool (default: 100).
    pub max_pool_size: usize,
    /// Maximum time an acquire waits for capacity before timing out (default: 15s).
    pub load_balance_timeout: Duration,
    /// Connections older than this are destroyed on return instead of
    /// re-pooled. `None` means unlimited (default).
    pub connection_lifetime: Option<Duration>,
    /// Idle connections unused this long are evicted by the pruning sweep
    /// (default: 300s). `None` disables idle eviction.
    pub idle_timeout: Option<Duration>,
    /// When false, every connection for the group bypasses the pool.
    pub pooling_enabled: bool,
}

impl Default for PoolGroupOptions {
    fn default() -> Self {
        Self {
            min_pool_size: 0,
            max_pool_size: 100,
            load_balance_timeout: Duration::from_secs(15),
            connection_lifetime: None,
            idle_timeout: Some(Duration::from_secs(300)),
            pooling_enabled: true,
        }
    }
}

impl PoolGroupOptions {
    /// Reject sizing combinations a pool cannot honor.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_pool_size == 0 {
            return Err(PoolError::Configuration(
                "max_pool_size must be greater than zero".to_string(),
            ));
        }
        if self.max_pool_size > Semaphore::MAX_PERMITS {
            return Err(PoolError::Configuration(format!(
                "max_pool_size ({}) exceeds the limit of {}",
                self.max_pool_size,
                Semaphore::MAX_PERMITS
            )));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(PoolError::Configuration(format!(
                "min_pool_size ({}) exceeds max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }

    /// Builder method: set the pool size bounds.
    pub fn with_size(self, min_pool_size: usize, max_pool_size: usize) -> Self {
        Self {
            min_pool_size,
            max_pool_size,
            ..self
        }
    }

    /// Builder method: set the acquire wait bound.
    pub fn with_load_balance_timeout(self, load_balance_timeout: Duration) -> Self {
        Self {
            load_balance_timeout,
            ..self
        }
    }

    /// Builder method: set the maximum connection age.
    pub fn with_connection_lifetime(self, connection_lifetime: Option<Duration>) -> Self {
        Self {
            connection_lifetime,
            ..self
        }
    }

    /// Builder method: set the idle eviction timeout.
    pub fn with_idle_timeout(self, idle_timeout: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            ..self
        }
    }

    /// Builder method: disable pooling for the group.
    pub fn without_pooling(self) -> Self {
        Self {
            pooling_enabled: false,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = PoolGroupOptions::default();
        assert_eq!(options.min_pool_size, 0);
        assert_eq!(options.max_pool_size, 100);
        assert_eq!(options.load_balance_timeout, Duration::from_secs(15));
        assert_eq!(options.connection_lifetime, None);
        assert_eq!(options.idle_timeout, Some(Duration::from_secs(300)));
        assert!(options.pooling_enabled);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn zero_max_is_rejected() {
        let options = PoolGroupOptions::default().with_size(0, 0);
        let err = options.validate().unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));
    }

    #[test]
    fn max_above_semaphore_limit_is_rejected() {
        let options = PoolGroupOptions::default().with_size(0, Semaphore::MAX_PERMITS + 1);
        let err = options.validate().unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));

        let at_limit = PoolGroupOptions::default().with_size(0, Semaphore::MAX_PERMITS);
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn min_above_max_is_rejected() {
        let options = PoolGroupOptions::default().with_size(5, 2);
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("min_pool_size (5)"));
    }

    #[test]
    fn builders_keep_other_fields() {
        let options = PoolGroupOptions::default()
            .with_size(1, 4)
            .with_connection_lifetime(Some(Duration::from_secs(60)))
            .without_pooling();
        assert_eq!(options.min_pool_size, 1);
        assert_eq!(options.max_pool_size, 4);
        assert_eq!(options.connection_lifetime, Some(Duration::from_secs(60)));
        assert_eq!(options.load_balance_timeout, Duration::from_secs(15));
        assert!(!options.pooling_enabled);
    }
}
