//! connpool.toml configuration parser.
//!
//! ```toml
//! [pruning]
//! initial_delay = "4m"
//! interval = "30s"
//!
//! [pool]
//! max_size = 20
//! load_balance_timeout = "5s"
//! idle_timeout = "5m"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};
use crate::options::PoolGroupOptions;

/// Delay before the first pruning sweep.
pub const DEFAULT_PRUNING_INITIAL_DELAY: Duration = Duration::from_secs(4 * 60);
/// Period between pruning sweeps.
pub const DEFAULT_PRUNING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnPoolConfig {
    pub pruning: Option<PruningConfig>,
    pub pool: Option<PoolSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruningConfig {
    pub enabled: Option<bool>,
    pub initial_delay: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSettings {
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    pub load_balance_timeout: Option<String>,
    /// `"0s"` means unlimited.
    pub connection_lifetime: Option<String>,
    /// `"0s"` disables idle eviction.
    pub idle_timeout: Option<String>,
    pub pooling: Option<bool>,
}

/// Resolved factory-level settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FactoryConfig {
    /// Whether `ConnectionFactory::start` spawns the pruning timer.
    pub pruning_enabled: bool,
    pub pruning_initial_delay: Duration,
    pub pruning_interval: Duration,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            pruning_enabled: true,
            pruning_initial_delay: DEFAULT_PRUNING_INITIAL_DELAY,
            pruning_interval: DEFAULT_PRUNING_INTERVAL,
        }
    }
}

impl ConnPoolConfig {
    pub fn from_file(path: &Path) -> PoolResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> PoolResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve the pruning schedule, falling back to the defaults for
    /// missing keys.
    pub fn factory_config(&self) -> PoolResult<FactoryConfig> {
        let defaults = FactoryConfig::default();
        let Some(pruning) = &self.pruning else {
            return Ok(defaults);
        };

        let interval = match &pruning.interval {
            Some(s) => parse_duration(s)?,
            None => defaults.pruning_interval,
        };
        if interval.is_zero() {
            return Err(PoolError::Configuration(
                "pruning interval must be greater than zero".to_string(),
            ));
        }

        Ok(FactoryConfig {
            pruning_enabled: pruning.enabled.unwrap_or(defaults.pruning_enabled),
            pruning_initial_delay: match &pruning.initial_delay {
                Some(s) => parse_duration(s)?,
                None => defaults.pruning_initial_delay,
            },
            pruning_interval: interval,
        })
    }

    /// Resolve the `[pool]` table into validated pool group options.
    pub fn pool_group_options(&self) -> PoolResult<PoolGroupOptions> {
        let defaults = PoolGroupOptions::default();
        let Some(pool) = &self.pool else {
            return Ok(defaults);
        };

        let options = PoolGroupOptions {
            min_pool_size: pool.min_size.unwrap_or(defaults.min_pool_size),
            max_pool_size: pool.max_size.unwrap_or(defaults.max_pool_size),
            load_balance_timeout: match &pool.load_balance_timeout {
                Some(s) => parse_duration(s)?,
                None => defaults.load_balance_timeout,
            },
            connection_lifetime: match &pool.connection_lifetime {
                Some(s) => non_zero(parse_duration(s)?),
                None => defaults.connection_lifetime,
            },
            idle_timeout: match &pool.idle_timeout {
                Some(s) => non_zero(parse_duration(s)?),
                None => defaults.idle_timeout,
            },
            pooling_enabled: pool.pooling.unwrap_or(defaults.pooling_enabled),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

/// Parse `"250ms"`, `"30s"`, `"4m"`, or bare seconds.
pub fn parse_duration(s: &str) -> PoolResult<Duration> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| PoolError::Configuration(format!("invalid duration: {s:?}")))
}
