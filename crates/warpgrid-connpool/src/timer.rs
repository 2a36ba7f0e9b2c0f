//! Background pruning timer.
//!
//! Waits `initial_delay`, then runs the factory's pruning sweep every
//! `interval` until stopped, dropped, or the factory itself goes away. The
//! task only holds a [`Weak`] reference so it never keeps a factory alive.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::{PoolError, PoolResult};
use crate::factory::ConnectionFactory;
use crate::provider::ConnectionProvider;

#[derive(Debug)]
pub struct PruningTimer {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl PruningTimer {
    /// Spawn the pruning task on the current tokio runtime. A zero
    /// `interval` is a configuration error.
    pub fn start<P: ConnectionProvider>(
        factory: Weak<ConnectionFactory<P>>,
        initial_delay: Duration,
        interval: Duration,
    ) -> PoolResult<Self> {
        if interval.is_zero() {
            return Err(PoolError::Configuration(
                "pruning interval must be greater than zero".to_string(),
            ));
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_pruning_loop(
            factory,
            initial_delay,
            interval,
            shutdown_rx,
        ));
        info!(?initial_delay, ?interval, "pruning timer started");
        Ok(Self {
            handle,
            shutdown_tx,
        })
    }

    /// Stop the timer. A sweep already in progress runs to completion.
    pub fn stop(self) {
        // Drop does the work.
        info!("pruning timer stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PruningTimer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

async fn run_pruning_loop<P: ConnectionProvider>(
    factory: Weak<ConnectionFactory<P>>,
    initial_delay: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = tokio::time::sleep(initial_delay) => {}
        _ = shutdown.changed() => {
            debug!("pruning timer shut down before first sweep");
            return;
        }
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(factory) = factory.upgrade() else {
                    debug!("connection factory dropped, pruning timer exiting");
                    return;
                };
                factory.prune_connection_pool_groups();
            }
            _ = shutdown.changed() => {
                debug!("pruning timer shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::FactoryConfig;
    use crate::test_support::{MockProvider, test_options};

    fn config() -> FactoryConfig {
        FactoryConfig {
            pruning_enabled: true,
            pruning_initial_delay: Duration::from_secs(240),
            pruning_interval: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_sweep_waits_for_initial_delay() {
        let factory = ConnectionFactory::start(MockProvider::new(test_options()), config()).unwrap();
        factory.get_pool_group("host=a", None).unwrap();

        tokio::time::sleep(Duration::from_secs(239)).await;
        assert_eq!(factory.group_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(factory.group_count(), 0);
        assert_eq!(factory.pending_group_releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_repeat_every_interval() {
        let factory = ConnectionFactory::start(MockProvider::new(test_options()), config()).unwrap();
        factory.get_pool_group("host=a", None).unwrap();

        tokio::time::sleep(Duration::from_secs(241)).await;
        assert_eq!(factory.pending_group_releases(), 1);

        // Group released on the next tick.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(factory.pending_group_releases(), 0);

        factory.get_pool_group("host=b", None).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(factory.group_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_no_longer_sweeps() {
        let factory = ConnectionFactory::start(MockProvider::new(test_options()), config()).unwrap();
        factory.get_pool_group("host=a", None).unwrap();
        factory.stop_pruning();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(factory.group_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_pruning_spawns_no_timer() {
        let config = FactoryConfig {
            pruning_enabled: false,
            ..config()
        };
        let factory = ConnectionFactory::start(MockProvider::new(test_options()), config).unwrap();
        factory.get_pool_group("host=a", None).unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(factory.group_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_exits_once_factory_dropped() {
        let factory = ConnectionFactory::new(MockProvider::new(test_options()), config());
        let timer = PruningTimer::start(
            Arc::downgrade(&factory),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        drop(factory);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(timer.is_finished());
    }

    #[tokio::test]
    async fn zero_interval_is_rejected_before_spawning() {
        let config = FactoryConfig {
            pruning_interval: Duration::ZERO,
            ..config()
        };
        let err = ConnectionFactory::start(MockProvider::new(test_options()), config).unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));

        let factory = ConnectionFactory::new(MockProvider::new(test_options()), self::config());
        let err = PruningTimer::start(Arc::downgrade(&factory), Duration::ZERO, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));
    }
}
