//! Periodic sampling of connection pool gauges.

use std::time::Duration;

use metrics::gauge;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Size, idle and in-use counts for one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSample {
    pub size: u32,
    pub idle: usize,
    pub in_use: usize,
}

impl PoolSample {
    pub fn of(pool: &PgPool) -> Self {
        let size = pool.size();
        let idle = pool.num_idle();
        Self {
            size,
            idle,
            in_use: (size as usize).saturating_sub(idle),
        }
    }
}

/// Record `qrctl_db_pool_connections_*` gauges every `interval` until cancelled
pub async fn run_pool_metrics_sampler(pool: PgPool, interval: Duration, shutdown: CancellationToken) {
    info!(?interval, "Starting pool metrics sampler");
    gauge!("qrctl_db_pool_connections_max").set(pool.options().get_max_connections() as f64);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Pool metrics sampler shutting down");
                break;
            }
            _ = ticker.tick() => {
                let sample = PoolSample::of(&pool);
                gauge!("qrctl_db_pool_connections_total").set(sample.size as f64);
                gauge!("qrctl_db_pool_connections_idle").set(sample.idle as f64);
                gauge!("qrctl_db_pool_connections_in_use").set(sample.in_use as f64);
                debug!(size = sample.size, idle = sample.idle, in_use = sample.in_use, "Sampled pool metrics");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_config, lazy_pool};

    #[tokio::test]
    async fn unconnected_pool_is_empty() {
        let pool = lazy_pool(&create_test_config());
        assert_eq!(PoolSample::of(&pool), PoolSample { size: 0, idle: 0, in_use: 0 });
    }

    #[test_log::test(tokio::test)]
    async fn sampler_stops_on_cancel() {
        let pool = lazy_pool(&create_test_config());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_pool_metrics_sampler(pool, Duration::from_millis(5), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
