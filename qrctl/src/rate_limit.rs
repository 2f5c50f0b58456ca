//! Fixed-window rate limiting for API key traffic.
//!
//! Windows live in the `rate_limits` table, one row per `(key, route)`. The
//! decision and its write share a transaction that holds the row lock, so
//! concurrent requests against the same window serialize in PostgreSQL.

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::RateLimitConfig;
use crate::db::handlers::RateLimits;
use crate::errors::{Error, Result};

/// Sweeper deletes windows that started this many window lengths ago
const SWEEP_AGE_FACTOR: u32 = 10;

/// Outcome of a rate-limit check and the window state to persist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { window_start: DateTime<Utc>, count: i32 },
    Denied { retry_after_secs: u64 },
}

/// Decide a request against the current window.
///
/// `current` is `None` when no window exists yet.
pub fn decide(current: Option<(DateTime<Utc>, i32)>, window: Duration, max_requests: i32, now: DateTime<Utc>) -> Decision {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);

    match current {
        Some((start, count)) if start + window > now => {
            if count >= max_requests {
                let remaining_ms = (start + window - now).num_milliseconds().max(0) as u64;
                Decision::Denied {
                    retry_after_secs: remaining_ms.div_ceil(1000).max(1),
                }
            } else {
                Decision::Allowed {
                    window_start: start,
                    count: count + 1,
                }
            }
        }
        _ => Decision::Allowed { window_start: now, count: 1 },
    }
}

/// Count a request for `(key, route)`, failing with [`Error::RateLimited`] when over the limit
#[instrument(skip(pool, config), err)]
pub async fn check(pool: &PgPool, config: &RateLimitConfig, key: &str, route: &str) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut repo = RateLimits::new(&mut tx);

    // A freshly inserted row has count 0, so it is treated as an open window
    let window = repo.lock_window(key, route, now).await?;
    match decide(Some((window.window_start, window.count)), config.window, config.max_requests, now) {
        Decision::Allowed { window_start, count } => {
            repo.save_window(key, route, window_start, count).await?;
            tx.commit().await?;
            Ok(())
        }
        Decision::Denied { retry_after_secs } => {
            tx.rollback().await?;
            counter!("qrctl_rate_limited_total").increment(1);
            Err(Error::RateLimited { retry_after_secs })
        }
    }
}

/// Periodically delete windows nobody has touched for a while
pub async fn run_sweeper(pool: PgPool, config: RateLimitConfig, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(config.sweep_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let max_age = chrono::Duration::from_std(config.window * SWEEP_AGE_FACTOR).unwrap_or(chrono::Duration::days(1));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Rate limit sweeper shutting down");
                break;
            }
        }

        let mut conn = match pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire connection for rate limit sweep");
                continue;
            }
        };
        match RateLimits::new(&mut conn).sweep(Utc::now() - max_age).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(deleted = n, "Swept expired rate limit windows"),
            Err(e) => tracing::warn!(error = %e, "Rate limit sweep failed"),
        }
    }
}
