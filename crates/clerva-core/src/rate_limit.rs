use clerva_db::DbPool;
use dashmap::DashMap;

/// Fixed-window rate limiter. The database carries the counters so limits
/// hold across instances; when the counter write fails the limiter falls
/// back to a process-local window map rather than letting traffic through
/// unmetered. Fallback windows are evicted by the sweep.
pub struct RateLimiter {
    fallback: DashMap<(String, i64), i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub count: i64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            fallback: DashMap::new(),
        }
    }

    /// Count one hit against `bucket_key` and decide whether it fits the
    /// per-window limit.
    pub async fn check(
        &self,
        pool: &DbPool,
        bucket_key: &str,
        limit: i64,
        window_seconds: i64,
        now_epoch: i64,
    ) -> RateDecision {
        let window_start = now_epoch - now_epoch.rem_euclid(window_seconds.max(1));

        let count = match clerva_db::rate_limits::increment_window_counter(
            pool,
            bucket_key,
            window_start,
            window_seconds,
        )
        .await
        {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!("rate limiter falling back to in-memory window: {err}");
                let mut entry = self
                    .fallback
                    .entry((bucket_key.to_string(), window_start))
                    .or_insert(0);
                *entry += 1;
                *entry
            }
        };

        RateDecision {
            allowed: count <= limit,
            count,
        }
    }

    /// Drop fallback windows that started before `cutoff_epoch`.
    pub fn evict_windows_before(&self, cutoff_epoch: i64) {
        self.fallback
            .retain(|(_, window_start), _| *window_start >= cutoff_epoch);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
