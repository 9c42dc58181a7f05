pub mod error;
pub mod rate_limit;
pub mod reconciler;
pub mod retry;

use clerva_db::DbPool;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Presence timing knobs. Defaults follow the deployed client: 15s heartbeat
/// interval, a 150s staleness threshold (well above heartbeat interval plus
/// network and scheduler jitter), 60s sweep cadence.
#[derive(Clone, Debug)]
pub struct PresenceConfig {
    pub heartbeat_interval_secs: u64,
    pub stale_threshold_secs: i64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_limit: i64,
    pub purge_after_days: i64,
    pub typing_ttl_secs: i64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            stale_threshold_secs: 150,
            sweep_interval_secs: 60,
            sweep_batch_limit: 500,
            purge_after_days: 7,
            typing_ttl_secs: 6,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    /// Shared secret required by the external sweep trigger. None disables
    /// the check (local cron on the same host).
    pub sweep_token: Option<String>,
    pub presence: PresenceConfig,
    pub heartbeats_per_minute: i64,
    pub study_session_xp: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub rate_limiter: Arc<rate_limit::RateLimiter>,
    /// Serializes sweep runs within this process. A sweep that finds the
    /// lock held reports itself skipped instead of waiting.
    pub sweep_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        Self {
            db,
            config,
            rate_limiter: Arc::new(rate_limit::RateLimiter::new()),
            sweep_lock: Arc::new(Mutex::new(())),
        }
    }
}
