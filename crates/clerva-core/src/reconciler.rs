use crate::error::CoreError;
use crate::AppState;
use chrono::{Duration, Utc};
use clerva_db::{device_sessions, presence, rate_limits, typing_indicators};

/// What a sweep run did, for logging and for the HTTP trigger response.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SweepOutcome {
    /// True when another sweep already held the lock and this run did nothing.
    pub skipped: bool,
    pub sessions_expired: u64,
    pub marked_offline: u64,
    pub restored_online: u64,
    pub typing_purged: u64,
    pub sessions_purged: u64,
    pub rate_windows_purged: u64,
}

/// One reconciliation pass: expire stale sessions, derive aggregate status,
/// run the opposite-direction safety net, then the TTL purges.
///
/// The demotion and restoration passes share one transaction and both use
/// status-guarded writes, so a heartbeat racing in mid-sweep is either seen
/// by the restoration pass or recovered by the next run. The sweep never
/// overwrites a status it cannot prove still holds.
pub async fn run_sweep(state: &AppState) -> Result<SweepOutcome, CoreError> {
    let Ok(_guard) = state.sweep_lock.try_lock() else {
        tracing::debug!("presence sweep: previous run still in progress, skipping");
        return Ok(SweepOutcome {
            skipped: true,
            ..SweepOutcome::default()
        });
    };

    let cfg = &state.config.presence;
    let now = Utc::now();
    let stale_before = now - Duration::seconds(cfg.stale_threshold_secs);

    // Step 1: expire sessions that missed the staleness window. Safe
    // unconditionally; a session without a recent heartbeat is dead.
    let sessions_expired =
        device_sessions::deactivate_stale(&state.db, stale_before, now).await?;

    // Steps 2 + 3: derive status inside one transaction so a failure never
    // leaves a half-applied presence view.
    let mut tx = state.db.begin().await.map_err(clerva_db::DbError::from)?;

    let demote = presence::select_online_without_live_session(
        &mut *tx,
        stale_before,
        cfg.sweep_batch_limit,
    )
    .await?;
    let marked_offline = presence::mark_offline_if_online(&mut *tx, &demote, now).await?;

    let restore = presence::select_offline_with_live_session(
        &mut *tx,
        stale_before,
        cfg.sweep_batch_limit,
    )
    .await?;
    let restored_online = presence::promote_online(&mut *tx, &restore, now).await?;

    tx.commit().await.map_err(clerva_db::DbError::from)?;

    // TTL housekeeping stays outside the presence transaction.
    let typing_purged = typing_indicators::purge_expired(&state.db, now).await?;
    let purge_cutoff = now - Duration::days(cfg.purge_after_days);
    let sessions_purged = device_sessions::purge_inactive_older_than(
        &state.db,
        purge_cutoff,
        cfg.sweep_batch_limit,
    )
    .await?;
    let rate_windows_purged = rate_limits::purge_window_counters_older_than(
        &state.db,
        (now - Duration::hours(1)).timestamp(),
        cfg.sweep_batch_limit,
    )
    .await?;
    state
        .rate_limiter
        .evict_windows_before((now - Duration::hours(1)).timestamp());

    let outcome = SweepOutcome {
        skipped: false,
        sessions_expired,
        marked_offline,
        restored_online,
        typing_purged,
        sessions_purged,
        rate_windows_purged,
    };
    tracing::info!(
        sessions_expired = outcome.sessions_expired,
        marked_offline = outcome.marked_offline,
        restored_online = outcome.restored_online,
        typing_purged = outcome.typing_purged,
        sessions_purged = outcome.sessions_purged,
        "presence sweep complete"
    );
    Ok(outcome)
}
