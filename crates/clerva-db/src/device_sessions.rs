use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceSessionRow {
    pub user_id: i64,
    pub device_id: String,
    pub is_active: bool,
    pub last_heartbeat_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert a device session on heartbeat. Idempotent: repeated calls from the
/// same device only advance `last_heartbeat_at` and re-assert `is_active`.
pub async fn record_heartbeat(
    pool: &DbPool,
    user_id: i64,
    device_id: &str,
    user_agent: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO device_sessions (user_id, device_id, is_active, last_heartbeat_at, user_agent, created_at, updated_at)
         VALUES (?1, ?2, 1, ?3, ?4, ?3, ?3)
         ON CONFLICT (user_id, device_id) DO UPDATE SET
            is_active = 1,
            last_heartbeat_at = ?3,
            user_agent = COALESCE(?4, device_sessions.user_agent),
            updated_at = ?3",
    )
    .bind(user_id)
    .bind(device_id)
    .bind(now)
    .bind(user_agent)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark one device session inactive (disconnect / tab close).
/// A missing or already-inactive row is a no-op, reported via the return value.
pub async fn deactivate(
    pool: &DbPool,
    user_id: i64,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE device_sessions
         SET is_active = 0, updated_at = ?3
         WHERE user_id = ?1
           AND device_id = ?2
           AND is_active = 1",
    )
    .bind(user_id)
    .bind(device_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Mark every session of a user inactive (sign-out, deactivation).
pub async fn deactivate_all_for_user(
    pool: &DbPool,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE device_sessions
         SET is_active = 0, updated_at = ?2
         WHERE user_id = ?1
           AND is_active = 1",
    )
    .bind(user_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Expire sessions whose last heartbeat fell behind the staleness threshold.
/// Unconditionally safe: a session that has not heartbeated within the
/// threshold is stale by definition.
pub async fn deactivate_stale(
    pool: &DbPool,
    stale_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE device_sessions
         SET is_active = 0, updated_at = ?2
         WHERE is_active = 1
           AND last_heartbeat_at < ?1",
    )
    .bind(stale_before)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn list_for_user(
    pool: &DbPool,
    user_id: i64,
) -> Result<Vec<DeviceSessionRow>, DbError> {
    let rows = sqlx::query_as::<_, DeviceSessionRow>(
        "SELECT user_id, device_id, is_active, last_heartbeat_at, user_agent, created_at, updated_at
         FROM device_sessions
         WHERE user_id = ?1
         ORDER BY is_active DESC, last_heartbeat_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get(
    pool: &DbPool,
    user_id: i64,
    device_id: &str,
) -> Result<Option<DeviceSessionRow>, DbError> {
    let row = sqlx::query_as::<_, DeviceSessionRow>(
        "SELECT user_id, device_id, is_active, last_heartbeat_at, user_agent, created_at, updated_at
         FROM device_sessions
         WHERE user_id = ?1 AND device_id = ?2",
    )
    .bind(user_id)
    .bind(device_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Whether the user has at least one live session (active and heartbeated
/// within the staleness threshold).
pub async fn has_live_session(
    pool: &DbPool,
    user_id: i64,
    live_after: DateTime<Utc>,
) -> Result<bool, DbError> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1
         FROM device_sessions
         WHERE user_id = ?1
           AND is_active = 1
           AND last_heartbeat_at >= ?2
         LIMIT 1",
    )
    .bind(user_id)
    .bind(live_after)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Purge inactive sessions strictly older than `cutoff`. A row whose
/// `updated_at` equals the cutoff exactly is retained.
pub async fn purge_inactive_older_than(
    pool: &DbPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "DELETE FROM device_sessions
         WHERE rowid IN (
             SELECT rowid
             FROM device_sessions
             WHERE is_active = 0
               AND updated_at < ?1
             ORDER BY updated_at ASC
             LIMIT ?2
         )",
    )
    .bind(cutoff)
    .bind(limit.max(1))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
