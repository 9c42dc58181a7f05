use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

/// Aggregate per-user status derived from device sessions.
///
/// Rows here are written only by the reconciler sweep and by explicit
/// force-status calls (sign-out, deactivation). Heartbeat ingest never
/// touches this table; that separation is what keeps the sweep's
/// conditional updates the single point of concurrency control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PresenceRow {
    pub user_id: i64,
    pub status: PresenceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub async fn get(pool: &DbPool, user_id: i64) -> Result<Option<PresenceRow>, DbError> {
    let row = sqlx::query_as::<_, PresenceRow>(
        "SELECT user_id, status, last_seen_at, last_activity_at, updated_at
         FROM user_presence
         WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_many(pool: &DbPool, user_ids: &[i64]) -> Result<Vec<PresenceRow>, DbError> {
    if user_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders: Vec<String> = (1..=user_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT user_id, status, last_seen_at, last_activity_at, updated_at
         FROM user_presence
         WHERE user_id IN ({})",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, PresenceRow>(&sql);
    for id in user_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows)
}

/// Unconditional status write for the explicit paths that own presence
/// besides the sweep: sign-out (offline) and client-set idleness (away).
pub async fn force_status(
    pool: &DbPool,
    user_id: i64,
    status: PresenceStatus,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO user_presence (user_id, status, last_seen_at, last_activity_at, updated_at)
         VALUES (?1, ?2, ?3, ?3, ?3)
         ON CONFLICT (user_id) DO UPDATE SET
            status = ?2,
            last_seen_at = ?3,
            last_activity_at = CASE WHEN ?2 = 'offline'
                THEN user_presence.last_activity_at ELSE ?3 END,
            updated_at = ?3",
    )
    .bind(user_id)
    .bind(status)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Users currently marked online with no live device session left.
/// Capped so a single sweep transaction stays bounded.
pub async fn select_online_without_live_session(
    conn: &mut SqliteConnection,
    live_after: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<i64>, DbError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT user_id
         FROM user_presence p
         WHERE p.status = 'online'
           AND NOT EXISTS (
               SELECT 1 FROM device_sessions s
               WHERE s.user_id = p.user_id
                 AND s.is_active = 1
                 AND s.last_heartbeat_at >= ?1
           )
         LIMIT ?2",
    )
    .bind(live_after)
    .bind(limit.max(1))
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Demote users to offline, but only those still marked online at write
/// time. The `AND status = 'online'` guard is the optimistic lock: a row a
/// concurrent writer already flipped is skipped, not clobbered.
pub async fn mark_offline_if_online(
    conn: &mut SqliteConnection,
    user_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<u64, DbError> {
    if user_ids.is_empty() {
        return Ok(0);
    }

    let placeholders: Vec<String> = (2..=user_ids.len() + 1).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "UPDATE user_presence
         SET status = 'offline', last_seen_at = ?1, updated_at = ?1
         WHERE user_id IN ({})
           AND status = 'online'",
        placeholders.join(", ")
    );
    let mut query = sqlx::query(&sql);
    query = query.bind(now);
    for id in user_ids {
        query = query.bind(id);
    }
    let result = query.execute(conn).await?;
    Ok(result.rows_affected())
}

/// Users who do have a live session but whose presence row is missing or
/// says offline (a heartbeat raced in after the demotion pass started, or
/// the user is brand new).
pub async fn select_offline_with_live_session(
    conn: &mut SqliteConnection,
    live_after: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<i64>, DbError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT DISTINCT s.user_id
         FROM device_sessions s
         LEFT JOIN user_presence p ON p.user_id = s.user_id
         WHERE s.is_active = 1
           AND s.last_heartbeat_at >= ?1
           AND (p.user_id IS NULL OR p.status = 'offline')
         LIMIT ?2",
    )
    .bind(live_after)
    .bind(limit.max(1))
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Restore users to online. The guarded upsert only flips rows still
/// reading offline; an `away` set concurrently by the client survives.
pub async fn promote_online(
    conn: &mut SqliteConnection,
    user_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<u64, DbError> {
    let mut restored = 0;
    for user_id in user_ids {
        let result = sqlx::query(
            "INSERT INTO user_presence (user_id, status, last_seen_at, last_activity_at, updated_at)
             VALUES (?1, 'online', ?2, ?2, ?2)
             ON CONFLICT (user_id) DO UPDATE SET
                status = 'online',
                last_activity_at = ?2,
                updated_at = ?2
             WHERE user_presence.status = 'offline'",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        restored += result.rows_affected();
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_sessions;
    use chrono::Duration;

    #[tokio::test]
    async fn force_status_upserts_and_overwrites() {
        let db = crate::test_pool("presence-force").await;
        let now = Utc::now();

        force_status(&db, 1, PresenceStatus::Online, now)
            .await
            .expect("set online");
        let row = get(&db, 1).await.expect("get").expect("row");
        assert_eq!(row.status, PresenceStatus::Online);
        assert_eq!(row.last_activity_at, Some(now));

        let later = now + Duration::seconds(60);
        force_status(&db, 1, PresenceStatus::Offline, later)
            .await
            .expect("set offline");
        let row = get(&db, 1).await.expect("get").expect("row");
        assert_eq!(row.status, PresenceStatus::Offline);
        assert_eq!(row.last_seen_at, Some(later));
        // Going offline keeps the last recorded activity time.
        assert_eq!(row.last_activity_at, Some(now));
    }

    #[tokio::test]
    async fn guarded_demotion_skips_rows_a_concurrent_writer_flipped() {
        let db = crate::test_pool("presence-guard").await;
        let now = Utc::now();

        force_status(&db, 1, PresenceStatus::Online, now)
            .await
            .expect("user 1 online");
        force_status(&db, 2, PresenceStatus::Online, now)
            .await
            .expect("user 2 online");

        // Simulate a concurrent flip landing between the sweep's read and
        // its conditional write: user 2 is no longer online at write time.
        force_status(&db, 2, PresenceStatus::Away, now)
            .await
            .expect("user 2 away");

        let mut conn = db.acquire().await.expect("conn");
        let affected = mark_offline_if_online(&mut conn, &[1, 2], now)
            .await
            .expect("guarded update");
        assert_eq!(affected, 1);

        let row1 = get(&db, 1).await.expect("get").expect("row 1");
        let row2 = get(&db, 2).await.expect("get").expect("row 2");
        assert_eq!(row1.status, PresenceStatus::Offline);
        assert_eq!(row2.status, PresenceStatus::Away);
    }

    #[tokio::test]
    async fn promote_online_creates_missing_rows_and_spares_away() {
        let db = crate::test_pool("presence-promote").await;
        let now = Utc::now();

        force_status(&db, 2, PresenceStatus::Offline, now)
            .await
            .expect("user 2 offline");
        force_status(&db, 3, PresenceStatus::Away, now)
            .await
            .expect("user 3 away");

        let mut conn = db.acquire().await.expect("conn");
        let restored = promote_online(&mut conn, &[1, 2, 3], now)
            .await
            .expect("promote");
        // User 1 row created, user 2 flipped, user 3 left as-is.
        assert_eq!(restored, 2);

        assert_eq!(
            get(&db, 1).await.expect("get").expect("row 1").status,
            PresenceStatus::Online
        );
        assert_eq!(
            get(&db, 2).await.expect("get").expect("row 2").status,
            PresenceStatus::Online
        );
        assert_eq!(
            get(&db, 3).await.expect("get").expect("row 3").status,
            PresenceStatus::Away
        );
    }

    #[tokio::test]
    async fn candidate_selection_respects_live_sessions() {
        let db = crate::test_pool("presence-candidates").await;
        let now = Utc::now();
        let live_after = now - Duration::seconds(150);

        // User 1: online with a fresh session -> not a demotion candidate.
        force_status(&db, 1, PresenceStatus::Online, now)
            .await
            .expect("user 1 online");
        device_sessions::record_heartbeat(&db, 1, "dev-1", None, now)
            .await
            .expect("heartbeat 1");

        // User 2: online with only a stale session -> demotion candidate.
        force_status(&db, 2, PresenceStatus::Online, now)
            .await
            .expect("user 2 online");
        device_sessions::record_heartbeat(&db, 2, "dev-2", None, now - Duration::seconds(300))
            .await
            .expect("heartbeat 2");

        // User 3: offline with a fresh session -> restoration candidate.
        force_status(&db, 3, PresenceStatus::Offline, now)
            .await
            .expect("user 3 offline");
        device_sessions::record_heartbeat(&db, 3, "dev-3", None, now)
            .await
            .expect("heartbeat 3");

        let mut conn = db.acquire().await.expect("conn");
        let demote = select_online_without_live_session(&mut conn, live_after, 500)
            .await
            .expect("demotion candidates");
        assert_eq!(demote, vec![2]);

        let restore = select_offline_with_live_session(&mut conn, live_after, 500)
            .await
            .expect("restoration candidates");
        assert_eq!(restore, vec![3]);
    }

    #[tokio::test]
    async fn get_many_returns_only_known_rows() {
        let db = crate::test_pool("presence-get-many").await;
        let now = Utc::now();

        force_status(&db, 1, PresenceStatus::Online, now)
            .await
            .expect("user 1");
        force_status(&db, 2, PresenceStatus::Offline, now)
            .await
            .expect("user 2");

        let rows = get_many(&db, &[1, 2, 99]).await.expect("get many");
        assert_eq!(rows.len(), 2);
        assert!(get_many(&db, &[]).await.expect("empty").is_empty());
    }
}
