use crate::{DbError, DbPool};

/// Increment a fixed-window counter and return the new count for the window.
/// The database is the shared store, so counts stay correct when several
/// server instances front the same traffic.
pub async fn increment_window_counter(
    pool: &DbPool,
    bucket_key: &str,
    window_start: i64,
    window_seconds: i64,
) -> Result<i64, DbError> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO rate_limit_counters (bucket_key, window_start, window_seconds, count, updated_at)
         VALUES (?1, ?2, ?3, 1, datetime('now'))
         ON CONFLICT (bucket_key, window_start) DO UPDATE SET
            count = rate_limit_counters.count + 1,
            updated_at = datetime('now'),
            window_seconds = excluded.window_seconds
         RETURNING count",
    )
    .bind(bucket_key)
    .bind(window_start)
    .bind(window_seconds)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn purge_window_counters_older_than(
    pool: &DbPool,
    oldest_window_start: i64,
    limit: i64,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "DELETE FROM rate_limit_counters
         WHERE rowid IN (
             SELECT rowid
             FROM rate_limit_counters
             WHERE window_start < ?1
             ORDER BY window_start ASC
             LIMIT ?2
         )",
    )
    .bind(oldest_window_start)
    .bind(limit.max(1))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increment_window_counter_is_scoped_by_window() {
        let db = crate::test_pool("rate-limits").await;
        let key = "heartbeat:42";

        let first = increment_window_counter(&db, key, 100, 60)
            .await
            .expect("first");
        let second = increment_window_counter(&db, key, 100, 60)
            .await
            .expect("second");
        let next_window = increment_window_counter(&db, key, 160, 60)
            .await
            .expect("next window");

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(next_window, 1);
    }

    #[tokio::test]
    async fn purge_removes_only_stale_windows() {
        let db = crate::test_pool("rate-limits-purge").await;
        increment_window_counter(&db, "k1", 10, 60)
            .await
            .expect("insert k1");
        increment_window_counter(&db, "k2", 20, 60)
            .await
            .expect("insert k2");
        increment_window_counter(&db, "k3", 30, 60)
            .await
            .expect("insert k3");

        let removed = purge_window_counters_older_than(&db, 25, 10)
            .await
            .expect("purge");
        assert_eq!(removed, 2);
    }
}
