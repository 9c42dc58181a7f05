use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

/// Refresh a user's typing marker in a conversation. TTL rows: readers only
/// see unexpired markers, the sweep deletes the rest.
pub async fn set_typing(
    pool: &DbPool,
    user_id: i64,
    conversation_id: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO typing_indicators (user_id, conversation_id, expires_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (user_id, conversation_id) DO UPDATE SET expires_at = ?3",
    )
    .bind(user_id)
    .bind(conversation_id)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_typing_users(
    pool: &DbPool,
    conversation_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<i64>, DbError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT user_id
         FROM typing_indicators
         WHERE conversation_id = ?1
           AND expires_at > ?2
         ORDER BY user_id",
    )
    .bind(conversation_id)
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn purge_expired(pool: &DbPool, now: DateTime<Utc>) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM typing_indicators WHERE expires_at <= ?1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn expired_markers_are_hidden_and_purged() {
        let db = crate::test_pool("typing").await;
        let now = Utc::now();

        set_typing(&db, 1, "conv-a", now + Duration::seconds(6))
            .await
            .expect("fresh marker");
        set_typing(&db, 2, "conv-a", now - Duration::seconds(1))
            .await
            .expect("expired marker");
        set_typing(&db, 3, "conv-b", now + Duration::seconds(6))
            .await
            .expect("other conversation");

        let typing = list_typing_users(&db, "conv-a", now).await.expect("list");
        assert_eq!(typing, vec![1]);

        let purged = purge_expired(&db, now).await.expect("purge");
        assert_eq!(purged, 1);

        // Refreshing an existing marker extends it in place.
        set_typing(&db, 1, "conv-a", now + Duration::seconds(12))
            .await
            .expect("refresh");
        let typing = list_typing_users(&db, "conv-a", now + Duration::seconds(10))
            .await
            .expect("list after refresh");
        assert_eq!(typing, vec![1]);
    }
}
