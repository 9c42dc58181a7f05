use crate::{DbError, DbPool};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProgressionRow {
    pub user_id: i64,
    pub xp: i64,
    pub level: i32,
    pub streak_days: i64,
    pub last_study_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Compute the expected level from total XP.
/// Formula: level = floor(sqrt(xp / 100))
pub fn level_for_xp(xp: i64) -> i32 {
    ((xp.max(0) as f64 / 100.0).sqrt()).floor() as i32
}

/// Streak continuation based on UTC calendar days: same day keeps the
/// streak, the next day extends it, any gap resets to 1.
pub fn next_streak(
    last_study_at: Option<DateTime<Utc>>,
    streak_days: i64,
    now: DateTime<Utc>,
) -> i64 {
    let Some(last) = last_study_at else {
        return 1;
    };
    let last_day = last.date_naive();
    let today = now.date_naive();
    if last_day == today {
        streak_days.max(1)
    } else if last_day + Duration::days(1) == today {
        streak_days + 1
    } else {
        1
    }
}

pub async fn get(pool: &DbPool, user_id: i64) -> Result<Option<ProgressionRow>, DbError> {
    let row = sqlx::query_as::<_, ProgressionRow>(
        "SELECT user_id, xp, level, streak_days, last_study_at, updated_at
         FROM user_progression
         WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Award XP for a completed study session and advance the streak.
/// Returns the updated row and whether the award crossed a level boundary.
pub async fn record_study_session(
    pool: &DbPool,
    user_id: i64,
    xp_amount: i64,
    now: DateTime<Utc>,
) -> Result<(ProgressionRow, bool), DbError> {
    if xp_amount < 0 {
        return Err(DbError::Sqlx(sqlx::Error::Protocol(
            "xp_amount must be non-negative".to_string(),
        )));
    }

    let mut tx = pool.begin().await?;
    let existing = sqlx::query_as::<_, ProgressionRow>(
        "SELECT user_id, xp, level, streak_days, last_study_at, updated_at
         FROM user_progression
         WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (old_xp, old_level, old_streak, last_study_at) = existing
        .map(|row| (row.xp, row.level, row.streak_days, row.last_study_at))
        .unwrap_or((0, 0, 0, None));

    let new_xp = old_xp.saturating_add(xp_amount);
    let new_level = level_for_xp(new_xp);
    let new_streak = next_streak(last_study_at, old_streak, now);

    sqlx::query(
        "INSERT INTO user_progression (user_id, xp, level, streak_days, last_study_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT (user_id) DO UPDATE SET
            xp = ?2,
            level = ?3,
            streak_days = ?4,
            last_study_at = ?5,
            updated_at = ?5",
    )
    .bind(user_id)
    .bind(new_xp)
    .bind(new_level)
    .bind(new_streak)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let row = ProgressionRow {
        user_id,
        xp: new_xp,
        level: new_level,
        streak_days: new_streak,
        last_study_at: Some(now),
        updated_at: now,
    };
    Ok((row, new_level > old_level))
}
