use axum::{extract::State, Json};
use chrono::Utc;
use clerva_core::AppState;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

const MAX_XP_PER_SESSION: i64 = 500;

pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let row = clerva_db::progression::get(&state.db, auth.user_id).await?;

    Ok(Json(match row {
        Some(row) => json!({
            "user_id": row.user_id.to_string(),
            "xp": row.xp,
            "level": row.level,
            "streak_days": row.streak_days,
            "last_study_at": row.last_study_at.map(|t| t.to_rfc3339()),
        }),
        None => json!({
            "user_id": auth.user_id.to_string(),
            "xp": 0,
            "level": 0,
            "streak_days": 0,
            "last_study_at": null,
        }),
    }))
}

#[derive(Deserialize, Default)]
pub struct StudySessionRequest {
    /// XP to award; the server default applies when omitted.
    pub xp: Option<i64>,
}

pub async fn record_study_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<StudySessionRequest>,
) -> Result<Json<Value>, ApiError> {
    let requested = body.xp.unwrap_or(state.config.study_session_xp);
    if requested < 0 || requested > MAX_XP_PER_SESSION {
        return Err(ApiError::BadRequest("xp out of range".into()));
    }

    let (row, leveled_up) =
        clerva_db::progression::record_study_session(&state.db, auth.user_id, requested, Utc::now())
            .await?;

    Ok(Json(json!({
        "user_id": row.user_id.to_string(),
        "xp": row.xp,
        "level": row.level,
        "streak_days": row.streak_days,
        "leveled_up": leveled_up,
    })))
}
