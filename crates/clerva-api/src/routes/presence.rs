use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use clerva_core::AppState;
use clerva_db::presence::{PresenceRow, PresenceStatus};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

const MAX_DEVICE_ID_LEN: usize = 128;
const MAX_USER_AGENT_LEN: usize = 512;
const MAX_CONVERSATION_ID_LEN: usize = 128;
const MAX_BULK_STATUS_IDS: usize = 100;

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub device_id: String,
    pub user_agent: Option<String>,
}

fn validate_device_id(device_id: &str) -> Result<&str, ApiError> {
    let trimmed = device_id.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("device_id is required".into()));
    }
    if trimmed.len() > MAX_DEVICE_ID_LEN {
        return Err(ApiError::BadRequest("device_id is too long".into()));
    }
    Ok(trimmed)
}

/// Per-device liveness signal. Upserts the device session only; the
/// aggregate status is derived by the sweep, never written here.
///
/// A storage failure is logged and reported in the body instead of an error
/// status: heartbeat loss self-heals on the next client tick.
pub async fn heartbeat(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Json<Value>, ApiError> {
    let device_id = validate_device_id(&body.device_id)?;
    if let Some(agent) = body.user_agent.as_deref() {
        if agent.len() > MAX_USER_AGENT_LEN {
            return Err(ApiError::BadRequest("user_agent is too long".into()));
        }
    }

    let now = Utc::now();
    let decision = state
        .rate_limiter
        .check(
            &state.db,
            &format!("heartbeat:{}", auth.user_id),
            state.config.heartbeats_per_minute,
            60,
            now.timestamp(),
        )
        .await;
    if !decision.allowed {
        return Err(ApiError::RateLimited);
    }

    match clerva_db::device_sessions::record_heartbeat(
        &state.db,
        auth.user_id,
        device_id,
        body.user_agent.as_deref(),
        now,
    )
    .await
    {
        Ok(()) => Ok(Json(json!({ "ok": true }))),
        Err(err) => {
            tracing::warn!(user_id = auth.user_id, "heartbeat write failed: {err}");
            Ok(Json(json!({ "ok": false })))
        }
    }
}

#[derive(Deserialize)]
pub struct DisconnectRequest {
    pub device_id: String,
}

/// Best-effort leave signal from tab close or navigation. A missing or
/// already-inactive session is a no-op; the sweep is the backstop for
/// signals that never arrive.
pub async fn disconnect(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<DisconnectRequest>,
) -> Result<StatusCode, ApiError> {
    let device_id = validate_device_id(&body.device_id)?;

    match clerva_db::device_sessions::deactivate(&state.db, auth.user_id, device_id, Utc::now())
        .await
    {
        Ok(flipped) => {
            if !flipped {
                tracing::debug!(user_id = auth.user_id, "disconnect for unknown session");
            }
        }
        Err(err) => {
            tracing::warn!(user_id = auth.user_id, "disconnect write failed: {err}");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Sign-out: deactivate every session and force the aggregate offline.
/// One of the two writers allowed to touch presence besides the sweep.
pub async fn go_offline(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<StatusCode, ApiError> {
    let now = Utc::now();
    clerva_db::device_sessions::deactivate_all_for_user(&state.db, auth.user_id, now).await?;
    clerva_db::presence::force_status(&state.db, auth.user_id, PresenceStatus::Offline, now)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Sweep trigger for the external scheduler. Idempotent; safe to invoke
/// more often than the 60s target cadence.
pub async fn run_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    if let Some(expected) = state.config.sweep_token.as_deref() {
        let supplied = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if supplied != Some(expected) {
            return Err(ApiError::Unauthorized);
        }
    }

    let outcome = clerva_core::reconciler::run_sweep(&state).await?;
    Ok(Json(serde_json::to_value(outcome).map_err(|e| {
        ApiError::Internal(anyhow::anyhow!(e))
    })?))
}

fn presence_json(user_id: i64, row: Option<PresenceRow>) -> Value {
    match row {
        Some(row) => json!({
            "user_id": row.user_id.to_string(),
            "status": row.status,
            "last_seen_at": row.last_seen_at.map(|t| t.to_rfc3339()),
            "last_activity_at": row.last_activity_at.map(|t| t.to_rfc3339()),
        }),
        // No row yet means the user has never been seen: offline.
        None => json!({
            "user_id": user_id.to_string(),
            "status": PresenceStatus::Offline,
            "last_seen_at": null,
            "last_activity_at": null,
        }),
    }
}

pub async fn get_status(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row = clerva_db::presence::get(&state.db, user_id).await?;
    Ok(Json(presence_json(user_id, row)))
}

#[derive(Deserialize)]
pub struct StatusQuery {
    /// Comma-separated user IDs.
    pub user_ids: String,
}

pub async fn get_statuses(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut user_ids = Vec::new();
    for part in query.user_ids.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let id: i64 = part
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid user id: {part}")))?;
        user_ids.push(id);
    }
    if user_ids.len() > MAX_BULK_STATUS_IDS {
        return Err(ApiError::BadRequest("too many user ids".into()));
    }

    let rows = clerva_db::presence::get_many(&state.db, &user_ids).await?;
    let entries: Vec<Value> = user_ids
        .iter()
        .map(|id| {
            let row = rows.iter().find(|r| r.user_id == *id).cloned();
            presence_json(*id, row)
        })
        .collect();
    Ok(Json(json!({ "presences": entries })))
}

/// Active-devices listing for the account settings page.
pub async fn list_devices(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let rows = clerva_db::device_sessions::list_for_user(&state.db, auth.user_id).await?;
    let devices: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "device_id": row.device_id,
                "is_active": row.is_active,
                "last_heartbeat_at": row.last_heartbeat_at.to_rfc3339(),
                "user_agent": row.user_agent,
                "created_at": row.created_at.to_rfc3339(),
            })
        })
        .collect();
    Ok(Json(json!({ "devices": devices })))
}

#[derive(Deserialize)]
pub struct TypingRequest {
    pub conversation_id: String,
}

pub async fn set_typing(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<TypingRequest>,
) -> Result<StatusCode, ApiError> {
    let conversation_id = body.conversation_id.trim();
    if conversation_id.is_empty() || conversation_id.len() > MAX_CONVERSATION_ID_LEN {
        return Err(ApiError::BadRequest("invalid conversation_id".into()));
    }

    let expires_at = Utc::now() + Duration::seconds(state.config.presence.typing_ttl_secs);
    clerva_db::typing_indicators::set_typing(&state.db, auth.user_id, conversation_id, expires_at)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_typing(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(conversation_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user_ids =
        clerva_db::typing_indicators::list_typing_users(&state.db, &conversation_id, Utc::now())
            .await?;
    let user_ids: Vec<String> = user_ids.iter().map(|id| id.to_string()).collect();
    Ok(Json(json!({ "user_ids": user_ids })))
}
