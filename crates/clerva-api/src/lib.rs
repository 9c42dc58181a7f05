pub mod error;
pub mod middleware;
pub mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use clerva_core::AppState;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/api/presence/heartbeat", post(routes::presence::heartbeat))
        .route(
            "/api/presence/disconnect",
            post(routes::presence::disconnect),
        )
        .route("/api/presence/offline", post(routes::presence::go_offline))
        .route("/api/presence/sweep", post(routes::presence::run_sweep))
        .route("/api/presence/devices", get(routes::presence::list_devices))
        .route("/api/presence/typing", post(routes::presence::set_typing))
        .route(
            "/api/presence/typing/{conversation_id}",
            get(routes::presence::get_typing),
        )
        .route("/api/presence/{user_id}", get(routes::presence::get_status))
        .route("/api/presence", get(routes::presence::get_statuses))
        .route("/api/progression/me", get(routes::progression::get_me))
        .route(
            "/api/progression/study-session",
            post(routes::progression::record_study_session),
        )
}
