use axum::{Json, extract::State};

use duet_types::api::HealthResponse;

use crate::auth::AppState;

/// GET /health: liveness plus the number of identities online.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: "Chat service is running".into(),
        timestamp: chrono::Utc::now(),
        online_users: state.engine.registry().online_count(),
    })
}
