use axum::{extract::State, http::StatusCode, Json, response::IntoResponse};
use serde::Serialize;
use serde_json::json;

use crate::api::state::AppState;

#[derive(Serialize)]
pub struct ApiInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub backend: String,
    pub streams: Vec<String>,
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn api_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiInfo {
        name: "Practicum API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: "Submission review workflow and unread notification tracking".to_string(),
        backend: state.settings.backend.base_url.clone(),
        streams: state
            .service_context
            .notification_center
            .streams()
            .iter()
            .map(|s| s.to_string())
            .collect(),
    })
}
