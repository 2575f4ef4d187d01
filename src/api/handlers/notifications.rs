use axum::{
    extract::{Path, State, Extension},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    api::{middleware::viewer::CurrentViewer, state::AppState},
    domain::StreamType,
    error::Result,
    service::{HighlightedItem, NotificationSummary},
};

pub async fn summary(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
) -> Result<Json<NotificationSummary>> {
    let summary = state.service_context.notification_center
        .refresh(&current.viewer)
        .await?;
    Ok(Json(summary))
}

pub async fn stream_items(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path(stream): Path<StreamType>,
) -> Result<Json<Vec<HighlightedItem>>> {
    let items = state.service_context.notification_center
        .stream_items(&current.viewer, stream)
        .await?;
    Ok(Json(items))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path((stream, item_id)): Path<(StreamType, Uuid)>,
) -> Result<StatusCode> {
    state.service_context.notification_center
        .mark_as_read(&current.viewer, stream, item_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentViewer>,
    Path(stream): Path<StreamType>,
) -> Result<StatusCode> {
    state.service_context.notification_center
        .mark_all_as_read(&current.viewer, stream)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
