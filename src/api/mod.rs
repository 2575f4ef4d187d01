pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(
    service_context: Arc<ServiceContext>,
    settings: Arc<Settings>,
) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        .route("/health", get(handlers::root::health_check))
        .route("/api", get(handlers::root::api_info))

        .nest("/api", api_routes())

        .with_state(app_state)

        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(submission_routes())
        .merge(notification_routes())
        .route_layer(axum::middleware::from_fn(middleware::viewer::require_viewer))
}

fn submission_routes() -> Router<AppState> {
    Router::new()
        .route("/submissions", get(handlers::submissions::list).post(handlers::submissions::create))
        .route("/submissions/:id", get(handlers::submissions::get).delete(handlers::submissions::delete))
        .route("/submissions/:id/upload", post(handlers::submissions::upload))
        .route("/submissions/:id/begin-review", post(handlers::submissions::begin_review))
        .route("/submissions/:id/approve", post(handlers::submissions::approve))
        .route("/submissions/:id/reject", post(handlers::submissions::reject))
        .route("/submissions/:id/due-date", put(handlers::submissions::set_due_date))
        .route("/assignments", post(handlers::submissions::assign))
        .route(
            "/students/:student_id/templates/:template_id/due-date",
            put(handlers::submissions::ensure_due_date),
        )
        .route("/students/:student_id/completion", get(handlers::submissions::completion))
        .route("/review-queue", get(handlers::submissions::review_queue))
}

fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(handlers::notifications::summary))
        .route("/notifications/:stream", get(handlers::notifications::stream_items))
        .route("/notifications/:stream/read-all", post(handlers::notifications::mark_all_read))
        .route("/notifications/:stream/:item_id/read", post(handlers::notifications::mark_read))
}
