use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::infrastructure::observability::request_id_middleware;
use crate::presentation::handlers::{
    create_task_handler, delete_task_handler, extract_audio_handler, get_task_handler,
    health_handler, list_tasks_handler, platform_task_handler, subtitle_handler,
};
use crate::presentation::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // The streaming cap lives in staging; the body limit just has to
    // stay out of its way.
    let body_limit = state
        .settings
        .staging
        .max_file_size
        .saturating_add(1024 * 1024) as usize;

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/v1/tasks",
            post(create_task_handler).get(list_tasks_handler),
        )
        .route(
            "/api/v1/tasks/{task_id}",
            get(get_task_handler).delete(delete_task_handler),
        )
        .route("/api/v1/tasks/{task_id}/subtitle", get(subtitle_handler))
        .route("/api/v1/audio/extract", post(extract_audio_handler))
        .route(
            "/api/v1/platforms/{platform}/video_task",
            post(platform_task_handler),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}
