pub mod error;
pub mod handlers;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::infra::http::middleware::{log_responses, set_request_context};

pub fn build_router(state: ApiState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(handlers::upload_image))
        .route(
            "/image/{id}",
            get(handlers::get_image).delete(handlers::delete_image),
        )
        .route("/images/{*path}", get(handlers::serve_blob))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
