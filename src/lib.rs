// Library exports for binary tools and tests
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use error::AppError;
use middleware::auth::JwtSecret;
use storage::BlobStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub blobs: Arc<BlobStore>,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    let jwt_secret = JwtSecret(state.config.jwt_secret.clone());
    let cors = cors_layer(&state.config.cors_origins);
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Auth
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/me", get(routes::auth::me))
        // Groups
        .route("/groups", get(routes::groups::list_groups).post(routes::groups::create_group))
        .route("/groups/{id}", get(routes::groups::get_group).delete(routes::groups::delete_group))
        .route("/groups/{id}/join", put(routes::groups::join_group))
        .route("/groups/{id}/leave", put(routes::groups::leave_group))
        .route(
            "/groups/{id}/project",
            put(routes::groups::set_project).delete(routes::groups::clear_project),
        )
        // Tasks
        .route("/tasks", get(routes::tasks::list_tasks).post(routes::tasks::create_task))
        .route(
            "/tasks/{id}",
            get(routes::tasks::get_task)
                .put(routes::tasks::update_task)
                .delete(routes::tasks::delete_task),
        )
        .route("/tasks/{id}/files", post(routes::tasks::upload_task_file))
        .route("/tasks/files/{filename}", get(routes::tasks::serve_file))
        .fallback(|| async { AppError::not_found("Route not found") })
        .layer(axum::Extension(jwt_secret))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Configured origins plus localhost for local development.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins.to_vec();
    let origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(o) = origin.to_str() else {
            return false;
        };
        if o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") {
            return true;
        }
        allowed.iter().any(|a| a == o)
    });

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_origin(origin)
}
