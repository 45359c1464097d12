//! HTTP service for screenshot parsing
//!
//! Exposes the parsing pipeline as a request/response API:
//! - `POST /process_image`: multipart image upload plus optional form
//!   parameters, returning the parsed element list.
//! - `GET /health`: whether the model registry loaded at startup.

mod handlers;
mod types;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use screen_parse_orchestrator::{ModelRegistry, ParseConfig};

pub use handlers::*;
pub use types::*;

/// Largest accepted upload; 4K screenshots fit comfortably.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Server state shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Loaded models, or `None` when startup loading failed. Handlers
    /// answer 503 until models are available so health stays observable.
    pub registry: Option<Arc<ModelRegistry>>,
    /// Pipeline defaults, overridable per request via form fields.
    pub defaults: ParseConfig,
}

impl ApiState {
    #[must_use]
    pub fn new(registry: Option<Arc<ModelRegistry>>, defaults: ParseConfig) -> Self {
        Self { registry, defaults }
    }
}

/// Build the API router with all endpoints.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/process_image", post(process_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the API server.
pub async fn start_server(addr: &str, state: ApiState) -> Result<(), std::io::Error> {
    tracing::info!("Starting screen parsing API server on {}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await
}
