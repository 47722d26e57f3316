//! HTTP API over the three removal modes
//!
//! Routes:
//! - `POST /api/image` multipart `file` → base64 PNG pair
//! - `POST /api/text` JSON `{"url": ...}` → base64 PNG pair
//! - `POST /api/png` multipart `file` → `image/png` download
//! - `GET /health`, `GET /api/info`
//!
//! The processor sits behind a mutex and runs on the blocking pool, so
//! requests reach the accelerator one at a time.

pub mod error;
pub mod handlers;

use crate::{
    error::{BgRemovalError, Result},
    processor::BackgroundRemovalProcessor,
    remover::BackgroundRemover,
    services::ImageLoader,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind, e.g. `127.0.0.1:7860`
    pub bind_addr: String,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7860".to_string(),
            max_request_size: 20 * 1024 * 1024,
            request_timeout_secs: 120,
        }
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<Mutex<BackgroundRemovalProcessor>>,
    pub loader: Arc<dyn ImageLoader>,
}

impl AppState {
    #[must_use]
    pub fn new(remover: BackgroundRemover) -> Self {
        let (processor, loader) = remover.into_parts();
        Self {
            processor: Arc::new(Mutex::new(processor)),
            loader,
        }
    }
}

/// Build the router with body limit, timeout, CORS and request tracing layers
pub fn create_app(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/api/image", post(handlers::image_handler))
        .route("/api/text", post(handlers::text_handler))
        .route("/api/png", post(handlers::png_handler))
        .route("/health", get(handlers::health_handler))
        .route("/api/info", get(handlers::info_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_request_size))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped
///
/// # Errors
/// - Invalid bind address
/// - Failure to bind or serve
pub async fn serve(remover: BackgroundRemover, config: ServerConfig) -> Result<()> {
    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        BgRemovalError::invalid_config(format!("Invalid bind address {}: {e}", config.bind_addr))
    })?;

    let app = create_app(AppState::new(remover), &config);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| BgRemovalError::invalid_config(format!("Failed to bind {addr}: {e}")))?;

    tracing::info!("Server listening on http://{addr}");
    tracing::info!("  POST /api/image  - multipart upload, returns original + transparent");
    tracing::info!("  POST /api/text   - JSON {{\"url\"}}, returns original + transparent");
    tracing::info!("  POST /api/png    - multipart upload, returns transparent PNG");
    tracing::info!("  GET  /health     - health check");
    tracing::info!("  GET  /api/info   - backend and model information");

    axum::serve(listener, app)
        .await
        .map_err(|e| BgRemovalError::internal(format!("Server failed: {e}")))?;

    Ok(())
}
