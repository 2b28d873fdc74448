//! HTTP server for TRM inference.
//!
//! ## Endpoints
//!
//! - `GET /` - Web interface (static/index.html, with a fallback page)
//! - `GET /api/model-info` - Loaded model details
//! - `POST /api/solve` - Solve an ARC-AGI task
//! - `GET /api/examples` - Sample tasks from the evaluation set
//! - `GET /api/task/{task_id}` - Look up one task by ID
//! - `GET /health` - Health check
//! - `/static/*` - Static assets
//!
//! The server stays up even when the model or the task dataset failed to
//! load: affected endpoints return 503/500 while `/health` keeps answering.

pub mod error;
pub mod routes;

pub use error::ApiError;

use crate::data::TaskStore;
use crate::inference::InferenceEngine;
use axum::Router;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Inference engine, absent when the model failed to load
    pub engine: Option<Arc<InferenceEngine>>,
    /// Evaluation task store, absent when the dataset failed to load
    pub tasks: Option<Arc<TaskStore>>,
    /// Directory served under `/static`
    pub static_dir: PathBuf,
}

pub fn create_router(state: AppState) -> Router {
    let static_service = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/", get(routes::index))
        .route("/api/model-info", get(routes::model_info))
        .route("/api/solve", post(routes::solve))
        .route("/api/examples", get(routes::examples))
        .route("/api/task/{task_id}", get(routes::task_by_id))
        .route("/health", get(routes::health))
        .nest_service("/static", static_service)
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState, addr: SocketAddr) -> crate::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Shutdown signal received"),
        Err(e) => {
            // Without a signal handler the server simply runs until killed.
            log::error!("Failed to install shutdown handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
