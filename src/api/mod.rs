mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::contracts::Sequencer;

pub use handlers::{
    ApiError, AppState, DeleteResponse, ErrorResponse, InsertResponse, NextOrderResponse,
    ReorderResponse, StatsResponse, UpdateResponse,
};

/// Creates the API router.
pub fn create_router<Q: Sequencer + 'static>(state: Arc<AppState<Q>>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats::<Q>))
        .route("/metrics", get(handlers::metrics::<Q>))
        .route(
            "/timeline",
            get(handlers::list_records::<Q>).post(handlers::insert_record::<Q>),
        )
        .route("/timeline/next-order", get(handlers::next_order::<Q>))
        .route("/timeline/reorder", post(handlers::reorder::<Q>))
        .route("/timeline/at/:order", get(handlers::record_at::<Q>))
        .route(
            "/timeline/:id",
            get(handlers::get_record::<Q>)
                .put(handlers::update_record::<Q>)
                .delete(handlers::delete_record::<Q>),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Reads `TIMELINE_HOST` and `TIMELINE_PORT`, falling back to defaults.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("TIMELINE_HOST").unwrap_or(default.host),
            port: std::env::var("TIMELINE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(default.port),
        }
    }
}

/// Starts the HTTP server.
pub async fn start_server<Q, F>(
    config: ServerConfig,
    state: Arc<AppState<Q>>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    Q: Sequencer + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
