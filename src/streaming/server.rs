use crate::{
    config::ServerConfig,
    error::{Result, SkywatchError},
    frame_cache::FrameCache,
    hub::Hub,
    storage::AttackStore,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{
    attack_ws_handler, create_attack_handler, detection_ws_handler, health_handler,
    video_input_handler, video_ws_handler,
};

/// Shared state for the axum server.
#[derive(Clone)]
pub struct AppState {
    pub detection_hub: Hub,
    pub video_hub: Hub,
    pub attack_hub: Hub,
    pub frame_cache: Arc<FrameCache>,
    pub attack_store: Arc<dyn AttackStore>,
}

/// WebSocket streaming server exposing the viewer and frame-source
/// endpoints.
pub struct StreamServer {
    config: ServerConfig,
    state: AppState,
}

impl StreamServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Bind and serve until the shutdown token fires.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let app = Router::new()
            .route("/ws/detections", get(detection_ws_handler))
            .route("/ws/video", get(video_ws_handler))
            .route("/ws/video/input", get(video_input_handler))
            .route("/ws/attacks", get(attack_ws_handler))
            .route("/attacks", post(create_attack_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        let addr = format!("{}:{}", self.config.ip, self.config.port);

        info!("Starting streaming server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            SkywatchError::server(format!("Failed to bind {}: {}", addr, e))
        })?;

        info!("Streaming server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| SkywatchError::server(format!("Server error: {}", e)))?;

        Ok(())
    }
}
