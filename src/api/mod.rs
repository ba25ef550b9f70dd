mod error;
mod rest;
mod types;
mod websocket;

pub use error::{ApiError, ApiResult};
pub use rest::RestApi;
pub use types::*;
pub use websocket::websocket_handler;

use crate::metrics::metrics_route;
use crate::registry::TransferRegistry;
use crate::storage::DownloadPort;
use crate::transfer::{DownloadCoordinator, ProgressHub, UploadCoordinator};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Hub events buffered per websocket subscriber
const PROGRESS_BUFFER: usize = 256;

/// Upload body limit unless overridden with `AppState::with_upload_limit`
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    pub registry: TransferRegistry,
    pub storage: Arc<dyn DownloadPort>,
    pub uploads: UploadCoordinator,
    pub downloads: DownloadCoordinator,
    pub hub: ProgressHub,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Wires both coordinators to a fresh progress hub
    pub fn new(
        registry: TransferRegistry,
        storage: Arc<dyn DownloadPort>,
        uploads: UploadCoordinator,
        downloads: DownloadCoordinator,
    ) -> Self {
        let (hub, _) = broadcast::channel(PROGRESS_BUFFER);
        Self {
            registry,
            storage,
            uploads: uploads.with_progress_hub(hub.clone()),
            downloads: downloads.with_progress_hub(hub.clone()),
            hub,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_upload_limit(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

/// Create a complete API server with REST and WebSocket support
pub fn create_api_server(state: AppState) -> Router {
    let rest_api = RestApi::new(state.clone());

    // Configure CORS to allow frontend requests
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let ws_router = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state);

    Router::new()
        .merge(rest_api.router())
        .merge(ws_router)
        .route("/metrics", metrics_route())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::registry::MemoryPersistence;
    use crate::storage::MemoryStorage;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn create_test_state() -> AppState {
        let config = TransferConfig::default();
        let storage = Arc::new(MemoryStorage::new());
        let registry = TransferRegistry::open(Arc::new(MemoryPersistence::new()), 5)
            .await
            .unwrap();
        let uploads = UploadCoordinator::new(&config)
            .unwrap()
            .with_relay(storage.clone());
        let downloads = DownloadCoordinator::new(storage.clone(), &config);

        AppState::new(registry, storage, uploads, downloads)
    }

    #[tokio::test]
    async fn test_api_server_routes() {
        let app = create_api_server(create_test_state().await);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_route_without_recorder() {
        let app = create_api_server(create_test_state().await);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        // Recorder is only installed by the server binary
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
