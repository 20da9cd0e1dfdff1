//! HTTP query API over the reading store.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use thermolog_common::Reading;
use thiserror::Error;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

use crate::ingest::SharedIngestor;
use crate::store::{DEFAULT_HISTORY_LIMIT, SharedStore, StoreError, run_blocking};

/// The externally visible part of a reading.
///
/// Id and heat index are deliberately left out; missing values serialize as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReadingSummary {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub timestamp: Option<i64>,
}

impl From<Reading> for ReadingSummary {
    fn from(reading: Reading) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: reading.timestamp,
        }
    }
}

/// Error body returned to API clients.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Query API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The store holds no readings yet.
    #[error("No data available")]
    NoData,
    /// The store could not be read.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NoData => StatusCode::NOT_FOUND,
            ApiError::Storage(e) => {
                error!(error = %e, "Failed to read readings");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    store: SharedStore,
    ingestor: SharedIngestor,
    history_limit: usize,
}

/// Create the HTTP router.
///
/// `history_limit` is capped at [`DEFAULT_HISTORY_LIMIT`].
pub fn create_router(
    store: SharedStore,
    ingestor: SharedIngestor,
    history_limit: usize,
    request_timeout: Option<Duration>,
) -> Router {
    let state = AppState {
        store,
        ingestor,
        history_limit: history_limit.min(DEFAULT_HISTORY_LIMIT),
    };

    let router = Router::new()
        .route("/latest", get(latest_handler))
        .route("/history", get(history_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    match request_timeout {
        Some(timeout) => router.layer(TimeoutLayer::new(timeout)),
        None => router,
    }
}

/// Handler for the /latest endpoint.
async fn latest_handler(State(state): State<AppState>) -> Result<Json<ReadingSummary>, ApiError> {
    let latest = run_blocking(&state.store, |store| store.latest()).await?;

    latest
        .map(|reading| Json(ReadingSummary::from(reading)))
        .ok_or(ApiError::NoData)
}

/// Handler for the /history endpoint.
async fn history_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReadingSummary>>, ApiError> {
    let limit = state.history_limit;
    let history = run_blocking(&state.store, move |store| store.history(limit)).await?;

    Ok(Json(history.into_iter().map(ReadingSummary::from).collect()))
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    // Ready once this process stored something, or the store already had data
    let ready = state.ingestor.stats().readings_stored > 0
        || run_blocking(&state.store, |store| store.count())
            .await
            .is_ok_and(|count| count > 0);

    if ready {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no readings stored yet\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    store: SharedStore,
    ingestor: SharedIngestor,
    listen_addr: SocketAddr,
    history_limit: usize,
    request_timeout: Option<Duration>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        store: SharedStore,
        ingestor: SharedIngestor,
        listen_addr: SocketAddr,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            ingestor,
            listen_addr,
            history_limit,
            request_timeout: None,
        }
    }

    /// Abort requests that take longer than `timeout` with 408.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(
            self.store,
            self.ingestor,
            self.history_limit,
            self.request_timeout,
        );

        info!(addr = %self.listen_addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingestor;
    use crate::sqlite::SqliteStore;
    use crate::store::ReadingStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use thermolog_common::NewReading;
    use tower::ServiceExt;

    fn make_state() -> (Arc<SqliteStore>, SharedIngestor) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ingestor = Arc::new(Ingestor::new(store.clone()));
        (store, ingestor)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn sample(temperature: f64, timestamp: i64) -> NewReading {
        NewReading {
            temperature: Some(temperature),
            humidity: Some(50.0),
            heat_index: Some(temperature - 0.5),
            timestamp: Some(timestamp),
        }
    }

    #[tokio::test]
    async fn test_latest_empty_store() {
        let (store, ingestor) = make_state();
        let router = create_router(store, ingestor, 100, None);

        let (status, body) = get_json(router, "/latest").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, serde_json::json!({"error": "No data available"}));
    }

    #[tokio::test]
    async fn test_history_empty_store() {
        let (store, ingestor) = make_state();
        let router = create_router(store, ingestor, 100, None);

        let (status, body) = get_json(router, "/history").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_latest_projection() {
        let (store, ingestor) = make_state();
        store.append(&sample(22.5, 1700000000)).unwrap();
        let router = create_router(store, ingestor, 100, None);

        let (status, body) = get_json(router, "/latest").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"temperature": 22.5, "humidity": 50.0, "timestamp": 1700000000})
        );
    }

    #[tokio::test]
    async fn test_latest_missing_fields_are_null() {
        let (store, ingestor) = make_state();
        store
            .append(&NewReading::decode(br#"{"temperature": 21.5}"#).unwrap())
            .unwrap();
        let router = create_router(store, ingestor, 100, None);

        let (_, body) = get_json(router, "/latest").await;

        assert_eq!(
            body,
            serde_json::json!({"temperature": 21.5, "humidity": null, "timestamp": null})
        );
    }

    #[tokio::test]
    async fn test_history_newest_first_and_capped() {
        let (store, ingestor) = make_state();
        for ts in 0..15 {
            store.append(&sample(20.0, ts)).unwrap();
        }
        let router = create_router(store, ingestor, 10, None);

        let (status, body) = get_json(router, "/history").await;

        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 10);
        assert_eq!(items[0]["timestamp"], 14);
        assert_eq!(items[9]["timestamp"], 5);
        assert!(items[0].get("heat_index").is_none());
        assert!(items[0].get("id").is_none());
    }

    #[tokio::test]
    async fn test_history_limit_never_exceeds_100() {
        let (store, ingestor) = make_state();
        for ts in 0..150 {
            store.append(&sample(20.0, ts)).unwrap();
        }
        let router = create_router(store, ingestor, 500, None);

        let (status, body) = get_json(router, "/history").await;

        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 100);
        assert_eq!(items[0]["timestamp"], 149);
    }

    #[test]
    fn test_api_error_messages() {
        assert_eq!(ApiError::NoData.to_string(), "No data available");
        let err = ApiError::from(StoreError::Closed);
        assert!(matches!(err, ApiError::Storage(StoreError::Closed)));
        assert_eq!(err.to_string(), "Storage error: Store is closed");
    }

    #[tokio::test]
    async fn test_storage_error_is_500() {
        let (store, ingestor) = make_state();
        store.close().unwrap();
        let router = create_router(store, ingestor, 100, None);

        let (status, body) = get_json(router.clone(), "/latest").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("closed"));

        let (status, _) = get_json(router, "/history").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (store, ingestor) = make_state();
        let router = create_router(store, ingestor, 100, None);

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let (store, ingestor) = make_state();
        let router = create_router(store, ingestor.clone(), 100, None);

        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        ingestor.handle_payload(br#"{"temperature": 20.0}"#).await;

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (store, ingestor) = make_state();
        let router = create_router(store, ingestor, 100, None);

        let response = router
            .oneshot(
                Request::get("/history")
                    .header("origin", "http://dashboard.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(
            response
                .headers()
                .contains_key("access-control-allow-origin")
        );
    }

    #[tokio::test]
    async fn test_unknown_route_404() {
        let (store, ingestor) = make_state();
        let router = create_router(store, ingestor, 100, Some(Duration::from_secs(5)));

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
