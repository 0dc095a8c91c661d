use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use lib_common::core::{HistoryQuery, QueryError};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

/// Read API over the shared history.
pub fn build_router(query: Arc<HistoryQuery>) -> Router {
    Router::new()
        .route("/api/history/{house}", get(history_one_handler))
        .route("/api/history", get(history_all_handler))
        .route("/api/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(query)
}

/// Serves the router on `0.0.0.0:port` until `shutdown` is cancelled.
pub async fn run(port: u16, query: Arc<HistoryQuery>, shutdown: CancellationToken) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("History API listening on {}", addr);

    axum::serve(listener, build_router(query))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("History API shutting down.");
        })
        .await
}

async fn history_one_handler(
    State(query): State<Arc<HistoryQuery>>,
    Path(house): Path<String>,
) -> Result<Response, ApiError> {
    let history = query.get_one(&house)?;
    Ok(Json(history).into_response())
}

async fn history_all_handler(State(query): State<Arc<HistoryQuery>>) -> impl IntoResponse {
    Json(query.get_all())
}

async fn status_handler(State(query): State<Arc<HistoryQuery>>) -> impl IntoResponse {
    Json(query.get_status())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Error body returned to API callers: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(QueryError);

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            QueryError::InvalidSource(_) => StatusCode::BAD_REQUEST,
        };
        debug!(error = %self.0, "Rejected history request");
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use lib_common::core::{ConnectorState, House, HistoryStore};
    use serde_json::Value;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn app(state: ConnectorState) -> (Arc<HistoryStore>, watch::Sender<ConnectorState>, Router) {
        let store = Arc::new(HistoryStore::new());
        let (tx, rx) = watch::channel(state);
        let query = Arc::new(HistoryQuery::new(Arc::clone(&store), rx));
        (store, tx, build_router(query))
    }

    async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn bet888_history_after_two_deliveries() {
        let (store, _tx, router) = app(ConnectorState::Active);
        store.update(House::Bet888, &[1.1, 1.2, 1.3]);
        let (_, first) = get(&router, "/api/history/bet888").await;
        assert_eq!(
            first,
            json!({"house": "bet888", "total": 3, "last": 1.3, "history": [1.1, 1.2, 1.3]})
        );

        store.update(House::Bet888, &[1.1, 1.2, 1.3]);
        let (_, resent) = get(&router, "/api/history/bet888").await;
        assert_eq!(resent, first);

        store.update(House::Bet888, &[1.2, 1.3, 1.4]);

        let (status, body) = get(&router, "/api/history/bet888").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["house"], "bet888");
        assert_eq!(body["total"], 3);
        assert_eq!(body["last"], 1.4);
        assert_eq!(body["history"], json!([1.2, 1.3, 1.4]));
    }

    #[tokio::test]
    async fn house_path_is_case_insensitive() {
        let (store, _tx, router) = app(ConnectorState::Active);
        store.update(House::Placard, &[3.0]);

        let (status, body) = get(&router, "/api/history/PLACARD").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["house"], "placard");
        assert_eq!(body["last"], 3.0);
    }

    #[tokio::test]
    async fn unknown_house_is_a_bad_request() {
        let (_store, _tx, router) = app(ConnectorState::Active);

        let (status, body) = get(&router, "/api/history/unknownhouse").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("unknownhouse"));
        assert!(message.contains("placard, bet888 or betway"));
    }

    #[tokio::test]
    async fn all_histories_are_listed() {
        let (store, _tx, router) = app(ConnectorState::Active);
        store.update(House::Betway, &[2.0, 2.5]);

        let (status, body) = get(&router, "/api/history").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["betway"]["total"], 2);
        assert_eq!(body["placard"], json!({"total": 0, "last": null, "history": []}));
        assert_eq!(body.as_object().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn status_reports_liveness_and_last_values() {
        let (store, tx, router) = app(ConnectorState::Disconnected);
        store.update(House::Bet888, &[1.4]);

        let (status, body) = get(&router, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], false);
        assert_eq!(body["last_updates"]["bet888"], 1.4);
        assert_eq!(body["last_updates"]["placard"], Value::Null);
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

        tx.send_replace(ConnectorState::Active);
        let (_, body) = get(&router, "/api/status").await;
        assert_eq!(body["connected"], true);
    }

    #[tokio::test]
    async fn health_and_cors() {
        let (_store, _tx, router) = app(ConnectorState::Active);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "http://dashboard.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let (_store, _tx, router) = app(ConnectorState::Active);
        let (status, _) = get(&router, "/api/histories").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
