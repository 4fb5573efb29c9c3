//! HTTP front end for a [`TextEmbedder`].
//!
//! `POST /embed` (or `POST /`) with `{"text": "..."}` answers
//! `{"embedding": [...]}`. Every response allows any origin so browser
//! visualizers can call the service directly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::engine::TextEmbedder;

/// Shared handle to the loaded model.
pub type SharedEmbedder = Arc<dyn TextEmbedder>;

#[derive(Debug, Default, Deserialize)]
struct EmbedRequest {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model: String,
    dimension: usize,
}

/// Builds the service routes around `embedder`.
pub fn router(embedder: SharedEmbedder) -> Router {
    Router::new()
        .route("/", post(embed).options(preflight))
        .route("/embed", post(embed).options(preflight))
        .route("/health", get(health))
        .with_state(embedder)
}

/// Binds `addr` and serves until the process is stopped.
pub async fn serve(addr: SocketAddr, embedder: SharedEmbedder) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        address = %listener.local_addr()?,
        model = embedder.model_id(),
        "Embedding server listening"
    );
    axum::serve(listener, router(embedder)).await
}

async fn embed(State(embedder): State<SharedEmbedder>, body: Bytes) -> Response {
    let request: EmbedRequest = serde_json::from_slice(&body).unwrap_or_default();
    let text = match request.text {
        Some(text) if !text.is_empty() => text,
        _ => return error_response(StatusCode::BAD_REQUEST, "Missing text field"),
    };

    let result = tokio::task::spawn_blocking(move || embedder.embed(&text)).await;
    match result {
        Ok(Ok(embedding)) => with_cors(Json(EmbedResponse { embedding }).into_response()),
        Ok(Err(e)) => {
            warn!(error = %e, "Embedding failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "Embedding task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "embedding task failed")
        }
    }
}

async fn preflight() -> Response {
    let mut response = with_cors(StatusCode::OK.into_response());
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

async fn health(State(embedder): State<SharedEmbedder>) -> Response {
    with_cors(
        Json(HealthResponse {
            status: "ok",
            model: embedder.model_id().to_string(),
            dimension: embedder.dimension(),
        })
        .into_response(),
    )
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = Json(ErrorResponse {
        error: message.to_string(),
    });
    with_cors((status, body).into_response())
}

fn with_cors(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use axum::body::to_bytes;

    /// Returns a fixed unit vector, or fails for the text "boom".
    struct FakeEmbedder;

    impl TextEmbedder for FakeEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text == "boom" {
                return Err(EmbeddingError::Tokenization("bad input".to_string()));
            }
            Ok(vec![0.6, 0.8])
        }

        fn model_id(&self) -> &str {
            "fake-model"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn shared() -> SharedEmbedder {
        Arc::new(FakeEmbedder)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn allows_any_origin(response: &Response) -> bool {
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            == Some(&HeaderValue::from_static("*"))
    }

    #[tokio::test]
    async fn embeds_text() {
        let response = embed(State(shared()), Bytes::from_static(br#"{"text": "hello"}"#)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(allows_any_origin(&response));
        let body = json_body(response).await;
        let values: Vec<f64> = body["embedding"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        assert_eq!(values.len(), 2);
        assert!((values[0] - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn rejects_missing_text() {
        let payloads: [&[u8]; 3] = [br#"{}"#, br#"{"text": ""}"#, b"not json"];
        for payload in payloads {
            let response = embed(State(shared()), Bytes::copy_from_slice(payload)).await;

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert!(allows_any_origin(&response));
            let body = json_body(response).await;
            assert_eq!(body["error"], "Missing text field");
        }
    }

    #[tokio::test]
    async fn model_failure_is_server_error() {
        let response = embed(State(shared()), Bytes::from_static(br#"{"text": "boom"}"#)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn preflight_lists_allowed_methods() {
        let response = preflight().await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(allows_any_origin(&response));
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS),
            Some(&HeaderValue::from_static("POST, OPTIONS"))
        );
    }

    #[tokio::test]
    async fn health_reports_model() {
        let body = json_body(health(State(shared())).await).await;
        assert_eq!(body["model"], "fake-model");
        assert_eq!(body["dimension"], 2);
    }

    #[test]
    fn router_builds() {
        let _ = router(shared());
    }
}
