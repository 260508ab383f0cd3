//! Test utilities for tally-core
//!
//! This module provides testing infrastructure including a mock Ollama server
//! that can be used for development and integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::ai::{MockBackend, MockMode, PROMPT_MARKER};

#[derive(Clone)]
struct ServerState {
    mode: MockMode,
    requests: Arc<AtomicUsize>,
}

/// Mock Ollama server for testing and development
pub struct MockOllamaServer {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOllamaServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        Self::start_with_mode(MockMode::Normal).await
    }

    /// Start a server whose generate endpoint always returns 500
    pub async fn failing() -> Self {
        Self::start_with_mode(MockMode::Failing).await
    }

    /// Start a server that waits `delay` before every generate response
    pub async fn slow(delay: Duration) -> Self {
        Self::start_with_mode(MockMode::Slow(delay)).await
    }

    async fn start_with_mode(mode: MockMode) -> Self {
        let requests = Arc::new(AtomicUsize::new(0));
        let state = ServerState {
            mode,
            requests: requests.clone(),
        };

        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            requests,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of generate requests received
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ollama tags endpoint response (health check)
async fn handle_tags() -> Json<TagsResponse> {
    Json(TagsResponse {
        models: vec![ModelInfo {
            name: "llama3.2:latest".to_string(),
            modified_at: "2024-01-01T00:00:00Z".to_string(),
            size: 4_000_000_000,
        }],
    })
}

/// Ollama generate endpoint
async fn handle_generate(
    State(state): State<ServerState>,
    Json(request): Json<GenerateRequest>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);

    match state.mode {
        MockMode::Failing => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response();
        }
        MockMode::Slow(delay) => tokio::time::sleep(delay).await,
        MockMode::Normal => {}
    }

    let description = extract_description(&request.prompt);
    let classification = MockBackend::new().answer(&description);

    Json(GenerateResponse {
        model: request.model,
        // Wrapped in prose, like real models tend to do
        response: format!(
            "Here is the classification: {}",
            serde_json::to_string(&classification).unwrap()
        ),
        done: true,
    })
    .into_response()
}

/// Pull the quoted description out of the classification prompt
fn extract_description(prompt: &str) -> String {
    prompt
        .rsplit_once(PROMPT_MARKER)
        .map(|(_, rest)| rest.trim().trim_matches('"').to_string())
        .unwrap_or_else(|| prompt.to_string())
}

#[derive(Debug, Serialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    name: String,
    modified_at: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AIBackend, OllamaBackend};

    #[tokio::test]
    async fn test_mock_server_health_check() {
        let server = MockOllamaServer::start().await;
        let client = OllamaBackend::new(&server.url(), "test-model");

        assert!(client.health_check().await);
    }

    #[tokio::test]
    async fn test_mock_server_classify_unknown() {
        let server = MockOllamaServer::start().await;
        let client = OllamaBackend::new(&server.url(), "test-model");

        let result = client.classify_merchant("QWERTY HOLDINGS").await.unwrap();
        assert_eq!(result.category, "Miscellaneous");
        assert_eq!(server.requests(), 1);
    }

    #[tokio::test]
    async fn test_mock_server_slow() {
        let server = MockOllamaServer::slow(Duration::from_millis(50)).await;
        let client = OllamaBackend::new(&server.url(), "test-model");

        let result = client.classify_merchant("NETFLIX.COM").await.unwrap();
        assert_eq!(result.category, "Software & Subscriptions");
    }

    #[test]
    fn test_extract_description() {
        let prompt = format!("Respond with JSON only.\n\n{}\"AMZN Mktp US\"", PROMPT_MARKER);
        assert_eq!(extract_description(&prompt), "AMZN Mktp US");
        assert_eq!(extract_description("no marker"), "no marker");
    }

    #[tokio::test]
    async fn test_ollama_client_from_env_not_set() {
        // When OLLAMA_HOST is not set, from_env returns None
        std::env::remove_var("OLLAMA_HOST");
        let client = OllamaBackend::from_env();
        assert!(client.is_none());
    }
}
