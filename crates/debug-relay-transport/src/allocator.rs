//! Session id allocation.

use std::time::Duration;

use async_trait::async_trait;
use debug_relay_core::{Gateway, SessionId};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;

/// Request timeout for session allocation.
pub const ALLOCATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Allocation error.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Failed to contact server: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Received empty debug_session_id from server")]
    EmptySessionId,
}

/// Hands out session ids.
#[async_trait]
pub trait SessionAllocator: Send + Sync {
    /// Allocate a new debug session id.
    async fn allocate(&self) -> Result<SessionId, AllocationError>;
}

#[derive(Deserialize)]
struct StartSessionResponse {
    #[serde(default)]
    debug_session_id: String,
}

/// Allocates sessions through the gateway's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpSessionAllocator {
    client: reqwest::Client,
    url: String,
}

impl HttpSessionAllocator {
    /// Create an allocator for the given gateway.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(gateway: &Gateway) -> Result<Self, AllocationError> {
        let client = reqwest::Client::builder().timeout(ALLOCATE_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: format!("{}/api/v2/session/start?debug=true", gateway.http_base()),
        })
    }
}

#[async_trait]
impl SessionAllocator for HttpSessionAllocator {
    async fn allocate(&self) -> Result<SessionId, AllocationError> {
        tracing::info!(url = %self.url, "Requesting debug session");

        let resp = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AllocationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result: StartSessionResponse = resp.json().await?;
        if result.debug_session_id.is_empty() {
            return Err(AllocationError::EmptySessionId);
        }

        tracing::info!(session_id = %result.debug_session_id, "Debug session started");
        Ok(SessionId::from(result.debug_session_id))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        Json, Router,
        extract::Query,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::post,
    };
    use serde_json::json;

    use super::*;

    async fn spawn_gateway(app: Router) -> Gateway {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Gateway::parse(&format!("http://{addr}"))
    }

    async fn start_session(Query(query): Query<HashMap<String, String>>) -> Response {
        if query.get("debug").map(String::as_str) != Some("true") {
            return StatusCode::BAD_REQUEST.into_response();
        }
        Json(json!({"debug_session_id": "sess-1"})).into_response()
    }

    #[tokio::test]
    async fn test_allocate_success() {
        let gateway =
            spawn_gateway(Router::new().route("/api/v2/session/start", post(start_session))).await;
        let allocator = HttpSessionAllocator::new(&gateway).unwrap();

        assert_eq!(allocator.allocate().await.unwrap(), SessionId::from("sess-1"));
    }

    #[tokio::test]
    async fn test_allocate_server_error() {
        let app = Router::new().route(
            "/api/v2/session/start",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
        let allocator = HttpSessionAllocator::new(&spawn_gateway(app).await).unwrap();

        match allocator.allocate().await {
            Err(AllocationError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("Expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_allocate_empty_id() {
        let app = Router::new().route(
            "/api/v2/session/start",
            post(|| async { Json(json!({"debug_session_id": ""})) }),
        );
        let allocator = HttpSessionAllocator::new(&spawn_gateway(app).await).unwrap();

        assert!(matches!(
            allocator.allocate().await,
            Err(AllocationError::EmptySessionId)
        ));
    }
}
