//! JSON-RPC 2.0 transport to the remote analyzer

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;

use super::{AnalysisRequest, AnalysisTransport, AttemptFailure};

pub const JSONRPC_VERSION: &str = "2.0";
pub const ANALYZE_METHOD: &str = "analyze_receipt";

/// Request envelope sent to the analyzer
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'static str,
    params: &'a AnalysisRequest,
}

/// HTTP transport speaking JSON-RPC 2.0
#[derive(Clone)]
pub struct JsonRpcTransport {
    client: Client,
    url: String,
}

impl JsonRpcTransport {
    /// Create a transport with a per-attempt deadline
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AnalysisTransport for JsonRpcTransport {
    async fn call(&self, request: &AnalysisRequest) -> std::result::Result<Value, AttemptFailure> {
        let envelope = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: Uuid::new_v4().to_string(),
            method: ANALYZE_METHOD,
            params: request,
        };
        debug!(url = %self.url, id = %envelope.id, "Sending JSON-RPC request");

        let response = self
            .client
            .post(&self.url)
            .json(&envelope)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(AttemptFailure::HttpStatus(status.as_u16()));
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                AttemptFailure::Timeout
            } else {
                AttemptFailure::Unexpected(format!("invalid response body: {}", e))
            }
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

fn classify_send_error(e: reqwest::Error) -> AttemptFailure {
    if e.is_timeout() {
        AttemptFailure::Timeout
    } else if e.is_builder() {
        AttemptFailure::Unexpected(e.to_string())
    } else {
        AttemptFailure::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisClient, AnalysisErrorCode, RetryPolicy};
    use crate::test_utils::{MockAnalyzerServer, ServerBehavior};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            retries: 2,
            backoff: Duration::ZERO,
        }
    }

    #[test]
    fn test_envelope_shape() {
        let params = AnalysisRequest::new(b"x", "a.pdf", "application/pdf", None);
        let envelope = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: "abc".to_string(),
            method: ANALYZE_METHOD,
            params: &params,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "analyze_receipt");
        assert_eq!(value["params"]["filename"], "a.pdf");
        assert_eq!(value["params"]["content_base64"], "eA==");
        assert!(value["params"]["text_hint"].is_null());
    }

    #[tokio::test]
    async fn test_round_trip_against_mock_server() {
        let server = MockAnalyzerServer::start().await;
        let transport = JsonRpcTransport::new(&server.rpc_url(), Duration::from_secs(5)).unwrap();
        let client = AnalysisClient::new(transport, policy());

        let payload = client
            .analyze(
                b"BODEGA CENTRAL\nFACTURA: F001-9\nTOTAL: 25.50",
                "boleta.txt",
                "text/plain",
                None,
            )
            .await
            .unwrap();

        assert_eq!(payload.provider.as_deref(), Some("mock-agent"));
        assert_eq!(payload.receipt["vendor_name"], "BODEGA CENTRAL");
        assert_eq!(payload.receipt["receipt_number"], "F001-9");
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_classified() {
        let server = MockAnalyzerServer::start_with(ServerBehavior::Status(503)).await;
        let transport = JsonRpcTransport::new(&server.rpc_url(), Duration::from_secs(5)).unwrap();
        let client = AnalysisClient::new(transport, policy());

        let err = client
            .analyze(b"x", "a.txt", "text/plain", None)
            .await
            .unwrap_err();

        assert_eq!(err.code, AnalysisErrorCode::AgentHttpError);
        assert!(err.retriable);
        assert_eq!(server.request_count(), 3);
    }

    #[tokio::test]
    async fn test_rpc_error_from_server() {
        let server =
            MockAnalyzerServer::start_with(ServerBehavior::RpcError("Invalid params".into())).await;
        let transport = JsonRpcTransport::new(&server.rpc_url(), Duration::from_secs(5)).unwrap();
        let client = AnalysisClient::new(transport, policy());

        let err = client
            .analyze(b"x", "a.txt", "text/plain", None)
            .await
            .unwrap_err();

        assert_eq!(err.code, AnalysisErrorCode::AgentRpcError);
        assert_eq!(err.message, "Agent error: Invalid params");
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_non_json_body_is_not_retried() {
        let server = MockAnalyzerServer::start_with(ServerBehavior::MalformedBody).await;
        let transport = JsonRpcTransport::new(&server.rpc_url(), Duration::from_secs(5)).unwrap();
        let client = AnalysisClient::new(transport, policy());

        let err = client
            .analyze(b"x", "a.txt", "text/plain", None)
            .await
            .unwrap_err();

        assert_eq!(err.code, AnalysisErrorCode::AgentUnexpectedError);
        assert!(!err.retriable);
        assert!(err.message.contains("invalid response body"));
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("http://{}/rpc", addr);
        let transport = JsonRpcTransport::new(&url, Duration::from_secs(2)).unwrap();
        let client = AnalysisClient::new(transport, policy());

        let err = client
            .analyze(b"x", "a.txt", "text/plain", None)
            .await
            .unwrap_err();

        assert_eq!(err.code, AnalysisErrorCode::AgentTransportError);
        assert!(err.retriable);
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server =
            MockAnalyzerServer::start_with(ServerBehavior::Delay(Duration::from_millis(500))).await;
        let transport =
            JsonRpcTransport::new(&server.rpc_url(), Duration::from_millis(50)).unwrap();
        let client = AnalysisClient::new(
            transport,
            RetryPolicy {
                retries: 1,
                backoff: Duration::ZERO,
            },
        );

        let err = client
            .analyze(b"x", "a.txt", "text/plain", None)
            .await
            .unwrap_err();

        assert_eq!(err.code, AnalysisErrorCode::AgentTimeout);
        assert!(err.retriable);
        assert_eq!(server.request_count(), 2);
    }
}
