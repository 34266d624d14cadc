//! Remote receipt analysis
//!
//! The analyzer is an external service that turns a document into structured
//! receipt fields. This module owns the call policy around it:
//!
//! - `AnalysisTransport` trait: performs one attempt and reports a typed outcome
//! - `RetryPolicy`: pure retry/backoff decisions, no I/O
//! - `AnalysisClient`: runs attempts serially, sleeping between retries, and
//!   turns the last failure into a classified [`AnalysisError`]
//! - Transports: `JsonRpcTransport` (HTTP) and `MockTransport` (in-process)
//!
//! # Failure classification
//!
//! | Attempt outcome        | Retried | Final code               | Retriable |
//! |------------------------|---------|--------------------------|-----------|
//! | error object returned  | no      | `agent_rpc_error`        | no        |
//! | empty result           | no      | `agent_empty_result`     | no        |
//! | timeout                | yes     | `agent_timeout`          | yes       |
//! | HTTP status >= 500     | yes     | `agent_http_error`       | yes       |
//! | HTTP status < 500      | no      | `agent_http_error`       | no        |
//! | connection failure     | yes     | `agent_transport_error`  | yes       |
//! | anything else          | no      | `agent_unexpected_error` | no        |

pub mod jsonrpc;
mod mock;

pub use jsonrpc::JsonRpcTransport;
pub use mock::{mock_extraction, MockResponse, MockTransport, MOCK_MODEL, MOCK_PROVIDER};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AnalyzerBackend, AnalyzerConfig};
use crate::payload::ExtractionPayload;

/// Machine-readable analysis failure code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisErrorCode {
    AgentRpcError,
    AgentEmptyResult,
    AgentTimeout,
    AgentHttpError,
    AgentTransportError,
    AgentUnexpectedError,
}

impl AnalysisErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentRpcError => "agent_rpc_error",
            Self::AgentEmptyResult => "agent_empty_result",
            Self::AgentTimeout => "agent_timeout",
            Self::AgentHttpError => "agent_http_error",
            Self::AgentTransportError => "agent_transport_error",
            Self::AgentUnexpectedError => "agent_unexpected_error",
        }
    }
}

impl std::fmt::Display for AnalysisErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classified, final analysis failure
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct AnalysisError {
    pub code: AnalysisErrorCode,
    pub message: String,
    /// Whether re-submitting the same document later may succeed
    pub retriable: bool,
}

/// Outcome of a single failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    /// The analyzer answered with an error object
    Rpc(String),
    /// The analyzer answered with neither result nor error
    EmptyResult,
    /// The attempt exceeded its deadline
    Timeout,
    /// Non-success HTTP status
    HttpStatus(u16),
    /// Connection refused, DNS failure, reset...
    Transport(String),
    /// Anything else (malformed body, client misconfiguration)
    Unexpected(String),
}

impl AttemptFailure {
    /// Whether another attempt may help
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::HttpStatus(status) => *status >= 500,
            Self::Rpc(_) | Self::EmptyResult | Self::Unexpected(_) => false,
        }
    }

    /// Final classification once no more attempts will be made
    pub fn into_error(self) -> AnalysisError {
        let retriable = self.is_transient();
        let (code, message) = match self {
            Self::Rpc(message) => (
                AnalysisErrorCode::AgentRpcError,
                format!("Agent error: {}", message),
            ),
            Self::EmptyResult => (
                AnalysisErrorCode::AgentEmptyResult,
                "Agent returned empty result".to_string(),
            ),
            Self::Timeout => (
                AnalysisErrorCode::AgentTimeout,
                "Analyzer timeout after retries".to_string(),
            ),
            Self::HttpStatus(status) => (
                AnalysisErrorCode::AgentHttpError,
                format!("Analyzer HTTP error: {}", status),
            ),
            Self::Transport(_) => (
                AnalysisErrorCode::AgentTransportError,
                "Analyzer unavailable after retries".to_string(),
            ),
            Self::Unexpected(detail) => (
                AnalysisErrorCode::AgentUnexpectedError,
                format!("Unexpected analyzer error: {}", detail),
            ),
        };
        AnalysisError {
            code,
            message,
            retriable,
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rpc(message) => write!(f, "rpc error: {}", message),
            Self::EmptyResult => write!(f, "empty result"),
            Self::Timeout => write!(f, "timeout"),
            Self::HttpStatus(status) => write!(f, "http status {}", status),
            Self::Transport(detail) => write!(f, "transport: {}", detail),
            Self::Unexpected(detail) => write!(f, "unexpected: {}", detail),
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Retry budget and linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the retry that follows zero-based `attempt`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * (attempt + 1)
    }

    /// Decide whether to retry after `attempt` (zero-based) failed
    pub fn decide(&self, attempt: u32, failure: &AttemptFailure) -> RetryDecision {
        if failure.is_transient() && attempt < self.retries {
            RetryDecision::RetryAfter(self.delay_after(attempt))
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl From<&AnalyzerConfig> for RetryPolicy {
    fn from(config: &AnalyzerConfig) -> Self {
        Self {
            retries: config.retries,
            backoff: config.backoff,
        }
    }
}

/// Parameters of an `analyze_receipt` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub filename: String,
    pub mime_type: String,
    pub content_base64: String,
    pub text_hint: Option<String>,
}

impl AnalysisRequest {
    pub fn new(bytes: &[u8], filename: &str, mime_type: &str, text_hint: Option<&str>) -> Self {
        Self {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            text_hint: text_hint.map(str::to_string),
        }
    }

    /// Decoded document bytes
    pub fn content(&self) -> Option<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.content_base64)
            .ok()
    }
}

/// One attempt at the remote analyzer
///
/// Implementations return the response document (`{"result": ...}` or
/// `{"error": ...}`) or a transport-level failure. Interpreting the document
/// is left to [`AnalysisClient`].
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    async fn call(&self, request: &AnalysisRequest) -> Result<Value, AttemptFailure>;

    /// Endpoint or backend name (for logging)
    fn endpoint(&self) -> &str;
}

/// Analyzer client with retry policy
#[derive(Clone)]
pub struct AnalysisClient {
    transport: Arc<dyn AnalysisTransport>,
    policy: RetryPolicy,
}

impl AnalysisClient {
    pub fn new(transport: impl AnalysisTransport + 'static, policy: RetryPolicy) -> Self {
        Self {
            transport: Arc::new(transport),
            policy,
        }
    }

    /// Build the client selected by configuration
    pub fn from_config(config: &AnalyzerConfig) -> crate::Result<Self> {
        let policy = RetryPolicy::from(config);
        match config.backend {
            AnalyzerBackend::JsonRpc => Ok(Self::new(
                JsonRpcTransport::new(&config.url, config.timeout)?,
                policy,
            )),
            AnalyzerBackend::Mock => Ok(Self::new(MockTransport::new(), policy)),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Analyze a document, retrying transient failures
    pub async fn analyze(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
        text_hint: Option<&str>,
    ) -> Result<ExtractionPayload, AnalysisError> {
        let request = AnalysisRequest::new(bytes, filename, mime_type, text_hint);
        let endpoint = self.transport.endpoint();
        let mut attempt: u32 = 0;

        loop {
            debug!(endpoint, attempt, filename, "Calling analyzer");
            let start = Instant::now();

            let outcome = self
                .transport
                .call(&request)
                .await
                .and_then(interpret_response);

            let failure = match outcome {
                Ok(payload) => {
                    info!(
                        endpoint,
                        attempt,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Analyzer call succeeded"
                    );
                    return Ok(payload);
                }
                Err(failure) => failure,
            };

            warn!(
                endpoint,
                attempt,
                error = %failure,
                latency_ms = start.elapsed().as_millis() as u64,
                "Analyzer call failed"
            );

            match self.policy.decide(attempt, &failure) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        endpoint,
                        retry = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying analyzer request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => return Err(failure.into_error()),
            }
        }
    }
}

/// Interpret a JSON-RPC response document
pub fn interpret_response(body: Value) -> Result<ExtractionPayload, AttemptFailure> {
    let Value::Object(mut body) = body else {
        return Err(AttemptFailure::Unexpected(
            "response is not a JSON object".to_string(),
        ));
    };

    if let Some(error) = body.remove("error").filter(is_present) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| error.as_str().map(str::to_string))
            .unwrap_or_else(|| "Unknown analyzer error".to_string());
        return Err(AttemptFailure::Rpc(message));
    }

    match body.remove("result") {
        Some(Value::Object(result)) if !result.is_empty() => Ok(extraction_from_result(result)),
        Some(result) if is_present(&result) => Err(AttemptFailure::Unexpected(
            "result is not a JSON object".to_string(),
        )),
        _ => Err(AttemptFailure::EmptyResult),
    }
}

fn extraction_from_result(mut result: Map<String, Value>) -> ExtractionPayload {
    let provider = take_string(&mut result, "provider");
    let model = take_string(&mut result, "model");
    let receipt = match result.remove("receipt") {
        Some(Value::Object(receipt)) => receipt,
        Some(other) if is_present(&other) => {
            // Keep a malformed section visible instead of dropping it
            result.insert("receipt".to_string(), other);
            Map::new()
        }
        _ => Map::new(),
    };

    ExtractionPayload {
        provider,
        model,
        receipt,
        extra: result,
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) if is_present(&other) => {
            map.insert(key.to_string(), other);
            None
        }
        _ => None,
    }
}

/// JSON truthiness: null, false, 0, "" and empty containers are absent
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff: Duration::ZERO,
        }
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_after(0), Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1500));
    }

    #[test]
    fn test_decide_respects_budget_and_classification() {
        let policy = RetryPolicy {
            retries: 2,
            backoff: Duration::from_millis(100),
        };

        assert_eq!(
            policy.decide(0, &AttemptFailure::Timeout),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            policy.decide(1, &AttemptFailure::HttpStatus(503)),
            RetryDecision::RetryAfter(Duration::from_millis(200))
        );
        assert_eq!(
            policy.decide(2, &AttemptFailure::Timeout),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(0, &AttemptFailure::HttpStatus(404)),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(0, &AttemptFailure::Rpc("bad".into())),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(0, &AttemptFailure::Unexpected("x".into())),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_final_classification() {
        let err = AttemptFailure::Timeout.into_error();
        assert_eq!(err.code, AnalysisErrorCode::AgentTimeout);
        assert!(err.retriable);

        let err = AttemptFailure::HttpStatus(502).into_error();
        assert_eq!(err.code, AnalysisErrorCode::AgentHttpError);
        assert_eq!(err.message, "Analyzer HTTP error: 502");
        assert!(err.retriable);

        let err = AttemptFailure::HttpStatus(422).into_error();
        assert!(!err.retriable);

        let err = AttemptFailure::Rpc("bad file".into()).into_error();
        assert_eq!(err.code, AnalysisErrorCode::AgentRpcError);
        assert_eq!(err.message, "Agent error: bad file");
        assert!(!err.retriable);
        assert_eq!(err.to_string(), "agent_rpc_error: Agent error: bad file");

        let err = AttemptFailure::Transport("refused".into()).into_error();
        assert_eq!(err.code, AnalysisErrorCode::AgentTransportError);
        assert!(err.retriable);
    }

    #[test]
    fn test_interpret_response() {
        let ok = interpret_response(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {"provider": "p", "model": "m", "receipt": {"total": 5}, "latency": 3}
        }))
        .unwrap();
        assert_eq!(ok.provider.as_deref(), Some("p"));
        assert_eq!(ok.receipt["total"], json!(5));
        assert_eq!(ok.extra["latency"], json!(3));

        assert_eq!(
            interpret_response(json!({"error": {"code": -32602, "message": "Invalid params"}})),
            Err(AttemptFailure::Rpc("Invalid params".to_string()))
        );
        assert_eq!(
            interpret_response(json!({"error": {"code": -1}})),
            Err(AttemptFailure::Rpc("Unknown analyzer error".to_string()))
        );
        assert_eq!(
            interpret_response(json!({"result": {}})),
            Err(AttemptFailure::EmptyResult)
        );
        assert_eq!(
            interpret_response(json!({"result": null, "error": null})),
            Err(AttemptFailure::EmptyResult)
        );
        assert!(matches!(
            interpret_response(json!([1, 2])),
            Err(AttemptFailure::Unexpected(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_exhausts_retries_plus_one_attempts() {
        let transport = MockTransport::always(MockResponse::Fail(AttemptFailure::Timeout));
        let client = AnalysisClient::new(transport.clone(), policy(2));

        let err = client
            .analyze(b"data", "a.txt", "text/plain", None)
            .await
            .unwrap_err();

        assert_eq!(transport.attempts(), 3);
        assert_eq!(err.code, AnalysisErrorCode::AgentTimeout);
        assert!(err.retriable);
    }

    #[tokio::test]
    async fn test_rpc_error_is_not_retried() {
        let transport = MockTransport::always(MockResponse::RpcError("Invalid params".into()));
        let client = AnalysisClient::new(transport.clone(), policy(2));

        let err = client
            .analyze(b"data", "a.txt", "text/plain", None)
            .await
            .unwrap_err();

        assert_eq!(transport.attempts(), 1);
        assert_eq!(err.code, AnalysisErrorCode::AgentRpcError);
        assert!(!err.retriable);
    }

    #[tokio::test]
    async fn test_client_error_status_is_not_retried() {
        let transport = MockTransport::always(MockResponse::Fail(AttemptFailure::HttpStatus(400)));
        let client = AnalysisClient::new(transport.clone(), policy(2));

        let err = client
            .analyze(b"data", "a.txt", "text/plain", None)
            .await
            .unwrap_err();

        assert_eq!(transport.attempts(), 1);
        assert_eq!(err.code, AnalysisErrorCode::AgentHttpError);
        assert!(!err.retriable);
    }

    #[tokio::test]
    async fn test_server_error_recovers_on_retry() {
        let transport = MockTransport::scripted(vec![
            MockResponse::Fail(AttemptFailure::HttpStatus(503)),
            MockResponse::Fail(AttemptFailure::Transport("connection reset".into())),
            MockResponse::Extract,
        ]);
        let client = AnalysisClient::new(transport.clone(), policy(2));

        let payload = client
            .analyze(b"TIENDA QA SAC\nTOTAL: 10.00", "a.txt", "text/plain", None)
            .await
            .unwrap();

        assert_eq!(transport.attempts(), 3);
        assert_eq!(payload.provider.as_deref(), Some("mock-agent"));
        assert_eq!(payload.receipt["vendor_name"], "TIENDA QA SAC");
    }

    #[tokio::test]
    async fn test_unexpected_failure_is_fatal() {
        let transport = MockTransport::always(MockResponse::Fail(AttemptFailure::Unexpected(
            "invalid response body".into(),
        )));
        let client = AnalysisClient::new(transport.clone(), policy(2));

        let err = client
            .analyze(b"data", "a.txt", "text/plain", None)
            .await
            .unwrap_err();

        assert_eq!(transport.attempts(), 1);
        assert_eq!(err.code, AnalysisErrorCode::AgentUnexpectedError);
        assert!(!err.retriable);
        assert_eq!(
            err.message,
            "Unexpected analyzer error: invalid response body"
        );
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_fatal() {
        for body in [json!("not an object"), json!({"result": [1, 2]})] {
            let transport = MockTransport::always(MockResponse::Body(body.clone()));
            let client = AnalysisClient::new(transport.clone(), policy(2));

            let err = client
                .analyze(b"data", "a.txt", "text/plain", None)
                .await
                .unwrap_err();

            assert_eq!(transport.attempts(), 1, "{}", body);
            assert_eq!(err.code, AnalysisErrorCode::AgentUnexpectedError, "{}", body);
            assert!(!err.retriable, "{}", body);
        }
    }

    #[tokio::test]
    async fn test_empty_result_is_fatal() {
        let transport = MockTransport::always(MockResponse::Body(json!({"result": {}})));
        let client = AnalysisClient::new(transport.clone(), policy(2));

        let err = client
            .analyze(b"data", "a.txt", "text/plain", None)
            .await
            .unwrap_err();

        assert_eq!(transport.attempts(), 1);
        assert_eq!(err.code, AnalysisErrorCode::AgentEmptyResult);
    }

    #[test]
    fn test_request_encodes_content() {
        let request = AnalysisRequest::new(b"hola", "a.txt", "text/plain", Some("hint"));
        assert_eq!(request.content_base64, "aG9sYQ==");
        assert_eq!(request.content().unwrap(), b"hola");
        assert_eq!(request.text_hint.as_deref(), Some("hint"));
    }
}
