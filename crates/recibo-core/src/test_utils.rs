//! Test utilities for recibo-core
//!
//! A mock JSON-RPC analyzer server that speaks the same wire contract as the
//! real analyzer. Used by transport tests here and by the server crate.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::analysis::{mock_extraction, AnalysisRequest};

/// How the mock server answers every request
#[derive(Debug, Clone)]
pub enum ServerBehavior {
    /// Rule-based extraction, like the in-process mock
    Extract,
    /// JSON-RPC error object with this message
    RpcError(String),
    /// `{"result": {}}`
    EmptyResult,
    /// Bare HTTP status with no body
    Status(u16),
    /// HTTP 200 with a body that is not JSON
    MalformedBody,
    /// Sleep, then extract
    Delay(Duration),
}

#[derive(Clone)]
struct ServerState {
    behavior: ServerBehavior,
    requests: Arc<AtomicUsize>,
}

/// Mock analyzer server for testing and development
pub struct MockAnalyzerServer {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockAnalyzerServer {
    /// Start an extracting server on an available port
    pub async fn start() -> Self {
        Self::start_with(ServerBehavior::Extract).await
    }

    /// Start a server with a fixed behavior
    pub async fn start_with(behavior: ServerBehavior) -> Self {
        let requests = Arc::new(AtomicUsize::new(0));
        let state = ServerState {
            behavior,
            requests: requests.clone(),
        };
        let app = Router::new()
            .route("/rpc", post(handle_rpc))
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

    /// Get the JSON-RPC endpoint URL
    pub fn rpc_url(&self) -> String {
        format!("{}/rpc", self.url())
    }

    /// Number of requests received so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockAnalyzerServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_rpc(
    State(state): State<ServerState>,
    Json(request): Json<Value>,
) -> impl IntoResponse {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return rpc_error(id, -32600, "Invalid JSON-RPC version").into_response();
    }
    if request.get("method").and_then(Value::as_str) != Some("analyze_receipt") {
        return rpc_error(id, -32601, "Method not found").into_response();
    }
    let params: AnalysisRequest = match request
        .get("params")
        .cloned()
        .map(serde_json::from_value)
    {
        Some(Ok(params)) => params,
        _ => return rpc_error(id, -32602, "Invalid params").into_response(),
    };

    match state.behavior {
        ServerBehavior::Extract => {
            Json(json!({"jsonrpc": "2.0", "id": id, "result": mock_extraction(&params)}))
                .into_response()
        }
        ServerBehavior::Delay(delay) => {
            tokio::time::sleep(delay).await;
            Json(json!({"jsonrpc": "2.0", "id": id, "result": mock_extraction(&params)}))
                .into_response()
        }
        ServerBehavior::RpcError(message) => rpc_error(id, -32000, &message).into_response(),
        ServerBehavior::EmptyResult => {
            Json(json!({"jsonrpc": "2.0", "id": id, "result": {}})).into_response()
        }
        ServerBehavior::MalformedBody => (StatusCode::OK, "<html>upstream</html>").into_response(),
        ServerBehavior::Status(status) => StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

fn rpc_error(id: Value, code: i64, message: &str) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    }))
}
