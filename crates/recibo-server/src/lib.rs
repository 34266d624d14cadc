//! Recibo Web Server
//!
//! Axum-based REST API for the Recibo receipt assistant:
//! - Chat turns with optional receipt upload (JSON reply or SSE stream)
//! - Conversation history
//! - Receipt listing, lookup and manual correction
//! - Spending insights
//!
//! Error responses share one envelope, `{"error": {"code", "message", ...}}`.
//! Internal failures are logged with a correlation id and never leak detail.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use recibo_core::{Config, Database, Insights, Orchestrator};

mod handlers;

/// Headroom on top of the upload limit for the multipart envelope and text
/// fields
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Server configuration
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    pub fn from_core(config: &Config) -> Self {
        Self {
            allowed_origins: config.cors_origins.clone(),
            max_upload_bytes: config.uploads.max_bytes,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub orchestrator: Orchestrator,
    pub insights: Insights,
}

/// Create the application router
pub fn create_router(orchestrator: Orchestrator, config: ServerConfig) -> Router {
    let db = orchestrator.db().clone();
    let state = Arc::new(AppState {
        insights: Insights::new(db.clone()),
        db,
        orchestrator,
    });

    let api_routes = Router::new()
        // Chat
        .route("/chat/message", post(handlers::send_message))
        .route("/chat/message/stream", post(handlers::send_message_stream))
        .route(
            "/chat/conversations/:id/messages",
            get(handlers::list_conversation_messages),
        )
        // Receipts
        .route("/receipts", get(handlers::list_receipts))
        .route(
            "/receipts/:id",
            get(handlers::get_receipt).patch(handlers::patch_receipt),
        )
        // Insights
        .route("/insights/summary", get(handlers::get_summary))
        .route("/insights/vendors", get(handlers::get_top_vendors))
        .route("/insights/trend", get(handlers::get_trend))
        .route("/insights/anomalies", get(handlers::get_anomalies));

    let methods = [Method::GET, Method::POST, Method::PATCH, Method::OPTIONS];
    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE])
    };

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(
            config.max_upload_bytes + MULTIPART_OVERHEAD,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Start the server
pub async fn serve(db: Database, config: &Config, host: &str, port: u16) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(db, config)?;
    info!(
        analyzer = ?config.analyzer.backend,
        url = %config.analyzer.url,
        upload_dir = %config.upload_dir.display(),
        "Receipt pipeline ready"
    );

    let app = create_router(orchestrator, ServerConfig::from_core(config));
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    /// Machine code of a rejected input (`file_too_large`, ...)
    reason: Option<&'static str>,
    internal: Option<anyhow::Error>,
    error_id: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: &str) -> Self {
        Self {
            status,
            code,
            message: message.to_string(),
            reason: None,
            internal: None,
            error_id: None,
        }
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "http_error", msg)
    }

    pub fn not_found(msg: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "http_error", msg)
    }

    /// Rejected request parameters
    pub fn validation(msg: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "request_validation_error", msg)
    }

    fn internal(err: anyhow::Error) -> Self {
        Self {
            // Return generic message to client
            message: "Unexpected server error".to_string(),
            // Keep full error for logging
            internal: Some(err),
            error_id: Some(Uuid::new_v4().to_string()),
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "")
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The `error` object of the response envelope
    pub fn body(&self) -> Value {
        let mut body = json!({
            "code": self.code,
            "message": self.message,
            "status_code": self.status.as_u16(),
        });
        if let Some(reason) = self.reason {
            body["reason"] = json!(reason);
        }
        if let Some(error_id) = &self.error_id {
            body["error_id"] = json!(error_id);
            body["detail"] = json!("See server logs with error_id");
        }
        body
    }

    /// Log the underlying failure, if this is an internal error
    pub fn log(&self) {
        if let Some(err) = &self.internal {
            error!(
                error_id = self.error_id.as_deref().unwrap_or_default(),
                error = %err,
                "Internal error"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        (self.status, Json(json!({ "error": self.body() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        match err.downcast::<recibo_core::Error>() {
            Ok(recibo_core::Error::InvalidInput { code, message }) => {
                let status = if code == "file_too_large" {
                    StatusCode::PAYLOAD_TOO_LARGE
                } else {
                    StatusCode::BAD_REQUEST
                };
                Self {
                    reason: Some(code),
                    ..Self::new(status, "http_error", &message)
                }
            }
            Ok(recibo_core::Error::NotFound(what)) => Self::not_found(&what),
            Ok(other) => Self::internal(other.into()),
            Err(err) => Self::internal(err),
        }
    }
}
