//! Chat handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Json,
};
use futures_util::stream::{self, Stream};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{AppError, AppState};
use recibo_core::models::Message;
use recibo_core::{ChatEvent, ChatInput, ChatResponse, UploadedFile};

const DEFAULT_FILENAME: &str = "attachment.bin";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Buffered events between the pipeline task and the SSE response
const STREAM_BUFFER: usize = 32;

/// Read a chat turn from a multipart form
///
/// Fields: `conversation_id` (optional), `message` (optional), `file`
/// (optional). Unknown fields are ignored.
async fn read_chat_form(mut multipart: Multipart) -> Result<ChatInput, AppError> {
    let mut input = ChatInput::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(&format!("Failed to read form field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "conversation_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read conversation_id"))?;
                let value = value.trim();
                if !value.is_empty() {
                    input.conversation_id = Some(value.to_string());
                }
            }
            "message" => {
                input.text = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read message"))?;
            }
            "file" => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or(DEFAULT_FILENAME)
                    .to_string();
                let mime_type = field
                    .content_type()
                    .filter(|m| !m.is_empty())
                    .unwrap_or(DEFAULT_MIME_TYPE)
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read file data"))?;

                input.file = Some(UploadedFile {
                    filename,
                    mime_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    Ok(input)
}

/// POST /api/v1/chat/message - Process a chat turn
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ChatResponse>, AppError> {
    let input = read_chat_form(multipart).await?;
    let response = state.orchestrator.process_message(input).await?;
    Ok(Json(response))
}

/// POST /api/v1/chat/message/stream - Process a chat turn as server-sent events
///
/// Emits `start`, then `delta` chunks of the assistant text, then `final`
/// with the full reply, or `error`.
pub async fn send_message_stream(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let input = read_chat_form(multipart).await?;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.process_message_streaming(input, tx).await;
    });

    let headers = [
        (header::CACHE_CONTROL, "no-cache"),
        (header::HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    Ok((headers, Sse::new(event_stream(rx))))
}

fn event_stream(
    rx: mpsc::Receiver<ChatEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse(event)), rx))
    })
}

fn to_sse(event: ChatEvent) -> Event {
    match event {
        ChatEvent::Start => Event::default()
            .event("start")
            .data(json!({"status": "processing"}).to_string()),
        ChatEvent::Delta(content) => Event::default()
            .event("delta")
            .data(json!({ "content": content }).to_string()),
        ChatEvent::Final(response) => {
            let data = serde_json::to_string(&response).unwrap_or_else(|e| {
                json!({"message": format!("Failed to encode reply: {}", e)}).to_string()
            });
            Event::default().event("final").data(data)
        }
        ChatEvent::Failed(err) => {
            let err = AppError::from(err);
            err.log();
            debug!(status = %err.status(), "Streaming reply failed");
            Event::default().event("error").data(err.body().to_string())
        }
    }
}

/// GET /api/v1/chat/conversations/:id/messages - Conversation history
pub async fn list_conversation_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, AppError> {
    let messages = state.orchestrator.list_messages(&id)?;
    Ok(Json(messages))
}
