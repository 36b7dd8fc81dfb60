use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

use crate::models::{ChatRequest, ChatStreamChunk};
use crate::services::Orchestrator;
use crate::utils::error::ApiError;

/// `POST /api/chat`: JSON by default, SSE when `stream` is set.
pub async fn chat_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    info!(
        "Chat request: user={}, session={:?}, question_len={}, stream={}",
        request.user_id,
        request.session_id,
        request.question.chars().count(),
        request.stream
    );

    if request.stream {
        let frames = orchestrator.handle_message_stream(request).await?;
        return Ok(sse_from(frames).into_response());
    }

    let response = orchestrator.handle_message(request).await?;
    Ok(Json(response).into_response())
}

/// `POST /api/chat/stream`: always SSE.
pub async fn chat_stream_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    info!(
        "Streaming chat request: user={}, session={:?}",
        request.user_id, request.session_id
    );
    let frames = orchestrator.handle_message_stream(request).await?;
    Ok(sse_from(frames))
}

fn sse_from(
    mut frames: BoxStream<'static, ChatStreamChunk>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(frame) = frames.next().await {
            yield Ok(create_sse_event(&frame));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// Helper: Create SSE event
fn create_sse_event(chunk: &ChatStreamChunk) -> Event {
    Event::default()
        .event(chunk.event())
        .data(serde_json::to_string(chunk).unwrap_or_else(|_| "{}".to_string()))
}
