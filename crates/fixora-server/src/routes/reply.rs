use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use fixora::{
    models::{
        event::StreamEvent,
        message::{Conversation, Message},
    },
    relay::Relay,
};
use futures::{stream::StreamExt, Stream};
use serde::Deserialize;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    messages: Vec<Message>,
    #[serde(default)]
    connections: Vec<ConnectionRef>,
    #[serde(default = "default_stream")]
    stream: bool,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionRef {
    id: Uuid,
}

fn default_stream() -> bool {
    true
}

/// Server-sent events carrying one `StreamEvent` per frame
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = axum::body::Body::from_stream(self);
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

fn format_event(event: &StreamEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(e) => {
            tracing::error!("failed to encode stream event: {}", e);
            String::new()
        }
    }
}

async fn prepare(state: &AppState, request: ChatRequest) -> ApiResult<(Relay, Conversation)> {
    let conversation = Conversation::from_messages(&state.settings.system_prompt, request.messages)?;
    let provider = state
        .provider(request.provider.as_deref(), request.model)
        .await?;

    let mut connections = Vec::with_capacity(request.connections.len());
    for reference in &request.connections {
        match state.connections.get_by_id(reference.id).await {
            Some(connection) => connections.push(connection),
            None => tracing::warn!(connection = %reference.id, "ignoring unknown connection"),
        }
    }
    let tools = state
        .tools
        .from_connections(&connections, state.codec.as_ref());

    let relay = Relay::new(provider, tools, state.settings.relay.relay_config());
    Ok((relay, conversation))
}

async fn handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Response> {
    let stream = request.stream;
    let (relay, conversation) = prepare(&state, request).await?;

    if !stream {
        let reply = relay
            .complete(conversation, CancellationToken::new())
            .await?
            .ok_or_else(|| ApiError::Internal("run ended without a reply".to_string()))?;
        return Ok(Json(reply).into_response());
    }

    let (tx, rx) = mpsc::channel(100);
    let cancel = CancellationToken::new();

    tokio::spawn(async move {
        let mut events = relay.run(conversation, cancel.clone());
        loop {
            tokio::select! {
                // client went away
                _ = tx.closed() => {
                    tracing::info!("client disconnected, cancelling run");
                    cancel.cancel();
                    break;
                }
                event = events.next() => {
                    let Some(event) = event else {
                        break;
                    };
                    if tx.send(format_event(&event)).await.is_err() {
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    });

    Ok(SseResponse::new(ReceiverStream::new(rx)).into_response())
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handler))
        .with_state(state)
}
