//! Axum request handlers for the four client-facing endpoints.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::{Stream, StreamExt, stream};
use serde::Serialize;
use uuid::Uuid;

use crate::anthropic::emitter::AnthropicEventStream;
use crate::collector;
use crate::error::{AsAnthropicError, AsOpenAiError, GatewayError};
use crate::openai::projector::OpenAiChunkStream;
use crate::openai::types::StreamItem;
use crate::request::{self, AnthropicRequest, CountTokensRequest, OpenAiRequest};
use crate::state::{GatewayState, MAX_FRAME_ERRORS};

/// `POST /v1/messages`.
pub async fn anthropic_messages(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<AnthropicRequest>,
) -> axum::response::Response {
    let upstream_request = request::anthropic_to_upstream(&request);
    let input_tokens = request::estimate_input_tokens(&upstream_request);
    let stream = request.stream;

    let credential = match state.pool().select().await {
        Ok(credential) => credential,
        Err(err) => return AsAnthropicError(err).into_response(),
    };

    let byte_stream = match state.upstream().send(&upstream_request, &credential.access_token).await {
        Ok(byte_stream) => byte_stream,
        Err(err) if stream => return anthropic_error_sse(err),
        Err(err) => return AsAnthropicError(err).into_response(),
    };

    let message_id = format!("msg_{}", Uuid::new_v4().simple());

    if stream {
        let event_stream = AnthropicEventStream::new(byte_stream, MAX_FRAME_ERRORS, message_id, upstream_request.model, input_tokens);

        Sse::new(anthropic_sse_events(event_stream)).into_response()
    } else {
        match collector::collect(byte_stream, MAX_FRAME_ERRORS).await {
            Ok((collected, signals)) => {
                let response = crate::anthropic::response::build(message_id, upstream_request.model, input_tokens, collected, signals);
                Json(response).into_response()
            }
            Err(err) => AsAnthropicError(err).into_response(),
        }
    }
}

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<OpenAiRequest>,
) -> axum::response::Response {
    let upstream_request = request::openai_to_upstream(&request);
    let prompt_tokens = request::estimate_input_tokens(&upstream_request);
    let stream = request.stream;

    let credential = match state.pool().select().await {
        Ok(credential) => credential,
        Err(err) => return AsOpenAiError(err).into_response(),
    };

    let byte_stream = match state.upstream().send(&upstream_request, &credential.access_token).await {
        Ok(byte_stream) => byte_stream,
        Err(err) if stream => return openai_error_sse(err),
        Err(err) => return AsOpenAiError(err).into_response(),
    };

    let id = format!("chatcmpl-{}", Uuid::new_v4().simple());

    if stream {
        let chunk_stream = OpenAiChunkStream::new(byte_stream, MAX_FRAME_ERRORS, id, upstream_request.model);

        Sse::new(openai_sse_events(chunk_stream)).into_response()
    } else {
        match collector::collect(byte_stream, MAX_FRAME_ERRORS).await {
            Ok((collected, signals)) => {
                let response = crate::openai::response::build(id, upstream_request.model, prompt_tokens, collected, signals);
                Json(response).into_response()
            }
            Err(err) => AsOpenAiError(err).into_response(),
        }
    }
}

#[derive(Serialize)]
struct CountTokensResponse {
    input_tokens: u32,
}

/// `POST /v1/messages/count_tokens`.
pub async fn count_tokens(Json(request): Json<CountTokensRequest>) -> Json<CountTokensResponse> {
    let upstream_request = request::count_tokens_to_upstream(&request);
    let input_tokens = request::estimate_input_tokens(&upstream_request);
    Json(CountTokensResponse { input_tokens })
}

#[derive(Serialize)]
struct ModelsResponse {
    object: &'static str,
    data: Vec<ModelEntry>,
}

#[derive(Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
    owned_by: &'static str,
}

/// `GET /v1/models`.
pub async fn list_models(State(state): State<Arc<GatewayState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        object: "list",
        data: vec![ModelEntry {
            id: state.model_id().to_string(),
            object: "model",
            owned_by: "upstream",
        }],
    })
}

/// Renders an upstream `UpstreamNon2xx` (or any other pre-stream) failure as the single Anthropic
/// `error` SSE record the streaming contract calls for (§4.F.5, §7): no `message_start` is ever
/// emitted since the upstream call never produced a body to stream.
fn anthropic_error_sse(err: GatewayError) -> axum::response::Response {
    use crate::anthropic::types::{AnthropicStreamEvent, ErrorInner};

    let event = AnthropicStreamEvent::Error {
        error: ErrorInner {
            kind: "api_error",
            message: err.to_string(),
        },
    };
    let name = event.event_name();
    let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    let single = stream::once(async move { Ok::<_, Infallible>(Event::default().event(name).data(json)) });
    Sse::new(single).into_response()
}

/// OpenAI's equivalent of [`anthropic_error_sse`]: a single error-shaped SSE data record, with
/// no role-announcing chunk and no `[DONE]` sentinel, since nothing was ever generated.
fn openai_error_sse(err: GatewayError) -> axum::response::Response {
    #[derive(Serialize)]
    struct ErrorBody {
        error: ErrorDetails,
    }
    #[derive(Serialize)]
    struct ErrorDetails {
        message: String,
        #[serde(rename = "type")]
        kind: &'static str,
    }

    let body = ErrorBody {
        error: ErrorDetails {
            message: err.to_string(),
            kind: "api_error",
        },
    };
    let json = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
    let single = stream::once(async move { Ok::<_, Infallible>(Event::default().data(json)) });
    Sse::new(single).into_response()
}

fn anthropic_sse_events(stream: AnthropicEventStream) -> impl Stream<Item = Result<Event, Infallible>> {
    stream.map(|event| {
        let name = event.event_name();
        let json = serde_json::to_string(&event).unwrap_or_else(|err| {
            log::error!("failed to serialize Anthropic SSE event: {err}");
            r#"{"type":"error","error":{"type":"api_error","message":"serialization failed"}}"#.to_string()
        });
        Ok(Event::default().event(name).data(json))
    })
}

fn openai_sse_events(stream: OpenAiChunkStream) -> impl Stream<Item = Result<Event, Infallible>> {
    stream.map(|item| match item {
        StreamItem::Chunk(chunk) => {
            let json = serde_json::to_string(&chunk).unwrap_or_else(|err| {
                log::error!("failed to serialize chat completion chunk: {err}");
                "{}".to_string()
            });
            Ok(Event::default().data(json))
        }
        StreamItem::Done => Ok(Event::default().data("[DONE]")),
    })
}
