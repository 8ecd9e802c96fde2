//! Bridges the upstream binary EventStream protocol to the Anthropic Messages and OpenAI Chat
//! Completions HTTP surfaces.

pub mod anthropic;
mod collector;
mod credentials;
mod error;
mod event;
mod frame;
mod handlers;
mod openai;
mod request;
mod sse_state;
mod state;
mod stop_reason;
mod tokens;
mod upstream;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

pub use error::{AsAnthropicError, AsOpenAiError, GatewayError};
pub use state::GatewayState;

/// Builds the router serving `/v1/messages`, `/v1/chat/completions`, `/v1/messages/count_tokens`
/// and `/v1/models`, all backed by the given shared state.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/v1/messages", post(handlers::anthropic_messages))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/messages/count_tokens", post(handlers::count_tokens))
        .route("/v1/models", get(handlers::list_models))
        .with_state(state)
}
