//! OpenAI Chat Completions wire protocol: chunk/response types and the streaming projector
//! (§4.G), which re-projects the same upstream events the Anthropic emitter consumes.

pub mod projector;
pub mod response;
pub mod types;
