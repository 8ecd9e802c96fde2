//! Builds the non-streaming `chat.completion` response body from a drained upstream stream
//! (§4.J plus stop-reason resolution, projected onto the OpenAI shape).

use crate::collector::CollectedResponse;
use crate::openai::types::{ChatCompletionResponse, FunctionCall, MessageChoice, ResponseMessage, ToolCall, UsageInner};
use crate::stop_reason::{self, StopSignals};
use crate::tokens;

/// Assembles the OpenAI non-streaming response body from a collected upstream response.
pub fn build(
    id: String,
    model: String,
    prompt_tokens: u32,
    collected: CollectedResponse,
    mut signals: StopSignals,
) -> ChatCompletionResponse {
    signals.has_completed_tools = signals.has_completed_tools || !collected.tool_uses.is_empty();

    let finish_reason = stop_reason::resolve(signals).to_openai_finish_reason();

    let mut completion_tokens = 0u32;
    let content = if collected.text.is_empty() {
        None
    } else {
        completion_tokens += tokens::text_tokens(&collected.text);
        Some(collected.text)
    };

    let tool_calls = collected
        .tool_uses
        .into_iter()
        .map(|tool_use| {
            completion_tokens += tokens::tool_use_start_tokens(&tool_use.name) + tokens::text_tokens(&tool_use.input.to_string());
            ToolCall {
                id: tool_use.id,
                kind: "function",
                function: FunctionCall {
                    name: tool_use.name,
                    arguments: tool_use.input.to_string(),
                },
            }
        })
        .collect::<Vec<_>>();

    let any_content_emitted = content.is_some() || !tool_calls.is_empty();
    completion_tokens = tokens::floor_output_tokens(completion_tokens, any_content_emitted);

    ChatCompletionResponse {
        id,
        object: "chat.completion",
        model,
        choices: vec![MessageChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant",
                content,
                tool_calls,
            },
            finish_reason,
        }],
        usage: UsageInner {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    }
}
