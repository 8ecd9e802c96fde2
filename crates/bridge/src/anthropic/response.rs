//! Builds the non-streaming Anthropic Messages response body from a drained upstream stream
//! (§4.J plus stop-reason resolution).

use crate::anthropic::types::{AnthropicMessageResponse, ContentBlock, UsageInner};
use crate::collector::CollectedResponse;
use crate::stop_reason::{self, StopSignals};
use crate::tokens;

/// Assembles the Anthropic non-streaming response body from a collected upstream response.
pub fn build(
    message_id: String,
    model: String,
    input_tokens: u32,
    collected: CollectedResponse,
    mut signals: StopSignals,
) -> AnthropicMessageResponse {
    signals.has_completed_tools = signals.has_completed_tools || !collected.tool_uses.is_empty();

    let stop_reason = stop_reason::resolve(signals);

    let mut output_tokens = 0u32;
    let mut content = Vec::new();

    if !collected.text.is_empty() {
        output_tokens += tokens::text_tokens(&collected.text);
        content.push(ContentBlock::Text { text: collected.text });
    }

    for tool_use in collected.tool_uses {
        output_tokens += tokens::tool_use_start_tokens(&tool_use.name) + tokens::text_tokens(&tool_use.input.to_string());
        content.push(ContentBlock::ToolUse {
            id: tool_use.id,
            name: tool_use.name,
            input: tool_use.input,
        });
    }

    let any_content_emitted = !content.is_empty();

    AnthropicMessageResponse {
        id: message_id,
        kind: "message",
        role: "assistant",
        content,
        model,
        stop_reason: stop_reason.as_str(),
        stop_sequence: None,
        usage: UsageInner {
            input_tokens,
            output_tokens: tokens::floor_output_tokens(output_tokens, any_content_emitted),
        },
    }
}
