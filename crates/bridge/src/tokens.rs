//! Coarse token accounting. This is deliberately not a real tokenizer: it produces
//! deterministic, monotonic estimates for client-visible `usage` fields and for
//! `/v1/messages/count_tokens`, using a length/4 heuristic with structural surcharges.

/// `ceil(len_chars / 4)`, the base text-token heuristic.
pub fn text_tokens(text: &str) -> u32 {
    let len = text.chars().count() as u32;
    len.div_ceil(4)
}

/// Structural surcharge plus the tool name's text tokens, charged once when a tool-use block
/// is opened.
pub fn tool_use_start_tokens(name: &str) -> u32 {
    12 + text_tokens(name)
}

/// Tokens for one tool-use input JSON fragment, charged per delta as it streams in.
pub fn tool_input_fragment_tokens(fragment: &str) -> u32 {
    text_tokens(fragment)
}

/// Tokens for a tool result block on the request side: structural surcharge plus the text
/// tokens of its inner content.
pub fn tool_result_tokens(content: &str) -> u32 {
    10 + text_tokens(content)
}

/// Tokens for a tool definition on the request side.
pub fn tool_definition_tokens(name: &str, description: &str, json_schema: &str) -> u32 {
    20 + text_tokens(name) + text_tokens(description) + text_tokens(json_schema)
}

/// Structural surcharge per message, charged in addition to its content tokens.
pub const MESSAGE_STRUCTURAL_TOKENS: u32 = 4;

/// Applies the output-token floor: at least 1 whenever any content was produced.
pub fn floor_output_tokens(counted: u32, any_content_emitted: bool) -> u32 {
    if any_content_emitted { counted.max(1) } else { counted }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_tokens_rounds_up() {
        assert_eq!(text_tokens(""), 0);
        assert_eq!(text_tokens("a"), 1);
        assert_eq!(text_tokens("abcd"), 1);
        assert_eq!(text_tokens("abcde"), 2);
    }

    #[test]
    fn tool_use_start_adds_structural_surcharge() {
        assert_eq!(tool_use_start_tokens("get_weather"), 12 + text_tokens("get_weather"));
    }

    #[test]
    fn floor_applies_only_when_content_emitted() {
        assert_eq!(floor_output_tokens(0, true), 1);
        assert_eq!(floor_output_tokens(0, false), 0);
        assert_eq!(floor_output_tokens(5, true), 5);
    }
}
