//! Resolves the final Anthropic `stop_reason` (and its OpenAI `finish_reason` projection)
//! from the signals observed over the lifetime of one stream.

/// Signals accumulated while driving the SSE state machine, consulted once at stream end.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopSignals {
    pub exception_kind: Option<ExceptionKind>,
    pub has_active_tools: bool,
    pub has_completed_tools: bool,
}

/// The coarse exception classification that determines whether an exception maps to
/// `max_tokens` or to a generic `error` stop reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    ContentLengthExceeded,
    Other,
}

impl ExceptionKind {
    pub fn classify(exception_type: &str) -> Self {
        if exception_type.contains("ContentLengthExceeds") || exception_type.contains("ContentLengthExceeded") {
            ExceptionKind::ContentLengthExceeded
        } else {
            ExceptionKind::Other
        }
    }
}

/// The Anthropic `stop_reason` values this resolver can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnthropicStopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Error,
}

impl AnthropicStopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AnthropicStopReason::EndTurn => "end_turn",
            AnthropicStopReason::ToolUse => "tool_use",
            AnthropicStopReason::MaxTokens => "max_tokens",
            AnthropicStopReason::Error => "error",
        }
    }

    /// Projects this Anthropic stop reason onto the OpenAI `finish_reason` vocabulary.
    pub fn to_openai_finish_reason(self) -> &'static str {
        match self {
            AnthropicStopReason::EndTurn => "stop",
            AnthropicStopReason::ToolUse => "tool_calls",
            AnthropicStopReason::MaxTokens => "length",
            AnthropicStopReason::Error => "stop",
        }
    }
}

/// Resolves the stop reason from the accumulated signals.
///
/// Resolution order: exception beats tool-use (exception wins when both an exception and
/// completed tool calls were observed, since the client's correctness depends on the
/// truncation signal surfacing), then completed tools, then still-active tools, then a plain
/// end of turn.
pub fn resolve(signals: StopSignals) -> AnthropicStopReason {
    if let Some(kind) = signals.exception_kind {
        return match kind {
            ExceptionKind::ContentLengthExceeded => AnthropicStopReason::MaxTokens,
            ExceptionKind::Other => AnthropicStopReason::Error,
        };
    }

    if signals.has_completed_tools || signals.has_active_tools {
        return AnthropicStopReason::ToolUse;
    }

    AnthropicStopReason::EndTurn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_end_turn() {
        let resolved = resolve(StopSignals::default());
        assert_eq!(resolved, AnthropicStopReason::EndTurn);
    }

    #[test]
    fn completed_tools_yield_tool_use() {
        let signals = StopSignals {
            has_completed_tools: true,
            ..Default::default()
        };
        assert_eq!(resolve(signals), AnthropicStopReason::ToolUse);
    }

    #[test]
    fn active_tools_yield_tool_use() {
        let signals = StopSignals {
            has_active_tools: true,
            ..Default::default()
        };
        assert_eq!(resolve(signals), AnthropicStopReason::ToolUse);
    }

    #[test]
    fn exception_wins_over_completed_tools() {
        let signals = StopSignals {
            exception_kind: Some(ExceptionKind::Other),
            has_completed_tools: true,
            ..Default::default()
        };
        assert_eq!(resolve(signals), AnthropicStopReason::Error);
    }

    #[test]
    fn content_length_exceeded_maps_to_max_tokens() {
        let kind = ExceptionKind::classify("ContentLengthExceededException");
        let signals = StopSignals {
            exception_kind: Some(kind),
            ..Default::default()
        };
        assert_eq!(resolve(signals), AnthropicStopReason::MaxTokens);
    }

    #[test]
    fn openai_projection() {
        assert_eq!(AnthropicStopReason::ToolUse.to_openai_finish_reason(), "tool_calls");
        assert_eq!(AnthropicStopReason::MaxTokens.to_openai_finish_reason(), "length");
        assert_eq!(AnthropicStopReason::EndTurn.to_openai_finish_reason(), "stop");
    }
}
