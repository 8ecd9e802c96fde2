//! Classifies a decoded [`Frame`](crate::frame::Frame) payload into a typed upstream event.
//!
//! The upstream payload is a loosely-typed JSON object; classification is by field presence,
//! not by a schema, mirroring how the wire protocol actually behaves in practice.

use serde_json::Value;

use crate::frame::Frame;

/// A tool name that is silently dropped wherever it appears (case-insensitive).
fn is_dropped_tool_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "web_search" || lower == "websearch"
}

/// One classified upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    TextDelta {
        content: String,
    },
    ToolUseStart {
        tool_use_id: String,
        name: String,
        /// Present when the start event carried an input fragment alongside the name.
        input_fragment: Option<ToolInputFragment>,
    },
    ToolUseDelta {
        tool_use_id: String,
        input_fragment: ToolInputFragment,
    },
    ToolUseStop {
        tool_use_id: String,
    },
    Exception {
        exception_type: String,
    },
    Metadata {
        conversation_id: Option<String>,
    },
    Unknown,
}

/// A tool-use input fragment: either a raw JSON-fragment string to be concatenated, or a
/// complete object that replaces anything accumulated so far.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInputFragment {
    Partial(String),
    Complete(Value),
}

/// Parses a frame's payload into a typed [`UpstreamEvent`].
///
/// Non-JSON payloads are classified as [`UpstreamEvent::Unknown`] rather than erroring; the
/// caller is expected to log the parse failure at debug level.
pub fn interpret(frame: &Frame) -> UpstreamEvent {
    log::trace!("decoded frame: event-type={} payload_len={}", frame.event_type(), frame.payload.len());

    let payload = match serde_json::from_slice::<Value>(&frame.payload) {
        Ok(payload) => payload,
        Err(err) => {
            log::debug!("non-JSON upstream payload ignored: {err}");
            return UpstreamEvent::Unknown;
        }
    };

    if let Some(exception_type) = exception_type(frame, &payload) {
        return UpstreamEvent::Exception { exception_type };
    }

    // Some upstream responses wrap the actual event in an `assistantResponseEvent` subobject.
    let event = payload.get("assistantResponseEvent").unwrap_or(&payload);

    classify(event)
}

fn exception_type(frame: &Frame, payload: &Value) -> Option<String> {
    if let Some(exception_type) = frame.exception_type() {
        return Some(exception_type.to_string());
    }

    if let Some(t) = payload.get("exception_type").and_then(Value::as_str) {
        return Some(t.to_string());
    }

    if let Some(t) = payload.get("__type").and_then(Value::as_str) {
        return Some(t.to_string());
    }

    None
}

fn classify(event: &Value) -> UpstreamEvent {
    let tool_use_id = event.get("toolUseId").and_then(Value::as_str);
    let name = event.get("name").and_then(Value::as_str);
    let stop = event.get("stop").and_then(Value::as_bool).unwrap_or(false);
    let input = event.get("input");

    if let Some(content) = event.get("content").and_then(Value::as_str) {
        return UpstreamEvent::TextDelta {
            content: content.to_string(),
        };
    }

    if let Some(tool_use_id) = tool_use_id {
        if let Some(name) = name {
            if is_dropped_tool_name(name) {
                return UpstreamEvent::Unknown;
            }

            return UpstreamEvent::ToolUseStart {
                tool_use_id: tool_use_id.to_string(),
                name: name.to_string(),
                input_fragment: input.map(to_fragment),
            };
        }

        if stop {
            return UpstreamEvent::ToolUseStop {
                tool_use_id: tool_use_id.to_string(),
            };
        }

        if let Some(input) = input {
            return UpstreamEvent::ToolUseDelta {
                tool_use_id: tool_use_id.to_string(),
                input_fragment: to_fragment(input),
            };
        }
    }

    if let Some(conversation_id) = event.get("conversationId").and_then(Value::as_str) {
        return UpstreamEvent::Metadata {
            conversation_id: Some(conversation_id.to_string()),
        };
    }

    UpstreamEvent::Unknown
}

fn to_fragment(value: &Value) -> ToolInputFragment {
    match value {
        Value::String(s) => ToolInputFragment::Partial(s.clone()),
        other => ToolInputFragment::Complete(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;

    use super::*;

    fn frame_with_payload(payload: &str) -> Frame {
        Frame {
            headers: HashMap::new(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    #[test]
    fn classifies_text_delta() {
        let frame = frame_with_payload(r#"{"content":"hello"}"#);
        assert_eq!(
            interpret(&frame),
            UpstreamEvent::TextDelta {
                content: "hello".to_string()
            }
        );
    }

    #[test]
    fn classifies_tool_use_start_with_fused_input() {
        let frame = frame_with_payload(r#"{"toolUseId":"t1","name":"get_weather","input":"{\"loc"}"#);
        match interpret(&frame) {
            UpstreamEvent::ToolUseStart {
                tool_use_id,
                name,
                input_fragment,
            } => {
                assert_eq!(tool_use_id, "t1");
                assert_eq!(name, "get_weather");
                assert_eq!(input_fragment, Some(ToolInputFragment::Partial("{\"loc".to_string())));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn drops_web_search_tool() {
        let frame = frame_with_payload(r#"{"toolUseId":"t1","name":"web_search"}"#);
        assert_eq!(interpret(&frame), UpstreamEvent::Unknown);
    }

    #[test]
    fn classifies_tool_use_delta() {
        let frame = frame_with_payload(r#"{"toolUseId":"t1","input":"ation\":\"NYC\"}"}"#);
        assert_eq!(
            interpret(&frame),
            UpstreamEvent::ToolUseDelta {
                tool_use_id: "t1".to_string(),
                input_fragment: ToolInputFragment::Partial("ation\":\"NYC\"}".to_string())
            }
        );
    }

    #[test]
    fn classifies_tool_use_stop() {
        let frame = frame_with_payload(r#"{"toolUseId":"t1","stop":true}"#);
        assert_eq!(
            interpret(&frame),
            UpstreamEvent::ToolUseStop {
                tool_use_id: "t1".to_string()
            }
        );
    }

    #[test]
    fn classifies_exception() {
        let frame = frame_with_payload(r#"{"exception_type":"ContentLengthExceededException"}"#);
        assert_eq!(
            interpret(&frame),
            UpstreamEvent::Exception {
                exception_type: "ContentLengthExceededException".to_string()
            }
        );
    }

    #[test]
    fn unwraps_assistant_response_event() {
        let frame = frame_with_payload(r#"{"assistantResponseEvent":{"content":"wrapped"}}"#);
        assert_eq!(
            interpret(&frame),
            UpstreamEvent::TextDelta {
                content: "wrapped".to_string()
            }
        );
    }

    #[test]
    fn non_json_payload_is_unknown() {
        let frame = frame_with_payload("not json");
        assert_eq!(interpret(&frame), UpstreamEvent::Unknown);
    }

    #[test]
    fn metadata_only_payload() {
        let frame = frame_with_payload(r#"{"conversationId":"conv-1"}"#);
        assert_eq!(
            interpret(&frame),
            UpstreamEvent::Metadata {
                conversation_id: Some("conv-1".to_string())
            }
        );
    }
}
