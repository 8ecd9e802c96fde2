//! Drains a complete upstream byte stream into a single non-streaming response body:
//! concatenated text plus reassembled tool-use inputs.

use std::collections::HashMap;

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use serde_json::Value;

use crate::error::GatewayError;
use crate::event::{self, ToolInputFragment, UpstreamEvent};
use crate::frame::FrameDecoder;
use crate::stop_reason::{ExceptionKind, StopSignals};

/// One fully reassembled tool use.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The result of draining a complete (non-streaming) upstream response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedResponse {
    pub text: String,
    pub tool_uses: Vec<CollectedToolUse>,
}

struct PendingToolUse {
    name: String,
    input: Option<Value>,
    buffer: String,
}

/// Drains `stream` to completion, decoding frames and accumulating content. Returns the
/// collected response plus the stop signals observed, for the caller to resolve the final
/// stop reason via [`crate::stop_reason::resolve`].
pub async fn collect<S>(mut stream: S, max_frame_errors: usize) -> Result<(CollectedResponse, StopSignals), GatewayError>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    let mut decoder = FrameDecoder::new(max_frame_errors);
    let mut text = String::new();
    let mut tool_uses: HashMap<String, PendingToolUse> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut signals = StopSignals::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(GatewayError::UpstreamTransport)?;
        decoder.feed(&chunk);

        for frame in decoder.drain_frames()? {
            match event::interpret(&frame) {
                UpstreamEvent::TextDelta { content } => text.push_str(&content),
                UpstreamEvent::ToolUseStart {
                    tool_use_id,
                    name,
                    input_fragment,
                } => {
                    order.push(tool_use_id.clone());
                    let mut pending = PendingToolUse {
                        name,
                        input: None,
                        buffer: String::new(),
                    };
                    apply_fragment(&mut pending, input_fragment);
                    tool_uses.insert(tool_use_id, pending);
                }
                UpstreamEvent::ToolUseDelta {
                    tool_use_id,
                    input_fragment,
                } => {
                    if let Some(pending) = tool_uses.get_mut(&tool_use_id) {
                        apply_fragment(pending, Some(input_fragment));
                    }
                }
                UpstreamEvent::ToolUseStop { .. } => {
                    signals.has_completed_tools = true;
                }
                UpstreamEvent::Exception { exception_type } => {
                    signals.exception_kind = Some(ExceptionKind::classify(&exception_type));
                }
                UpstreamEvent::Metadata { .. } | UpstreamEvent::Unknown => {}
            }
        }
    }

    let tool_uses = order
        .into_iter()
        .filter_map(|id| tool_uses.remove(&id).map(|pending| (id, pending)))
        .map(|(id, pending)| CollectedToolUse {
            input: resolve_input(&pending),
            name: pending.name,
            id,
        })
        .collect();

    Ok((CollectedResponse { text, tool_uses }, signals))
}

fn apply_fragment(pending: &mut PendingToolUse, fragment: Option<ToolInputFragment>) {
    match fragment {
        Some(ToolInputFragment::Complete(value)) => pending.input = Some(value),
        Some(ToolInputFragment::Partial(s)) => pending.buffer.push_str(&s),
        None => {}
    }
}

fn resolve_input(pending: &PendingToolUse) -> Value {
    if let Some(value) = &pending.input {
        return value.clone();
    }

    if pending.buffer.is_empty() {
        return Value::Object(Default::default());
    }

    serde_json::from_str(&pending.buffer).unwrap_or_else(|err| {
        log::warn!("malformed tool-use input JSON for {}: {err}", pending.name);
        Value::Object(Default::default())
    })
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn string_header(name: &str, value: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());
        buf.push(7);
        buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        buf.extend_from_slice(value.as_bytes());
        buf
    }

    fn build_frame(payload: &[u8]) -> Vec<u8> {
        let headers = string_header(":event-type", "assistantResponseEvent");
        let total_length = (12 + headers.len() + payload.len() + 4) as u32;
        let mut frame = Vec::new();
        frame.extend_from_slice(&total_length.to_be_bytes());
        frame.extend_from_slice(&(headers.len() as u32).to_be_bytes());
        frame.extend_from_slice(&[0u8; 4]);
        frame.extend_from_slice(&headers);
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&[0u8; 4]);
        frame
    }

    #[tokio::test]
    async fn collects_text_and_reassembles_tool_input() {
        let mut bytes = Vec::new();
        bytes.extend(build_frame(br#"{"content":"The weather is "}"#));
        bytes.extend(build_frame(
            br#"{"toolUseId":"t1","name":"get_weather","input":"{\"loc"}"#,
        ));
        bytes.extend(build_frame(br#"{"toolUseId":"t1","input":"ation\":\"NYC\"}"}"#));
        bytes.extend(build_frame(br#"{"toolUseId":"t1","stop":true}"#));

        let chunk: Result<Bytes, reqwest::Error> = Ok(Bytes::from(bytes));
        let byte_stream = stream::iter(vec![chunk]);

        let (result, signals) = collect(byte_stream, 8).await.unwrap();
        assert_eq!(result.text, "The weather is ");
        assert_eq!(result.tool_uses.len(), 1);
        assert_eq!(result.tool_uses[0].name, "get_weather");
        assert_eq!(result.tool_uses[0].input, serde_json::json!({"location": "NYC"}));
        assert!(signals.has_completed_tools);
    }

    #[tokio::test]
    async fn malformed_tool_input_falls_back_to_empty_object() {
        let mut bytes = Vec::new();
        bytes.extend(build_frame(br#"{"toolUseId":"t1","name":"get_weather","input":"not json"}"#));
        bytes.extend(build_frame(br#"{"toolUseId":"t1","stop":true}"#));

        let chunk: Result<Bytes, reqwest::Error> = Ok(Bytes::from(bytes));
        let byte_stream = stream::iter(vec![chunk]);

        let (result, _) = collect(byte_stream, 8).await.unwrap();
        assert_eq!(result.tool_uses[0].input, serde_json::json!({}));
    }
}
