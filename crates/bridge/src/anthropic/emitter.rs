//! Drives the SSE state machine, token estimator, and stop-reason resolver to turn a raw
//! upstream byte stream into the Anthropic SSE event sequence (§4.F).

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde_json::json;

use crate::anthropic::types::{
    AnthropicStreamEvent, ContentBlock, Delta, ErrorInner, MessageDeltaInner, MessageStartPayload, UsageInner,
};
use crate::event::{self, UpstreamEvent};
use crate::frame::{FrameDecoder, FrameError};
use crate::sse_state::{BlockAction, SseStateMachine};
use crate::stop_reason::{self, ExceptionKind, StopSignals};
use crate::tokens;
use crate::upstream::UpstreamByteStream;

/// Streams [`AnthropicStreamEvent`]s from a decoded upstream byte stream, maintaining all the
/// per-request state described in §3 internally. Never yields an error: transport failures and
/// upstream exceptions are absorbed into the event sequence itself (an `error` event, or a
/// forced stop reason), per §7's `ClientDisconnect`/`UpstreamExceptionEvent` policies.
pub struct AnthropicEventStream {
    inner: UpstreamByteStream,
    decoder: FrameDecoder,
    sse: SseStateMachine,
    signals: StopSignals,
    output_tokens: u32,
    any_content_emitted: bool,
    queue: VecDeque<AnthropicStreamEvent>,
    finished: bool,
}

impl AnthropicEventStream {
    /// Builds the stream, queuing the initial `message_start` and `ping` events up front.
    pub fn new(inner: UpstreamByteStream, max_frame_errors: usize, message_id: String, model: String, input_tokens: u32) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(AnthropicStreamEvent::MessageStart {
            message: MessageStartPayload {
                id: message_id,
                kind: "message",
                role: "assistant",
                content: Vec::new(),
                model,
                usage: UsageInner {
                    input_tokens,
                    output_tokens: 0,
                },
            },
        });
        queue.push_back(AnthropicStreamEvent::Ping);

        Self {
            inner,
            decoder: FrameDecoder::new(max_frame_errors),
            sse: SseStateMachine::new(),
            signals: StopSignals::default(),
            output_tokens: 0,
            any_content_emitted: false,
            queue,
            finished: false,
        }
    }

    fn push_action(&mut self, action: BlockAction) {
        match action {
            BlockAction::OpenText { index } => {
                self.any_content_emitted = true;
                self.queue.push_back(AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Text { text: String::new() },
                });
            }
            BlockAction::TextDelta { index, text } => {
                self.output_tokens += tokens::text_tokens(&text);
                self.queue.push_back(AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::TextDelta { text },
                });
            }
            BlockAction::OpenToolUse { index, tool_use_id, name } => {
                self.any_content_emitted = true;
                self.output_tokens += tokens::tool_use_start_tokens(&name);
                self.queue.push_back(AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::ToolUse {
                        id: tool_use_id,
                        name,
                        input: json!({}),
                    },
                });
            }
            BlockAction::ToolInputDelta { index, partial_json } => {
                self.output_tokens += tokens::tool_input_fragment_tokens(&partial_json);
                self.queue.push_back(AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta { partial_json },
                });
            }
            BlockAction::CloseBlock { index } => {
                self.queue.push_back(AnthropicStreamEvent::ContentBlockStop { index });
            }
        }
    }

    fn handle_upstream_event(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::TextDelta { content } => {
                for action in self.sse.on_text_delta(&content) {
                    self.push_action(action);
                }
            }
            UpstreamEvent::ToolUseStart {
                tool_use_id,
                name,
                input_fragment,
            } => {
                for action in self.sse.on_tool_use_start(&tool_use_id, &name, input_fragment) {
                    self.push_action(action);
                }
            }
            UpstreamEvent::ToolUseDelta {
                tool_use_id,
                input_fragment,
            } => {
                for action in self.sse.on_tool_use_delta(&tool_use_id, input_fragment) {
                    self.push_action(action);
                }
            }
            UpstreamEvent::ToolUseStop { tool_use_id } => {
                for action in self.sse.on_tool_use_stop(&tool_use_id) {
                    self.push_action(action);
                }
            }
            UpstreamEvent::Exception { exception_type } => {
                log::warn!("upstream exception event: {exception_type}");
                self.signals.exception_kind = Some(ExceptionKind::classify(&exception_type));
                self.finalize();
            }
            UpstreamEvent::Metadata { .. } | UpstreamEvent::Unknown => {}
        }
    }

    /// Closes any still-open blocks, resolves the final stop reason, and queues the terminal
    /// `message_delta`/`message_stop` pair. Idempotent.
    fn finalize(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        for action in self.sse.close_all_open_blocks() {
            self.push_action(action);
        }

        self.signals.has_active_tools = self.sse.has_active_tools();
        self.signals.has_completed_tools = self.sse.has_completed_tools();

        let stop_reason = stop_reason::resolve(self.signals);
        let output_tokens = tokens::floor_output_tokens(self.output_tokens, self.any_content_emitted);

        self.queue.push_back(AnthropicStreamEvent::MessageDelta {
            delta: MessageDeltaInner {
                stop_reason: stop_reason.as_str(),
                stop_sequence: None,
            },
            usage: UsageInner {
                input_tokens: 0,
                output_tokens,
            },
        });
        self.queue.push_back(AnthropicStreamEvent::MessageStop);
    }

    fn fail_with_error_budget_exhausted(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.queue.push_back(AnthropicStreamEvent::Error {
            error: ErrorInner {
                kind: "overloaded_error",
                message: "frame decoding failed: too many malformed frames".to_string(),
            },
        });
    }
}

impl Stream for AnthropicEventStream {
    type Item = AnthropicStreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Poll::Ready(Some(event));
            }

            if self.finished {
                return Poll::Ready(None);
            }

            let chunk: Option<Bytes> = match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(bytes))) => Some(bytes),
                Poll::Ready(Some(Err(err))) => {
                    log::debug!("upstream stream ended with transport error: {err}");
                    None
                }
                Poll::Ready(None) => None,
            };

            let Some(chunk) = chunk else {
                self.finalize();
                continue;
            };

            self.decoder.feed(&chunk);

            match self.decoder.drain_frames() {
                Ok(frames) => {
                    for frame in frames {
                        let event = event::interpret(&frame);
                        self.handle_upstream_event(event);
                        if self.finished {
                            break;
                        }
                    }
                }
                Err(FrameError::ErrorBudgetExhausted(count)) => {
                    log::error!("frame decoder error budget exhausted after {count} errors");
                    self.fail_with_error_budget_exhausted();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::{StreamExt, stream};

    use super::*;

    fn byte_stream(chunks: Vec<Bytes>) -> UpstreamByteStream {
        Box::pin(stream::iter(chunks.into_iter().map(Ok)))
    }

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

    /// Scenario S1: plain text streaming produces `message_start`, `ping`, a lazily-opened
    /// text block, two deltas, a close, and a terminal `end_turn` delta/stop pair.
    #[tokio::test]
    async fn plain_text_streaming_sequence() {
        let mut bytes = Vec::new();
        bytes.extend(build_frame(br#"{"content":"hi"}"#));
        bytes.extend(build_frame(br#"{"content":" there"}"#));

        let stream = byte_stream(vec![Bytes::from(bytes)]);
        let mut emitter = AnthropicEventStream::new(stream, 8, "msg_1".to_string(), "m".to_string(), 5);

        let events: Vec<_> = (&mut emitter).collect().await;

        assert!(matches!(events[0], AnthropicStreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], AnthropicStreamEvent::Ping));
        assert!(matches!(events[2], AnthropicStreamEvent::ContentBlockStart { index: 0, .. }));
        assert!(matches!(&events[3], AnthropicStreamEvent::ContentBlockDelta { index: 0, delta: Delta::TextDelta { text } } if text == "hi"));
        assert!(
            matches!(&events[4], AnthropicStreamEvent::ContentBlockDelta { index: 0, delta: Delta::TextDelta { text } } if text == " there")
        );
        assert!(matches!(events[5], AnthropicStreamEvent::ContentBlockStop { index: 0 }));

        let AnthropicStreamEvent::MessageDelta { delta, usage } = &events[6] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason, "end_turn");
        assert!(usage.output_tokens >= 1);
        assert!(matches!(events[7], AnthropicStreamEvent::MessageStop));
        assert_eq!(events.len(), 8);
    }

    /// Scenario S2: a tool-use start, two input-fragment deltas, then a stop, resolves to a
    /// `tool_use` stop reason and keeps the tool block at index 1 (text never opens).
    #[tokio::test]
    async fn tool_call_streaming_sequence() {
        let mut bytes = Vec::new();
        bytes.extend(build_frame(br#"{"toolUseId":"t1","name":"calc"}"#));
        bytes.extend(build_frame(br#"{"toolUseId":"t1","input":"{\"x\":"}"#));
        bytes.extend(build_frame(br#"{"toolUseId":"t1","input":"1}"}"#));
        bytes.extend(build_frame(br#"{"toolUseId":"t1","stop":true}"#));

        let stream = byte_stream(vec![Bytes::from(bytes)]);
        let mut emitter = AnthropicEventStream::new(stream, 8, "msg_1".to_string(), "m".to_string(), 5);

        let events: Vec<_> = (&mut emitter).collect().await;

        let AnthropicStreamEvent::ContentBlockStart { index, content_block } = &events[2] else {
            panic!("expected content_block_start");
        };
        assert_eq!(*index, 1);
        assert!(matches!(content_block, ContentBlock::ToolUse { name, .. } if name == "calc"));

        assert!(matches!(events[3], AnthropicStreamEvent::ContentBlockDelta { index: 1, .. }));
        assert!(matches!(events[4], AnthropicStreamEvent::ContentBlockDelta { index: 1, .. }));
        assert!(matches!(events[5], AnthropicStreamEvent::ContentBlockStop { index: 1 }));

        let AnthropicStreamEvent::MessageDelta { delta, .. } = &events[6] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason, "tool_use");
    }

    /// A tool-use block left open at stream end gets a synthesised close before the terminal
    /// pair, and its open-but-not-completed state still resolves to `tool_use`.
    #[tokio::test]
    async fn unclosed_tool_block_is_closed_at_stream_end() {
        let bytes = build_frame(br#"{"toolUseId":"t1","name":"calc"}"#);
        let stream = byte_stream(vec![Bytes::from(bytes)]);
        let mut emitter = AnthropicEventStream::new(stream, 8, "msg_1".to_string(), "m".to_string(), 5);

        let events: Vec<_> = (&mut emitter).collect().await;

        assert!(matches!(events[3], AnthropicStreamEvent::ContentBlockStop { index: 1 }));
        let AnthropicStreamEvent::MessageDelta { delta, .. } = &events[4] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason, "tool_use");
    }

    /// A content-length-exceeded exception forces `max_tokens` even with no content emitted,
    /// and stops the stream without reading anything past the exception frame.
    #[tokio::test]
    async fn content_length_exceeded_forces_max_tokens() {
        let mut bytes = Vec::new();
        bytes.extend(build_frame(br#"{"content":"partial"}"#));
        bytes.extend(build_frame(br#"{"__type":"ContentLengthExceededException"}"#));

        let stream = byte_stream(vec![
            Bytes::from(bytes),
            Bytes::from_static(b"trailing garbage that must not be read"),
        ]);
        let mut emitter = AnthropicEventStream::new(stream, 8, "msg_1".to_string(), "m".to_string(), 5);

        let events: Vec<_> = (&mut emitter).collect().await;

        let last_delta = events.iter().find_map(|e| match e {
            AnthropicStreamEvent::MessageDelta { delta, .. } => Some(delta),
            _ => None,
        });
        assert_eq!(last_delta.unwrap().stop_reason, "max_tokens");
        assert!(matches!(events.last(), Some(AnthropicStreamEvent::MessageStop)));
    }
}
