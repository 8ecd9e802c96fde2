//! Re-projects the same decoded upstream events the Anthropic emitter consumes into OpenAI
//! `chat.completion.chunk` frames (§4.G).

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use crate::event::{self, ToolInputFragment, UpstreamEvent};
use crate::frame::{FrameDecoder, FrameError};
use crate::openai::types::{ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionCallDelta, StreamItem, ToolCallDelta};
use crate::stop_reason::{self, ExceptionKind, StopSignals};
use crate::upstream::UpstreamByteStream;

/// Streams [`StreamItem`]s projected from the upstream event sequence.
pub struct OpenAiChunkStream {
    inner: UpstreamByteStream,
    decoder: FrameDecoder,
    id: String,
    model: String,
    tool_index_by_tool_use_id: HashMap<String, u32>,
    next_tool_index: u32,
    signals: StopSignals,
    queue: VecDeque<StreamItem>,
    finished: bool,
}

impl OpenAiChunkStream {
    /// Builds the stream, queuing the initial role-announcing chunk up front.
    pub fn new(inner: UpstreamByteStream, max_frame_errors: usize, id: String, model: String) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(StreamItem::Chunk(ChatCompletionChunk {
            id: id.clone(),
            object: "chat.completion.chunk",
            model: model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: Some("assistant"),
                    ..Default::default()
                },
                finish_reason: None,
            }],
        }));

        Self {
            inner,
            decoder: FrameDecoder::new(max_frame_errors),
            id,
            model,
            tool_index_by_tool_use_id: HashMap::new(),
            next_tool_index: 0,
            signals: StopSignals::default(),
            queue,
            finished: false,
        }
    }

    fn push_content_chunk(&mut self, content: String) {
        self.queue.push_back(StreamItem::Chunk(ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(content),
                    ..Default::default()
                },
                finish_reason: None,
            }],
        }));
    }

    fn push_tool_call_chunk(&mut self, delta: ToolCallDelta) {
        self.queue.push_back(StreamItem::Chunk(ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    tool_calls: vec![delta],
                    ..Default::default()
                },
                finish_reason: None,
            }],
        }));
    }

    fn ensure_tool_index(&mut self, tool_use_id: &str) -> u32 {
        if let Some(&index) = self.tool_index_by_tool_use_id.get(tool_use_id) {
            return index;
        }
        let index = self.next_tool_index;
        self.next_tool_index += 1;
        self.tool_index_by_tool_use_id.insert(tool_use_id.to_string(), index);
        index
    }

    fn push_fragment(&mut self, index: u32, fragment: ToolInputFragment) {
        let arguments = match fragment {
            ToolInputFragment::Partial(s) => s,
            ToolInputFragment::Complete(value) => value.to_string(),
        };
        self.push_tool_call_chunk(ToolCallDelta {
            index,
            id: None,
            kind: None,
            function: FunctionCallDelta {
                name: None,
                arguments: Some(arguments),
            },
        });
    }

    fn handle_upstream_event(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::TextDelta { content } => {
                self.push_content_chunk(content);
            }
            UpstreamEvent::ToolUseStart {
                tool_use_id,
                name,
                input_fragment,
            } => {
                let index = self.ensure_tool_index(&tool_use_id);
                self.push_tool_call_chunk(ToolCallDelta {
                    index,
                    id: Some(tool_use_id),
                    kind: Some("function"),
                    function: FunctionCallDelta {
                        name: Some(name),
                        arguments: Some(String::new()),
                    },
                });
                if let Some(fragment) = input_fragment {
                    self.push_fragment(index, fragment);
                }
            }
            UpstreamEvent::ToolUseDelta {
                tool_use_id,
                input_fragment,
            } => {
                let index = self.ensure_tool_index(&tool_use_id);
                self.push_fragment(index, input_fragment);
            }
            UpstreamEvent::ToolUseStop { tool_use_id } => {
                self.signals.has_completed_tools = true;
                self.tool_index_by_tool_use_id.remove(&tool_use_id);
            }
            UpstreamEvent::Exception { exception_type } => {
                log::warn!("upstream exception event: {exception_type}");
                self.signals.exception_kind = Some(ExceptionKind::classify(&exception_type));
                self.finalize();
            }
            UpstreamEvent::Metadata { .. } | UpstreamEvent::Unknown => {}
        }
    }

    fn finalize(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.signals.has_active_tools = !self.tool_index_by_tool_use_id.is_empty();

        let finish_reason = stop_reason::resolve(self.signals).to_openai_finish_reason();

        self.queue.push_back(StreamItem::Chunk(ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta::default(),
                finish_reason: Some(finish_reason),
            }],
        }));
        self.queue.push_back(StreamItem::Done);
    }
}

impl Stream for OpenAiChunkStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Poll::Ready(Some(item));
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
                    self.finalize();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

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

    #[tokio::test]
    async fn content_length_exceeded_emits_length_finish_reason_and_stops() {
        use futures::StreamExt;

        let mut bytes = Vec::new();
        bytes.extend(build_frame(br#"{"content":"partial "}"#));
        bytes.extend(build_frame(br#"{"__type":"ContentLengthExceededException"}"#));

        let stream = byte_stream(vec![Bytes::from(bytes), Bytes::from_static(b"trailing garbage that must not be read")]);
        let mut projector = OpenAiChunkStream::new(stream, 8, "chatcmpl-1".to_string(), "m".to_string());

        let mut items = Vec::new();
        while let Some(item) = projector.next().await {
            items.push(item);
        }

        assert!(matches!(items.last(), Some(StreamItem::Done)));
        let StreamItem::Chunk(terminal) = &items[items.len() - 2] else {
            panic!("expected terminal chunk before [DONE]");
        };
        assert_eq!(terminal.choices[0].finish_reason, Some("length"));
    }
}
