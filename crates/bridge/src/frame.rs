//! Incremental decoder for the upstream's binary EventStream framing.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! [total_length:4][headers_length:4][prelude_crc:4][headers...][payload...][message_crc:4]
//! ```
//!
//! `total_length` bounds the whole frame including the two CRCs; it must fall in
//! `16..=16*2^20`. CRCs are present on the wire but never verified here.

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};

const PRELUDE_LEN: usize = 12;
const MESSAGE_CRC_LEN: usize = 4;
const MIN_TOTAL_LENGTH: u32 = 16;
const MAX_TOTAL_LENGTH: u32 = 16 * 1024 * 1024;

/// A single decoded message: its headers and raw JSON payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub headers: HashMap<String, HeaderValue>,
    pub payload: Bytes,
}

impl Frame {
    /// The `:event-type` header value, defaulting to `assistantResponseEvent` when headers
    /// carried no event-type at all (see design notes on the empty-headers compatibility
    /// default).
    pub fn event_type(&self) -> &str {
        self.headers
            .get(":event-type")
            .and_then(HeaderValue::as_str)
            .unwrap_or("assistantResponseEvent")
    }

    /// The `:exception-type` header, if present.
    pub fn exception_type(&self) -> Option<&str> {
        self.headers.get(":exception-type").and_then(HeaderValue::as_str)
    }
}

/// A typed header value, per the wire tag table.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Bytes(Bytes),
    String(String),
    Timestamp(i64),
    Uuid(String),
}

impl HeaderValue {
    /// Returns the value as a string slice when it is a `String` (or falls back to a UUID's
    /// canonical rendering), the common case callers need for `:event-type`-style headers.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s.as_str()),
            HeaderValue::Uuid(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Errors surfaced by the frame decoder. Most are handled internally via resync; only
/// [`FrameError::ErrorBudgetExhausted`] is terminal.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame error budget exhausted after {0} errors")]
    ErrorBudgetExhausted(usize),
}

/// Incremental decoder: feed arbitrary byte chunks, pull out whole frames as they complete.
pub struct FrameDecoder {
    buf: BytesMut,
    errors: usize,
    max_errors: usize,
}

impl FrameDecoder {
    /// Creates a decoder that gives up after `max_errors` resyncs/parse failures.
    pub fn new(max_errors: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            errors: 0,
            max_errors,
        }
    }

    /// Appends newly-arrived bytes to the internal buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Discards all buffered state, as if the decoder were freshly constructed.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.errors = 0;
    }

    /// Decodes as many whole frames as the current buffer contains, leaving any trailing
    /// partial frame buffered for the next call.
    pub fn drain_frames(&mut self) -> Result<Vec<Frame>, FrameError> {
        let mut frames = Vec::new();

        loop {
            match self.try_decode_one()? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }

        Ok(frames)
    }

    fn bump_error(&mut self) -> Result<(), FrameError> {
        self.errors += 1;
        if self.errors > self.max_errors {
            return Err(FrameError::ErrorBudgetExhausted(self.errors));
        }
        Ok(())
    }

    fn try_decode_one(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            if self.buf.len() < PRELUDE_LEN {
                return Ok(None);
            }

            let total_length = u32::from_be_bytes(self.buf[0..4].try_into().expect("4 bytes"));

            if !(MIN_TOTAL_LENGTH..=MAX_TOTAL_LENGTH).contains(&total_length) {
                self.buf.advance(1);
                self.bump_error()?;
                continue;
            }

            let total_length = total_length as usize;

            if self.buf.len() < total_length {
                return Ok(None);
            }

            let headers_length = u32::from_be_bytes(self.buf[4..8].try_into().expect("4 bytes")) as usize;

            if headers_length > total_length.saturating_sub(PRELUDE_LEN + MESSAGE_CRC_LEN) {
                self.buf.advance(1);
                self.bump_error()?;
                continue;
            }

            let frame_bytes = self.buf.split_to(total_length).freeze();

            let headers_start = PRELUDE_LEN;
            let headers_end = headers_start + headers_length;
            let payload_end = total_length - MESSAGE_CRC_LEN;

            let (headers, saw_error) = parse_headers(&frame_bytes[headers_start..headers_end]);
            if saw_error {
                self.bump_error()?;
            }

            let payload = frame_bytes.slice(headers_end..payload_end);

            return Ok(Some(Frame { headers, payload }));
        }
    }
}

/// Decodes the header section of a frame. Stops on the first malformed header rather than
/// rejecting the whole message, but always returns whatever headers were decoded before that
/// point; the second element of the tuple tells the caller whether to count a parse error.
fn parse_headers(mut buf: &[u8]) -> (HashMap<String, HeaderValue>, bool) {
    let mut headers = HashMap::new();
    let mut saw_error = false;

    while !buf.is_empty() {
        let Some((&name_len, rest)) = buf.split_first() else {
            break;
        };
        let name_len = name_len as usize;
        buf = rest;

        if buf.len() < name_len + 1 {
            saw_error = true;
            break;
        }

        let name = String::from_utf8_lossy(&buf[..name_len]).into_owned();
        buf = &buf[name_len..];

        let tag = buf[0];
        buf = &buf[1..];

        let value = match decode_value(tag, buf) {
            Some((value, consumed)) => {
                buf = &buf[consumed..];
                value
            }
            None => {
                saw_error = true;
                break;
            }
        };

        headers.insert(name, value);
    }

    (headers, saw_error)
}

fn decode_value(tag: u8, buf: &[u8]) -> Option<(HeaderValue, usize)> {
    match tag {
        0 => Some((HeaderValue::Bool(true), 0)),
        1 => Some((HeaderValue::Bool(false), 0)),
        2 => buf.first().map(|&b| (HeaderValue::Int8(b as i8), 1)),
        3 => {
            let bytes = buf.get(0..2)?;
            Some((HeaderValue::Int16(i16::from_be_bytes(bytes.try_into().ok()?)), 2))
        }
        4 => {
            let bytes = buf.get(0..4)?;
            Some((HeaderValue::Int32(i32::from_be_bytes(bytes.try_into().ok()?)), 4))
        }
        5 => {
            let bytes = buf.get(0..8)?;
            Some((HeaderValue::Int64(i64::from_be_bytes(bytes.try_into().ok()?)), 8))
        }
        6 => {
            let len_bytes = buf.get(0..2)?;
            let len = u16::from_be_bytes(len_bytes.try_into().ok()?) as usize;
            let value = buf.get(2..2 + len)?;
            Some((HeaderValue::Bytes(Bytes::copy_from_slice(value)), 2 + len))
        }
        7 => {
            let len_bytes = buf.get(0..2)?;
            let len = u16::from_be_bytes(len_bytes.try_into().ok()?) as usize;
            let value = buf.get(2..2 + len)?;
            Some((HeaderValue::String(String::from_utf8_lossy(value).into_owned()), 2 + len))
        }
        8 => {
            let bytes = buf.get(0..8)?;
            Some((HeaderValue::Timestamp(i64::from_be_bytes(bytes.try_into().ok()?)), 8))
        }
        9 => match buf.get(0..16) {
            Some(bytes) => Some((HeaderValue::Uuid(format_uuid(bytes)), 16)),
            // Not enough bytes remain for a full 16-byte UUID: fall back to decoding whatever
            // is left as text rather than failing the whole header section.
            None => Some((HeaderValue::String(String::from_utf8_lossy(buf).into_owned()), buf.len())),
        },
        _ => None,
    }
}

fn format_uuid(bytes: &[u8]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0],
        bytes[1],
        bytes[2],
        bytes[3],
        bytes[4],
        bytes[5],
        bytes[6],
        bytes[7],
        bytes[8],
        bytes[9],
        bytes[10],
        bytes[11],
        bytes[12],
        bytes[13],
        bytes[14],
        bytes[15],
    )
}
