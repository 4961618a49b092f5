//! Length-prefixed, CRC-checked binary event framing.
//!
//! Each message on the wire is laid out as (all integers big-endian):
//! ```text
//! total_length: u32 | headers_length: u32 | prelude_crc: u32
//! headers: [u8; headers_length]
//! payload: [u8; total_length - headers_length - 16]
//! message_crc: u32
//! ```
//! `prelude_crc` covers the first 8 bytes and `message_crc` covers every byte
//! before it.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::client::ClientError;
use crate::stream::{FrameDecoder, WireMessage};

/// Bytes needed before the total length and prelude checksum can be read.
pub const PRELUDE_LEN: usize = 12;

const ENVELOPE_LEN: usize = PRELUDE_LEN + 4;

/// Upper bound on a single message, matching the service-side limit.
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Which checksum failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumSection {
    Prelude,
    Message,
}

impl fmt::Display for ChecksumSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumSection::Prelude => f.write_str("prelude"),
            ChecksumSection::Message => f.write_str("message"),
        }
    }
}

/// Errors raised while decoding binary frames. All of them abort the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStreamError {
    #[error("checksum mismatch in {section}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        section: ChecksumSection,
        expected: u32,
        computed: u32,
    },

    #[error("invalid frame length: total {total}, headers {headers}")]
    InvalidLength { total: usize, headers: usize },

    #[error("invalid header block: {0}")]
    InvalidHeader(String),

    #[error("stream ended inside a frame ({0} bytes buffered)")]
    Truncated(usize),
}

/// A typed header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Bytes),
    String(String),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn type_tag(&self) -> u8 {
        match self {
            HeaderValue::Bool(true) => 0,
            HeaderValue::Bool(false) => 1,
            HeaderValue::Byte(_) => 2,
            HeaderValue::Short(_) => 3,
            HeaderValue::Int(_) => 4,
            HeaderValue::Long(_) => 5,
            HeaderValue::Bytes(_) => 6,
            HeaderValue::String(_) => 7,
            HeaderValue::Timestamp(_) => 8,
            HeaderValue::Uuid(_) => 9,
        }
    }
}

/// Message headers in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventHeaders(Vec<(String, HeaderValue)>);

impl EventHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, builder style.
    pub fn with(mut self, name: impl Into<String>, value: HeaderValue) -> Self {
        self.0.push((name.into(), value));
        self
    }

    /// Add a string header, builder style.
    pub fn with_str(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(name, HeaderValue::String(value.into()))
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One complete, checksum-validated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    pub headers: EventHeaders,
    pub payload: Bytes,
}

impl EventMessage {
    /// Parse the payload as JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// `:message-type` header, `event` for ordinary messages.
    pub fn message_type(&self) -> Option<&str> {
        self.headers.get_str(":message-type")
    }

    /// `:event-type` header.
    pub fn event_type(&self) -> Option<&str> {
        self.headers.get_str(":event-type")
    }
}

/// Result of one decode call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// At least one complete message, plus the unconsumed tail.
    Messages {
        messages: Vec<EventMessage>,
        leftover: Bytes,
    },
    /// No complete message yet; keep `leftover` for the next call.
    Incomplete { leftover: Bytes },
}

impl Decoded {
    pub fn leftover(&self) -> &Bytes {
        match self {
            Decoded::Messages { leftover, .. } | Decoded::Incomplete { leftover } => leftover,
        }
    }

    pub fn into_messages(self) -> Vec<EventMessage> {
        match self {
            Decoded::Messages { messages, .. } => messages,
            Decoded::Incomplete { .. } => Vec::new(),
        }
    }
}

/// Decode every complete message in `carry` followed by `buffer`.
///
/// # Example
/// ```
/// use unai_stream::eventstream::{decode, encode, Decoded, EventHeaders};
///
/// let frame = encode(&EventHeaders::new(), br#"{"x":1}"#);
/// let Decoded::Messages { messages, leftover } = decode(&frame, &[]).unwrap() else {
///     panic!("expected a message");
/// };
/// assert_eq!(messages[0].json().unwrap(), serde_json::json!({"x": 1}));
/// assert!(leftover.is_empty());
/// ```
pub fn decode(buffer: &[u8], carry: &[u8]) -> Result<Decoded, EventStreamError> {
    let mut buf = BytesMut::with_capacity(carry.len() + buffer.len());
    buf.extend_from_slice(carry);
    buf.extend_from_slice(buffer);

    let mut messages = Vec::new();
    decode_buf(&mut buf, &mut messages)?;
    let leftover = buf.freeze();

    if messages.is_empty() {
        Ok(Decoded::Incomplete { leftover })
    } else {
        Ok(Decoded::Messages { messages, leftover })
    }
}

/// Consume complete messages from the front of `buf` into `messages`,
/// leaving any partial tail. Messages decoded before an error are kept.
fn decode_buf(buf: &mut BytesMut, messages: &mut Vec<EventMessage>) -> Result<(), EventStreamError> {
    while buf.len() >= PRELUDE_LEN {
        let mut prelude = &buf[..PRELUDE_LEN];
        let total = prelude.get_u32() as usize;
        let headers_len = prelude.get_u32() as usize;
        let prelude_crc = prelude.get_u32();

        let computed = crc32fast::hash(&buf[..8]);
        if computed != prelude_crc {
            return Err(EventStreamError::ChecksumMismatch {
                section: ChecksumSection::Prelude,
                expected: prelude_crc,
                computed,
            });
        }

        if total < ENVELOPE_LEN + headers_len || total > MAX_MESSAGE_LEN {
            return Err(EventStreamError::InvalidLength {
                total,
                headers: headers_len,
            });
        }

        if buf.len() < total {
            break;
        }

        let frame = buf.split_to(total).freeze();
        let message_crc = (&frame[total - 4..]).get_u32();
        let computed = crc32fast::hash(&frame[..total - 4]);
        if computed != message_crc {
            return Err(EventStreamError::ChecksumMismatch {
                section: ChecksumSection::Message,
                expected: message_crc,
                computed,
            });
        }

        let headers = decode_headers(&frame[PRELUDE_LEN..PRELUDE_LEN + headers_len])?;
        let payload = frame.slice(PRELUDE_LEN + headers_len..total - 4);
        trace!(total, headers_len, payload_len = payload.len(), "decoded event frame");

        messages.push(EventMessage { headers, payload });
    }

    Ok(())
}

fn take<'a>(cursor: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8], EventStreamError> {
    if cursor.len() < n {
        return Err(EventStreamError::InvalidHeader(format!(
            "{what} needs {n} bytes, {} left",
            cursor.len()
        )));
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}

fn decode_headers(mut cursor: &[u8]) -> Result<EventHeaders, EventStreamError> {
    let mut headers = EventHeaders::new();

    while !cursor.is_empty() {
        let name_len = take(&mut cursor, 1, "header name length")?[0] as usize;
        let name = std::str::from_utf8(take(&mut cursor, name_len, "header name")?)
            .map_err(|e| EventStreamError::InvalidHeader(e.to_string()))?
            .to_string();
        let tag = take(&mut cursor, 1, "header type")?[0];

        let value = match tag {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(take(&mut cursor, 1, &name)?.get_i8()),
            3 => HeaderValue::Short(take(&mut cursor, 2, &name)?.get_i16()),
            4 => HeaderValue::Int(take(&mut cursor, 4, &name)?.get_i32()),
            5 => HeaderValue::Long(take(&mut cursor, 8, &name)?.get_i64()),
            6 | 7 => {
                let len = take(&mut cursor, 2, &name)?.get_u16() as usize;
                let raw = take(&mut cursor, len, &name)?;
                if tag == 6 {
                    HeaderValue::Bytes(Bytes::copy_from_slice(raw))
                } else {
                    let s = std::str::from_utf8(raw)
                        .map_err(|e| EventStreamError::InvalidHeader(format!("{name}: {e}")))?;
                    HeaderValue::String(s.to_string())
                }
            }
            8 => HeaderValue::Timestamp(take(&mut cursor, 8, &name)?.get_i64()),
            9 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(take(&mut cursor, 16, &name)?);
                HeaderValue::Uuid(uuid)
            }
            other => {
                return Err(EventStreamError::InvalidHeader(format!(
                    "{name}: unknown value type {other}"
                )))
            }
        };

        headers.0.push((name, value));
    }

    Ok(headers)
}

/// Encode one message with both checksums.
pub fn encode(headers: &EventHeaders, payload: &[u8]) -> Bytes {
    let mut header_block = BytesMut::new();
    for (name, value) in headers.iter() {
        header_block.put_u8(name.len() as u8);
        header_block.put_slice(name.as_bytes());
        header_block.put_u8(value.type_tag());
        match value {
            HeaderValue::Bool(_) => {}
            HeaderValue::Byte(v) => header_block.put_i8(*v),
            HeaderValue::Short(v) => header_block.put_i16(*v),
            HeaderValue::Int(v) => header_block.put_i32(*v),
            HeaderValue::Long(v) | HeaderValue::Timestamp(v) => header_block.put_i64(*v),
            HeaderValue::Bytes(v) => {
                header_block.put_u16(v.len() as u16);
                header_block.put_slice(v);
            }
            HeaderValue::String(v) => {
                header_block.put_u16(v.len() as u16);
                header_block.put_slice(v.as_bytes());
            }
            HeaderValue::Uuid(v) => header_block.put_slice(v),
        }
    }

    let total = ENVELOPE_LEN + header_block.len() + payload.len();
    let mut frame = BytesMut::with_capacity(total);
    frame.put_u32(total as u32);
    frame.put_u32(header_block.len() as u32);
    let prelude_crc = crc32fast::hash(&frame[..8]);
    frame.put_u32(prelude_crc);
    frame.put_slice(&header_block);
    frame.put_slice(payload);
    let message_crc = crc32fast::hash(&frame);
    frame.put_u32(message_crc);

    frame.freeze()
}

/// Resumable decoder that owns the bytes left over between reads.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
    /// Error hit after some messages of the same read were already decoded
    failed: Option<EventStreamError>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the messages completed by `bytes`.
    ///
    /// Messages completed before a corrupt one are returned first; the error
    /// is reported by the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Vec<EventMessage>, EventStreamError> {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }

        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();
        if let Err(e) = decode_buf(&mut self.buffer, &mut messages) {
            if messages.is_empty() {
                self.failed = Some(e.clone());
                return Err(e);
            }
            self.failed = Some(e);
        }
        Ok(messages)
    }

    /// Bytes buffered towards the next message.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl FrameDecoder for EventStreamDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<WireMessage>, ClientError> {
        Ok(self
            .decode(bytes)?
            .into_iter()
            .map(WireMessage::Frame)
            .collect())
    }

    fn finish(&mut self) -> Result<Vec<WireMessage>, ClientError> {
        if let Some(e) = self.failed.take() {
            Err(e.into())
        } else if self.buffer.is_empty() {
            Ok(Vec::new())
        } else {
            Err(EventStreamError::Truncated(self.buffer.len()).into())
        }
    }
}
