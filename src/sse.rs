//! Server-Sent Events (SSE) decoding.
//!
//! SSE format:
//! ```text
//! event: message
//! data: {"key": "value"}
//!
//! data: {"another": "event"}
//!
//! data: [DONE]
//! ```
//!
//! Events end at a blank line. Bytes after the last blank line are kept as
//! leftover until the next read completes them.

use bytes::{Buf, Bytes, BytesMut};
use serde_json::Value;
use tracing::trace;

use crate::client::ClientError;
use crate::stream::{FrameDecoder, WireMessage};

/// One decoded SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, if present
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Create a data-only event.
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Create a named event.
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            ..Self::default()
        }
    }

    /// Parse the data field as JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.data)
    }

    /// Whether the data field is the `[DONE]` marker.
    pub fn is_done(&self) -> bool {
        is_done_marker(&self.data)
    }
}

/// Check if an SSE data field indicates the stream is done.
///
/// # Example
/// ```
/// use unai_stream::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker(""));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data.trim() == "[DONE]"
}

/// Decode every complete event in `carry` followed by `buffer`.
///
/// Returns the events and the bytes of any unterminated trailing event.
///
/// # Example
/// ```
/// use unai_stream::sse::decode;
///
/// let (events, leftover) = decode(b"data: one\n\ndata: tw", b"");
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].data, "one");
/// assert_eq!(&leftover[..], b"data: tw");
/// ```
pub fn decode(buffer: &[u8], carry: &[u8]) -> (Vec<SseEvent>, Bytes) {
    let mut buf = BytesMut::with_capacity(carry.len() + buffer.len());
    buf.extend_from_slice(carry);
    buf.extend_from_slice(buffer);

    let events = decode_buf(&mut buf, &mut ScanState::default());
    (events, buf.freeze())
}

/// Progress through the pending bytes, kept between reads.
#[derive(Debug, Default, Clone, Copy)]
struct ScanState {
    /// Start of the line not yet terminated
    line_start: usize,
    /// Bytes already searched for a newline
    scanned: usize,
}

fn decode_buf(buf: &mut BytesMut, scan: &mut ScanState) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut consumed = 0;
    let mut line_start = scan.line_start;
    let mut from = scan.scanned.max(line_start);

    while let Some(offset) = buf[from..].iter().position(|b| *b == b'\n') {
        let line_end = from + offset;
        let blank = matches!(&buf[line_start..line_end], [] | [b'\r']);
        line_start = line_end + 1;
        from = line_start;

        if blank {
            if let Some(event) = parse_event(&buf[consumed..line_start]) {
                events.push(event);
            }
            consumed = line_start;
        }
    }

    buf.advance(consumed);
    *scan = ScanState {
        line_start: line_start - consumed,
        scanned: buf.len(),
    };
    events
}

/// Parse the field lines of one event block.
///
/// Returns `None` for blocks holding only comments or unknown fields.
fn parse_event(block: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(block);
    let mut event = SseEvent::default();
    let mut has_data = false;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if has_data {
                    event.data.push('\n');
                }
                event.data.push_str(value);
                has_data = true;
            }
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            "retry" => event.retry = value.trim().parse().ok(),
            _ => {}
        }
    }

    (has_data || event.event.is_some()).then_some(event)
}

/// Resumable SSE decoder that owns the bytes left over between reads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    scan: ScanState,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the events completed by `bytes`.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let events = decode_buf(&mut self.buffer, &mut self.scan);
        trace!(events = events.len(), pending = self.buffer.len(), "decoded sse bytes");
        events
    }

    /// Flush a trailing event that was never terminated by a blank line.
    pub fn flush(&mut self) -> Option<SseEvent> {
        self.scan = ScanState::default();
        let rest = self.buffer.split();
        parse_event(&rest)
    }
}

impl FrameDecoder for SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<WireMessage>, ClientError> {
        Ok(self.decode(bytes).into_iter().map(WireMessage::Event).collect())
    }

    fn finish(&mut self) -> Result<Vec<WireMessage>, ClientError> {
        Ok(self.flush().into_iter().map(WireMessage::Event).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "event: message_start\ndata: {\"a\":1}\n\n: keep-alive\n\ndata: line one\ndata: line two\n\nid: 7\nretry: 1500\ndata: [DONE]\n\n";

    #[test]
    fn test_decode_events() {
        let (events, leftover) = decode(STREAM.as_bytes(), b"");
        assert!(leftover.is_empty());
        assert_eq!(events.len(), 3);

        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].json().unwrap()["a"], 1);
        assert_eq!(events[1].data, "line one\nline two");
        assert_eq!(events[2].id.as_deref(), Some("7"));
        assert_eq!(events[2].retry, Some(1500));
        assert!(events[2].is_done());
    }

    #[test]
    fn test_crlf_terminators() {
        let (events, leftover) = decode(b"data: a\r\n\r\ndata: b\r\n\r\n", b"");
        assert_eq!(events, vec![SseEvent::data("a"), SseEvent::data("b")]);
        assert!(leftover.is_empty());
    }

    #[test]
    fn test_unterminated_event_is_leftover() {
        let (events, leftover) = decode(b"data: {\"partial\":", b"");
        assert!(events.is_empty());

        let (events, leftover) = decode(b" true}\n\n", &leftover);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"partial\": true}");
        assert!(leftover.is_empty());
    }

    #[test]
    fn test_split_at_every_offset() {
        let bytes = STREAM.as_bytes();
        let (whole, _) = decode(bytes, b"");

        for k in 0..=bytes.len() {
            let (mut events, leftover) = decode(&bytes[..k], b"");
            let (rest, leftover) = decode(&bytes[k..], &leftover);
            events.extend(rest);
            assert_eq!(events, whole, "offset {k}");
            assert!(leftover.is_empty(), "offset {k}");
        }
    }

    #[test]
    fn test_decoder_resumes_scan_byte_by_byte() {
        let bytes = "data: a\r\n\r\n: ping\n\nevent: x\ndata: b\n\n".as_bytes();
        let (whole, _) = decode(bytes, b"");

        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for byte in bytes.chunks(1) {
            events.extend(decoder.decode(byte));
            assert_eq!(decoder.scan.scanned, decoder.buffer.len());
            assert!(decoder.scan.line_start <= decoder.buffer.len());
        }

        assert_eq!(events, whole);
        assert_eq!(events.len(), 2);
        assert!(decoder.buffer.is_empty());
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let bytes = "data: caf\u{e9}\n\n".as_bytes();
        let split = bytes.len() - 3;

        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(&bytes[..split]).is_empty());
        let events = decoder.decode(&bytes[split..]);
        assert_eq!(events[0].data, "caf\u{e9}");
    }

    #[test]
    fn test_flush_trailing_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: tail").is_empty());
        assert_eq!(decoder.flush(), Some(SseEvent::data("tail")));
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn test_is_done_marker() {
        assert!(is_done_marker("[DONE]"));
        assert!(!is_done_marker(""));
        assert!(!is_done_marker("data"));
        assert!(!is_done_marker("{\"key\": \"value\"}"));
    }
}
