//! Newline-delimited JSON decoding (one JSON document per line).

use bytes::{Buf, Bytes, BytesMut};

use crate::client::ClientError;
use crate::stream::{FrameDecoder, WireMessage};

/// Decode every complete line in `carry` followed by `buffer`.
///
/// Blank lines are skipped. The unterminated last line is returned as leftover.
pub fn decode(buffer: &[u8], carry: &[u8]) -> (Vec<String>, Bytes) {
    let mut buf = BytesMut::with_capacity(carry.len() + buffer.len());
    buf.extend_from_slice(carry);
    buf.extend_from_slice(buffer);

    let lines = decode_buf(&mut buf, &mut 0);
    (lines, buf.freeze())
}

/// `scanned` counts the leading bytes of `buf` already known to hold no newline.
fn decode_buf(buf: &mut BytesMut, scanned: &mut usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut from = *scanned;

    while let Some(offset) = buf[from..].iter().position(|b| *b == b'\n') {
        let line = buf.split_to(from + offset + 1);
        if let Some(line) = non_blank(&line) {
            lines.push(line);
        }
        from = 0;
    }

    *scanned = buf.len();
    lines
}

fn non_blank(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    (!line.is_empty()).then(|| line.to_string())
}

/// Resumable line decoder that owns the bytes left over between reads.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: BytesMut,
    scanned: usize,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the lines completed by `bytes`.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        decode_buf(&mut self.buffer, &mut self.scanned)
    }

    /// Flush a last line that had no trailing newline.
    pub fn flush(&mut self) -> Option<String> {
        self.scanned = 0;
        let rest = self.buffer.split();
        non_blank(rest.chunk())
    }
}

impl FrameDecoder for NdjsonDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<WireMessage>, ClientError> {
        Ok(self.decode(bytes).into_iter().map(WireMessage::Line).collect())
    }

    fn finish(&mut self) -> Result<Vec<WireMessage>, ClientError> {
        Ok(self.flush().into_iter().map(WireMessage::Line).collect())
    }
}
