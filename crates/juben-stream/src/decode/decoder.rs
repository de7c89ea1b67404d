//! Line-oriented frame decoder.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use super::constants::{BOM, CR, DATA_PREFIX, DONE_SENTINEL, LF};

/// A complete frame recognized on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A `data: ` line with a non-empty payload (trimmed, not yet parsed).
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

impl Frame {
    /// Returns `true` for the terminal sentinel.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    NotStarted,
    Started,
}

/// Turns arbitrarily split byte chunks into complete [`Frame`]s.
///
/// Bytes are buffered until a `\n` is seen; only then is the line decoded as
/// UTF-8. Since `\n` never occurs inside a multi-byte sequence, characters
/// split across chunks are reassembled before decoding. Every complete line is
/// consumed by [`feed`](Self::feed) before it returns, so the buffer only ever
/// holds an unterminated tail.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: DecoderState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            state: DecoderState::NotStarted,
        }
    }

    /// Feed a chunk and collect every frame it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.feed_into(chunk, &mut frames);
        frames
    }

    /// Like [`feed`](Self::feed), appending to an existing buffer of frames.
    pub fn feed_into(&mut self, chunk: &[u8], frames: &mut Vec<Frame>) {
        if chunk.is_empty() {
            return;
        }
        self.buffer.extend_from_slice(chunk);

        if self.state == DecoderState::NotStarted {
            match starts_with_bom(&self.buffer) {
                Some(true) => {
                    self.state = DecoderState::Started;
                    self.buffer.advance(BOM.len());
                }
                Some(false) => self.state = DecoderState::Started,
                // Not enough bytes to tell yet; a BOM prefix holds no LF.
                None => return,
            }
        }

        while let Some(pos) = memchr::memchr(LF, &self.buffer) {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);
            if let Some(frame) = classify_line(&line) {
                frames.push(frame);
            }
        }
    }

    /// End of stream: discard and return whatever unterminated text is left.
    ///
    /// A trailing partial frame is never emitted.
    pub fn flush(&mut self) -> Option<String> {
        self.state = DecoderState::NotStarted;
        if self.buffer.is_empty() {
            return None;
        }
        let leftover = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        debug!(bytes = leftover.len(), "Discarding unterminated frame");
        Some(leftover)
    }

    /// Number of buffered bytes not yet known to end a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

const fn starts_with_bom(buf: &[u8]) -> Option<bool> {
    match buf.len() {
        0 => None,
        1 => {
            if buf[0] == BOM[0] {
                None
            } else {
                Some(false)
            }
        }
        2 => {
            if buf[0] == BOM[0] && buf[1] == BOM[1] {
                None
            } else {
                Some(false)
            }
        }
        _gte_3 => Some(buf[0] == BOM[0] && buf[1] == BOM[1] && buf[2] == BOM[2]),
    }
}

fn classify_line(line: &[u8]) -> Option<Frame> {
    let line = match line {
        [rest @ .., CR] => rest,
        _ => line,
    };

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        if !line.is_empty() {
            trace!(len = line.len(), "Ignoring line without data prefix");
        }
        return None;
    };

    let payload = match std::str::from_utf8(payload) {
        Ok(text) => std::borrow::Cow::Borrowed(text),
        Err(err) => {
            warn!(error = %err, "Frame payload is not valid UTF-8, decoding lossily");
            String::from_utf8_lossy(payload)
        }
    };
    let payload = payload.trim();

    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(Frame::Done);
    }
    Some(Frame::Data(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI: &str = concat!(
        "data: {\"event_type\":\"message\",\"data\":\"第一段\"}\n",
        ": keep-alive comment\n",
        "\n",
        "data: {\"type\":\"content\",\"data\":{\"content\":\"héllo ✓\"}}\r\n",
        "event: ignored\n",
        "data: \n",
        "data: not json\n",
        "data:  [DONE] \n",
    );

    fn decode_all(chunks: &[&[u8]]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            decoder.feed_into(chunk, &mut frames);
        }
        assert_eq!(decoder.flush(), None);
        frames
    }

    #[test]
    fn decodes_prefixed_lines_only() {
        let frames = decode_all(&[MULTI.as_bytes()]);
        assert_eq!(
            frames,
            vec![
                Frame::Data("{\"event_type\":\"message\",\"data\":\"第一段\"}".to_string()),
                Frame::Data("{\"type\":\"content\",\"data\":{\"content\":\"héllo ✓\"}}".to_string()),
                Frame::Data("not json".to_string()),
                Frame::Done,
            ]
        );
    }

    #[test]
    fn split_at_every_offset_yields_identical_frames() {
        let bytes = MULTI.as_bytes();
        let expected = decode_all(&[bytes]);

        for offset in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(offset);
            assert_eq!(decode_all(&[head, tail]), expected, "split at {offset}");
        }
    }

    #[test]
    fn byte_at_a_time_yields_identical_frames() {
        let bytes = MULTI.as_bytes();
        let expected = decode_all(&[bytes]);
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&chunks), expected);
    }

    #[test]
    fn partial_frame_is_held_until_newline() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: {\"content\":\"Hel").is_empty());
        assert!(decoder.buffered_len() > 0);
        let frames = decoder.feed(b"lo\"}\n");
        assert_eq!(frames, vec![Frame::Data("{\"content\":\"Hello\"}".to_string())]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn flush_discards_trailing_partial_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"data: one\ndata: tw");
        assert_eq!(frames, vec![Frame::Data("one".to_string())]);
        assert_eq!(decoder.flush(), Some("data: tw".to_string()));
        assert_eq!(decoder.buffered_len(), 0);
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn strips_leading_bom_even_when_split() {
        let frames = decode_all(&[b"\xEF\xBB", b"\xBFdata: x\n"]);
        assert_eq!(frames, vec![Frame::Data("x".to_string())]);
    }

    #[test]
    fn invalid_utf8_degrades_to_replacement() {
        let frames = decode_all(&[b"data: ab\xFFcd\n"]);
        assert_eq!(frames, vec![Frame::Data("ab\u{FFFD}cd".to_string())]);
    }

    #[test]
    fn prefix_is_case_and_space_sensitive() {
        let frames = decode_all(&[b"data:nospace\nDATA: upper\n data: indented\n"]);
        assert!(frames.is_empty());
    }
}
