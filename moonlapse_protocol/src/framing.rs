// Length-prefixed message framing.
//
// A frame is three fields back to back, in the fixed order sender, header,
// body. Each field is `<decimal length>|<bytes>`:
//
//     15|127.0.0.1:50412 3|SAY 13|Hello, world!      (spaces for reading only)
//
// There is no overall frame length, no terminator, no version marker and no
// checksum; the end of the body is the end of the frame. Lengths are UTF-8
// byte counts written in decimal with no sign and no leading zeros.
//
// Two ways to find frame boundaries in a byte stream (`FramingMode`):
// - `PerRead`: every transport read is taken to be exactly one frame. Short
//   reads are malformed, trailing bytes are ignored. This caps a message at
//   one read buffer.
// - `Buffered`: reads are appended to a `FrameBuffer`, and complete frames
//   are peeled off the front as they arrive. A partial frame just waits.
//
// Both use the same field parser. It distinguishes "cannot ever be valid"
// (`FrameError::MalformedFrame`) from "valid so far, need more bytes"
// (`Parse::Incomplete`); strict decoding turns the latter into the former.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Separates a field's length prefix from its bytes.
pub const DELIMITER: u8 = b'|';

/// Default upper bound on a single field when buffering. Stops a bogus
/// length prefix from making a connection buffer without limit.
pub const DEFAULT_MAX_FIELD_LEN: usize = 1024 * 1024;

/// Errors from decoding a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The bytes are not a frame: a length prefix is missing or not
    /// numeric, the delimiter is absent, or a field runs past the buffer.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
}

impl FrameError {
    pub fn reason(&self) -> &'static str {
        match self {
            FrameError::MalformedFrame(reason) => *reason,
        }
    }
}

/// How a byte stream is cut into frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramingMode {
    /// Accumulate bytes and decode every complete frame.
    #[default]
    Buffered,
    /// One transport read is one frame.
    PerRead,
}

impl fmt::Display for FramingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingMode::Buffered => f.write_str("buffered"),
            FramingMode::PerRead => f.write_str("per-read"),
        }
    }
}

impl FromStr for FramingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buffered" => Ok(FramingMode::Buffered),
            "per-read" | "per_read" => Ok(FramingMode::PerRead),
            other => Err(format!(
                "unknown framing mode `{other}` (expected `buffered` or `per-read`)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode the three fields of a frame.
pub fn encode(sender: &str, header: &str, body: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(sender.len() + header.len() + body.len() + 12);
    for field in [sender, header, body] {
        push_field(&mut out, field);
    }
    out
}

/// Encode a `Message`.
pub fn encode_message(msg: &Message) -> Vec<u8> {
    encode(&msg.sender, &msg.header, &msg.body)
}

fn push_field(out: &mut Vec<u8>, field: &str) {
    out.extend_from_slice(field.len().to_string().as_bytes());
    out.push(DELIMITER);
    out.extend_from_slice(field.as_bytes());
}

/// Encode `msg` and write it as a single frame, then flush.
pub fn write_frame<W: Write>(writer: &mut W, msg: &Message) -> io::Result<()> {
    writer.write_all(&encode_message(msg))?;
    writer.flush()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode exactly one frame from `buf`, treating the end of `buf` as the
/// end of the input. Bytes after the body are ignored.
pub fn decode(buf: &[u8]) -> Result<Message, FrameError> {
    decode_frame(buf).map(|(msg, _)| msg)
}

/// Like `decode`, but also returns how many bytes the frame occupied.
pub fn decode_frame(buf: &[u8]) -> Result<(Message, usize), FrameError> {
    match parse_frame(buf, usize::MAX)? {
        Parse::Complete(msg, consumed) => Ok((msg, consumed)),
        Parse::Incomplete(reason) => Err(FrameError::MalformedFrame(reason)),
    }
}

enum Parse<T> {
    Complete(T, usize),
    /// Valid so far but the buffer ended. Carries what a strict decoder
    /// should report.
    Incomplete(&'static str),
}

fn parse_frame(buf: &[u8], max_field_len: usize) -> Result<Parse<Message>, FrameError> {
    let mut pos = 0;
    let mut fields: [String; 3] = Default::default();
    for slot in &mut fields {
        match parse_field(buf, pos, max_field_len)? {
            Parse::Complete(text, next) => {
                *slot = text;
                pos = next;
            }
            Parse::Incomplete(reason) => return Ok(Parse::Incomplete(reason)),
        }
    }
    let [sender, header, body] = fields;
    Ok(Parse::Complete(Message { sender, header, body }, pos))
}

/// Parse one `<len>|<bytes>` field starting at `start`. On success returns
/// the text and the position just past it.
fn parse_field(
    buf: &[u8],
    start: usize,
    max_field_len: usize,
) -> Result<Parse<String>, FrameError> {
    let rest = &buf[start..];
    // A length wider than the cap's own decimal form can never fit, even if
    // it is all zeros; stop counting there.
    let max_digits = decimal_width(max_field_len);
    let digits = rest
        .iter()
        .take(max_digits + 1)
        .take_while(|b| b.is_ascii_digit())
        .count();

    if digits == 0 {
        if rest.is_empty() {
            return Ok(Parse::Incomplete("length missing"));
        }
        return Err(FrameError::MalformedFrame("length missing"));
    }
    if digits > max_digits {
        return Err(FrameError::MalformedFrame("field exceeds maximum size"));
    }

    let len = parse_length(&rest[..digits])?;
    if len > max_field_len {
        return Err(FrameError::MalformedFrame("field exceeds maximum size"));
    }

    match rest.get(digits) {
        None => return Ok(Parse::Incomplete("missing delimiter")),
        Some(&DELIMITER) => {}
        Some(_) => return Err(FrameError::MalformedFrame("missing delimiter")),
    }

    let field_start = digits + 1;
    let Some(bytes) = field_start
        .checked_add(len)
        .and_then(|end| rest.get(field_start..end))
    else {
        return Ok(Parse::Incomplete("field exceeds remaining buffer"));
    };
    let text = std::str::from_utf8(bytes)
        .map_err(|_| FrameError::MalformedFrame("field is not valid UTF-8"))?;

    Ok(Parse::Complete(text.to_owned(), start + field_start + len))
}

fn decimal_width(n: usize) -> usize {
    n.checked_ilog10().map_or(1, |log| log as usize + 1)
}

fn parse_length(digits: &[u8]) -> Result<usize, FrameError> {
    digits.iter().try_fold(0usize, |acc, d| {
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(usize::from(d - b'0')))
            .ok_or(FrameError::MalformedFrame("length out of range"))
    })
}

// ---------------------------------------------------------------------------
// Stream decoding
// ---------------------------------------------------------------------------

/// Accumulates stream bytes and yields complete frames in arrival order.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_field_len: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FIELD_LEN)
    }
}

impl FrameBuffer {
    pub fn new(max_field_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_field_len,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame off the front of the buffer. `Ok(None)`
    /// means more bytes are needed. After an error the buffer contents are
    /// unspecified; the stream should be abandoned.
    pub fn next_frame(&mut self) -> Result<Option<Message>, FrameError> {
        match parse_frame(&self.buf, self.max_field_len)? {
            Parse::Complete(msg, consumed) => {
                self.buf.drain(..consumed);
                Ok(Some(msg))
            }
            Parse::Incomplete(_) => Ok(None),
        }
    }

    /// Bytes of a partial frame still waiting for the rest.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Turns transport reads into messages according to a `FramingMode`.
#[derive(Debug)]
pub struct FrameDecoder {
    mode: FramingMode,
    buffer: FrameBuffer,
}

impl FrameDecoder {
    pub fn new(mode: FramingMode, max_field_len: usize) -> Self {
        Self {
            mode,
            buffer: FrameBuffer::new(max_field_len),
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Feed the bytes of one read. Returns every message completed by it,
    /// in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Message>, FrameError> {
        match self.mode {
            FramingMode::PerRead => {
                match parse_frame(chunk, self.buffer.max_field_len)? {
                    Parse::Complete(msg, _) => Ok(vec![msg]),
                    Parse::Incomplete(reason) => Err(FrameError::MalformedFrame(reason)),
                }
            }
            FramingMode::Buffered => {
                self.buffer.extend(chunk);
                let mut out = Vec::new();
                while let Some(msg) = self.buffer.next_frame()? {
                    out.push(msg);
                }
                Ok(out)
            }
        }
    }

    /// Bytes held back waiting for the rest of a frame. Always zero in
    /// `PerRead` mode.
    pub fn pending(&self) -> usize {
        self.buffer.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn malformed(reason: &'static str) -> FrameError {
        FrameError::MalformedFrame(reason)
    }

    #[test]
    fn encode_matches_wire_layout() {
        let bytes = encode("10.1.1.10:4552", "SAY", "Hello, world!");
        assert_eq!(bytes, b"14|10.1.1.10:45523|SAY13|Hello, world!".to_vec());
    }

    #[test]
    fn roundtrip_simple_message() {
        let msg = Message::say("127.0.0.1:8081", "hi");
        assert_eq!(decode(&encode_message(&msg)).unwrap(), msg);
    }

    #[test]
    fn roundtrip_empty_fields() {
        let bytes = encode("", "", "");
        assert_eq!(bytes, b"0|0|0|".to_vec());
        assert_eq!(decode(&bytes).unwrap(), Message::new("", "", ""));
    }

    #[test]
    fn body_may_contain_delimiters_and_digits() {
        let msg = Message::new("a", "SAY", "12|34|not a frame|");
        assert_eq!(decode(&encode_message(&msg)).unwrap(), msg);
    }

    #[test]
    fn lengths_count_utf8_bytes() {
        let msg = Message::say("elf", "héllo 🌲");
        let bytes = encode_message(&msg);
        assert!(bytes.starts_with(b"3|elf3|SAY11|"));
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn decode_reports_consumed_and_ignores_trailing_bytes() {
        let mut bytes = encode("a", "b", "c");
        let frame_len = bytes.len();
        bytes.extend_from_slice(b"garbage");
        let (msg, consumed) = decode_frame(&bytes).unwrap();
        assert_eq!(msg, Message::new("a", "b", "c"));
        assert_eq!(consumed, frame_len);
    }

    #[test]
    fn non_digit_length_is_malformed() {
        assert_eq!(decode(b"x|abc3|SAY2|hi"), Err(malformed("length missing")));
        assert_eq!(decode(b"1|a3|SAYhi"), Err(malformed("length missing")));
    }

    #[test]
    fn empty_buffer_is_malformed() {
        assert_eq!(decode(b""), Err(malformed("length missing")));
    }

    #[test]
    fn missing_delimiter_is_malformed() {
        assert_eq!(decode(b"3abc3|SAY2|hi"), Err(malformed("missing delimiter")));
        assert_eq!(decode(b"12"), Err(malformed("missing delimiter")));
    }

    #[test]
    fn declared_length_past_end_is_malformed() {
        assert_eq!(
            decode(b"1|a3|SAY50|short"),
            Err(malformed("field exceeds remaining buffer"))
        );
    }

    #[test]
    fn truncated_after_header_is_malformed() {
        assert_eq!(decode(b"1|a3|SAY"), Err(malformed("length missing")));
    }

    #[test]
    fn huge_length_is_out_of_range() {
        let bytes = b"99999999999999999999|x";
        assert_eq!(decode(bytes), Err(malformed("length out of range")));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let bytes = b"1|\xff3|SAY2|hi";
        assert_eq!(decode(bytes), Err(malformed("field is not valid UTF-8")));
    }

    #[test]
    fn error_displays_reason() {
        let err = malformed("length missing");
        assert_eq!(err.to_string(), "malformed frame: length missing");
        assert_eq!(err.reason(), "length missing");
    }

    #[test]
    fn write_frame_writes_one_encoded_frame() {
        let msg = Message::say("me", "yo");
        let mut out = Vec::new();
        write_frame(&mut out, &msg).unwrap();
        assert_eq!(out, encode_message(&msg));
    }

    #[test]
    fn frame_buffer_waits_for_split_frame() {
        let bytes = encode("peer", "SAY", "split across reads");
        let mut fb = FrameBuffer::default();

        for (i, byte) in bytes.iter().enumerate() {
            fb.extend(std::slice::from_ref(byte));
            let next = fb.next_frame().unwrap();
            if i + 1 < bytes.len() {
                assert_eq!(next, None, "frame completed early at byte {i}");
            } else {
                assert_eq!(next, Some(Message::new("peer", "SAY", "split across reads")));
            }
        }
        assert!(fb.is_empty());
    }

    #[test]
    fn frame_buffer_yields_coalesced_frames_in_order() {
        let mut bytes = encode("a", "SAY", "first");
        bytes.extend(encode("a", "SAY", "second"));
        bytes.extend(b"1|a3|SA");

        let mut fb = FrameBuffer::default();
        fb.extend(&bytes);
        assert_eq!(fb.next_frame().unwrap().unwrap().body, "first");
        assert_eq!(fb.next_frame().unwrap().unwrap().body, "second");
        assert_eq!(fb.next_frame().unwrap(), None);
        assert_eq!(fb.pending(), 7);
    }

    #[test]
    fn frame_buffer_rejects_garbage_without_waiting() {
        let mut fb = FrameBuffer::default();
        fb.extend(b"hello");
        assert_eq!(fb.next_frame(), Err(malformed("length missing")));
    }

    #[test]
    fn frame_buffer_enforces_max_field_len_before_bytes_arrive() {
        let mut fb = FrameBuffer::new(16);
        fb.extend(b"17");
        assert_eq!(fb.next_frame(), Err(malformed("field exceeds maximum size")));
    }

    #[test]
    fn frame_buffer_rejects_zero_padded_length_run() {
        let mut fb = FrameBuffer::new(16);
        for _ in 0..64 {
            fb.extend(&[b'0'; 1024]);
        }
        assert_eq!(fb.next_frame(), Err(malformed("field exceeds maximum size")));
    }

    #[test]
    fn frame_buffer_accepts_length_as_wide_as_cap() {
        let mut fb = FrameBuffer::new(16);
        fb.extend(b"00|");
        assert_eq!(fb.next_frame(), Ok(None));
        fb.extend(b"3|SAY02|hi");
        assert_eq!(fb.next_frame(), Ok(Some(Message::say("", "hi"))));
        assert!(fb.is_empty());
    }

    #[test]
    fn decoder_reports_its_mode() {
        assert_eq!(
            FrameDecoder::new(FramingMode::PerRead, 16).mode(),
            FramingMode::PerRead
        );
        assert_eq!(
            FrameDecoder::new(FramingMode::default(), 16).mode(),
            FramingMode::Buffered
        );
    }

    #[test]
    fn per_read_decoder_treats_each_chunk_as_one_frame() {
        let mut dec = FrameDecoder::new(FramingMode::PerRead, DEFAULT_MAX_FIELD_LEN);
        let bytes = encode("a", "SAY", "whole");
        assert_eq!(dec.feed(&bytes).unwrap(), vec![Message::say("a", "whole")]);

        let half = &bytes[..bytes.len() / 2];
        assert!(dec.feed(half).is_err());
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn buffered_decoder_reassembles_across_feeds() {
        let mut dec = FrameDecoder::new(FramingMode::Buffered, DEFAULT_MAX_FIELD_LEN);
        let mut bytes = encode("a", "SAY", "one");
        bytes.extend(encode("b", "SAY", "two"));
        let (left, right) = bytes.split_at(5);

        assert!(dec.feed(left).unwrap().is_empty());
        assert_eq!(dec.pending(), 5);
        let got = dec.feed(right).unwrap();
        assert_eq!(got, vec![Message::say("a", "one"), Message::say("b", "two")]);
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn framing_mode_parses_cli_spellings() {
        assert_eq!("buffered".parse::<FramingMode>(), Ok(FramingMode::Buffered));
        assert_eq!("per-read".parse::<FramingMode>(), Ok(FramingMode::PerRead));
        assert!("lines".parse::<FramingMode>().is_err());
        assert_eq!(FramingMode::PerRead.to_string(), "per-read");
    }
}
