//! Textual wire codec.
//!
//! One message per newline-terminated frame of printable 7-bit ASCII.
//! `KEY=VALUE` fields separated by `/`:
//!
//! ```text
//! PKT=CPDLC/MIN=4/MRN=2/FROM=AFR1234/TO=LFPG/MSG=DM62 TIMEDOUT
//! ```
//!
//! - `PKT=CPDLC` is the mandatory leading field.
//! - `LOGON=<payload>` marks a logon message.
//! - Each `MSG=` field is one segment: the type identifier followed by
//!   space-separated, percent-escaped arguments.
//!
//! [`encode`] and [`decode`] round-trip: any frame produced by the encoder
//! is accepted by the decoder and yields an equal message. [`FrameDecoder`]
//! adds stream buffering and enforces the ASCII-only rule on ingest.

use crate::error::{DecodeError, ModelError};
use crate::message::{Message, Segment};

/// Bytes that must be percent-escaped inside field values: the escape
/// character itself, the field and argument separators, and everything
/// outside the printable 7-bit range.
fn needs_escape(b: u8) -> bool {
    b == b'%' || b == b'/' || b == b'=' || b == b' ' || !(0x21..=0x7e).contains(&b)
}

fn escape_into(out: &mut String, value: &str) {
    for &b in value.as_bytes() {
        if needs_escape(b) {
            out.push('%');
            out.push_str(&format!("{b:02X}"));
        } else {
            out.push(b as char);
        }
    }
}

fn unescape(text: &str) -> Result<String, DecodeError> {
    let bad = || DecodeError::BadEscape {
        text: text.to_string(),
    };
    let mut bytes = Vec::with_capacity(text.len());
    let mut iter = text.bytes();
    while let Some(b) = iter.next() {
        if b == b'%' {
            let hi = iter.next().ok_or_else(bad)?;
            let lo = iter.next().ok_or_else(bad)?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).map_err(|_| bad())?;
            bytes.push(u8::from_str_radix(hex, 16).map_err(|_| bad())?);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).map_err(|_| bad())
}

// ---------------------------------------------------------------------------
// encode
// ---------------------------------------------------------------------------

/// Encode a message into one newline-terminated wire frame.
///
/// Fields are emitted in a canonical order so that encoding is
/// deterministic. Fails if the message violates its structural invariants
/// (unknown segment type, mixed directions, segment-less non-logon).
pub fn encode(msg: &Message) -> Result<String, ModelError> {
    msg.validate()?;

    let mut out = String::from("PKT=CPDLC");
    if let Some(logon) = &msg.logon {
        out.push_str("/LOGON=");
        escape_into(&mut out, logon);
    }
    if let Some(min) = msg.min {
        out.push_str(&format!("/MIN={min}"));
    }
    if let Some(mrn) = msg.mrn {
        out.push_str(&format!("/MRN={mrn}"));
    }
    if let Some(from) = &msg.from {
        out.push_str(&format!("/FROM={from}"));
    }
    if let Some(to) = &msg.to {
        out.push_str(&format!("/TO={to}"));
    }
    for seg in &msg.segments {
        out.push_str(&format!("/MSG={}", seg.type_id));
        for arg in &seg.args {
            out.push(' ');
            escape_into(&mut out, arg);
        }
    }
    out.push('\n');
    Ok(out)
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

/// Decode one message from the head of `buf`.
///
/// Returns the decoded message and the number of bytes consumed. When no
/// complete frame is buffered yet, returns `(None, n)` where `n` counts
/// only skipped blank bytes — callers keep the remainder and retry once
/// more input arrives.
pub fn decode(buf: &[u8]) -> Result<(Option<Message>, usize), DecodeError> {
    let skipped = buf
        .iter()
        .take_while(|&&b| b == b'\n' || b == b'\r')
        .count();
    let rest = &buf[skipped..];

    let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
        return Ok((None, skipped));
    };
    let line = &rest[..nl];
    let consumed = skipped + nl + 1;

    if let Some(&byte) = line.iter().find(|&&b| b == 0 || b > 127) {
        return Err(DecodeError::NonAscii { byte });
    }
    // Frame content is pure ASCII at this point.
    let line = std::str::from_utf8(line).expect("ASCII checked above");
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut fields = line.split('/');
    if fields.next() != Some("PKT=CPDLC") {
        return Err(DecodeError::MissingPacketMarker);
    }

    let mut msg = Message::default();
    for field in fields {
        let Some((key, value)) = field.split_once('=') else {
            return Err(DecodeError::MalformedField {
                field: field.to_string(),
            });
        };
        match key {
            "LOGON" => {
                if msg.logon.is_some() {
                    return Err(DecodeError::DuplicateField { key: "LOGON" });
                }
                msg.logon = Some(unescape(value)?);
            }
            "MIN" => {
                if msg.min.is_some() {
                    return Err(DecodeError::DuplicateField { key: "MIN" });
                }
                msg.min = Some(parse_seq("MIN", value)?);
            }
            "MRN" => {
                if msg.mrn.is_some() {
                    return Err(DecodeError::DuplicateField { key: "MRN" });
                }
                msg.mrn = Some(parse_seq("MRN", value)?);
            }
            "FROM" => {
                if msg.from.is_some() {
                    return Err(DecodeError::DuplicateField { key: "FROM" });
                }
                msg.from = Some(value.parse().map_err(ModelError::from)?);
            }
            "TO" => {
                if msg.to.is_some() {
                    return Err(DecodeError::DuplicateField { key: "TO" });
                }
                msg.to = Some(value.parse().map_err(ModelError::from)?);
            }
            "MSG" => {
                msg.segments.push(parse_segment(value)?);
            }
            _ => {
                return Err(DecodeError::MalformedField {
                    field: field.to_string(),
                });
            }
        }
    }

    msg.validate()?;
    Ok((Some(msg), consumed))
}

fn parse_seq(key: &'static str, value: &str) -> Result<u32, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

fn parse_segment(value: &str) -> Result<Segment, DecodeError> {
    let mut tokens = value.split(' ');
    let id_token = tokens.next().unwrap_or("");
    let type_id = id_token.parse().map_err(ModelError::from)?;
    let args = tokens.map(unescape).collect::<Result<Vec<_>, _>>()?;
    Ok(Segment::new(type_id, args))
}

// ---------------------------------------------------------------------------
// FrameDecoder
// ---------------------------------------------------------------------------

/// Buffering decoder for a byte stream.
///
/// Owns the read buffer, rejects non-ASCII bytes on ingest, and yields
/// complete messages as they become available. Callers enforce input-size
/// caps against [`buffered_len`](Self::buffered_len).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the stream.
    ///
    /// Fails on any byte of value 0 or above 127; the connection carrying
    /// such input must be torn down.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        if let Some(&byte) = bytes.iter().find(|&&b| b == 0 || b > 127) {
            return Err(DecodeError::NonAscii { byte });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Number of bytes currently buffered.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<Message>, DecodeError> {
        let (msg, consumed) = decode(&self.buf)?;
        if consumed > 0 {
            self.buf.drain(..consumed);
        }
        Ok(msg)
    }
}
