//! The CPDLC wire message.
//!
//! A [`Message`] is what travels in one wire frame: sender-assigned MIN,
//! optional MRN referencing the message being replied to, `FROM`/`TO`
//! callsigns, an optional logon payload, and one or more [`Segment`]s.
//! The routing daemon treats segments as opaque; the client-side thread
//! engine interprets them through the catalog.

use serde::{Deserialize, Serialize};

use crate::callsign::Callsign;
use crate::catalog::{self, types, Direction, MsgTypeId, TypeDef};
use crate::error::ModelError;

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// One element of a CPDLC message: a catalog type plus concrete arguments.
///
/// A single message can carry several segments (multi-element message);
/// all of them must share one direction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The catalog identifier, e.g. `UM20` or `DM62`.
    pub type_id: MsgTypeId,
    /// Concrete argument values filling the template placeholders.
    pub args: Vec<String>,
}

impl Segment {
    /// Create a new segment.
    pub fn new(type_id: MsgTypeId, args: Vec<String>) -> Self {
        Self { type_id, args }
    }

    /// Look up this segment's catalog entry.
    pub fn def(&self) -> Option<&'static TypeDef> {
        catalog::lookup(self.type_id)
    }

    /// Render this segment to human-readable text.
    pub fn render(&self) -> String {
        match self.def() {
            Some(def) => def.render(&self.args),
            None => format!("[UNKNOWN {}]", self.type_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A complete CPDLC message as carried by one wire frame.
///
/// # Examples
///
/// ```
/// use aerolink_models::{Message, Segment};
///
/// let msg = Message::with_segment(Segment::new(
///     "UM20".parse().unwrap(),
///     vec!["FL350".to_string()],
/// ));
/// assert_eq!(msg.render(), "CLIMB TO FL350");
/// assert!(!msg.is_logon());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Message Identification Number, assigned by the sender. `None` until
    /// the sending engine numbers the message.
    pub min: Option<u32>,
    /// Message Reference Number — the MIN of the message being replied to.
    /// `None` for an initiating message.
    pub mrn: Option<u32>,
    /// Originating callsign. The daemon overwrites this with the callsign
    /// bound to the sending connection.
    pub from: Option<Callsign>,
    /// Destination callsign. May be omitted when the connection has a bound
    /// peer.
    pub to: Option<Callsign>,
    /// Logon payload; `Some` marks this as a logon message.
    pub logon: Option<String>,
    /// The message elements.
    pub segments: Vec<Segment>,
}

impl Message {
    /// A message consisting of a single segment.
    pub fn with_segment(segment: Segment) -> Self {
        Self {
            segments: vec![segment],
            ..Self::default()
        }
    }

    /// A logon message declaring our own callsign and the intended peer.
    pub fn logon(payload: impl Into<String>, from: Callsign, to: Option<Callsign>) -> Self {
        Self {
            from: Some(from),
            to,
            logon: Some(payload.into()),
            ..Self::default()
        }
    }

    /// Synthesize an error reply for a failed message.
    ///
    /// The error travels opposite to the offender: a downlink (or unknown)
    /// offender gets a `UM159 ERROR`, an uplink offender gets a `DM62
    /// ERROR`. The offender's MIN, when present, is echoed in the reply's
    /// MRN so the recipient can correlate it.
    pub fn error_reply(offender: Option<&Message>, text: impl Into<String>) -> Self {
        let offender_dir = offender.and_then(|m| m.direction());
        let type_id = match offender_dir {
            Some(Direction::Uplink) => types::DM62_ERROR,
            _ => types::UM159_ERROR,
        };
        Self {
            mrn: offender.and_then(|m| m.min),
            segments: vec![Segment::new(type_id, vec![text.into()])],
            ..Self::default()
        }
    }

    /// `true` when this is a logon message.
    pub fn is_logon(&self) -> bool {
        self.logon.is_some()
    }

    /// Direction of this message, derived from its first segment.
    /// `None` for segment-less (logon-only) messages.
    pub fn direction(&self) -> Option<Direction> {
        self.segments.first().map(|s| s.type_id.dir)
    }

    /// Smallest non-zero reply timeout over all segments, in seconds;
    /// 0 when no segment carries a timeout.
    pub fn min_timeout_secs(&self) -> u32 {
        self.segments
            .iter()
            .filter_map(|s| s.def())
            .map(|d| d.timeout_secs)
            .filter(|&t| t != 0)
            .min()
            .unwrap_or(0)
    }

    /// Render all segments to a single human-readable string, separated by
    /// ` / ` for multi-element messages.
    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.render())
            .collect::<Vec<_>>()
            .join(" / ")
    }

    /// Check the structural invariants: every segment resolves in the
    /// catalog, all segments share one direction, and a non-logon message
    /// carries at least one segment.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.segments.is_empty() && !self.is_logon() {
            return Err(ModelError::NoSegments);
        }
        let mut dir = None;
        for seg in &self.segments {
            if seg.def().is_none() {
                return Err(ModelError::UnknownMessageType {
                    id: seg.type_id.to_string(),
                });
            }
            match dir {
                None => dir = Some(seg.type_id.dir),
                Some(d) if d != seg.type_id.dir => return Err(ModelError::MixedDirections),
                Some(_) => {}
            }
        }
        Ok(())
    }
}
