//! Static catalog of CPDLC message types.
//!
//! Operational messages are described by a registry of [`TypeDef`]s taken
//! from the ICAO uplink/downlink reference tables. Each entry carries the
//! display template, the response class that governs dialogue closure, and
//! the reply timeout. The registry is consulted by the wire codec (segment
//! validation), by the client-side thread engine (status state machine) and
//! by front-ends (rendering).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Whether a message element is an uplink (ATC → aircraft) or a downlink
/// (aircraft → ATC).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// ATC → aircraft (UM).
    Uplink,
    /// Aircraft → ATC (DM).
    Downlink,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Uplink => Direction::Downlink,
            Direction::Downlink => Direction::Uplink,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Uplink => write!(f, "UM"),
            Direction::Downlink => write!(f, "DM"),
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseClass
// ---------------------------------------------------------------------------

/// What kind of reply a message expects from its recipient.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseClass {
    /// No response required.
    None,
    /// A reply carrying the requested data is required.
    Y,
    /// Wilco / Unable.
    WU,
    /// Affirm / Negative.
    AN,
    /// No reply expected, but an acknowledgement is.
    NE,
}

impl ResponseClass {
    /// `true` when any reply at all is expected by the sender.
    pub fn expects_reply(self) -> bool {
        !matches!(self, ResponseClass::None)
    }
}

// ---------------------------------------------------------------------------
// MsgTypeId
// ---------------------------------------------------------------------------

/// Identifier of one catalog entry: direction plus numeric code.
///
/// Renders as the familiar ICAO identifier (`"UM20"`, `"DM62"`) and parses
/// back from it.
///
/// # Examples
///
/// ```
/// use aerolink_models::{Direction, MsgTypeId};
///
/// let id: MsgTypeId = "UM20".parse().unwrap();
/// assert_eq!(id, MsgTypeId::new(Direction::Uplink, 20));
/// assert_eq!(id.to_string(), "UM20");
/// assert!(!id.is_downlink());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct MsgTypeId {
    /// Message direction (UM or DM).
    pub dir: Direction,
    /// Numeric code within the direction's table.
    pub code: u16,
}

impl MsgTypeId {
    /// Construct an identifier from direction and code.
    pub const fn new(dir: Direction, code: u16) -> Self {
        Self { dir, code }
    }

    /// `true` for DM (aircraft → ATC) types.
    pub fn is_downlink(self) -> bool {
        self.dir == Direction::Downlink
    }
}

impl fmt::Display for MsgTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dir, self.code)
    }
}

impl FromStr for MsgTypeId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ModelError::UnknownMessageType { id: s.to_string() };
        let (dir, digits) = if let Some(rest) = s.strip_prefix("UM") {
            (Direction::Uplink, rest)
        } else if let Some(rest) = s.strip_prefix("DM") {
            (Direction::Downlink, rest)
        } else {
            return Err(unknown());
        };
        let code: u16 = digits.parse().map_err(|_| unknown())?;
        Ok(Self { dir, code })
    }
}

impl TryFrom<String> for MsgTypeId {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MsgTypeId> for String {
    fn from(id: MsgTypeId) -> Self {
        id.to_string()
    }
}

/// Well-known type identifiers referenced by name in the thread-engine
/// state machine.
pub mod types {
    use super::{Direction::*, MsgTypeId};

    /// UM0 UNABLE.
    pub const UM0_UNABLE: MsgTypeId = MsgTypeId::new(Uplink, 0);
    /// UM1 STANDBY.
    pub const UM1_STANDBY: MsgTypeId = MsgTypeId::new(Uplink, 1);
    /// UM3 ROGER.
    pub const UM3_ROGER: MsgTypeId = MsgTypeId::new(Uplink, 3);
    /// UM4 AFFIRM.
    pub const UM4_AFFIRM: MsgTypeId = MsgTypeId::new(Uplink, 4);
    /// UM5 NEGATIVE.
    pub const UM5_NEGATIVE: MsgTypeId = MsgTypeId::new(Uplink, 5);
    /// UM159 ERROR.
    pub const UM159_ERROR: MsgTypeId = MsgTypeId::new(Uplink, 159);
    /// UM160 NEXT DATA AUTHORITY.
    pub const UM160_NEXT_DATA_AUTHORITY: MsgTypeId = MsgTypeId::new(Uplink, 160);
    /// UM161 END SERVICE.
    pub const UM161_END_SERVICE: MsgTypeId = MsgTypeId::new(Uplink, 161);
    /// UM168 DISREGARD.
    pub const UM168_DISREGARD: MsgTypeId = MsgTypeId::new(Uplink, 168);

    /// DM0 WILCO.
    pub const DM0_WILCO: MsgTypeId = MsgTypeId::new(Downlink, 0);
    /// DM1 UNABLE.
    pub const DM1_UNABLE: MsgTypeId = MsgTypeId::new(Downlink, 1);
    /// DM2 STANDBY.
    pub const DM2_STANDBY: MsgTypeId = MsgTypeId::new(Downlink, 2);
    /// DM3 ROGER.
    pub const DM3_ROGER: MsgTypeId = MsgTypeId::new(Downlink, 3);
    /// DM4 AFFIRM.
    pub const DM4_AFFIRM: MsgTypeId = MsgTypeId::new(Downlink, 4);
    /// DM5 NEGATIVE.
    pub const DM5_NEGATIVE: MsgTypeId = MsgTypeId::new(Downlink, 5);
    /// DM62 ERROR.
    pub const DM62_ERROR: MsgTypeId = MsgTypeId::new(Downlink, 62);
}

// ---------------------------------------------------------------------------
// TypeDef & registry
// ---------------------------------------------------------------------------

/// Static description of one CPDLC message type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Direction + numeric code.
    pub id: MsgTypeId,
    /// Human-readable template with `[placeholder]` argument slots.
    pub template: &'static str,
    /// What kind of reply this message expects.
    pub response: ResponseClass,
    /// Reply timeout in seconds; 0 means no timeout applies.
    pub timeout_secs: u32,
}

impl TypeDef {
    /// Render the template by substituting `[…]` placeholders with the
    /// given arguments in order. Placeholders beyond the argument list are
    /// left as-is.
    pub fn render(&self, args: &[String]) -> String {
        let mut result = self.template.to_string();
        for arg in args {
            if let Some(start) = result.find('[') {
                if let Some(end) = result[start..].find(']') {
                    result.replace_range(start..start + end + 1, arg);
                }
            }
        }
        result
    }
}

/// Look up a [`TypeDef`] by its identifier.
pub fn lookup(id: MsgTypeId) -> Option<&'static TypeDef> {
    CATALOG.iter().find(|d| d.id == id)
}

macro_rules! def {
    ($id:literal, $template:literal, $resp:ident, $timeout:literal) => {
        TypeDef {
            id: parse_id($id),
            template: $template,
            response: ResponseClass::$resp,
            timeout_secs: $timeout,
        }
    };
}

const fn parse_id(s: &str) -> MsgTypeId {
    // const-friendly "UMnnn"/"DMnnn" parser for registry literals
    let bytes = s.as_bytes();
    let dir = match bytes[0] {
        b'U' => Direction::Uplink,
        _ => Direction::Downlink,
    };
    let mut code: u16 = 0;
    let mut i = 2;
    while i < bytes.len() {
        code = code * 10 + (bytes[i] - b'0') as u16;
        i += 1;
    }
    MsgTypeId { dir, code }
}

/// The complete message-type registry.
///
/// Response classes and templates follow the ICAO reference tables; the
/// reply timeout for W/U and A/N uplinks defaults to 300 seconds.
pub static CATALOG: &[TypeDef] = &[
    // ── Uplink: responses and link management ───────────────────────
    def!("UM0",   "UNABLE",                                       None, 0),
    def!("UM1",   "STANDBY",                                      None, 0),
    def!("UM3",   "ROGER",                                        None, 0),
    def!("UM4",   "AFFIRM",                                       None, 0),
    def!("UM5",   "NEGATIVE",                                     None, 0),
    def!("UM159", "ERROR [error information]",                    None, 0),
    def!("UM160", "NEXT DATA AUTHORITY [facility designation]",   None, 0),
    def!("UM161", "END SERVICE",                                  None, 0),
    def!("UM168", "DISREGARD",                                    None, 0),
    def!("UM169", "[free text]",                                  NE,   0),

    // ── Uplink: vertical clearances ─────────────────────────────────
    def!("UM19",  "MAINTAIN [level]",                             WU, 300),
    def!("UM20",  "CLIMB TO [level]",                             WU, 300),
    def!("UM23",  "DESCEND TO [level]",                           WU, 300),
    def!("UM26",  "CLIMB TO REACH [level] BY [time]",             WU, 300),
    def!("UM28",  "DESCEND TO REACH [level] BY [time]",           WU, 300),

    // ── Uplink: crossing constraints and route ──────────────────────
    def!("UM46",  "CROSS [position] AT [level]",                  WU, 300),
    def!("UM51",  "CROSS [position] AT [time]",                   WU, 300),
    def!("UM74",  "PROCEED DIRECT TO [position]",                 WU, 300),
    def!("UM79",  "CLEARED TO [position] VIA [route clearance]",  WU, 300),
    def!("UM80",  "CLEARED [route clearance]",                    WU, 300),

    // ── Uplink: heading, speed, contact, surveillance ───────────────
    def!("UM94",  "TURN [direction] HEADING [degrees]",           WU, 300),
    def!("UM96",  "CONTINUE PRESENT HEADING",                     WU, 300),
    def!("UM106", "MAINTAIN [speed]",                             WU, 300),
    def!("UM117", "CONTACT [unit name] [frequency]",              WU, 300),
    def!("UM120", "MONITOR [unit name] [frequency]",              WU, 300),
    def!("UM123", "SQUAWK [code]",                                WU, 300),
    def!("UM133", "REPORT PRESENT LEVEL",                         Y,    0),
    def!("UM135", "CONFIRM ASSIGNED LEVEL",                       Y,    0),
    def!("UM148", "WHEN CAN YOU ACCEPT [level]",                  Y,    0),
    def!("UM149", "CAN YOU ACCEPT [level] AT [position]",         AN, 300),
    def!("UM183", "[free text]",                                  WU, 300),

    // ── Downlink: responses ─────────────────────────────────────────
    def!("DM0",   "WILCO",                                        None, 0),
    def!("DM1",   "UNABLE",                                       None, 0),
    def!("DM2",   "STANDBY",                                      None, 0),
    def!("DM3",   "ROGER",                                        None, 0),
    def!("DM4",   "AFFIRM",                                       None, 0),
    def!("DM5",   "NEGATIVE",                                     None, 0),
    def!("DM62",  "ERROR [error information]",                    None, 0),
    def!("DM63",  "NOT CURRENT DATA AUTHORITY",                   None, 0),

    // ── Downlink: pilot requests ────────────────────────────────────
    def!("DM6",   "REQUEST [level]",                              Y, 300),
    def!("DM9",   "REQUEST CLIMB TO [level]",                     Y, 300),
    def!("DM10",  "REQUEST DESCENT TO [level]",                   Y, 300),
    def!("DM18",  "REQUEST [speed]",                              Y, 300),
    def!("DM20",  "REQUEST VOICE CONTACT",                        Y, 300),
    def!("DM22",  "REQUEST DIRECT TO [position]",                 Y, 300),
    def!("DM25",  "REQUEST CLEARANCE",                            Y, 300),
    def!("DM27",  "REQUEST WEATHER DEVIATION UP TO [distance] [direction] OF ROUTE", Y, 300),
    def!("DM49",  "WHEN CAN WE EXPECT [speed]",                   Y, 300),
    def!("DM51",  "WHEN CAN WE EXPECT BACK ON ROUTE",             Y, 300),
    def!("DM52",  "WHEN CAN WE EXPECT LOWER LEVEL",               Y, 300),
    def!("DM53",  "WHEN CAN WE EXPECT HIGHER LEVEL",              Y, 300),
    def!("DM54",  "WHEN CAN WE EXPECT CRUISE CLIMB TO [level]",   Y, 300),
    def!("DM70",  "REQUEST HEADING [degrees]",                    Y, 300),
    def!("DM71",  "REQUEST GROUND TRACK [degrees]",               Y, 300),

    // ── Downlink: reports and free text ─────────────────────────────
    def!("DM65",  "DUE TO WEATHER",                               None, 0),
    def!("DM66",  "DUE TO AIRCRAFT PERFORMANCE",                  None, 0),
    def!("DM67",  "[free text]",                                  None, 0),
];
