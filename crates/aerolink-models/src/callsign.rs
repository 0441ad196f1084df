//! Station callsigns.
//!
//! A [`Callsign`] identifies one station on the network — an aircraft
//! (e.g. `"AFR1234"`) or an ATC facility (e.g. `"LFPG"`). Callsigns travel
//! in the `FROM=` and `TO=` headers of every wire frame and key the
//! daemon's connection index.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Maximum callsign length in bytes.
pub const CALLSIGN_MAX_LEN: usize = 15;

/// A validated station callsign.
///
/// 1–15 bytes of printable 7-bit ASCII, excluding the characters that
/// structure the wire format (`/`, `=`, space).
///
/// # Examples
///
/// ```
/// use aerolink_models::Callsign;
///
/// let cs: Callsign = "AFR1234".parse().unwrap();
/// assert_eq!(cs.as_str(), "AFR1234");
/// assert_eq!(cs.to_string(), "AFR1234");
///
/// assert!("".parse::<Callsign>().is_err());
/// assert!("WAY/TOO/LONG/CALLSIGN".parse::<Callsign>().is_err());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Callsign(String);

impl Callsign {
    /// Return the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ModelError> {
        let fail = |reason: &str| ModelError::InvalidCallsign {
            value: s.to_string(),
            reason: reason.to_string(),
        };
        if s.is_empty() {
            return Err(fail("must not be empty"));
        }
        if s.len() > CALLSIGN_MAX_LEN {
            return Err(fail("must be at most 15 bytes"));
        }
        if !s
            .bytes()
            .all(|b| (0x21..=0x7e).contains(&b) && b != b'/' && b != b'=')
        {
            return Err(fail("must be printable ASCII without '/', '=' or spaces"));
        }
        Ok(())
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Callsign {
    type Error = ModelError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Callsign {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl FromStr for Callsign {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl From<Callsign> for String {
    fn from(cs: Callsign) -> Self {
        cs.0
    }
}
