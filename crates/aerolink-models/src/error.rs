//! Error types for the `aerolink-models` crate.
//!
//! Fallible constructors and `TryFrom` implementations return [`ModelError`];
//! the wire decoder returns [`DecodeError`].

/// Errors produced when constructing or validating model types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A callsign was empty, too long, or contained invalid characters.
    #[error("invalid callsign \"{value}\": {reason}")]
    InvalidCallsign {
        /// The value that failed validation.
        value: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// A message-type identifier did not resolve in the catalog.
    #[error("unknown message type \"{id}\"")]
    UnknownMessageType {
        /// The identifier that failed to resolve (e.g. `"UM999"`).
        id: String,
    },

    /// A message mixed uplink and downlink segments.
    #[error("message mixes uplink and downlink segments")]
    MixedDirections,

    /// A non-logon message carried no segments.
    #[error("non-logon message must carry at least one segment")]
    NoSegments,
}

/// Errors produced while decoding a wire frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A byte of value 0 or greater than 127 appeared in the input stream.
    #[error("non-ASCII byte 0x{byte:02x} in input stream")]
    NonAscii {
        /// The offending byte.
        byte: u8,
    },

    /// The frame did not start with the `PKT=CPDLC` marker.
    #[error("frame missing PKT=CPDLC marker")]
    MissingPacketMarker,

    /// A field was not of `KEY=VALUE` form or its key was unknown.
    #[error("malformed field \"{field}\"")]
    MalformedField {
        /// The raw field text.
        field: String,
    },

    /// A header field appeared more than once.
    #[error("duplicate {key}= field")]
    DuplicateField {
        /// The repeated key.
        key: &'static str,
    },

    /// A numeric field failed to parse.
    #[error("invalid {key}= value \"{value}\"")]
    InvalidNumber {
        /// The field key.
        key: &'static str,
        /// The raw value text.
        value: String,
    },

    /// A percent-escape sequence was truncated or not hexadecimal.
    #[error("invalid percent-escape in \"{text}\"")]
    BadEscape {
        /// The text containing the broken escape.
        text: String,
    },

    /// A model-level validation failed while assembling the message.
    #[error(transparent)]
    Model(#[from] ModelError),
}
