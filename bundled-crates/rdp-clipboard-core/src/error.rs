//! Codec error type.

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while decoding or encoding a clipboard PDU.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes remained in the buffer than the field being read needs.
    #[error("truncated {field}: need {needed} bytes, have {available}")]
    Truncated {
        /// Name of the field being decoded.
        field: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
    /// `dataLen` in the header exceeds the remaining buffer length.
    #[error("declared data length {declared} exceeds remaining buffer of {remaining} bytes")]
    LengthMismatch {
        /// Declared `dataLen`.
        declared: u32,
        /// Bytes actually remaining.
        remaining: usize,
    },
    /// An unrecognized `msgType` was encountered.
    #[error("unknown message type {0:#06x}")]
    UnknownMessageType(u16),
    /// A capability set other than GENERAL (1) was received.
    #[error("unsupported capability set type {0:#06x}")]
    UnsupportedCapabilitySet(u16),
    /// A malformed or inconsistent field value.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}
