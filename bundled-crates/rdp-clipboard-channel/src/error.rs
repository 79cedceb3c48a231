//! Errors raised by the clipboard channel engine.

use rdp_clipboard_core::CodecError;
use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, ClipboardError>;

/// Errors the clipboard engine can raise while processing a message.
/// Every variant here is recoverable: the caller logs it and the channel
/// stays open, matching the wire-format layer's "discard and continue"
/// policy.
#[derive(Error, Debug)]
pub enum ClipboardError {
    /// The underlying PDU failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A message arrived that is not valid in the engine's current state.
    #[error("{message:?} is not valid in state {state:?}")]
    UnexpectedInState {
        /// Debug-formatted message kind.
        message: &'static str,
        /// Debug-formatted current state.
        state: &'static str,
    },
    /// A capability set other than GENERAL was offered (surfaced
    /// separately from [`ClipboardError::Codec`] so the caller can log
    /// the channel name alongside it).
    #[error("unsupported capability negotiation: {0}")]
    Capability(String),
}
