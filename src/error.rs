//! Top-level runtime error types.
//!
//! Covers the channel error kinds a virtual-channel entry point can raise:
//! `NoMemory`, `InvalidData`, `BadProc`, `InternalError`, `NoDevice`,
//! `Timeout`, `NotSupported`. Recoverable kinds (`InvalidData`, `BadProc`,
//! per-request failures) are reported to the caller and leave the channel
//! open; fatal kinds (`NoMemory` on critical structures, transport close)
//! propagate up through `anyhow` at the orchestration boundary and close
//! the channel.

use thiserror::Error;

/// Result type used throughout the runtime crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Runtime-wide error kinds, shared by the transport, assembler and addin
/// registry. Protocol engines (clipboard, USB) define their own narrower
/// error types and convert into this one at the session boundary.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Allocation failure. Always fatal for the enclosing operation;
    /// partial state must be freed by the caller before propagating this.
    #[error("out of memory")]
    NoMemory,

    /// Wire-format violation. The offending PDU is discarded; the channel
    /// stays open.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Unknown opcode or capability-set type. The channel continues; a
    /// warning is logged by the caller.
    #[error("unsupported procedure: {0}")]
    BadProc(String),

    /// Unexpected failure in a lower layer (transport write, host stack).
    #[error("internal error: {0}")]
    Internal(String),

    /// No channel is currently open with this name.
    #[error("channel not open: {0}")]
    ChannelNotOpen(String),

    /// A channel with this name is already open.
    #[error("channel already open: {0}")]
    ChannelAlreadyOpen(String),

    /// The transport reported a non-OK status on write or open.
    #[error("transport error: {0}")]
    Transport(String),

    /// No addin could be resolved for the requested (name, subsystem, kind).
    #[error("no addin found for channel {channel:?} subsystem {subsystem:?}")]
    AddinNotFound {
        /// Channel name that was searched for.
        channel: String,
        /// Subsystem name that was searched for, if any.
        subsystem: Option<String>,
    },
}

impl RuntimeError {
    /// True for errors that close the channel and free its state; false
    /// for errors that are reported but leave the channel open.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::NoMemory | RuntimeError::ChannelNotOpen(_) | RuntimeError::Transport(_)
        )
    }
}
