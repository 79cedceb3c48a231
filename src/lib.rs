//! # rdp-vchan-runtime
//!
//! Client-side RDP virtual channel runtime: transport adapter, channel
//! reassembly/dispatch, and a static/dynamic addin registry, with the
//! clipboard (MS-RDPECLIP) and USB redirection (MS-RDPEUSB/URBDRC)
//! protocol engines layered on top.
//!
//! # Architecture
//!
//! ```text
//! RuntimeSession
//!   ├─> VirtualChannelTransport (C1: open/close/write, connect/data events)
//!   ├─> Assembler + DispatchQueue (C2: fragment reassembly, per-channel dispatch)
//!   ├─> addin::Registry (C3: static/dynamic entry-point resolution)
//!   ├─> rdp_clipboard_channel::ClipboardChannel (C4: MS-RDPECLIP)
//!   └─> rdp_usb_redirect::UsbRedirectEngine (C5: MS-RDPEUSB/URBDRC)
//! ```
//!
//! The wire codecs for clipboard and USB redirection live in their own
//! crates ([`rdp_clipboard_core`]/[`rdp_clipboard_channel`] and
//! [`rdp_usb_redirect`]) so they can be reused without the channel
//! plumbing this crate adds around them.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Addin registry (C3): static and dynamically discovered entry points.
pub mod addin;

/// Channel assembly and dispatch (C2).
pub mod channel;

/// Runtime configuration.
pub mod config;

/// Top-level runtime error types.
pub mod error;

/// Session orchestration tying C1 through C5 together.
pub mod session;

/// Transport adapter (C1).
pub mod transport;

pub use error::{Result, RuntimeError};
pub use session::RuntimeSession;

/// Re-export of the clipboard wire codec crate.
pub use rdp_clipboard_core;

/// Re-export of the clipboard channel protocol engine crate.
pub use rdp_clipboard_channel;

/// Re-export of the USB redirection protocol engine crate.
pub use rdp_usb_redirect;
