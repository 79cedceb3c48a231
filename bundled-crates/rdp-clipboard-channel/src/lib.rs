//! Client-role clipboard virtual channel protocol engine (MS-RDPECLIP).
//!
//! [`rdp_clipboard_core`] owns the wire codec; this crate adds the
//! connection state machine ([`state`]), feature-mask filtering
//! ([`filter`]), and the message-processing engine ([`engine`]) that ties
//! them together for one channel's lifetime.

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod filter;
pub mod state;

use bytes::Bytes;
use rdp_clipboard_core::{ClipboardPdu, NameEncoding};

pub use engine::{ClipboardEngine, ClipboardEvent, Outbound};
pub use error::{ClipboardError, Result};
pub use state::{ClientState, ClipboardSession, FeatureMask};

/// One clipboard virtual channel's full lifetime: decodes inbound bytes,
/// drives [`ClipboardEngine`], and re-encodes outbound PDUs, so callers
/// only ever see bytes in and bytes out.
pub struct ClipboardChannel {
    engine: ClipboardEngine,
}

impl ClipboardChannel {
    /// Construct a channel for a newly connected dynamic virtual channel.
    pub fn new(feature_mask: FeatureMask, desired: rdp_clipboard_core::GeneralFlags) -> Self {
        Self { engine: ClipboardEngine::new(feature_mask, desired) }
    }

    /// The engine driving this channel, for direct access to
    /// [`ClipboardEngine::publish_local_formats`] and friends.
    pub fn engine(&mut self) -> &mut ClipboardEngine {
        &mut self.engine
    }

    fn name_encoding(&self) -> NameEncoding {
        if self.engine.session().use_long_format_names() {
            NameEncoding::Long
        } else {
            NameEncoding::Short
        }
    }

    /// Decode and process one inbound message, returning the encoded
    /// bytes of every wire response plus the application events raised.
    pub fn handle_bytes(&mut self, mut src: Bytes) -> Result<(Vec<Bytes>, Vec<ClipboardEvent>)> {
        let name_encoding = self.name_encoding();
        let (pdu, _flags) = ClipboardPdu::decode(&mut src, name_encoding)?;
        rdp_clipboard_core::skip_trailing_padding(&mut src);
        let (outbound, events) = self.engine.handle_inbound(pdu)?;
        let encoded = outbound.into_iter().map(|out| out.pdu.encode(out.flags, name_encoding)).collect();
        Ok((encoded, events))
    }

    /// Encode one outbound response for the wire, using this channel's
    /// currently negotiated name encoding.
    pub fn encode(&self, outbound: Outbound) -> Bytes {
        outbound.pdu.encode(outbound.flags, self.name_encoding())
    }

    /// Mark the channel torn down.
    pub fn terminate(&mut self) {
        self.engine.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdp_clipboard_core::{Capabilities, FormatEntry, FormatList, GeneralCapabilitySet, GeneralFlags, MsgFlags};

    fn handshake(channel: &mut ClipboardChannel) {
        let caps = Capabilities { general: GeneralCapabilitySet { version: 2, general_flags: GeneralFlags::empty() } };
        let encoded = ClipboardPdu::Capabilities(caps).encode(MsgFlags::empty(), NameEncoding::Long);
        channel.handle_bytes(encoded).unwrap();
        let encoded = ClipboardPdu::MonitorReady.encode(MsgFlags::empty(), NameEncoding::Long);
        channel.handle_bytes(encoded).unwrap();
    }

    #[test]
    fn clipboard_handshake_defaults_path() {
        let mut channel = ClipboardChannel::new(FeatureMask::all(), GeneralFlags::all());
        handshake(&mut channel);
        assert!(channel.engine().session().is_ready());
    }

    #[test]
    fn short_format_list_round_trip_when_long_names_not_negotiated() {
        let mut channel = ClipboardChannel::new(FeatureMask::all(), GeneralFlags::empty());
        handshake(&mut channel);
        assert!(!channel.engine().session().use_long_format_names());

        let list = FormatList { entries: vec![FormatEntry::named(13, "CF_TEXT")] };
        let encoded = ClipboardPdu::FormatList(list.clone()).encode(MsgFlags::empty(), NameEncoding::Short);
        let (responses, events) = channel.handle_bytes(encoded).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(events, vec![ClipboardEvent::RemoteFormatsChanged(list)]);
    }

    #[test]
    fn feature_mask_filters_file_group_descriptor_out_of_remote_list() {
        let mut channel = ClipboardChannel::new(FeatureMask::REMOTE_TO_LOCAL, GeneralFlags::all());
        handshake(&mut channel);

        let list = FormatList {
            entries: vec![FormatEntry::named(13, "CF_TEXT"), FormatEntry::named(49, "FileGroupDescriptorW")],
        };
        let encoded = ClipboardPdu::FormatList(list).encode(MsgFlags::empty(), NameEncoding::Long);
        let (_responses, events) = channel.handle_bytes(encoded).unwrap();
        match &events[0] {
            ClipboardEvent::RemoteFormatsChanged(filtered) => {
                assert_eq!(filtered.entries.len(), 1);
                assert_eq!(filtered.entries[0].format_name.as_deref(), Some("CF_TEXT"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
