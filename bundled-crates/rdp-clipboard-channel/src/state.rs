//! Clipboard session state and the client-role state machine.

use bitflags::bitflags;
use rdp_clipboard_core::GeneralFlags;

bitflags! {
    /// Gates which directions of clipboard traffic the engine will act
    /// on. Mirrors the root runtime's `ClipboardFeatureMask` bit-for-bit;
    /// kept as an independent type so this crate has no dependency on the
    /// binary crate's configuration types.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureMask: u32 {
        /// Allow server -> client data requests for any format.
        const REMOTE_TO_LOCAL = 0x01;
        /// Allow server -> client file-contents requests.
        const REMOTE_TO_LOCAL_FILES = 0x02;
        /// Allow client -> server data.
        const LOCAL_TO_REMOTE = 0x04;
        /// Allow client -> server file-contents.
        const LOCAL_TO_REMOTE_FILES = 0x08;
    }
}

/// Client-role connection state.
///
/// `AwaitingCaps` is this implementation's sole initial state; it doubles
/// as `AwaitingMonitorReady` for the purpose of the `MonitorReady`
/// transition below, since no wire difference exists between "haven't
/// seen Capabilities yet" and "don't expect to see one" until either
/// message actually arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// Initial state: no Capabilities or MonitorReady seen yet.
    #[default]
    AwaitingCaps,
    /// Capabilities received; waiting for MonitorReady.
    CapsReceived,
    /// Reserved alias of `AwaitingCaps` reached if a future revision
    /// distinguishes "explicitly skipped caps" from "haven't decided yet".
    AwaitingMonitorReady,
    /// Handshake complete; all data flows are valid.
    Ready,
    /// The channel has been torn down; no further transitions occur.
    Terminated,
}

impl ClientState {
    /// Apply the `Capabilities` PDU transition: valid from any state.
    pub fn on_capabilities(self) -> Self {
        match self {
            ClientState::Terminated => ClientState::Terminated,
            _ => ClientState::CapsReceived,
        }
    }

    /// Apply the `MonitorReady` PDU transition: valid from
    /// `CapsReceived`, `AwaitingCaps`, or `AwaitingMonitorReady`.
    pub fn on_monitor_ready(self) -> Self {
        match self {
            ClientState::CapsReceived | ClientState::AwaitingCaps | ClientState::AwaitingMonitorReady => {
                ClientState::Ready
            }
            other => other,
        }
    }

    /// True once the handshake has completed and data flows are valid.
    pub fn is_ready(self) -> bool {
        matches!(self, ClientState::Ready)
    }
}

/// Per-channel clipboard session. Created on channel-connected, destroyed
/// on channel-terminated; fields are single-threaded by construction
/// (only the channel's own worker touches them).
#[derive(Debug, Clone)]
pub struct ClipboardSession {
    /// Client-role state machine.
    pub state: ClientState,
    /// Negotiated general flags (AND of client desire, server offer).
    pub negotiated: GeneralFlags,
    /// Whether the client has sent its one-time initial format list.
    pub initial_format_list_sent: bool,
    /// Format id of the most recent outstanding `FormatDataRequest`.
    pub last_requested_format_id: Option<u32>,
    /// Direction gating.
    pub feature_mask: FeatureMask,
    /// Locked clip-data ids currently held open by the peer.
    pub locked_clip_data_ids: Vec<u32>,
}

impl ClipboardSession {
    /// Construct a fresh session for a newly connected channel.
    pub fn new(feature_mask: FeatureMask) -> Self {
        Self {
            state: ClientState::default(),
            negotiated: GeneralFlags::empty(),
            initial_format_list_sent: false,
            last_requested_format_id: None,
            feature_mask,
            locked_clip_data_ids: Vec::new(),
        }
    }

    /// Whether long format names are in effect for this session.
    pub fn use_long_format_names(&self) -> bool {
        self.negotiated.contains(GeneralFlags::USE_LONG_FORMAT_NAMES)
    }

    /// Whether file streaming is enabled.
    pub fn stream_file_clip_enabled(&self) -> bool {
        self.negotiated.contains(GeneralFlags::STREAM_FILECLIP_ENABLED)
    }

    /// Whether locking is in effect.
    pub fn can_lock_clip_data(&self) -> bool {
        self.negotiated.contains(GeneralFlags::CAN_LOCK_CLIPDATA)
    }

    /// Whether huge-file support is in effect.
    pub fn huge_file_support(&self) -> bool {
        self.negotiated.contains(GeneralFlags::HUGE_FILE_SUPPORT)
    }

    /// Mark the channel as torn down; pending reassembly and queue state
    /// are freed by the caller, this only stops further transitions.
    pub fn terminate(&mut self) {
        self.state = ClientState::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_then_monitor_ready_reaches_ready() {
        let mut state = ClientState::default();
        state = state.on_capabilities();
        assert_eq!(state, ClientState::CapsReceived);
        state = state.on_monitor_ready();
        assert_eq!(state, ClientState::Ready);
    }

    #[test]
    fn monitor_ready_without_caps_reaches_ready() {
        let state = ClientState::default().on_monitor_ready();
        assert_eq!(state, ClientState::Ready);
    }

    #[test]
    fn terminated_is_sticky() {
        let mut state = ClientState::Ready;
        state = ClientState::Terminated;
        assert_eq!(state.on_capabilities(), ClientState::Terminated);
        assert_eq!(state.on_monitor_ready(), ClientState::Terminated);
    }
}
