//! The client-role clipboard protocol engine: message processing built on
//! [`ClipboardSession`]'s state machine and [`filter_format_list`].
//!
//! Application-visible events are queued and returned to the caller
//! rather than handled inline, and each PDU kind gets its own `on_*`
//! entry point instead of one large match. Events come back synchronously
//! (`Vec<ClipboardEvent>`) since this engine has no channel worker of its
//! own to hand them off to — the caller owns that queue.

use bytes::Bytes;
use rdp_clipboard_core::{
    constants::file_contents_flags, Capabilities, ClientTemporaryDirectory, ClipboardPdu, FileContentsRequest,
    FileContentsResponse, FormatDataRequest, FormatDataResponse, FormatList, FormatListResponse, GeneralCapabilitySet,
    GeneralFlags, LockDataId, MsgFlags,
};

use crate::error::{ClipboardError, Result};
use crate::filter::filter_format_list;
use crate::state::{ClientState, ClipboardSession, FeatureMask};

/// Application-visible effects of processing an inbound message. The
/// caller owns the actual clipboard (or file) contents; the engine only
/// tells it what to do and with what framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardEvent {
    /// The remote clipboard's advertised (and feature-mask-filtered)
    /// format list changed.
    RemoteFormatsChanged(FormatList),
    /// The peer wants this client's local-clipboard data for `format_id`.
    /// Answer with [`ClipboardEngine::respond_format_data`].
    FormatDataRequested { format_id: u32 },
    /// The peer answered this client's outstanding [`ClipboardEngine::request_format_data`].
    FormatDataReceived { format_id: u32, data: Bytes },
    /// The peer wants file contents. Answer with
    /// [`ClipboardEngine::respond_file_contents`].
    FileContentsRequested(FileContentsRequest),
    /// The peer answered an outstanding file-contents request.
    FileContentsReceived { stream_id: u32, data: Bytes },
    /// The peer locked a clip-data id (retain associated file state until unlocked).
    Locked(u32),
    /// The peer unlocked a previously locked clip-data id.
    Unlocked(u32),
}

/// One PDU queued for transmission, with the `msgFlags` it must be framed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// The message to send.
    pub pdu: ClipboardPdu,
    /// Flags to frame it with (usually empty; `RESPONSE_OK`/`RESPONSE_FAIL` for responses).
    pub flags: MsgFlags,
}

impl Outbound {
    fn new(pdu: ClipboardPdu) -> Self {
        Self { pdu, flags: MsgFlags::empty() }
    }

    fn ok(pdu: ClipboardPdu) -> Self {
        Self { pdu, flags: MsgFlags::RESPONSE_OK }
    }

    fn fail(pdu: ClipboardPdu) -> Self {
        Self { pdu, flags: MsgFlags::RESPONSE_FAIL }
    }
}

/// Drives one clipboard channel's client-role protocol, from channel
/// connect through to termination.
pub struct ClipboardEngine {
    session: ClipboardSession,
    desired: GeneralFlags,
    remote_formats: Option<FormatList>,
}

impl ClipboardEngine {
    /// Construct a fresh engine for a newly connected channel.
    pub fn new(feature_mask: FeatureMask, desired: GeneralFlags) -> Self {
        Self { session: ClipboardSession::new(feature_mask), desired, remote_formats: None }
    }

    /// Current protocol state and negotiated capabilities, for logging/diagnostics.
    pub fn session(&self) -> &ClipboardSession {
        &self.session
    }

    fn require_ready(&self, message: &'static str) -> Result<()> {
        if self.session.is_ready() {
            Ok(())
        } else {
            Err(ClipboardError::UnexpectedInState { message, state: state_name(self.session.state) })
        }
    }

    /// Process one inbound message, returning wire responses to send and
    /// application events to surface.
    pub fn handle_inbound(&mut self, pdu: ClipboardPdu) -> Result<(Vec<Outbound>, Vec<ClipboardEvent>)> {
        match pdu {
            ClipboardPdu::Capabilities(caps) => self.on_capabilities(caps),
            ClipboardPdu::MonitorReady => self.on_monitor_ready(),
            ClipboardPdu::FormatList(list) => self.on_format_list(list),
            ClipboardPdu::FormatListResponse(resp) => {
                if !resp.ok {
                    tracing::warn!("peer rejected our format list");
                }
                Ok((Vec::new(), Vec::new()))
            }
            ClipboardPdu::FormatDataRequest(req) => self.on_format_data_request(req),
            ClipboardPdu::FormatDataResponse(resp) => self.on_format_data_response(resp),
            ClipboardPdu::FileContentsRequest(req) => self.on_file_contents_request(req),
            ClipboardPdu::FileContentsResponse(resp) => self.on_file_contents_response(resp),
            ClipboardPdu::LockData(id) => {
                self.require_ready("LockData")?;
                self.session.locked_clip_data_ids.push(id.clip_data_id);
                Ok((Vec::new(), vec![ClipboardEvent::Locked(id.clip_data_id)]))
            }
            ClipboardPdu::UnlockData(id) => {
                self.require_ready("UnlockData")?;
                self.session.locked_clip_data_ids.retain(|&cid| cid != id.clip_data_id);
                Ok((Vec::new(), vec![ClipboardEvent::Unlocked(id.clip_data_id)]))
            }
            ClipboardPdu::TemporaryDirectory(_) => {
                // Client -> server only; a peer sending this to us is unusual
                // but harmless to ignore.
                Ok((Vec::new(), Vec::new()))
            }
        }
    }

    fn on_capabilities(&mut self, caps: Capabilities) -> Result<(Vec<Outbound>, Vec<ClipboardEvent>)> {
        self.session.state = self.session.state.on_capabilities();
        self.session.negotiated = self.desired.negotiate(caps.general.general_flags);
        let reply = Capabilities {
            general: GeneralCapabilitySet { version: caps.general.version, general_flags: self.session.negotiated },
        };
        Ok((vec![Outbound::new(ClipboardPdu::Capabilities(reply))], Vec::new()))
    }

    fn on_monitor_ready(&mut self) -> Result<(Vec<Outbound>, Vec<ClipboardEvent>)> {
        // No Capabilities seen: negotiated flags default to all-zero.
        self.session.state = self.session.state.on_monitor_ready();
        Ok((Vec::new(), Vec::new()))
    }

    fn on_format_list(&mut self, list: FormatList) -> Result<(Vec<Outbound>, Vec<ClipboardEvent>)> {
        self.require_ready("FormatList")?;
        let allow_data = self.session.feature_mask.contains(FeatureMask::REMOTE_TO_LOCAL);
        let allow_files = self.session.feature_mask.contains(FeatureMask::REMOTE_TO_LOCAL_FILES);
        match filter_format_list(&list, allow_data, allow_files) {
            Some(filtered) => {
                self.remote_formats = Some(filtered.clone());
                Ok((
                    vec![Outbound::ok(ClipboardPdu::FormatListResponse(FormatListResponse { ok: true }))],
                    vec![ClipboardEvent::RemoteFormatsChanged(filtered)],
                ))
            }
            None => {
                self.remote_formats = None;
                Ok((vec![Outbound::fail(ClipboardPdu::FormatListResponse(FormatListResponse { ok: false }))], Vec::new()))
            }
        }
    }

    fn on_format_data_request(&mut self, req: FormatDataRequest) -> Result<(Vec<Outbound>, Vec<ClipboardEvent>)> {
        self.require_ready("FormatDataRequest")?;
        if !self.session.feature_mask.contains(FeatureMask::LOCAL_TO_REMOTE) {
            return Ok((vec![Outbound::fail(ClipboardPdu::FormatDataResponse(FormatDataResponse::empty()))], Vec::new()));
        }
        Ok((Vec::new(), vec![ClipboardEvent::FormatDataRequested { format_id: req.requested_format_id }]))
    }

    fn on_format_data_response(&mut self, resp: FormatDataResponse) -> Result<(Vec<Outbound>, Vec<ClipboardEvent>)> {
        let format_id = self.session.last_requested_format_id.take().ok_or(ClipboardError::UnexpectedInState {
            message: "FormatDataResponse",
            state: "no outstanding request",
        })?;
        Ok((Vec::new(), vec![ClipboardEvent::FormatDataReceived { format_id, data: resp.data }]))
    }

    fn on_file_contents_request(&mut self, req: FileContentsRequest) -> Result<(Vec<Outbound>, Vec<ClipboardEvent>)> {
        self.require_ready("FileContentsRequest")?;
        if !self.session.feature_mask.contains(FeatureMask::LOCAL_TO_REMOTE_FILES) {
            return Ok((vec![Outbound::fail(ClipboardPdu::FileContentsResponse(FileContentsResponse::empty(req.stream_id)))], Vec::new()));
        }
        if req.dw_flags == file_contents_flags::RANGE
            && req.exceeds_non_huge_file_range()
            && !self.session.huge_file_support()
        {
            return Ok((vec![Outbound::fail(ClipboardPdu::FileContentsResponse(FileContentsResponse::empty(req.stream_id)))], Vec::new()));
        }
        Ok((Vec::new(), vec![ClipboardEvent::FileContentsRequested(req)]))
    }

    fn on_file_contents_response(&mut self, resp: FileContentsResponse) -> Result<(Vec<Outbound>, Vec<ClipboardEvent>)> {
        Ok((Vec::new(), vec![ClipboardEvent::FileContentsReceived { stream_id: resp.stream_id, data: resp.data }]))
    }

    /// Publish the client's local clipboard formats, filtered per the
    /// outbound feature mask. Call once the channel is `Ready`, and again
    /// whenever the local clipboard changes.
    pub fn publish_local_formats(&mut self, list: FormatList) -> Result<Vec<Outbound>> {
        self.require_ready("FormatList (outbound)")?;
        let allow_data = self.session.feature_mask.contains(FeatureMask::LOCAL_TO_REMOTE);
        let allow_files = self.session.feature_mask.contains(FeatureMask::LOCAL_TO_REMOTE_FILES);
        let filtered = filter_format_list(&list, allow_data, allow_files).unwrap_or(FormatList { entries: Vec::new() });
        self.session.initial_format_list_sent = true;
        Ok(vec![Outbound::new(ClipboardPdu::FormatList(filtered))])
    }

    /// Request `format_id`'s data from the remote clipboard. Rejected if
    /// another request is already outstanding, per this implementation's
    /// choice to serialize data requests per session (see `DESIGN.md`).
    pub fn request_format_data(&mut self, format_id: u32) -> Result<Outbound> {
        self.require_ready("FormatDataRequest (outbound)")?;
        if self.session.last_requested_format_id.is_some() {
            return Err(ClipboardError::UnexpectedInState { message: "FormatDataRequest (outbound)", state: "request already outstanding" });
        }
        self.session.last_requested_format_id = Some(format_id);
        Ok(Outbound::new(ClipboardPdu::FormatDataRequest(FormatDataRequest { requested_format_id: format_id })))
    }

    /// Answer a [`ClipboardEvent::FormatDataRequested`] with local data
    /// (`Some`) or a failure (`None`).
    pub fn respond_format_data(&self, data: Option<Bytes>) -> Outbound {
        match data {
            Some(data) => Outbound::ok(ClipboardPdu::FormatDataResponse(FormatDataResponse { data })),
            None => Outbound::fail(ClipboardPdu::FormatDataResponse(FormatDataResponse::empty())),
        }
    }

    /// Answer a [`ClipboardEvent::FileContentsRequested`] with file bytes
    /// (`Some`) or a failure (`None`).
    pub fn respond_file_contents(&self, stream_id: u32, data: Option<Bytes>) -> Outbound {
        match data {
            Some(data) => Outbound::ok(ClipboardPdu::FileContentsResponse(FileContentsResponse { stream_id, data })),
            None => Outbound::fail(ClipboardPdu::FileContentsResponse(FileContentsResponse::empty(stream_id))),
        }
    }

    /// Send the client's temporary-directory path, if this session cares to.
    pub fn announce_temp_directory(&self, path: impl Into<String>) -> Outbound {
        Outbound::new(ClipboardPdu::TemporaryDirectory(ClientTemporaryDirectory { path: path.into() }))
    }

    /// Lock or unlock a clip-data id, if locking was negotiated.
    pub fn lock(&self, clip_data_id: u32, lock: bool) -> Result<Outbound> {
        if !self.session.can_lock_clip_data() {
            return Err(ClipboardError::Capability("CAN_LOCK_CLIPDATA not negotiated".into()));
        }
        let id = LockDataId { clip_data_id };
        Ok(Outbound::new(if lock { ClipboardPdu::LockData(id) } else { ClipboardPdu::UnlockData(id) }))
    }

    /// Mark the channel torn down; further calls return `UnexpectedInState`.
    pub fn terminate(&mut self) {
        self.session.terminate();
    }
}

fn state_name(state: ClientState) -> &'static str {
    match state {
        ClientState::AwaitingCaps => "AwaitingCaps",
        ClientState::CapsReceived => "CapsReceived",
        ClientState::AwaitingMonitorReady => "AwaitingMonitorReady",
        ClientState::Ready => "Ready",
        ClientState::Terminated => "Terminated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdp_clipboard_core::FormatEntry;

    fn ready_engine(feature_mask: FeatureMask) -> ClipboardEngine {
        let mut engine = ClipboardEngine::new(feature_mask, GeneralFlags::all());
        engine.handle_inbound(ClipboardPdu::MonitorReady).unwrap();
        engine
    }

    #[test]
    fn capabilities_negotiate_as_and_of_desired_and_offered() {
        let mut engine = ClipboardEngine::new(FeatureMask::all(), GeneralFlags::USE_LONG_FORMAT_NAMES | GeneralFlags::HUGE_FILE_SUPPORT);
        let caps = Capabilities { general: GeneralCapabilitySet { version: 2, general_flags: GeneralFlags::USE_LONG_FORMAT_NAMES } };
        let (outbound, _) = engine.handle_inbound(ClipboardPdu::Capabilities(caps)).unwrap();
        assert_eq!(outbound.len(), 1);
        assert_eq!(engine.session().negotiated, GeneralFlags::USE_LONG_FORMAT_NAMES);
    }

    #[test]
    fn monitor_ready_without_capabilities_defaults_to_no_negotiated_flags() {
        let mut engine = ClipboardEngine::new(FeatureMask::all(), GeneralFlags::all());
        engine.handle_inbound(ClipboardPdu::MonitorReady).unwrap();
        assert!(engine.session().is_ready());
        assert_eq!(engine.session().negotiated, GeneralFlags::empty());
    }

    #[test]
    fn format_list_filtered_to_nothing_is_rejected() {
        let mut engine = ready_engine(FeatureMask::empty());
        let list = FormatList { entries: vec![FormatEntry::named(13, "CF_TEXT")] };
        let (outbound, events) = engine.handle_inbound(ClipboardPdu::FormatList(list)).unwrap();
        assert!(events.is_empty());
        match &outbound[0].pdu {
            ClipboardPdu::FormatListResponse(resp) => assert!(!resp.ok),
            _ => panic!("wrong pdu"),
        }
        assert!(outbound[0].flags.contains(MsgFlags::RESPONSE_FAIL));
    }

    #[test]
    fn format_list_accepted_emits_remote_formats_changed() {
        let mut engine = ready_engine(FeatureMask::all());
        let list = FormatList { entries: vec![FormatEntry::named(13, "CF_TEXT")] };
        let (outbound, events) = engine.handle_inbound(ClipboardPdu::FormatList(list.clone())).unwrap();
        assert!(matches!(&outbound[0].pdu, ClipboardPdu::FormatListResponse(resp) if resp.ok));
        assert_eq!(events, vec![ClipboardEvent::RemoteFormatsChanged(list)]);
    }

    #[test]
    fn overlapping_format_data_requests_are_rejected() {
        let mut engine = ready_engine(FeatureMask::all());
        engine.request_format_data(13).unwrap();
        assert!(engine.request_format_data(14).is_err());
    }

    #[test]
    fn format_data_response_without_outstanding_request_is_rejected() {
        let mut engine = ready_engine(FeatureMask::all());
        let resp = FormatDataResponse { data: Bytes::from_static(b"x") };
        assert!(engine.handle_inbound(ClipboardPdu::FormatDataResponse(resp)).is_err());
    }

    #[test]
    fn format_data_request_gated_by_feature_mask_fails_closed() {
        let mut engine = ready_engine(FeatureMask::REMOTE_TO_LOCAL);
        let req = FormatDataRequest { requested_format_id: 1 };
        let (outbound, events) = engine.handle_inbound(ClipboardPdu::FormatDataRequest(req)).unwrap();
        assert!(events.is_empty());
        assert!(matches!(&outbound[0].pdu, ClipboardPdu::FormatDataResponse(resp) if resp.data.is_empty()));
    }

    #[test]
    fn messages_before_ready_are_rejected() {
        let mut engine = ClipboardEngine::new(FeatureMask::all(), GeneralFlags::all());
        let list = FormatList { entries: vec![] };
        assert!(engine.handle_inbound(ClipboardPdu::FormatList(list)).is_err());
    }

    #[test]
    fn lock_without_negotiated_capability_is_rejected() {
        let engine = ready_engine(FeatureMask::all());
        assert!(engine.lock(1, true).is_err());
    }
}
