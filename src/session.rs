//! Session orchestration.
//!
//! Wires the transport adapter (C1), channel assembler/dispatch (C2) and
//! addin registry (C3) together with the clipboard (C4) and USB
//! redirection (C5) protocol engines: a single orchestrating struct built
//! once from [`Config`], holding an `Arc` to each subsystem it owns.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use rdp_clipboard_channel::{ClipboardChannel, ClipboardEvent, FeatureMask as ClipboardFeatureMask};
use rdp_clipboard_core::GeneralFlags;
use rdp_usb_redirect::config::UsbConfig as RedirectUsbConfig;
use rdp_usb_redirect::host::UsbHostStack;
use rdp_usb_redirect::{MessageHeader, UsbRedirectEngine};
use tracing::{debug, info, warn};

use crate::addin::Registry;
use crate::channel::{Assembler, DispatchQueue};
use crate::config::{ClipboardFeatureMask as ConfigClipboardFeatureMask, Config, DesiredCaps};
use crate::error::{Result, RuntimeError};
use crate::transport::{ChannelFlags, ChannelHandle, TransportEvent, VirtualChannelTransport};

const CLIPRDR_CHANNEL: &str = "cliprdr";
const URBDRC_CHANNEL: &str = "urbdrc";

fn map_clipboard_feature_mask(mask: ConfigClipboardFeatureMask) -> ClipboardFeatureMask {
    ClipboardFeatureMask::from_bits_truncate(mask.bits())
}

fn map_desired_caps(caps: DesiredCaps) -> GeneralFlags {
    let mut flags = GeneralFlags::empty();
    if caps.long_format_names {
        flags |= GeneralFlags::USE_LONG_FORMAT_NAMES;
    }
    if caps.stream_file_clip {
        flags |= GeneralFlags::STREAM_FILECLIP_ENABLED;
    }
    if caps.file_clip_no_file_paths {
        flags |= GeneralFlags::FILECLIP_NO_FILE_PATHS;
    }
    if caps.can_lock_clip_data {
        flags |= GeneralFlags::CAN_LOCK_CLIPDATA;
    }
    if caps.huge_file_support {
        flags |= GeneralFlags::HUGE_FILE_SUPPORT;
    }
    flags
}

fn map_usb_config(usb: &crate::config::UsbConfig) -> RedirectUsbConfig {
    RedirectUsbConfig {
        auto_add: usb.auto_add.clone(),
        class_filter: rdp_usb_redirect::config::UsbClassFilter { denied_classes: usb.class_filter.denied_classes.clone() },
        teardown_retry_ticks: usb.teardown_retry_ticks,
    }
}

struct OpenChannel {
    handle: ChannelHandle,
    assembler: Assembler,
    /// Attached once the owning [`RuntimeSession`] exists, since the
    /// queue's handler closure needs a [`Weak`] reference back to it.
    queue: Option<DispatchQueue>,
}

/// Every channel name known to this session, open or not, mapped to its
/// transport handle and fragment-reassembly state.
struct ChannelTable {
    by_name: HashMap<String, OpenChannel>,
    name_by_handle: HashMap<ChannelHandle, String>,
}

impl ChannelTable {
    fn new() -> Self {
        Self { by_name: HashMap::new(), name_by_handle: HashMap::new() }
    }

    fn insert(&mut self, name: String, handle: ChannelHandle) {
        self.name_by_handle.insert(handle, name.clone());
        self.by_name.insert(name, OpenChannel { handle, assembler: Assembler::new(), queue: None });
    }
}

/// A single RDP client session's virtual-channel runtime: owns the
/// transport, the channel table, the addin registry, and the clipboard
/// and USB protocol engines layered on top of it.
pub struct RuntimeSession<T: VirtualChannelTransport> {
    transport: Arc<T>,
    #[allow(dead_code)]
    registry: Arc<Registry>,
    init_handle: u32,
    channels: Mutex<ChannelTable>,
    clipboard: Mutex<Option<ClipboardChannel>>,
    usb: Option<Arc<UsbRedirectEngine>>,
    on_clipboard_event: Box<dyn Fn(ClipboardEvent) + Send + Sync>,
}

impl<T: VirtualChannelTransport> RuntimeSession<T> {
    /// Open every channel named in `config.channels.definitions`, and
    /// construct the clipboard/USB engines for the ones this runtime
    /// recognizes (`cliprdr`, `urbdrc`). Channels with other names are
    /// opened (so the transport and addin registry agree on what is live)
    /// but otherwise left for the embedder to drive directly.
    ///
    /// Each channel gets its own [`DispatchQueue`]: a worker task per
    /// channel when `config.channels.disable_threads` is `false`
    /// (mirroring FreeRDP's one-OS-thread-per-channel model), or inline
    /// delivery on the calling task when it is `true`.
    pub fn new(
        transport: Arc<T>,
        config: &Config,
        registry: Arc<Registry>,
        usb_host: Option<Arc<dyn UsbHostStack>>,
        init_handle: u32,
        on_clipboard_event: impl Fn(ClipboardEvent) + Send + Sync + 'static,
    ) -> Result<Arc<Self>> {
        let mut channels = ChannelTable::new();
        for def in &config.channels.definitions {
            let handle = transport.open(init_handle, &def.name)?;
            channels.insert(def.name.clone(), handle);
        }

        let clipboard = if channels.by_name.contains_key(CLIPRDR_CHANNEL) {
            let feature_mask = map_clipboard_feature_mask(config.clipboard.feature_mask);
            let desired = map_desired_caps(config.clipboard.desired_caps);
            Some(ClipboardChannel::new(feature_mask, desired))
        } else {
            None
        };

        let usb = if channels.by_name.contains_key(URBDRC_CHANNEL) {
            let host = usb_host.ok_or_else(|| {
                RuntimeError::Internal("urbdrc channel configured but no USB host stack was supplied".into())
            })?;
            Some(UsbRedirectEngine::new(host, map_usb_config(&config.usb)))
        } else {
            None
        };

        let names: Vec<String> = channels.by_name.keys().cloned().collect();
        let session = Arc::new(Self {
            transport,
            registry,
            init_handle,
            channels: Mutex::new(channels),
            clipboard: Mutex::new(clipboard),
            usb,
            on_clipboard_event: Box::new(on_clipboard_event),
        });

        let disable_threads = config.channels.disable_threads;
        for name in names {
            let weak: Weak<Self> = Arc::downgrade(&session);
            let queue_name = name.clone();
            // The channel's handle is fixed at open time, so it's captured
            // here rather than looked up from `channels` inside the
            // handler: `feed_fragment` holds that lock while posting to an
            // inline queue, and `parking_lot::Mutex` isn't reentrant.
            let handle = session.channels.lock().by_name.get(&name).expect("name was just inserted").handle;
            let handler = move |message: Bytes| {
                let Some(session) = weak.upgrade() else { return };
                if let Err(err) = session.dispatch_message(&queue_name, handle, message) {
                    warn!(channel = %queue_name, %err, "dispatch failed");
                }
            };
            let queue = if disable_threads { DispatchQueue::inline(handler) } else { DispatchQueue::spawn_threaded(handler) };
            let mut channels = session.channels.lock();
            channels.by_name.get_mut(&name).expect("name was just inserted").queue = Some(queue);
        }

        Ok(session)
    }

    /// This session's init-handle, echoed on every channel it opened.
    pub fn init_handle(&self) -> u32 {
        self.init_handle
    }

    /// The USB redirect engine, if the `urbdrc` channel is configured.
    pub fn usb(&self) -> Option<&Arc<UsbRedirectEngine>> {
        self.usb.as_ref()
    }

    /// Feed one transport event through reassembly and, on a complete
    /// message, dispatch it to the owning protocol engine.
    pub fn handle_transport_event(&self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Connected { handle, data } => {
                info!(%handle, len = data.len(), "channel connected");
                Ok(())
            }
            TransportEvent::DataReceived { handle, data, total_length, flags } => {
                self.feed_fragment(handle, &data, total_length, flags)
            }
        }
    }

    fn feed_fragment(&self, handle: ChannelHandle, data: &[u8], total_length: usize, flags: ChannelFlags) -> Result<()> {
        let mut channels = self.channels.lock();
        let Some(name) = channels.name_by_handle.get(&handle).cloned() else {
            return Err(RuntimeError::ChannelNotOpen(handle.to_string()));
        };
        let open = channels.by_name.get_mut(&name).expect("name_by_handle and by_name agree");
        let whole = open
            .assembler
            .feed(data, total_length, flags)
            .map_err(|err| RuntimeError::InvalidData(err.to_string()))?;
        let Some(whole) = whole else { return Ok(()) };
        // Take the queue out and post outside the lock: an inline queue
        // dispatches synchronously, and dispatch must not re-enter
        // `channels` while this guard is held.
        let mut queue = open.queue.take().expect("queue attached for every open channel");
        drop(channels);
        queue.post_message(whole);
        self.channels.lock().by_name.get_mut(&name).expect("channel still open").queue = Some(queue);
        Ok(())
    }

    /// Dispatch one whole, reassembled message to the protocol engine that
    /// owns `name`'s channel. Invoked from each channel's [`DispatchQueue`]
    /// worker (or inline, if threading is disabled for this session).
    fn dispatch_message(&self, name: &str, handle: ChannelHandle, whole: Bytes) -> Result<()> {
        match name {
            CLIPRDR_CHANNEL => self.dispatch_cliprdr(handle, whole),
            URBDRC_CHANNEL => self.dispatch_urbdrc_control(handle, whole),
            other => {
                debug!(channel = other, "no protocol engine registered for this channel name");
                Ok(())
            }
        }
    }

    fn dispatch_cliprdr(&self, handle: ChannelHandle, whole: Bytes) -> Result<()> {
        let mut guard = self.clipboard.lock();
        let Some(channel) = guard.as_mut() else {
            return Err(RuntimeError::ChannelNotOpen(CLIPRDR_CHANNEL.into()));
        };
        let (responses, events) = channel
            .handle_bytes(whole)
            .map_err(|err| RuntimeError::InvalidData(err.to_string()))?;
        drop(guard);

        for event in events {
            (self.on_clipboard_event)(event);
        }
        for response in responses {
            self.write(handle, response)?;
        }
        Ok(())
    }

    /// Route one whole message arriving on the `urbdrc` control channel.
    fn dispatch_urbdrc_control(&self, handle: ChannelHandle, whole: Bytes) -> Result<()> {
        let Some(usb) = &self.usb else {
            return Err(RuntimeError::ChannelNotOpen(URBDRC_CHANNEL.into()));
        };
        let mut cursor = &whole[..];
        let header =
            MessageHeader::decode(&mut cursor).map_err(|err| RuntimeError::InvalidData(err.to_string()))?;
        let body = whole.slice(whole.len() - cursor.len()..);
        let responses = usb
            .handle_control_message(header.function_id, header.message_id, body)
            .map_err(|err| RuntimeError::Internal(err.to_string()))?;
        for response in responses {
            self.write(handle, response)?;
        }
        Ok(())
    }

    /// Bind the next announced-but-unbound USB device to a freshly opened
    /// device-dedicated channel `handle`, writing the `AddDevice` PDU on
    /// it. Returns the bound device's id (for routing subsequent
    /// [`RuntimeSession::handle_usb_device_message`] calls on `handle`),
    /// or `None` if no announced device is waiting for a channel.
    pub fn bind_usb_device_channel(&self, handle: ChannelHandle, message_id: u32) -> Result<Option<u32>> {
        let Some(usb) = &self.usb else {
            return Err(RuntimeError::ChannelNotOpen(URBDRC_CHANNEL.into()));
        };
        let Some((usb_device_id, message)) = usb.bind_device_channel(handle.open_handle(), message_id) else {
            return Ok(None);
        };
        self.write(handle, message)?;
        Ok(Some(usb_device_id))
    }

    /// Route one whole message arriving on a device-bound dynamic channel.
    /// Device channels are opened out-of-band once their `AddVirtualChannel`
    /// announcement is acted on; this runtime does not itself model dynamic
    /// channel creation, so the caller supplies the channel handle to write
    /// responses back to.
    pub async fn handle_usb_device_message(&self, handle: ChannelHandle, usb_device_id: u32, whole: Bytes) -> Result<()> {
        let Some(usb) = &self.usb else {
            return Err(RuntimeError::ChannelNotOpen(URBDRC_CHANNEL.into()));
        };
        let mut cursor = &whole[..];
        let header =
            MessageHeader::decode(&mut cursor).map_err(|err| RuntimeError::InvalidData(err.to_string()))?;
        let body = whole.slice(whole.len() - cursor.len()..);
        let responses = usb
            .handle_device_message(usb_device_id, header, body)
            .await
            .map_err(|err| RuntimeError::Internal(err.to_string()))?;
        for response in responses {
            self.write(handle, response)?;
        }
        Ok(())
    }

    fn write(&self, handle: ChannelHandle, buffer: Bytes) -> Result<()> {
        let status = self.transport.write(handle, buffer);
        if !status.is_ok() {
            warn!(%handle, ?status, "channel write failed");
            return Err(RuntimeError::Transport(format!("{status:?}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addin::Registry;
    use crate::config::{ChannelDefinition, ChannelOptions};
    use crate::transport::mock::MockTransport;
    use rdp_clipboard_core::{
        header::MsgFlags, Capabilities, ClipboardPdu, FormatEntry, FormatList, GeneralCapabilitySet, NameEncoding,
    };
    use std::collections::{HashMap, HashSet};

    /// Tests run dispatch inline (`disable_threads = true`) so that
    /// asserting on `transport.writes` right after delivering a fragment
    /// doesn't race a spawned worker task, and so plain `#[test]` fns
    /// don't need a tokio runtime just to construct a session.
    fn config_with(names: &[&str]) -> Config {
        let mut config = Config::default_config().unwrap().with_overrides(Some(true));
        config.channels.definitions = names.iter().map(|n| ChannelDefinition::new(*n, ChannelOptions::INITIALIZED)).collect();
        config
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(HashMap::new(), HashSet::new()))
    }

    fn deliver_whole(session: &RuntimeSession<MockTransport>, handle: ChannelHandle, bytes: Bytes) {
        session
            .handle_transport_event(TransportEvent::DataReceived {
                handle,
                data: bytes.clone(),
                total_length: bytes.len(),
                flags: ChannelFlags::whole(),
            })
            .unwrap();
    }

    #[test]
    fn clipboard_handshake_round_trips_through_session() {
        let transport = Arc::new(MockTransport::new());
        let config = config_with(&["cliprdr"]);
        let session = RuntimeSession::new(transport.clone(), &config, registry(), None, 1, |_event| {}).unwrap();
        let handle = {
            let channels = session.channels.lock();
            channels.by_name.get("cliprdr").unwrap().handle
        };

        let caps =
            Capabilities { general: GeneralCapabilitySet { version: 2, general_flags: GeneralFlags::empty() } };
        deliver_whole(&session, handle, ClipboardPdu::Capabilities(caps).encode(MsgFlags::empty(), NameEncoding::Long));
        deliver_whole(&session, handle, ClipboardPdu::MonitorReady.encode(MsgFlags::empty(), NameEncoding::Long));

        assert_eq!(transport.writes.lock().len(), 1);
    }

    #[test]
    fn clipboard_format_list_emits_event_and_response() {
        let transport = Arc::new(MockTransport::new());
        let config = config_with(&["cliprdr"]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let session = RuntimeSession::new(transport.clone(), &config, registry(), None, 1, move |event| {
            events_clone.lock().push(event);
        })
        .unwrap();
        let handle = {
            let channels = session.channels.lock();
            channels.by_name.get("cliprdr").unwrap().handle
        };
        deliver_whole(&session, handle, ClipboardPdu::MonitorReady.encode(MsgFlags::empty(), NameEncoding::Long));

        let list = FormatList { entries: vec![FormatEntry::named(13, "CF_TEXT")] };
        deliver_whole(&session, handle, ClipboardPdu::FormatList(list).encode(MsgFlags::empty(), NameEncoding::Long));

        assert_eq!(events.lock().len(), 1);
        assert_eq!(transport.writes.lock().len(), 1);
    }

    #[test]
    fn urbdrc_without_host_stack_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        let config = config_with(&["urbdrc"]);
        let result = RuntimeSession::new(transport, &config, registry(), None, 1, |_event| {});
        assert!(result.is_err());
    }

    #[test]
    fn binding_a_usb_device_channel_emits_add_device_once() {
        use rdp_usb_redirect::device::DeviceDescriptor;
        use rdp_usb_redirect::host::mock::MockHostStack;
        use rdp_usb_redirect::host::DiscoveredDevice;

        let host = Arc::new(MockHostStack::default());
        host.seed_device(DiscoveredDevice {
            bus_number: 1,
            device_address: 2,
            descriptor: DeviceDescriptor {
                vendor_id: 0x0403,
                product_id: 0x6001,
                bcd_usb: 0x0200,
                device_class: 0,
                device_sub_class: 0,
                device_protocol: 0,
                interface_classes: vec![0x02],
                product_string: None,
            },
        });

        let transport = Arc::new(MockTransport::new());
        let config = config_with(&["urbdrc"]);
        let session =
            RuntimeSession::new(transport.clone(), &config, registry(), Some(host), 1, |_event| {}).unwrap();
        let handle = {
            let channels = session.channels.lock();
            channels.by_name.get("urbdrc").unwrap().handle
        };
        let usb = session.usb().unwrap().clone();

        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let id = usb.manager().register_by_vid_pid(0x0403, 0x6001).await.unwrap();
            usb.manager().get(id).unwrap().mark_already_sent();

            let bound = session.bind_usb_device_channel(handle, 1).unwrap();
            assert_eq!(bound, Some(id));
            assert_eq!(transport.writes.lock().len(), 1);
            assert!(session.bind_usb_device_channel(handle, 2).unwrap().is_none());
        });
    }

    #[test]
    fn unconfigured_channel_name_opens_but_has_no_engine() {
        let transport = Arc::new(MockTransport::new());
        let config = config_with(&["rdpdr"]);
        let session = RuntimeSession::new(transport.clone(), &config, registry(), None, 1, |_event| {}).unwrap();
        let handle = {
            let channels = session.channels.lock();
            channels.by_name.get("rdpdr").unwrap().handle
        };
        deliver_whole(&session, handle, Bytes::from_static(b"whatever"));
        assert!(transport.writes.lock().is_empty());
    }
}
