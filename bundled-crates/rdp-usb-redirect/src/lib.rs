//! USB redirection virtual channel engine (MS-RDPEUSB / URBDRC).
//!
//! Wires together the control stream's capability/announcement FSM
//! ([`control`]), device registration and hotplug ([`manager`]), and
//! per-device URB dispatch ([`dispatch`]) over a pluggable
//! [`host::UsbHostStack`]. The root runtime crate owns the dynamic
//! channels this engine's messages travel over; this crate only
//! produces and consumes the bytes that go on them.

pub mod config;
pub mod constants;
pub mod control;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod host;
pub mod manager;
pub mod rusb_host;
pub mod urb;

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

pub use config::{UsbClassFilter, UsbConfig};
pub use control::{ControlChannel, ControlInbound, ControlOutbound};
pub use device::{PipeHandle, TransferKind, UsbDeviceRecord};
pub use dispatch::DeviceDispatcher;
pub use error::{Result, UsbError};
pub use frame::MessageHeader;
pub use host::UsbHostStack;
pub use manager::{DeviceEvent, UsbDeviceManager};
pub use rusb_host::RusbHostStack;

/// Top-level engine for one session: owns the control channel FSM, the
/// device manager, and a dispatcher shared by every device-bound channel.
pub struct UsbRedirectEngine {
    manager: Arc<UsbDeviceManager>,
    dispatcher: DeviceDispatcher,
    control: parking_lot::Mutex<ControlChannel>,
}

impl UsbRedirectEngine {
    /// Construct an engine over `host`, registering no devices up front;
    /// call [`UsbDeviceManager::register_by_vid_pid`] or rely on hotplug
    /// auto-add (via [`UsbDeviceManager::spawn_hotplug`]) to populate it.
    pub fn new(host: Arc<dyn UsbHostStack>, config: UsbConfig) -> Self {
        let manager = UsbDeviceManager::new(host.clone(), config);
        Self { manager, dispatcher: DeviceDispatcher::new(host), control: parking_lot::Mutex::new(ControlChannel::new()) }
    }

    /// The device manager backing this engine.
    pub fn manager(&self) -> &Arc<UsbDeviceManager> {
        &self.manager
    }

    /// Process one control-stream message, returning response frames
    /// (capability negotiation ack, plus any newly unblocked device
    /// announcements) to write back.
    pub fn handle_control_message(&self, function_id: u32, message_id: u32, body: Bytes) -> Result<Vec<Bytes>> {
        let inbound = ControlInbound::decode(function_id, body)?;
        let mut control = self.control.lock();
        let mut outbound = control.on_message(inbound);
        outbound.extend(control.announce(&self.manager.pending_announcements()));
        Ok(outbound.into_iter().map(|msg| msg.encode(message_id)).collect())
    }

    /// Announce every not-yet-sent registered device, if the control
    /// channel has completed capability negotiation. Called after a new
    /// device registers (explicit or hotplug) to push `AddVirtualChannel`
    /// without waiting on inbound traffic.
    pub fn announce_pending_devices(&self, message_id: u32) -> Vec<Bytes> {
        let control = self.control.lock();
        control
            .announce(&self.manager.pending_announcements())
            .into_iter()
            .map(|msg| msg.encode(message_id))
            .collect()
    }

    /// Bind the next announced-but-unbound device to a freshly opened
    /// device-dedicated channel, returning its id and the `AddDevice`
    /// message to write on that channel. Returns `None` if no announced
    /// device is waiting for a channel.
    pub fn bind_device_channel(&self, channel_id: u32, message_id: u32) -> Option<(u32, Bytes)> {
        let device = self.manager.bind_next_device(channel_id)?;
        let d = &device.descriptor;
        let outbound = ControlOutbound::AddDevice {
            usb_device_id: device.usb_device_id,
            vendor_id: d.vendor_id,
            product_id: d.product_id,
            bcd_usb: d.bcd_usb,
            device_class: d.device_class,
            device_sub_class: d.device_sub_class,
            device_protocol: d.device_protocol,
        };
        Some((device.usb_device_id, outbound.encode(message_id)))
    }

    /// Dispatch one message arriving on a device-bound dynamic channel.
    pub async fn handle_device_message(&self, usb_device_id: u32, header: MessageHeader, body: Bytes) -> Result<Vec<Bytes>> {
        let device = self.manager.get(usb_device_id)?;
        self.dispatcher.dispatch(&device, header, body).await
    }

    /// Tear down a device, e.g. when its bound dynamic channel closes.
    pub async fn retract(&self, usb_device_id: u32) -> Result<()> {
        match self.manager.teardown(usb_device_id).await {
            Ok(()) => {
                info!(usb_device_id, "device channel retracted");
                Ok(())
            }
            Err(err) => {
                warn!(usb_device_id, %err, "teardown failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{control_function, device_function, ioctl};
    use crate::device::DeviceDescriptor;
    use crate::host::mock::MockHostStack;
    use crate::host::DiscoveredDevice;
    use bytes::{Buf, BufMut, BytesMut};

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: 0x0403,
            product_id: 0x6001,
            bcd_usb: 0x0200,
            device_class: 0,
            device_sub_class: 0,
            device_protocol: 0,
            interface_classes: vec![0x02],
            product_string: Some("Mock FTDI Adapter".into()),
        }
    }

    fn capability_request(version: u32) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(version);
        buf.freeze()
    }

    fn channel_created(major: u16, minor: u16) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16_le(major);
        buf.put_u16_le(minor);
        buf.freeze()
    }

    #[tokio::test]
    async fn end_to_end_capability_exchange_then_device_announcement() {
        let host = Arc::new(MockHostStack::default());
        host.seed_device(DiscoveredDevice { bus_number: 1, device_address: 2, descriptor: descriptor() });
        let engine = UsbRedirectEngine::new(host, UsbConfig::default());

        let replies = engine.handle_control_message(control_function::CAPABILITY_REQUEST, 1, capability_request(42)).unwrap();
        assert_eq!(replies.len(), 1);

        let id = engine.manager().register_by_vid_pid(0x0403, 0x6001).await.unwrap();

        let replies = engine.handle_control_message(control_function::CHANNEL_CREATED, 2, channel_created(1, 0)).unwrap();
        assert_eq!(replies.len(), 1);
        let mut cursor = &replies[0][..];
        let header = MessageHeader::decode(&mut cursor).unwrap();
        assert_eq!(header.function_id, control_function::ADD_VIRTUAL_CHANNEL);
        assert_eq!(cursor.get_u32_le(), id);

        let (bound_id, add_device) = engine.bind_device_channel(55, 3).unwrap();
        assert_eq!(bound_id, id);
        let mut cursor = &add_device[..];
        let header = MessageHeader::decode(&mut cursor).unwrap();
        assert_eq!(header.function_id, control_function::ADD_DEVICE);
        assert_eq!(cursor.get_u32_le(), 1);
        assert_eq!(cursor.get_u32_le(), id);
        assert!(engine.bind_device_channel(56, 4).is_none());
    }

    #[tokio::test]
    async fn urb_control_transfer_completes_through_dispatch() {
        let host = Arc::new(MockHostStack::default());
        host.seed_device(DiscoveredDevice { bus_number: 1, device_address: 2, descriptor: descriptor() });
        let engine = UsbRedirectEngine::new(host, UsbConfig::default());
        let id = engine.manager().register_by_vid_pid(0x0403, 0x6001).await.unwrap();

        let mut body = BytesMut::new();
        body.put_u32_le(ioctl::SUBMIT_URB);
        body.put_u32_le(11);
        body.put_u16_le(crate::constants::urb_function::CONTROL_TRANSFER);
        body.put_u8(0x80);
        body.put_u8(0);
        body.put_u8(0x80);
        body.put_u8(0x06);
        body.put_u16_le(0x0100);
        body.put_u16_le(0);
        body.put_slice(&[0u8; 8]);

        let header = MessageHeader::new(crate::constants::StreamId::Proxy, 0, 3, device_function::IO_CONTROL);
        let responses = engine.handle_device_message(id, header, body.freeze()).await.unwrap();
        assert_eq!(responses.len(), 1);
        let mut cursor = &responses[0][..];
        let decoded = MessageHeader::decode(&mut cursor).unwrap();
        assert_eq!(decoded.function_id, device_function::URB_COMPLETION);
    }

    #[tokio::test]
    async fn cancellation_mid_flight_removes_tracked_request() {
        let host = Arc::new(MockHostStack::default());
        host.seed_device(DiscoveredDevice { bus_number: 1, device_address: 2, descriptor: descriptor() });
        let engine = UsbRedirectEngine::new(host, UsbConfig::default());
        let id = engine.manager().register_by_vid_pid(0x0403, 0x6001).await.unwrap();
        let device = engine.manager().get(id).unwrap();
        device.transfers.lock().insert(99, crate::device::TransferRequest::new(99, 0x81, TransferKind::Bulk));

        let mut body = BytesMut::new();
        body.put_u32_le(99);
        let header = MessageHeader::new(crate::constants::StreamId::Proxy, 0, 4, device_function::CANCEL_REQUEST);
        let responses = engine.handle_device_message(id, header, body.freeze()).await.unwrap();
        assert!(responses.is_empty());
        assert!(!device.transfers.lock().contains_key(&99));
    }

    #[tokio::test]
    async fn hotplug_scan_auto_registers_configured_vid_pid() {
        let host = Arc::new(MockHostStack::default());
        host.seed_device(DiscoveredDevice { bus_number: 3, device_address: 9, descriptor: descriptor() });
        let config = UsbConfig { auto_add: vec![(0x0403, 0x6001)], ..UsbConfig::default() };
        let manager = UsbDeviceManager::new(host, config);
        manager.hotplug_scan_once().await.unwrap();
        assert!(manager.register_by_bus_addr(3, 9).await.is_ok());
    }
}
