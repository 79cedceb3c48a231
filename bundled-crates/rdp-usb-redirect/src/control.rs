//! The control stream's capability-exchange and device-announcement FSM,
//! grounded on `urbdrc_main.c`'s `urbdrc_process_capability_request`,
//! `urbdrc_process_channel_created` and `urbdrc_send_virtual_channel_add`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{control_function, RIM_CAPABILITY_VERSION_01};
use crate::device::UsbDeviceRecord;
use crate::error::{Result, UsbError};
use crate::frame::MessageHeader;

/// Messages received on the control stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlInbound {
    /// Server proposes a capability version; the client caps its reply at
    /// [`RIM_CAPABILITY_VERSION_01`].
    CapabilityRequest { version: u32 },
    /// Server confirms the control channel is ready. Carries the
    /// negotiated version; the client always records it as the single
    /// version it supports rather than whatever arrived on the wire.
    ChannelCreated { major_version: u16, minor_version: u16 },
}

/// Messages emitted onto the control stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutbound {
    /// Reply to [`ControlInbound::CapabilityRequest`].
    CapabilityResponse { version: u32 },
    /// Announces a registered device, requesting the server open a
    /// device-dedicated dynamic channel for it.
    AddVirtualChannel { usb_device_id: u32 },
    /// Sent on a device's just-opened dedicated channel, binding it to
    /// `usb_device_id` and carrying the device's descriptor fields.
    AddDevice {
        usb_device_id: u32,
        vendor_id: u16,
        product_id: u16,
        bcd_usb: u16,
        device_class: u8,
        device_sub_class: u8,
        device_protocol: u8,
    },
}

impl ControlInbound {
    /// Decode a control-stream message body, given the header's `function_id`.
    pub fn decode(function_id: u32, mut body: Bytes) -> Result<Self> {
        match function_id {
            control_function::CAPABILITY_REQUEST => {
                if body.remaining() < 4 {
                    return Err(UsbError::InvalidData("capability request truncated".into()));
                }
                Ok(ControlInbound::CapabilityRequest { version: body.get_u32_le() })
            }
            control_function::CHANNEL_CREATED => {
                if body.remaining() < 4 {
                    return Err(UsbError::InvalidData("channel created truncated".into()));
                }
                Ok(ControlInbound::ChannelCreated { major_version: body.get_u16_le(), minor_version: body.get_u16_le() })
            }
            other => Err(UsbError::NotSupported(format!("unrecognized control function 0x{other:04x}"))),
        }
    }
}

impl ControlOutbound {
    fn function_id(&self) -> u32 {
        match self {
            ControlOutbound::CapabilityResponse { .. } => control_function::CAPABILITY_REQUEST,
            ControlOutbound::AddVirtualChannel { .. } => control_function::ADD_VIRTUAL_CHANNEL,
            ControlOutbound::AddDevice { .. } => control_function::ADD_DEVICE,
        }
    }

    /// Encode this message, including its [`MessageHeader`], for
    /// transmission on the control stream (`StreamId::None`).
    pub fn encode(&self, message_id: u32) -> Bytes {
        let mut buf = BytesMut::new();
        let header = MessageHeader::new(crate::constants::StreamId::None, 0, message_id, self.function_id());
        header.encode(&mut buf);
        match self {
            ControlOutbound::CapabilityResponse { version } => buf.put_u32_le(*version),
            ControlOutbound::AddVirtualChannel { usb_device_id } => buf.put_u32_le(*usb_device_id),
            ControlOutbound::AddDevice {
                usb_device_id,
                vendor_id,
                product_id,
                bcd_usb,
                device_class,
                device_sub_class,
                device_protocol,
            } => {
                buf.put_u32_le(1); // NumUsbDevice
                buf.put_u32_le(*usb_device_id);
                buf.put_u16_le(*vendor_id);
                buf.put_u16_le(*product_id);
                buf.put_u16_le(*bcd_usb);
                buf.put_u8(*device_class);
                buf.put_u8(*device_sub_class);
                buf.put_u8(*device_protocol);
            }
        }
        buf.freeze()
    }
}

/// Drives the control stream's small FSM: capability negotiation, then
/// repeated device announcements as devices register.
#[derive(Debug, Default)]
pub struct ControlChannel {
    negotiated_version: Option<u32>,
    channel_created: bool,
}

impl ControlChannel {
    /// Construct a fresh, not-yet-negotiated control channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `ChannelCreated` has been processed and device
    /// announcements may be sent.
    pub fn is_ready(&self) -> bool {
        self.channel_created
    }

    /// Process one inbound control message, returning any messages to
    /// send in response (besides device announcements, which the caller
    /// drives separately via [`ControlChannel::announce`] once ready).
    pub fn on_message(&mut self, message: ControlInbound) -> Vec<ControlOutbound> {
        match message {
            ControlInbound::CapabilityRequest { version } => {
                let capped = version.min(RIM_CAPABILITY_VERSION_01);
                self.negotiated_version = Some(capped);
                vec![ControlOutbound::CapabilityResponse { version: capped }]
            }
            ControlInbound::ChannelCreated { .. } => {
                // The client supports exactly one protocol revision; record it
                // as such rather than whatever the server happened to send.
                self.channel_created = true;
                Vec::new()
            }
        }
    }

    /// Announce every device in `pending` that hasn't been announced yet,
    /// marking each as sent.
    pub fn announce(&self, pending: &[std::sync::Arc<UsbDeviceRecord>]) -> Vec<ControlOutbound> {
        if !self.channel_created {
            return Vec::new();
        }
        pending
            .iter()
            .map(|device| {
                device.mark_already_sent();
                ControlOutbound::AddVirtualChannel { usb_device_id: device.usb_device_id }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDescriptor;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: 1,
            product_id: 2,
            bcd_usb: 0x0200,
            device_class: 0,
            device_sub_class: 0,
            device_protocol: 0,
            interface_classes: vec![3],
            product_string: None,
        }
    }

    #[test]
    fn capability_version_is_capped_at_supported_version() {
        let mut control = ControlChannel::new();
        let replies = control.on_message(ControlInbound::CapabilityRequest { version: 99 });
        assert_eq!(replies, vec![ControlOutbound::CapabilityResponse { version: RIM_CAPABILITY_VERSION_01 }]);
    }

    #[test]
    fn channel_created_unlocks_announcements() {
        let mut control = ControlChannel::new();
        assert!(!control.is_ready());
        control.on_message(ControlInbound::ChannelCreated { major_version: 9, minor_version: 9 });
        assert!(control.is_ready());
    }

    #[test]
    fn announce_marks_devices_sent_and_skips_them_next_time() {
        let mut control = ControlChannel::new();
        control.on_message(ControlInbound::ChannelCreated { major_version: 1, minor_version: 0 });
        let device = std::sync::Arc::new(UsbDeviceRecord::new(7, 1, 2, descriptor()));
        let outbound = control.announce(&[device.clone()]);
        assert_eq!(outbound, vec![ControlOutbound::AddVirtualChannel { usb_device_id: 7 }]);
        assert!(device.is_already_sent());
        assert!(control.announce(&[]).is_empty());
    }

    #[test]
    fn announce_before_channel_created_is_a_noop() {
        let control = ControlChannel::new();
        let device = std::sync::Arc::new(UsbDeviceRecord::new(1, 1, 1, descriptor()));
        assert!(control.announce(&[device]).is_empty());
    }

    #[test]
    fn add_device_roundtrips_header_and_descriptor_fields() {
        let outbound = ControlOutbound::AddDevice {
            usb_device_id: 7,
            vendor_id: 0x0403,
            product_id: 0x6001,
            bcd_usb: 0x0200,
            device_class: 0,
            device_sub_class: 0,
            device_protocol: 0,
        };
        let encoded = outbound.encode(3);
        let mut cursor = &encoded[..];
        let header = MessageHeader::decode(&mut cursor).unwrap();
        assert_eq!(header.function_id, control_function::ADD_DEVICE);
        assert_eq!(header.message_id, 3);
        assert_eq!(cursor.get_u32_le(), 1);
        assert_eq!(cursor.get_u32_le(), 7);
        assert_eq!(cursor.get_u16_le(), 0x0403);
    }

    #[test]
    fn capability_response_roundtrips_header() {
        let outbound = ControlOutbound::CapabilityResponse { version: 1 };
        let encoded = outbound.encode(42);
        let mut cursor = &encoded[..];
        let header = MessageHeader::decode(&mut cursor).unwrap();
        assert_eq!(header.function_id, control_function::CAPABILITY_REQUEST);
        assert_eq!(header.message_id, 42);
    }
}
