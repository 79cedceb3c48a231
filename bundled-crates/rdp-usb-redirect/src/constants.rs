//! Wire constants for the USB redirection virtual channel (MS-RDPEUSB /
//! URBDRC), grounded on `channels/urbdrc/client/urbdrc_main.c` (control and
//! device stream function ids) and `data_transfer.c` (URB function codes).

/// The two-bit stream-id class carried in the top bits of `interfaceId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    /// Control stream: capability exchange and channel notifications.
    None,
    /// Device stream: URB traffic for one bound device.
    Proxy,
    /// Reserved/unused in this implementation, kept for completeness.
    Stub,
}

impl StreamId {
    /// Extract the stream-id class from the top 2 bits of an `interfaceId`.
    pub fn from_interface_id(interface_id: u32) -> Self {
        match interface_id >> 30 {
            0 => StreamId::None,
            1 => StreamId::Proxy,
            _ => StreamId::Stub,
        }
    }

    /// Combine this stream-id class with a 30-bit function class to form
    /// an `interfaceId`.
    pub fn with_function_class(self, function_class: u32) -> u32 {
        let bits = match self {
            StreamId::None => 0u32,
            StreamId::Proxy => 1u32,
            StreamId::Stub => 2u32,
        };
        (bits << 30) | (function_class & 0x3FFF_FFFF)
    }
}

/// `RIM_CAPABILITY_VERSION_01`, the only capability version this engine
/// negotiates (peer versions above this are capped down to it).
pub const RIM_CAPABILITY_VERSION_01: u32 = 1;

/// Control-stream `functionId` values.
pub mod control_function {
    /// `RIM_EXCHANGE_CAPABILITY_REQUEST` / response (same message id both ways).
    pub const CAPABILITY_REQUEST: u32 = 0x0001;
    /// `CHANNEL_CREATED` — server -> client after capability exchange.
    pub const CHANNEL_CREATED: u32 = 0x0002;
    /// `ADD_VIRTUAL_CHANNEL` — client -> server, announces a registered device.
    pub const ADD_VIRTUAL_CHANNEL: u32 = 0x0003;
    /// `ADD_DEVICE` — client -> server, binds a device to a newly opened
    /// device-dedicated dynamic channel.
    pub const ADD_DEVICE: u32 = 0x0004;
}

/// Device-stream `functionId` values.
pub mod device_function {
    /// Cancel an in-flight transfer request by id.
    pub const CANCEL_REQUEST: u32 = 0x0001;
    /// Register (or, with a short payload, unregister) the request-completion id.
    pub const REGISTER_REQUEST_CALLBACK: u32 = 0x0002;
    /// Dispatch by IOCTL code (`SUBMIT_URB` and friends).
    pub const IO_CONTROL: u32 = 0x0003;
    /// Internal IOCTLs answered with a frame-number counter.
    pub const INTERNAL_IO_CONTROL: u32 = 0x0004;
    /// Query a device text string (product name or bus/device-formatted).
    pub const QUERY_DEVICE_TEXT: u32 = 0x0005;
    /// Inbound (device -> host) URB transfer.
    pub const TRANSFER_IN_REQUEST: u32 = 0x0006;
    /// Outbound (host -> device) URB transfer.
    pub const TRANSFER_OUT_REQUEST: u32 = 0x0007;
    /// Policy hook; only reason defined (BlockedByPolicy) is rejected.
    pub const RETRACT_DEVICE: u32 = 0x0008;
    /// `IOCONTROL_COMPLETION` — response to `IO_CONTROL`/`INTERNAL_IO_CONTROL`.
    pub const IOCONTROL_COMPLETION: u32 = 0x0100;
    /// `URB_COMPLETION` — response carrying data.
    pub const URB_COMPLETION: u32 = 0x0101;
    /// `URB_COMPLETION_NO_DATA` — response with no output buffer.
    pub const URB_COMPLETION_NO_DATA: u32 = 0x0102;
    /// Server acknowledges release of a call.
    pub const RIMCALL_RELEASE: u32 = 0x0103;
}

/// `IOCTL_INTERNAL_USB_*` codes dispatched by `IO_CONTROL`.
pub mod ioctl {
    /// Submit a URB described by the remainder of the payload.
    pub const SUBMIT_URB: u32 = 0x0001;
    /// Reset the port the device is attached to.
    pub const RESET_PORT: u32 = 0x0002;
    /// Query port status (bcdUSB-derived speed word).
    pub const GET_PORT_STATUS: u32 = 0x0003;
    /// Cycle (power-off/on) the port.
    pub const CYCLE_PORT: u32 = 0x0004;
    /// Submit a USB idle notification request.
    pub const SUBMIT_IDLE_NOTIFICATION: u32 = 0x0005;
}

/// `URB_FUNCTION_*` codes carried inside a `SUBMIT_URB` payload, grounded
/// on `data_transfer.c`'s dispatch `switch`.
pub mod urb_function {
    /// 0x0000
    pub const SELECT_CONFIGURATION: u16 = 0x0000;
    /// 0x0001
    pub const SELECT_INTERFACE: u16 = 0x0001;
    /// 0x0002
    pub const ABORT_PIPE: u16 = 0x0002;
    /// 0x0003 — obsolete, reported as `NotSupported`.
    pub const TAKE_FRAME_LENGTH_CONTROL: u16 = 0x0003;
    /// 0x0004 — obsolete, reported as `NotSupported`.
    pub const RELEASE_FRAME_LENGTH_CONTROL: u16 = 0x0004;
    /// 0x0005 — obsolete, reported as `NotSupported`.
    pub const GET_FRAME_LENGTH: u16 = 0x0005;
    /// 0x0006 — obsolete, reported as `NotSupported`.
    pub const SET_FRAME_LENGTH: u16 = 0x0006;
    /// 0x0007
    pub const GET_CURRENT_FRAME_NUMBER: u16 = 0x0007;
    /// 0x0008
    pub const CONTROL_TRANSFER: u16 = 0x0008;
    /// 0x0009
    pub const BULK_OR_INTERRUPT_TRANSFER: u16 = 0x0009;
    /// 0x000A
    pub const ISOCH_TRANSFER: u16 = 0x000A;
    /// 0x000B
    pub const GET_DESCRIPTOR_FROM_DEVICE: u16 = 0x000B;
    /// 0x000C
    pub const SET_DESCRIPTOR_TO_DEVICE: u16 = 0x000C;
    /// 0x000D
    pub const SET_FEATURE_TO_DEVICE: u16 = 0x000D;
    /// 0x000E
    pub const SET_FEATURE_TO_INTERFACE: u16 = 0x000E;
    /// 0x000F
    pub const SET_FEATURE_TO_ENDPOINT: u16 = 0x000F;
    /// 0x0010
    pub const CLEAR_FEATURE_TO_DEVICE: u16 = 0x0010;
    /// 0x0011
    pub const CLEAR_FEATURE_TO_INTERFACE: u16 = 0x0011;
    /// 0x0012
    pub const CLEAR_FEATURE_TO_ENDPOINT: u16 = 0x0012;
    /// 0x0013
    pub const GET_STATUS_FROM_DEVICE: u16 = 0x0013;
    /// 0x0014
    pub const GET_STATUS_FROM_INTERFACE: u16 = 0x0014;
    /// 0x0015
    pub const GET_STATUS_FROM_ENDPOINT: u16 = 0x0015;
    /// 0x0017
    pub const VENDOR_DEVICE: u16 = 0x0017;
    /// 0x0018
    pub const VENDOR_INTERFACE: u16 = 0x0018;
    /// 0x0019
    pub const VENDOR_ENDPOINT: u16 = 0x0019;
    /// 0x001A
    pub const CLASS_DEVICE: u16 = 0x001A;
    /// 0x001B
    pub const CLASS_INTERFACE: u16 = 0x001B;
    /// 0x001C
    pub const CLASS_ENDPOINT: u16 = 0x001C;
    /// 0x001E
    pub const SYNC_RESET_PIPE_AND_CLEAR_STALL: u16 = 0x001E;
    /// 0x001F
    pub const CLASS_OTHER: u16 = 0x001F;
    /// 0x0020
    pub const VENDOR_OTHER: u16 = 0x0020;
    /// 0x0021
    pub const GET_STATUS_FROM_OTHER: u16 = 0x0021;
    /// 0x0022
    pub const CLEAR_FEATURE_TO_OTHER: u16 = 0x0022;
    /// 0x0023
    pub const SET_FEATURE_TO_OTHER: u16 = 0x0023;
    /// 0x0024
    pub const GET_DESCRIPTOR_FROM_ENDPOINT: u16 = 0x0024;
    /// 0x0025
    pub const SET_DESCRIPTOR_TO_ENDPOINT: u16 = 0x0025;
    /// 0x0026
    pub const GET_CONFIGURATION: u16 = 0x0026;
    /// 0x0027
    pub const GET_INTERFACE: u16 = 0x0027;
    /// 0x0028
    pub const GET_DESCRIPTOR_FROM_INTERFACE: u16 = 0x0028;
    /// 0x0029
    pub const SET_DESCRIPTOR_TO_INTERFACE: u16 = 0x0029;
    /// 0x002A
    pub const GET_MS_FEATURE_DESCRIPTOR: u16 = 0x002A;
    /// 0x0030
    pub const SYNC_CLEAR_STALL: u16 = 0x0030;
    /// 0x0032 — explicit-timeout control transfer.
    pub const CONTROL_TRANSFER_EX: u16 = 0x0032;
}

/// USBD status codes placed in `TS_URB_RESULT_HEADER.UsbdStatus`.
pub mod usbd_status {
    /// Success.
    pub const SUCCESS: u32 = 0x0000_0000;
    /// `USBD_STATUS_STALL_PID` — generic host-stack transfer failure.
    pub const STALL_PID: u32 = 0xC000_0004;
    /// `USBD_STATUS_INVALID_PARAMETER`.
    pub const INVALID_PARAMETER: u32 = 0xC000_000A;
    /// `USBD_STATUS_NOT_ACCESSED` (host-stack permission failure).
    pub const NOT_ACCESSED: u32 = 0xC000_0011;
    /// `USBD_STATUS_DEVICE_GONE`.
    pub const DEVICE_GONE: u32 = 0xC000_0102;
    /// `USBD_STATUS_TIMEOUT`.
    pub const TIMEOUT: u32 = 0xC000_0001;
    /// `USBD_STATUS_NO_MEMORY`. Reusing `STALL_PID`'s class with a distinct
    /// value so the two remain distinguishable in logs.
    pub const NO_MEMORY: u32 = 0xC000_0017;
    /// `USBD_STATUS_NOT_SUPPORTED`.
    pub const NOT_SUPPORTED: u32 = 0xC000_0002;
}

/// Top bit of a transfer/isochronous request id: marks a "no-ack" URB whose
/// endpoint is expected to emit no completion.
pub const NO_ACK_BIT: u32 = 0x8000_0000;

/// Default USB device classes filtered out of hotplug auto-add.
pub mod device_class {
    /// Hub.
    pub const HUB: u8 = 0x09;
    /// Mass storage.
    pub const MASS_STORAGE: u8 = 0x08;
    /// Smart card.
    pub const SMART_CARD: u8 = 0x0B;
    /// Content security.
    pub const CONTENT_SECURITY: u8 = 0x0D;
}

/// Monotonic `usb-device-id` allocation floor.
pub const BASE_USBDEVICE_NUM: u32 = 1;

/// Mask applied to a freshly issued `unique-usb-device-id`.
pub const USB_DEVICE_ID_MASK: u32 = 0x3FFF_FFFF;

/// Default control-transfer timeout in milliseconds.
pub const DEFAULT_CONTROL_TIMEOUT_MS: u32 = 2000;

/// Retry budget for `CANCEL_REQUEST` against a not-yet-submitted transfer.
pub const CANCEL_RETRY_COUNT: u32 = 10;
/// Delay between cancel retries.
pub const CANCEL_RETRY_DELAY_MS: u64 = 100;

/// Delay before acking an unregister-callback request.
pub const UNREGISTER_CALLBACK_DELAY_SECS: u64 = 3;

/// `RETRACT_DEVICE` reason codes.
pub mod retract_reason {
    /// Local policy forbids retracting the device; this client always
    /// replies with this reason rather than honoring a retract request.
    pub const BLOCKED_BY_POLICY: u32 = 1;
}

/// Device-teardown semaphore poll interval.
pub const TEARDOWN_POLL_MS: u64 = 500;
/// Device-teardown retry budget (25 x 200ms = 5s).
pub const TEARDOWN_RETRY_TICKS: u32 = 25;
/// Interval between teardown retry ticks.
pub const TEARDOWN_RETRY_TICK_MS: u64 = 200;
