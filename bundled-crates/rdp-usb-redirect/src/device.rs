//! USB device record and per-device transfer bookkeeping.
//!
//! Grounded on `libusb_udevice.c`'s `S_IUDEVICE` (device identity, channel
//! binding, config descriptor) and `request_queue.c`'s per-device transfer
//! set, generalized into a `PipeHandle` newtype and a `HashMap`-backed
//! request set guarded by a single `parking_lot::Mutex` instead of a
//! hand-rolled linked list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// `bus<<24 | dev<<16 | endpointAddr`, wrapped so aliasing combinations are
/// rejected at construction rather than produced by ad hoc bit-shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeHandle(u32);

impl PipeHandle {
    /// Build a pipe handle from its components.
    pub fn new(bus_number: u8, device_address: u8, endpoint_address: u8) -> Self {
        Self((bus_number as u32) << 24 | (device_address as u32) << 16 | endpoint_address as u32)
    }

    /// Raw packed value, as placed on the wire for a `SELECT_INTERFACE`
    /// response's endpoint pipe handles.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// The endpoint address component.
    pub fn endpoint_address(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

/// One of the four USB transfer kinds, selected by endpoint type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Control transfer (endpoint 0 or an explicit setup packet).
    Control,
    /// Bulk transfer.
    Bulk,
    /// Interrupt transfer.
    Interrupt,
    /// Isochronous transfer.
    Isochronous,
}

/// Why a transfer request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Completed normally; the host stack returned data or a success status.
    Completed,
    /// Cancelled via `CANCEL_REQUEST`.
    Cancelled,
    /// The owning device was torn down while the transfer was in flight.
    DeviceTornDown,
}

/// State of one in-flight (or terminal) transfer request. Tracked so that
/// exactly one of {completion, cancellation, teardown} terminates each
/// request.
#[derive(Debug)]
pub struct TransferRequest {
    /// Low 31 bits identify the request; the top bit is the no-ack flag.
    pub request_id: u32,
    /// Endpoint this request targets.
    pub endpoint_address: u8,
    /// Transfer kind.
    pub kind: TransferKind,
    /// Set once the host stack has accepted the transfer for submission
    /// (as opposed to merely being queued client-side) — gates the
    /// `CANCEL_REQUEST` retry loop.
    submitted: AtomicBool,
    /// Set once any of the three terminal events has fired, so a second
    /// one is a documented no-op rather than a double-free.
    terminated: AtomicBool,
}

impl TransferRequest {
    /// Construct a fresh, not-yet-submitted request.
    pub fn new(request_id: u32, endpoint_address: u8, kind: TransferKind) -> Self {
        Self {
            request_id,
            endpoint_address,
            kind,
            submitted: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    /// True if this request's id has the no-ack bit set (isochronous only).
    pub fn is_no_ack(&self) -> bool {
        self.request_id & crate::constants::NO_ACK_BIT != 0
    }

    /// The request id with the no-ack bit masked off.
    pub fn bare_id(&self) -> u32 {
        self.request_id & !crate::constants::NO_ACK_BIT
    }

    /// Mark this request as accepted by the host stack for submission.
    pub fn mark_submitted(&self) {
        self.submitted.store(true, Ordering::SeqCst);
    }

    /// Whether the host stack has accepted this request yet.
    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Attempt to claim the single terminal transition for this request.
    /// Returns `true` the first time it is called; `false` on every
    /// subsequent call, making cancellation and completion both safely
    /// idempotent against each other.
    pub fn try_terminate(&self) -> bool {
        !self.terminated.swap(true, Ordering::SeqCst)
    }
}

/// Minimal parsed USB configuration descriptor the engine needs: bus
/// topology and speed for `QUERY_DEVICE_TEXT`/`GET_PORT_STATUS`, plus
/// per-interface class for the hotplug filter.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// `idVendor`.
    pub vendor_id: u16,
    /// `idProduct`.
    pub product_id: u16,
    /// `bcdUSB`, used to derive the `GET_PORT_STATUS` speed word.
    pub bcd_usb: u16,
    /// `bDeviceClass`.
    pub device_class: u8,
    /// `bDeviceSubClass`.
    pub device_sub_class: u8,
    /// `bDeviceProtocol`.
    pub device_protocol: u8,
    /// Class of each interface, for composite devices (IAD present, or
    /// the miscellaneous/common-class/common-protocol triple).
    pub interface_classes: Vec<u8>,
    /// `iProduct` string, if the descriptor carries one and it was read.
    pub product_string: Option<String>,
}

impl DeviceDescriptor {
    /// True for a composite device: either the device-level triple
    /// `(0xEF, 0x02, 0x01)` that signals an interface-association
    /// descriptor, or simply having more than one interface.
    pub fn is_composite(&self) -> bool {
        (self.device_class == 0xEF && self.device_sub_class == 0x02 && self.device_protocol == 0x01)
            || self.interface_classes.len() > 1
    }
}

/// A registered USB device. Owned exclusively by [`crate::manager::UsbDeviceManager`];
/// channel bindings elsewhere in the runtime hold only `usb_device_id`.
#[derive(Debug)]
pub struct UsbDeviceRecord {
    /// Monotonically allocated, session-unique id (low 30 bits only).
    pub usb_device_id: u32,
    /// USB bus number.
    pub bus_number: u8,
    /// Device address on the bus.
    pub device_address: u8,
    /// Hub port number, if known.
    pub port: Option<u8>,
    /// Parsed descriptor.
    pub descriptor: DeviceDescriptor,
    /// `RequestCompletion` id registered via `REGISTER_REQUEST_CALLBACK`.
    pub completion_id: Mutex<Option<u32>>,
    /// Set once `AddVirtualChannel` has been emitted for this device, so
    /// the control-stream FSM does not re-announce it.
    already_sent: AtomicBool,
    /// The dynamic channel id this device is bound to, once the peer
    /// opens a device-dedicated channel for it and `AddDevice` has been
    /// sent on it.
    bound_channel_id: Mutex<Option<u32>>,
    /// In-flight and not-yet-reaped transfer requests, keyed by bare
    /// request id (no-ack bit masked off on insertion).
    pub transfers: Mutex<HashMap<u32, TransferRequest>>,
    /// Serializes teardown against in-flight dispatcher work: the
    /// dispatcher acquires a permit on entry and releases it on exit;
    /// teardown waits for the semaphore to have no permits checked out.
    pub activity: Semaphore,
    /// Set once the device has disappeared (hot-unplug or host-stack
    /// `NoDevice`); all further IO on it short-circuits with `NoDevice`.
    gone: AtomicBool,
    /// Monotonic counter answering `INTERNAL_IO_CONTROL`'s frame-number query.
    frame_counter: AtomicU32,
}

/// The maximum count of the activity semaphore — effectively unbounded
/// concurrent dispatcher entries, since the semaphore is used purely as a
/// drain-to-zero gate rather than a concurrency limiter.
pub(crate) const ACTIVITY_PERMITS: usize = Semaphore::MAX_PERMITS;

impl UsbDeviceRecord {
    /// Construct a freshly registered device record.
    pub fn new(usb_device_id: u32, bus_number: u8, device_address: u8, descriptor: DeviceDescriptor) -> Self {
        Self {
            usb_device_id,
            bus_number,
            device_address,
            port: None,
            descriptor,
            completion_id: Mutex::new(None),
            already_sent: AtomicBool::new(false),
            bound_channel_id: Mutex::new(None),
            transfers: Mutex::new(HashMap::new()),
            activity: Semaphore::new(ACTIVITY_PERMITS),
            gone: AtomicBool::new(false),
            frame_counter: AtomicU32::new(0),
        }
    }

    /// Advance and return the frame-number counter.
    pub fn next_frame_number(&self) -> u32 {
        self.frame_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Whether `AddVirtualChannel` has already been emitted for this device.
    pub fn is_already_sent(&self) -> bool {
        self.already_sent.load(Ordering::SeqCst)
    }

    /// Mark `AddVirtualChannel` as emitted.
    pub fn mark_already_sent(&self) {
        self.already_sent.store(true, Ordering::SeqCst);
    }

    /// The channel id `AddDevice` was sent on, if this device has been
    /// bound to its device-dedicated channel yet.
    pub fn bound_channel_id(&self) -> Option<u32> {
        *self.bound_channel_id.lock()
    }

    /// Record that this device has been bound to `channel_id`.
    pub fn bind_channel(&self, channel_id: u32) {
        *self.bound_channel_id.lock() = Some(channel_id);
    }

    /// Whether the device has been marked gone (hot-unplug, or a
    /// host-stack `NoDevice` failure on any prior IO).
    pub fn is_gone(&self) -> bool {
        self.gone.load(Ordering::SeqCst)
    }

    /// Mark the device gone: all subsequent operations on it return
    /// `UsbError::NoDevice` until the owning channel is torn down.
    pub fn mark_gone(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }

    /// Whether no dispatcher work currently holds a permit against this
    /// device; used by teardown to wait for in-flight work to drain.
    pub fn is_idle(&self) -> bool {
        self.activity.available_permits() == ACTIVITY_PERMITS
    }

    /// A pipe handle for one of this device's endpoints.
    pub fn pipe_handle(&self, endpoint_address: u8) -> PipeHandle {
        PipeHandle::new(self.bus_number, self.device_address, endpoint_address)
    }

    /// The `Port_#dddd.Hub_#dddd`-formatted text used by
    /// `QUERY_DEVICE_TEXT` when no product string is available.
    pub fn port_hub_text(&self) -> String {
        format!("Port_#{:04}.Hub_#{:04}", self.device_address, self.bus_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: 0x1234,
            product_id: 0x5678,
            bcd_usb: 0x0200,
            device_class: 0,
            device_sub_class: 0,
            device_protocol: 0,
            interface_classes: vec![0x03],
            product_string: None,
        }
    }

    #[test]
    fn pipe_handle_packs_and_unpacks_endpoint() {
        let handle = PipeHandle::new(1, 7, 0x81);
        assert_eq!(handle.raw(), (1u32 << 24) | (7u32 << 16) | 0x81);
        assert_eq!(handle.endpoint_address(), 0x81);
    }

    #[test]
    fn transfer_termination_is_single_shot() {
        let req = TransferRequest::new(5, 0x81, TransferKind::Bulk);
        assert!(req.try_terminate());
        assert!(!req.try_terminate());
    }

    #[test]
    fn no_ack_bit_is_detected_and_stripped() {
        let req = TransferRequest::new(crate::constants::NO_ACK_BIT | 9, 0x01, TransferKind::Isochronous);
        assert!(req.is_no_ack());
        assert_eq!(req.bare_id(), 9);
    }

    #[test]
    fn composite_device_detected_by_iad_triple() {
        let mut d = descriptor();
        d.device_class = 0xEF;
        d.device_sub_class = 0x02;
        d.device_protocol = 0x01;
        assert!(d.is_composite());
    }

    #[test]
    fn device_binds_to_a_channel_at_most_once_observably() {
        let dev = UsbDeviceRecord::new(1, 1, 2, descriptor());
        assert_eq!(dev.bound_channel_id(), None);
        dev.bind_channel(42);
        assert_eq!(dev.bound_channel_id(), Some(42));
    }

    #[test]
    fn device_starts_not_gone_and_not_already_sent() {
        let dev = UsbDeviceRecord::new(1, 1, 2, descriptor());
        assert!(!dev.is_gone());
        assert!(!dev.is_already_sent());
        dev.mark_already_sent();
        dev.mark_gone();
        assert!(dev.is_gone());
        assert!(dev.is_already_sent());
    }
}
