//! The seam between this crate's protocol engine and the local USB host
//! stack, grounded on `IUDEVICE`'s function-pointer surface in
//! `urbdrc_main.h` (`control_transfer`, `bulk_or_interrupt_transfer`,
//! `isoch_transfer`, `select_configuration`, `select_interface`,
//! `control_query_device_text`, `query_device_port_status`, ...) and on
//! the `rusb`-backed `DeviceHandler` trait in the qemu-display usbredir
//! reference, adapted to async/Result-idiomatic Rust instead of raw
//! callbacks.

use async_trait::async_trait;

use crate::device::{DeviceDescriptor, TransferKind};
use crate::error::Result;

/// Setup packet fields for a control transfer, mirroring `TS_URB_CONTROL_TRANSFER`.
#[derive(Debug, Clone, Copy)]
pub struct ControlSetup {
    /// `bmRequestType`.
    pub request_type: u8,
    /// `bRequest`.
    pub request: u8,
    /// `wValue`.
    pub value: u16,
    /// `wIndex`.
    pub index: u16,
}

/// Direction of a transfer, as carried by the pipe/endpoint's direction bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device.
    Out,
    /// Device to host.
    In,
}

/// A discovered device, prior to registration with [`crate::manager::UsbDeviceManager`].
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Bus number.
    pub bus_number: u8,
    /// Device address.
    pub device_address: u8,
    /// Descriptor, parsed eagerly so class-filter decisions don't need a
    /// further host-stack round trip.
    pub descriptor: DeviceDescriptor,
}

/// Abstraction over the local USB host stack (`rusb`/`libusb` in
/// production, an in-memory fake in tests), covering exactly the
/// operations the URB dispatch table needs.
///
/// Implementations own no per-connection state beyond what's needed to
/// issue a transfer; device lifetime bookkeeping lives in
/// [`crate::device::UsbDeviceRecord`] and [`crate::manager::UsbDeviceManager`].
#[async_trait]
pub trait UsbHostStack: Send + Sync {
    /// Enumerate currently attached devices.
    async fn list_devices(&self) -> Result<Vec<DiscoveredDevice>>;

    /// Open (claim) a device for redirection. A no-op for stacks that
    /// open lazily per-transfer, but gives implementations a natural
    /// point to fail on permission errors.
    async fn open(&self, bus_number: u8, device_address: u8) -> Result<()>;

    /// Release a previously opened device.
    async fn close(&self, bus_number: u8, device_address: u8);

    /// Select the device's active configuration.
    async fn select_configuration(&self, bus_number: u8, device_address: u8, configuration_value: u8) -> Result<()>;

    /// Select an interface's alternate setting, returning the endpoint
    /// addresses of the newly active alternate setting in descriptor order.
    async fn select_interface(
        &self,
        bus_number: u8,
        device_address: u8,
        interface_number: u8,
        alternate_setting: u8,
    ) -> Result<Vec<u8>>;

    /// Issue a control transfer. `data` is the outbound payload for
    /// `Direction::Out` and ignored (pass empty) for `Direction::In`;
    /// the return value is the data stage contents for `In`, empty for `Out`.
    async fn control_transfer(
        &self,
        bus_number: u8,
        device_address: u8,
        setup: ControlSetup,
        direction: Direction,
        data: Vec<u8>,
        timeout_ms: u32,
    ) -> Result<Vec<u8>>;

    /// Issue a bulk or interrupt transfer on `endpoint_address`.
    async fn bulk_or_interrupt_transfer(
        &self,
        bus_number: u8,
        device_address: u8,
        endpoint_address: u8,
        direction: Direction,
        data: Vec<u8>,
        timeout_ms: u32,
    ) -> Result<Vec<u8>>;

    /// Issue an isochronous transfer, returning one buffer per packet.
    async fn isoch_transfer(
        &self,
        bus_number: u8,
        device_address: u8,
        endpoint_address: u8,
        direction: Direction,
        packets: Vec<Vec<u8>>,
        timeout_ms: u32,
    ) -> Result<Vec<Vec<u8>>>;

    /// Abort all pending transfers on `endpoint_address`.
    async fn abort_pipe(&self, bus_number: u8, device_address: u8, endpoint_address: u8) -> Result<()>;

    /// Best-effort cancellation of one in-flight transfer by the kind it
    /// was submitted as. Returns `Ok(true)` if something was actually
    /// cancelled, `Ok(false)` if the transfer had already completed.
    async fn cancel_transfer(&self, bus_number: u8, device_address: u8, kind: TransferKind) -> Result<bool>;

    /// Current configuration value (`GET_CONFIGURATION`).
    async fn get_configuration(&self, bus_number: u8, device_address: u8) -> Result<u8>;

    /// Current alternate setting of `interface_number` (`GET_INTERFACE`).
    async fn get_interface(&self, bus_number: u8, device_address: u8, interface_number: u8) -> Result<u8>;

    /// Reset the port the device is attached to.
    async fn reset_port(&self, bus_number: u8, device_address: u8) -> Result<()>;
}

#[cfg(any(test, feature = "mock-host"))]
pub mod mock {
    //! An in-memory [`UsbHostStack`] for tests, recording calls instead of
    //! talking to real hardware.

    use std::sync::Mutex;

    use super::*;

    /// A scripted response queue for one entry point, consumed in order.
    #[derive(Default)]
    struct Scripted<T> {
        responses: std::collections::VecDeque<Result<T>>,
    }

    /// Mock host stack. Devices are pre-seeded via [`MockHostStack::seed_device`];
    /// transfer calls succeed with an empty/echoed payload unless a failure
    /// is queued with `fail_next_transfer`.
    pub struct MockHostStack {
        devices: Mutex<Vec<DiscoveredDevice>>,
        fail_next_transfer: Mutex<Option<crate::error::UsbError>>,
        calls: Mutex<Vec<String>>,
    }

    impl Default for MockHostStack {
        fn default() -> Self {
            Self { devices: Mutex::new(Vec::new()), fail_next_transfer: Mutex::new(None), calls: Mutex::new(Vec::new()) }
        }
    }

    impl MockHostStack {
        /// Add a device to the next [`list_devices`](UsbHostStack::list_devices) result.
        pub fn seed_device(&self, device: DiscoveredDevice) {
            self.devices.lock().unwrap().push(device);
        }

        /// Queue a failure for the next transfer-shaped call.
        pub fn fail_next_transfer(&self, err: crate::error::UsbError) {
            *self.fail_next_transfer.lock().unwrap() = Some(err);
        }

        /// Calls made so far, in order, for assertion in tests.
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn take_failure(&self) -> Option<crate::error::UsbError> {
            self.fail_next_transfer.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl UsbHostStack for MockHostStack {
        async fn list_devices(&self) -> Result<Vec<DiscoveredDevice>> {
            Ok(self.devices.lock().unwrap().clone())
        }

        async fn open(&self, bus_number: u8, device_address: u8) -> Result<()> {
            self.record(format!("open({bus_number},{device_address})"));
            Ok(())
        }

        async fn close(&self, bus_number: u8, device_address: u8) {
            self.record(format!("close({bus_number},{device_address})"));
        }

        async fn select_configuration(&self, bus_number: u8, device_address: u8, configuration_value: u8) -> Result<()> {
            self.record(format!("select_configuration({bus_number},{device_address},{configuration_value})"));
            Ok(())
        }

        async fn select_interface(
            &self,
            bus_number: u8,
            device_address: u8,
            interface_number: u8,
            alternate_setting: u8,
        ) -> Result<Vec<u8>> {
            self.record(format!(
                "select_interface({bus_number},{device_address},{interface_number},{alternate_setting})"
            ));
            Ok(vec![0x81, 0x02])
        }

        async fn control_transfer(
            &self,
            bus_number: u8,
            device_address: u8,
            _setup: ControlSetup,
            direction: Direction,
            data: Vec<u8>,
            _timeout_ms: u32,
        ) -> Result<Vec<u8>> {
            self.record(format!("control_transfer({bus_number},{device_address})"));
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            Ok(if direction == Direction::In { data } else { Vec::new() })
        }

        async fn bulk_or_interrupt_transfer(
            &self,
            bus_number: u8,
            device_address: u8,
            endpoint_address: u8,
            direction: Direction,
            data: Vec<u8>,
            _timeout_ms: u32,
        ) -> Result<Vec<u8>> {
            self.record(format!("bulk_or_interrupt_transfer({bus_number},{device_address},{endpoint_address})"));
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            Ok(if direction == Direction::In { data } else { Vec::new() })
        }

        async fn isoch_transfer(
            &self,
            bus_number: u8,
            device_address: u8,
            endpoint_address: u8,
            _direction: Direction,
            packets: Vec<Vec<u8>>,
            _timeout_ms: u32,
        ) -> Result<Vec<Vec<u8>>> {
            self.record(format!("isoch_transfer({bus_number},{device_address},{endpoint_address})"));
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            Ok(packets)
        }

        async fn abort_pipe(&self, bus_number: u8, device_address: u8, endpoint_address: u8) -> Result<()> {
            self.record(format!("abort_pipe({bus_number},{device_address},{endpoint_address})"));
            Ok(())
        }

        async fn cancel_transfer(&self, bus_number: u8, device_address: u8, _kind: TransferKind) -> Result<bool> {
            self.record(format!("cancel_transfer({bus_number},{device_address})"));
            Ok(true)
        }

        async fn get_configuration(&self, _bus_number: u8, _device_address: u8) -> Result<u8> {
            Ok(1)
        }

        async fn get_interface(&self, _bus_number: u8, _device_address: u8, _interface_number: u8) -> Result<u8> {
            Ok(0)
        }

        async fn reset_port(&self, bus_number: u8, device_address: u8) -> Result<()> {
            self.record(format!("reset_port({bus_number},{device_address})"));
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn control_transfer_echoes_in_data_and_records_call() {
            let host = MockHostStack::default();
            let setup = ControlSetup { request_type: 0x80, request: 6, value: 0x0100, index: 0 };
            let out = host
                .control_transfer(1, 2, setup, Direction::In, vec![1, 2, 3], 1000)
                .await
                .unwrap();
            assert_eq!(out, vec![1, 2, 3]);
            assert_eq!(host.calls(), vec!["control_transfer(1,2)"]);
        }

        #[tokio::test]
        async fn queued_failure_is_returned_once() {
            let host = MockHostStack::default();
            host.fail_next_transfer(crate::error::UsbError::Timeout);
            let setup = ControlSetup { request_type: 0, request: 0, value: 0, index: 0 };
            assert!(host.control_transfer(1, 2, setup, Direction::Out, vec![], 0).await.is_err());
            assert!(host.control_transfer(1, 2, setup, Direction::Out, vec![], 0).await.is_ok());
        }
    }
}
