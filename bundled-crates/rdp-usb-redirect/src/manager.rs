//! Device registration, lifecycle, and hotplug, grounded on
//! `libusb_udevman.c`'s `UDEVMAN` (registration tables, `loading_lock`,
//! the `searchman.c`-driven auto-add scan) and generalized so that the
//! manager is the sole owner of [`UsbDeviceRecord`]s, and a tokio task
//! replaces the original's OS-thread hotplug poll loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::UsbConfig;
use crate::device::{DeviceDescriptor, UsbDeviceRecord};
use crate::error::{Result, UsbError};
use crate::host::{DiscoveredDevice, UsbHostStack};

/// Events the manager emits as devices come and go, consumed by the
/// control-stream FSM to drive `AddVirtualChannel`/removal notices.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A device was registered (explicitly, or via hotplug auto-add) and
    /// is ready to be announced to the peer.
    Registered(u32),
    /// A device disappeared; any channel bound to it should be retracted.
    Removed(u32),
}

struct Registered {
    record: Arc<UsbDeviceRecord>,
}

/// Owns every redirected [`UsbDeviceRecord`] for one session. Channel
/// bindings elsewhere in the runtime hold only a `usb_device_id` and look
/// devices up here.
pub struct UsbDeviceManager {
    host: Arc<dyn UsbHostStack>,
    config: UsbConfig,
    next_id: AtomicU32,
    by_id: RwLock<HashMap<u32, Registered>>,
    by_location: RwLock<HashMap<(u8, u8), u32>>,
    events_tx: mpsc::UnboundedSender<DeviceEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<DeviceEvent>>>,
}

impl UsbDeviceManager {
    /// Construct a manager over `host`, with no devices registered yet.
    pub fn new(host: Arc<dyn UsbHostStack>, config: UsbConfig) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            host,
            config,
            next_id: AtomicU32::new(crate::constants::BASE_USBDEVICE_NUM),
            by_id: RwLock::new(HashMap::new()),
            by_location: RwLock::new(HashMap::new()),
            events_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
        })
    }

    /// Take the device-event receiver. May only be called once; intended
    /// for the control-stream FSM to drive off of.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<DeviceEvent>> {
        self.events_rx.lock().take()
    }

    /// Whether `descriptor` passes the configured class filter: every
    /// interface class (and, for a non-composite device, the device
    /// class) must be absent from the denylist.
    fn passes_class_filter(&self, descriptor: &DeviceDescriptor) -> bool {
        let denied = &self.config.class_filter.denied_classes;
        if descriptor.is_composite() {
            !descriptor.interface_classes.iter().any(|c| denied.contains(c))
        } else {
            !denied.contains(&descriptor.device_class)
        }
    }

    fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst) & crate::constants::USB_DEVICE_ID_MASK
    }

    fn register_at(&self, bus_number: u8, device_address: u8, descriptor: DeviceDescriptor) -> u32 {
        let id = self.allocate_id();
        let record = Arc::new(UsbDeviceRecord::new(id, bus_number, device_address, descriptor));
        self.by_id.write().insert(id, Registered { record });
        self.by_location.write().insert((bus_number, device_address), id);
        let _ = self.events_tx.send(DeviceEvent::Registered(id));
        id
    }

    /// Register a device by vendor/product id, scanning currently
    /// attached devices for a match. A device already registered at the
    /// matched location is a no-op returning its existing id.
    pub async fn register_by_vid_pid(&self, vendor_id: u16, product_id: u16) -> Result<u32> {
        let devices = self.host.list_devices().await?;
        let found = devices
            .into_iter()
            .find(|d| d.descriptor.vendor_id == vendor_id && d.descriptor.product_id == product_id)
            .ok_or(UsbError::NoDevice(0))?;
        self.register_discovered(found).await
    }

    /// Register a device by its bus/address location. A device already
    /// registered at that location is a no-op returning its existing id.
    pub async fn register_by_bus_addr(&self, bus_number: u8, device_address: u8) -> Result<u32> {
        if let Some(id) = self.by_location.read().get(&(bus_number, device_address)) {
            return Ok(*id);
        }
        let devices = self.host.list_devices().await?;
        let found = devices
            .into_iter()
            .find(|d| d.bus_number == bus_number && d.device_address == device_address)
            .ok_or(UsbError::NoDevice(0))?;
        self.register_discovered(found).await
    }

    async fn register_discovered(&self, device: DiscoveredDevice) -> Result<u32> {
        if let Some(id) = self.by_location.read().get(&(device.bus_number, device.device_address)) {
            return Ok(*id);
        }
        self.host.open(device.bus_number, device.device_address).await?;
        Ok(self.register_at(device.bus_number, device.device_address, device.descriptor))
    }

    /// Look up a registered device by its allocated id.
    pub fn get(&self, usb_device_id: u32) -> Result<Arc<UsbDeviceRecord>> {
        self.by_id
            .read()
            .get(&usb_device_id)
            .map(|r| r.record.clone())
            .ok_or(UsbError::NoDevice(usb_device_id))
    }

    /// Every registered device not yet announced via `AddVirtualChannel`.
    pub fn pending_announcements(&self) -> Vec<Arc<UsbDeviceRecord>> {
        self.by_id
            .read()
            .values()
            .map(|r| r.record.clone())
            .filter(|r| !r.is_already_sent())
            .collect()
    }

    /// Bind the next announced device that has no device channel yet to
    /// `channel_id`, in FIFO (registration) order, and mark it bound.
    /// Returns `None` if every announced device already has one.
    pub fn bind_next_device(&self, channel_id: u32) -> Option<Arc<UsbDeviceRecord>> {
        let mut candidates: Vec<Arc<UsbDeviceRecord>> = self
            .by_id
            .read()
            .values()
            .map(|r| r.record.clone())
            .filter(|r| r.is_already_sent() && r.bound_channel_id().is_none())
            .collect();
        candidates.sort_by_key(|r| r.usb_device_id);
        let device = candidates.into_iter().next()?;
        device.bind_channel(channel_id);
        Some(device)
    }

    /// Unregister and tear down the device at `usb_device_id`, waiting up
    /// to the configured retry budget for in-flight dispatcher work to
    /// drain before releasing it.
    pub async fn teardown(&self, usb_device_id: u32) -> Result<()> {
        let record = self.get(usb_device_id)?;
        record.mark_gone();

        let mut ticks = 0u32;
        while !record.is_idle() && ticks < self.config.teardown_retry_ticks {
            tokio::time::sleep(Duration::from_millis(crate::constants::TEARDOWN_RETRY_TICK_MS)).await;
            ticks += 1;
        }
        if ticks >= self.config.teardown_retry_ticks {
            warn!(usb_device_id, "teardown budget exhausted with dispatcher work still in flight");
        }

        self.by_id.write().remove(&usb_device_id);
        self.by_location.write().remove(&(record.bus_number, record.device_address));
        self.host.close(record.bus_number, record.device_address).await;
        let _ = self.events_tx.send(DeviceEvent::Removed(usb_device_id));
        info!(usb_device_id, "usb device torn down");
        Ok(())
    }

    /// Spawn the hotplug poll loop: periodically re-lists host devices and
    /// auto-registers any matching `config.auto_add` vid/pid pair that
    /// passes the class filter and isn't already registered.
    pub fn spawn_hotplug(self: &Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(crate::constants::TEARDOWN_POLL_MS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = manager.hotplug_scan_once().await {
                            debug!(%err, "hotplug scan failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    pub(crate) async fn hotplug_scan_once(&self) -> Result<()> {
        let devices = self.host.list_devices().await?;
        for device in devices {
            if self.by_location.read().contains_key(&(device.bus_number, device.device_address)) {
                continue;
            }
            let auto_add = self
                .config
                .auto_add
                .iter()
                .any(|(vid, pid)| *vid == device.descriptor.vendor_id && *pid == device.descriptor.product_id);
            if !auto_add {
                continue;
            }
            if !self.passes_class_filter(&device.descriptor) {
                debug!(vendor_id = device.descriptor.vendor_id, product_id = device.descriptor.product_id, "hotplug device rejected by class filter");
                continue;
            }
            self.host.open(device.bus_number, device.device_address).await?;
            let id = self.register_at(device.bus_number, device.device_address, device.descriptor.clone());
            info!(usb_device_id = id, "hotplug auto-registered device");
        }

        let present: std::collections::HashSet<(u8, u8)> =
            devices.iter().map(|d| (d.bus_number, d.device_address)).collect();
        let gone: Vec<u32> = self
            .by_id
            .read()
            .values()
            .filter(|r| !present.contains(&(r.record.bus_number, r.record.device_address)))
            .map(|r| r.record.usb_device_id)
            .collect();
        for id in gone {
            if let Ok(record) = self.get(id) {
                record.mark_gone();
                let _ = self.events_tx.send(DeviceEvent::Removed(id));
            }
        }
        Ok(())
    }
}
