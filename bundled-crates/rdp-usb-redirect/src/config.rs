//! Configuration this crate needs to run standalone of the runtime's own
//! config layer; the root crate maps its `config::types::UsbConfig` into
//! this shape when constructing a [`crate::manager::UsbDeviceManager`].

use serde::{Deserialize, Serialize};

/// USB redirection configuration: which devices to auto-redirect, which
/// device classes to always deny, and how long to wait for in-flight
/// dispatcher work to drain on teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbConfig {
    /// `(vendorId, productId)` pairs auto-registered as they're seen,
    /// whether already attached at startup or plugged in later.
    pub auto_add: Vec<(u16, u16)>,
    /// Device classes never auto-redirected regardless of `auto_add`.
    pub class_filter: UsbClassFilter,
    /// Teardown retry budget: ticks of [`crate::constants::TEARDOWN_RETRY_TICK_MS`]
    /// to wait for a device's in-flight dispatcher work to drain.
    pub teardown_retry_ticks: u32,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            auto_add: Vec::new(),
            class_filter: UsbClassFilter::default(),
            teardown_retry_ticks: crate::constants::TEARDOWN_RETRY_TICKS,
        }
    }
}

/// Device classes excluded from hotplug auto-add by default (hubs, smart
/// card readers, and other classes that should not be silently redirected).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbClassFilter {
    /// `bDeviceClass` values (or, for composite devices, interface
    /// classes) that are never auto-redirected.
    pub denied_classes: Vec<u8>,
}

impl Default for UsbClassFilter {
    fn default() -> Self {
        Self {
            denied_classes: vec![
                crate::constants::device_class::HUB,
                crate::constants::device_class::MASS_STORAGE,
                crate::constants::device_class::SMART_CARD,
                crate::constants::device_class::CONTENT_SECURITY,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_denies_hub_mass_storage_smartcard_content_security() {
        let filter = UsbClassFilter::default();
        assert_eq!(filter.denied_classes, vec![0x09, 0x08, 0x0B, 0x0D]);
    }

    #[test]
    fn default_teardown_budget_matches_constant() {
        assert_eq!(UsbConfig::default().teardown_retry_ticks, crate::constants::TEARDOWN_RETRY_TICKS);
    }
}
