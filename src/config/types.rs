//! Configuration type definitions.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A channel definition: `{ name: short ASCII <= 7 chars, options }`.
/// Immutable after the channel is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    /// Channel name, at most 7 ASCII characters (the RDP virtual channel
    /// name limit).
    pub name: String,
    /// Option bitmask.
    pub options: ChannelOptions,
}

impl ChannelDefinition {
    /// Construct a new channel definition.
    pub fn new(name: impl Into<String>, options: ChannelOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

bitflags! {
    /// Per-channel option bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ChannelOptions: u32 {
        /// Channel is initialized at session start.
        const INITIALIZED = 0x0000_0001;
        /// Channel data is encrypted.
        const ENCRYPT = 0x0000_0002;
        /// Channel data is compressed.
        const COMPRESS = 0x0000_0004;
        /// Show channel name/protocol in diagnostics.
        const SHOW_PROTOCOL = 0x0000_0008;
    }
}

/// Addin registry configuration for dynamic discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddinConfig {
    /// Directory scanned for dynamically discovered addins.
    pub dynamic_search_path: PathBuf,
    /// Shared-library filename prefix (e.g. `libfreerdp-client`).
    pub shared_library_prefix: String,
    /// Shared-library filename extension (e.g. `so`, `dll`, `dylib`).
    pub shared_library_extension: String,
}

bitflags! {
    /// Session-configured bitmask gating directions of clipboard data
    /// (and, separately, files).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ClipboardFeatureMask: u32 {
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

/// USB redirection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbConfig {
    /// (vendor_id, product_id) pairs auto-added on hotplug arrival.
    pub auto_add: Vec<(u16, u16)>,
    /// USB device classes filtered out of auto-add by default.
    pub class_filter: UsbClassFilter,
    /// Device-teardown retry budget in 200ms ticks (spec: 25 x 200ms = 5s).
    pub teardown_retry_ticks: u32,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            auto_add: Vec::new(),
            class_filter: UsbClassFilter::default(),
            teardown_retry_ticks: 25,
        }
    }
}

/// Default-deny USB device class filter applied during hotplug auto-add.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbClassFilter {
    /// Filtered device/interface classes (default: hub, mass-storage,
    /// smartcard, content-security).
    pub denied_classes: Vec<u8>,
}

impl Default for UsbClassFilter {
    fn default() -> Self {
        Self {
            denied_classes: vec![0x09, 0x08, 0x0B, 0x0D],
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level (error/warn/info/debug/trace).
    pub level: String,
    /// Output format: "pretty", "compact" or "json".
    pub format: String,
    /// Optional directory for rotated log files (`tracing-appender`).
    pub log_dir: Option<PathBuf>,
}
