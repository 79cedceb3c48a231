//! Runtime configuration.
//!
//! Handles loading, validation and merging of configuration from a TOML
//! file and CLI overrides, following the same `Config::load` /
//! `with_overrides` shape used throughout the surrounding tooling.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod types;

pub use types::{
    AddinConfig, ChannelDefinition, ChannelOptions, ClipboardFeatureMask, LoggingConfig,
    UsbClassFilter, UsbConfig,
};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Channel definitions known at startup, plus the assembler's
    /// thread-dispatch mode.
    pub channels: ChannelRuntimeConfig,
    /// Addin registry configuration (dynamic discovery search path).
    pub addin: AddinConfig,
    /// Clipboard virtual channel configuration.
    pub clipboard: ClipboardRuntimeConfig,
    /// USB redirection configuration.
    pub usb: UsbConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Assembler and channel-table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRuntimeConfig {
    /// Known channel definitions (name + options bitmask). Immutable after
    /// load, per the data model's "immutable after open" invariant.
    pub definitions: Vec<ChannelDefinition>,
    /// When true, the channel assembler invokes handlers inline on LAST
    /// instead of posting to the dispatch queue's worker task.
    pub disable_threads: bool,
}

/// Clipboard-specific runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardRuntimeConfig {
    /// Gating bitmask for clipboard data/file-contents directions.
    pub feature_mask: ClipboardFeatureMask,
    /// Whether the client desires long format names, file streaming,
    /// no-file-paths and locking when the server offers them. The
    /// negotiated value is the AND of this and the server's offer.
    pub desired_caps: DesiredCaps,
}

/// Client-desired capability bits (subset negotiated against server offer).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DesiredCaps {
    /// Desire USE_LONG_FORMAT_NAMES.
    pub long_format_names: bool,
    /// Desire STREAM_FILECLIP_ENABLED.
    pub stream_file_clip: bool,
    /// Desire FILECLIP_NO_FILE_PATHS.
    pub file_clip_no_file_paths: bool,
    /// Desire CAN_LOCK_CLIPDATA.
    pub can_lock_clip_data: bool,
    /// Desire HUGE_FILE_SUPPORT.
    pub huge_file_support: bool,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("failed to read config file: {path}"))?;
        let config: Config = toml::from_str(&content).context("failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Build the default configuration, used when no config file is given.
    pub fn default_config() -> Result<Self> {
        Ok(Config {
            channels: ChannelRuntimeConfig {
                definitions: vec![
                    ChannelDefinition::new("cliprdr", ChannelOptions::INITIALIZED),
                    ChannelDefinition::new(
                        "urbdrc",
                        ChannelOptions::INITIALIZED | ChannelOptions::COMPRESS,
                    ),
                ],
                disable_threads: false,
            },
            addin: AddinConfig {
                dynamic_search_path: PathBuf::from("/usr/lib/freerdp3"),
                shared_library_prefix: "libfreerdp-client".to_string(),
                shared_library_extension: "so".to_string(),
            },
            clipboard: ClipboardRuntimeConfig {
                feature_mask: ClipboardFeatureMask::all(),
                desired_caps: DesiredCaps {
                    long_format_names: true,
                    stream_file_clip: true,
                    file_clip_no_file_paths: false,
                    can_lock_clip_data: true,
                    huge_file_support: true,
                },
            },
            usb: UsbConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                log_dir: None,
            },
        })
    }

    /// Validate cross-field invariants not expressible in the type system.
    pub fn validate(&self) -> Result<()> {
        for def in &self.channels.definitions {
            if def.name.is_empty() || def.name.len() > 7 || !def.name.is_ascii() {
                anyhow::bail!(
                    "channel name {:?} must be 1-7 ASCII characters",
                    def.name
                );
            }
        }
        match self.logging.format.as_str() {
            "json" | "pretty" | "compact" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// Apply CLI overrides onto a loaded (or default) configuration.
    pub fn with_overrides(mut self, disable_threads: Option<bool>) -> Self {
        if let Some(v) = disable_threads {
            self.channels.disable_threads = v;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config().expect("failed to build default config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default_config().unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.channels.definitions.len(), 2);
    }

    #[test]
    fn rejects_overlong_channel_name() {
        let mut config = Config::default_config().unwrap();
        config.channels.definitions.push(ChannelDefinition::new(
            "toolongname",
            ChannelOptions::INITIALIZED,
        ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_log_format() {
        let mut config = Config::default_config().unwrap();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn with_overrides_sets_disable_threads() {
        let config = Config::default_config().unwrap().with_overrides(Some(true));
        assert!(config.channels.disable_threads);
    }
}
