//! Static addin table and entry-point resolution.
//!
//! Grounded on `channels/client/addin.c` / `channels/client/tables.c`: a
//! table of entry-point kinds, and a table of channel names each holding a
//! default entry plus a subsystem table. `freerdp_channels_find_static_entry`'s
//! string-compare dispatch between `VirtualChannelEntry` and
//! `DeviceServiceEntry` is generalized here to all four kinds via
//! [`EntryKind`].

use crate::error::{Result, RuntimeError};
use bitflags::bitflags;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// The four addin entry-point kinds FreeRDP distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Legacy static virtual channel entry point.
    VirtualChannelEntry,
    /// Extended static virtual channel entry point (capability-negotiated).
    VirtualChannelEntryEx,
    /// Dynamic virtual channel plugin entry point.
    DVCPluginEntry,
    /// Device redirection service entry point.
    DeviceServiceEntry,
}

bitflags! {
    /// Flags describing which kind of load is being requested, mirroring
    /// the original's `CHANNEL_OPTION_*`/internal load flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoadFlags: u32 {
        /// A dynamic-channel ("DVC") addin is requested.
        const DYNAMIC_CHANNEL = 0x01;
        /// A device-redirection addin is requested.
        const DEVICE = 0x02;
        /// A static virtual channel addin is requested.
        const STATIC_CHANNEL = 0x04;
        /// Within a static-channel request, prefer the extended entry point.
        const ENTRYEX = 0x08;
    }
}

impl LoadFlags {
    /// Determine the expected [`EntryKind`] for this combination of flags:
    /// DYNAMIC_CHANNEL -> DVCPluginEntry, DEVICE -> DeviceServiceEntry,
    /// STATIC_CHANNEL -> VirtualChannelEntry or VirtualChannelEntryEx
    /// depending on the ENTRYEX bit.
    pub fn expected_kind(self) -> Option<EntryKind> {
        if self.contains(LoadFlags::DYNAMIC_CHANNEL) {
            Some(EntryKind::DVCPluginEntry)
        } else if self.contains(LoadFlags::DEVICE) {
            Some(EntryKind::DeviceServiceEntry)
        } else if self.contains(LoadFlags::STATIC_CHANNEL) {
            if self.contains(LoadFlags::ENTRYEX) {
                Some(EntryKind::VirtualChannelEntryEx)
            } else {
                Some(EntryKind::VirtualChannelEntry)
            }
        } else {
            None
        }
    }
}

/// An opaque, cloneable handle to a resolved entry point. The runtime does
/// not call into real shared-library code; this crate stops at resolution
/// and hands callers a reference they can match on or invoke through their
/// own registered closure.
pub type EntryPointRef = Arc<dyn Fn() + Send + Sync>;

/// A named entry point registered directly (no filename parsing involved),
/// used to populate [`EntryPointRegistry`] from in-process code.
#[derive(Clone)]
pub struct NamedEntryPoint {
    /// Entry point kind.
    pub kind: EntryKind,
    /// Symbol or addin name.
    pub name: String,
    /// The resolved callable.
    pub entry: EntryPointRef,
}

/// Table of entry points indexed first by kind, then by name — models
/// `CLIENT_STATIC_ENTRY_TABLES`.
#[derive(Clone, Default)]
pub struct EntryPointRegistry {
    by_kind: HashMap<EntryKind, HashMap<String, EntryPointRef>>,
}

impl EntryPointRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one entry point.
    pub fn register(&mut self, entry: NamedEntryPoint) {
        self.by_kind
            .entry(entry.kind)
            .or_default()
            .insert(entry.name, entry.entry);
    }

    /// Look up an entry point by kind and name.
    pub fn find(&self, kind: EntryKind, name: &str) -> Option<EntryPointRef> {
        self.by_kind.get(&kind)?.get(name).cloned()
    }
}

/// One subsystem registered under a channel, e.g. a particular USB backend.
#[derive(Clone)]
pub struct SubsystemEntry {
    /// Subsystem name; empty string is reserved for the channel's own
    /// default entry and never appears here.
    pub subsystem: String,
    /// Optional type discriminator within the subsystem.
    pub type_name: Option<String>,
    /// The resolved callable.
    pub entry: EntryPointRef,
}

/// One channel's static addin record — models `CLIENT_STATIC_ADDIN_TABLE`.
#[derive(Clone)]
pub struct AddinRecord {
    /// Kind every entry point under this record must match.
    pub kind: EntryKind,
    /// The channel's own entry point, selected when subsystem is empty.
    pub default_entry: EntryPointRef,
    /// Registered subsystems, if any.
    pub subsystems: Vec<SubsystemEntry>,
}

/// The full static addin table, keyed by channel name.
pub type AddinTable = HashMap<String, AddinRecord>;

bitflags! {
    /// Flags describing what an enumerated addin record names.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AddinFlags: u32 {
        /// Record names a channel.
        const NAME = 0x01;
        /// Record additionally names a subsystem.
        const SUBSYSTEM = 0x02;
        /// Record additionally names a type within the subsystem.
        const TYPE = 0x04;
    }
}

/// One record produced by [`Registry::enumerate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedAddin {
    /// Channel name.
    pub channel: String,
    /// Subsystem name, if this record names one.
    pub subsystem: Option<String>,
    /// Type name, if this record names one.
    pub type_name: Option<String>,
    /// Which components this record names.
    pub flags: AddinFlags,
}

/// Which table `enumerate` should walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddinSource {
    /// Walk the statically linked addin table.
    Static,
    /// Parse filenames from the dynamic discovery directory listing.
    Dynamic,
}

/// The immutable, process-wide addin registry. Built once at startup; no
/// synchronization is needed for lookups since it is never mutated after
/// construction.
pub struct Registry {
    table: AddinTable,
    /// Channel names permitted to resolve `VirtualChannelEntryEx`.
    entryex_capable: HashSet<String>,
}

impl Registry {
    /// Construct a registry from a prebuilt addin table and the set of
    /// channel names that support the extended entry point.
    pub fn new(table: AddinTable, entryex_capable: HashSet<String>) -> Self {
        Self {
            table,
            entryex_capable,
        }
    }

    /// Resolve a plug-in entry point by (channel-name, subsystem, kind).
    ///
    /// `subsystem` empty selects the channel's default entry. `type_name`,
    /// if given, must additionally match the selected subsystem entry.
    pub fn load_static_addin(
        &self,
        name: &str,
        subsystem: &str,
        type_name: Option<&str>,
        flags: LoadFlags,
    ) -> Result<EntryPointRef> {
        let expected_kind = flags.expected_kind().ok_or_else(|| RuntimeError::BadProc(
            "load_static_addin called with no STATIC_CHANNEL/DYNAMIC_CHANNEL/DEVICE flag".into(),
        ))?;

        if expected_kind == EntryKind::VirtualChannelEntryEx
            && !self.entryex_capable.contains(name)
        {
            return Err(RuntimeError::AddinNotFound {
                channel: name.to_string(),
                subsystem: None,
            });
        }

        let record = self
            .table
            .get(name)
            .filter(|record| record.kind == expected_kind)
            .ok_or_else(|| RuntimeError::AddinNotFound {
                channel: name.to_string(),
                subsystem: None,
            })?;

        if subsystem.is_empty() {
            return Ok(record.default_entry.clone());
        }

        record
            .subsystems
            .iter()
            .find(|s| {
                s.subsystem == subsystem
                    && match type_name {
                        Some(t) => s.type_name.as_deref() == Some(t),
                        None => true,
                    }
            })
            .map(|s| s.entry.clone())
            .ok_or_else(|| RuntimeError::AddinNotFound {
                channel: name.to_string(),
                subsystem: Some(subsystem.to_string()),
            })
    }

    /// Enumerate addin records, optionally filtered by name/subsystem/type,
    /// from either the static table or a dynamic filename listing.
    pub fn enumerate(
        &self,
        name_filter: Option<&str>,
        subsystem_filter: Option<&str>,
        type_filter: Option<&str>,
        source: AddinSource,
        dynamic_filenames: &[String],
        dynamic_pattern: &crate::addin::discover::FilenamePattern,
    ) -> Vec<EnumeratedAddin> {
        match source {
            AddinSource::Static => self.enumerate_static(name_filter, subsystem_filter, type_filter),
            AddinSource::Dynamic => {
                self.enumerate_dynamic(name_filter, subsystem_filter, type_filter, dynamic_filenames, dynamic_pattern)
            }
        }
    }

    fn enumerate_static(
        &self,
        name_filter: Option<&str>,
        subsystem_filter: Option<&str>,
        type_filter: Option<&str>,
    ) -> Vec<EnumeratedAddin> {
        let mut out = Vec::new();
        for (name, record) in &self.table {
            if name_filter.is_some_and(|f| f != name) {
                continue;
            }
            if subsystem_filter.is_none() {
                out.push(EnumeratedAddin {
                    channel: name.clone(),
                    subsystem: None,
                    type_name: None,
                    flags: AddinFlags::NAME,
                });
            }
            for sub in &record.subsystems {
                if subsystem_filter.is_some_and(|f| f != sub.subsystem) {
                    continue;
                }
                if type_filter.is_some_and(|f| sub.type_name.as_deref() != Some(f)) {
                    continue;
                }
                let mut flags = AddinFlags::NAME | AddinFlags::SUBSYSTEM;
                if sub.type_name.is_some() {
                    flags |= AddinFlags::TYPE;
                }
                out.push(EnumeratedAddin {
                    channel: name.clone(),
                    subsystem: Some(sub.subsystem.clone()),
                    type_name: sub.type_name.clone(),
                    flags,
                });
            }
        }
        out
    }

    fn enumerate_dynamic(
        &self,
        name_filter: Option<&str>,
        subsystem_filter: Option<&str>,
        type_filter: Option<&str>,
        filenames: &[String],
        pattern: &crate::addin::discover::FilenamePattern,
    ) -> Vec<EnumeratedAddin> {
        let mut out = Vec::new();
        for filename in filenames {
            match crate::addin::discover::parse_dynamic_addin_filename(filename, pattern) {
                Some(parsed) => {
                    if name_filter.is_some_and(|f| f != parsed.name) {
                        continue;
                    }
                    if subsystem_filter
                        .is_some_and(|f| parsed.subsystem.as_deref() != Some(f))
                    {
                        continue;
                    }
                    if type_filter.is_some_and(|f| parsed.type_name.as_deref() != Some(f)) {
                        continue;
                    }
                    let mut flags = AddinFlags::NAME;
                    if parsed.subsystem.is_some() {
                        flags |= AddinFlags::SUBSYSTEM;
                    }
                    if parsed.type_name.is_some() {
                        flags |= AddinFlags::TYPE;
                    }
                    out.push(EnumeratedAddin {
                        channel: parsed.name,
                        subsystem: parsed.subsystem,
                        type_name: parsed.type_name,
                        flags,
                    });
                }
                None => warn!(filename, "skipping dynamic addin file: pattern mismatch"),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addin::discover::FilenamePattern;

    fn noop_entry() -> EntryPointRef {
        Arc::new(|| {})
    }

    fn sample_table() -> AddinTable {
        let mut table = AddinTable::new();
        table.insert(
            "cliprdr".to_string(),
            AddinRecord {
                kind: EntryKind::VirtualChannelEntry,
                default_entry: noop_entry(),
                subsystems: vec![],
            },
        );
        table.insert(
            "urbdrc".to_string(),
            AddinRecord {
                kind: EntryKind::VirtualChannelEntryEx,
                default_entry: noop_entry(),
                subsystems: vec![SubsystemEntry {
                    subsystem: "libusb".to_string(),
                    type_name: Some("hotplug".to_string()),
                    entry: noop_entry(),
                }],
            },
        );
        table
    }

    #[test]
    fn loads_default_entry_for_empty_subsystem() {
        let registry = Registry::new(sample_table(), HashSet::new());
        let result = registry.load_static_addin("cliprdr", "", None, LoadFlags::STATIC_CHANNEL);
        assert!(result.is_ok());
    }

    #[test]
    fn entryex_requires_capability_membership() {
        let registry = Registry::new(sample_table(), HashSet::new());
        let result = registry.load_static_addin(
            "urbdrc",
            "",
            None,
            LoadFlags::STATIC_CHANNEL | LoadFlags::ENTRYEX,
        );
        assert!(matches!(result, Err(RuntimeError::AddinNotFound { .. })));

        let mut capable = HashSet::new();
        capable.insert("urbdrc".to_string());
        let registry = Registry::new(sample_table(), capable);
        let result = registry.load_static_addin(
            "urbdrc",
            "",
            None,
            LoadFlags::STATIC_CHANNEL | LoadFlags::ENTRYEX,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let registry = Registry::new(sample_table(), HashSet::new());
        let result = registry.load_static_addin("cliprdr", "", None, LoadFlags::DYNAMIC_CHANNEL);
        assert!(matches!(result, Err(RuntimeError::AddinNotFound { .. })));
    }

    #[test]
    fn subsystem_and_type_must_both_match() {
        let mut capable = HashSet::new();
        capable.insert("urbdrc".to_string());
        let registry = Registry::new(sample_table(), capable);
        let flags = LoadFlags::STATIC_CHANNEL | LoadFlags::ENTRYEX;
        assert!(registry
            .load_static_addin("urbdrc", "libusb", Some("hotplug"), flags)
            .is_ok());
        assert!(registry
            .load_static_addin("urbdrc", "libusb", Some("other"), flags)
            .is_err());
    }

    #[test]
    fn enumerate_static_emits_channel_and_subsystem_records() {
        let registry = Registry::new(sample_table(), HashSet::new());
        let pattern = FilenamePattern::new("libfreerdp-client-", "so");
        let records = registry.enumerate(None, None, None, AddinSource::Static, &[], &pattern);
        assert_eq!(records.len(), 3);
        assert!(records.iter().any(|r| r.channel == "cliprdr" && r.flags == AddinFlags::NAME));
        assert!(records
            .iter()
            .any(|r| r.channel == "urbdrc" && r.subsystem.is_none()));
        assert!(records
            .iter()
            .any(|r| r.channel == "urbdrc" && r.subsystem.as_deref() == Some("libusb")));
    }

    #[test]
    fn enumerate_dynamic_skips_unparseable_names() {
        let registry = Registry::new(sample_table(), HashSet::new());
        let pattern = FilenamePattern::new("libfreerdp-client-", "so");
        let filenames = vec![
            "libfreerdp-client-rdpsnd-client.so".to_string(),
            "not-even-close.txt".to_string(),
        ];
        let records =
            registry.enumerate(None, None, None, AddinSource::Dynamic, &filenames, &pattern);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].channel, "rdpsnd");
    }
}
