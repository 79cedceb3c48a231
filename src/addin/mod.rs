//! Addin registry (C3).
//!
//! Resolves a plug-in entry point by (channel-name, subsystem, kind), and
//! enumerates available plug-ins from the statically linked table and the
//! dynamically discovered filename pattern. The registry is built once at
//! startup and immutable thereafter; no locking is needed for lookups.

pub mod discover;
pub mod registry;

pub use discover::{parse_dynamic_addin_filename, FilenamePattern, ParsedAddinFilename};
pub use registry::{
    AddinFlags, AddinRecord, AddinSource, AddinTable, EntryKind, EntryPointRef,
    EntryPointRegistry, LoadFlags, NamedEntryPoint, Registry, SubsystemEntry,
};
