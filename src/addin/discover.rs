//! Dynamic addin filename parsing.
//!
//! Grounded on `freerdp_channels_list_dynamic_addins`, which scans the
//! platform shared-library directory for names of the form
//! `<prefix><name>-client[-<subsystem>[-<type>]].<extension>`. Only the
//! parsing/matching logic is implemented here — the directory scan itself
//! is a described interface, not reproduced (see spec's non-goals).

/// The result of successfully parsing one dynamic addin filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddinFilename {
    /// Channel name.
    pub name: String,
    /// Subsystem name, if the filename named one.
    pub subsystem: Option<String>,
    /// Type name, if the filename named one.
    pub type_name: Option<String>,
}

/// The prefix/extension a dynamic addin filename must wrap, taken from
/// [`crate::config::AddinConfig`].
#[derive(Debug, Clone)]
pub struct FilenamePattern {
    prefix: String,
    extension: String,
}

impl FilenamePattern {
    /// Construct a pattern from a shared-library prefix and extension
    /// (e.g. `"libfreerdp-client-"`, `"so"`).
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }
}

/// Parse one filename against `pattern`.
///
/// The stem (after stripping prefix and `.<extension>`) must end in
/// `-client` and split on dashes into 1-3 non-empty components:
/// `<name>`, optionally `-<subsystem>`, optionally `-<type>`. Anything
/// else returns `None` and the caller logs a warning and skips the file.
pub fn parse_dynamic_addin_filename(
    filename: &str,
    pattern: &FilenamePattern,
) -> Option<ParsedAddinFilename> {
    let stem = filename
        .strip_prefix(pattern.prefix.as_str())?
        .strip_suffix(&format!(".{}", pattern.extension))?;
    let stem = stem.strip_suffix("-client")?;
    if stem.is_empty() {
        return None;
    }

    let components: Vec<&str> = stem.split('-').collect();
    if components.is_empty() || components.len() > 3 {
        return None;
    }
    if components.iter().any(|c| c.is_empty()) {
        return None;
    }

    let mut iter = components.into_iter();
    let name = iter.next()?.to_string();
    let subsystem = iter.next().map(str::to_string);
    let type_name = iter.next().map(str::to_string);

    Some(ParsedAddinFilename {
        name,
        subsystem,
        type_name,
    })
}
