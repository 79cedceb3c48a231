//! Format-list feature-mask filtering.
//!
//! Grounded on `cliprdr_common.c`'s `cliprdr_filter_format_list`; this is
//! the shared, independently tested implementation used by both inbound
//! and outbound paths, client and server roles alike.

use rdp_clipboard_core::constants::FORMAT_NAME_FILE_LIST;
use rdp_clipboard_core::FormatList;

/// Filter `list` against the `{data, files}` permission pair for one
/// direction (e.g. `REMOTE_TO_LOCAL`/`REMOTE_TO_LOCAL_FILES` for an
/// inbound server list, or the `LOCAL_TO_REMOTE*` pair for an outbound
/// client list).
///
/// Returns `None` if the list should be ignored entirely (neither
/// permission granted).
pub fn filter_format_list(list: &FormatList, allow_data: bool, allow_files: bool) -> Option<FormatList> {
    match (allow_data, allow_files) {
        (true, true) => Some(list.clone()),
        (false, false) => None,
        (false, true) => {
            // Only file-contents allowed: keep just the file-group-descriptor entry.
            let entries = list
                .entries
                .iter()
                .filter(|e| e.format_name.as_deref() == Some(FORMAT_NAME_FILE_LIST))
                .cloned()
                .collect();
            Some(FormatList { entries })
        }
        (true, false) => {
            // Data allowed but not files: drop the file-group-descriptor entry.
            let entries = list
                .entries
                .iter()
                .filter(|e| e.format_name.as_deref() != Some(FORMAT_NAME_FILE_LIST))
                .cloned()
                .collect();
            Some(FormatList { entries })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdp_clipboard_core::FormatEntry;

    fn sample() -> FormatList {
        FormatList {
            entries: vec![
                FormatEntry::named(13, "CF_TEXT"),
                FormatEntry::named(49, FORMAT_NAME_FILE_LIST),
            ],
        }
    }

    #[test]
    fn both_allowed_passes_through_unchanged() {
        let filtered = filter_format_list(&sample(), true, true).unwrap();
        assert_eq!(filtered, sample());
    }

    #[test]
    fn neither_allowed_is_ignored() {
        assert!(filter_format_list(&sample(), false, false).is_none());
    }

    #[test]
    fn files_only_strips_non_file_formats() {
        let filtered = filter_format_list(&sample(), false, true).unwrap();
        assert_eq!(filtered.entries.len(), 1);
        assert_eq!(filtered.entries[0].format_name.as_deref(), Some(FORMAT_NAME_FILE_LIST));
    }

    #[test]
    fn data_only_strips_file_group_descriptor() {
        let filtered = filter_format_list(&sample(), true, false).unwrap();
        assert_eq!(filtered.entries.len(), 1);
        assert_eq!(filtered.entries[0].format_name.as_deref(), Some("CF_TEXT"));
    }
}
