//! Wire constants for the clipboard virtual channel (MS-RDPECLIP).

/// `msgType` values of the 8-byte `CLIPRDR_HEADER`.
pub mod msg_type {
    /// `CLIPRDR_MONITOR_READY`
    pub const MONITOR_READY: u16 = 0x0001;
    /// `CLIPRDR_FORMAT_LIST`
    pub const FORMAT_LIST: u16 = 0x0002;
    /// `CLIPRDR_FORMAT_LIST_RESPONSE`
    pub const FORMAT_LIST_RESPONSE: u16 = 0x0003;
    /// `CLIPRDR_FORMAT_DATA_REQUEST`
    pub const FORMAT_DATA_REQUEST: u16 = 0x0004;
    /// `CLIPRDR_FORMAT_DATA_RESPONSE`
    pub const FORMAT_DATA_RESPONSE: u16 = 0x0005;
    /// `CLIPRDR_TEMP_DIRECTORY`
    pub const TEMPORARY_DIRECTORY: u16 = 0x0006;
    /// `CLIPRDR_CAPS`
    pub const CAPABILITIES: u16 = 0x0007;
    /// `CLIPRDR_FILECONTENTS_REQUEST`
    pub const FILE_CONTENTS_REQUEST: u16 = 0x0008;
    /// `CLIPRDR_FILECONTENTS_RESPONSE`
    pub const FILE_CONTENTS_RESPONSE: u16 = 0x0009;
    /// `CLIPRDR_LOCK_CLIPDATA`
    pub const LOCK_CLIPDATA: u16 = 0x000A;
    /// `CLIPRDR_UNLOCK_CLIPDATA`
    pub const UNLOCK_CLIPDATA: u16 = 0x000B;
}

/// `msgFlags` bit values, shared by several PDU kinds.
pub mod msg_flags {
    /// Associated request was processed successfully.
    pub const RESPONSE_OK: u16 = 0x0001;
    /// Associated request failed.
    pub const RESPONSE_FAIL: u16 = 0x0002;
    /// Short-form format names are 8-bit ASCII rather than UTF-16.
    pub const ASCII_NAMES: u16 = 0x0004;
}

/// Capability-set-type values. Only GENERAL is defined by this layer.
pub mod capability_set_type {
    /// The only capability set type this layer implements.
    pub const GENERAL: u16 = 0x0001;
}

/// `generalFlags` bits of `CLIPRDR_GENERAL_CAPABILITY`.
pub mod general_flags {
    /// Use the long (null-terminated UTF-16) format-name encoding.
    pub const USE_LONG_FORMAT_NAMES: u32 = 0x0000_0002;
    /// File streaming is enabled.
    pub const STREAM_FILECLIP_ENABLED: u32 = 0x0000_0004;
    /// File-contents responses omit the file-paths field.
    pub const FILECLIP_NO_FILE_PATHS: u32 = 0x0000_0008;
    /// Clipboard data can be locked.
    pub const CAN_LOCK_CLIPDATA: u32 = 0x0000_0010;
    /// Files larger than 4 GiB are supported.
    pub const HUGE_FILE_SUPPORT: u32 = 0x0000_0020;
}

/// `dwFlags` of `CLIPRDR_FILECONTENTS_REQUEST`.
pub mod file_contents_flags {
    /// Request the file size only.
    pub const SIZE: u32 = 0x0000_0001;
    /// Request a byte range of the file.
    pub const RANGE: u32 = 0x0000_0002;
}

/// Well-known format ids.
pub mod format_id {
    /// CF_PALETTE
    pub const PALETTE: u32 = 9;
    /// CF_METAFILEPICT
    pub const METAFILE: u32 = 3;
}

/// Well-known format name for file-group descriptors.
pub const FORMAT_NAME_FILE_LIST: &str = "FileGroupDescriptorW";

/// Length in bytes of one short-form format-list entry.
pub const SHORT_FORMAT_ENTRY_LEN: usize = 36;
/// Length in bytes of the name buffer within a short-form entry.
pub const SHORT_FORMAT_NAME_BUF_LEN: usize = 32;
/// Fixed length of the (UTF-16, null-padded) client temporary directory path.
pub const TEMP_DIRECTORY_PATH_LEN: usize = 520;
/// `lengthCapability` of `CLIPRDR_GENERAL_CAPABILITY`.
pub const GENERAL_CAPABILITY_SET_LEN: u16 = 12;
