//! `CLIPRDR_FORMAT_LIST` / `CLIPRDR_FORMAT_LIST_RESPONSE` codec.
//!
//! Two wire encodings exist, selected by whether long format names were
//! negotiated. Grounded on `cliprdr_common.c`'s
//! `cliprdr_read_format_list`/`cliprdr_write_format_list`, including its
//! permissive handling of the short-form name's null terminator (the wire
//! format mandates it; mainstream servers often omit it).

use crate::constants::{SHORT_FORMAT_ENTRY_LEN, SHORT_FORMAT_NAME_BUF_LEN};
use crate::error::{CodecError, Result};
use bytes::{Buf, BufMut};

/// One entry of a format list: an id plus an optional name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatEntry {
    /// Clipboard format id (standard or registered).
    pub format_id: u32,
    /// Format name; `None` decodes from an empty name buffer/string.
    pub format_name: Option<String>,
}

impl FormatEntry {
    /// Construct an entry with a name.
    pub fn named(format_id: u32, name: impl Into<String>) -> Self {
        Self {
            format_id,
            format_name: Some(name.into()),
        }
    }

    /// Construct an entry with no name.
    pub fn unnamed(format_id: u32) -> Self {
        Self {
            format_id,
            format_name: None,
        }
    }
}

/// `CLIPRDR_FORMAT_LIST` body: an ordered list of format entries. Entries
/// own their (UTF-8) names independently of the wire buffer they were
/// parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatList {
    /// The list's entries, in wire order. Empty is legal.
    pub entries: Vec<FormatEntry>,
}

/// Whether to use the short (fixed 36-byte) or long (variable,
/// null-terminated) format-name encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameEncoding {
    /// 36-byte fixed-stride entries.
    Short,
    /// Variable-length, null-terminated UTF-16 names.
    Long,
}

impl FormatList {
    /// Decode a format list body of `data_len` bytes using `encoding`.
    pub fn decode(src: &mut impl Buf, data_len: u32, encoding: NameEncoding, ascii_names: bool) -> Result<Self> {
        let data_len = data_len as usize;
        if src.remaining() < data_len {
            return Err(CodecError::LengthMismatch {
                declared: data_len as u32,
                remaining: src.remaining(),
            });
        }
        match encoding {
            NameEncoding::Short => Self::decode_short(src, data_len, ascii_names),
            NameEncoding::Long => Self::decode_long(src, data_len),
        }
    }

    fn decode_short(src: &mut impl Buf, data_len: usize, ascii_names: bool) -> Result<Self> {
        if data_len % SHORT_FORMAT_ENTRY_LEN != 0 {
            return Err(CodecError::InvalidField {
                field: "CLIPRDR_FORMAT_LIST (short)",
                reason: format!("data length {data_len} is not a multiple of {SHORT_FORMAT_ENTRY_LEN}"),
            });
        }
        let count = data_len / SHORT_FORMAT_ENTRY_LEN;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let format_id = src.get_u32_le();
            let mut name_buf = [0u8; SHORT_FORMAT_NAME_BUF_LEN];
            src.copy_to_slice(&mut name_buf);
            let name = if ascii_names {
                decode_ascii_permissive(&name_buf)
            } else {
                decode_utf16_permissive(&name_buf)
            };
            entries.push(FormatEntry {
                format_id,
                format_name: if name.is_empty() { None } else { Some(name) },
            });
        }
        Ok(Self { entries })
    }

    fn decode_long(src: &mut impl Buf, data_len: usize) -> Result<Self> {
        let mut remaining = data_len;
        let mut entries = Vec::new();
        while remaining > 0 {
            if remaining < 4 {
                return Err(CodecError::InvalidField {
                    field: "CLIPRDR_FORMAT_LIST (long)",
                    reason: "trailing bytes too short for a formatId".to_string(),
                });
            }
            let format_id = src.get_u32_le();
            remaining -= 4;
            let mut units = Vec::new();
            loop {
                if remaining < 2 {
                    return Err(CodecError::InvalidField {
                        field: "CLIPRDR_FORMAT_LIST (long)",
                        reason: "unterminated format name".to_string(),
                    });
                }
                let unit = src.get_u16_le();
                remaining -= 2;
                if unit == 0 {
                    break;
                }
                units.push(unit);
            }
            let name = String::from_utf16_lossy(&units);
            entries.push(FormatEntry {
                format_id,
                format_name: if name.is_empty() { None } else { Some(name) },
            });
        }
        Ok(Self { entries })
    }

    /// Encode this list using `encoding`. `ascii_names` selects the
    /// short form's per-char width (ignored for the long form, which is
    /// always UTF-16) and must match whatever `CB_ASCII_NAMES` setting
    /// the caller negotiated, or a re-serialised short-form list will not
    /// round-trip byte-for-byte.
    pub fn encode(&self, dst: &mut impl BufMut, encoding: NameEncoding, ascii_names: bool) {
        match encoding {
            NameEncoding::Short => self.encode_short(dst, ascii_names),
            NameEncoding::Long => self.encode_long(dst),
        }
    }

    fn encode_short(&self, dst: &mut impl BufMut, ascii_names: bool) {
        for entry in &self.entries {
            dst.put_u32_le(entry.format_id);
            let mut name_buf = [0u8; SHORT_FORMAT_NAME_BUF_LEN];
            if let Some(name) = &entry.format_name {
                if ascii_names {
                    let max_bytes = SHORT_FORMAT_NAME_BUF_LEN - 1;
                    for (i, byte) in name.bytes().take(max_bytes).enumerate() {
                        name_buf[i] = byte;
                    }
                } else {
                    let units: Vec<u16> = name.encode_utf16().collect();
                    let max_units = SHORT_FORMAT_NAME_BUF_LEN / 2 - 1;
                    for (i, unit) in units.iter().take(max_units).enumerate() {
                        name_buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
                    }
                }
            }
            dst.put_slice(&name_buf);
        }
    }

    fn encode_long(&self, dst: &mut impl BufMut) {
        for entry in &self.entries {
            dst.put_u32_le(entry.format_id);
            if let Some(name) = &entry.format_name {
                for unit in name.encode_utf16() {
                    dst.put_u16_le(unit);
                }
            }
            dst.put_u16_le(0);
        }
    }

    /// Encoded size in bytes for `encoding`.
    pub fn size(&self, encoding: NameEncoding) -> usize {
        match encoding {
            NameEncoding::Short => self.entries.len() * SHORT_FORMAT_ENTRY_LEN,
            NameEncoding::Long => self
                .entries
                .iter()
                .map(|e| {
                    4 + e
                        .format_name
                        .as_deref()
                        .map(|n| n.encode_utf16().count())
                        .unwrap_or(0)
                        * 2
                        + 2
                })
                .sum(),
        }
    }
}

/// Decode a fixed-size UTF-16LE buffer, stopping at the first null code
/// unit if one is present, otherwise using the whole buffer — accepting
/// both a properly null-terminated name and servers that omit it.
fn decode_utf16_permissive(buf: &[u8]) -> String {
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Decode a fixed-size 8-bit-ASCII buffer with the same permissive
/// null-termination handling as [`decode_utf16_permissive`].
fn decode_ascii_permissive(buf: &[u8]) -> String {
    let bytes: Vec<u8> = buf.iter().copied().take_while(|&b| b != 0).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// `CLIPRDR_FORMAT_LIST_RESPONSE` carries no body; only `msgFlags`
/// indicates success/failure (see [`crate::header::MsgFlags`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatListResponse {
    /// Whether the format list was accepted.
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn short_form_roundtrip_with_null_terminator() {
        let list = FormatList {
            entries: vec![FormatEntry::named(13, "CF_TEXT"), FormatEntry::unnamed(9)],
        };
        let mut buf = BytesMut::new();
        list.encode(&mut buf, NameEncoding::Short, false);
        let mut cursor = &buf[..];
        let decoded =
            FormatList::decode(&mut cursor, buf.len() as u32, NameEncoding::Short, false).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn short_form_ascii_names_roundtrips_one_byte_per_char() {
        let list = FormatList {
            entries: vec![FormatEntry::named(13, "CF_TEXT"), FormatEntry::unnamed(9)],
        };
        let mut buf = BytesMut::new();
        list.encode(&mut buf, NameEncoding::Short, true);
        assert_eq!(buf.len(), 2 * SHORT_FORMAT_ENTRY_LEN);
        let mut cursor = &buf[..];
        let decoded = FormatList::decode(&mut cursor, buf.len() as u32, NameEncoding::Short, true).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn short_form_accepts_missing_null_terminator() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        let name: Vec<u16> = "CF_TEXT".encode_utf16().collect();
        let mut name_buf = [0xFFu8; SHORT_FORMAT_NAME_BUF_LEN];
        for (i, unit) in name.iter().enumerate() {
            name_buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        // fill remainder with non-null garbage instead of zero padding
        for byte in name_buf.iter_mut().skip(name.len() * 2) {
            *byte = 0x41;
        }
        buf.put_slice(&name_buf);
        let mut cursor = &buf[..];
        let decoded =
            FormatList::decode(&mut cursor, buf.len() as u32, NameEncoding::Short, false).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert!(decoded.entries[0].format_name.as_deref().unwrap().starts_with("CF_TEXT"));
    }

    #[test]
    fn long_form_roundtrip() {
        let list = FormatList {
            entries: vec![
                FormatEntry::named(49, "FileGroupDescriptorW"),
                FormatEntry::unnamed(1),
            ],
        };
        let mut buf = BytesMut::new();
        list.encode(&mut buf, NameEncoding::Long, false);
        let mut cursor = &buf[..];
        let decoded =
            FormatList::decode(&mut cursor, buf.len() as u32, NameEncoding::Long, false).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn empty_list_is_legal() {
        let list = FormatList::default();
        let mut buf = BytesMut::new();
        list.encode(&mut buf, NameEncoding::Long, false);
        assert_eq!(buf.len(), 0);
        let mut cursor = &buf[..];
        let decoded = FormatList::decode(&mut cursor, 0, NameEncoding::Long, false).unwrap();
        assert_eq!(decoded.entries.len(), 0);
    }

    #[test]
    fn short_form_rejects_non_multiple_length() {
        let mut cursor: &[u8] = &[0u8; 10];
        assert!(FormatList::decode(&mut cursor, 10, NameEncoding::Short, false).is_err());
    }
}
