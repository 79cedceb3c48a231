//! Wire format codecs for the RDP clipboard virtual channel (MS-RDPECLIP).
//!
//! This crate covers the PDU header, capability negotiation, format list
//! encoding (short and long forms), file-contents request/response, and
//! clipboard locking. It has no notion of channel state or session
//! lifetime — see `rdp-clipboard-channel` for the state machine built on
//! top of these types.

#![warn(missing_docs)]

pub mod capabilities;
pub mod constants;
pub mod data_transfer;
pub mod error;
pub mod file_contents;
pub mod format_list;
pub mod header;
pub mod lock;

pub use capabilities::{Capabilities, GeneralCapabilitySet, GeneralFlags};
pub use data_transfer::{ClientTemporaryDirectory, FormatDataRequest, FormatDataResponse};
pub use error::{CodecError, Result};
pub use file_contents::{FileContentsRequest, FileContentsResponse};
pub use format_list::{FormatEntry, FormatList, FormatListResponse, NameEncoding};
pub use header::{check_data_len, Header, MsgFlags, HEADER_LEN};
pub use lock::LockDataId;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A fully decoded clipboard channel message: header plus typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardPdu {
    /// `CLIPRDR_MONITOR_READY`, no body.
    MonitorReady,
    /// `CLIPRDR_FORMAT_LIST`.
    FormatList(FormatList),
    /// `CLIPRDR_FORMAT_LIST_RESPONSE`, no body (status in `msgFlags`).
    FormatListResponse(FormatListResponse),
    /// `CLIPRDR_FORMAT_DATA_REQUEST`.
    FormatDataRequest(FormatDataRequest),
    /// `CLIPRDR_FORMAT_DATA_RESPONSE`.
    FormatDataResponse(FormatDataResponse),
    /// `CLIPRDR_TEMP_DIRECTORY`.
    TemporaryDirectory(ClientTemporaryDirectory),
    /// `CLIPRDR_CAPS`.
    Capabilities(Capabilities),
    /// `CLIPRDR_FILECONTENTS_REQUEST`.
    FileContentsRequest(FileContentsRequest),
    /// `CLIPRDR_FILECONTENTS_RESPONSE`.
    FileContentsResponse(FileContentsResponse),
    /// `CLIPRDR_LOCK_CLIPDATA`.
    LockData(LockDataId),
    /// `CLIPRDR_UNLOCK_CLIPDATA`.
    UnlockData(LockDataId),
}

impl ClipboardPdu {
    /// Decode one whole message: an 8-byte header plus body, given whether
    /// long format names and ASCII short names are currently negotiated.
    /// After the body, any trailing zero-padding bytes in `src` are left
    /// untouched — callers drain them with [`skip_trailing_padding`].
    pub fn decode(src: &mut impl Buf, name_encoding: NameEncoding) -> Result<(Self, MsgFlags)> {
        let header = Header::decode(src)?;
        check_data_len(header.data_len, src.remaining())?;
        let ascii_names = header.msg_flags.contains(MsgFlags::ASCII_NAMES);

        let pdu = match header.msg_type {
            constants::msg_type::MONITOR_READY => ClipboardPdu::MonitorReady,
            constants::msg_type::FORMAT_LIST => ClipboardPdu::FormatList(FormatList::decode(
                src,
                header.data_len,
                name_encoding,
                ascii_names,
            )?),
            constants::msg_type::FORMAT_LIST_RESPONSE => {
                ClipboardPdu::FormatListResponse(FormatListResponse {
                    ok: header.msg_flags.contains(MsgFlags::RESPONSE_OK),
                })
            }
            constants::msg_type::FORMAT_DATA_REQUEST => ClipboardPdu::FormatDataRequest(
                FormatDataRequest::decode(src, header.data_len)?,
            ),
            constants::msg_type::FORMAT_DATA_RESPONSE => ClipboardPdu::FormatDataResponse(
                FormatDataResponse::decode(src, header.data_len)?,
            ),
            constants::msg_type::TEMPORARY_DIRECTORY => {
                ClipboardPdu::TemporaryDirectory(ClientTemporaryDirectory::decode(src)?)
            }
            constants::msg_type::CAPABILITIES => {
                ClipboardPdu::Capabilities(Capabilities::decode(src)?)
            }
            constants::msg_type::FILE_CONTENTS_REQUEST => ClipboardPdu::FileContentsRequest(
                FileContentsRequest::decode(src, header.data_len)?,
            ),
            constants::msg_type::FILE_CONTENTS_RESPONSE => ClipboardPdu::FileContentsResponse(
                FileContentsResponse::decode(src, header.data_len)?,
            ),
            constants::msg_type::LOCK_CLIPDATA => {
                ClipboardPdu::LockData(LockDataId::decode(src, header.data_len)?)
            }
            constants::msg_type::UNLOCK_CLIPDATA => {
                ClipboardPdu::UnlockData(LockDataId::decode(src, header.data_len)?)
            }
            other => return Err(CodecError::UnknownMessageType(other)),
        };

        Ok((pdu, header.msg_flags))
    }

    /// Encode this message to a fresh buffer, filling in `dataLen` after
    /// the body is serialized (stream position at offset 4, write u32).
    /// `msg_flags`' `CB_ASCII_NAMES` bit governs a format list's short-form
    /// name width, matching how [`ClipboardPdu::decode`] reads it back.
    pub fn encode(&self, msg_flags: MsgFlags, name_encoding: NameEncoding) -> Bytes {
        let ascii_names = msg_flags.contains(MsgFlags::ASCII_NAMES);
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body_size(name_encoding));
        let header = Header::with_flags(self.msg_type(), msg_flags, 0);
        header.encode(&mut buf);
        let body_start = buf.len();

        match self {
            ClipboardPdu::MonitorReady | ClipboardPdu::FormatListResponse(_) => {}
            ClipboardPdu::FormatList(pdu) => pdu.encode(&mut buf, name_encoding, ascii_names),
            ClipboardPdu::FormatDataRequest(pdu) => pdu.encode(&mut buf),
            ClipboardPdu::FormatDataResponse(pdu) => pdu.encode(&mut buf),
            ClipboardPdu::TemporaryDirectory(pdu) => pdu.encode(&mut buf),
            ClipboardPdu::Capabilities(pdu) => pdu.encode(&mut buf),
            ClipboardPdu::FileContentsRequest(pdu) => pdu.encode(&mut buf),
            ClipboardPdu::FileContentsResponse(pdu) => pdu.encode(&mut buf),
            ClipboardPdu::LockData(pdu) | ClipboardPdu::UnlockData(pdu) => pdu.encode(&mut buf),
        }

        let data_len = (buf.len() - body_start) as u32;
        buf[4..8].copy_from_slice(&data_len.to_le_bytes());
        buf.freeze()
    }

    fn msg_type(&self) -> u16 {
        use constants::msg_type::*;
        match self {
            ClipboardPdu::MonitorReady => MONITOR_READY,
            ClipboardPdu::FormatList(_) => FORMAT_LIST,
            ClipboardPdu::FormatListResponse(_) => FORMAT_LIST_RESPONSE,
            ClipboardPdu::FormatDataRequest(_) => FORMAT_DATA_REQUEST,
            ClipboardPdu::FormatDataResponse(_) => FORMAT_DATA_RESPONSE,
            ClipboardPdu::TemporaryDirectory(_) => TEMPORARY_DIRECTORY,
            ClipboardPdu::Capabilities(_) => CAPABILITIES,
            ClipboardPdu::FileContentsRequest(_) => FILE_CONTENTS_REQUEST,
            ClipboardPdu::FileContentsResponse(_) => FILE_CONTENTS_RESPONSE,
            ClipboardPdu::LockData(_) => LOCK_CLIPDATA,
            ClipboardPdu::UnlockData(_) => UNLOCK_CLIPDATA,
        }
    }

    fn body_size(&self, name_encoding: NameEncoding) -> usize {
        match self {
            ClipboardPdu::MonitorReady | ClipboardPdu::FormatListResponse(_) => 0,
            ClipboardPdu::FormatList(pdu) => pdu.size(name_encoding),
            ClipboardPdu::FormatDataRequest(pdu) => pdu.size(),
            ClipboardPdu::FormatDataResponse(pdu) => pdu.size(),
            ClipboardPdu::TemporaryDirectory(pdu) => pdu.size(),
            ClipboardPdu::Capabilities(pdu) => pdu.size(),
            ClipboardPdu::FileContentsRequest(pdu) => pdu.size(),
            ClipboardPdu::FileContentsResponse(pdu) => pdu.size(),
            ClipboardPdu::LockData(pdu) | ClipboardPdu::UnlockData(pdu) => pdu.size(),
        }
    }
}

/// Consume any trailing zero-byte padding a server may have appended
/// between PDUs (a common quirk; see spec's wire-framing invariants).
pub fn skip_trailing_padding(src: &mut impl Buf) {
    while src.remaining() > 0 && src.chunk()[0] == 0 {
        src.advance(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_ready_roundtrip() {
        let encoded = ClipboardPdu::MonitorReady.encode(MsgFlags::empty(), NameEncoding::Long);
        let mut cursor = &encoded[..];
        let (pdu, _flags) = ClipboardPdu::decode(&mut cursor, NameEncoding::Long).unwrap();
        assert_eq!(pdu, ClipboardPdu::MonitorReady);
    }

    #[test]
    fn format_list_roundtrip_through_full_pdu() {
        let list = FormatList {
            entries: vec![FormatEntry::named(49, "FileGroupDescriptorW")],
        };
        let encoded =
            ClipboardPdu::FormatList(list.clone()).encode(MsgFlags::empty(), NameEncoding::Long);
        let mut cursor = &encoded[..];
        let (pdu, _flags) = ClipboardPdu::decode(&mut cursor, NameEncoding::Long).unwrap();
        assert_eq!(pdu, ClipboardPdu::FormatList(list));
    }

    #[test]
    fn ascii_format_list_roundtrips_byte_for_byte_through_full_pdu() {
        let list = FormatList {
            entries: vec![FormatEntry::named(1, "CF_TEXT"), FormatEntry::unnamed(13)],
        };
        let flags = MsgFlags::ASCII_NAMES;
        let encoded = ClipboardPdu::FormatList(list.clone()).encode(flags, NameEncoding::Short);
        assert_eq!(encoded.len(), HEADER_LEN + 72);
        let mut cursor = &encoded[..];
        let (pdu, decoded_flags) = ClipboardPdu::decode(&mut cursor, NameEncoding::Short).unwrap();
        assert_eq!(pdu, ClipboardPdu::FormatList(list));
        assert!(decoded_flags.contains(MsgFlags::ASCII_NAMES));

        let re_encoded = pdu.encode(flags, NameEncoding::Short);
        assert_eq!(re_encoded, encoded);
    }

    #[test]
    fn trailing_zero_padding_is_skipped() {
        let mut encoded = ClipboardPdu::MonitorReady
            .encode(MsgFlags::empty(), NameEncoding::Long)
            .to_vec();
        encoded.extend_from_slice(&[0u8; 4]);
        let mut cursor = &encoded[..];
        let (_pdu, _flags) = ClipboardPdu::decode(&mut cursor, NameEncoding::Long).unwrap();
        skip_trailing_padding(&mut cursor);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut buf = BytesMut::new();
        Header::new(0xFFFF, 0).encode(&mut buf);
        let mut cursor = &buf[..];
        assert!(matches!(
            ClipboardPdu::decode(&mut cursor, NameEncoding::Long),
            Err(CodecError::UnknownMessageType(0xFFFF))
        ));
    }

    #[test]
    fn oversized_data_len_is_rejected() {
        let mut buf = BytesMut::new();
        Header::new(constants::msg_type::FORMAT_DATA_REQUEST, 100).encode(&mut buf);
        let mut cursor = &buf[..];
        assert!(ClipboardPdu::decode(&mut cursor, NameEncoding::Long).is_err());
    }
}
