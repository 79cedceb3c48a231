//! The 8-byte `CLIPRDR_HEADER` prefixing every PDU on the clipboard channel.

use crate::error::{CodecError, Result};
use bitflags::bitflags;
use bytes::{Buf, BufMut};

bitflags! {
    /// `msgFlags` field of `CLIPRDR_HEADER`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MsgFlags: u16 {
        /// `CB_RESPONSE_OK`
        const RESPONSE_OK = crate::constants::msg_flags::RESPONSE_OK;
        /// `CB_RESPONSE_FAIL`
        const RESPONSE_FAIL = crate::constants::msg_flags::RESPONSE_FAIL;
        /// `CB_ASCII_NAMES`
        const ASCII_NAMES = crate::constants::msg_flags::ASCII_NAMES;
    }
}

/// The 8-byte header present on every clipboard PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// `msgType` field.
    pub msg_type: u16,
    /// `msgFlags` field.
    pub msg_flags: MsgFlags,
    /// `dataLen` field: length of the body that follows this header.
    pub data_len: u32,
}

/// Size in bytes of [`Header`] on the wire.
pub const HEADER_LEN: usize = 8;

impl Header {
    /// Construct a header for a body of `data_len` bytes with no flags.
    pub fn new(msg_type: u16, data_len: u32) -> Self {
        Self {
            msg_type,
            msg_flags: MsgFlags::empty(),
            data_len,
        }
    }

    /// Construct a header with explicit flags.
    pub fn with_flags(msg_type: u16, msg_flags: MsgFlags, data_len: u32) -> Self {
        Self {
            msg_type,
            msg_flags,
            data_len,
        }
    }

    /// Decode a header from the front of `src`, advancing it by
    /// [`HEADER_LEN`] bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < HEADER_LEN {
            return Err(CodecError::Truncated {
                field: "CLIPRDR_HEADER",
                needed: HEADER_LEN,
                available: src.remaining(),
            });
        }
        let msg_type = src.get_u16_le();
        let msg_flags = MsgFlags::from_bits_truncate(src.get_u16_le());
        let data_len = src.get_u32_le();
        Ok(Self {
            msg_type,
            msg_flags,
            data_len,
        })
    }

    /// Encode this header to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16_le(self.msg_type);
        dst.put_u16_le(self.msg_flags.bits());
        dst.put_u32_le(self.data_len);
    }
}

/// Verify that `declared` does not exceed `remaining`, per the wire-framing
/// invariant that an over-long `dataLen` is rejected as invalid data.
pub fn check_data_len(declared: u32, remaining: usize) -> Result<()> {
    if declared as usize > remaining {
        return Err(CodecError::LengthMismatch {
            declared,
            remaining,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn roundtrips() {
        let header = Header::with_flags(0x0003, MsgFlags::RESPONSE_OK, 42);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let mut cursor = &buf[..];
        let decoded = Header::decode(&mut cursor).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let mut cursor: &[u8] = &[0u8; 3];
        assert!(Header::decode(&mut cursor).is_err());
    }

    #[test]
    fn oversized_data_len_is_rejected() {
        assert!(check_data_len(100, 4).is_err());
        assert!(check_data_len(4, 100).is_ok());
    }
}
