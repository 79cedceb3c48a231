//! `CLIPRDR_CAPS` PDU and the GENERAL capability set.
//!
//! Only capability-set-type GENERAL (1) is defined; any other type is a
//! protocol error, per `cliprdr_common.c`'s `cliprdr_read_capability_sets`.

use crate::constants::{capability_set_type, general_flags, GENERAL_CAPABILITY_SET_LEN};
use crate::error::{CodecError, Result};
use bitflags::bitflags;
use bytes::{Buf, BufMut};

bitflags! {
    /// `generalFlags` of `CLIPRDR_GENERAL_CAPABILITY`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GeneralFlags: u32 {
        /// `CB_USE_LONG_FORMAT_NAMES`
        const USE_LONG_FORMAT_NAMES = general_flags::USE_LONG_FORMAT_NAMES;
        /// `CB_STREAM_FILECLIP_ENABLED`
        const STREAM_FILECLIP_ENABLED = general_flags::STREAM_FILECLIP_ENABLED;
        /// `CB_FILECLIP_NO_FILE_PATHS`
        const FILECLIP_NO_FILE_PATHS = general_flags::FILECLIP_NO_FILE_PATHS;
        /// `CB_CAN_LOCK_CLIPDATA`
        const CAN_LOCK_CLIPDATA = general_flags::CAN_LOCK_CLIPDATA;
        /// `CB_HUGE_FILE_SUPPORT`
        const HUGE_FILE_SUPPORT = general_flags::HUGE_FILE_SUPPORT;
    }
}

impl GeneralFlags {
    /// The AND of `self` (the client's desire) and `offered` (the server's
    /// advertised flags), per the rule that the client's response
    /// capabilities must be a subset of the server's offer.
    pub fn negotiate(self, offered: GeneralFlags) -> GeneralFlags {
        self & offered
    }
}

/// `CLIPRDR_GENERAL_CAPABILITY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneralCapabilitySet {
    /// Protocol version, always 2 in practice.
    pub version: u32,
    /// Negotiated general flags.
    pub general_flags: GeneralFlags,
}

impl GeneralCapabilitySet {
    const DATA_LEN: usize = 8;

    fn decode(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < Self::DATA_LEN {
            return Err(CodecError::Truncated {
                field: "CLIPRDR_GENERAL_CAPABILITY",
                needed: Self::DATA_LEN,
                available: src.remaining(),
            });
        }
        let version = src.get_u32_le();
        let general_flags = GeneralFlags::from_bits_truncate(src.get_u32_le());
        Ok(Self {
            version,
            general_flags,
        })
    }

    fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.version);
        dst.put_u32_le(self.general_flags.bits());
    }
}

/// `CLIPRDR_CAPS` PDU body: a list of capability sets. This layer only
/// knows the GENERAL set; any other `capabilitySetType` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The sole capability set this layer understands.
    pub general: GeneralCapabilitySet,
}

impl Capabilities {
    /// Decode a `CLIPRDR_CAPS` body (after the 8-byte `CLIPRDR_HEADER`).
    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < 4 {
            return Err(CodecError::Truncated {
                field: "CLIPRDR_CAPS",
                needed: 4,
                available: src.remaining(),
            });
        }
        let count = src.get_u16_le();
        let _pad1 = src.get_u16_le();

        let mut general = None;
        for _ in 0..count {
            if src.remaining() < 4 {
                return Err(CodecError::Truncated {
                    field: "CLIPRDR_CAPABILITY_SET header",
                    needed: 4,
                    available: src.remaining(),
                });
            }
            let set_type = src.get_u16_le();
            let length = src.get_u16_le();
            if set_type != capability_set_type::GENERAL {
                return Err(CodecError::UnsupportedCapabilitySet(set_type));
            }
            if length as usize != GENERAL_CAPABILITY_SET_LEN as usize {
                return Err(CodecError::InvalidField {
                    field: "lengthCapability",
                    reason: format!("expected {GENERAL_CAPABILITY_SET_LEN}, got {length}"),
                });
            }
            general = Some(GeneralCapabilitySet::decode(src)?);
        }

        let general = general.ok_or(CodecError::InvalidField {
            field: "cCapabilitiesSets",
            reason: "no GENERAL capability set present".to_string(),
        })?;
        Ok(Self { general })
    }

    /// Encode a `CLIPRDR_CAPS` body containing only the GENERAL set.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16_le(1); // cCapabilitiesSets
        dst.put_u16_le(0); // pad1
        dst.put_u16_le(capability_set_type::GENERAL);
        dst.put_u16_le(GENERAL_CAPABILITY_SET_LEN);
        self.general.encode(dst);
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        4 + 4 + GeneralCapabilitySet::DATA_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn roundtrips() {
        let caps = Capabilities {
            general: GeneralCapabilitySet {
                version: 2,
                general_flags: GeneralFlags::USE_LONG_FORMAT_NAMES
                    | GeneralFlags::CAN_LOCK_CLIPDATA,
            },
        };
        let mut buf = BytesMut::new();
        caps.encode(&mut buf);
        assert_eq!(buf.len(), caps.size());
        let mut cursor = &buf[..];
        let decoded = Capabilities::decode(&mut cursor).unwrap();
        assert_eq!(decoded, caps);
    }

    #[test]
    fn rejects_non_general_capability_set() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(1);
        buf.put_u16_le(0);
        buf.put_u16_le(0x0002); // not GENERAL
        buf.put_u16_le(12);
        buf.put_u32_le(0);
        buf.put_u32_le(0);
        let mut cursor = &buf[..];
        assert!(matches!(
            Capabilities::decode(&mut cursor),
            Err(CodecError::UnsupportedCapabilitySet(0x0002))
        ));
    }

    #[test]
    fn negotiate_is_bitwise_and() {
        let desired = GeneralFlags::USE_LONG_FORMAT_NAMES | GeneralFlags::HUGE_FILE_SUPPORT;
        let offered = GeneralFlags::USE_LONG_FORMAT_NAMES;
        assert_eq!(desired.negotiate(offered), GeneralFlags::USE_LONG_FORMAT_NAMES);
    }
}
