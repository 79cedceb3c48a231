//! `CLIPRDR_LOCK_CLIPDATA` / `CLIPRDR_UNLOCK_CLIPDATA` codec.
//!
//! Only meaningful when both peers have negotiated `CAN_LOCK_CLIPDATA`;
//! this layer parses and dispatches the message without implementing file
//! retention itself (that is an application-level concern).

use crate::error::{CodecError, Result};
use bytes::{Buf, BufMut};

/// Shared body of both lock and unlock messages: a single clip-data id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDataId {
    /// Opaque token identifying the locked file-stream state.
    pub clip_data_id: u32,
}

const FIXED_LEN: usize = 4;

impl LockDataId {
    /// Decode a lock/unlock body.
    pub fn decode(src: &mut impl Buf, data_len: u32) -> Result<Self> {
        if (data_len as usize) < FIXED_LEN {
            return Err(CodecError::Truncated {
                field: "CLIPRDR_LOCK_CLIPDATA",
                needed: FIXED_LEN,
                available: data_len as usize,
            });
        }
        Ok(Self {
            clip_data_id: src.get_u32_le(),
        })
    }

    /// Encode this message.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.clip_data_id);
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        FIXED_LEN
    }
}
