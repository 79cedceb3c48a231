//! `CLIPRDR_FILECONTENTS_REQUEST` / `CLIPRDR_FILECONTENTS_RESPONSE` codec.

use crate::constants::file_contents_flags;
use crate::error::{CodecError, Result};
use bytes::{Buf, BufMut, Bytes};

/// `CLIPRDR_FILECONTENTS_REQUEST` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContentsRequest {
    /// Request identifier, echoed in the matching response.
    pub stream_id: u32,
    /// Index into the most recently advertised file-group-descriptor list.
    pub list_index: u32,
    /// `FILECONTENTS_SIZE` or `FILECONTENTS_RANGE`.
    pub dw_flags: u32,
    /// Low 32 bits of the requested position (RANGE only).
    pub n_position_low: u32,
    /// High 32 bits of the requested position (RANGE only).
    pub n_position_high: u32,
    /// Bytes requested (8 for SIZE requests).
    pub cb_requested: u32,
    /// Lock token this request is associated with, if locking is in use.
    pub clip_data_id: Option<u32>,
}

const FIXED_LEN: usize = 24;

impl FileContentsRequest {
    /// Decode a request body of `data_len` bytes (24 bytes, plus an
    /// optional trailing `clipDataId`), validating the SIZE-request
    /// invariant (`cbRequested` == 8, position fields zero).
    pub fn decode(src: &mut impl Buf, data_len: u32) -> Result<Self> {
        if (data_len as usize) < FIXED_LEN {
            return Err(CodecError::Truncated {
                field: "CLIPRDR_FILECONTENTS_REQUEST",
                needed: FIXED_LEN,
                available: data_len as usize,
            });
        }
        let stream_id = src.get_u32_le();
        let list_index = src.get_u32_le();
        let dw_flags = src.get_u32_le();
        let n_position_low = src.get_u32_le();
        let n_position_high = src.get_u32_le();
        let cb_requested = src.get_u32_le();
        let clip_data_id = if data_len as usize >= FIXED_LEN + 4 {
            Some(src.get_u32_le())
        } else {
            None
        };

        if dw_flags == file_contents_flags::SIZE
            && (cb_requested != 8 || n_position_low != 0 || n_position_high != 0)
        {
            return Err(CodecError::InvalidField {
                field: "CLIPRDR_FILECONTENTS_REQUEST",
                reason: "FILECONTENTS_SIZE requires cbRequested == 8 and zero position".to_string(),
            });
        }

        Ok(Self {
            stream_id,
            list_index,
            dw_flags,
            n_position_low,
            n_position_high,
            cb_requested,
            clip_data_id,
        })
    }

    /// Encode this request.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.stream_id);
        dst.put_u32_le(self.list_index);
        dst.put_u32_le(self.dw_flags);
        dst.put_u32_le(self.n_position_low);
        dst.put_u32_le(self.n_position_high);
        dst.put_u32_le(self.cb_requested);
        if let Some(clip_data_id) = self.clip_data_id {
            dst.put_u32_le(clip_data_id);
        }
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        FIXED_LEN + if self.clip_data_id.is_some() { 4 } else { 0 }
    }

    /// True if a huge-file-unaware peer would be asked for an out-of-range
    /// byte window (positionHigh != 0, or positionLow+cbRequested would
    /// overflow 2^32 - 1).
    pub fn exceeds_non_huge_file_range(&self) -> bool {
        self.n_position_high != 0
            || match self.n_position_low.checked_add(self.cb_requested) {
                Some(sum) => sum > u32::MAX,
                None => true,
            }
    }
}

/// `CLIPRDR_FILECONTENTS_RESPONSE` body: `streamId` plus the raw payload
/// (the requested size as an 8-byte little-endian integer for SIZE
/// requests, or the file bytes for RANGE requests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContentsResponse {
    /// Echoes the request's `streamId`.
    pub stream_id: u32,
    /// Response payload.
    pub data: Bytes,
}

impl FileContentsResponse {
    /// Decode a response body.
    pub fn decode(src: &mut impl Buf, data_len: u32) -> Result<Self> {
        if (data_len as usize) < 4 {
            return Err(CodecError::Truncated {
                field: "CLIPRDR_FILECONTENTS_RESPONSE",
                needed: 4,
                available: data_len as usize,
            });
        }
        let stream_id = src.get_u32_le();
        let remaining = data_len as usize - 4;
        let data = src.copy_to_bytes(remaining);
        Ok(Self { stream_id, data })
    }

    /// Encode this response.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.stream_id);
        dst.put_slice(&self.data);
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        4 + self.data.len()
    }

    /// A response carrying an empty payload with only a failure `msgFlags`
    /// (used for `CB_RESPONSE_FAIL`).
    pub fn empty(stream_id: u32) -> Self {
        Self {
            stream_id,
            data: Bytes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn size_request(stream_id: u32) -> FileContentsRequest {
        FileContentsRequest {
            stream_id,
            list_index: 0,
            dw_flags: file_contents_flags::SIZE,
            n_position_low: 0,
            n_position_high: 0,
            cb_requested: 8,
            clip_data_id: None,
        }
    }

    #[test]
    fn size_request_roundtrip() {
        let req = size_request(7);
        let mut buf = BytesMut::new();
        req.encode(&mut buf);
        let mut cursor = &buf[..];
        let decoded = FileContentsRequest::decode(&mut cursor, buf.len() as u32).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn malformed_size_request_is_rejected() {
        let mut req = size_request(7);
        req.cb_requested = 16;
        let mut buf = BytesMut::new();
        req.encode(&mut buf);
        let mut cursor = &buf[..];
        assert!(FileContentsRequest::decode(&mut cursor, buf.len() as u32).is_err());
    }

    #[test]
    fn range_request_with_clip_data_id_roundtrips() {
        let req = FileContentsRequest {
            stream_id: 1,
            list_index: 2,
            dw_flags: file_contents_flags::RANGE,
            n_position_low: 100,
            n_position_high: 0,
            cb_requested: 4096,
            clip_data_id: Some(42),
        };
        let mut buf = BytesMut::new();
        req.encode(&mut buf);
        let mut cursor = &buf[..];
        let decoded = FileContentsRequest::decode(&mut cursor, buf.len() as u32).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn response_roundtrip() {
        let resp = FileContentsResponse {
            stream_id: 3,
            data: Bytes::from_static(b"file bytes"),
        };
        let mut buf = BytesMut::new();
        resp.encode(&mut buf);
        let mut cursor = &buf[..];
        let decoded = FileContentsResponse::decode(&mut cursor, buf.len() as u32).unwrap();
        assert_eq!(decoded, resp);
    }
}
