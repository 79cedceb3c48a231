//! `CLIPRDR_FORMAT_DATA_REQUEST` / `CLIPRDR_FORMAT_DATA_RESPONSE` and
//! `CLIPRDR_TEMP_DIRECTORY` codec.

use crate::constants::TEMP_DIRECTORY_PATH_LEN;
use crate::error::{CodecError, Result};
use bytes::{Buf, BufMut, Bytes};

/// `CLIPRDR_FORMAT_DATA_REQUEST` body: the format id being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDataRequest {
    /// Format id from the peer's most recently accepted format list.
    pub requested_format_id: u32,
}

impl FormatDataRequest {
    /// Decode a format-data request.
    pub fn decode(src: &mut impl Buf, data_len: u32) -> Result<Self> {
        if data_len < 4 {
            return Err(CodecError::Truncated {
                field: "CLIPRDR_FORMAT_DATA_REQUEST",
                needed: 4,
                available: data_len as usize,
            });
        }
        Ok(Self {
            requested_format_id: src.get_u32_le(),
        })
    }

    /// Encode this request.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.requested_format_id);
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        4
    }
}

/// `CLIPRDR_FORMAT_DATA_RESPONSE` body: the raw format bytes, or empty on
/// `CB_RESPONSE_FAIL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDataResponse {
    /// Raw format-specific payload.
    pub data: Bytes,
}

impl FormatDataResponse {
    /// Decode a format-data response body of `data_len` bytes.
    pub fn decode(src: &mut impl Buf, data_len: u32) -> Result<Self> {
        if src.remaining() < data_len as usize {
            return Err(CodecError::LengthMismatch {
                declared: data_len,
                remaining: src.remaining(),
            });
        }
        Ok(Self {
            data: src.copy_to_bytes(data_len as usize),
        })
    }

    /// Encode this response.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.data);
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// An empty response, used alongside `CB_RESPONSE_FAIL`.
    pub fn empty() -> Self {
        Self { data: Bytes::new() }
    }
}

/// `CLIPRDR_TEMP_DIRECTORY` body: a fixed 520-byte, null-padded UTF-16
/// path (260 code units).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTemporaryDirectory {
    /// The client's temporary directory path.
    pub path: String,
}

impl ClientTemporaryDirectory {
    /// Decode the fixed-size path buffer.
    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < TEMP_DIRECTORY_PATH_LEN {
            return Err(CodecError::Truncated {
                field: "CLIPRDR_TEMP_DIRECTORY",
                needed: TEMP_DIRECTORY_PATH_LEN,
                available: src.remaining(),
            });
        }
        let mut buf = vec![0u8; TEMP_DIRECTORY_PATH_LEN];
        src.copy_to_slice(&mut buf);
        let units: Vec<u16> = buf
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        Ok(Self {
            path: String::from_utf16_lossy(&units),
        })
    }

    /// Encode the path into the fixed 520-byte buffer, truncating to fit
    /// and null-padding the remainder.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let mut buf = [0u8; TEMP_DIRECTORY_PATH_LEN];
        let units: Vec<u16> = self.path.encode_utf16().collect();
        let max_units = TEMP_DIRECTORY_PATH_LEN / 2 - 1;
        for (i, unit) in units.iter().take(max_units).enumerate() {
            buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        dst.put_slice(&buf);
    }

    /// Encoded size in bytes (always fixed).
    pub fn size(&self) -> usize {
        TEMP_DIRECTORY_PATH_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn format_data_request_roundtrip() {
        let req = FormatDataRequest {
            requested_format_id: 13,
        };
        let mut buf = BytesMut::new();
        req.encode(&mut buf);
        let mut cursor = &buf[..];
        assert_eq!(FormatDataRequest::decode(&mut cursor, 4).unwrap(), req);
    }

    #[test]
    fn format_data_response_roundtrip() {
        let resp = FormatDataResponse {
            data: Bytes::from_static(b"hello clipboard"),
        };
        let mut buf = BytesMut::new();
        resp.encode(&mut buf);
        let mut cursor = &buf[..];
        let decoded = FormatDataResponse::decode(&mut cursor, buf.len() as u32).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn temp_directory_roundtrip() {
        let dir = ClientTemporaryDirectory {
            path: "/tmp/rdp-clip".to_string(),
        };
        let mut buf = BytesMut::new();
        dir.encode(&mut buf);
        assert_eq!(buf.len(), TEMP_DIRECTORY_PATH_LEN);
        let mut cursor = &buf[..];
        let decoded = ClientTemporaryDirectory::decode(&mut cursor).unwrap();
        assert_eq!(decoded, dir);
    }
}
