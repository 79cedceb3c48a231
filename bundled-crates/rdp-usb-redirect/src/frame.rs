//! The `{interfaceId, messageId, functionId}` triple prefixing every
//! message on a USB redirection stream (control or device).

use crate::constants::StreamId;
use crate::error::{Result, UsbError};
use bytes::{Buf, BufMut};

/// Size in bytes of the fixed message prefix.
pub const HEADER_LEN: usize = 12;

/// The fixed prefix every URBDRC message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Top 2 bits select the stream-id class; the low 30 bits are a
    /// function-class value scoped to that stream.
    pub interface_id: u32,
    /// Message id, echoed between a request and its matching response.
    pub message_id: u32,
    /// Function id, dispatched to a control or device operation depending
    /// on the stream it arrived on.
    pub function_id: u32,
}

impl MessageHeader {
    /// Construct a header for `stream` carrying `function_id`.
    pub fn new(stream: StreamId, function_class: u32, message_id: u32, function_id: u32) -> Self {
        Self {
            interface_id: stream.with_function_class(function_class),
            message_id,
            function_id,
        }
    }

    /// The stream-id class this header's `interfaceId` belongs to.
    pub fn stream_id(&self) -> StreamId {
        StreamId::from_interface_id(self.interface_id)
    }

    /// Decode the fixed prefix from the front of `src`.
    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < HEADER_LEN {
            return Err(UsbError::InvalidData(format!(
                "message header truncated: need {HEADER_LEN}, have {}",
                src.remaining()
            )));
        }
        Ok(Self {
            interface_id: src.get_u32_le(),
            message_id: src.get_u32_le(),
            function_id: src.get_u32_le(),
        })
    }

    /// Encode the fixed prefix.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.interface_id);
        dst.put_u32_le(self.message_id);
        dst.put_u32_le(self.function_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn roundtrips_and_recovers_stream_class() {
        let header = MessageHeader::new(StreamId::Proxy, 0x02, 7, crate::constants::device_function::CANCEL_REQUEST);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let mut cursor = &buf[..];
        let decoded = MessageHeader::decode(&mut cursor).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.stream_id(), StreamId::Proxy);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let mut cursor: &[u8] = &[0u8; 4];
        assert!(MessageHeader::decode(&mut cursor).is_err());
    }
}
