//! URB (USB Request Block) decode/dispatch payloads carried inside a
//! `SUBMIT_URB` `IO_CONTROL` message, grounded on `data_transfer.c`'s
//! `urb_*` decode helpers and dispatch `switch`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::urb_function;
use crate::error::{Result, UsbError};
use crate::host::{ControlSetup, Direction};

/// The recipient of a GET_STATUS/CLEAR_FEATURE/SET_FEATURE/VENDOR/CLASS
/// request, carried in the low bits of `bmRequestType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Device.
    Device,
    /// Interface.
    Interface,
    /// Endpoint.
    Endpoint,
    /// Other.
    Other,
}

/// A decoded `SUBMIT_URB` payload, dispatched by `urb_function` code.
#[derive(Debug, Clone)]
pub enum UrbRequest {
    /// `URB_FUNCTION_SELECT_CONFIGURATION`.
    SelectConfiguration { configuration_value: u8 },
    /// `URB_FUNCTION_SELECT_INTERFACE`.
    SelectInterface { interface_number: u8, alternate_setting: u8 },
    /// `URB_FUNCTION_ABORT_PIPE`.
    AbortPipe,
    /// `URB_FUNCTION_GET_CURRENT_FRAME_NUMBER`.
    GetCurrentFrameNumber,
    /// `URB_FUNCTION_CONTROL_TRANSFER[_EX]`. `timeout_ms` is `Some` only
    /// for the `_EX` form, which carries an explicit timeout ahead of the
    /// setup packet; the non-`_EX` form has no timeout field on the wire.
    ControlTransfer { setup: ControlSetup, direction: Direction, data: Bytes, timeout_ms: Option<u32> },
    /// `URB_FUNCTION_BULK_OR_INTERRUPT_TRANSFER`.
    BulkOrInterruptTransfer { direction: Direction, data: Bytes },
    /// `URB_FUNCTION_ISOCH_TRANSFER`. Whether the request is no-ack (the
    /// request id's top bit) is decided by the caller from the request id,
    /// not carried here.
    IsochTransfer { direction: Direction, packet_lengths: Vec<u32>, data: Bytes },
    /// `URB_FUNCTION_GET_DESCRIPTOR_FROM_{DEVICE,INTERFACE,ENDPOINT}`.
    GetDescriptor { recipient: Recipient, descriptor_type: u8, descriptor_index: u8, language_id: u16, length: u16 },
    /// `URB_FUNCTION_SET_DESCRIPTOR_TO_{DEVICE,INTERFACE,ENDPOINT}`.
    SetDescriptor { recipient: Recipient, descriptor_type: u8, descriptor_index: u8, language_id: u16, data: Bytes },
    /// `URB_FUNCTION_GET_STATUS_FROM_{DEVICE,INTERFACE,ENDPOINT,OTHER}`.
    GetStatus { recipient: Recipient, index: u16 },
    /// `URB_FUNCTION_SET_FEATURE_TO_{DEVICE,INTERFACE,ENDPOINT,OTHER}`.
    SetFeature { recipient: Recipient, feature_selector: u16, index: u16 },
    /// `URB_FUNCTION_CLEAR_FEATURE_TO_{DEVICE,INTERFACE,ENDPOINT,OTHER}`.
    ClearFeature { recipient: Recipient, feature_selector: u16, index: u16 },
    /// `URB_FUNCTION_VENDOR_*` / `URB_FUNCTION_CLASS_*`, passed through verbatim.
    VendorOrClassRequest { recipient: Recipient, is_class: bool, setup: ControlSetup, direction: Direction, data: Bytes },
    /// `URB_FUNCTION_GET_CONFIGURATION`.
    GetConfiguration,
    /// `URB_FUNCTION_GET_INTERFACE`.
    GetInterface { interface_number: u8 },
    /// `URB_FUNCTION_GET_MS_FEATURE_DESCRIPTOR`.
    GetMsFeatureDescriptor { recipient: Recipient, interface_number: u8, ms_page_index: u8, feature_descriptor_index: u16 },
    /// `URB_FUNCTION_SYNC_RESET_PIPE_AND_CLEAR_STALL`.
    SyncResetPipeAndClearStall,
    /// `URB_FUNCTION_SYNC_CLEAR_STALL`.
    SyncClearStall,
}

fn recipient_from_bm_request_type(bm_request_type: u8) -> Recipient {
    match bm_request_type & 0x1F {
        0 => Recipient::Device,
        1 => Recipient::Interface,
        2 => Recipient::Endpoint,
        _ => Recipient::Other,
    }
}

impl UrbRequest {
    /// Decode a `SUBMIT_URB` payload given its `urb_function` code and an
    /// endpoint-direction hint taken from the pipe the transfer targets.
    pub fn decode(function: u16, endpoint_direction: Direction, src: &mut Bytes) -> Result<Self> {
        use urb_function::*;
        match function {
            SELECT_CONFIGURATION => {
                require(src, 1)?;
                Ok(UrbRequest::SelectConfiguration { configuration_value: src.get_u8() })
            }
            SELECT_INTERFACE => {
                require(src, 2)?;
                Ok(UrbRequest::SelectInterface { interface_number: src.get_u8(), alternate_setting: src.get_u8() })
            }
            ABORT_PIPE => Ok(UrbRequest::AbortPipe),
            GET_CURRENT_FRAME_NUMBER => Ok(UrbRequest::GetCurrentFrameNumber),
            CONTROL_TRANSFER => {
                require(src, 4)?;
                let request_type = src.get_u8();
                let request = src.get_u8();
                let value = src.get_u16_le();
                let index = src.get_u16_le();
                Ok(UrbRequest::ControlTransfer {
                    setup: ControlSetup { request_type, request, value, index },
                    direction: endpoint_direction,
                    data: src.split_off(0),
                    timeout_ms: None,
                })
            }
            CONTROL_TRANSFER_EX => {
                require(src, 8)?;
                let timeout_ms = src.get_u32_le();
                let request_type = src.get_u8();
                let request = src.get_u8();
                let value = src.get_u16_le();
                let index = src.get_u16_le();
                Ok(UrbRequest::ControlTransfer {
                    setup: ControlSetup { request_type, request, value, index },
                    direction: endpoint_direction,
                    data: src.split_off(0),
                    timeout_ms: Some(timeout_ms),
                })
            }
            BULK_OR_INTERRUPT_TRANSFER => Ok(UrbRequest::BulkOrInterruptTransfer { direction: endpoint_direction, data: src.split_off(0) }),
            ISOCH_TRANSFER => {
                require(src, 4)?;
                let packet_count = src.get_u32_le() as usize;
                require(src, packet_count * 4)?;
                let packet_lengths = (0..packet_count).map(|_| src.get_u32_le()).collect();
                Ok(UrbRequest::IsochTransfer { direction: endpoint_direction, packet_lengths, data: src.split_off(0) })
            }
            GET_DESCRIPTOR_FROM_DEVICE | GET_DESCRIPTOR_FROM_INTERFACE | GET_DESCRIPTOR_FROM_ENDPOINT => {
                require(src, 6)?;
                let recipient = match function {
                    GET_DESCRIPTOR_FROM_DEVICE => Recipient::Device,
                    GET_DESCRIPTOR_FROM_INTERFACE => Recipient::Interface,
                    _ => Recipient::Endpoint,
                };
                Ok(UrbRequest::GetDescriptor {
                    recipient,
                    descriptor_type: src.get_u8(),
                    descriptor_index: src.get_u8(),
                    language_id: src.get_u16_le(),
                    length: src.get_u16_le(),
                })
            }
            SET_DESCRIPTOR_TO_DEVICE | SET_DESCRIPTOR_TO_INTERFACE | SET_DESCRIPTOR_TO_ENDPOINT => {
                require(src, 4)?;
                let recipient = match function {
                    SET_DESCRIPTOR_TO_DEVICE => Recipient::Device,
                    SET_DESCRIPTOR_TO_INTERFACE => Recipient::Interface,
                    _ => Recipient::Endpoint,
                };
                Ok(UrbRequest::SetDescriptor {
                    recipient,
                    descriptor_type: src.get_u8(),
                    descriptor_index: src.get_u8(),
                    language_id: src.get_u16_le(),
                    data: src.split_off(0),
                })
            }
            GET_STATUS_FROM_DEVICE | GET_STATUS_FROM_INTERFACE | GET_STATUS_FROM_ENDPOINT | GET_STATUS_FROM_OTHER => {
                require(src, 2)?;
                Ok(UrbRequest::GetStatus { recipient: status_recipient(function), index: src.get_u16_le() })
            }
            SET_FEATURE_TO_DEVICE | SET_FEATURE_TO_INTERFACE | SET_FEATURE_TO_ENDPOINT | SET_FEATURE_TO_OTHER => {
                require(src, 4)?;
                Ok(UrbRequest::SetFeature {
                    recipient: feature_recipient(function, true),
                    feature_selector: src.get_u16_le(),
                    index: src.get_u16_le(),
                })
            }
            CLEAR_FEATURE_TO_DEVICE | CLEAR_FEATURE_TO_INTERFACE | CLEAR_FEATURE_TO_ENDPOINT | CLEAR_FEATURE_TO_OTHER => {
                require(src, 4)?;
                Ok(UrbRequest::ClearFeature {
                    recipient: feature_recipient(function, false),
                    feature_selector: src.get_u16_le(),
                    index: src.get_u16_le(),
                })
            }
            VENDOR_DEVICE | VENDOR_INTERFACE | VENDOR_ENDPOINT | VENDOR_OTHER | CLASS_DEVICE | CLASS_INTERFACE
            | CLASS_ENDPOINT | CLASS_OTHER => {
                require(src, 4)?;
                let request_type = src.get_u8();
                let request = src.get_u8();
                let value = src.get_u16_le();
                let index = src.get_u16_le();
                Ok(UrbRequest::VendorOrClassRequest {
                    recipient: recipient_from_bm_request_type(request_type),
                    is_class: matches!(function, CLASS_DEVICE | CLASS_INTERFACE | CLASS_ENDPOINT | CLASS_OTHER),
                    setup: ControlSetup { request_type, request, value, index },
                    direction: endpoint_direction,
                    data: src.split_off(0),
                })
            }
            GET_CONFIGURATION => Ok(UrbRequest::GetConfiguration),
            GET_INTERFACE => {
                require(src, 1)?;
                Ok(UrbRequest::GetInterface { interface_number: src.get_u8() })
            }
            GET_MS_FEATURE_DESCRIPTOR => {
                require(src, 4)?;
                Ok(UrbRequest::GetMsFeatureDescriptor {
                    recipient: recipient_from_bm_request_type(src.get_u8()),
                    interface_number: src.get_u8(),
                    ms_page_index: src.get_u8(),
                    feature_descriptor_index: src.get_u16_le(),
                })
            }
            SYNC_RESET_PIPE_AND_CLEAR_STALL => Ok(UrbRequest::SyncResetPipeAndClearStall),
            SYNC_CLEAR_STALL => Ok(UrbRequest::SyncClearStall),
            TAKE_FRAME_LENGTH_CONTROL | RELEASE_FRAME_LENGTH_CONTROL | GET_FRAME_LENGTH | SET_FRAME_LENGTH => {
                Err(UsbError::NotSupported(format!("obsolete URB function 0x{function:04x}")))
            }
            other => Err(UsbError::NotSupported(format!("unrecognized URB function 0x{other:04x}"))),
        }
    }
}

fn status_recipient(function: u16) -> Recipient {
    use urb_function::*;
    match function {
        GET_STATUS_FROM_DEVICE => Recipient::Device,
        GET_STATUS_FROM_INTERFACE => Recipient::Interface,
        GET_STATUS_FROM_ENDPOINT => Recipient::Endpoint,
        _ => Recipient::Other,
    }
}

fn feature_recipient(function: u16, set: bool) -> Recipient {
    use urb_function::*;
    if set {
        match function {
            SET_FEATURE_TO_DEVICE => Recipient::Device,
            SET_FEATURE_TO_INTERFACE => Recipient::Interface,
            SET_FEATURE_TO_ENDPOINT => Recipient::Endpoint,
            _ => Recipient::Other,
        }
    } else {
        match function {
            CLEAR_FEATURE_TO_DEVICE => Recipient::Device,
            CLEAR_FEATURE_TO_INTERFACE => Recipient::Interface,
            CLEAR_FEATURE_TO_ENDPOINT => Recipient::Endpoint,
            _ => Recipient::Other,
        }
    }
}

fn require(src: &Bytes, n: usize) -> Result<()> {
    if src.len() < n {
        Err(UsbError::InvalidData(format!("URB payload truncated: need {n}, have {}", src.len())))
    } else {
        Ok(())
    }
}

/// A completed URB's result, ready to be framed as `URB_COMPLETION` or
/// `URB_COMPLETION_NO_DATA`.
#[derive(Debug, Clone)]
pub struct UrbCompletion {
    /// The request id this completion answers.
    pub request_id: u32,
    /// USBD status word.
    pub usbd_status: u32,
    /// Output data, if any. An empty buffer still selects `URB_COMPLETION`
    /// for requests that are conceptually data-bearing (e.g. a
    /// zero-length `IN` transfer); [`UrbCompletion::no_data`] is for
    /// requests with no data stage at all.
    pub data: Option<Bytes>,
}

impl UrbCompletion {
    /// A successful completion carrying `data`.
    pub fn ok(request_id: u32, data: Bytes) -> Self {
        Self { request_id, usbd_status: crate::constants::usbd_status::SUCCESS, data: Some(data) }
    }

    /// A successful completion with no data stage (e.g. `SELECT_CONFIGURATION`).
    pub fn no_data(request_id: u32) -> Self {
        Self { request_id, usbd_status: crate::constants::usbd_status::SUCCESS, data: None }
    }

    /// A failed completion, status derived from `err`.
    pub fn failed(request_id: u32, err: &UsbError) -> Self {
        Self { request_id, usbd_status: err.to_usbd_status(), data: None }
    }

    /// The device-stream `functionId` this completion should be framed
    /// under: `URB_COMPLETION` when carrying data, `URB_COMPLETION_NO_DATA`
    /// otherwise.
    pub fn function_id(&self) -> u32 {
        if self.data.is_some() {
            crate::constants::device_function::URB_COMPLETION
        } else {
            crate::constants::device_function::URB_COMPLETION_NO_DATA
        }
    }

    /// Encode the completion body (after the `MessageHeader`): request id,
    /// USBD status, and, for `URB_COMPLETION`, a length-prefixed data buffer.
    pub fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.request_id);
        dst.put_u32_le(self.usbd_status);
        if let Some(data) = &self.data {
            dst.put_u32_le(data.len() as u32);
            dst.extend_from_slice(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_select_configuration() {
        let mut body = Bytes::from_static(&[5u8]);
        let req = UrbRequest::decode(urb_function::SELECT_CONFIGURATION, Direction::Out, &mut body).unwrap();
        assert!(matches!(req, UrbRequest::SelectConfiguration { configuration_value: 5 }));
    }

    #[test]
    fn decodes_control_transfer_with_trailing_data() {
        let mut body = Bytes::from(vec![0x80, 0x06, 0x00, 0x01, 1, 2, 3]);
        let req = UrbRequest::decode(urb_function::CONTROL_TRANSFER, Direction::In, &mut body).unwrap();
        match req {
            UrbRequest::ControlTransfer { setup, data, timeout_ms, .. } => {
                assert_eq!(setup.request_type, 0x80);
                assert_eq!(setup.request, 0x06);
                assert_eq!(&data[..], &[1, 2, 3]);
                assert_eq!(timeout_ms, None);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn decodes_control_transfer_ex_with_explicit_timeout() {
        let mut body = Bytes::from(vec![0xE8, 0x03, 0x00, 0x00, 0x80, 0x06, 0x00, 0x01, 1, 2, 3]);
        let req = UrbRequest::decode(urb_function::CONTROL_TRANSFER_EX, Direction::In, &mut body).unwrap();
        match req {
            UrbRequest::ControlTransfer { setup, data, timeout_ms, .. } => {
                assert_eq!(timeout_ms, Some(1000));
                assert_eq!(setup.request_type, 0x80);
                assert_eq!(&data[..], &[1, 2, 3]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn obsolete_frame_length_functions_rejected() {
        let mut body = Bytes::new();
        assert!(UrbRequest::decode(urb_function::GET_FRAME_LENGTH, Direction::In, &mut body).is_err());
    }

    #[test]
    fn unknown_function_rejected() {
        let mut body = Bytes::new();
        assert!(UrbRequest::decode(0xFFFF, Direction::In, &mut body).is_err());
    }

    #[test]
    fn completion_without_data_uses_no_data_function_id() {
        let completion = UrbCompletion::no_data(1);
        assert_eq!(completion.function_id(), crate::constants::device_function::URB_COMPLETION_NO_DATA);
    }

    #[test]
    fn completion_with_data_uses_data_function_id_and_encodes_length_prefix() {
        let completion = UrbCompletion::ok(1, Bytes::from_static(b"abc"));
        assert_eq!(completion.function_id(), crate::constants::device_function::URB_COMPLETION);
        let mut buf = BytesMut::new();
        completion.encode_body(&mut buf);
        assert_eq!(buf.len(), 4 + 4 + 4 + 3);
    }
}
