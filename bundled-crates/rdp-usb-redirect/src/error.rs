//! Errors raised by the USB redirection engine.

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, UsbError>;

/// Error kinds the USB engine can raise while processing a message.
#[derive(Error, Debug)]
pub enum UsbError {
    /// A message failed to decode off the wire.
    #[error("malformed URBDRC message: {0}")]
    InvalidData(String),

    /// An unknown or obsolete function/URB-function code was received.
    #[error("unsupported function code: {0}")]
    NotSupported(String),

    /// The target device is not registered, or has been marked gone.
    #[error("no such device: {0}")]
    NoDevice(u32),

    /// A host-stack call returned an unexpected failure.
    #[error("host USB stack error: {0}")]
    Internal(String),

    /// A transfer exceeded its timeout budget.
    #[error("transfer timed out")]
    Timeout,

    /// Allocation failure enumerating devices or building a response.
    #[error("out of memory")]
    NoMemory,
}

impl UsbError {
    /// Map this error to the USBD status word placed in a URB completion.
    pub fn to_usbd_status(&self) -> u32 {
        use crate::constants::usbd_status;
        match self {
            UsbError::InvalidData(_) => usbd_status::INVALID_PARAMETER,
            UsbError::NotSupported(_) => usbd_status::NOT_SUPPORTED,
            UsbError::NoDevice(_) => usbd_status::DEVICE_GONE,
            UsbError::Internal(_) => usbd_status::STALL_PID,
            UsbError::Timeout => usbd_status::TIMEOUT,
            UsbError::NoMemory => usbd_status::NO_MEMORY,
        }
    }
}
