//! Transport adapter (C1).
//!
//! Wraps the RDP virtual-channel primitive: open/close/write, plus the two
//! event kinds the owner receives — `connected` and `data_received`. The
//! actual RDP wire transport (TLS, NLA, PDU framing) is out of scope; this
//! module only defines the contract so the channel assembler (C2) can be
//! built and tested against it.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Status returned by a transport write. Any non-`Ok` status must surface
/// as a channel error on the session object without aborting the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// Write accepted.
    Ok,
    /// The open handle no longer refers to a live channel.
    BadHandle,
    /// The transport could not allocate resources for the write.
    NoMemory,
    /// Generic transport-layer failure.
    Failed,
}

impl TransportStatus {
    /// Whether this status represents success.
    pub fn is_ok(self) -> bool {
        matches!(self, TransportStatus::Ok)
    }
}

/// Bit flags carried on a `data_received` event. SUSPEND/RESUME are
/// transport flow-control signals the assembler ignores other than
/// returning OK without appending data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelFlags {
    /// Start of a PDU.
    pub first: bool,
    /// End of a PDU.
    pub last: bool,
    /// Suspend signal (ignored by the assembler).
    pub suspend: bool,
    /// Resume signal (ignored by the assembler).
    pub resume: bool,
}

impl ChannelFlags {
    /// A single-fragment PDU: both FIRST and LAST set.
    pub fn whole() -> Self {
        Self {
            first: true,
            last: true,
            ..Default::default()
        }
    }

    /// True if this event carries no FIRST/LAST framing information at all
    /// (a bare SUSPEND or RESUME signal).
    pub fn is_flow_control_only(&self) -> bool {
        !self.first && !self.last && (self.suspend || self.resume)
    }
}

/// Opaque transport token plus an "init handle". Uniquely identifies one
/// logical channel within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    open_handle: u32,
    init_handle: u32,
}

impl ChannelHandle {
    /// Construct a handle from its raw parts (used by transport adapters).
    pub fn new(open_handle: u32, init_handle: u32) -> Self {
        Self {
            open_handle,
            init_handle,
        }
    }

    /// The opaque open-handle component.
    pub fn open_handle(&self) -> u32 {
        self.open_handle
    }

    /// The opaque init-handle component.
    pub fn init_handle(&self) -> u32 {
        self.init_handle
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}/{:#x}", self.init_handle, self.open_handle)
    }
}

/// Monotonic allocator for open-handles, used by test/mock transports.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: AtomicU32,
}

impl HandleAllocator {
    /// Allocate the next open-handle value.
    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Events delivered by the transport to the channel owner.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The channel is open and the server has sent connect data.
    Connected {
        /// Channel this event is for.
        handle: ChannelHandle,
        /// Opaque connect-time data.
        data: Bytes,
    },
    /// A fragment of data arrived on the channel.
    DataReceived {
        /// Channel this event is for.
        handle: ChannelHandle,
        /// Fragment payload.
        data: Bytes,
        /// Total length of the whole message, as advertised on FIRST.
        total_length: usize,
        /// Fragmentation flags.
        flags: ChannelFlags,
    },
}

/// Synchronous transport operations exposed to channel owners.
///
/// A real implementation wraps the RDP client's virtual-channel entry
/// points; test code uses an in-memory mock instead.
pub trait VirtualChannelTransport: Send + Sync {
    /// Open a channel by name, returning its handle.
    fn open(&self, init_handle: u32, name: &str) -> crate::error::Result<ChannelHandle>;

    /// Close a previously opened channel. Idempotent.
    fn close(&self, handle: ChannelHandle) -> crate::error::Result<()>;

    /// Write a buffer to the channel. Ownership of `buffer` is logically
    /// transferred to the transport for the duration of the write.
    fn write(&self, handle: ChannelHandle, buffer: Bytes) -> TransportStatus;
}

#[cfg(test)]
pub mod mock {
    //! In-memory transport used by assembler/addin/session tests.
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// A transport that records writes and can be told to fail them.
    #[derive(Default)]
    pub struct MockTransport {
        allocator: HandleAllocator,
        open: Mutex<HashSet<u32>>,
        /// Recorded writes, in order.
        pub writes: Mutex<Vec<(ChannelHandle, Bytes)>>,
        /// If set, `write` returns this status instead of `Ok`.
        pub fail_writes_with: Mutex<Option<TransportStatus>>,
    }

    impl MockTransport {
        /// Construct an empty mock transport.
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl VirtualChannelTransport for MockTransport {
        fn open(&self, init_handle: u32, _name: &str) -> crate::error::Result<ChannelHandle> {
            let open_handle = self.allocator.next();
            self.open.lock().insert(open_handle);
            Ok(ChannelHandle::new(open_handle, init_handle))
        }

        fn close(&self, handle: ChannelHandle) -> crate::error::Result<()> {
            self.open.lock().remove(&handle.open_handle());
            Ok(())
        }

        fn write(&self, handle: ChannelHandle, buffer: Bytes) -> TransportStatus {
            if let Some(status) = *self.fail_writes_with.lock() {
                return status;
            }
            self.writes.lock().push((handle, buffer));
            TransportStatus::Ok
        }
    }
}
