//! Fragment reassembly for one virtual channel.
//!
//! Mirrors the reassembly rules FreeRDP's `channels.c` applies to
//! `VirtualChannelEntry` callbacks: on FIRST, a buffer is allocated sized to
//! the advertised total length; each fragment is appended in order; on LAST
//! the buffer is sealed and handed to the channel's dispatch queue. A bare
//! SUSPEND/RESUME event (no FIRST/LAST) is a flow-control no-op and never
//! touches the in-progress buffer.

use crate::transport::ChannelFlags;
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors raised while reassembling one message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblerError {
    /// A FIRST fragment's declared total length would exceed the
    /// configured cap, or allocation otherwise failed.
    #[error("out of memory reassembling message of {total_length} bytes")]
    NoMemory {
        /// Advertised total length that could not be allocated.
        total_length: usize,
    },
    /// A fragment arrived whose length, added to what has already been
    /// buffered, would exceed the total length announced on FIRST.
    #[error("fragment overruns advertised total length ({buffered} + {incoming} > {total_length})")]
    Overrun {
        /// Bytes already buffered.
        buffered: usize,
        /// Bytes in the offending fragment.
        incoming: usize,
        /// Total length advertised on FIRST.
        total_length: usize,
    },
    /// LAST arrived but fewer bytes were buffered than announced.
    #[error("message sealed short: buffered {buffered}, expected {total_length}")]
    Short {
        /// Bytes actually buffered at LAST.
        buffered: usize,
        /// Total length advertised on FIRST.
        total_length: usize,
    },
    /// A non-FIRST fragment arrived with no message in progress.
    #[error("fragment received with no message in progress")]
    NoMessageInProgress,
}

/// Per-channel reassembly state machine.
///
/// A fresh `Assembler` has no message in progress. Each call to
/// [`Assembler::feed`] either returns `Ok(None)` (more fragments expected,
/// or a flow-control event was absorbed) or `Ok(Some(message))` once LAST
/// seals a complete message. Any `Err` resets the assembler to the empty
/// state — the next FIRST starts fresh, per FreeRDP's fail-and-restart
/// behavior on reassembly errors.
#[derive(Debug, Default)]
pub struct Assembler {
    in_progress: Option<InProgress>,
    /// Hard cap on total_length, to bound a single malicious FIRST.
    max_message_len: usize,
}

#[derive(Debug)]
struct InProgress {
    buffer: BytesMut,
    total_length: usize,
}

const DEFAULT_MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

impl Assembler {
    /// Construct an assembler with the default maximum message size (64 MiB).
    pub fn new() -> Self {
        Self {
            in_progress: None,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    /// Construct an assembler with an explicit maximum message size.
    pub fn with_max_message_len(max_message_len: usize) -> Self {
        Self {
            in_progress: None,
            max_message_len,
        }
    }

    /// True while a FIRST has been seen but LAST has not yet sealed it.
    pub fn has_message_in_progress(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Feed one fragment into the assembler.
    ///
    /// On error the assembler drops any partial buffer and returns to the
    /// empty state, so the caller can simply log and continue.
    pub fn feed(
        &mut self,
        data: &[u8],
        total_length: usize,
        flags: ChannelFlags,
    ) -> Result<Option<Bytes>, AssemblerError> {
        if flags.is_flow_control_only() {
            return Ok(None);
        }

        if flags.first {
            if total_length > self.max_message_len {
                self.in_progress = None;
                return Err(AssemblerError::NoMemory { total_length });
            }
            let mut buffer = BytesMut::with_capacity(total_length);
            buffer.extend_from_slice(data);
            if buffer.len() > total_length {
                self.in_progress = None;
                return Err(AssemblerError::Overrun {
                    buffered: 0,
                    incoming: data.len(),
                    total_length,
                });
            }
            self.in_progress = Some(InProgress {
                buffer,
                total_length,
            });
        } else {
            let Some(in_progress) = self.in_progress.as_mut() else {
                return Err(AssemblerError::NoMessageInProgress);
            };
            if in_progress.buffer.len() + data.len() > in_progress.total_length {
                let buffered = in_progress.buffer.len();
                let total_length = in_progress.total_length;
                self.in_progress = None;
                return Err(AssemblerError::Overrun {
                    buffered,
                    incoming: data.len(),
                    total_length,
                });
            }
            in_progress.buffer.extend_from_slice(data);
        }

        if flags.last {
            let in_progress = self.in_progress.take().expect("set above on FIRST");
            if in_progress.buffer.len() != in_progress.total_length {
                return Err(AssemblerError::Short {
                    buffered: in_progress.buffer.len(),
                    total_length: in_progress.total_length,
                });
            }
            return Ok(Some(in_progress.buffer.freeze()));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(first: bool, last: bool) -> ChannelFlags {
        ChannelFlags {
            first,
            last,
            ..Default::default()
        }
    }

    #[test]
    fn single_fragment_whole_message() {
        let mut asm = Assembler::new();
        let out = asm.feed(b"hello", 5, ChannelFlags::whole()).unwrap();
        assert_eq!(out, Some(Bytes::from_static(b"hello")));
        assert!(!asm.has_message_in_progress());
    }

    #[test]
    fn multi_fragment_message() {
        let mut asm = Assembler::new();
        assert_eq!(asm.feed(b"hel", 5, flags(true, false)).unwrap(), None);
        assert!(asm.has_message_in_progress());
        let out = asm.feed(b"lo", 5, flags(false, true)).unwrap();
        assert_eq!(out, Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn suspend_resume_is_noop() {
        let mut asm = Assembler::new();
        asm.feed(b"hel", 5, flags(true, false)).unwrap();
        let mut sig = ChannelFlags {
            suspend: true,
            ..Default::default()
        };
        assert_eq!(asm.feed(&[], 0, sig).unwrap(), None);
        sig.suspend = false;
        sig.resume = true;
        assert_eq!(asm.feed(&[], 0, sig).unwrap(), None);
        assert!(asm.has_message_in_progress());
        let out = asm.feed(b"lo", 5, flags(false, true)).unwrap();
        assert_eq!(out, Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn overrun_resets_to_fresh_start() {
        let mut asm = Assembler::new();
        asm.feed(b"hel", 5, flags(true, false)).unwrap();
        let err = asm.feed(b"toolong", 5, flags(false, true)).unwrap_err();
        assert!(matches!(err, AssemblerError::Overrun { .. }));
        assert!(!asm.has_message_in_progress());
        let out = asm.feed(b"hi", 2, ChannelFlags::whole()).unwrap();
        assert_eq!(out, Some(Bytes::from_static(b"hi")));
    }

    #[test]
    fn short_seal_is_reported_and_clears_state() {
        let mut asm = Assembler::new();
        let err = asm.feed(b"hel", 5, flags(true, true)).unwrap_err();
        assert!(matches!(err, AssemblerError::Short { .. }));
        assert!(!asm.has_message_in_progress());
    }

    #[test]
    fn fragment_without_first_is_rejected() {
        let mut asm = Assembler::new();
        let err = asm.feed(b"lo", 5, flags(false, true)).unwrap_err();
        assert!(matches!(err, AssemblerError::NoMessageInProgress));
    }

    #[test]
    fn oversized_first_is_rejected_without_allocating() {
        let mut asm = Assembler::with_max_message_len(10);
        let err = asm.feed(b"x", 11, flags(true, false)).unwrap_err();
        assert!(matches!(err, AssemblerError::NoMemory { total_length: 11 }));
        assert!(!asm.has_message_in_progress());
    }
}
