//! Channel assembly and dispatch (C2).
//!
//! Reassembles fragmented virtual-channel PDUs delivered by the transport
//! (C1) into whole messages, then hands them to a per-channel dispatch
//! queue that either runs handlers inline or on a worker task.

pub mod assembler;
pub mod queue;

pub use assembler::{Assembler, AssemblerError};
pub use queue::{DispatchItem, DispatchQueue};
