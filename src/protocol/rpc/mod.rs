//! RPC (Remote Procedure Call) protocol implementation as specified in RFC 5531
//! (previously RFC 1057).
//!
//! The RPC protocol lets a program call procedures on a remote system as if
//! they were local calls. Every NFSv4 request is an RPC call to program
//! 100003 version 4, so this module is the client's only path to the wire.
//!
//! This module implements the calling side of RPC version 2:
//!
//! 1. Message framing for TCP using the Record Marking Standard
//! 2. Transaction ids and matching replies to calls
//! 3. Authentication (AUTH_SYS)
//! 4. Reply validation (accepted, denied, program/procedure errors)
//! 5. Deadlines and cooperative cancellation through [`Context`]
//!
//! Exchanges on one connection never interleave: a request is written as one
//! record and its reply read as one record before the next request starts.

mod client;
mod context;
mod wire;

pub use client::{RpcClient, Transport};
pub use context::Context;
pub use wire::{read_fragment, read_record, write_fragment};

/// Largest RPC record accepted from the peer.
pub const MAX_RPC_RECORD_LENGTH: usize = 64 * 1024 * 1024;
