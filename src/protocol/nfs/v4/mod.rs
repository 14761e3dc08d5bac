//! NFSv4.0 (Network File System version 4) client engine as specified in RFC 7530.
//!
//! The engine is layered the same way requests flow:
//!
//! 1. [`compound`] - builds COMPOUND requests, pairs each result with its
//!    operation and stops at the first failure
//! 2. [`state`] - client identity (SETCLIENTID), open-owners, sequence numbers,
//!    OPEN/CLOSE, byte-range locks and lease renewal
//! 3. [`resolver`] - slash-separated paths to file handles, with a path cache
//!
//! The high-level filesystem verbs in [`crate::client`] compose these.

pub mod compound;
pub mod resolver;
pub mod state;

pub use compound::{CompoundEngine, CompoundReply, OpFailure, Results};
pub use resolver::{PathCache, PathKey, Resolver, Walk};
pub use state::{OpenHow, OpenState, StateManager};
