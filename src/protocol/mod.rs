//! Protocol module implements the client side of the NFS version 4.0 protocol suite.
//!
//! This module contains three main components:
//!
//! - `xdr`: External Data Representation (XDR) for serialization and deserialization
//!   of data structures according to RFC 4506.
//!
//! - `rpc`: Remote Procedure Call (RPC) protocol implementation for issuing calls,
//!   framing records and validating replies as defined in RFC 5531.
//!
//! - `nfs`: the NFSv4.0 engine (RFC 7530): COMPOUND execution, client and open
//!   state, and path resolution.
//!
//! NFSv4 is stateful: the server tracks clients, open files and locks, and
//! every operation travels inside a COMPOUND request.

pub mod nfs;
pub mod rpc;
pub mod xdr;
