//! This module provides data structures for the Remote Procedure Call (RPC) protocol
//! as defined in RFC 5531. The client builds `CALL` messages from them and
//! validates the `REPLY` header before handing the procedure results to the
//! NFSv4 decoder.

// Keep original RFC naming conventions to match the RFC text
#![allow(non_camel_case_types)]

use num_derive::{FromPrimitive, ToPrimitive};

use super::{DeserializeEnum, Serialize, SerializeEnum};
use crate::{DeserializeStruct, SerializeStruct, XdrUnion};

/// The only RPC protocol version in existence.
pub const RPC_VERSION: u32 = 2;

/// Largest credential or verifier body allowed by RFC 5531.
pub const MAX_AUTH_BYTES: usize = 400;

/// Authentication status codes indicating why authentication failed
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_stat {
    /// Success
    #[default]
    AUTH_OK = 0,
    /// Bad credential (seal broken)
    AUTH_BADCRED = 1,
    /// Client must begin a new session
    AUTH_REJECTEDCRED = 2,
    /// Bad verifier (seal broken)
    AUTH_BADVERF = 3,
    /// Verifier expired or replayed
    AUTH_REJECTEDVERF = 4,
    /// Rejected for security reasons
    AUTH_TOOWEAK = 5,
    /// Bogus response verifier
    AUTH_INVALIDRESP = 6,
    /// Reason unknown
    AUTH_FAILED = 7,
    /// No credentials for user
    RPCSEC_GSS_CREDPROBLEM = 13,
    /// Problem with context
    RPCSEC_GSS_CTXPROBLEM = 14,
}
impl SerializeEnum for auth_stat {}
impl DeserializeEnum for auth_stat {}

/// Authentication flavor (mechanism) identifiers for RPC
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_flavor {
    /// No authentication
    #[default]
    AUTH_NULL = 0,
    /// UNIX-style authentication (uid/gid), also known as AUTH_SYS
    AUTH_UNIX = 1,
    /// Short-form authentication
    AUTH_SHORT = 2,
    /// DES authentication
    AUTH_DES = 3,
}
impl SerializeEnum for auth_flavor {}
impl DeserializeEnum for auth_flavor {}

/// AUTH_SYS credentials sent with every call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct auth_unix {
    /// Arbitrary id generated by the caller
    pub stamp: u32,
    /// The name of the client machine
    pub machinename: String,
    /// The effective user ID of the caller
    pub uid: u32,
    /// The effective group ID of the caller
    pub gid: u32,
    /// A list of additional group IDs for the caller
    pub gids: Vec<u32>,
}
DeserializeStruct!(auth_unix, stamp, machinename, uid, gid, gids);
SerializeStruct!(auth_unix, stamp, machinename, uid, gid, gids);

/// Opaque authentication data: a flavor and the bytes that flavor defines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct opaque_auth {
    /// The authentication mechanism being used
    pub flavor: auth_flavor,
    /// The opaque authentication data associated with that mechanism
    pub body: Vec<u8>,
}
DeserializeStruct!(opaque_auth, flavor, body);
SerializeStruct!(opaque_auth, flavor, body);

impl opaque_auth {
    /// Wraps AUTH_SYS credentials.
    pub fn auth_unix(cred: &auth_unix) -> std::io::Result<opaque_auth> {
        let body = super::to_bytes(cred)?;
        if body.len() > MAX_AUTH_BYTES {
            return Err(super::invalid_data("AUTH_SYS credential exceeds 400 bytes"));
        }
        Ok(opaque_auth { flavor: auth_flavor::AUTH_UNIX, body })
    }
}

/// RPC message: a transaction id followed by a CALL or REPLY body.
///
/// The xid in a REPLY always matches the xid of the CALL that caused it;
/// the client relies on that to pair them up.
#[derive(Clone, Debug, Default)]
pub struct rpc_msg {
    /// Transaction identifier used to match calls and replies
    pub xid: u32,
    /// The body of the RPC message (call or reply)
    pub body: rpc_body,
}
DeserializeStruct!(rpc_msg, xid, body);
SerializeStruct!(rpc_msg, xid, body);

#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug)]
pub enum rpc_body {
    CALL(call_body),
    REPLY(reply_body),
}
XdrUnion!(rpc_body, CALL(call_body) = 0, REPLY(reply_body) = 1);

impl Default for rpc_body {
    fn default() -> rpc_body {
        rpc_body::CALL(call_body::default())
    }
}

/// The body of an RPC call. Procedure arguments follow it on the wire.
#[derive(Clone, Debug, Default)]
pub struct call_body {
    /// RPC version, must be 2
    pub rpcvers: u32,
    /// The program to call
    pub prog: u32,
    /// The version of the program
    pub vers: u32,
    /// The procedure within the program to call
    pub proc: u32,
    /// Authentication credentials for the caller
    pub cred: opaque_auth,
    /// Authentication verifier for the caller
    pub verf: opaque_auth,
}
DeserializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);
SerializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);

#[derive(Clone, Debug)]
pub enum reply_body {
    MSG_ACCEPTED(accepted_reply),
    MSG_DENIED(rejected_reply),
}
XdrUnion!(reply_body, MSG_ACCEPTED(accepted_reply) = 0, MSG_DENIED(rejected_reply) = 1);

impl Default for reply_body {
    fn default() -> reply_body {
        reply_body::MSG_ACCEPTED(accepted_reply::default())
    }
}

/// Lowest and highest versions the server supports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct mismatch_info {
    pub low: u32,
    pub high: u32,
}
DeserializeStruct!(mismatch_info, low, high);
SerializeStruct!(mismatch_info, low, high);

/// Reply to a call the server accepted. Even an accepted call may have
/// failed: only `SUCCESS` is followed by procedure results.
#[derive(Clone, Debug, Default)]
pub struct accepted_reply {
    /// Authentication verifier from server
    pub verf: opaque_auth,
    /// Reply data union discriminated by accept_stat
    pub reply_data: accept_body,
}
DeserializeStruct!(accepted_reply, verf, reply_data);
SerializeStruct!(accepted_reply, verf, reply_data);

#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum accept_body {
    /// Call completed successfully
    #[default]
    SUCCESS,
    /// Program is not available on this server
    PROG_UNAVAIL,
    /// Program version mismatch, includes supported version range
    PROG_MISMATCH(mismatch_info),
    /// Requested procedure is not available
    PROC_UNAVAIL,
    /// Server could not decode the call arguments
    GARBAGE_ARGS,
    /// Memory allocation failure or similar on the server
    SYSTEM_ERR,
}
XdrUnion!(
    accept_body,
    SUCCESS = 0,
    PROG_UNAVAIL = 1,
    PROG_MISMATCH(mismatch_info) = 2,
    PROC_UNAVAIL = 3,
    GARBAGE_ARGS = 4,
    SYSTEM_ERR = 5,
);

/// Reply sent when the server refuses the call outright, either because it
/// does not speak RPC version 2 or because authentication failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum rejected_reply {
    RPC_MISMATCH(mismatch_info),
    AUTH_ERROR(auth_stat),
}
XdrUnion!(rejected_reply, RPC_MISMATCH(mismatch_info) = 0, AUTH_ERROR(auth_stat) = 1);

impl Default for rejected_reply {
    fn default() -> rejected_reply {
        rejected_reply::AUTH_ERROR(auth_stat::default())
    }
}

/// Builds a CALL message header. Arguments are serialized after it.
pub fn call_message(xid: u32, prog: u32, vers: u32, proc: u32, cred: opaque_auth) -> rpc_msg {
    rpc_msg {
        xid,
        body: rpc_body::CALL(call_body {
            rpcvers: RPC_VERSION,
            prog,
            vers,
            proc,
            cred,
            verf: opaque_auth::default(),
        }),
    }
}

/// Builds a successful REPLY header with no additional data.
pub fn make_success_reply(xid: u32) -> rpc_msg {
    let reply = reply_body::MSG_ACCEPTED(accepted_reply {
        verf: opaque_auth::default(),
        reply_data: accept_body::SUCCESS,
    });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}
