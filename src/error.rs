//! Client errors and the classifier that maps them to a small set of kinds.
//!
//! Callers branch on [`ErrorKind`], never on raw status codes: a recursive
//! delete treats `NotFound` as done, a path creator treats `AlreadyExists` as
//! a lost race, and a bulk driver retries `Transport` failures on a fresh
//! connection.

use std::io;

use thiserror::Error;

use crate::protocol::xdr::nfs4::{nfs_opnum4, nfsstat4};
use crate::protocol::xdr::rpc::auth_stat;

pub type NfsResult<T> = Result<T, NfsError>;

#[derive(Debug, Error)]
pub enum NfsError {
    /// The server failed operation `index` of a COMPOUND.
    #[error("{op} (operation #{index}) failed with {status}")]
    Status { status: nfsstat4, op: nfs_opnum4, index: usize },

    /// Path resolution stopped at `component`.
    #[error("cannot resolve {component:?}: {status}")]
    Resolve { status: nfsstat4, component: String },

    /// Open or lock state is gone on the server; retry from OPEN.
    #[error("open state expired ({status}), retry from OPEN")]
    StateExpired { status: nfsstat4 },

    /// The peer sent something inconsistent with the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The RPC layer refused to run the call.
    #[error("rpc call rejected: {0}")]
    Rpc(String),

    #[error("rpc authentication rejected: {0:?}")]
    AuthRejected(auth_stat),

    #[error("transport: {0}")]
    Transport(#[from] io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid path {0:?}")]
    InvalidPath(String),

    /// Data acknowledged by the server may have been lost.
    #[error("i/o: {0}")]
    Io(String),
}

/// Semantic error kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    NotEmpty,
    AlreadyExists,
    NotDirectory,
    IsDirectory,
    StaleHandle,
    StateExpired,
    AccessDenied,
    ProtocolViolation,
    Transport,
    NoSpace,
    InvalidArgument,
    NameTooLong,
    Unsupported,
    /// Transient server condition (DELAY, GRACE, RESOURCE).
    Delay,
    Locked,
    /// Anything else the server reports, including SERVERFAULT.
    Io,
}

/// Maps a wire status to its kind. Pure table lookup, safe from any layer.
///
/// `NFS4_OK` is not an error and falls into the `Io` catch-all.
pub fn classify(status: nfsstat4) -> ErrorKind {
    use nfsstat4::*;

    match status {
        NFS4ERR_NOENT => ErrorKind::NotFound,
        NFS4ERR_NOTEMPTY => ErrorKind::NotEmpty,
        NFS4ERR_EXIST => ErrorKind::AlreadyExists,
        NFS4ERR_NOTDIR | NFS4ERR_SYMLINK => ErrorKind::NotDirectory,
        NFS4ERR_ISDIR => ErrorKind::IsDirectory,
        NFS4ERR_STALE | NFS4ERR_BADHANDLE | NFS4ERR_FHEXPIRED => ErrorKind::StaleHandle,
        NFS4ERR_EXPIRED
        | NFS4ERR_STALE_CLIENTID
        | NFS4ERR_STALE_STATEID
        | NFS4ERR_BAD_STATEID
        | NFS4ERR_OLD_STATEID
        | NFS4ERR_BAD_SEQID
        | NFS4ERR_ADMIN_REVOKED
        | NFS4ERR_LEASE_MOVED => ErrorKind::StateExpired,
        NFS4ERR_PERM | NFS4ERR_ACCESS | NFS4ERR_ROFS | NFS4ERR_WRONGSEC => ErrorKind::AccessDenied,
        NFS4ERR_BADXDR
        | NFS4ERR_OP_ILLEGAL
        | NFS4ERR_MINOR_VERS_MISMATCH
        | NFS4ERR_NOFILEHANDLE
        | NFS4ERR_RESTOREFH
        | NFS4ERR_TOOSMALL => ErrorKind::ProtocolViolation,
        NFS4ERR_NOSPC | NFS4ERR_DQUOT | NFS4ERR_FBIG => ErrorKind::NoSpace,
        NFS4ERR_INVAL
        | NFS4ERR_BADTYPE
        | NFS4ERR_BADNAME
        | NFS4ERR_BADCHAR
        | NFS4ERR_BADOWNER
        | NFS4ERR_BAD_RANGE
        | NFS4ERR_XDEV
        | NFS4ERR_MLINK => ErrorKind::InvalidArgument,
        NFS4ERR_NAMETOOLONG => ErrorKind::NameTooLong,
        NFS4ERR_NOTSUPP | NFS4ERR_ATTRNOTSUPP | NFS4ERR_LOCK_NOTSUPP => ErrorKind::Unsupported,
        NFS4ERR_DELAY | NFS4ERR_GRACE | NFS4ERR_RESOURCE => ErrorKind::Delay,
        NFS4ERR_LOCKED
        | NFS4ERR_DENIED
        | NFS4ERR_SHARE_DENIED
        | NFS4ERR_DEADLOCK
        | NFS4ERR_LOCK_RANGE
        | NFS4ERR_LOCKS_HELD
        | NFS4ERR_FILE_OPEN
        | NFS4ERR_OPENMODE => ErrorKind::Locked,
        _ => ErrorKind::Io,
    }
}

/// Reports whether `err` is of kind `kind`.
pub fn is_kind(err: &NfsError, kind: ErrorKind) -> bool {
    err.kind() == kind
}

impl NfsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NfsError::Status { status, .. } | NfsError::Resolve { status, .. } => classify(*status),
            NfsError::StateExpired { .. } => ErrorKind::StateExpired,
            NfsError::Protocol(_) | NfsError::Rpc(_) => ErrorKind::ProtocolViolation,
            NfsError::AuthRejected(_) => ErrorKind::AccessDenied,
            NfsError::Transport(_) | NfsError::Cancelled | NfsError::DeadlineExceeded => {
                ErrorKind::Transport
            }
            NfsError::InvalidPath(_) => ErrorKind::InvalidArgument,
            NfsError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        is_kind(self, kind)
    }

    /// Wire status behind this error, if the server reported one.
    pub fn status(&self) -> Option<nfsstat4> {
        match self {
            NfsError::Status { status, .. }
            | NfsError::Resolve { status, .. }
            | NfsError::StateExpired { status } => Some(*status),
            _ => None,
        }
    }

    /// A reply that could not be decoded.
    pub fn decode(err: io::Error) -> NfsError {
        NfsError::Protocol(format!("malformed reply: {err}"))
    }

    /// A request that could not be encoded, e.g. an oversized handle.
    pub fn encode(err: io::Error) -> NfsError {
        NfsError::Protocol(format!("cannot encode request: {err}"))
    }
}
