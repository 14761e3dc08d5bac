//! The module defines XDR data types and constants for Network File System (NFS)
//! version 4.0, as defined in RFC 7530.
//!
//! Unlike version 3, NFSv4 has a single procedure that carries work: `COMPOUND`.
//! A COMPOUND is a list of operations, each encoded as a discriminated union
//! keyed by its operation number ([`nfs_opnum4`]). The reply is a list of
//! per-operation results keyed the same way, cut short at the first failure.
//!
//! This module defines the constants and basic data types shared by all
//! operations. Per-operation arguments and results live in [`ops`]; the
//! attribute bitmap codec lives in [`attr`].

// Preserve original RFC naming conventions to match the RFC text
#![allow(non_camel_case_types)]

use std::fmt;
use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::{deserialize, invalid_data, Deserialize, DeserializeEnum, Serialize, SerializeEnum};
use crate::{DeserializeStruct, SerializeStruct};

pub mod attr;
pub mod ops;

/// The RPC program number for the NFS service.
pub const PROGRAM: u32 = 100003;
/// The version number for NFS version 4 protocol.
pub const VERSION: u32 = 4;
/// The only minor version this client speaks.
pub const MINOR_VERSION: u32 = 0;

/// NULL procedure: does nothing, used to probe the server.
pub const NFSPROC4_NULL: u32 = 0;
/// COMPOUND procedure: carries every real operation.
pub const NFSPROC4_COMPOUND: u32 = 1;

/// The maximum size in bytes of the opaque file handle.
pub const NFS4_FHSIZE: usize = 128;
/// The size in bytes of every NFSv4 verifier.
pub const NFS4_VERIFIER_SIZE: usize = 8;
/// The size in bytes of the opaque part of a stateid.
pub const NFS4_OTHER_SIZE: usize = 12;

/// Status codes returned for COMPOUND and for every operation inside it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfsstat4 {
    #[default]
    NFS4_OK = 0,
    NFS4ERR_PERM = 1,
    NFS4ERR_NOENT = 2,
    NFS4ERR_IO = 5,
    NFS4ERR_NXIO = 6,
    NFS4ERR_ACCESS = 13,
    NFS4ERR_EXIST = 17,
    NFS4ERR_XDEV = 18,
    NFS4ERR_NOTDIR = 20,
    NFS4ERR_ISDIR = 21,
    NFS4ERR_INVAL = 22,
    NFS4ERR_FBIG = 27,
    NFS4ERR_NOSPC = 28,
    NFS4ERR_ROFS = 30,
    NFS4ERR_MLINK = 31,
    NFS4ERR_NAMETOOLONG = 63,
    NFS4ERR_NOTEMPTY = 66,
    NFS4ERR_DQUOT = 69,
    NFS4ERR_STALE = 70,
    NFS4ERR_BADHANDLE = 10001,
    NFS4ERR_BAD_COOKIE = 10003,
    NFS4ERR_NOTSUPP = 10004,
    NFS4ERR_TOOSMALL = 10005,
    NFS4ERR_SERVERFAULT = 10006,
    NFS4ERR_BADTYPE = 10007,
    NFS4ERR_DELAY = 10008,
    NFS4ERR_SAME = 10009,
    NFS4ERR_DENIED = 10010,
    NFS4ERR_EXPIRED = 10011,
    NFS4ERR_LOCKED = 10012,
    NFS4ERR_GRACE = 10013,
    NFS4ERR_FHEXPIRED = 10014,
    NFS4ERR_SHARE_DENIED = 10015,
    NFS4ERR_WRONGSEC = 10016,
    NFS4ERR_CLID_INUSE = 10017,
    NFS4ERR_RESOURCE = 10018,
    NFS4ERR_MOVED = 10019,
    NFS4ERR_NOFILEHANDLE = 10020,
    NFS4ERR_MINOR_VERS_MISMATCH = 10021,
    NFS4ERR_STALE_CLIENTID = 10022,
    NFS4ERR_STALE_STATEID = 10023,
    NFS4ERR_OLD_STATEID = 10024,
    NFS4ERR_BAD_STATEID = 10025,
    NFS4ERR_BAD_SEQID = 10026,
    NFS4ERR_NOT_SAME = 10027,
    NFS4ERR_LOCK_RANGE = 10028,
    NFS4ERR_SYMLINK = 10029,
    NFS4ERR_RESTOREFH = 10030,
    NFS4ERR_LEASE_MOVED = 10031,
    NFS4ERR_ATTRNOTSUPP = 10032,
    NFS4ERR_NO_GRACE = 10033,
    NFS4ERR_RECLAIM_BAD = 10034,
    NFS4ERR_RECLAIM_CONFLICT = 10035,
    NFS4ERR_BADXDR = 10036,
    NFS4ERR_LOCKS_HELD = 10037,
    NFS4ERR_OPENMODE = 10038,
    NFS4ERR_BADOWNER = 10039,
    NFS4ERR_BADCHAR = 10040,
    NFS4ERR_BADNAME = 10041,
    NFS4ERR_BAD_RANGE = 10042,
    NFS4ERR_LOCK_NOTSUPP = 10043,
    NFS4ERR_OP_ILLEGAL = 10044,
    NFS4ERR_DEADLOCK = 10045,
    NFS4ERR_FILE_OPEN = 10046,
    NFS4ERR_ADMIN_REVOKED = 10047,
    NFS4ERR_CB_PATH_DOWN = 10048,
}
impl SerializeEnum for nfsstat4 {}
impl DeserializeEnum for nfsstat4 {}

impl nfsstat4 {
    pub fn is_ok(self) -> bool {
        self == nfsstat4::NFS4_OK
    }
}

impl fmt::Display for nfsstat4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, *self as u32)
    }
}

/// Operation numbers, the discriminant of every COMPOUND argument and result.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_opnum4 {
    OP_ACCESS = 3,
    OP_CLOSE = 4,
    OP_COMMIT = 5,
    OP_CREATE = 6,
    OP_DELEGPURGE = 7,
    OP_DELEGRETURN = 8,
    OP_GETATTR = 9,
    OP_GETFH = 10,
    OP_LINK = 11,
    OP_LOCK = 12,
    OP_LOCKT = 13,
    OP_LOCKU = 14,
    OP_LOOKUP = 15,
    OP_LOOKUPP = 16,
    OP_NVERIFY = 17,
    OP_OPEN = 18,
    OP_OPENATTR = 19,
    OP_OPEN_CONFIRM = 20,
    OP_OPEN_DOWNGRADE = 21,
    OP_PUTFH = 22,
    OP_PUTPUBFH = 23,
    OP_PUTROOTFH = 24,
    OP_READ = 25,
    OP_READDIR = 26,
    OP_READLINK = 27,
    OP_REMOVE = 28,
    OP_RENAME = 29,
    OP_RENEW = 30,
    OP_RESTOREFH = 31,
    OP_SAVEFH = 32,
    OP_SECINFO = 33,
    OP_SETATTR = 34,
    OP_SETCLIENTID = 35,
    OP_SETCLIENTID_CONFIRM = 36,
    OP_VERIFY = 37,
    OP_WRITE = 38,
    OP_RELEASE_LOCKOWNER = 39,
    #[default]
    OP_ILLEGAL = 10044,
}
impl SerializeEnum for nfs_opnum4 {}
impl DeserializeEnum for nfs_opnum4 {}

impl fmt::Display for nfs_opnum4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = format!("{self:?}");
        f.write_str(name.trim_start_matches("OP_"))
    }
}

/// Type of a filesystem object.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_ftype4 {
    /// Regular File
    #[default]
    NF4REG = 1,
    /// Directory
    NF4DIR = 2,
    /// Special File - block device
    NF4BLK = 3,
    /// Special File - character device
    NF4CHR = 4,
    /// Symbolic Link
    NF4LNK = 5,
    /// Special File - socket
    NF4SOCK = 6,
    /// Special File - fifo
    NF4FIFO = 7,
    /// Attribute Directory
    NF4ATTRDIR = 8,
    /// Named Attribute
    NF4NAMEDATTR = 9,
}
impl SerializeEnum for nfs_ftype4 {}
impl DeserializeEnum for nfs_ftype4 {}

/// Opaque server-issued file handle, at most [`NFS4_FHSIZE`] bytes.
///
/// The client never looks inside: handles compare by bytes and are passed
/// back verbatim.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct nfs_fh4(pub Vec<u8>);

impl nfs_fh4 {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for nfs_fh4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fh:")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl Serialize for nfs_fh4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        if self.0.len() > NFS4_FHSIZE {
            return Err(invalid_data("file handle longer than NFS4_FHSIZE"));
        }
        self.0.serialize(dest)
    }
}

impl Deserialize for nfs_fh4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let bytes = deserialize::<Vec<u8>>(src)?;
        if bytes.len() > NFS4_FHSIZE {
            return Err(invalid_data(&format!("file handle of {} bytes", bytes.len())));
        }
        self.0 = bytes;
        Ok(())
    }
}

/// Fixed 8-byte opaque used for client identity, write stability and
/// READDIR continuation.
pub type verifier4 = [u8; NFS4_VERIFIER_SIZE];

/// Attribute bitmap, bit `n` of the attribute set lives in word `n / 32`.
pub type bitmap4 = Vec<u32>;

/// Server-issued handle for open, lock and delegation state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct stateid4 {
    pub seqid: u32,
    pub other: [u8; NFS4_OTHER_SIZE],
}
DeserializeStruct!(stateid4, seqid, other);
SerializeStruct!(stateid4, seqid, other);

impl stateid4 {
    /// The all-zero "anonymous" stateid.
    pub const ANONYMOUS: stateid4 = stateid4 { seqid: 0, other: [0; NFS4_OTHER_SIZE] };
}

/// A set of attributes: the bitmap of what is present followed by the
/// packed values in ascending bit order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct fattr4 {
    pub attrmask: bitmap4,
    pub attr_vals: Vec<u8>,
}
DeserializeStruct!(fattr4, attrmask, attr_vals);
SerializeStruct!(fattr4, attrmask, attr_vals);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct nfstime4 {
    pub seconds: i64,
    pub nseconds: u32,
}
DeserializeStruct!(nfstime4, seconds, nseconds);
SerializeStruct!(nfstime4, seconds, nseconds);

/// Directory change information returned by namespace-modifying operations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct change_info4 {
    pub atomic: bool,
    pub before: u64,
    pub after: u64,
}
DeserializeStruct!(change_info4, atomic, before, after);
SerializeStruct!(change_info4, atomic, before, after);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct specdata4 {
    pub specdata1: u32,
    pub specdata2: u32,
}
DeserializeStruct!(specdata4, specdata1, specdata2);
SerializeStruct!(specdata4, specdata1, specdata2);

/// Universal address of a client or server endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct clientaddr4 {
    pub r_netid: String,
    pub r_addr: String,
}
DeserializeStruct!(clientaddr4, r_netid, r_addr);
SerializeStruct!(clientaddr4, r_netid, r_addr);

/// Callback program a client offers to the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct cb_client4 {
    pub cb_program: u32,
    pub cb_location: clientaddr4,
}
DeserializeStruct!(cb_client4, cb_program, cb_location);
SerializeStruct!(cb_client4, cb_program, cb_location);

/// Long-lived client identity presented to SETCLIENTID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct nfs_client_id4 {
    pub verifier: verifier4,
    pub id: Vec<u8>,
}
DeserializeStruct!(nfs_client_id4, verifier, id);
SerializeStruct!(nfs_client_id4, verifier, id);

/// Owner of open or lock state: the client id plus an opaque owner name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct state_owner4 {
    pub clientid: u64,
    pub owner: Vec<u8>,
}
DeserializeStruct!(state_owner4, clientid, owner);
SerializeStruct!(state_owner4, clientid, owner);

pub type open_owner4 = state_owner4;
pub type lock_owner4 = state_owner4;

/// Access control entry, carried by delegations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct nfsace4 {
    pub acetype: u32,
    pub flag: u32,
    pub access_mask: u32,
    pub who: String,
}
DeserializeStruct!(nfsace4, acetype, flag, access_mask, who);
SerializeStruct!(nfsace4, acetype, flag, access_mask, who);
