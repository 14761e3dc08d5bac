//! Arguments and results of the NFSv4.0 operations this client issues, and the
//! [`nfs_argop4`] / [`nfs_resop4`] unions that carry them inside a COMPOUND.
//!
//! Most results are `status` followed by a body only when the status is
//! `NFS4_OK`; those are modelled as [`OpResult`]. LOCK and SETCLIENTID also
//! carry data on one of their error arms and get dedicated enums.

#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::{
    change_info4, clientaddr4, cb_client4, fattr4, bitmap4, lock_owner4, nfs_client_id4, nfs_fh4,
    nfs_ftype4, nfs_opnum4, nfsace4, nfsstat4, open_owner4, specdata4, stateid4, verifier4,
};
use crate::xdr::{deserialize, invalid_data, Deserialize, DeserializeEnum, Serialize, SerializeEnum};
use crate::{DeserializeStruct, SerializeStruct, XdrUnion};

/// OPEN result flag: the open-owner is new and OPEN_CONFIRM is required.
pub const OPEN4_RESULT_CONFIRM: u32 = 0x0000_0002;
/// OPEN result flag: the server uses POSIX lock semantics.
pub const OPEN4_RESULT_LOCKTYPE_POSIX: u32 = 0x0000_0004;

pub const OPEN4_SHARE_ACCESS_READ: u32 = 0x0000_0001;
pub const OPEN4_SHARE_ACCESS_WRITE: u32 = 0x0000_0002;
pub const OPEN4_SHARE_ACCESS_BOTH: u32 = 0x0000_0003;
pub const OPEN4_SHARE_DENY_NONE: u32 = 0x0000_0000;

/// Result of an operation whose error arms carry no data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpResult<T> {
    Ok(T),
    /// Never `NFS4_OK`.
    Err(nfsstat4),
}

impl<T> Default for OpResult<T> {
    fn default() -> OpResult<T> {
        OpResult::Err(nfsstat4::NFS4ERR_SERVERFAULT)
    }
}

impl<T> OpResult<T> {
    pub fn status(&self) -> nfsstat4 {
        match self {
            OpResult::Ok(_) => nfsstat4::NFS4_OK,
            OpResult::Err(status) => *status,
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            OpResult::Ok(body) => Some(body),
            OpResult::Err(_) => None,
        }
    }
}

impl<T: Serialize> Serialize for OpResult<T> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            OpResult::Ok(body) => {
                nfsstat4::NFS4_OK.serialize(dest)?;
                body.serialize(dest)
            }
            OpResult::Err(nfsstat4::NFS4_OK) => Err(invalid_data("error result with NFS4_OK")),
            OpResult::Err(status) => status.serialize(dest),
        }
    }
}

impl<T: Deserialize + Default> Deserialize for OpResult<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let status = deserialize::<nfsstat4>(src)?;
        *self = if status.is_ok() {
            OpResult::Ok(deserialize::<T>(src)?)
        } else {
            OpResult::Err(status)
        };
        Ok(())
    }
}

// CLOSE

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CLOSE4args {
    pub seqid: u32,
    pub open_stateid: stateid4,
}
DeserializeStruct!(CLOSE4args, seqid, open_stateid);
SerializeStruct!(CLOSE4args, seqid, open_stateid);

pub type CLOSE4res = OpResult<stateid4>;

// COMMIT

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct COMMIT4args {
    pub offset: u64,
    pub count: u32,
}
DeserializeStruct!(COMMIT4args, offset, count);
SerializeStruct!(COMMIT4args, offset, count);

/// The write verifier of the server instance that committed the data.
pub type COMMIT4res = OpResult<verifier4>;

// CREATE

/// Kind of object CREATE makes. Regular files are created by OPEN instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum createtype4 {
    NF4LNK(String),
    NF4BLK(specdata4),
    NF4CHR(specdata4),
    NF4SOCK,
    NF4FIFO,
    NF4DIR,
}
XdrUnion!(
    createtype4,
    NF4LNK(String) = nfs_ftype4::NF4LNK,
    NF4BLK(specdata4) = nfs_ftype4::NF4BLK,
    NF4CHR(specdata4) = nfs_ftype4::NF4CHR,
    NF4SOCK = nfs_ftype4::NF4SOCK,
    NF4FIFO = nfs_ftype4::NF4FIFO,
    NF4DIR = nfs_ftype4::NF4DIR,
);

impl Default for createtype4 {
    fn default() -> createtype4 {
        createtype4::NF4DIR
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CREATE4args {
    pub objtype: createtype4,
    pub objname: String,
    pub createattrs: fattr4,
}
DeserializeStruct!(CREATE4args, objtype, objname, createattrs);
SerializeStruct!(CREATE4args, objtype, objname, createattrs);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CREATE4resok {
    pub cinfo: change_info4,
    pub attrset: bitmap4,
}
DeserializeStruct!(CREATE4resok, cinfo, attrset);
SerializeStruct!(CREATE4resok, cinfo, attrset);

pub type CREATE4res = OpResult<CREATE4resok>;

// DELEGRETURN

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DELEGRETURN4args {
    pub deleg_stateid: stateid4,
}
DeserializeStruct!(DELEGRETURN4args, deleg_stateid);
SerializeStruct!(DELEGRETURN4args, deleg_stateid);

pub type DELEGRETURN4res = OpResult<()>;

// GETATTR

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GETATTR4args {
    pub attr_request: bitmap4,
}
DeserializeStruct!(GETATTR4args, attr_request);
SerializeStruct!(GETATTR4args, attr_request);

pub type GETATTR4res = OpResult<fattr4>;

// GETFH

pub type GETFH4res = OpResult<nfs_fh4>;

// LOCK

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_lock_type4 {
    #[default]
    READ_LT = 1,
    WRITE_LT = 2,
    /// Blocking read
    READW_LT = 3,
    /// Blocking write
    WRITEW_LT = 4,
}
impl SerializeEnum for nfs_lock_type4 {}
impl DeserializeEnum for nfs_lock_type4 {}

/// First lock by a lock-owner: moves the open-owner's sequence forward and
/// starts the lock-owner's own sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct open_to_lock_owner4 {
    pub open_seqid: u32,
    pub open_stateid: stateid4,
    pub lock_seqid: u32,
    pub lock_owner: lock_owner4,
}
DeserializeStruct!(open_to_lock_owner4, open_seqid, open_stateid, lock_seqid, lock_owner);
SerializeStruct!(open_to_lock_owner4, open_seqid, open_stateid, lock_seqid, lock_owner);

/// Subsequent locks by a lock-owner that already holds lock state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct exist_lock_owner4 {
    pub lock_stateid: stateid4,
    pub lock_seqid: u32,
}
DeserializeStruct!(exist_lock_owner4, lock_stateid, lock_seqid);
SerializeStruct!(exist_lock_owner4, lock_stateid, lock_seqid);

/// Switched on `bool new_lock_owner`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum locker4 {
    NEW(open_to_lock_owner4),
    EXISTING(exist_lock_owner4),
}
XdrUnion!(locker4, NEW(open_to_lock_owner4) = 1, EXISTING(exist_lock_owner4) = 0);

impl Default for locker4 {
    fn default() -> locker4 {
        locker4::EXISTING(exist_lock_owner4::default())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LOCK4args {
    pub locktype: nfs_lock_type4,
    pub reclaim: bool,
    pub offset: u64,
    pub length: u64,
    pub locker: locker4,
}
DeserializeStruct!(LOCK4args, locktype, reclaim, offset, length, locker);
SerializeStruct!(LOCK4args, locktype, reclaim, offset, length, locker);

/// The conflicting lock that caused NFS4ERR_DENIED.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LOCK4denied {
    pub offset: u64,
    pub length: u64,
    pub locktype: nfs_lock_type4,
    pub owner: lock_owner4,
}
DeserializeStruct!(LOCK4denied, offset, length, locktype, owner);
SerializeStruct!(LOCK4denied, offset, length, locktype, owner);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LOCK4res {
    Ok(stateid4),
    Denied(LOCK4denied),
    /// Any other failure. Never `NFS4_OK` or `NFS4ERR_DENIED`.
    Err(nfsstat4),
}

impl Default for LOCK4res {
    fn default() -> LOCK4res {
        LOCK4res::Err(nfsstat4::NFS4ERR_SERVERFAULT)
    }
}

impl LOCK4res {
    pub fn status(&self) -> nfsstat4 {
        match self {
            LOCK4res::Ok(_) => nfsstat4::NFS4_OK,
            LOCK4res::Denied(_) => nfsstat4::NFS4ERR_DENIED,
            LOCK4res::Err(status) => *status,
        }
    }
}

impl Serialize for LOCK4res {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            LOCK4res::Ok(stateid) => {
                nfsstat4::NFS4_OK.serialize(dest)?;
                stateid.serialize(dest)
            }
            LOCK4res::Denied(denied) => {
                nfsstat4::NFS4ERR_DENIED.serialize(dest)?;
                denied.serialize(dest)
            }
            LOCK4res::Err(nfsstat4::NFS4_OK | nfsstat4::NFS4ERR_DENIED) => {
                Err(invalid_data("LOCK error arm with a status that carries data"))
            }
            LOCK4res::Err(status) => status.serialize(dest),
        }
    }
}

impl Deserialize for LOCK4res {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<nfsstat4>(src)? {
            nfsstat4::NFS4_OK => LOCK4res::Ok(deserialize(src)?),
            nfsstat4::NFS4ERR_DENIED => LOCK4res::Denied(deserialize(src)?),
            status => LOCK4res::Err(status),
        };
        Ok(())
    }
}

// LOCKU

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LOCKU4args {
    pub locktype: nfs_lock_type4,
    pub seqid: u32,
    pub lock_stateid: stateid4,
    pub offset: u64,
    pub length: u64,
}
DeserializeStruct!(LOCKU4args, locktype, seqid, lock_stateid, offset, length);
SerializeStruct!(LOCKU4args, locktype, seqid, lock_stateid, offset, length);

pub type LOCKU4res = OpResult<stateid4>;

// LOOKUP

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LOOKUP4args {
    pub objname: String,
}
DeserializeStruct!(LOOKUP4args, objname);
SerializeStruct!(LOOKUP4args, objname);

pub type LOOKUP4res = OpResult<()>;

// OPEN

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum createhow4 {
    /// Create or truncate, applying the attributes either way.
    UNCHECKED4(fattr4),
    /// Fail with NFS4ERR_EXIST if the file exists.
    GUARDED4(fattr4),
    EXCLUSIVE4(verifier4),
}
XdrUnion!(createhow4, UNCHECKED4(fattr4) = 0, GUARDED4(fattr4) = 1, EXCLUSIVE4(verifier4) = 2);

impl Default for createhow4 {
    fn default() -> createhow4 {
        createhow4::UNCHECKED4(fattr4::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum openflag4 {
    OPEN4_NOCREATE,
    OPEN4_CREATE(createhow4),
}
XdrUnion!(openflag4, OPEN4_NOCREATE = 0, OPEN4_CREATE(createhow4) = 1);

impl Default for openflag4 {
    fn default() -> openflag4 {
        openflag4::OPEN4_NOCREATE
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum open_delegation_type4 {
    #[default]
    OPEN_DELEGATE_NONE = 0,
    OPEN_DELEGATE_READ = 1,
    OPEN_DELEGATE_WRITE = 2,
}
impl SerializeEnum for open_delegation_type4 {}
impl DeserializeEnum for open_delegation_type4 {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct open_claim_delegate_cur4 {
    pub delegate_stateid: stateid4,
    pub file: String,
}
DeserializeStruct!(open_claim_delegate_cur4, delegate_stateid, file);
SerializeStruct!(open_claim_delegate_cur4, delegate_stateid, file);

/// What OPEN names: a file in the current directory, or state being
/// reclaimed after a server restart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum open_claim4 {
    CLAIM_NULL(String),
    CLAIM_PREVIOUS(open_delegation_type4),
    CLAIM_DELEGATE_CUR(open_claim_delegate_cur4),
    CLAIM_DELEGATE_PREV(String),
}
XdrUnion!(
    open_claim4,
    CLAIM_NULL(String) = 0,
    CLAIM_PREVIOUS(open_delegation_type4) = 1,
    CLAIM_DELEGATE_CUR(open_claim_delegate_cur4) = 2,
    CLAIM_DELEGATE_PREV(String) = 3,
);

impl Default for open_claim4 {
    fn default() -> open_claim4 {
        open_claim4::CLAIM_NULL(String::new())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OPEN4args {
    pub seqid: u32,
    pub share_access: u32,
    pub share_deny: u32,
    pub owner: open_owner4,
    pub openhow: openflag4,
    pub claim: open_claim4,
}
DeserializeStruct!(OPEN4args, seqid, share_access, share_deny, owner, openhow, claim);
SerializeStruct!(OPEN4args, seqid, share_access, share_deny, owner, openhow, claim);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct nfs_modified_limit4 {
    pub num_blocks: u32,
    pub bytes_per_block: u32,
}
DeserializeStruct!(nfs_modified_limit4, num_blocks, bytes_per_block);
SerializeStruct!(nfs_modified_limit4, num_blocks, bytes_per_block);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum nfs_space_limit4 {
    NFS_LIMIT_SIZE(u64),
    NFS_LIMIT_BLOCKS(nfs_modified_limit4),
}
XdrUnion!(nfs_space_limit4, NFS_LIMIT_SIZE(u64) = 1, NFS_LIMIT_BLOCKS(nfs_modified_limit4) = 2);

impl Default for nfs_space_limit4 {
    fn default() -> nfs_space_limit4 {
        nfs_space_limit4::NFS_LIMIT_SIZE(0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct open_read_delegation4 {
    pub stateid: stateid4,
    pub recall: bool,
    pub permissions: nfsace4,
}
DeserializeStruct!(open_read_delegation4, stateid, recall, permissions);
SerializeStruct!(open_read_delegation4, stateid, recall, permissions);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct open_write_delegation4 {
    pub stateid: stateid4,
    pub recall: bool,
    pub space_limit: nfs_space_limit4,
    pub permissions: nfsace4,
}
DeserializeStruct!(open_write_delegation4, stateid, recall, space_limit, permissions);
SerializeStruct!(open_write_delegation4, stateid, recall, space_limit, permissions);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum open_delegation4 {
    OPEN_DELEGATE_NONE,
    OPEN_DELEGATE_READ(open_read_delegation4),
    OPEN_DELEGATE_WRITE(open_write_delegation4),
}
XdrUnion!(
    open_delegation4,
    OPEN_DELEGATE_NONE = 0,
    OPEN_DELEGATE_READ(open_read_delegation4) = 1,
    OPEN_DELEGATE_WRITE(open_write_delegation4) = 2,
);

impl Default for open_delegation4 {
    fn default() -> open_delegation4 {
        open_delegation4::OPEN_DELEGATE_NONE
    }
}

impl open_delegation4 {
    /// Stateid of the granted delegation, if any.
    pub fn stateid(&self) -> Option<stateid4> {
        match self {
            open_delegation4::OPEN_DELEGATE_NONE => None,
            open_delegation4::OPEN_DELEGATE_READ(d) => Some(d.stateid),
            open_delegation4::OPEN_DELEGATE_WRITE(d) => Some(d.stateid),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OPEN4resok {
    pub stateid: stateid4,
    pub cinfo: change_info4,
    pub rflags: u32,
    pub attrset: bitmap4,
    pub delegation: open_delegation4,
}
DeserializeStruct!(OPEN4resok, stateid, cinfo, rflags, attrset, delegation);
SerializeStruct!(OPEN4resok, stateid, cinfo, rflags, attrset, delegation);

pub type OPEN4res = OpResult<OPEN4resok>;

// OPEN_CONFIRM

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OPEN_CONFIRM4args {
    pub open_stateid: stateid4,
    pub seqid: u32,
}
DeserializeStruct!(OPEN_CONFIRM4args, open_stateid, seqid);
SerializeStruct!(OPEN_CONFIRM4args, open_stateid, seqid);

pub type OPEN_CONFIRM4res = OpResult<stateid4>;

// PUTFH, PUTROOTFH, SAVEFH, RESTOREFH

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PUTFH4args {
    pub object: nfs_fh4,
}
DeserializeStruct!(PUTFH4args, object);
SerializeStruct!(PUTFH4args, object);

pub type PUTFH4res = OpResult<()>;
pub type PUTROOTFH4res = OpResult<()>;
pub type SAVEFH4res = OpResult<()>;
pub type RESTOREFH4res = OpResult<()>;

// READ

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READ4args {
    pub stateid: stateid4,
    pub offset: u64,
    pub count: u32,
}
DeserializeStruct!(READ4args, stateid, offset, count);
SerializeStruct!(READ4args, stateid, offset, count);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READ4resok {
    pub eof: bool,
    pub data: Vec<u8>,
}
DeserializeStruct!(READ4resok, eof, data);
SerializeStruct!(READ4resok, eof, data);

pub type READ4res = OpResult<READ4resok>;

// READDIR

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READDIR4args {
    pub cookie: u64,
    pub cookieverf: verifier4,
    pub dircount: u32,
    pub maxcount: u32,
    pub attr_request: bitmap4,
}
DeserializeStruct!(READDIR4args, cookie, cookieverf, dircount, maxcount, attr_request);
SerializeStruct!(READDIR4args, cookie, cookieverf, dircount, maxcount, attr_request);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct entry4 {
    pub cookie: u64,
    pub name: String,
    pub attrs: fattr4,
}
DeserializeStruct!(entry4, cookie, name, attrs);
SerializeStruct!(entry4, cookie, name, attrs);

/// One page of directory entries.
///
/// On the wire the entries form a linked list: each entry is preceded by a
/// `TRUE` "value follows" marker and the list ends with `FALSE`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct dirlist4 {
    pub entries: Vec<entry4>,
    pub eof: bool,
}

impl Serialize for dirlist4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        for entry in &self.entries {
            true.serialize(dest)?;
            entry.serialize(dest)?;
        }
        false.serialize(dest)?;
        self.eof.serialize(dest)
    }
}

impl Deserialize for dirlist4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.entries.clear();
        while deserialize::<bool>(src)? {
            self.entries.push(deserialize::<entry4>(src)?);
        }
        self.eof = deserialize::<bool>(src)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READDIR4resok {
    pub cookieverf: verifier4,
    pub reply: dirlist4,
}
DeserializeStruct!(READDIR4resok, cookieverf, reply);
SerializeStruct!(READDIR4resok, cookieverf, reply);

pub type READDIR4res = OpResult<READDIR4resok>;

// REMOVE

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct REMOVE4args {
    pub target: String,
}
DeserializeStruct!(REMOVE4args, target);
SerializeStruct!(REMOVE4args, target);

pub type REMOVE4res = OpResult<change_info4>;

// RENAME

/// Source directory is the saved filehandle, target directory the current one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RENAME4args {
    pub oldname: String,
    pub newname: String,
}
DeserializeStruct!(RENAME4args, oldname, newname);
SerializeStruct!(RENAME4args, oldname, newname);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RENAME4resok {
    pub source_cinfo: change_info4,
    pub target_cinfo: change_info4,
}
DeserializeStruct!(RENAME4resok, source_cinfo, target_cinfo);
SerializeStruct!(RENAME4resok, source_cinfo, target_cinfo);

pub type RENAME4res = OpResult<RENAME4resok>;

// RENEW

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RENEW4args {
    pub clientid: u64,
}
DeserializeStruct!(RENEW4args, clientid);
SerializeStruct!(RENEW4args, clientid);

pub type RENEW4res = OpResult<()>;

// SETCLIENTID

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETCLIENTID4args {
    pub client: nfs_client_id4,
    pub callback: cb_client4,
    pub callback_ident: u32,
}
DeserializeStruct!(SETCLIENTID4args, client, callback, callback_ident);
SerializeStruct!(SETCLIENTID4args, client, callback, callback_ident);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETCLIENTID4resok {
    pub clientid: u64,
    pub setclientid_confirm: verifier4,
}
DeserializeStruct!(SETCLIENTID4resok, clientid, setclientid_confirm);
SerializeStruct!(SETCLIENTID4resok, clientid, setclientid_confirm);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SETCLIENTID4res {
    Ok(SETCLIENTID4resok),
    /// Another client holds the id; carries that client's callback address.
    ClidInUse(clientaddr4),
    /// Never `NFS4_OK` or `NFS4ERR_CLID_INUSE`.
    Err(nfsstat4),
}

impl Default for SETCLIENTID4res {
    fn default() -> SETCLIENTID4res {
        SETCLIENTID4res::Err(nfsstat4::NFS4ERR_SERVERFAULT)
    }
}

impl SETCLIENTID4res {
    pub fn status(&self) -> nfsstat4 {
        match self {
            SETCLIENTID4res::Ok(_) => nfsstat4::NFS4_OK,
            SETCLIENTID4res::ClidInUse(_) => nfsstat4::NFS4ERR_CLID_INUSE,
            SETCLIENTID4res::Err(status) => *status,
        }
    }
}

impl Serialize for SETCLIENTID4res {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            SETCLIENTID4res::Ok(resok) => {
                nfsstat4::NFS4_OK.serialize(dest)?;
                resok.serialize(dest)
            }
            SETCLIENTID4res::ClidInUse(addr) => {
                nfsstat4::NFS4ERR_CLID_INUSE.serialize(dest)?;
                addr.serialize(dest)
            }
            SETCLIENTID4res::Err(nfsstat4::NFS4_OK | nfsstat4::NFS4ERR_CLID_INUSE) => Err(
                invalid_data("SETCLIENTID error arm with a status that carries data"),
            ),
            SETCLIENTID4res::Err(status) => status.serialize(dest),
        }
    }
}

impl Deserialize for SETCLIENTID4res {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<nfsstat4>(src)? {
            nfsstat4::NFS4_OK => SETCLIENTID4res::Ok(deserialize(src)?),
            nfsstat4::NFS4ERR_CLID_INUSE => SETCLIENTID4res::ClidInUse(deserialize(src)?),
            status => SETCLIENTID4res::Err(status),
        };
        Ok(())
    }
}

// SETCLIENTID_CONFIRM

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETCLIENTID_CONFIRM4args {
    pub clientid: u64,
    pub setclientid_confirm: verifier4,
}
DeserializeStruct!(SETCLIENTID_CONFIRM4args, clientid, setclientid_confirm);
SerializeStruct!(SETCLIENTID_CONFIRM4args, clientid, setclientid_confirm);

pub type SETCLIENTID_CONFIRM4res = OpResult<()>;

// WRITE

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum stable_how4 {
    #[default]
    UNSTABLE4 = 0,
    DATA_SYNC4 = 1,
    FILE_SYNC4 = 2,
}
impl SerializeEnum for stable_how4 {}
impl DeserializeEnum for stable_how4 {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WRITE4args {
    pub stateid: stateid4,
    pub offset: u64,
    pub stable: stable_how4,
    pub data: Vec<u8>,
}
DeserializeStruct!(WRITE4args, stateid, offset, stable, data);
SerializeStruct!(WRITE4args, stateid, offset, stable, data);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WRITE4resok {
    pub count: u32,
    pub committed: stable_how4,
    pub writeverf: verifier4,
}
DeserializeStruct!(WRITE4resok, count, committed, writeverf);
SerializeStruct!(WRITE4resok, count, committed, writeverf);

pub type WRITE4res = OpResult<WRITE4resok>;

// ILLEGAL

/// Always fails with NFS4ERR_OP_ILLEGAL.
pub type ILLEGAL4res = OpResult<()>;

/// One operation inside a COMPOUND request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum nfs_argop4 {
    CLOSE(CLOSE4args),
    COMMIT(COMMIT4args),
    CREATE(CREATE4args),
    DELEGRETURN(DELEGRETURN4args),
    GETATTR(GETATTR4args),
    GETFH,
    LOCK(LOCK4args),
    LOCKU(LOCKU4args),
    LOOKUP(LOOKUP4args),
    OPEN(OPEN4args),
    OPEN_CONFIRM(OPEN_CONFIRM4args),
    PUTFH(PUTFH4args),
    PUTROOTFH,
    READ(READ4args),
    READDIR(READDIR4args),
    REMOVE(REMOVE4args),
    RENAME(RENAME4args),
    RENEW(RENEW4args),
    RESTOREFH,
    SAVEFH,
    SETCLIENTID(SETCLIENTID4args),
    SETCLIENTID_CONFIRM(SETCLIENTID_CONFIRM4args),
    WRITE(WRITE4args),
    ILLEGAL,
}
XdrUnion!(
    nfs_argop4,
    CLOSE(CLOSE4args) = nfs_opnum4::OP_CLOSE,
    COMMIT(COMMIT4args) = nfs_opnum4::OP_COMMIT,
    CREATE(CREATE4args) = nfs_opnum4::OP_CREATE,
    DELEGRETURN(DELEGRETURN4args) = nfs_opnum4::OP_DELEGRETURN,
    GETATTR(GETATTR4args) = nfs_opnum4::OP_GETATTR,
    GETFH = nfs_opnum4::OP_GETFH,
    LOCK(LOCK4args) = nfs_opnum4::OP_LOCK,
    LOCKU(LOCKU4args) = nfs_opnum4::OP_LOCKU,
    LOOKUP(LOOKUP4args) = nfs_opnum4::OP_LOOKUP,
    OPEN(OPEN4args) = nfs_opnum4::OP_OPEN,
    OPEN_CONFIRM(OPEN_CONFIRM4args) = nfs_opnum4::OP_OPEN_CONFIRM,
    PUTFH(PUTFH4args) = nfs_opnum4::OP_PUTFH,
    PUTROOTFH = nfs_opnum4::OP_PUTROOTFH,
    READ(READ4args) = nfs_opnum4::OP_READ,
    READDIR(READDIR4args) = nfs_opnum4::OP_READDIR,
    REMOVE(REMOVE4args) = nfs_opnum4::OP_REMOVE,
    RENAME(RENAME4args) = nfs_opnum4::OP_RENAME,
    RENEW(RENEW4args) = nfs_opnum4::OP_RENEW,
    RESTOREFH = nfs_opnum4::OP_RESTOREFH,
    SAVEFH = nfs_opnum4::OP_SAVEFH,
    SETCLIENTID(SETCLIENTID4args) = nfs_opnum4::OP_SETCLIENTID,
    SETCLIENTID_CONFIRM(SETCLIENTID_CONFIRM4args) = nfs_opnum4::OP_SETCLIENTID_CONFIRM,
    WRITE(WRITE4args) = nfs_opnum4::OP_WRITE,
    ILLEGAL = nfs_opnum4::OP_ILLEGAL,
);

impl Default for nfs_argop4 {
    fn default() -> nfs_argop4 {
        nfs_argop4::ILLEGAL
    }
}

impl nfs_argop4 {
    pub fn opnum(&self) -> nfs_opnum4 {
        match self {
            nfs_argop4::CLOSE(_) => nfs_opnum4::OP_CLOSE,
            nfs_argop4::COMMIT(_) => nfs_opnum4::OP_COMMIT,
            nfs_argop4::CREATE(_) => nfs_opnum4::OP_CREATE,
            nfs_argop4::DELEGRETURN(_) => nfs_opnum4::OP_DELEGRETURN,
            nfs_argop4::GETATTR(_) => nfs_opnum4::OP_GETATTR,
            nfs_argop4::GETFH => nfs_opnum4::OP_GETFH,
            nfs_argop4::LOCK(_) => nfs_opnum4::OP_LOCK,
            nfs_argop4::LOCKU(_) => nfs_opnum4::OP_LOCKU,
            nfs_argop4::LOOKUP(_) => nfs_opnum4::OP_LOOKUP,
            nfs_argop4::OPEN(_) => nfs_opnum4::OP_OPEN,
            nfs_argop4::OPEN_CONFIRM(_) => nfs_opnum4::OP_OPEN_CONFIRM,
            nfs_argop4::PUTFH(_) => nfs_opnum4::OP_PUTFH,
            nfs_argop4::PUTROOTFH => nfs_opnum4::OP_PUTROOTFH,
            nfs_argop4::READ(_) => nfs_opnum4::OP_READ,
            nfs_argop4::READDIR(_) => nfs_opnum4::OP_READDIR,
            nfs_argop4::REMOVE(_) => nfs_opnum4::OP_REMOVE,
            nfs_argop4::RENAME(_) => nfs_opnum4::OP_RENAME,
            nfs_argop4::RENEW(_) => nfs_opnum4::OP_RENEW,
            nfs_argop4::RESTOREFH => nfs_opnum4::OP_RESTOREFH,
            nfs_argop4::SAVEFH => nfs_opnum4::OP_SAVEFH,
            nfs_argop4::SETCLIENTID(_) => nfs_opnum4::OP_SETCLIENTID,
            nfs_argop4::SETCLIENTID_CONFIRM(_) => nfs_opnum4::OP_SETCLIENTID_CONFIRM,
            nfs_argop4::WRITE(_) => nfs_opnum4::OP_WRITE,
            nfs_argop4::ILLEGAL => nfs_opnum4::OP_ILLEGAL,
        }
    }
}

/// One operation result inside a COMPOUND reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum nfs_resop4 {
    CLOSE(CLOSE4res),
    COMMIT(COMMIT4res),
    CREATE(CREATE4res),
    DELEGRETURN(DELEGRETURN4res),
    GETATTR(GETATTR4res),
    GETFH(GETFH4res),
    LOCK(LOCK4res),
    LOCKU(LOCKU4res),
    LOOKUP(LOOKUP4res),
    OPEN(OPEN4res),
    OPEN_CONFIRM(OPEN_CONFIRM4res),
    PUTFH(PUTFH4res),
    PUTROOTFH(PUTROOTFH4res),
    READ(READ4res),
    READDIR(READDIR4res),
    REMOVE(REMOVE4res),
    RENAME(RENAME4res),
    RENEW(RENEW4res),
    RESTOREFH(RESTOREFH4res),
    SAVEFH(SAVEFH4res),
    SETCLIENTID(SETCLIENTID4res),
    SETCLIENTID_CONFIRM(SETCLIENTID_CONFIRM4res),
    WRITE(WRITE4res),
    ILLEGAL(ILLEGAL4res),
}
XdrUnion!(
    nfs_resop4,
    CLOSE(CLOSE4res) = nfs_opnum4::OP_CLOSE,
    COMMIT(COMMIT4res) = nfs_opnum4::OP_COMMIT,
    CREATE(CREATE4res) = nfs_opnum4::OP_CREATE,
    DELEGRETURN(DELEGRETURN4res) = nfs_opnum4::OP_DELEGRETURN,
    GETATTR(GETATTR4res) = nfs_opnum4::OP_GETATTR,
    GETFH(GETFH4res) = nfs_opnum4::OP_GETFH,
    LOCK(LOCK4res) = nfs_opnum4::OP_LOCK,
    LOCKU(LOCKU4res) = nfs_opnum4::OP_LOCKU,
    LOOKUP(LOOKUP4res) = nfs_opnum4::OP_LOOKUP,
    OPEN(OPEN4res) = nfs_opnum4::OP_OPEN,
    OPEN_CONFIRM(OPEN_CONFIRM4res) = nfs_opnum4::OP_OPEN_CONFIRM,
    PUTFH(PUTFH4res) = nfs_opnum4::OP_PUTFH,
    PUTROOTFH(PUTROOTFH4res) = nfs_opnum4::OP_PUTROOTFH,
    READ(READ4res) = nfs_opnum4::OP_READ,
    READDIR(READDIR4res) = nfs_opnum4::OP_READDIR,
    REMOVE(REMOVE4res) = nfs_opnum4::OP_REMOVE,
    RENAME(RENAME4res) = nfs_opnum4::OP_RENAME,
    RENEW(RENEW4res) = nfs_opnum4::OP_RENEW,
    RESTOREFH(RESTOREFH4res) = nfs_opnum4::OP_RESTOREFH,
    SAVEFH(SAVEFH4res) = nfs_opnum4::OP_SAVEFH,
    SETCLIENTID(SETCLIENTID4res) = nfs_opnum4::OP_SETCLIENTID,
    SETCLIENTID_CONFIRM(SETCLIENTID_CONFIRM4res) = nfs_opnum4::OP_SETCLIENTID_CONFIRM,
    WRITE(WRITE4res) = nfs_opnum4::OP_WRITE,
    ILLEGAL(ILLEGAL4res) = nfs_opnum4::OP_ILLEGAL,
);

impl Default for nfs_resop4 {
    fn default() -> nfs_resop4 {
        nfs_resop4::ILLEGAL(OpResult::Err(nfsstat4::NFS4ERR_OP_ILLEGAL))
    }
}

/// Generates `opnum`, `status` and the typed `into_*` accessors over every
/// [`nfs_resop4`] arm that is a plain [`OpResult`].
macro_rules! resop_accessors {
    ($($variant:ident => $opnum:ident, $into:ident -> $body:ty;)*) => {
        impl nfs_resop4 {
            pub fn opnum(&self) -> nfs_opnum4 {
                match self {
                    $(nfs_resop4::$variant(_) => nfs_opnum4::$opnum,)*
                    nfs_resop4::LOCK(_) => nfs_opnum4::OP_LOCK,
                    nfs_resop4::SETCLIENTID(_) => nfs_opnum4::OP_SETCLIENTID,
                }
            }

            pub fn status(&self) -> nfsstat4 {
                match self {
                    $(nfs_resop4::$variant(res) => res.status(),)*
                    nfs_resop4::LOCK(res) => res.status(),
                    nfs_resop4::SETCLIENTID(res) => res.status(),
                }
            }

            $(
                /// Success body of this result, `None` for another arm or a failure.
                pub fn $into(self) -> Option<$body> {
                    match self {
                        nfs_resop4::$variant(res) => res.ok(),
                        _ => None,
                    }
                }
            )*

            pub fn into_lock(self) -> Option<stateid4> {
                match self {
                    nfs_resop4::LOCK(LOCK4res::Ok(stateid)) => Some(stateid),
                    _ => None,
                }
            }

            pub fn into_setclientid(self) -> Option<SETCLIENTID4resok> {
                match self {
                    nfs_resop4::SETCLIENTID(SETCLIENTID4res::Ok(resok)) => Some(resok),
                    _ => None,
                }
            }
        }
    };
}

resop_accessors! {
    CLOSE => OP_CLOSE, into_close -> stateid4;
    COMMIT => OP_COMMIT, into_commit -> verifier4;
    CREATE => OP_CREATE, into_create -> CREATE4resok;
    DELEGRETURN => OP_DELEGRETURN, into_delegreturn -> ();
    GETATTR => OP_GETATTR, into_getattr -> fattr4;
    GETFH => OP_GETFH, into_getfh -> nfs_fh4;
    LOCKU => OP_LOCKU, into_locku -> stateid4;
    LOOKUP => OP_LOOKUP, into_lookup -> ();
    OPEN => OP_OPEN, into_open -> OPEN4resok;
    OPEN_CONFIRM => OP_OPEN_CONFIRM, into_open_confirm -> stateid4;
    PUTFH => OP_PUTFH, into_putfh -> ();
    PUTROOTFH => OP_PUTROOTFH, into_putrootfh -> ();
    READ => OP_READ, into_read -> READ4resok;
    READDIR => OP_READDIR, into_readdir -> READDIR4resok;
    REMOVE => OP_REMOVE, into_remove -> change_info4;
    RENAME => OP_RENAME, into_rename -> RENAME4resok;
    RENEW => OP_RENEW, into_renew -> ();
    RESTOREFH => OP_RESTOREFH, into_restorefh -> ();
    SAVEFH => OP_SAVEFH, into_savefh -> ();
    SETCLIENTID_CONFIRM => OP_SETCLIENTID_CONFIRM, into_setclientid_confirm -> ();
    WRITE => OP_WRITE, into_write -> WRITE4resok;
    ILLEGAL => OP_ILLEGAL, into_illegal -> ();
}

/// COMPOUND procedure arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct COMPOUND4args {
    pub tag: String,
    pub minorversion: u32,
    pub argarray: Vec<nfs_argop4>,
}
DeserializeStruct!(COMPOUND4args, tag, minorversion, argarray);
SerializeStruct!(COMPOUND4args, tag, minorversion, argarray);

/// COMPOUND procedure results. `status` is the status of the last
/// result in `resarray`, or `NFS4_OK` when every operation succeeded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct COMPOUND4res {
    pub status: nfsstat4,
    pub tag: String,
    pub resarray: Vec<nfs_resop4>,
}
DeserializeStruct!(COMPOUND4res, status, tag, resarray);
SerializeStruct!(COMPOUND4res, status, tag, resarray);
