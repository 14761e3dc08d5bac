//! In-memory NFSv4.0 server for the integration tests.
//!
//! Speaks the real wire format (record marking, RPC, COMPOUND) over a
//! `tokio::io::duplex` pipe, keeps a small tree of files and directories and
//! enforces the parts of the state protocol the client relies on: confirmed
//! client ids, per-owner seqids, OPEN_CONFIRM for new owners, byte-range
//! lock conflicts. Knobs in [`ServerOptions`] inject the failures the tests
//! need.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{duplex, DuplexStream};

use nfs4_client::protocol::rpc::{read_record, write_fragment};
use nfs4_client::xdr::nfs4::attr::{self, Fattr, FATTR4_MODE};
use nfs4_client::xdr::nfs4::ops::*;
use nfs4_client::xdr::nfs4::*;
use nfs4_client::xdr::rpc::{
    accept_body, accepted_reply, auth_stat, make_success_reply, opaque_auth, rejected_reply,
    reply_body, rpc_body, rpc_msg,
};
use nfs4_client::xdr::{deserialize, Serialize};
use nfs4_client::{ClientConfig, Context, NfsClient};

pub const ROOT_ID: u64 = 1;
pub const WRITE_VERIFIER: verifier4 = *b"wverf001";
pub const COOKIE_VERIFIER: verifier4 = *b"cookie01";

#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub lease_time: u32,
    pub maxread: u64,
    pub maxwrite: u64,
    /// READ never returns more than this many bytes.
    pub read_cap: usize,
    /// Entries per READDIR reply.
    pub readdir_page: usize,
    /// Return "." and ".." at the start of every listing.
    pub dot_entries: bool,
    /// Start every READDIR page after the first with the previous page's last entry.
    pub repeat_page_boundary: bool,
    /// Grant a read delegation on every read-only OPEN.
    pub read_delegations: bool,
    /// Accept one byte less than sent on every WRITE.
    pub short_writes: bool,
    /// Verifier COMMIT returns instead of [`WRITE_VERIFIER`].
    pub commit_verifier: Option<verifier4>,
    /// Fail this many READ/WRITE operations with NFS4ERR_EXPIRED, dropping the open.
    pub expire_next_io: usize,
    /// Read requests but never answer them.
    pub stall: bool,
    /// Send a reply with a foreign xid before the next real reply.
    pub stale_reply_first: bool,
    /// Deny every call with AUTH_ERROR.
    pub reject_auth: bool,
}

impl Default for ServerOptions {
    fn default() -> ServerOptions {
        ServerOptions {
            lease_time: 90,
            maxread: 1024 * 1024,
            maxwrite: 1024 * 1024,
            read_cap: usize::MAX,
            readdir_page: 128,
            dot_entries: false,
            repeat_page_boundary: false,
            read_delegations: false,
            short_writes: false,
            commit_verifier: None,
            expire_next_io: 0,
            stall: false,
            stale_reply_first: false,
            reject_auth: false,
        }
    }
}

/// Operation counters.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub compounds: usize,
    pub setclientids: usize,
    pub lookups: usize,
    pub creates: usize,
    pub removes: usize,
    pub opens: usize,
    pub open_confirms: usize,
    pub closes: usize,
    pub delegreturns: usize,
    pub reads: usize,
    pub writes: usize,
    pub commits: usize,
    pub readdirs: usize,
    pub renames: usize,
    pub renews: usize,
}

enum Content {
    File(Vec<u8>),
    Dir(BTreeMap<String, u64>),
}

struct Node {
    content: Content,
    mode: u32,
    change: u64,
    mtime: nfstime4,
}

type OwnerKey = (u64, Vec<u8>);

struct OpenEntry {
    fileid: u64,
    owner: OwnerKey,
    seqid: u32,
    confirmed: bool,
}

struct LockEntry {
    owner: OwnerKey,
    seqid: u32,
}

struct Range {
    fileid: u64,
    owner: OwnerKey,
    offset: u64,
    length: u64,
    write: bool,
}

impl Range {
    fn overlaps(&self, offset: u64, length: u64) -> bool {
        let end = |o: u64, l: u64| if l == u64::MAX { u64::MAX } else { o.saturating_add(l) };
        self.offset < end(offset, length) && offset < end(self.offset, self.length)
    }
}

pub struct ServerState {
    pub options: ServerOptions,
    pub stats: Stats,
    nodes: HashMap<u64, Node>,
    next_id: u64,
    clients: HashMap<u64, (verifier4, bool)>,
    next_clientid: u64,
    open_owners: HashMap<OwnerKey, u32>,
    lock_owners: HashMap<OwnerKey, u32>,
    opens: HashMap<[u8; 12], OpenEntry>,
    lock_states: HashMap<[u8; 12], LockEntry>,
    ranges: Vec<Range>,
    delegations: HashMap<[u8; 12], u64>,
    next_other: u64,
    change: u64,
}

fn now() -> nfstime4 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    nfstime4 { seconds: now.as_secs() as i64, nseconds: now.subsec_nanos() }
}

/// Keeps only the attributes whose bits are set in `mask`.
fn restrict(attrs: &Fattr, mask: &[u32]) -> Fattr {
    let wanted = |bit: u32| attr::bits(mask).any(|b| b == bit);
    Fattr {
        file_type: attrs.file_type.filter(|_| wanted(attr::FATTR4_TYPE)),
        change: attrs.change.filter(|_| wanted(attr::FATTR4_CHANGE)),
        size: attrs.size.filter(|_| wanted(attr::FATTR4_SIZE)),
        lease_time: attrs.lease_time.filter(|_| wanted(attr::FATTR4_LEASE_TIME)),
        fileid: attrs.fileid.filter(|_| wanted(attr::FATTR4_FILEID)),
        maxread: attrs.maxread.filter(|_| wanted(attr::FATTR4_MAXREAD)),
        maxwrite: attrs.maxwrite.filter(|_| wanted(attr::FATTR4_MAXWRITE)),
        mode: attrs.mode.filter(|_| wanted(FATTR4_MODE)),
        numlinks: attrs.numlinks.filter(|_| wanted(attr::FATTR4_NUMLINKS)),
        owner: attrs.owner.clone().filter(|_| wanted(attr::FATTR4_OWNER)),
        owner_group: attrs.owner_group.clone().filter(|_| wanted(attr::FATTR4_OWNER_GROUP)),
        time_access: attrs.time_access.filter(|_| wanted(attr::FATTR4_TIME_ACCESS)),
        time_metadata: attrs.time_metadata.filter(|_| wanted(attr::FATTR4_TIME_METADATA)),
        time_modify: attrs.time_modify.filter(|_| wanted(attr::FATTR4_TIME_MODIFY)),
    }
}

fn fh_of(id: u64) -> nfs_fh4 {
    nfs_fh4(id.to_be_bytes().to_vec())
}

fn wrap<T>(res: Result<T, nfsstat4>) -> OpResult<T> {
    match res {
        Ok(body) => OpResult::Ok(body),
        Err(status) => OpResult::Err(status),
    }
}

/// Checks `seqid` against the owner's last one. Unknown owners accept any.
fn advance(
    owners: &mut HashMap<OwnerKey, u32>,
    key: &OwnerKey,
    seqid: u32,
) -> Result<(), nfsstat4> {
    match owners.get(key) {
        Some(last) if last.wrapping_add(1) != seqid => Err(nfsstat4::NFS4ERR_BAD_SEQID),
        _ => {
            owners.insert(key.clone(), seqid);
            Ok(())
        }
    }
}

impl ServerState {
    fn new(options: ServerOptions) -> ServerState {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID,
            Node { content: Content::Dir(BTreeMap::new()), mode: 0o755, change: 1, mtime: now() },
        );
        ServerState {
            options,
            stats: Stats::default(),
            nodes,
            next_id: ROOT_ID + 1,
            clients: HashMap::new(),
            next_clientid: 0x1000,
            open_owners: HashMap::new(),
            lock_owners: HashMap::new(),
            opens: HashMap::new(),
            lock_states: HashMap::new(),
            ranges: Vec::new(),
            delegations: HashMap::new(),
            next_other: 1,
            change: 1,
        }
    }

    // Tree helpers

    pub fn resolve(&self, path: &str) -> Option<u64> {
        let mut id = ROOT_ID;
        for name in path.split('/').filter(|c| !c.is_empty()) {
            match &self.nodes.get(&id)?.content {
                Content::Dir(children) => id = *children.get(name)?,
                Content::File(_) => return None,
            }
        }
        Some(id)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.resolve(path)
            .and_then(|id| self.nodes.get(&id))
            .map_or(false, |n| matches!(n.content, Content::Dir(_)))
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        match &self.nodes.get(&self.resolve(path)?)?.content {
            Content::File(data) => Some(data.clone()),
            Content::Dir(_) => None,
        }
    }

    pub fn children(&self, path: &str) -> Vec<String> {
        match self.resolve(path).and_then(|id| self.nodes.get(&id)).map(|n| &n.content) {
            Some(Content::Dir(children)) => children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn object_count(&self) -> usize {
        self.nodes.len()
    }

    /// Drops every client id and the state hanging off it, as a reboot would.
    pub fn forget_clients(&mut self) {
        self.clients.clear();
        self.opens.clear();
        self.lock_states.clear();
        self.ranges.clear();
        self.delegations.clear();
    }

    /// Opens the server still holds.
    pub fn open_count(&self) -> usize {
        self.opens.len()
    }

    fn insert(&mut self, dir: u64, name: &str, content: Content, mode: u32) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.change += 1;
        let change = self.change;
        self.nodes.insert(id, Node { content, mode, change, mtime: now() });
        if let Some(Node { content: Content::Dir(children), change: dir_change, .. }) =
            self.nodes.get_mut(&dir)
        {
            children.insert(name.to_string(), id);
            *dir_change = change;
        }
        id
    }

    fn unlink(&mut self, dir: u64, name: &str) -> Option<u64> {
        self.change += 1;
        let change = self.change;
        match self.nodes.get_mut(&dir) {
            Some(Node { content: Content::Dir(children), change: dir_change, .. }) => {
                *dir_change = change;
                children.remove(name)
            }
            _ => None,
        }
    }

    /// Drops `id` and everything below it.
    fn drop_tree(&mut self, id: u64) {
        if let Some(node) = self.nodes.remove(&id) {
            if let Content::Dir(children) = node.content {
                for child in children.into_values() {
                    self.drop_tree(child);
                }
            }
        }
    }

    pub fn mkdir_all(&mut self, path: &str) -> u64 {
        let mut id = ROOT_ID;
        for name in path.split('/').filter(|c| !c.is_empty()) {
            id = match self.child(id, name) {
                Ok(Some(child)) => child,
                _ => self.insert(id, name, Content::Dir(BTreeMap::new()), 0o755),
            };
        }
        id
    }

    pub fn put_file(&mut self, path: &str, data: &[u8]) -> u64 {
        let (dir, name) = match path.trim_matches('/').rsplit_once('/') {
            Some((dir, name)) => (self.mkdir_all(dir), name.to_string()),
            None => (ROOT_ID, path.trim_matches('/').to_string()),
        };
        if let Some(old) = self.unlink(dir, &name) {
            self.drop_tree(old);
        }
        self.insert(dir, &name, Content::File(data.to_vec()), 0o644)
    }

    /// Removes the subtree at `path`, as another client would.
    pub fn remove_tree(&mut self, path: &str) {
        let path = path.trim_matches('/');
        let (dir, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (self.resolve(dir), name),
            None => (Some(ROOT_ID), path),
        };
        if let Some(old) = dir.and_then(|dir| self.unlink(dir, name)) {
            self.drop_tree(old);
        }
    }

    fn node(&self, id: u64) -> Result<&Node, nfsstat4> {
        self.nodes.get(&id).ok_or(nfsstat4::NFS4ERR_STALE)
    }

    fn child(&self, dir: u64, name: &str) -> Result<Option<u64>, nfsstat4> {
        match &self.node(dir)?.content {
            Content::Dir(children) => Ok(children.get(name).copied()),
            Content::File(_) => Err(nfsstat4::NFS4ERR_NOTDIR),
        }
    }

    fn id_of(&self, fh: &nfs_fh4) -> Result<u64, nfsstat4> {
        let bytes: [u8; 8] = fh.as_bytes().try_into().map_err(|_| nfsstat4::NFS4ERR_BADHANDLE)?;
        let id = u64::from_be_bytes(bytes);
        self.node(id)?;
        Ok(id)
    }

    fn fattr(&self, id: u64) -> Result<Fattr, nfsstat4> {
        let node = self.node(id)?;
        let (file_type, size, numlinks) = match &node.content {
            Content::File(data) => (nfs_ftype4::NF4REG, data.len() as u64, 1),
            Content::Dir(_) => (nfs_ftype4::NF4DIR, 4096, 2),
        };
        Ok(Fattr {
            file_type: Some(file_type),
            change: Some(node.change),
            size: Some(size),
            lease_time: Some(self.options.lease_time),
            fileid: Some(id),
            maxread: Some(self.options.maxread),
            maxwrite: Some(self.options.maxwrite),
            mode: Some(node.mode),
            numlinks: Some(numlinks),
            owner: Some("root".to_string()),
            owner_group: Some("root".to_string()),
            time_access: Some(node.mtime),
            time_metadata: Some(node.mtime),
            time_modify: Some(node.mtime),
        })
    }

    fn encoded_attrs(&self, id: u64, request: &[u32]) -> Result<fattr4, nfsstat4> {
        restrict(&self.fattr(id)?, request).encode().map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
    }

    fn cinfo(&self) -> change_info4 {
        change_info4 { atomic: true, before: self.change.saturating_sub(1), after: self.change }
    }

    fn new_other(&mut self) -> [u8; 12] {
        let mut other = [0u8; 12];
        other[4..].copy_from_slice(&self.next_other.to_be_bytes());
        self.next_other += 1;
        other
    }

    // RPC

    /// Handles one request record. Returns the reply records to send, none
    /// when the server stalls.
    pub fn handle_record(&mut self, record: &[u8]) -> Vec<Vec<u8>> {
        let mut src = Cursor::new(record);
        let Ok(msg) = deserialize::<rpc_msg>(&mut src) else {
            return Vec::new();
        };
        let rpc_body::CALL(call) = msg.body else {
            return Vec::new();
        };
        if self.options.stall {
            return Vec::new();
        }

        let mut replies = Vec::new();
        if self.options.stale_reply_first {
            self.options.stale_reply_first = false;
            let mut stale = Vec::new();
            let stale_xid = msg.xid.wrapping_sub(1000);
            make_success_reply(stale_xid).serialize(&mut stale).expect("stale reply");
            replies.push(stale);
        }

        let mut out = Vec::new();
        if self.options.reject_auth {
            let denied = rpc_msg {
                xid: msg.xid,
                body: rpc_body::REPLY(reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(
                    auth_stat::AUTH_TOOWEAK,
                ))),
            };
            denied.serialize(&mut out).expect("denied reply");
            replies.push(out);
            return replies;
        }

        let accepted = |reply_data: accept_body| rpc_msg {
            xid: msg.xid,
            body: rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted_reply {
                verf: opaque_auth::default(),
                reply_data,
            })),
        };
        if call.prog != PROGRAM || call.vers != VERSION {
            accepted(accept_body::PROG_UNAVAIL).serialize(&mut out).expect("reply");
        } else {
            match call.proc {
                NFSPROC4_NULL => make_success_reply(msg.xid).serialize(&mut out).expect("reply"),
                NFSPROC4_COMPOUND => match deserialize::<COMPOUND4args>(&mut src) {
                    Ok(args) => {
                        let res = self.compound(args);
                        make_success_reply(msg.xid).serialize(&mut out).expect("reply");
                        res.serialize(&mut out).expect("compound reply");
                    }
                    Err(_) => {
                        accepted(accept_body::GARBAGE_ARGS).serialize(&mut out).expect("reply")
                    }
                },
                _ => accepted(accept_body::PROC_UNAVAIL).serialize(&mut out).expect("reply"),
            }
        }
        replies.push(out);
        replies
    }

    pub fn compound(&mut self, args: COMPOUND4args) -> COMPOUND4res {
        self.stats.compounds += 1;
        if args.minorversion != 0 {
            return COMPOUND4res {
                status: nfsstat4::NFS4ERR_MINOR_VERS_MISMATCH,
                tag: args.tag,
                resarray: Vec::new(),
            };
        }
        let mut cur = None;
        let mut saved = None;
        let mut status = nfsstat4::NFS4_OK;
        let mut resarray = Vec::new();
        for op in args.argarray {
            let res = self.op(op, &mut cur, &mut saved);
            status = res.status();
            resarray.push(res);
            if !status.is_ok() {
                break;
            }
        }
        COMPOUND4res { status, tag: args.tag, resarray }
    }

    fn op(&mut self, op: nfs_argop4, cur: &mut Option<u64>, saved: &mut Option<u64>) -> nfs_resop4 {
        let current = cur.ok_or(nfsstat4::NFS4ERR_NOFILEHANDLE);
        match op {
            nfs_argop4::CLOSE(a) => nfs_resop4::CLOSE(wrap(self.close(a))),
            nfs_argop4::COMMIT(_) => nfs_resop4::COMMIT(wrap(current.and_then(|id| {
                self.stats.commits += 1;
                self.node(id)?;
                Ok(self.options.commit_verifier.unwrap_or(WRITE_VERIFIER))
            }))),
            nfs_argop4::CREATE(a) => {
                nfs_resop4::CREATE(wrap(current.and_then(|dir| self.create(dir, a, cur))))
            }
            nfs_argop4::DELEGRETURN(a) => {
                self.stats.delegreturns += 1;
                let res = match self.delegations.remove(&a.deleg_stateid.other) {
                    Some(_) => Ok(()),
                    None => Err(nfsstat4::NFS4ERR_BAD_STATEID),
                };
                nfs_resop4::DELEGRETURN(wrap(res))
            }
            nfs_argop4::GETATTR(a) => nfs_resop4::GETATTR(wrap(
                current.and_then(|id| self.encoded_attrs(id, &a.attr_request)),
            )),
            nfs_argop4::GETFH => nfs_resop4::GETFH(wrap(current.map(fh_of))),
            nfs_argop4::LOCK(a) => nfs_resop4::LOCK(match current {
                Ok(id) => self.lock(id, a),
                Err(status) => LOCK4res::Err(status),
            }),
            nfs_argop4::LOCKU(a) => nfs_resop4::LOCKU(wrap(self.locku(a))),
            nfs_argop4::LOOKUP(a) => nfs_resop4::LOOKUP(wrap(current.and_then(|dir| {
                self.stats.lookups += 1;
                let child = self.child(dir, &a.objname)?.ok_or(nfsstat4::NFS4ERR_NOENT)?;
                *cur = Some(child);
                Ok(())
            }))),
            nfs_argop4::OPEN(a) => {
                nfs_resop4::OPEN(wrap(current.and_then(|dir| self.open(dir, a, cur))))
            }
            nfs_argop4::OPEN_CONFIRM(a) => nfs_resop4::OPEN_CONFIRM(wrap(self.open_confirm(a))),
            nfs_argop4::PUTFH(a) => nfs_resop4::PUTFH(wrap(self.id_of(&a.object).map(|id| {
                *cur = Some(id);
            }))),
            nfs_argop4::PUTROOTFH => {
                *cur = Some(ROOT_ID);
                nfs_resop4::PUTROOTFH(OpResult::Ok(()))
            }
            nfs_argop4::READ(a) => nfs_resop4::READ(wrap(current.and_then(|id| self.read(id, a)))),
            nfs_argop4::READDIR(a) => {
                nfs_resop4::READDIR(wrap(current.and_then(|id| self.readdir(id, a))))
            }
            nfs_argop4::REMOVE(a) => {
                nfs_resop4::REMOVE(wrap(current.and_then(|dir| self.remove(dir, &a.target))))
            }
            nfs_argop4::RENAME(a) => {
                let res = match (*saved, current) {
                    (Some(src), Ok(dst)) => self.rename(src, dst, a),
                    _ => Err(nfsstat4::NFS4ERR_NOFILEHANDLE),
                };
                nfs_resop4::RENAME(wrap(res))
            }
            nfs_argop4::RENEW(a) => {
                self.stats.renews += 1;
                let res = if self.clients.contains_key(&a.clientid) {
                    Ok(())
                } else {
                    Err(nfsstat4::NFS4ERR_STALE_CLIENTID)
                };
                nfs_resop4::RENEW(wrap(res))
            }
            nfs_argop4::RESTOREFH => nfs_resop4::RESTOREFH(wrap(match *saved {
                Some(id) => {
                    *cur = Some(id);
                    Ok(())
                }
                None => Err(nfsstat4::NFS4ERR_RESTOREFH),
            })),
            nfs_argop4::SAVEFH => nfs_resop4::SAVEFH(wrap(current.map(|id| {
                *saved = Some(id);
            }))),
            nfs_argop4::SETCLIENTID(_) => {
                self.stats.setclientids += 1;
                let clientid = self.next_clientid;
                self.next_clientid += 1;
                let confirm = clientid.to_be_bytes();
                self.clients.insert(clientid, (confirm, false));
                nfs_resop4::SETCLIENTID(SETCLIENTID4res::Ok(SETCLIENTID4resok {
                    clientid,
                    setclientid_confirm: confirm,
                }))
            }
            nfs_argop4::SETCLIENTID_CONFIRM(a) => {
                let res = match self.clients.get_mut(&a.clientid) {
                    Some((verifier, confirmed)) if *verifier == a.setclientid_confirm => {
                        *confirmed = true;
                        Ok(())
                    }
                    _ => Err(nfsstat4::NFS4ERR_STALE_CLIENTID),
                };
                nfs_resop4::SETCLIENTID_CONFIRM(wrap(res))
            }
            nfs_argop4::WRITE(a) => {
                nfs_resop4::WRITE(wrap(current.and_then(|id| self.write(id, a))))
            }
            nfs_argop4::ILLEGAL => nfs_resop4::ILLEGAL(OpResult::Err(nfsstat4::NFS4ERR_OP_ILLEGAL)),
        }
    }

    fn create(
        &mut self,
        dir: u64,
        a: CREATE4args,
        cur: &mut Option<u64>,
    ) -> Result<CREATE4resok, nfsstat4> {
        if a.objtype != createtype4::NF4DIR {
            return Err(nfsstat4::NFS4ERR_NOTSUPP);
        }
        if a.objname.is_empty() || a.objname.contains('/') {
            return Err(nfsstat4::NFS4ERR_INVAL);
        }
        if self.child(dir, &a.objname)?.is_some() {
            return Err(nfsstat4::NFS4ERR_EXIST);
        }
        let attrs = Fattr::decode(&a.createattrs).map_err(|_| nfsstat4::NFS4ERR_BADXDR)?;
        self.stats.creates += 1;
        let mode = attrs.mode.unwrap_or(0o755);
        let id = self.insert(dir, &a.objname, Content::Dir(BTreeMap::new()), mode);
        *cur = Some(id);
        let attrset = if attrs.mode.is_some() { attr_bitmap(&[FATTR4_MODE]) } else { Vec::new() };
        Ok(CREATE4resok { cinfo: self.cinfo(), attrset })
    }

    fn open(
        &mut self,
        dir: u64,
        a: OPEN4args,
        cur: &mut Option<u64>,
    ) -> Result<OPEN4resok, nfsstat4> {
        let open_claim4::CLAIM_NULL(name) = a.claim else {
            return Err(nfsstat4::NFS4ERR_NOTSUPP);
        };
        if !self.clients.get(&a.owner.clientid).map_or(false, |c| c.1) {
            return Err(nfsstat4::NFS4ERR_STALE_CLIENTID);
        }
        let key: OwnerKey = (a.owner.clientid, a.owner.owner.clone());
        let new_owner = !self.open_owners.contains_key(&key);
        advance(&mut self.open_owners, &key, a.seqid)?;

        let id = match (self.child(dir, &name)?, a.openhow) {
            (Some(id), how) => {
                if matches!(self.node(id)?.content, Content::Dir(_)) {
                    return Err(nfsstat4::NFS4ERR_ISDIR);
                }
                match how {
                    openflag4::OPEN4_NOCREATE => {}
                    openflag4::OPEN4_CREATE(createhow4::UNCHECKED4(attrs)) => {
                        let attrs = Fattr::decode(&attrs).map_err(|_| nfsstat4::NFS4ERR_BADXDR)?;
                        if attrs.size == Some(0) {
                            self.truncate(id);
                        }
                    }
                    openflag4::OPEN4_CREATE(_) => return Err(nfsstat4::NFS4ERR_EXIST),
                }
                id
            }
            (None, openflag4::OPEN4_NOCREATE) => return Err(nfsstat4::NFS4ERR_NOENT),
            (None, openflag4::OPEN4_CREATE(how)) => {
                let mode = match how {
                    createhow4::UNCHECKED4(attrs) | createhow4::GUARDED4(attrs) => {
                        Fattr::decode(&attrs).map_err(|_| nfsstat4::NFS4ERR_BADXDR)?.mode
                    }
                    createhow4::EXCLUSIVE4(_) => None,
                };
                self.insert(dir, &name, Content::File(Vec::new()), mode.unwrap_or(0o644))
            }
        };

        self.stats.opens += 1;
        let other = self.new_other();
        let entry = OpenEntry { fileid: id, owner: key, seqid: 1, confirmed: !new_owner };
        self.opens.insert(other, entry);
        let delegate = self.options.read_delegations && a.share_access == OPEN4_SHARE_ACCESS_READ;
        let delegation = if delegate {
            let deleg = self.new_other();
            self.delegations.insert(deleg, id);
            open_delegation4::OPEN_DELEGATE_READ(open_read_delegation4 {
                stateid: stateid4 { seqid: 1, other: deleg },
                recall: false,
                permissions: nfsace4::default(),
            })
        } else {
            open_delegation4::OPEN_DELEGATE_NONE
        };
        *cur = Some(id);
        let confirm = if new_owner { OPEN4_RESULT_CONFIRM } else { 0 };
        Ok(OPEN4resok {
            stateid: stateid4 { seqid: 1, other },
            cinfo: self.cinfo(),
            rflags: OPEN4_RESULT_LOCKTYPE_POSIX | confirm,
            attrset: Vec::new(),
            delegation,
        })
    }

    fn truncate(&mut self, id: u64) {
        self.change += 1;
        let change = self.change;
        if let Some(Node { content: Content::File(data), change: c, mtime, .. }) =
            self.nodes.get_mut(&id)
        {
            data.clear();
            *c = change;
            *mtime = now();
        }
    }

    fn open_confirm(&mut self, a: OPEN_CONFIRM4args) -> Result<stateid4, nfsstat4> {
        let owner = match self.opens.get(&a.open_stateid.other) {
            Some(entry) => entry.owner.clone(),
            None => return Err(nfsstat4::NFS4ERR_BAD_STATEID),
        };
        advance(&mut self.open_owners, &owner, a.seqid)?;
        let entry = self.opens.get_mut(&a.open_stateid.other).ok_or(nfsstat4::NFS4ERR_BAD_STATEID)?;
        entry.confirmed = true;
        entry.seqid += 1;
        self.stats.open_confirms += 1;
        Ok(stateid4 { seqid: entry.seqid, other: a.open_stateid.other })
    }

    fn close(&mut self, a: CLOSE4args) -> Result<stateid4, nfsstat4> {
        let owner = match self.opens.get(&a.open_stateid.other) {
            Some(entry) => entry.owner.clone(),
            None => return Err(nfsstat4::NFS4ERR_BAD_STATEID),
        };
        advance(&mut self.open_owners, &owner, a.seqid)?;
        let entry = self.opens.remove(&a.open_stateid.other).ok_or(nfsstat4::NFS4ERR_BAD_STATEID)?;
        self.stats.closes += 1;
        Ok(stateid4 { seqid: entry.seqid + 1, other: a.open_stateid.other })
    }

    /// Validates the stateid of a READ or WRITE and applies injected expiry.
    fn check_io_state(&mut self, id: u64, stateid: &stateid4) -> Result<(), nfsstat4> {
        if *stateid == stateid4::ANONYMOUS {
            return Ok(());
        }
        match self.opens.get(&stateid.other) {
            Some(entry) if entry.confirmed && entry.fileid == id => {}
            _ => return Err(nfsstat4::NFS4ERR_BAD_STATEID),
        }
        if self.options.expire_next_io > 0 {
            self.options.expire_next_io -= 1;
            self.opens.remove(&stateid.other);
            return Err(nfsstat4::NFS4ERR_EXPIRED);
        }
        Ok(())
    }

    fn read(&mut self, id: u64, a: READ4args) -> Result<READ4resok, nfsstat4> {
        self.check_io_state(id, &a.stateid)?;
        self.stats.reads += 1;
        let Content::File(data) = &self.node(id)?.content else {
            return Err(nfsstat4::NFS4ERR_ISDIR);
        };
        let start = (a.offset as usize).min(data.len());
        let count = (a.count as usize).min(self.options.read_cap);
        let end = start.saturating_add(count).min(data.len());
        Ok(READ4resok { eof: end == data.len(), data: data[start..end].to_vec() })
    }

    fn write(&mut self, id: u64, a: WRITE4args) -> Result<WRITE4resok, nfsstat4> {
        self.check_io_state(id, &a.stateid)?;
        self.stats.writes += 1;
        let accepted =
            if self.options.short_writes { a.data.len().saturating_sub(1) } else { a.data.len() };
        self.change += 1;
        let change = self.change;
        let Some(Node { content: Content::File(data), change: c, mtime, .. }) =
            self.nodes.get_mut(&id)
        else {
            return Err(nfsstat4::NFS4ERR_ISDIR);
        };
        let offset = a.offset as usize;
        if data.len() < offset + accepted {
            data.resize(offset + accepted, 0);
        }
        data[offset..offset + accepted].copy_from_slice(&a.data[..accepted]);
        *c = change;
        *mtime = now();
        Ok(WRITE4resok {
            count: accepted as u32,
            committed: stable_how4::UNSTABLE4,
            writeverf: WRITE_VERIFIER,
        })
    }

    fn readdir(&mut self, dir: u64, a: READDIR4args) -> Result<READDIR4resok, nfsstat4> {
        if a.cookie != 0 && a.cookieverf != COOKIE_VERIFIER {
            return Err(nfsstat4::NFS4ERR_NOT_SAME);
        }
        let Content::Dir(children) = &self.node(dir)?.content else {
            return Err(nfsstat4::NFS4ERR_NOTDIR);
        };
        let mut listing: Vec<(String, u64)> = Vec::new();
        if self.options.dot_entries {
            listing.push((".".to_string(), dir));
            listing.push(("..".to_string(), dir));
        }
        listing.extend(children.iter().map(|(name, id)| (name.clone(), *id)));

        // Entry at position p carries cookie p + 3; 1 and 2 are reserved.
        let mut start = match a.cookie {
            0 => 0,
            1 | 2 => return Err(nfsstat4::NFS4ERR_BAD_COOKIE),
            cookie => (cookie - 2) as usize,
        };
        if start > listing.len() {
            return Err(nfsstat4::NFS4ERR_BAD_COOKIE);
        }
        if self.options.repeat_page_boundary && start > 0 {
            start -= 1;
        }
        let end = (start + self.options.readdir_page).min(listing.len());
        let mut entries = Vec::with_capacity(end - start);
        for (pos, (name, id)) in listing[start..end].iter().enumerate() {
            entries.push(entry4 {
                cookie: (start + pos) as u64 + 3,
                name: name.clone(),
                attrs: self.encoded_attrs(*id, &a.attr_request)?,
            });
        }
        self.stats.readdirs += 1;
        Ok(READDIR4resok {
            cookieverf: COOKIE_VERIFIER,
            reply: dirlist4 { entries, eof: end == listing.len() },
        })
    }

    fn remove(&mut self, dir: u64, name: &str) -> Result<change_info4, nfsstat4> {
        let id = self.child(dir, name)?.ok_or(nfsstat4::NFS4ERR_NOENT)?;
        if let Content::Dir(children) = &self.node(id)?.content {
            if !children.is_empty() {
                return Err(nfsstat4::NFS4ERR_NOTEMPTY);
            }
        }
        self.unlink(dir, name);
        self.drop_tree(id);
        self.stats.removes += 1;
        Ok(self.cinfo())
    }

    fn rename(&mut self, src: u64, dst: u64, a: RENAME4args) -> Result<RENAME4resok, nfsstat4> {
        let id = self.child(src, &a.oldname)?.ok_or(nfsstat4::NFS4ERR_NOENT)?;
        if let Some(existing) = self.child(dst, &a.newname)? {
            if let Content::Dir(children) = &self.node(existing)?.content {
                if !children.is_empty() {
                    return Err(nfsstat4::NFS4ERR_EXIST);
                }
            }
            self.unlink(dst, &a.newname);
            self.drop_tree(existing);
        }
        self.unlink(src, &a.oldname);
        self.change += 1;
        let change = self.change;
        if let Some(Node { content: Content::Dir(children), change: c, .. }) =
            self.nodes.get_mut(&dst)
        {
            children.insert(a.newname, id);
            *c = change;
        }
        self.stats.renames += 1;
        Ok(RENAME4resok { source_cinfo: self.cinfo(), target_cinfo: self.cinfo() })
    }

    fn lock(&mut self, id: u64, a: LOCK4args) -> LOCK4res {
        match self.try_lock(id, a) {
            Ok(res) => res,
            Err(status) => LOCK4res::Err(status),
        }
    }

    fn try_lock(&mut self, id: u64, a: LOCK4args) -> Result<LOCK4res, nfsstat4> {
        let (key, existing) = match a.locker {
            locker4::NEW(new) => {
                let open_owner = match self.opens.get(&new.open_stateid.other) {
                    Some(entry) if entry.confirmed => entry.owner.clone(),
                    _ => return Err(nfsstat4::NFS4ERR_BAD_STATEID),
                };
                advance(&mut self.open_owners, &open_owner, new.open_seqid)?;
                let key: OwnerKey = (new.lock_owner.clientid, new.lock_owner.owner);
                advance(&mut self.lock_owners, &key, new.lock_seqid)?;
                (key, None)
            }
            locker4::EXISTING(exist) => {
                let key = match self.lock_states.get(&exist.lock_stateid.other) {
                    Some(state) => state.owner.clone(),
                    None => return Err(nfsstat4::NFS4ERR_BAD_STATEID),
                };
                advance(&mut self.lock_owners, &key, exist.lock_seqid)?;
                (key, Some(exist.lock_stateid.other))
            }
        };

        let write = matches!(a.locktype, nfs_lock_type4::WRITE_LT | nfs_lock_type4::WRITEW_LT);
        let conflict = self.ranges.iter().find(|r| {
            r.fileid == id && r.owner != key && (write || r.write) && r.overlaps(a.offset, a.length)
        });
        if let Some(conflict) = conflict {
            return Ok(LOCK4res::Denied(LOCK4denied {
                offset: conflict.offset,
                length: conflict.length,
                locktype: if conflict.write {
                    nfs_lock_type4::WRITE_LT
                } else {
                    nfs_lock_type4::READ_LT
                },
                owner: lock_owner4 { clientid: conflict.owner.0, owner: conflict.owner.1.clone() },
            }));
        }

        self.ranges.push(Range {
            fileid: id,
            owner: key.clone(),
            offset: a.offset,
            length: a.length,
            write,
        });
        let other = match existing {
            Some(other) => other,
            None => {
                let other = self.new_other();
                self.lock_states.insert(other, LockEntry { owner: key, seqid: 0 });
                other
            }
        };
        let state = self.lock_states.get_mut(&other).ok_or(nfsstat4::NFS4ERR_BAD_STATEID)?;
        state.seqid += 1;
        Ok(LOCK4res::Ok(stateid4 { seqid: state.seqid, other }))
    }

    fn locku(&mut self, a: LOCKU4args) -> Result<stateid4, nfsstat4> {
        let key = match self.lock_states.get(&a.lock_stateid.other) {
            Some(state) => state.owner.clone(),
            None => return Err(nfsstat4::NFS4ERR_BAD_STATEID),
        };
        advance(&mut self.lock_owners, &key, a.seqid)?;
        self.ranges.retain(|r| !(r.owner == key && r.overlaps(a.offset, a.length)));
        let state = self
            .lock_states
            .get_mut(&a.lock_stateid.other)
            .ok_or(nfsstat4::NFS4ERR_BAD_STATEID)?;
        state.seqid += 1;
        Ok(stateid4 { seqid: state.seqid, other: a.lock_stateid.other })
    }
}

fn attr_bitmap(bits: &[u32]) -> bitmap4 {
    nfs4_client::xdr::nfs4::attr::bitmap(bits)
}

/// A server shared by any number of client connections.
#[derive(Clone)]
pub struct TestServer {
    state: Arc<Mutex<ServerState>>,
}

impl TestServer {
    pub fn new() -> TestServer {
        TestServer::with_options(ServerOptions::default())
    }

    pub fn with_options(options: ServerOptions) -> TestServer {
        TestServer { state: Arc::new(Mutex::new(ServerState::new(options))) }
    }

    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, f: impl FnOnce(&mut ServerOptions)) {
        f(&mut self.state().options);
    }

    pub fn stats(&self) -> Stats {
        self.state().stats.clone()
    }

    /// Opens a new connection served by a background task.
    pub fn connect(&self) -> DuplexStream {
        let (client, server) = duplex(1 << 16);
        tokio::spawn(serve(self.state.clone(), server));
        client
    }

    pub fn config() -> ClientConfig {
        ClientConfig::new("test-server:2049").with_machine_name("test-client")
    }

    pub async fn client(&self) -> NfsClient {
        self.client_with(TestServer::config()).await
    }

    pub async fn client_with(&self, config: ClientConfig) -> NfsClient {
        NfsClient::with_transport(&Context::new(), self.connect(), config)
            .await
            .expect("client bootstrap")
    }
}

async fn serve(state: Arc<Mutex<ServerState>>, mut stream: DuplexStream) {
    while let Ok(record) = read_record(&mut stream).await {
        let replies = state.lock().unwrap_or_else(PoisonError::into_inner).handle_record(&record);
        for reply in replies {
            if write_fragment(&mut stream, &reply).await.is_err() {
                return;
            }
        }
    }
}
