//! Client identity and open/lock state.
//!
//! NFSv4.0 state hangs off a client id obtained with SETCLIENTID and
//! confirmed with SETCLIENTID_CONFIRM. Every OPEN names an open-owner; the
//! server tracks one sequence number per owner and rejects a request whose
//! seqid is not exactly the next one. This client creates one open-owner per
//! [`OpenState`], so the sequence counter on the state is the owner's.
//!
//! A seqid is taken with [`OpenState::next_seq`] right before the request
//! that consumes it. When such a request fails in a way after which the
//! server did not advance its own counter, the state is invalidated: the
//! two counters can no longer be trusted to agree.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use super::compound::{CompoundEngine, CompoundReply, OpFailure, Results};
use crate::error::{classify, ErrorKind, NfsError, NfsResult};
use crate::protocol::rpc::Context;
use crate::protocol::xdr::nfs4::attr::{Fattr, STAT_ATTRS};
use crate::protocol::xdr::nfs4::ops::*;
use crate::protocol::xdr::nfs4::{
    attr, cb_client4, clientaddr4, lock_owner4, nfs_client_id4, nfs_fh4, nfsstat4, open_owner4,
    stateid4, verifier4,
};

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How OPEN treats the named file.
#[derive(Clone, Debug)]
pub enum OpenHow {
    /// Open an existing file for reading.
    Read,
    /// Open an existing file for writing, keeping its content.
    Write,
    /// Create the file if missing and truncate it to zero length.
    CreateTruncate { mode: u32 },
}

impl OpenHow {
    fn share_access(&self) -> u32 {
        match self {
            OpenHow::Read => OPEN4_SHARE_ACCESS_READ,
            OpenHow::Write | OpenHow::CreateTruncate { .. } => OPEN4_SHARE_ACCESS_WRITE,
        }
    }

    fn openflag(&self) -> NfsResult<openflag4> {
        match self {
            OpenHow::Read | OpenHow::Write => Ok(openflag4::OPEN4_NOCREATE),
            OpenHow::CreateTruncate { mode } => {
                let attrs = Fattr { size: Some(0), mode: Some(*mode), ..Fattr::default() }
                    .encode()
                    .map_err(NfsError::encode)?;
                Ok(openflag4::OPEN4_CREATE(createhow4::UNCHECKED4(attrs)))
            }
        }
    }
}

#[derive(Debug)]
struct LockState {
    owner: lock_owner4,
    seqid: AtomicU32,
    /// Set once the server has created lock state for the owner.
    stateid: Mutex<Option<stateid4>>,
}

/// State of one open file: the owner, its sequence counter and the latest
/// stateid the server handed out.
#[derive(Debug)]
pub struct OpenState {
    clientid: u64,
    owner: open_owner4,
    fh: nfs_fh4,
    seqid: AtomicU32,
    stateid: Mutex<stateid4>,
    delegation: Mutex<Option<stateid4>>,
    lock: LockState,
    valid: AtomicBool,
}

impl OpenState {
    fn new(clientid: u64, owner: open_owner4, lock_owner: lock_owner4) -> OpenState {
        OpenState {
            clientid,
            owner,
            fh: nfs_fh4::default(),
            seqid: AtomicU32::new(0),
            stateid: Mutex::new(stateid4::ANONYMOUS),
            delegation: Mutex::new(None),
            lock: LockState {
                owner: lock_owner,
                seqid: AtomicU32::new(0),
                stateid: Mutex::new(None),
            },
            valid: AtomicBool::new(true),
        }
    }

    /// Returns the current sequence number and advances it. Concurrent
    /// callers always get distinct values.
    pub fn next_seq(&self) -> u32 {
        self.seqid.fetch_add(1, Ordering::SeqCst)
    }

    pub fn stateid(&self) -> stateid4 {
        *self.stateid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_stateid(&self, stateid: stateid4) {
        *self.stateid.lock().unwrap_or_else(PoisonError::into_inner) = stateid;
    }

    pub fn fh(&self) -> &nfs_fh4 {
        &self.fh
    }

    pub fn clientid(&self) -> u64 {
        self.clientid
    }

    pub fn owner(&self) -> &open_owner4 {
        &self.owner
    }

    pub fn delegation(&self) -> Option<stateid4> {
        *self.delegation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Fails with [`NfsError::StateExpired`] once the state was invalidated.
    pub fn ensure_valid(&self) -> NfsResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(NfsError::StateExpired { status: nfsstat4::NFS4ERR_EXPIRED })
        }
    }
}

/// Statuses after which the server has not advanced the owner's seqid.
fn seqid_unchanged(status: nfsstat4) -> bool {
    matches!(
        status,
        nfsstat4::NFS4ERR_STALE_CLIENTID
            | nfsstat4::NFS4ERR_STALE_STATEID
            | nfsstat4::NFS4ERR_BAD_STATEID
            | nfsstat4::NFS4ERR_BAD_SEQID
            | nfsstat4::NFS4ERR_BADXDR
            | nfsstat4::NFS4ERR_RESOURCE
            | nfsstat4::NFS4ERR_NOFILEHANDLE
            | nfsstat4::NFS4ERR_MOVED
    )
}

/// Converts a failure into the caller-facing error, turning expired state
/// into [`NfsError::StateExpired`].
pub fn state_error(failure: OpFailure) -> NfsError {
    if classify(failure.status) == ErrorKind::StateExpired {
        NfsError::StateExpired { status: failure.status }
    } else {
        failure.into_error()
    }
}

fn client_lost(status: nfsstat4) -> bool {
    matches!(
        status,
        nfsstat4::NFS4ERR_STALE_CLIENTID | nfsstat4::NFS4ERR_EXPIRED | nfsstat4::NFS4ERR_LEASE_MOVED
    )
}

/// Owns the client id and every open state created through it.
pub struct StateManager {
    engine: Arc<CompoundEngine>,
    id_string: Vec<u8>,
    boot_verifier: verifier4,
    clientid: tokio::sync::Mutex<Option<u64>>,
    next_owner: AtomicU64,
    opens: Mutex<HashMap<u64, Weak<OpenState>>>,
}

impl StateManager {
    /// The client id string is unique to this instance, so independent
    /// clients on one machine never share server-side state.
    pub fn new(engine: Arc<CompoundEngine>, machine_name: &str) -> StateManager {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let instance = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let id_string = format!(
            "{machine_name}/{}/{instance}/{}",
            std::process::id(),
            now.as_nanos()
        )
        .into_bytes();
        let mut boot_verifier = [0u8; 8];
        boot_verifier.copy_from_slice(&(now.as_nanos() as u64).to_be_bytes());
        StateManager {
            engine,
            id_string,
            boot_verifier,
            clientid: tokio::sync::Mutex::new(None),
            next_owner: AtomicU64::new(1),
            opens: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the confirmed client id, establishing it first if needed.
    pub async fn identify(&self, ctx: &Context) -> NfsResult<u64> {
        let mut clientid = self.clientid.lock().await;
        if let Some(id) = *clientid {
            return Ok(id);
        }

        let args = SETCLIENTID4args {
            client: nfs_client_id4 { verifier: self.boot_verifier, id: self.id_string.clone() },
            // No callback service: the server will not grant recallable
            // delegations it cannot recall.
            callback: cb_client4 {
                cb_program: 0,
                cb_location: clientaddr4 { r_netid: "tcp".into(), r_addr: "0.0.0.0.0.0".into() },
            },
            callback_ident: 0,
        };
        let mut res = self.engine.execute(ctx, vec![nfs_argop4::SETCLIENTID(args)]).await?;
        let resok = res.next_as("SETCLIENTID", nfs_resop4::into_setclientid)?;

        let confirm = SETCLIENTID_CONFIRM4args {
            clientid: resok.clientid,
            setclientid_confirm: resok.setclientid_confirm,
        };
        self.engine.execute(ctx, vec![nfs_argop4::SETCLIENTID_CONFIRM(confirm)]).await?;

        info!(clientid = resok.clientid, "client identity established");
        *clientid = Some(resok.clientid);
        Ok(resok.clientid)
    }

    /// Drops the client id and invalidates every open state. The next call
    /// that needs state identifies again.
    pub async fn forget_identity(&self) {
        let mut clientid = self.clientid.lock().await;
        if clientid.take().is_some() {
            warn!("client identity lost, open state invalidated");
        }
        let opens = std::mem::take(&mut *self.opens.lock().unwrap_or_else(PoisonError::into_inner));
        for state in opens.values().filter_map(Weak::upgrade) {
            state.invalidate();
        }
    }

    /// Closes every open state still alive, logging failures. Used when the
    /// client shuts down.
    pub async fn close_all(&self, ctx: &Context) {
        let live: Vec<Arc<OpenState>> = {
            let opens = self.opens.lock().unwrap_or_else(PoisonError::into_inner);
            opens.values().filter_map(Weak::upgrade).filter(|s| s.is_valid()).collect()
        };
        for state in live {
            if let Err(e) = self.close(ctx, &state).await {
                warn!("closing open state on shutdown failed: {e}");
            }
        }
    }

    pub async fn current_clientid(&self) -> Option<u64> {
        *self.clientid.lock().await
    }

    /// Opens `name` in directory `dir`. Returns the state and the file's
    /// attributes as of the open.
    pub async fn open(
        &self,
        ctx: &Context,
        dir: &nfs_fh4,
        name: &str,
        how: OpenHow,
    ) -> NfsResult<(Arc<OpenState>, Fattr)> {
        let clientid = self.identify(ctx).await?;
        let n = self.next_owner.fetch_add(1, Ordering::Relaxed);
        let owner = open_owner4 { clientid, owner: format!("open-{n}").into_bytes() };
        let lock_owner = lock_owner4 { clientid, owner: format!("lock-{n}").into_bytes() };
        let mut state = OpenState::new(clientid, owner.clone(), lock_owner);

        let ops = vec![
            nfs_argop4::PUTFH(PUTFH4args { object: dir.clone() }),
            nfs_argop4::OPEN(OPEN4args {
                seqid: state.next_seq(),
                share_access: how.share_access(),
                share_deny: OPEN4_SHARE_DENY_NONE,
                owner,
                openhow: how.openflag()?,
                claim: open_claim4::CLAIM_NULL(name.to_string()),
            }),
            nfs_argop4::GETFH,
            nfs_argop4::GETATTR(GETATTR4args { attr_request: attr::bitmap(STAT_ATTRS) }),
        ];
        let mut res = self.consume(ctx, ops, 1, None).await?;
        res.skip(1)?;
        let resok = res.next_as("OPEN", nfs_resop4::into_open)?;
        state.fh = res.next_as("GETFH", nfs_resop4::into_getfh)?;
        let attrs = res.next_as("GETATTR", nfs_resop4::into_getattr)?;
        let attrs = Fattr::decode(&attrs).map_err(NfsError::decode)?;

        state.set_stateid(resok.stateid);
        if let Some(deleg) = resok.delegation.stateid() {
            debug!(name, "delegation granted on open");
            *state.delegation.lock().unwrap_or_else(PoisonError::into_inner) = Some(deleg);
        }

        let state = Arc::new(state);
        {
            let mut opens = self.opens.lock().unwrap_or_else(PoisonError::into_inner);
            opens.retain(|_, open| open.strong_count() > 0);
            opens.insert(n, Arc::downgrade(&state));
        }

        if resok.rflags & OPEN4_RESULT_CONFIRM != 0 {
            self.confirm(ctx, &state).await?;
        }
        Ok((state, attrs))
    }

    async fn confirm(&self, ctx: &Context, state: &OpenState) -> NfsResult<()> {
        let ops = vec![
            nfs_argop4::PUTFH(PUTFH4args { object: state.fh.clone() }),
            nfs_argop4::OPEN_CONFIRM(OPEN_CONFIRM4args {
                open_stateid: state.stateid(),
                seqid: state.next_seq(),
            }),
        ];
        let mut res = self.consume(ctx, ops, 1, Some(state)).await?;
        res.skip(1)?;
        state.set_stateid(res.next_as("OPEN_CONFIRM", nfs_resop4::into_open_confirm)?);
        Ok(())
    }

    /// Returns any delegation and closes the file. The state is invalid
    /// afterwards whatever the outcome.
    pub async fn close(&self, ctx: &Context, state: &OpenState) -> NfsResult<()> {
        if !state.is_valid() {
            return Ok(());
        }
        let delegation = state.delegation.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(deleg) = delegation {
            let ops = vec![
                nfs_argop4::PUTFH(PUTFH4args { object: state.fh.clone() }),
                nfs_argop4::DELEGRETURN(DELEGRETURN4args { deleg_stateid: deleg }),
            ];
            if let Err(e) = self.engine.execute(ctx, ops).await {
                warn!("DELEGRETURN failed: {e}");
            }
        }

        let ops = vec![
            nfs_argop4::PUTFH(PUTFH4args { object: state.fh.clone() }),
            nfs_argop4::CLOSE(CLOSE4args {
                seqid: state.next_seq(),
                open_stateid: state.stateid(),
            }),
        ];
        let res = self.consume(ctx, ops, 1, Some(state)).await;
        state.invalidate();
        res.map(|_| ())
    }

    /// Takes a byte-range lock on an open file.
    pub async fn lock(
        &self,
        ctx: &Context,
        state: &OpenState,
        locktype: nfs_lock_type4,
        offset: u64,
        length: u64,
    ) -> NfsResult<()> {
        state.ensure_valid()?;
        let mut lock_stateid = *state.lock.stateid.lock().unwrap_or_else(PoisonError::into_inner);
        let locker = match lock_stateid {
            Some(lock_stateid) => locker4::EXISTING(exist_lock_owner4 {
                lock_stateid,
                lock_seqid: state.lock.seqid.fetch_add(1, Ordering::SeqCst),
            }),
            None => locker4::NEW(open_to_lock_owner4 {
                open_seqid: state.next_seq(),
                open_stateid: state.stateid(),
                lock_seqid: state.lock.seqid.fetch_add(1, Ordering::SeqCst),
                lock_owner: state.lock.owner.clone(),
            }),
        };
        let ops = vec![
            nfs_argop4::PUTFH(PUTFH4args { object: state.fh.clone() }),
            nfs_argop4::LOCK(LOCK4args { locktype, reclaim: false, offset, length, locker }),
        ];
        let mut res = self.consume(ctx, ops, 1, Some(state)).await?;
        res.skip(1)?;
        lock_stateid = Some(res.next_as("LOCK", nfs_resop4::into_lock)?);
        *state.lock.stateid.lock().unwrap_or_else(PoisonError::into_inner) = lock_stateid;
        Ok(())
    }

    /// Releases a byte-range lock taken with [`StateManager::lock`].
    pub async fn unlock(
        &self,
        ctx: &Context,
        state: &OpenState,
        locktype: nfs_lock_type4,
        offset: u64,
        length: u64,
    ) -> NfsResult<()> {
        state.ensure_valid()?;
        let lock_stateid = state
            .lock
            .stateid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| NfsError::Protocol("unlock without a held lock".into()))?;
        let ops = vec![
            nfs_argop4::PUTFH(PUTFH4args { object: state.fh.clone() }),
            nfs_argop4::LOCKU(LOCKU4args {
                locktype,
                seqid: state.lock.seqid.fetch_add(1, Ordering::SeqCst),
                lock_stateid,
                offset,
                length,
            }),
        ];
        let mut res = self.consume(ctx, ops, 1, Some(state)).await?;
        res.skip(1)?;
        let stateid = res.next_as("LOCKU", nfs_resop4::into_locku)?;
        *state.lock.stateid.lock().unwrap_or_else(PoisonError::into_inner) = Some(stateid);
        Ok(())
    }

    /// Renews the lease. A lost client id is forgotten and reported as
    /// expired state.
    pub async fn renew(&self, ctx: &Context) -> NfsResult<()> {
        let Some(clientid) = self.current_clientid().await else {
            return Ok(());
        };
        let reply =
            self.engine.execute_partial(ctx, vec![nfs_argop4::RENEW(RENEW4args { clientid })])
                .await?;
        match reply.failure {
            None => Ok(()),
            Some(failure) => {
                if client_lost(failure.status) {
                    self.forget_identity().await;
                }
                Err(state_error(failure))
            }
        }
    }

    /// Records that a stateid-bearing operation on `state` failed.
    pub async fn report_failure(&self, state: &OpenState, status: nfsstat4) {
        if classify(status) == ErrorKind::StateExpired {
            state.invalidate();
        }
        if client_lost(status) {
            self.forget_identity().await;
        }
    }

    /// Runs a compound whose operation `seq_index` consumes a seqid of
    /// `state` (or of a state being created when `state` is `None`).
    async fn consume(
        &self,
        ctx: &Context,
        ops: Vec<nfs_argop4>,
        seq_index: usize,
        state: Option<&OpenState>,
    ) -> NfsResult<Results> {
        let reply: CompoundReply = match self.engine.execute_partial(ctx, ops).await {
            Ok(reply) => reply,
            Err(e) => {
                // The request may or may not have reached the server.
                if let Some(state) = state {
                    state.invalidate();
                }
                return Err(e);
            }
        };
        let Some(failure) = reply.failure else {
            return Ok(Results::new(reply.results));
        };
        if let Some(state) = state {
            if failure.index < seq_index || seqid_unchanged(failure.status) {
                debug!(status = %failure.status, "seqid no longer in step, state invalidated");
                state.invalidate();
            }
            if classify(failure.status) == ErrorKind::StateExpired {
                state.invalidate();
            }
        }
        if client_lost(failure.status) {
            self.forget_identity().await;
        }
        Err(state_error(failure))
    }
}
