//! COMPOUND request assembly and reply pairing.
//!
//! The server executes the operations of a COMPOUND in order and stops at
//! the first one that fails; the reply carries one result per executed
//! operation, the failed one included, and nothing after it. This module
//! enforces that contract on every reply: more results than operations, or
//! a result whose opcode differs from its request, is a protocol violation
//! and never a server failure.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::error::{NfsError, NfsResult};
use crate::protocol::rpc::{Context, RpcClient};
use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::ops::{nfs_argop4, nfs_resop4, COMPOUND4args};
use crate::protocol::xdr::nfs4::{
    nfs_opnum4, nfsstat4, MINOR_VERSION, NFSPROC4_COMPOUND, NFSPROC4_NULL,
};

/// The operation that stopped a COMPOUND.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpFailure {
    /// Position in the request, counting from zero.
    pub index: usize,
    pub op: nfs_opnum4,
    pub status: nfsstat4,
}

impl OpFailure {
    pub fn into_error(self) -> NfsError {
        NfsError::Status { status: self.status, op: self.op, index: self.index }
    }
}

/// Decoded COMPOUND reply.
///
/// `results` holds every result the server sent, in request order, ending
/// with the failed operation's result when `failure` is set.
#[derive(Clone, Debug)]
pub struct CompoundReply {
    pub tag: String,
    pub status: nfsstat4,
    pub results: Vec<nfs_resop4>,
    pub failure: Option<OpFailure>,
}

impl CompoundReply {
    /// Turns a failed COMPOUND into an error, a successful one into a
    /// cursor over its results.
    pub fn into_result(self) -> NfsResult<Results> {
        match self.failure {
            Some(failure) => Err(failure.into_error()),
            None => Ok(Results::new(self.results)),
        }
    }
}

/// Cursor over the results of a successful COMPOUND.
#[derive(Debug)]
pub struct Results {
    inner: std::vec::IntoIter<nfs_resop4>,
    index: usize,
}

impl Results {
    pub fn new(results: Vec<nfs_resop4>) -> Results {
        Results { inner: results.into_iter(), index: 0 }
    }

    /// Takes the next result and extracts its body with `extract`, one of
    /// the `nfs_resop4::into_*` accessors.
    pub fn next_as<T>(
        &mut self,
        what: &str,
        extract: impl FnOnce(nfs_resop4) -> Option<T>,
    ) -> NfsResult<T> {
        let index = self.index;
        self.index += 1;
        let res = self
            .inner
            .next()
            .ok_or_else(|| NfsError::Protocol(format!("missing {what} result #{index}")))?;
        let opnum = res.opnum();
        extract(res).ok_or_else(|| {
            NfsError::Protocol(format!("expected {what} result #{index}, got {opnum}"))
        })
    }

    /// Skips results whose body the caller does not need.
    pub fn skip(&mut self, count: usize) -> NfsResult<()> {
        for _ in 0..count {
            let index = self.index;
            self.index += 1;
            if self.inner.next().is_none() {
                return Err(NfsError::Protocol(format!("missing result #{index}")));
            }
        }
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.inner.len()
    }
}

/// Decodes a COMPOUND4res body answering `ops`.
///
/// Stops at the first failing result; anything after it is never decoded.
pub fn decode_reply(ops: &[nfs_argop4], src: &mut impl Read) -> NfsResult<CompoundReply> {
    let status = deserialize::<nfsstat4>(src).map_err(NfsError::decode)?;
    let tag = deserialize::<String>(src).map_err(NfsError::decode)?;
    let count = deserialize::<u32>(src).map_err(NfsError::decode)? as usize;
    if count > ops.len() {
        return Err(NfsError::Protocol(format!(
            "{count} results for a compound of {} operations",
            ops.len()
        )));
    }

    let mut results = Vec::with_capacity(count);
    let mut failure = None;
    for (index, op) in ops.iter().take(count).enumerate() {
        let res = deserialize::<nfs_resop4>(src).map_err(NfsError::decode)?;
        if res.opnum() != op.opnum() {
            return Err(NfsError::Protocol(format!(
                "result #{index} is {} for a {} request",
                res.opnum(),
                op.opnum()
            )));
        }
        let op_status = res.status();
        results.push(res);
        if !op_status.is_ok() {
            failure = Some(OpFailure { index, op: op.opnum(), status: op_status });
            break;
        }
    }

    match failure {
        Some(failure) if results.len() < count => Err(NfsError::Protocol(format!(
            "{} results after failed operation #{}",
            count - results.len(),
            failure.index
        ))),
        Some(failure) if failure.status != status => Err(NfsError::Protocol(format!(
            "compound status {status} differs from failed operation status {}",
            failure.status
        ))),
        Some(_) => Ok(CompoundReply { tag, status, results, failure }),
        None if status.is_ok() && count == ops.len() => {
            Ok(CompoundReply { tag, status, results, failure })
        }
        // The server refused the compound before running the next operation,
        // e.g. NFS4ERR_RESOURCE or NFS4ERR_MINOR_VERS_MISMATCH.
        None if !status.is_ok() && count < ops.len() => {
            let index = results.len();
            let failure = Some(OpFailure { index, op: ops[index].opnum(), status });
            Ok(CompoundReply { tag, status, results, failure })
        }
        None => Err(NfsError::Protocol(format!(
            "{count} successful results for a compound of {} operations with status {status}",
            ops.len()
        ))),
    }
}

/// Sends COMPOUNDs over one RPC connection.
///
/// Holds no state across calls other than the tag counter.
pub struct CompoundEngine {
    rpc: RpcClient,
    tag_prefix: String,
    next_tag: AtomicU64,
}

impl CompoundEngine {
    pub fn new(rpc: RpcClient, tag_prefix: impl Into<String>) -> CompoundEngine {
        CompoundEngine { rpc, tag_prefix: tag_prefix.into(), next_tag: AtomicU64::new(1) }
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Calls the NULL procedure.
    pub async fn null(&self, ctx: &Context) -> NfsResult<()> {
        self.rpc.call(ctx, NFSPROC4_NULL, &()).await?;
        Ok(())
    }

    /// Runs `ops` and fails unless every operation succeeded.
    pub async fn execute(&self, ctx: &Context, ops: Vec<nfs_argop4>) -> NfsResult<Results> {
        self.execute_partial(ctx, ops).await?.into_result()
    }

    /// Runs `ops` and returns whatever the server executed, including the
    /// prefix of results before a failure.
    pub async fn execute_partial(
        &self,
        ctx: &Context,
        ops: Vec<nfs_argop4>,
    ) -> NfsResult<CompoundReply> {
        let tag = format!("{}-{}", self.tag_prefix, self.next_tag.fetch_add(1, Ordering::Relaxed));
        self.execute_tagged(ctx, tag, ops).await
    }

    /// Like [`CompoundEngine::execute_partial`] with a caller-supplied tag.
    pub async fn execute_tagged(
        &self,
        ctx: &Context,
        tag: String,
        ops: Vec<nfs_argop4>,
    ) -> NfsResult<CompoundReply> {
        let opnums: Vec<_> = ops.iter().map(nfs_argop4::opnum).collect();
        debug!(tag = %tag, ops = ?opnums, "compound");
        let args = COMPOUND4args { tag, minorversion: MINOR_VERSION, argarray: ops };
        let mut src = self.rpc.call(ctx, NFSPROC4_COMPOUND, &args).await?;
        let reply = decode_reply(&args.argarray, &mut src)?;
        if reply.tag != args.tag {
            warn!(sent = %args.tag, got = %reply.tag, "server did not echo compound tag");
        }
        if let Some(failure) = &reply.failure {
            debug!(
                tag = %args.tag,
                index = failure.index,
                op = %failure.op,
                status = %failure.status,
                "compound stopped"
            );
        }
        Ok(reply)
    }
}
