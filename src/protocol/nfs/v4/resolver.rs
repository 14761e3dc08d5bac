//! Path to file handle resolution.
//!
//! A path is walked in a single COMPOUND: `PUTFH(start)`, one `LOOKUP` per
//! remaining component, `GETFH`, then whatever operations the caller wants
//! to run on the resolved object. The start is the deepest cached ancestor,
//! or the root handle on a miss.
//!
//! The cache only saves round trips. A cached handle the server reports
//! stale is dropped together with everything below it and the walk is
//! repeated once from the root.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{trace, warn};

use super::compound::{CompoundEngine, Results};
use crate::error::{classify, ErrorKind, NfsError, NfsResult};
use crate::protocol::rpc::Context;
use crate::protocol::xdr::nfs4::attr::{self, Fattr, STAT_ATTRS};
use crate::protocol::xdr::nfs4::nfs_fh4;
use crate::protocol::xdr::nfs4::ops::{
    nfs_argop4, nfs_resop4, GETATTR4args, LOOKUP4args, PUTFH4args,
};

/// Normalised path: the sequence of non-empty components.
pub type PathKey = SmallVec<[String; 8]>;

struct CacheEntry {
    fh: nfs_fh4,
    stamp: Instant,
}

/// Path to handle cache with time-based expiry.
///
/// Readers never see a partially updated entry: every entry is replaced
/// whole under the write lock.
pub struct PathCache {
    ttl: Duration,
    entries: RwLock<HashMap<PathKey, CacheEntry>>,
}

impl PathCache {
    /// A zero `ttl` disables caching.
    pub fn new(ttl: Duration) -> PathCache {
        PathCache { ttl, entries: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, path: &[String]) -> Option<nfs_fh4> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(path).filter(|e| e.stamp.elapsed() < self.ttl).map(|e| e.fh.clone())
    }

    /// The deepest fresh cached ancestor of `path` (or `path` itself), as
    /// the number of components it covers and its handle.
    pub fn longest_prefix(&self, path: &[String]) -> Option<(usize, nfs_fh4)> {
        if self.ttl.is_zero() {
            return None;
        }
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        (1..=path.len()).rev().find_map(|len| {
            entries
                .get(&path[..len])
                .filter(|e| e.stamp.elapsed() < self.ttl)
                .map(|e| (len, e.fh.clone()))
        })
    }

    pub fn insert(&self, path: &[String], fh: nfs_fh4) {
        if self.ttl.is_zero() || path.is_empty() {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(path.iter().cloned().collect(), CacheEntry { fh, stamp: Instant::now() });
    }

    /// Drops `path` and every path below it.
    pub fn invalidate(&self, path: &[String]) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|key, _| !key.starts_with(path));
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A resolved object and the results of the operations run on it.
pub struct Walk {
    pub fh: nfs_fh4,
    /// Cursor positioned at the first caller-supplied operation.
    pub results: Results,
}

pub struct Resolver {
    engine: Arc<CompoundEngine>,
    root: nfs_fh4,
    cache: PathCache,
}

impl Resolver {
    pub fn new(engine: Arc<CompoundEngine>, root: nfs_fh4, cache_ttl: Duration) -> Resolver {
        Resolver { engine, root, cache: PathCache::new(cache_ttl) }
    }

    pub fn root(&self) -> &nfs_fh4 {
        &self.root
    }

    pub fn cache(&self) -> &PathCache {
        &self.cache
    }

    /// Resolves `path` and returns its handle and attributes.
    pub async fn resolve(&self, ctx: &Context, path: &[String]) -> NfsResult<(nfs_fh4, Fattr)> {
        let getattr = nfs_argop4::GETATTR(GETATTR4args { attr_request: attr::bitmap(STAT_ATTRS) });
        let mut walk = self.walk(ctx, path, vec![getattr]).await?;
        let attrs = walk.results.next_as("GETATTR", nfs_resop4::into_getattr)?;
        let attrs = Fattr::decode(&attrs).map_err(NfsError::decode)?;
        Ok((walk.fh, attrs))
    }

    /// Resolves `path` to a handle only.
    pub async fn resolve_handle(&self, ctx: &Context, path: &[String]) -> NfsResult<nfs_fh4> {
        if path.is_empty() {
            return Ok(self.root.clone());
        }
        if let Some(fh) = self.cache.get(path) {
            return Ok(fh);
        }
        Ok(self.walk(ctx, path, Vec::new()).await?.fh)
    }

    /// Walks to `path` and runs `tail` on it in the same COMPOUND.
    ///
    /// A failing LOOKUP is reported as [`NfsError::Resolve`] naming the
    /// component; a failure inside `tail` as [`NfsError::Status`].
    pub async fn walk(
        &self,
        ctx: &Context,
        path: &[String],
        tail: Vec<nfs_argop4>,
    ) -> NfsResult<Walk> {
        match self.cache.longest_prefix(path) {
            Some((cached, start)) => {
                match self.walk_from(ctx, start, path, cached, tail.clone()).await {
                    Err(e) if e.is_kind(ErrorKind::StaleHandle) => {
                        warn!(path = ?path, "cached handle is stale, walking from root");
                        self.cache.invalidate(&path[..cached]);
                        self.walk_from(ctx, self.root.clone(), path, 0, tail).await
                    }
                    res => res,
                }
            }
            None => self.walk_from(ctx, self.root.clone(), path, 0, tail).await,
        }
    }

    async fn walk_from(
        &self,
        ctx: &Context,
        start: nfs_fh4,
        path: &[String],
        resolved: usize,
        tail: Vec<nfs_argop4>,
    ) -> NfsResult<Walk> {
        let lookups = &path[resolved..];
        trace!(resolved, remaining = lookups.len(), "walking path");
        let mut ops = Vec::with_capacity(lookups.len() + tail.len() + 2);
        ops.push(nfs_argop4::PUTFH(PUTFH4args { object: start.clone() }));
        ops.extend(
            lookups.iter().map(|name| nfs_argop4::LOOKUP(LOOKUP4args { objname: name.clone() })),
        );
        if !lookups.is_empty() {
            ops.push(nfs_argop4::GETFH);
        }
        ops.extend(tail);

        let reply = self.engine.execute_partial(ctx, ops).await?;
        if let Some(failure) = reply.failure {
            if failure.index >= 1 && failure.index <= lookups.len() {
                let component = lookups[failure.index - 1].clone();
                if classify(failure.status) == ErrorKind::StaleHandle {
                    return Err(failure.into_error());
                }
                return Err(NfsError::Resolve { status: failure.status, component });
            }
            return Err(failure.into_error());
        }

        let mut results = Results::new(reply.results);
        results.skip(1 + lookups.len())?;
        let fh = if lookups.is_empty() {
            start
        } else {
            let fh = results.next_as("GETFH", nfs_resop4::into_getfh)?;
            self.cache.insert(path, fh.clone());
            fh
        };
        Ok(Walk { fh, results })
    }
}
