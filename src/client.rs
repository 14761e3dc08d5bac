//! The NFSv4.0 client: high-level filesystem verbs over one connection.
//!
//! Every verb follows the same shape: resolve the path (usually inside the
//! same COMPOUND as the operation itself), run the operation, interpret the
//! per-operation status. Verbs that move file content add an OPEN before and
//! a CLOSE after.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use tracing_attributes::instrument;

use crate::config::ClientConfig;
use crate::error::{classify, ErrorKind, NfsError, NfsResult};
use crate::fs_util::{file_info, split_parent, split_path};
use crate::protocol::nfs::v4::state::state_error;
use crate::protocol::nfs::v4::{
    CompoundEngine, OpenHow, OpenState, Resolver, Results, StateManager,
};
use crate::protocol::rpc::{Context, RpcClient, Transport};
use crate::protocol::xdr::nfs4::attr::{self, Fattr, FATTR4_TYPE, FS_ATTRS, STAT_ATTRS};
use crate::protocol::xdr::nfs4::ops::*;
use crate::protocol::xdr::nfs4::{nfs_fh4, nfs_ftype4, nfsstat4, verifier4, PROGRAM, VERSION};
use crate::protocol::xdr::rpc::auth_unix;
use crate::tcp;
use crate::vfs::{self, FileInfo, NfsInterface};

/// Permission bits for directories created by [`NfsClient::make_path`].
pub const DIR_MODE: u32 = 0o755;
/// Permission bits for files created by [`NfsClient::rewrite_file`].
pub const FILE_MODE: u32 = 0o644;

/// Limits negotiated with the server at connect.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ServerLimits {
    /// Lease period in seconds, if the server reported one.
    pub lease_time: Option<u32>,
    /// Bytes requested per READ.
    pub read_chunk: u32,
    /// Bytes sent per WRITE.
    pub write_chunk: u32,
}

impl ServerLimits {
    fn new(config: &ClientConfig, fs: &Fattr) -> ServerLimits {
        let clamp = |server: Option<u64>| {
            let server = server.filter(|&max| max > 0).unwrap_or(u64::MAX);
            u64::from(config.chunk_size).min(server).max(1) as u32
        };
        ServerLimits {
            lease_time: fs.lease_time,
            read_chunk: clamp(fs.maxread),
            write_chunk: clamp(fs.maxwrite),
        }
    }
}

/// An NFSv4.0 client bound to one server connection.
///
/// The client is safe to share between tasks; calls are serialised at the
/// RPC layer. For parallel load, create one client per worker.
pub struct NfsClient {
    config: ClientConfig,
    engine: Arc<CompoundEngine>,
    state: Arc<StateManager>,
    resolver: Resolver,
    limits: ServerLimits,
    renewal: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl NfsClient {
    /// Connects over TCP and bootstraps the client, see
    /// [`NfsClient::with_transport`].
    #[instrument(skip(ctx, config), fields(server = %config.server))]
    pub async fn connect(ctx: &Context, config: ClientConfig) -> NfsResult<NfsClient> {
        let stream = tcp::connect(ctx, &config.server).await?;
        NfsClient::with_transport(ctx, stream, config).await
    }

    /// Bootstraps a client over an already established byte stream.
    ///
    /// Establishes the client identity, resolves the configured root path
    /// from the server's root, reads the lease time and I/O limits and
    /// starts lease renewal.
    pub async fn with_transport<T>(
        ctx: &Context,
        stream: T,
        config: ClientConfig,
    ) -> NfsResult<NfsClient>
    where
        T: Transport + 'static,
    {
        let cred = auth_unix {
            stamp: 0,
            machinename: config.machine_name.clone(),
            uid: config.uid,
            gid: config.gid,
            gids: Vec::new(),
        };
        let rpc = RpcClient::new(stream, PROGRAM, VERSION, &cred)?;
        let engine = Arc::new(CompoundEngine::new(rpc, config.machine_name.clone()));
        let state = Arc::new(StateManager::new(engine.clone(), &config.machine_name));
        state.identify(ctx).await?;

        let (root, fs) = mount_root(&engine, ctx, &config.root_path).await?;
        let limits = ServerLimits::new(&config, &fs);
        info!(
            root = %config.root_path,
            lease = ?limits.lease_time,
            read_chunk = limits.read_chunk,
            write_chunk = limits.write_chunk,
            "client ready"
        );

        let shutdown = CancellationToken::new();
        let renewal = spawn_renewal(
            state.clone(),
            config.renew_interval_for(limits.lease_time),
            shutdown.clone(),
        );
        Ok(NfsClient {
            resolver: Resolver::new(engine.clone(), root, config.cache_ttl),
            config,
            engine,
            state,
            limits,
            renewal: Mutex::new(Some(renewal)),
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn limits(&self) -> ServerLimits {
        self.limits
    }

    pub fn engine(&self) -> &Arc<CompoundEngine> {
        &self.engine
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Calls the NULL procedure.
    pub async fn ping(&self, ctx: &Context) -> NfsResult<()> {
        self.engine.null(ctx).await
    }

    #[instrument(skip(self, ctx))]
    pub async fn make_path(&self, ctx: &Context, path: &str) -> NfsResult<()> {
        let components = split_path(path)?;
        if components.is_empty() {
            return Ok(());
        }
        let (existing, mut fh) = self.probe_dirs(ctx, &components).await?;
        for depth in existing..components.len() {
            ctx.check()?;
            fh = self.create_dir(ctx, &fh, &components[..=depth]).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, ctx))]
    pub async fn delete_file(&self, ctx: &Context, path: &str) -> NfsResult<()> {
        let components = split_path(path)?;
        let (parent, name) = split_parent(path, &components)?;
        let remove = nfs_argop4::REMOVE(REMOVE4args { target: name.to_string() });
        let res = self.resolver.walk(ctx, parent, vec![remove]).await;
        self.resolver.cache().invalidate(&components);
        res?.results.next_as("REMOVE", nfs_resop4::into_remove)?;
        Ok(())
    }

    pub async fn get_file_info(&self, ctx: &Context, path: &str) -> NfsResult<FileInfo> {
        let components = split_path(path)?;
        let (_, attrs) = self.resolver.resolve(ctx, &components).await?;
        let name = components.last().map(String::as_str).unwrap_or_default();
        Ok(file_info(name, &attrs))
    }

    /// Creates or truncates `path` and streams `data` into it with unstable
    /// WRITEs followed by one COMMIT.
    #[instrument(skip(self, ctx, data))]
    pub async fn rewrite_file(
        &self,
        ctx: &Context,
        path: &str,
        data: &mut (dyn AsyncRead + Unpin + Send),
    ) -> NfsResult<u64> {
        let components = split_path(path)?;
        let (parent, name) = split_parent(path, &components)?;
        let how = OpenHow::CreateTruncate { mode: FILE_MODE };
        let mut reopened = false;
        let (dir, mut open) = self.open_in(ctx, parent, name, how, &mut reopened).await?;

        let written = self.write_stream(ctx, &dir, name, &mut open, data, reopened).await;
        let closed = self.state.close(ctx, &open).await;
        let written = written?;
        closed?;
        Ok(written)
    }

    /// Streams the content of `path` into `sink` until the server reports
    /// end of file.
    #[instrument(skip(self, ctx, sink))]
    pub async fn read_file_all(
        &self,
        ctx: &Context,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> NfsResult<u64> {
        let components = split_path(path)?;
        let (parent, name) = split_parent(path, &components)?;
        let mut reopened = false;
        let (dir, mut open) =
            self.open_in(ctx, parent, name, OpenHow::Read, &mut reopened).await?;

        let read = self.read_stream(ctx, &dir, name, &mut open, sink, reopened).await;
        let closed = self.state.close(ctx, &open).await;
        let read = read?;
        closed?;
        Ok(read)
    }

    #[instrument(skip(self, ctx))]
    pub async fn get_file_list(&self, ctx: &Context, path: &str) -> NfsResult<Vec<FileInfo>> {
        let components = split_path(path)?;
        let mut args = READDIR4args {
            cookie: 0,
            cookieverf: [0; 8],
            dircount: self.config.readdir_dircount,
            maxcount: self.config.readdir_maxcount,
            attr_request: attr::bitmap(STAT_ATTRS),
        };

        // The first page rides on the path walk, later pages go straight to the handle.
        let mut walk =
            self.resolver.walk(ctx, &components, vec![nfs_argop4::READDIR(args.clone())]).await?;
        let dir = walk.fh;
        let mut page = walk.results.next_as("READDIR", nfs_resop4::into_readdir)?;

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        loop {
            if page.reply.entries.is_empty() && !page.reply.eof {
                return Err(NfsError::Protocol(format!(
                    "empty READDIR page without eof at cookie {}",
                    args.cookie
                )));
            }
            for entry in page.reply.entries {
                args.cookie = entry.cookie;
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                if !seen.insert(entry.name.clone()) {
                    warn!(name = %entry.name, "server repeated a directory entry");
                    continue;
                }
                let attrs = Fattr::decode(&entry.attrs).map_err(NfsError::decode)?;
                entries.push(file_info(&entry.name, &attrs));
            }
            if page.reply.eof {
                break;
            }

            ctx.check()?;
            args.cookieverf = page.cookieverf;
            trace!(cookie = args.cookie, listed = entries.len(), "next READDIR page");
            let ops = vec![
                nfs_argop4::PUTFH(PUTFH4args { object: dir.clone() }),
                nfs_argop4::READDIR(args.clone()),
            ];
            let mut res = self.engine.execute(ctx, ops).await?;
            res.skip(1)?;
            page = res.next_as("READDIR", nfs_resop4::into_readdir)?;
        }
        debug!(entries = entries.len(), "directory listed");
        Ok(entries)
    }

    /// Renames `from` to `to`, replacing `to` if the server allows it.
    #[instrument(skip(self, ctx))]
    pub async fn rename(&self, ctx: &Context, from: &str, to: &str) -> NfsResult<()> {
        let from_path = split_path(from)?;
        let to_path = split_path(to)?;
        let (from_parent, from_name) = split_parent(from, &from_path)?;
        let (to_parent, to_name) = split_parent(to, &to_path)?;

        let res = match self.rename_once(ctx, from_parent, from_name, to_parent, to_name).await {
            Err(e) if e.is_kind(ErrorKind::StaleHandle) => {
                warn!("stale handle during rename, retrying with fresh handles");
                self.resolver.cache().invalidate(to_parent);
                self.resolver.cache().invalidate(from_parent);
                self.rename_once(ctx, from_parent, from_name, to_parent, to_name).await
            }
            res => res,
        };
        self.resolver.cache().invalidate(&from_path);
        self.resolver.cache().invalidate(&to_path);
        res
    }

    async fn rename_once(
        &self,
        ctx: &Context,
        from_parent: &[String],
        from_name: &str,
        to_parent: &[String],
        to_name: &str,
    ) -> NfsResult<()> {
        let target_dir = self.resolver.resolve_handle(ctx, to_parent).await?;
        let tail = vec![
            nfs_argop4::SAVEFH,
            nfs_argop4::PUTFH(PUTFH4args { object: target_dir }),
            nfs_argop4::RENAME(RENAME4args {
                oldname: from_name.to_string(),
                newname: to_name.to_string(),
            }),
        ];
        let mut walk = self.resolver.walk(ctx, from_parent, tail).await?;
        walk.results.skip(2)?;
        walk.results.next_as("RENAME", nfs_resop4::into_rename)?;
        Ok(())
    }

    /// Removes `path` and everything below it, see [`vfs::remove_recursive`].
    pub async fn remove_recursive(&self, ctx: &Context, path: &str) -> NfsResult<()> {
        vfs::remove_recursive(self, ctx, path).await
    }

    /// Opens an existing file or creates one, for callers that manage state
    /// themselves (byte-range locks). Release it with [`NfsClient::close_file`].
    pub async fn open_file(
        &self,
        ctx: &Context,
        path: &str,
        how: OpenHow,
    ) -> NfsResult<Arc<OpenState>> {
        let components = split_path(path)?;
        let (parent, name) = split_parent(path, &components)?;
        Ok(self.open_in(ctx, parent, name, how, &mut false).await?.1)
    }

    pub async fn close_file(&self, ctx: &Context, open: &OpenState) -> NfsResult<()> {
        self.state.close(ctx, open).await
    }

    pub async fn lock(
        &self,
        ctx: &Context,
        open: &OpenState,
        locktype: nfs_lock_type4,
        offset: u64,
        length: u64,
    ) -> NfsResult<()> {
        self.state.lock(ctx, open, locktype, offset, length).await
    }

    pub async fn unlock(
        &self,
        ctx: &Context,
        open: &OpenState,
        locktype: nfs_lock_type4,
        offset: u64,
        length: u64,
    ) -> NfsResult<()> {
        self.state.unlock(ctx, open, locktype, offset, length).await
    }

    /// Stops lease renewal, closes files still open through
    /// [`NfsClient::open_file`], drops cached handles and shuts the
    /// connection down.
    pub async fn close(&self, ctx: &Context) -> NfsResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();
        let renewal = self.renewal.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(renewal) = renewal {
            if let Err(e) = renewal.await {
                warn!("lease renewal task failed: {e}");
            }
        }
        self.state.close_all(ctx).await;
        self.resolver.cache().clear();
        self.state.forget_identity().await;
        info!("client closed");
        self.engine.rpc().shutdown().await
    }

    /// Finds how many leading components of `path` already exist, checking
    /// that each is a directory. Returns that count and the handle of the
    /// deepest existing one.
    async fn probe_dirs(&self, ctx: &Context, path: &[String]) -> NfsResult<(usize, nfs_fh4)> {
        let cache = self.resolver.cache();
        let Some((cached, start)) = cache.longest_prefix(path) else {
            return self.probe_dirs_from(ctx, path, 0, self.resolver.root().clone()).await;
        };
        match self.probe_dirs_from(ctx, path, cached, start).await {
            Err(e) if e.is_kind(ErrorKind::StaleHandle) => {
                warn!(path = ?path, "cached handle is stale, probing from root");
                cache.invalidate(&path[..cached]);
                self.probe_dirs_from(ctx, path, 0, self.resolver.root().clone()).await
            }
            res => res,
        }
    }

    /// One COMPOUND: `PUTFH(start)`, then `LOOKUP, GETFH` per component and
    /// a final `GETATTR(type)` that only runs when every component exists.
    async fn probe_dirs_from(
        &self,
        ctx: &Context,
        path: &[String],
        resolved: usize,
        start: nfs_fh4,
    ) -> NfsResult<(usize, nfs_fh4)> {
        let rest = &path[resolved..];
        let mut ops = Vec::with_capacity(2 * rest.len() + 2);
        ops.push(nfs_argop4::PUTFH(PUTFH4args { object: start.clone() }));
        for name in rest {
            ops.push(nfs_argop4::LOOKUP(LOOKUP4args { objname: name.clone() }));
            ops.push(nfs_argop4::GETFH);
        }
        ops.push(nfs_argop4::GETATTR(GETATTR4args { attr_request: attr::bitmap(&[FATTR4_TYPE]) }));

        let reply = self.engine.execute_partial(ctx, ops).await?;
        let found = match reply.failure {
            None => rest.len(),
            // LOOKUPs sit at odd indexes; the one at 2k+1 looks up rest[k].
            Some(failure) if failure.index % 2 == 1 && failure.index < 2 * rest.len() => {
                let missing = failure.index / 2;
                match classify(failure.status) {
                    ErrorKind::NotFound => missing,
                    ErrorKind::StaleHandle => return Err(failure.into_error()),
                    _ => {
                        return Err(NfsError::Resolve {
                            status: failure.status,
                            component: rest[missing].clone(),
                        })
                    }
                }
            }
            Some(failure) => return Err(failure.into_error()),
        };

        let mut results = Results::new(reply.results);
        results.skip(1)?;
        let mut fh = start;
        for depth in 0..found {
            results.skip(1)?;
            fh = results.next_as("GETFH", nfs_resop4::into_getfh)?;
            self.resolver.cache().insert(&path[..resolved + depth + 1], fh.clone());
        }
        if found == rest.len() {
            let attrs = results.next_as("GETATTR", nfs_resop4::into_getattr)?;
            ensure_dir(&attrs, path)?;
        }
        Ok((resolved + found, fh))
    }

    /// Creates the last component of `path` under `parent`. Losing a race
    /// with another creator is fine as long as the winner made a directory.
    async fn create_dir(
        &self,
        ctx: &Context,
        parent: &nfs_fh4,
        path: &[String],
    ) -> NfsResult<nfs_fh4> {
        let name = path.last().cloned().unwrap_or_default();
        let createattrs = Fattr { mode: Some(DIR_MODE), ..Fattr::default() }
            .encode()
            .map_err(NfsError::encode)?;
        let ops = vec![
            nfs_argop4::PUTFH(PUTFH4args { object: parent.clone() }),
            nfs_argop4::CREATE(CREATE4args {
                objtype: createtype4::NF4DIR,
                objname: name.clone(),
                createattrs,
            }),
            nfs_argop4::GETFH,
        ];
        let reply = self.engine.execute_partial(ctx, ops).await?;
        let fh = match reply.failure {
            None => {
                let mut results = Results::new(reply.results);
                results.skip(2)?;
                results.next_as("GETFH", nfs_resop4::into_getfh)?
            }
            Some(failure) if failure.index == 1 && failure.status == nfsstat4::NFS4ERR_EXIST => {
                debug!(name = %name, "directory created concurrently");
                let ops = vec![
                    nfs_argop4::PUTFH(PUTFH4args { object: parent.clone() }),
                    nfs_argop4::LOOKUP(LOOKUP4args { objname: name }),
                    nfs_argop4::GETFH,
                    nfs_argop4::GETATTR(GETATTR4args {
                        attr_request: attr::bitmap(&[FATTR4_TYPE]),
                    }),
                ];
                let mut results = self.engine.execute(ctx, ops).await?;
                results.skip(2)?;
                let fh = results.next_as("GETFH", nfs_resop4::into_getfh)?;
                ensure_dir(&results.next_as("GETATTR", nfs_resop4::into_getattr)?, path)?;
                fh
            }
            Some(failure) => return Err(failure.into_error()),
        };
        self.resolver.cache().insert(path, fh.clone());
        Ok(fh)
    }

    /// Opens `name` in the directory at `parent`, re-resolving the directory
    /// once when its cached handle turns out stale.
    ///
    /// Lost client state is re-acquired here unless `reopened` says the call
    /// already did so once.
    async fn open_in(
        &self,
        ctx: &Context,
        parent: &[String],
        name: &str,
        how: OpenHow,
        reopened: &mut bool,
    ) -> NfsResult<(nfs_fh4, Arc<OpenState>)> {
        let mut dir = self.resolver.resolve_handle(ctx, parent).await?;
        let mut resolved_again = false;
        loop {
            match self.state.open(ctx, &dir, name, how.clone()).await {
                Ok((open, _)) => return Ok((dir, open)),
                Err(e)
                    if e.is_kind(ErrorKind::StaleHandle)
                        && !parent.is_empty()
                        && !resolved_again =>
                {
                    warn!(name, "directory handle is stale, resolving again");
                    resolved_again = true;
                    self.resolver.cache().invalidate(parent);
                    dir = self.resolver.resolve_handle(ctx, parent).await?;
                }
                Err(e) if e.is_kind(ErrorKind::StateExpired) && !*reopened => {
                    warn!(name, "client state lost during OPEN, opening again");
                    *reopened = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Replaces `open` with a fresh open of the same file after its state
    /// expired on the server.
    async fn reopen(
        &self,
        ctx: &Context,
        dir: &nfs_fh4,
        name: &str,
        open: &mut Arc<OpenState>,
        how: OpenHow,
    ) -> NfsResult<()> {
        warn!(name, "open state expired, opening again");
        if let Err(e) = self.state.close(ctx, open).await {
            debug!("closing expired state failed: {e}");
        }
        *open = self.state.open(ctx, dir, name, how).await?.0;
        Ok(())
    }

    async fn write_stream(
        &self,
        ctx: &Context,
        dir: &nfs_fh4,
        name: &str,
        open: &mut Arc<OpenState>,
        data: &mut (dyn AsyncRead + Unpin + Send),
        mut reopened: bool,
    ) -> NfsResult<u64> {
        let mut buf = vec![0u8; self.limits.write_chunk as usize];
        let mut offset = 0u64;
        let mut verifier: Option<verifier4> = None;
        let mut unstable = false;
        loop {
            ctx.check()?;
            let len = fill(data, &mut buf).await?;
            if len == 0 {
                break;
            }
            let resok = loop {
                match self.write_chunk(ctx, open, offset, &buf[..len]).await {
                    Err(e) if e.is_kind(ErrorKind::StateExpired) && !reopened => {
                        reopened = true;
                        self.reopen(ctx, dir, name, open, OpenHow::Write).await?;
                    }
                    res => break res?,
                };
            };
            if resok.count as usize != len {
                return Err(NfsError::Protocol(format!(
                    "WRITE at offset {offset} accepted {} of {len} bytes",
                    resok.count
                )));
            }
            match verifier {
                Some(v) if v != resok.writeverf => {
                    return Err(NfsError::Io(format!(
                        "write verifier changed at offset {offset}, server restarted"
                    )))
                }
                _ => verifier = Some(resok.writeverf),
            }
            unstable |= resok.committed < stable_how4::FILE_SYNC4;
            offset += len as u64;
            if len < buf.len() {
                break;
            }
        }

        if unstable {
            ctx.check()?;
            let committed = self.commit(ctx, open).await?;
            if Some(committed) != verifier {
                return Err(NfsError::Io(
                    "write verifier changed before COMMIT, server restarted".into(),
                ));
            }
        }
        Ok(offset)
    }

    async fn write_chunk(
        &self,
        ctx: &Context,
        open: &OpenState,
        offset: u64,
        data: &[u8],
    ) -> NfsResult<WRITE4resok> {
        open.ensure_valid()?;
        let ops = vec![
            nfs_argop4::PUTFH(PUTFH4args { object: open.fh().clone() }),
            nfs_argop4::WRITE(WRITE4args {
                stateid: open.stateid(),
                offset,
                stable: stable_how4::UNSTABLE4,
                data: data.to_vec(),
            }),
        ];
        let mut results = self.run_with_state(ctx, open, ops).await?;
        results.skip(1)?;
        results.next_as("WRITE", nfs_resop4::into_write)
    }

    async fn commit(&self, ctx: &Context, open: &OpenState) -> NfsResult<verifier4> {
        let ops = vec![
            nfs_argop4::PUTFH(PUTFH4args { object: open.fh().clone() }),
            nfs_argop4::COMMIT(COMMIT4args { offset: 0, count: 0 }),
        ];
        let mut results = self.run_with_state(ctx, open, ops).await?;
        results.skip(1)?;
        results.next_as("COMMIT", nfs_resop4::into_commit)
    }

    async fn read_stream(
        &self,
        ctx: &Context,
        dir: &nfs_fh4,
        name: &str,
        open: &mut Arc<OpenState>,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        mut reopened: bool,
    ) -> NfsResult<u64> {
        let count = self.limits.read_chunk;
        let mut offset = 0u64;
        loop {
            ctx.check()?;
            let resok = loop {
                match self.read_chunk(ctx, open, offset, count).await {
                    Err(e) if e.is_kind(ErrorKind::StateExpired) && !reopened => {
                        reopened = true;
                        self.reopen(ctx, dir, name, open, OpenHow::Read).await?;
                    }
                    res => break res?,
                };
            };
            if resok.data.len() > count as usize {
                return Err(NfsError::Protocol(format!(
                    "READ returned {} bytes, {count} requested",
                    resok.data.len()
                )));
            }
            if resok.data.is_empty() && !resok.eof {
                return Err(NfsError::Protocol(format!(
                    "empty READ without eof at offset {offset}"
                )));
            }
            sink.write_all(&resok.data).await.map_err(sink_error)?;
            offset += resok.data.len() as u64;
            if resok.eof {
                break;
            }
        }
        sink.flush().await.map_err(sink_error)?;
        Ok(offset)
    }

    async fn read_chunk(
        &self,
        ctx: &Context,
        open: &OpenState,
        offset: u64,
        count: u32,
    ) -> NfsResult<READ4resok> {
        open.ensure_valid()?;
        let ops = vec![
            nfs_argop4::PUTFH(PUTFH4args { object: open.fh().clone() }),
            nfs_argop4::READ(READ4args { stateid: open.stateid(), offset, count }),
        ];
        let mut results = self.run_with_state(ctx, open, ops).await?;
        results.skip(1)?;
        results.next_as("READ", nfs_resop4::into_read)
    }

    /// Runs a compound that uses `open`'s stateid without consuming a seqid.
    async fn run_with_state(
        &self,
        ctx: &Context,
        open: &OpenState,
        ops: Vec<nfs_argop4>,
    ) -> NfsResult<Results> {
        let reply = self.engine.execute_partial(ctx, ops).await?;
        match reply.failure {
            None => Ok(Results::new(reply.results)),
            Some(failure) => {
                self.state.report_failure(open, failure.status).await;
                Err(state_error(failure))
            }
        }
    }
}

impl Drop for NfsClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl NfsInterface for NfsClient {
    async fn make_path(&self, ctx: &Context, path: &str) -> NfsResult<()> {
        NfsClient::make_path(self, ctx, path).await
    }

    async fn delete_file(&self, ctx: &Context, path: &str) -> NfsResult<()> {
        NfsClient::delete_file(self, ctx, path).await
    }

    async fn get_file_info(&self, ctx: &Context, path: &str) -> NfsResult<FileInfo> {
        NfsClient::get_file_info(self, ctx, path).await
    }

    async fn rewrite_file(
        &self,
        ctx: &Context,
        path: &str,
        data: &mut (dyn AsyncRead + Unpin + Send),
    ) -> NfsResult<u64> {
        NfsClient::rewrite_file(self, ctx, path, data).await
    }

    async fn read_file_all(
        &self,
        ctx: &Context,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> NfsResult<u64> {
        NfsClient::read_file_all(self, ctx, path, sink).await
    }

    async fn get_file_list(&self, ctx: &Context, path: &str) -> NfsResult<Vec<FileInfo>> {
        NfsClient::get_file_list(self, ctx, path).await
    }

    async fn rename(&self, ctx: &Context, from: &str, to: &str) -> NfsResult<()> {
        NfsClient::rename(self, ctx, from, to).await
    }

    async fn close(&self, ctx: &Context) -> NfsResult<()> {
        NfsClient::close(self, ctx).await
    }

    fn remove_retries(&self) -> usize {
        self.config.remove_retries
    }
}

/// Runs `PUTROOTFH, LOOKUP..., GETFH, GETATTR(fs limits)` and returns the
/// root handle with the filesystem attributes.
async fn mount_root(
    engine: &CompoundEngine,
    ctx: &Context,
    root_path: &str,
) -> NfsResult<(nfs_fh4, Fattr)> {
    let components = split_path(root_path)?;
    let mut ops = Vec::with_capacity(components.len() + 3);
    ops.push(nfs_argop4::PUTROOTFH);
    ops.extend(
        components.iter().map(|name| nfs_argop4::LOOKUP(LOOKUP4args { objname: name.clone() })),
    );
    ops.push(nfs_argop4::GETFH);
    ops.push(nfs_argop4::GETATTR(GETATTR4args { attr_request: attr::bitmap(FS_ATTRS) }));

    let reply = engine.execute_partial(ctx, ops).await?;
    if let Some(failure) = reply.failure {
        if failure.index >= 1 && failure.index <= components.len() {
            return Err(NfsError::Resolve {
                status: failure.status,
                component: components[failure.index - 1].clone(),
            });
        }
        return Err(failure.into_error());
    }
    let mut results = Results::new(reply.results);
    results.skip(1 + components.len())?;
    let root = results.next_as("GETFH", nfs_resop4::into_getfh)?;
    let attrs = results.next_as("GETATTR", nfs_resop4::into_getattr)?;
    Ok((root, Fattr::decode(&attrs).map_err(NfsError::decode)?))
}

fn spawn_renewal(
    state: Arc<StateManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let ctx = Context::new().with_cancellation(shutdown.child_token());
            match state.renew(&ctx).await {
                Ok(()) => trace!("lease renewed"),
                Err(NfsError::Cancelled) => break,
                Err(e) => warn!("lease renewal failed: {e}"),
            }
        }
        debug!("lease renewal stopped");
    })
}

fn ensure_dir(attrs: &crate::protocol::xdr::nfs4::fattr4, path: &[String]) -> NfsResult<()> {
    let attrs = Fattr::decode(attrs).map_err(NfsError::decode)?;
    if attrs.file_type == Some(nfs_ftype4::NF4DIR) {
        return Ok(());
    }
    Err(NfsError::Resolve {
        status: nfsstat4::NFS4ERR_NOTDIR,
        component: path.last().cloned().unwrap_or_default(),
    })
}

/// Reads from `src` until `buf` is full or the source is exhausted.
async fn fill(src: &mut (dyn AsyncRead + Unpin + Send), buf: &mut [u8]) -> NfsResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]).await.map_err(source_error)? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn source_error(err: std::io::Error) -> NfsError {
    NfsError::Io(format!("reading data source: {err}"))
}

fn sink_error(err: std::io::Error) -> NfsError {
    NfsError::Io(format!("writing data sink: {err}"))
}
