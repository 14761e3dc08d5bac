//! The filesystem-shaped interface the client exposes.
//!
//! This module provides:
//! - The [`NfsInterface`] trait: the verbs a test driver or application uses
//! - [`FileInfo`], the attribute snapshot those verbs return
//! - [`remove_recursive`], a depth-first delete written purely against the trait
//!
//! Every verb takes a [`Context`] that bounds the whole call, including all
//! of its round trips. Errors are [`NfsError`]s; branch on them with
//! [`crate::error::is_kind`].

use async_trait::async_trait;
use filetime::FileTime;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::config::DEFAULT_REMOVE_RETRIES;
use crate::error::{ErrorKind, NfsError, NfsResult};
use crate::fs_util::join_path;
use crate::protocol::rpc::Context;
use crate::protocol::xdr::nfs4::nfs_ftype4;

/// Attributes of one filesystem object, as of the call that returned it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    /// Final path component (no directory part)
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub file_type: nfs_ftype4,
    /// Permission bits
    pub mode: u32,
    /// Unique file identifier within the file system (similar to inode number)
    pub fileid: u64,
    pub numlinks: u32,
    pub owner: String,
    pub owner_group: String,
    /// Server change counter, bumps on every modification
    pub change: u64,
    pub atime: FileTime,
    pub mtime: FileTime,
    /// Last metadata change
    pub ctime: FileTime,
}

/// High-level NFS operations.
///
/// Paths are slash-separated and relative to the client's configured root;
/// leading, trailing and repeated slashes are ignored.
#[async_trait]
pub trait NfsInterface: Send + Sync {
    /// Creates a directory and all of its missing ancestors.
    ///
    /// Idempotent: an existing directory, including one created concurrently
    /// by someone else, is not an error.
    async fn make_path(&self, ctx: &Context, path: &str) -> NfsResult<()>;

    /// Removes a file or an empty directory.
    ///
    /// A non-empty directory fails with [`ErrorKind::NotEmpty`].
    async fn delete_file(&self, ctx: &Context, path: &str) -> NfsResult<()>;

    async fn get_file_info(&self, ctx: &Context, path: &str) -> NfsResult<FileInfo>;

    /// Creates or truncates `path` and fills it from `data`.
    ///
    /// # Returns
    ///
    /// The number of bytes written, which is the number of bytes `data` produced.
    async fn rewrite_file(
        &self,
        ctx: &Context,
        path: &str,
        data: &mut (dyn AsyncRead + Unpin + Send),
    ) -> NfsResult<u64>;

    /// Streams the whole content of `path` into `sink`.
    ///
    /// # Returns
    ///
    /// The number of bytes read.
    async fn read_file_all(
        &self,
        ctx: &Context,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> NfsResult<u64>;

    /// Lists a directory. Every entry appears exactly once; `.` and `..`
    /// never appear.
    async fn get_file_list(&self, ctx: &Context, path: &str) -> NfsResult<Vec<FileInfo>>;

    async fn rename(&self, ctx: &Context, from: &str, to: &str) -> NfsResult<()>;

    /// Releases everything the client holds on the server.
    async fn close(&self, ctx: &Context) -> NfsResult<()>;

    /// How many times [`remove_recursive`] re-lists a directory that was
    /// refilled before it could be removed.
    fn remove_retries(&self) -> usize {
        DEFAULT_REMOVE_RETRIES
    }
}

/// Deletes `path` and everything below it, depth first.
///
/// A missing `path` is already removed. Entries that vanish between listing
/// and deletion are skipped; a directory that refills while it is being
/// emptied is listed again, at most [`NfsInterface::remove_retries`] times.
/// Cancellation is checked before every round trip, so an aborted call
/// leaves a smaller but consistent tree.
pub async fn remove_recursive<F>(fs: &F, ctx: &Context, path: &str) -> NfsResult<()>
where
    F: NfsInterface + ?Sized,
{
    ctx.check()?;
    let info = match fs.get_file_info(ctx, path).await {
        Ok(info) => info,
        Err(e) if e.is_kind(ErrorKind::NotFound) => return Ok(()),
        Err(e) => return Err(e),
    };
    remove_entry(fs, ctx, path.to_string(), info.is_dir).await
}

fn remove_entry<'a, F>(
    fs: &'a F,
    ctx: &'a Context,
    path: String,
    is_dir: bool,
) -> BoxFuture<'a, NfsResult<()>>
where
    F: NfsInterface + ?Sized,
{
    Box::pin(async move {
        if !is_dir {
            return ignore_not_found(fs.delete_file(ctx, &path).await);
        }

        let mut relists = 0;
        loop {
            ctx.check()?;
            let children = match fs.get_file_list(ctx, &path).await {
                Ok(children) => children,
                Err(e) if e.is_kind(ErrorKind::NotFound) => return Ok(()),
                Err(e) => return Err(e),
            };
            debug!(path = %path, children = children.len(), "removing directory contents");
            for child in children {
                ctx.check()?;
                remove_entry(fs, ctx, join_path(&path, &child.name), child.is_dir).await?;
            }

            ctx.check()?;
            match fs.delete_file(ctx, &path).await {
                Err(e) if e.is_kind(ErrorKind::NotEmpty) && relists < fs.remove_retries() => {
                    relists += 1;
                    warn!(path = %path, attempt = relists, "directory refilled during removal");
                }
                res => return ignore_not_found(res),
            }
        }
    })
}

fn ignore_not_found(res: NfsResult<()>) -> NfsResult<()> {
    match res {
        Err(e) if e.is_kind(ErrorKind::NotFound) => Ok(()),
        res => res,
    }
}

impl From<NfsError> for std::io::Error {
    fn from(err: NfsError) -> std::io::Error {
        match err {
            NfsError::Transport(e) => e,
            other => {
                let kind = match other.kind() {
                    ErrorKind::NotFound => std::io::ErrorKind::NotFound,
                    ErrorKind::AlreadyExists => std::io::ErrorKind::AlreadyExists,
                    ErrorKind::AccessDenied => std::io::ErrorKind::PermissionDenied,
                    ErrorKind::InvalidArgument => std::io::ErrorKind::InvalidInput,
                    ErrorKind::ProtocolViolation => std::io::ErrorKind::InvalidData,
                    ErrorKind::Transport => std::io::ErrorKind::TimedOut,
                    _ => std::io::ErrorKind::Other,
                };
                std::io::Error::new(kind, other)
            }
        }
    }
}
