//! File System Utilities module provides helpers shared by the high-level
//! operations: path normalisation and conversion of NFSv4 attributes into
//! [`FileInfo`].

use filetime::FileTime;

use crate::error::{NfsError, NfsResult};
use crate::protocol::nfs::v4::PathKey;
use crate::protocol::xdr::nfs4::attr::Fattr;
use crate::protocol::xdr::nfs4::{nfs_ftype4, nfstime4};
use crate::vfs::FileInfo;

/// Splits a slash-separated path into its components.
///
/// Repeated separators collapse and leading or trailing separators add no
/// empty component, so `"/a/b/c//d"` and `"a/b/c/d/"` both give
/// `["a", "b", "c", "d"]`. `"."` components are dropped; `".."` is rejected
/// because NFSv4 LOOKUP cannot walk upwards.
pub fn split_path(path: &str) -> NfsResult<PathKey> {
    let mut components = PathKey::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(NfsError::InvalidPath(path.to_string())),
            name => components.push(name.to_string()),
        }
    }
    Ok(components)
}

/// Joins a directory path and an entry name with exactly one separator.
pub fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Splits `components` into parent and final name. Fails for the root.
pub fn split_parent<'a>(
    path: &str,
    components: &'a [String],
) -> NfsResult<(&'a [String], &'a str)> {
    match components.split_last() {
        Some((name, parent)) => Ok((parent, name.as_str())),
        None => Err(NfsError::InvalidPath(path.to_string())),
    }
}

/// Converts an NFSv4 timestamp, clamping out-of-range nanoseconds.
pub fn nfstime_to_filetime(time: &nfstime4) -> FileTime {
    FileTime::from_unix_time(time.seconds, time.nseconds.min(999_999_999))
}

/// Builds a [`FileInfo`] snapshot. Attributes the server left out read as
/// zero.
pub fn file_info(name: &str, attrs: &Fattr) -> FileInfo {
    let file_type = attrs.file_type.unwrap_or_default();
    let time = |t: &Option<nfstime4>| {
        t.as_ref().map(nfstime_to_filetime).unwrap_or_else(FileTime::zero)
    };
    FileInfo {
        name: name.to_string(),
        size: attrs.size.unwrap_or(0),
        is_dir: file_type == nfs_ftype4::NF4DIR,
        file_type,
        mode: attrs.mode.unwrap_or(0),
        fileid: attrs.fileid.unwrap_or(0),
        numlinks: attrs.numlinks.unwrap_or(0),
        owner: attrs.owner.clone().unwrap_or_default(),
        owner_group: attrs.owner_group.clone().unwrap_or_default(),
        change: attrs.change.unwrap_or(0),
        atime: time(&attrs.time_access),
        mtime: time(&attrs.time_modify),
        ctime: time(&attrs.time_metadata),
    }
}
