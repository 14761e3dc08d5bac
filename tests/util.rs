use std::io;

use nfs4_client::fs_util::{join_path, split_parent, split_path};
use nfs4_client::tcp::{parse_server_addr, NFS_PORT};
use nfs4_client::{ErrorKind, NfsError};

fn components(path: &str) -> Vec<String> {
    split_path(path).expect("valid path").to_vec()
}

#[test]
fn test_split_path() {
    assert_eq!(components("/a/b/c//d"), ["a", "b", "c", "d"]);
    assert_eq!(components("a/b/c"), ["a", "b", "c"]);
    assert_eq!(components("a/b/c/d/"), ["a", "b", "c", "d"]);
    assert_eq!(components("./a/./b/."), ["a", "b"]);
    assert!(components("").is_empty());
    assert!(components("///").is_empty());
    assert!(components(".").is_empty());

    for path in ["..", "a/../b", "a/b/.."] {
        let err = split_path(path).expect_err("parent reference");
        assert!(matches!(&err, NfsError::InvalidPath(p) if p == path), "{err}");
        assert!(err.is_kind(ErrorKind::InvalidArgument));
    }
}

#[test]
fn test_split_parent() {
    let path = components("dir/sub/file");
    let (parent, name) = split_parent("dir/sub/file", &path).expect("has a parent");
    assert_eq!(parent, ["dir", "sub"]);
    assert_eq!(name, "file");

    let top = components("file");
    let (parent, name) = split_parent("file", &top).expect("top level");
    assert!(parent.is_empty());
    assert_eq!(name, "file");

    let err = split_parent("/", &[]).expect_err("root has no parent");
    assert!(err.is_kind(ErrorKind::InvalidArgument), "{err}");
}

#[test]
fn test_join_path() {
    assert_eq!(join_path("a/b", "c"), "a/b/c");
    assert_eq!(join_path("a/b/", "/c"), "a/b/c");
    assert_eq!(join_path("", "c"), "/c");
}

#[test]
fn test_parse_server_addr() {
    let ok = |server: &str| parse_server_addr(server).expect("valid address");
    assert_eq!(ok("nfs.example"), ("nfs.example".to_string(), NFS_PORT));
    assert_eq!(ok("nfs.example:2050"), ("nfs.example".to_string(), 2050));
    assert_eq!(ok("10.0.0.1:111"), ("10.0.0.1".to_string(), 111));
    assert_eq!(ok("[::1]"), ("::1".to_string(), NFS_PORT));
    assert_eq!(ok("[fe80::1]:2049"), ("fe80::1".to_string(), 2049));
    // Unbracketed IPv6 cannot carry a port.
    assert_eq!(ok("fe80::1"), ("fe80::1".to_string(), NFS_PORT));

    for bad in ["", "host:", "host:65536", "host:port", "[::1", "[::1]2049", "[::1]:"] {
        let err = parse_server_addr(bad).expect_err(bad);
        assert_eq!(err.kind(), io::ErrorKind::AddrNotAvailable, "{bad}");
    }
}
