//! NFS protocol implementation module.
//!
//! - `v4`: the NFS version 4.0 protocol as specified in RFC 7530. Version 4
//!   folds the MOUNT and locking side protocols of earlier versions into the
//!   main program, so no PORTMAP or MOUNT client is needed: the server is
//!   reached on a well-known port and the root handle comes from PUTROOTFH.

pub mod v4;
