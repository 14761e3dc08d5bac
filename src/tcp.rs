//! The TCP module opens the byte stream the client speaks RPC over.
//!
//! NFSv4 needs no portmapper: the server listens on a well-known port
//! (2049) unless the address names another one.

use std::io;

use tokio::net::TcpStream;
use tracing::info;

use crate::error::{NfsError, NfsResult};
use crate::protocol::rpc::Context;

/// Well-known NFS port.
pub const NFS_PORT: u16 = 2049;

/// Splits a server address into host and port.
///
/// # Arguments
///
/// * `server` - `host`, `host:port`, `[v6addr]` or `[v6addr]:port`.
///   A bare IPv6 address without brackets is taken as a host with the default port.
pub fn parse_server_addr(server: &str) -> io::Result<(String, u16)> {
    let bad_port =
        || io::Error::new(io::ErrorKind::AddrNotAvailable, "Port not in range 0..=65535");

    if let Some(rest) = server.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "Unterminated IPv6 address")
        })?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse::<u16>().map_err(|_| bad_port())?,
            None if tail.is_empty() => NFS_PORT,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "Unexpected text after IPv6 address",
                ))
            }
        };
        return Ok((host.to_string(), port));
    }

    match server.split_once(':') {
        Some((host, port)) if !port.contains(':') => {
            Ok((host.to_string(), port.parse::<u16>().map_err(|_| bad_port())?))
        }
        _ if server.is_empty() => {
            Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "Empty server address"))
        }
        _ => Ok((server.to_string(), NFS_PORT)),
    }
}

/// Connects to the NFS server with Nagle's algorithm disabled: every RPC
/// record is a complete request and should leave immediately.
///
/// # Arguments
///
/// * `ctx` - bounds the connection attempt
/// * `server` - server address, see [`parse_server_addr`]
pub async fn connect(ctx: &Context, server: &str) -> NfsResult<TcpStream> {
    let (host, port) = parse_server_addr(server)?;
    let socket = ctx
        .run(async {
            TcpStream::connect((host.as_str(), port)).await.map_err(NfsError::Transport)
        })
        .await?;
    socket.set_nodelay(true)?;
    info!("Connected to {}:{}", host, port);
    Ok(socket)
}
