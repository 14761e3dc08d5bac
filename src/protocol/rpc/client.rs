//! The calling side of an RPC connection.

use std::io::{self, Cursor};
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{read_record, write_fragment, Context};
use crate::error::{NfsError, NfsResult};
use crate::protocol::xdr::rpc::{
    accept_body, auth_unix, call_message, opaque_auth, rejected_reply, reply_body, rpc_body,
    rpc_msg,
};
use crate::protocol::xdr::{deserialize, Serialize};

/// Byte stream an [`RpcClient`] runs over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

struct Conn {
    stream: Box<dyn Transport>,
    /// Set while an exchange is on the wire. An exchange abandoned halfway
    /// (cancelled, deadline) leaves it set and the stream desynchronised.
    poisoned: bool,
}

/// RPC client bound to one program and version over one connection.
///
/// Calls from concurrent tasks are serialised: each exchange holds the
/// connection from the first byte written to the last byte of its reply.
pub struct RpcClient {
    conn: Mutex<Conn>,
    next_xid: AtomicU32,
    prog: u32,
    vers: u32,
    cred: opaque_auth,
}

impl RpcClient {
    pub fn new<T>(stream: T, prog: u32, vers: u32, cred: &auth_unix) -> NfsResult<RpcClient>
    where
        T: Transport + 'static,
    {
        let cred = opaque_auth::auth_unix(cred).map_err(NfsError::encode)?;
        // xids only need to differ between outstanding calls of this connection
        let seed = std::process::id().wrapping_mul(0x9e37_79b9);
        Ok(RpcClient {
            conn: Mutex::new(Conn { stream: Box::new(stream), poisoned: false }),
            next_xid: AtomicU32::new(seed),
            prog,
            vers,
            cred,
        })
    }

    /// Issues procedure `proc` with `args` and returns a cursor positioned at
    /// the start of the procedure results.
    pub async fn call<A>(&self, ctx: &Context, proc: u32, args: &A) -> NfsResult<Cursor<Vec<u8>>>
    where
        A: Serialize + ?Sized,
    {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let mut request = Vec::new();
        call_message(xid, self.prog, self.vers, proc, self.cred.clone())
            .serialize(&mut request)
            .map_err(NfsError::encode)?;
        args.serialize(&mut request).map_err(NfsError::encode)?;

        ctx.run(async {
            let mut conn = self.conn.lock().await;
            if conn.poisoned {
                return Err(NfsError::Transport(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "connection abandoned in the middle of an exchange",
                )));
            }
            debug!(xid, proc, len = request.len(), "rpc call");
            conn.poisoned = true;
            write_fragment(&mut conn.stream, &request).await?;
            loop {
                let record = read_record(&mut conn.stream).await?;
                let mut reply = Cursor::new(record);
                let msg = match deserialize::<rpc_msg>(&mut reply) {
                    Ok(msg) => msg,
                    Err(e) => {
                        // The whole record was consumed, framing is intact.
                        conn.poisoned = false;
                        return Err(NfsError::decode(e));
                    }
                };
                if msg.xid != xid {
                    warn!(expected = xid, got = msg.xid, "discarding stale rpc reply");
                    continue;
                }
                conn.poisoned = false;
                check_reply(msg)?;
                return Ok(reply);
            }
        })
        .await
    }

    /// True once an abandoned exchange has left the connection unusable.
    pub async fn is_poisoned(&self) -> bool {
        self.conn.lock().await.poisoned
    }

    /// Shuts down the write half of the transport.
    pub async fn shutdown(&self) -> NfsResult<()> {
        use tokio::io::AsyncWriteExt;

        let mut conn = self.conn.lock().await;
        conn.poisoned = true;
        conn.stream.shutdown().await?;
        Ok(())
    }
}

fn check_reply(msg: rpc_msg) -> NfsResult<()> {
    let reply = match msg.body {
        rpc_body::REPLY(reply) => reply,
        rpc_body::CALL(_) => return Err(NfsError::Protocol("got a CALL instead of a REPLY".into())),
    };
    match reply {
        reply_body::MSG_ACCEPTED(accepted) => match accepted.reply_data {
            accept_body::SUCCESS => Ok(()),
            accept_body::PROG_MISMATCH(info) => Err(NfsError::Rpc(format!(
                "program version mismatch, server supports {}..={}",
                info.low, info.high
            ))),
            other => Err(NfsError::Rpc(format!("call not executed: {other:?}"))),
        },
        reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat)) => {
            Err(NfsError::AuthRejected(stat))
        }
        reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(info)) => Err(NfsError::Rpc(format!(
            "RPC version mismatch, server supports {}..={}",
            info.low, info.high
        ))),
    }
}
