use std::time::Duration;

mod support;

use tokio::io::{duplex, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use nfs4_client::protocol::rpc::{
    read_record, write_fragment, Context, RpcClient, MAX_RPC_RECORD_LENGTH,
};
use nfs4_client::xdr::nfs4::{PROGRAM, VERSION};
use nfs4_client::xdr::rpc::{auth_stat, auth_unix};
use nfs4_client::{ErrorKind, NfsError};

use support::TestServer;

fn rpc_client(server: &TestServer) -> RpcClient {
    let cred = auth_unix { machinename: "rpc-test".into(), ..auth_unix::default() };
    RpcClient::new(server.connect(), PROGRAM, VERSION, &cred).expect("rpc client")
}

#[tokio::test]
async fn rejects_oversized_rpc_fragment() {
    let (mut reader, mut writer) = duplex(64);

    let oversized = MAX_RPC_RECORD_LENGTH + 1;
    let fragment_header = (1_u32 << 31) | (oversized as u32);
    writer.write_all(&fragment_header.to_be_bytes()).await.expect("write fragment header");

    let err = read_record(&mut reader).await.expect_err("expected oversize error");
    assert!(err.to_string().contains("exceeds max"), "unexpected error: {err:?}");
}

#[tokio::test]
async fn reassembles_multi_fragment_record() {
    let (mut reader, mut writer) = duplex(1024);

    writer.write_all(&3u32.to_be_bytes()).await.expect("header");
    writer.write_all(b"abc").await.expect("body");
    writer.write_all(&((1u32 << 31) | 2).to_be_bytes()).await.expect("header");
    writer.write_all(b"de").await.expect("body");

    assert_eq!(read_record(&mut reader).await.expect("record"), b"abcde");
}

#[tokio::test]
async fn empty_record_round_trip() {
    let (mut reader, mut writer) = duplex(64);
    write_fragment(&mut writer, &[]).await.expect("write");
    assert!(read_record(&mut reader).await.expect("record").is_empty());
}

#[tokio::test]
async fn null_call_round_trip() {
    let server = TestServer::new();
    let rpc = rpc_client(&server);
    let reply = rpc.call(&Context::new(), 0, &()).await.expect("NULL");
    assert_eq!(reply.get_ref().len() as u64, reply.position(), "NULL reply has no body");
}

#[tokio::test]
async fn discards_stale_reply() {
    let server = TestServer::new();
    let rpc = rpc_client(&server);
    server.set(|opts| opts.stale_reply_first = true);

    rpc.call(&Context::new(), 0, &()).await.expect("NULL after stale reply");
    assert!(!rpc.is_poisoned().await);
}

#[tokio::test]
async fn unknown_procedure_is_rejected() {
    let server = TestServer::new();
    let rpc = rpc_client(&server);

    let err = rpc.call(&Context::new(), 7, &()).await.expect_err("PROC_UNAVAIL");
    assert!(matches!(err, NfsError::Rpc(_)), "{err}");
    assert!(err.is_kind(ErrorKind::ProtocolViolation));
    // The exchange completed, the connection stays usable.
    rpc.call(&Context::new(), 0, &()).await.expect("NULL");
}

#[tokio::test]
async fn auth_rejection_maps_to_access_denied() {
    let server = TestServer::new();
    let rpc = rpc_client(&server);
    server.set(|opts| opts.reject_auth = true);

    let err = rpc.call(&Context::new(), 0, &()).await.expect_err("denied");
    assert!(matches!(err, NfsError::AuthRejected(auth_stat::AUTH_TOOWEAK)), "{err}");
    assert!(err.is_kind(ErrorKind::AccessDenied));
}

#[tokio::test]
async fn deadline_abandons_and_poisons_connection() {
    let server = TestServer::new();
    let rpc = rpc_client(&server);
    server.set(|opts| opts.stall = true);

    let ctx = Context::new().with_timeout(Duration::from_millis(50));
    let err = rpc.call(&ctx, 0, &()).await.expect_err("deadline");
    assert!(matches!(err, NfsError::DeadlineExceeded), "{err}");
    assert!(err.is_kind(ErrorKind::Transport));
    assert!(rpc.is_poisoned().await);

    // A late reply could no longer be told apart from the next one.
    server.set(|opts| opts.stall = false);
    let err = rpc.call(&Context::new(), 0, &()).await.expect_err("poisoned");
    assert!(err.is_kind(ErrorKind::Transport), "{err}");
}

#[tokio::test]
async fn cancelled_context_fails_before_sending() {
    let server = TestServer::new();
    let rpc = rpc_client(&server);
    let token = CancellationToken::new();
    token.cancel();

    let ctx = Context::new().with_cancellation(token);
    let err = rpc.call(&ctx, 0, &()).await.expect_err("cancelled");
    assert!(matches!(err, NfsError::Cancelled), "{err}");
    assert!(!rpc.is_poisoned().await, "nothing was written");
    assert_eq!(server.stats().compounds, 0);
}

#[tokio::test]
async fn cancellation_interrupts_waiting_call() {
    let server = TestServer::new();
    let rpc = rpc_client(&server);
    server.set(|opts| opts.stall = true);

    let token = CancellationToken::new();
    let ctx = Context::new().with_cancellation(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let err = rpc.call(&ctx, 0, &()).await.expect_err("cancelled");
    assert!(matches!(err, NfsError::Cancelled), "{err}");
    canceller.await.expect("canceller");
}

#[tokio::test]
async fn undecodable_reply_leaves_connection_usable() {
    let server = TestServer::new();
    let (client, mut peer) = duplex(1 << 16);
    let backend = server.clone();
    let responder = tokio::spawn(async move {
        // The first call gets a record too short for an RPC header.
        read_record(&mut peer).await.expect("first call");
        write_fragment(&mut peer, &[0, 0, 0, 1]).await.expect("garbage");

        let record = read_record(&mut peer).await.expect("second call");
        let replies = backend.state().handle_record(&record);
        for reply in replies {
            write_fragment(&mut peer, &reply).await.expect("reply");
        }
    });
    let rpc = RpcClient::new(client, PROGRAM, VERSION, &auth_unix::default()).expect("rpc client");

    let err = rpc.call(&Context::new(), 0, &()).await.expect_err("malformed");
    assert!(err.is_kind(ErrorKind::ProtocolViolation), "{err}");
    assert!(!rpc.is_poisoned().await, "the record was read in full");

    rpc.call(&Context::new(), 0, &()).await.expect("NULL after malformed reply");
    responder.await.expect("responder");
}

#[tokio::test]
async fn closed_peer_is_a_transport_error() {
    let (client, server) = duplex(1024);
    drop(server);
    let rpc = RpcClient::new(client, PROGRAM, VERSION, &auth_unix::default()).expect("rpc client");

    let err = rpc.call(&Context::new(), 0, &()).await.expect_err("peer gone");
    assert!(err.is_kind(ErrorKind::Transport), "{err}");
}
