#![cfg(not(loom))]
//! End-to-end tests for `LinkServer`: handshake, routing and callbacks.

use std::{net::SocketAddr, time::Duration};

use fabriclink::{
    ConnectRequest,
    HEADER_LEN,
    HandshakeError,
    MessageHeader,
    SentOutcome,
    config::ServerOptions,
    handshake::{self, REJECT_BAD_MAGIC, REJECT_VERSION},
    server::{LinkServer, ServerError},
};
use rstest::{fixture, rstest};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    time::timeout,
};

const MAGIC: u16 = 0xACC1;
const ECHO: i16 = 1;
const WAIT: Duration = Duration::from_secs(5);

#[fixture]
fn options() -> ServerOptions {
    ServerOptions::default()
        .listen_addr("127.0.0.1:0".parse().expect("addr"))
        .worker_count(2)
        .magic(MAGIC)
        .version(1)
        .poll_timeout(Duration::from_millis(50))
}

fn request(rank_id: u64) -> ConnectRequest {
    ConnectRequest {
        magic: MAGIC,
        version: 1,
        rank_id,
    }
}

async fn echo_server(options: ServerOptions) -> LinkServer {
    let mut server = LinkServer::new(options).on_request(ECHO, |req| {
        req.reply(7, req.body()).expect("reply");
    });
    server.start().await.expect("start");
    server
}

async fn raw_client(addr: SocketAddr, req: ConnectRequest) -> Result<TcpStream, HandshakeError> {
    let mut stream = TcpStream::connect(addr).await?;
    handshake::connect(&mut stream, &req, WAIT).await?;
    Ok(stream)
}

async fn read_frame(stream: &mut TcpStream) -> (MessageHeader, Vec<u8>) {
    let mut header = [0u8; HEADER_LEN];
    timeout(WAIT, stream.read_exact(&mut header))
        .await
        .expect("frame in time")
        .expect("header");
    let header = MessageHeader::decode(header);
    let mut body = vec![0u8; header.body_len()];
    stream.read_exact(&mut body).await.expect("body");
    (header, body)
}

#[rstest]
#[tokio::test]
async fn raw_peer_gets_echo(options: ServerOptions) {
    let mut server = echo_server(options).await;
    let addr = server.local_addr().expect("listening");
    let mut client = raw_client(addr, request(3)).await.expect("handshake");

    let header = MessageHeader::new(ECHO, 99).with_body_len(4);
    client.write_all(&header.to_bytes()).await.expect("write");
    client.write_all(b"PING").await.expect("write");

    let (reply, body) = read_frame(&mut client).await;
    assert_eq!((reply.msg_type, reply.seq_no, reply.result), (ECHO, 99, 7));
    assert_eq!(body, b"PING");

    let links = server.links();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].rank(), 3);
    assert!(server.link(links[0].id()).is_some());
    server.stop().await.expect("stop");
}

#[rstest]
#[tokio::test]
async fn two_servers_talk_through_links(options: ServerOptions) {
    let mut server = echo_server(options.clone()).await;
    let addr = server.local_addr().expect("listening");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
    let mut client = LinkServer::new(options.enable_listener(false))
        .on_request(ECHO, move |reply| {
            let _ = tx.send((reply.seq_no(), reply.into_body().as_slice().to_vec()));
        })
        .on_request_sent(ECHO, move |outcome, header, _| {
            let _ = sent_tx.send((outcome, header.seq_no));
        });
    client.start().await.expect("start");

    let link = client
        .connect_to_peer(addr, request(8), 2)
        .await
        .expect("connect");
    link.send(ECHO, 5, b"over the fabric").expect("send");

    let (seq, body) = timeout(WAIT, rx.recv()).await.expect("reply in time").expect("reply");
    assert_eq!(seq, 5);
    assert_eq!(body, b"over the fabric");
    assert_eq!(
        timeout(WAIT, sent_rx.recv()).await.expect("in time"),
        Some((SentOutcome::Sent, 5))
    );

    client.stop().await.expect("stop");
    server.stop().await.expect("stop");
}

#[rstest]
#[tokio::test]
async fn bad_magic_is_rejected(options: ServerOptions) {
    let mut server = echo_server(options).await;
    let addr = server.local_addr().expect("listening");
    let mut bad = request(1);
    bad.magic = 0xBEEF;
    let err = raw_client(addr, bad).await.expect_err("rejected");
    assert!(matches!(err, HandshakeError::Rejected(REJECT_BAD_MAGIC)));
    assert!(server.links().is_empty());
    server.stop().await.expect("stop");
}

#[rstest]
#[tokio::test]
async fn version_mismatch_surfaces_through_connect(options: ServerOptions) {
    let mut server = echo_server(options.clone()).await;
    let addr = server.local_addr().expect("listening");
    let mut client = LinkServer::new(options.enable_listener(false));
    client.start().await.expect("start");

    let mut req = request(1);
    req.version = 9;
    let err = client.connect_to_peer(addr, req, 0).await.expect_err("rejected");
    assert!(matches!(
        err,
        ServerError::Handshake(HandshakeError::Rejected(REJECT_VERSION))
    ));
    client.stop().await.expect("stop");
    server.stop().await.expect("stop");
}

#[rstest]
#[tokio::test]
async fn new_link_handler_can_refuse(options: ServerOptions) {
    let mut server = LinkServer::new(options).on_new_link(|req, _link| {
        if req.rank_id == 13 {
            Err("unlucky rank".into())
        } else {
            Ok(())
        }
    });
    server.start().await.expect("start");
    let addr = server.local_addr().expect("listening");

    let mut refused = raw_client(addr, request(13)).await.expect("handshake");
    let mut buf = [0u8; 1];
    let n = timeout(WAIT, refused.read(&mut buf))
        .await
        .expect("closed in time")
        .unwrap_or(0);
    assert_eq!(n, 0);

    let _kept = raw_client(addr, request(14)).await.expect("handshake");
    timeout(WAIT, async {
        while server.links().len() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("link registered");
    assert_eq!(server.links()[0].rank(), 14);
    server.stop().await.expect("stop");
}

#[rstest]
#[tokio::test]
async fn broken_links_are_reported_and_forgotten(options: ServerOptions) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut server = LinkServer::new(options).on_link_broken(move |link| {
        let _ = tx.send(link.rank());
    });
    server.start().await.expect("start");
    let addr = server.local_addr().expect("listening");

    let client = raw_client(addr, request(21)).await.expect("handshake");
    timeout(WAIT, async {
        while server.links().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("link registered");
    drop(client);

    assert_eq!(timeout(WAIT, rx.recv()).await.expect("in time"), Some(21));
    assert!(server.links().is_empty());
    server.stop().await.expect("stop");
}

#[rstest]
#[tokio::test]
async fn stop_closes_every_link(options: ServerOptions) {
    let mut server = echo_server(options).await;
    let addr = server.local_addr().expect("listening");
    let mut clients = Vec::new();
    for rank in 0..4 {
        clients.push(raw_client(addr, request(rank)).await.expect("handshake"));
    }
    timeout(WAIT, async {
        while server.links().len() != 4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("links registered");

    let links = server.links();
    server.stop().await.expect("stop");
    assert!(links.iter().all(|link| !link.is_established()));
    for client in &mut clients {
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap_or(0), 0);
    }
}
