//! Unit tests for [`LinkServer`] lifecycle control.

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn options() -> ServerOptions { ServerOptions::default().worker_count(1).magic(0x5A5A) }

#[rstest]
#[tokio::test]
async fn start_and_stop(options: ServerOptions) {
    let mut server = LinkServer::new(options);
    assert!(!server.is_running());
    server.start().await.expect("start");
    assert!(server.is_running());
    assert!(server.local_addr().is_some());
    assert!(matches!(server.start().await, Err(ServerError::AlreadyRunning)));
    server.stop().await.expect("stop");
    assert!(!server.is_running());
    assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
}

#[rstest]
#[tokio::test]
async fn listener_can_be_disabled(options: ServerOptions) {
    let mut server = LinkServer::new(options.enable_listener(false));
    server.start().await.expect("start");
    assert!(server.local_addr().is_none());
    assert!(server.links().is_empty());
    server.stop().await.expect("stop");
}

#[rstest]
#[tokio::test]
async fn invalid_options_are_rejected(options: ServerOptions) {
    let mut server = LinkServer::new(options.worker_count(0));
    assert!(matches!(
        server.start().await,
        Err(ServerError::InvalidOptions(_))
    ));
}

#[rstest]
#[tokio::test]
async fn connect_requires_running_server(options: ServerOptions) {
    let server = LinkServer::new(options);
    let addr = "127.0.0.1:1".parse().expect("addr");
    assert!(matches!(
        server.connect_to_peer(addr, ConnectRequest::default(), 0).await,
        Err(ServerError::NotRunning)
    ));
}

#[rstest]
#[tokio::test]
async fn connect_gives_up_after_retries(options: ServerOptions) {
    let mut server = LinkServer::new(options.enable_listener(false));
    server.start().await.expect("start");
    let unused = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = unused.local_addr().expect("addr");
    drop(unused);
    let err = server
        .connect_to_peer(addr, ConnectRequest::default(), 2)
        .await
        .expect_err("nothing listens");
    assert!(matches!(err, ServerError::Connect { attempts: 3, .. }));
    server.stop().await.expect("stop");
}
