#![cfg(not(loom))]
//! Link lifecycle against a live worker.

mod common;

use std::{io::Read, sync::Arc};

use common::{WAIT, handler, worker};
use fabriclink::{
    HEADER_LEN,
    Link,
    LinkId,
    LinkState,
    TransportError,
    Worker,
    active_link_count,
};
use fabriclink_testing::{RecordingHandler, connected_link, read_frame, socket_pair};
use rstest::rstest;

#[rstest]
fn ping_reaches_peer(worker: Worker, handler: Arc<RecordingHandler>) {
    let (link, mut peer) = connected_link(&worker, handler.clone(), 10).expect("link");
    assert!(link.is_established());
    link.send(1, 42, b"PING").expect("send");

    let (header, body) = read_frame(&mut peer).expect("frame");
    assert_eq!(header.msg_type, 1);
    assert_eq!(header.seq_no, 42);
    assert_eq!(header.body_len(), 4);
    assert_eq!(body, b"PING");
    assert_eq!(HEADER_LEN + body.len(), 16);

    assert!(handler.wait_for(WAIT, |events| !events.is_empty()));
    assert_eq!(handler.sent().len(), 1);
    assert!(link.uninitialize());

    let mut rest = Vec::new();
    assert_eq!(peer.read_to_end(&mut rest).expect("eof"), 0);
}

#[rstest]
fn references_return_to_zero(worker: Worker, handler: Arc<RecordingHandler>) {
    let links: Vec<_> = (0..8)
        .map(|_| connected_link(&worker, handler.clone(), 4).expect("link").0)
        .collect();
    assert_eq!(worker.ref_count(), 8);
    assert!(active_link_count() >= 8);
    for link in &links {
        assert!(link.uninitialize());
    }
    assert_eq!(worker.ref_count(), 0);
    assert_eq!(handler.broken_count(), 0);
}

#[rstest]
fn uninitialize_is_idempotent(worker: Worker, handler: Arc<RecordingHandler>) {
    let (link, _peer) = connected_link(&worker, handler, 4).expect("link");
    assert!(link.uninitialize());
    assert!(!link.uninitialize());
    assert_eq!(link.state(), LinkState::Closed);
    assert!(matches!(
        link.send(1, 1, b"late"),
        Err(TransportError::NotEstablished)
    ));
    assert!(link.initialize(4, &worker).is_err());
}

#[rstest]
fn concurrent_uninitialize_tears_down_once(worker: Worker, handler: Arc<RecordingHandler>) {
    let (link, _peer) = connected_link(&worker, handler, 4).expect("link");
    let winners: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| usize::from(link.uninitialize())))
            .collect();
        handles.into_iter().map(|h| h.join().expect("join")).sum()
    });
    assert_eq!(winners, 1);
    assert_eq!(worker.ref_count(), 0);
}

#[rstest]
fn full_queue_rejects_without_corruption(worker: Worker, handler: Arc<RecordingHandler>) {
    let (local, mut peer) = socket_pair().expect("pair");
    let link = Link::new(LinkId::new(900), local, handler.clone()).expect("link");
    link.initialize(3, &worker).expect("initialize");

    // Not yet added to the worker, so frames accumulate.
    for seq in 0..3 {
        assert!(matches!(
            link.send(1, seq, b"x"),
            Err(TransportError::WorkerUnavailable)
        ));
    }
    let err = link.send(1, 3, b"x").expect_err("queue is full");
    assert!(err.is_backpressure());
    assert_eq!(link.queue_len(), 3);

    worker.add_link(&link).expect("add");
    for seq in 0..3 {
        let (header, _) = read_frame(&mut peer).expect("frame");
        assert_eq!(header.seq_no, seq);
    }
    assert!(handler.wait_for(WAIT, |events| events.len() == 3));
    assert!(link.uninitialize());
}

#[rstest]
fn queued_frames_fail_at_teardown(worker: Worker, handler: Arc<RecordingHandler>) {
    let (local, _peer) = socket_pair().expect("pair");
    let link = Link::new(LinkId::new(901), local, handler.clone()).expect("link");
    link.initialize(4, &worker).expect("initialize");
    let _ = link.send(5, 1, b"a");
    let _ = link.send(5, 2, b"b");
    assert!(link.uninitialize());

    let sent = handler.sent();
    assert_eq!(sent.len(), 2);
    assert!(
        sent.iter()
            .all(|(outcome, _)| *outcome == fabriclink::SentOutcome::Failed)
    );
}

#[rstest]
fn links_must_be_added_to_their_own_worker(handler: Arc<RecordingHandler>) {
    let first = Worker::spawn(0, Default::default()).expect("spawn");
    let second = Worker::spawn(1, Default::default()).expect("spawn");
    let (local, _peer) = socket_pair().expect("pair");
    let link = Link::new(LinkId::new(902), local, handler).expect("link");
    link.initialize(4, &first).expect("initialize");
    assert!(matches!(
        second.add_link(&link),
        Err(TransportError::InvalidParam(_))
    ));
    assert!(link.uninitialize());
}
