//! Utilities for exercising [`fabriclink`] links over real loopback sockets.
//!
//! Tests usually build a [`Worker`], wrap one end of a [`socket_pair`] in a
//! [`Link`] with a [`RecordingHandler`], and drive the other end with
//! [`write_frame`] and [`read_frame`]:
//!
//! ```rust
//! use fabriclink::{Worker, config::WorkerOptions};
//! use fabriclink_testing::{RecordingHandler, connected_link, read_frame};
//!
//! let worker = Worker::spawn(0, WorkerOptions::default()).unwrap();
//! let handler = RecordingHandler::new();
//! let (link, mut peer) = connected_link(&worker, handler, 4).unwrap();
//! link.send(1, 7, b"hi").unwrap();
//! let (header, body) = read_frame(&mut peer).unwrap();
//! assert_eq!((header.seq_no, body.as_slice()), (7, &b"hi"[..]));
//! link.uninitialize();
//! ```

pub mod frames;
pub mod logging;
pub mod recording;

pub use frames::{read_frame, socket_pair, write_frame, write_raw};
pub use logging::{LoggerHandle, logger};
pub use recording::{Event, RecordingHandler};

use std::{
    net::TcpStream,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use fabriclink::{Link, LinkHandler, LinkId, Result, Worker};

/// Create an established link on `worker` backed by one end of a fresh
/// loopback pair, returning the link and the raw peer socket.
///
/// # Errors
///
/// Returns any error from [`Link::new`], [`Link::initialize`] or
/// [`Worker::add_link`].
pub fn connected_link(
    worker: &Worker,
    handler: Arc<dyn LinkHandler>,
    queue_capacity: usize,
) -> Result<(Arc<Link>, TcpStream)> {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    let (local, peer) = socket_pair()?;
    let id = LinkId::new(NEXT_ID.fetch_add(1, Ordering::Relaxed));
    let link = Link::new(id, local, handler)?;
    link.initialize(queue_capacity, worker)?;
    worker.add_link(&link)?;
    Ok((link, peer))
}
