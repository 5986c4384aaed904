#![doc(html_root_url = "https://docs.rs/fabriclink/latest")]
//! Control-plane TCP transport for memory-fabric peers.
//!
//! The crate moves small framed control messages between processes. Its
//! building blocks, leaves first:
//!
//! - [`DataBuffer`]: capped, growable payload storage.
//! - [`MessageHeader`] and [`ReceiveState`]: the wire frame and its
//!   partial-read reassembly.
//! - [`LinkedMessageQueue`]: bounded FIFO of outbound frames.
//! - [`Link`]: one peer connection and its lifecycle.
//! - [`Worker`]: a readiness-driven event loop serving many links.
//! - [`LinkServer`](server::LinkServer): a worker pool with listener,
//!   handshake and request routing.

pub mod buffer;
#[cfg(not(loom))]
pub mod config;
#[cfg(not(loom))]
pub mod context;
pub mod error;
pub mod handshake;
pub mod header;
#[cfg(not(loom))]
pub mod link;
pub mod metrics;
pub mod panic;
pub mod queue;
pub mod receive;
#[cfg(not(loom))]
pub mod server;
pub mod socket;
mod sync;
#[cfg(not(loom))]
pub mod worker;

pub use buffer::{DataBuffer, MAX_RECV_BODY_LEN, SharedBuffer};
#[cfg(not(loom))]
pub use context::RequestContext;
pub use error::{FramingError, Result, TransportError};
pub use handshake::{ConnectRequest, ConnectResponse, HandshakeError};
pub use header::{HEADER_LEN, MessageHeader, SentOutcome};
#[cfg(not(loom))]
pub use link::{Link, LinkHandler, LinkId, LinkState, active_link_count};
pub use metrics::{Direction, ERRORS_TOTAL, FRAMES_PROCESSED, LINKS_ACTIVE, QUEUE_FULL_TOTAL};
pub use queue::{LinkedMessageQueue, MAX_SEND_QUEUE_CAP, QueueEntry};
pub use receive::{InboundMessage, ReceiveState};
pub use socket::{GracefulClose, SocketSlot};
#[cfg(not(loom))]
pub use worker::{Interest, Worker, WorkerRef};
