//! One peer connection and its lifecycle.
//!
//! A [`Link`] moves through `Uninitialized → Established → Closed`.
//! [`Link::initialize`] allocates the send queue and scratch buffer, binds the
//! socket to a [`Worker`]'s reactor and takes a [`WorkerRef`] so the worker
//! outlives the link. [`Link::uninitialize`] reverses all of it and is safe to
//! call any number of times from any thread, including while the worker is
//! dispatching events for the same link.
//!
//! The link never polls its own socket. The worker watches it and calls back
//! into the read and write paths in [`io`](self) when it is ready.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::{
    buffer::{DataBuffer, MAX_RECV_BODY_LEN, SharedBuffer},
    error::{Result, TransportError},
    header::{MessageHeader, SentOutcome},
    queue::{LinkedMessageQueue, QueueEntry},
    receive::{InboundMessage, ReceiveState},
    socket::SocketSlot,
    sync::{Mutex, lock},
    worker::{Interest, Worker, WorkerRef},
};

mod counter;
mod io;

pub use counter::active_link_count;
use counter::ActiveLink;
use io::ReadStatus;

/// Size of the per-link scratch buffer small frames are coalesced into.
pub const SCRATCH_LEN: usize = 1024;

/// Identifier assigned to a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(u64);

impl From<u64> for LinkId {
    fn from(value: u64) -> Self { Self(value) }
}

impl LinkId {
    /// Create a new [`LinkId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "LinkId({})", self.0) }
}

/// Lifecycle state of a [`Link`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    /// Created but not yet initialised.
    Uninitialized = 0,
    /// Ready to send and receive.
    Established = 1,
    /// Torn down; every operation fails fast.
    Closed = 2,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Established,
            2 => Self::Closed,
            _ => Self::Uninitialized,
        }
    }
}

/// Application callbacks for link events.
///
/// Callbacks run on the owning worker's thread, except [`on_sent`] with
/// [`SentOutcome::Failed`], which runs on whichever thread tears the link
/// down. They must not block. Calling back into the link, for example to
/// reply from [`on_received`], is allowed.
///
/// [`on_sent`]: LinkHandler::on_sent
/// [`on_received`]: LinkHandler::on_received
pub trait LinkHandler: Send + Sync + 'static {
    /// A complete frame arrived, or the link hit a fatal error and is about
    /// to close.
    fn on_received(&self, link: &Arc<Link>, message: Result<InboundMessage>);

    /// A queued frame was fully written, or dropped at teardown.
    fn on_sent(
        &self,
        _link: &Arc<Link>,
        _outcome: SentOutcome,
        _header: &MessageHeader,
        _context: Option<SharedBuffer>,
    ) {
    }

    /// The link was closed by a failure or by the peer. Fires at most once.
    fn on_broken(&self, _link: &Arc<Link>) {}
}

#[derive(Default)]
struct LinkCore {
    queue: Option<Arc<LinkedMessageQueue>>,
    worker: Option<WorkerRef>,
    worker_index: Option<usize>,
    active: Option<ActiveLink>,
}

/// A single peer connection.
pub struct Link {
    id: LinkId,
    state: AtomicU8,
    peer_addr: Option<SocketAddr>,
    pending: Mutex<Option<std::net::TcpStream>>,
    socket: SocketSlot<TcpStream>,
    core: Mutex<LinkCore>,
    scratch: Mutex<DataBuffer>,
    receive: Mutex<ReceiveState>,
    handler: Arc<dyn LinkHandler>,
    rank: AtomicU64,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr)
            .field("rank", &self.rank())
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Wrap a connected socket.
    ///
    /// The socket is switched to non-blocking mode but not watched by any
    /// worker until [`Link::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the socket cannot be made
    /// non-blocking.
    pub fn new(
        id: LinkId,
        stream: std::net::TcpStream,
        handler: Arc<dyn LinkHandler>,
    ) -> Result<Arc<Self>> {
        stream.set_nonblocking(true)?;
        let peer_addr = stream.peer_addr().ok();
        Ok(Arc::new(Self {
            id,
            state: AtomicU8::new(LinkState::Uninitialized as u8),
            peer_addr,
            pending: Mutex::new(Some(stream)),
            socket: SocketSlot::empty(),
            core: Mutex::new(LinkCore::default()),
            scratch: Mutex::new(DataBuffer::default()),
            receive: Mutex::new(ReceiveState::new()),
            handler,
            rank: AtomicU64::new(0),
        }))
    }

    /// Stable identifier.
    #[must_use]
    pub fn id(&self) -> LinkId { self.id }

    /// Remote address, if the socket reported one.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LinkState { LinkState::from_u8(self.state.load(Ordering::Acquire)) }

    /// Whether the link may send and receive.
    #[must_use]
    pub fn is_established(&self) -> bool { self.state() == LinkState::Established }

    /// Index of the worker serving the link.
    #[must_use]
    pub fn worker_index(&self) -> Option<usize> { lock(&self.core).worker_index }

    /// Rank of the peer process, as announced in its handshake.
    #[must_use]
    pub fn rank(&self) -> u64 { self.rank.load(Ordering::Relaxed) }

    /// Attach the peer's rank.
    pub fn set_rank(&self, rank: u64) { self.rank.store(rank, Ordering::Relaxed); }

    /// Frames waiting to be written.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        lock(&self.core).queue.as_ref().map_or(0, |queue| queue.len())
    }

    /// Allocate link resources and bind the socket to `worker`.
    ///
    /// On failure the link stays `Uninitialized` and nothing acquired during
    /// the call is retained.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidParam`] if `queue_capacity` is out of range,
    ///   the link was already initialised, or it has no socket left.
    /// - [`TransportError::AllocationFailed`] naming the queue or scratch
    ///   buffer.
    /// - [`TransportError::WorkerUnavailable`] if `worker` is shutting down.
    /// - [`TransportError::Io`] if the socket cannot join the worker's
    ///   reactor.
    pub fn initialize(&self, queue_capacity: usize, worker: &Worker) -> Result<()> {
        let mut core = lock(&self.core);
        if self.state() != LinkState::Uninitialized {
            return Err(TransportError::InvalidParam("link already initialized"));
        }
        if worker.is_shutting_down() {
            return Err(TransportError::WorkerUnavailable);
        }
        let queue = LinkedMessageQueue::new(queue_capacity)?;
        let scratch = DataBuffer::with_capacity(SCRATCH_LEN).map_err(|_| {
            TransportError::AllocationFailed {
                resource: "scratch buffer",
            }
        })?;
        // The original descriptor stays pending until the clone is attached.
        let mut pending = lock(&self.pending);
        let stream = pending
            .as_ref()
            .ok_or(TransportError::InvalidParam("link has no socket"))?
            .try_clone()?;
        let stream = worker.register_stream(stream).map_err(|e| {
            if worker.is_shutting_down() {
                TransportError::WorkerUnavailable
            } else {
                e.into()
            }
        })?;
        if self.socket.attach(stream).is_err() {
            return Err(TransportError::InvalidParam("link socket already attached"));
        }
        *pending = None;
        drop(pending);

        *lock(&self.scratch) = scratch;
        *core = LinkCore {
            queue: Some(Arc::new(queue)),
            worker: Some(worker.acquire()),
            worker_index: Some(worker.index()),
            active: Some(ActiveLink::new()),
        };
        self.state
            .store(LinkState::Established as u8, Ordering::Release);
        debug!(link_id = %self.id, worker = worker.index(), peer_addr = ?self.peer_addr, "link established");
        Ok(())
    }

    /// Tear the link down.
    ///
    /// Detaches from the worker, shuts the socket down, reports every frame
    /// still queued as [`SentOutcome::Failed`] and releases the worker
    /// reference. Returns `true` only for the call that performed the
    /// teardown; later calls, and calls on a link that was never
    /// initialised, do nothing.
    pub fn uninitialize(self: &Arc<Self>) -> bool {
        let core = {
            let mut core = lock(&self.core);
            if self.state() != LinkState::Established {
                return false;
            }
            self.state.store(LinkState::Closed as u8, Ordering::Release);
            std::mem::take(&mut *core)
        };
        if let Some(worker) = &core.worker {
            worker.deregister(self.id);
        }
        self.socket.close();
        if let Some(queue) = &core.queue {
            for entry in queue.drain() {
                self.handler
                    .on_sent(self, SentOutcome::Failed, &entry.header, entry.context);
            }
        }
        debug!(link_id = %self.id, peer_addr = ?self.peer_addr, "link closed");
        drop(core);
        *lock(&self.scratch) = DataBuffer::default();
        true
    }

    /// Queue a frame and ask the worker to watch for write readiness.
    ///
    /// `header.body_len` must equal the payload length. When the queue is
    /// full the error is returned and the worker is left alone.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotEstablished`] unless the link is established.
    /// - [`TransportError::InvalidParam`] for a length mismatch or a body
    ///   above [`MAX_RECV_BODY_LEN`].
    /// - [`TransportError::QueueFull`] under backpressure.
    /// - [`TransportError::WorkerUnavailable`] if the worker does not track
    ///   the link yet; the frame stays queued and is written once it does.
    pub fn enqueue_and_notify(
        &self,
        header: MessageHeader,
        payload: Option<SharedBuffer>,
        context: Option<SharedBuffer>,
    ) -> Result<()> {
        if !self.is_established() {
            return Err(TransportError::NotEstablished);
        }
        let payload_len = payload.as_deref().map_or(0, DataBuffer::len);
        if payload_len != header.body_len() {
            return Err(TransportError::InvalidParam(
                "header body length does not match payload",
            ));
        }
        if payload_len > MAX_RECV_BODY_LEN {
            return Err(TransportError::InvalidParam("payload exceeds maximum body length"));
        }

        let core = lock(&self.core);
        let (Some(queue), Some(worker)) = (&core.queue, &core.worker) else {
            return Err(TransportError::NotEstablished);
        };
        if let Err(e) = queue.enqueue_back(QueueEntry::new(header, payload, context)) {
            crate::metrics::inc_queue_full();
            warn!(link_id = %self.id, queued = queue.len(), error = %e, "send queue full");
            return Err(e);
        }
        worker.modify_link(self.id, Interest::READ_WRITE)
    }

    /// Build a header for `payload` and queue the frame.
    ///
    /// # Errors
    ///
    /// As [`Link::enqueue_and_notify`], plus
    /// [`TransportError::AllocationFailed`] if the payload cannot be copied.
    pub fn send(&self, msg_type: i16, seq_no: u32, payload: &[u8]) -> Result<()> {
        self.send_with_result(msg_type, 0, seq_no, payload)
    }

    pub(crate) fn send_with_result(
        &self,
        msg_type: i16,
        result: i16,
        seq_no: u32,
        payload: &[u8],
    ) -> Result<()> {
        let body_len = u32::try_from(payload.len())
            .map_err(|_| TransportError::InvalidParam("payload exceeds maximum body length"))?;
        let header = MessageHeader::new(msg_type, seq_no)
            .with_result(result)
            .with_body_len(body_len);
        let payload = (!payload.is_empty())
            .then(|| DataBuffer::from_slice(payload).map(DataBuffer::into_shared))
            .transpose()?;
        self.enqueue_and_notify(header, payload, None)
    }

    /// Readiness the worker should wait for next.
    pub(crate) fn interest(&self) -> Interest {
        if self.queue_len() > 0 {
            Interest::READ_WRITE
        } else {
            Interest::READ
        }
    }

    pub(crate) fn stream(&self) -> Option<Arc<TcpStream>> { self.socket.get() }

    /// Report `error` (if any) to the handler, close the link and fire
    /// [`LinkHandler::on_broken`] when this call performed the close.
    pub(crate) fn fail(self: &Arc<Self>, error: Option<TransportError>) {
        if let Some(error) = error {
            if !self.is_established() {
                return;
            }
            crate::metrics::inc_errors();
            warn!(link_id = %self.id, peer_addr = ?self.peer_addr, error = %error, "link failed");
            self.handler.on_received(self, Err(error));
        } else {
            debug!(link_id = %self.id, peer_addr = ?self.peer_addr, "peer closed link");
        }
        if self.uninitialize() {
            self.handler.on_broken(self);
        }
    }

    /// Run the read and write paths for a readiness event.
    pub(crate) fn handle_ready(self: &Arc<Self>, readable: bool, writable: bool) {
        if writable {
            if let Err(e) = self.flush() {
                self.fail(Some(e));
                return;
            }
        }
        if readable {
            match self.receive() {
                Ok(ReadStatus::PeerClosed) => self.fail(None),
                Ok(ReadStatus::Pending | ReadStatus::Yielded) => {}
                Err(e) => self.fail(Some(e)),
            }
        }
    }
}
