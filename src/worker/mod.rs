//! Readiness-driven worker owning a set of links.
//!
//! Each [`Worker`] runs one event loop on a dedicated OS thread. The thread
//! drives a current-thread tokio runtime whose reactor is the readiness
//! facility. Links bind their sockets to that reactor in
//! [`Link::initialize`](crate::link::Link::initialize) and are then registered
//! with [`Worker::add_link`].
//!
//! Interest is explicit: the loop waits for exactly the [`Interest`] last
//! requested for a link, and recomputes it after every dispatch. Producers on
//! other threads request write readiness through [`WorkerRef::modify_link`]
//! after queueing a frame.
//!
//! Every established link holds a [`WorkerRef`]. [`Worker::shutdown`] waits
//! for the count of outstanding references to reach zero before stopping the
//! loop, so a link can never call into a worker that is gone.

use std::{
    fmt,
    io,
    ops::BitOr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    net::TcpStream,
    runtime::{Builder, Handle},
    sync::{Notify, mpsc},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::WorkerOptions,
    error::{Result, TransportError},
    link::{Link, LinkId},
};

mod event_loop;

/// Readiness a worker waits for on a link's socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    /// Wait for inbound data or peer close.
    pub const READ: Self = Self(0b01);
    /// Wait for send buffer space.
    pub const WRITE: Self = Self(0b10);
    /// Wait for either.
    pub const READ_WRITE: Self = Self(0b11);

    /// Whether every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }

    pub(crate) fn to_tokio(self) -> tokio::io::Interest {
        if self.contains(Self::READ_WRITE) {
            tokio::io::Interest::READABLE | tokio::io::Interest::WRITABLE
        } else if self.contains(Self::WRITE) {
            tokio::io::Interest::WRITABLE
        } else {
            tokio::io::Interest::READABLE
        }
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

#[derive(Debug)]
enum Command {
    Register(LinkId),
    Modify(LinkId, Interest),
    Deregister(LinkId),
}

struct WorkerShared {
    index: usize,
    options: WorkerOptions,
    links: DashMap<LinkId, Arc<Link>>,
    commands: mpsc::UnboundedSender<Command>,
    refs: AtomicUsize,
    idle: Notify,
    runtime: Handle,
    shutdown: CancellationToken,
    stopped: CancellationToken,
}

impl WorkerShared {
    fn modify_link(&self, id: LinkId, interest: Interest) -> Result<()> {
        if !self.links.contains_key(&id) {
            return Err(TransportError::WorkerUnavailable);
        }
        self.commands
            .send(Command::Modify(id, interest))
            .map_err(|_| TransportError::WorkerUnavailable)
    }

    fn deregister(&self, id: LinkId) -> Option<Arc<Link>> {
        let removed = self.links.remove(&id).map(|(_, link)| link);
        if removed.is_some() {
            let _ = self.commands.send(Command::Deregister(id));
        }
        removed
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.refs.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Reference held by a link on the worker serving it.
///
/// Creating one increments the worker's reference count; dropping it
/// decrements the count and wakes [`Worker::shutdown`] when it reaches zero.
pub struct WorkerRef {
    shared: Arc<WorkerShared>,
}

impl WorkerRef {
    fn new(shared: Arc<WorkerShared>) -> Self {
        shared.refs.fetch_add(1, Ordering::AcqRel);
        Self { shared }
    }

    /// Index of the referenced worker.
    #[must_use]
    pub fn index(&self) -> usize { self.shared.index }

    /// Ask the worker to wait for `interest` on link `id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WorkerUnavailable`] if the worker does not
    /// track the link or its loop has stopped.
    pub fn modify_link(&self, id: LinkId, interest: Interest) -> Result<()> {
        self.shared.modify_link(id, interest)
    }

    pub(crate) fn deregister(&self, id: LinkId) { self.shared.deregister(id); }
}

impl Drop for WorkerRef {
    fn drop(&mut self) {
        if self.shared.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.idle.notify_waiters();
        }
    }
}

impl fmt::Debug for WorkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRef")
            .field("index", &self.shared.index)
            .finish()
    }
}

/// Owner handle for one worker thread.
///
/// Dropping the handle stops the loop without waiting for links.
pub struct Worker {
    shared: Arc<WorkerShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("index", &self.shared.index)
            .field("links", &self.shared.links.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl Worker {
    /// Start worker `index` on its own thread.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidInput`] if `options` fail
    /// [`WorkerOptions::validate`], or an I/O error if the runtime or thread
    /// cannot be created.
    pub fn spawn(index: usize, options: WorkerOptions) -> io::Result<Self> {
        options
            .validate()
            .map_err(|reason| io::Error::new(io::ErrorKind::InvalidInput, reason))?;
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (commands, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(WorkerShared {
            index,
            links: DashMap::new(),
            commands,
            refs: AtomicUsize::new(0),
            idle: Notify::new(),
            runtime: runtime.handle().clone(),
            shutdown: CancellationToken::new(),
            stopped: CancellationToken::new(),
            options,
        });
        let name = format!("{}-{index}", shared.options.thread_name);
        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new().name(name).spawn(move || {
            runtime.block_on(event_loop::run(loop_shared, rx));
        })?;
        debug!(worker = index, "worker started");
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Position of the worker in its pool.
    #[must_use]
    pub fn index(&self) -> usize { self.shared.index }

    /// Outstanding [`WorkerRef`]s.
    #[must_use]
    pub fn ref_count(&self) -> usize { self.shared.refs.load(Ordering::Acquire) }

    /// Links currently registered.
    #[must_use]
    pub fn link_count(&self) -> usize { self.shared.links.len() }

    /// Whether the event loop has exited.
    #[must_use]
    pub fn is_stopped(&self) -> bool { self.shared.stopped.is_cancelled() }

    /// Whether shutdown has begun or the loop has exited.
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled() || self.shared.stopped.is_cancelled()
    }

    /// Take a reference that keeps the worker from shutting down.
    #[must_use]
    pub fn acquire(&self) -> WorkerRef { WorkerRef::new(Arc::clone(&self.shared)) }

    /// Bind a socket to this worker's reactor.
    pub(crate) fn register_stream(&self, stream: std::net::TcpStream) -> io::Result<TcpStream> {
        let _guard = self.shared.runtime.enter();
        TcpStream::from_std(stream)
    }

    /// Start watching an established link.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotEstablished`] if the link is not established.
    /// - [`TransportError::InvalidParam`] if it was initialised against
    ///   another worker.
    /// - [`TransportError::WorkerUnavailable`] if the worker is full or
    ///   stopped.
    pub fn add_link(&self, link: &Arc<Link>) -> Result<()> {
        if !link.is_established() {
            return Err(TransportError::NotEstablished);
        }
        if link.worker_index() != Some(self.shared.index) {
            return Err(TransportError::InvalidParam("link bound to another worker"));
        }
        if self.shared.links.len() >= self.shared.options.max_links {
            warn!(worker = self.shared.index, link_id = %link.id(), "worker link capacity reached");
            return Err(TransportError::WorkerUnavailable);
        }
        let id = link.id();
        self.shared.links.insert(id, Arc::clone(link));
        if self.shared.commands.send(Command::Register(id)).is_err() {
            self.shared.links.remove(&id);
            return Err(TransportError::WorkerUnavailable);
        }
        Ok(())
    }

    /// Stop watching link `id` without closing it.
    pub fn remove_link(&self, id: LinkId) -> Option<Arc<Link>> { self.shared.deregister(id) }

    /// Ask the loop to wait for `interest` on link `id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WorkerUnavailable`] if the link is not
    /// registered, for example because it was closed concurrently.
    pub fn modify_link(&self, id: LinkId, interest: Interest) -> Result<()> {
        self.shared.modify_link(id, interest)
    }

    /// Wait up to `timeout` for every [`WorkerRef`] to be released, then stop
    /// the loop.
    ///
    /// Returns `true` if the reference count reached zero in time. Links
    /// still registered when the loop stops are torn down by it.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, self.shared.wait_idle())
            .await
            .is_ok();
        if !drained {
            warn!(
                worker = self.shared.index,
                refs = self.ref_count(),
                "worker shutting down with live links"
            );
        }
        self.shared.shutdown.cancel();
        self.shared.stopped.cancelled().await;
        drained
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        if let Some(thread) = self.thread.take()
            && thread.thread().id() != thread::current().id()
            && self.shared.stopped.is_cancelled()
        {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Interest::READ, tokio::io::Interest::READABLE)]
    #[case(Interest::WRITE, tokio::io::Interest::WRITABLE)]
    #[case(
        Interest::READ | Interest::WRITE,
        tokio::io::Interest::READABLE | tokio::io::Interest::WRITABLE
    )]
    fn interest_maps_to_tokio(#[case] interest: Interest, #[case] expected: tokio::io::Interest) {
        assert_eq!(interest.to_tokio(), expected);
    }

    #[tokio::test]
    async fn refs_gate_shutdown() {
        let worker = Worker::spawn(0, WorkerOptions::default()).expect("spawn");
        let first = worker.acquire();
        let second = worker.acquire();
        assert_eq!(worker.ref_count(), 2);
        drop(first);
        assert!(!worker.shutdown(Duration::from_millis(20)).await);
        drop(second);
        assert_eq!(worker.ref_count(), 0);
        assert!(worker.is_stopped());
    }

    #[tokio::test]
    async fn idle_worker_shuts_down_immediately() {
        let worker = Worker::spawn(3, WorkerOptions::default()).expect("spawn");
        assert!(worker.shutdown(Duration::from_secs(1)).await);
        assert!(worker.is_stopped());
    }

    #[rstest]
    #[case(WorkerOptions { poll_timeout: Duration::ZERO, ..WorkerOptions::default() })]
    #[case(WorkerOptions { max_links: 0, ..WorkerOptions::default() })]
    fn spawn_rejects_invalid_options(#[case] options: WorkerOptions) {
        let err = Worker::spawn(0, options).expect_err("invalid options");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn modify_unknown_link_is_unavailable() {
        let worker = Worker::spawn(1, WorkerOptions::default()).expect("spawn");
        assert!(matches!(
            worker.modify_link(LinkId::new(9), Interest::READ_WRITE),
            Err(TransportError::WorkerUnavailable)
        ));
    }
}
