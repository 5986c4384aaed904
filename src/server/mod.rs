//! Server owning a worker pool and the links it serves.
//!
//! [`LinkServer`] spawns `worker_count` [`Worker`]s, optionally listens for
//! inbound connections, and dials peers with
//! [`LinkServer::connect_to_peer`]. Every connection first completes the
//! [`handshake`](crate::handshake), then becomes a [`Link`] sharded onto
//! worker `id % worker_count`. Inbound frames are routed to the request
//! handler registered for their message type.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use log::{info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    buffer::SharedBuffer,
    config::ServerOptions,
    context::RequestContext,
    error::{Result, TransportError},
    handshake::{self, ConnectRequest},
    header::{MessageHeader, SentOutcome},
    link::{Link, LinkHandler, LinkId},
    worker::Worker,
};

mod accept;
pub mod error;
mod handlers;
mod registry;
#[cfg(test)]
mod tests;

pub use error::ServerError;
use handlers::{Dispatcher, Handlers};
pub use handlers::{
    HandlerError,
    LinkBrokenHandler,
    NewLinkHandler,
    RequestHandler,
    RequestSentHandler,
};
pub use registry::LinkRegistry;

/// Bound on waiting for a worker's links to release it during [`LinkServer::stop`].
pub const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct ServerInner {
    options: ServerOptions,
    workers: Vec<Worker>,
    registry: Arc<LinkRegistry>,
    dispatcher: Arc<Dispatcher>,
    next_id: AtomicU64,
}

impl ServerInner {
    fn worker_for(&self, id: LinkId) -> &Worker {
        let count = self.workers.len() as u64;
        let index = usize::try_from(id.as_u64() % count).unwrap_or_default();
        &self.workers[index]
    }

    /// Turn a handshaken stream into an established, unregistered link.
    fn establish(&self, stream: TcpStream, rank: u64) -> Result<Arc<Link>> {
        let stream = stream.into_std()?;
        let id = LinkId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Arc<dyn LinkHandler> = self.dispatcher.clone();
        let link = Link::new(id, stream, handler)?;
        link.set_rank(rank);
        link.initialize(self.options.link_send_queue_size, self.worker_for(id))?;
        self.registry.insert(&link);
        Ok(link)
    }

    fn register(&self, link: &Arc<Link>) -> Result<()> {
        let index = link.worker_index().ok_or(TransportError::NotEstablished)?;
        let worker = self
            .workers
            .get(index)
            .ok_or(TransportError::WorkerUnavailable)?;
        worker.add_link(link)
    }
}

struct Running {
    inner: Arc<ServerInner>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    local_addr: Option<SocketAddr>,
}

/// Multi-worker link server.
///
/// # Examples
///
/// ```no_run
/// use fabriclink::{config::ServerOptions, server::LinkServer};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), fabriclink::server::ServerError> {
/// let mut server = LinkServer::new(ServerOptions::default().magic(0xACC1)).on_request(1, |req| {
///     let _ = req.reply(0, req.body());
/// });
/// server.start().await?;
/// println!("listening on {:?}", server.local_addr());
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct LinkServer {
    options: ServerOptions,
    handlers: Handlers,
    running: Option<Running>,
}

impl LinkServer {
    /// Create a stopped server.
    #[must_use]
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            handlers: Handlers::default(),
            running: None,
        }
    }

    /// Decide whether to keep each new inbound link.
    #[must_use]
    pub fn on_new_link<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ConnectRequest, &Arc<Link>) -> std::result::Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.new_link = Some(Arc::new(handler));
        self
    }

    /// Handle requests of `msg_type`.
    #[must_use]
    pub fn on_request<F>(mut self, msg_type: i16, handler: F) -> Self
    where
        F: Fn(RequestContext) + Send + Sync + 'static,
    {
        self.handlers.requests.insert(msg_type, Arc::new(handler));
        self
    }

    /// Observe completion of frames of `msg_type`.
    #[must_use]
    pub fn on_request_sent<F>(mut self, msg_type: i16, handler: F) -> Self
    where
        F: Fn(SentOutcome, &MessageHeader, Option<SharedBuffer>) + Send + Sync + 'static,
    {
        self.handlers.sent.insert(msg_type, Arc::new(handler));
        self
    }

    /// Observe links breaking.
    #[must_use]
    pub fn on_link_broken<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<Link>) + Send + Sync + 'static,
    {
        self.handlers.broken = Some(Arc::new(handler));
        self
    }

    /// Server configuration.
    #[must_use]
    pub fn options(&self) -> &ServerOptions { &self.options }

    /// Whether [`LinkServer::start`] has run and [`LinkServer::stop`] has not.
    #[must_use]
    pub fn is_running(&self) -> bool { self.running.is_some() }

    /// Address the listener is bound to, if listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().and_then(|running| running.local_addr)
    }

    /// Spawn the workers and, if enabled, start accepting connections.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyRunning`], [`ServerError::InvalidOptions`],
    /// [`ServerError::WorkerSpawn`] or [`ServerError::Bind`].
    pub async fn start(&mut self) -> std::result::Result<(), ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        self.options.validate().map_err(ServerError::InvalidOptions)?;

        let workers = (0..self.options.worker_count)
            .map(|index| {
                Worker::spawn(index, self.options.worker.clone())
                    .map_err(|source| ServerError::WorkerSpawn { index, source })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let registry = Arc::new(LinkRegistry::default());
        let dispatcher = Arc::new(Dispatcher::new(self.handlers.clone(), Arc::clone(&registry)));
        let inner = Arc::new(ServerInner {
            options: self.options.clone(),
            workers,
            registry,
            dispatcher,
            next_id: AtomicU64::new(1),
        });

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut local_addr = None;
        if self.options.enable_listener {
            let addr = self.options.listen_addr;
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| ServerError::Bind { addr, source })?;
            local_addr = listener.local_addr().ok();
            tracker.spawn(accept::accept_loop(
                listener,
                Arc::clone(&inner),
                shutdown.clone(),
                tracker.clone(),
                self.options.backoff,
            ));
        }
        info!(
            "link server started: workers={}, listen_addr={local_addr:?}",
            self.options.worker_count
        );
        self.running = Some(Running {
            inner,
            shutdown,
            tracker,
            local_addr,
        });
        Ok(())
    }

    /// Stop accepting, tear down every link and stop the workers.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunning`] if the server is not running.
    pub async fn stop(&mut self) -> std::result::Result<(), ServerError> {
        let running = self.running.take().ok_or(ServerError::NotRunning)?;
        running.shutdown.cancel();
        running.tracker.close();
        running.tracker.wait().await;

        for link in running.inner.registry.active_links() {
            link.uninitialize();
        }
        for worker in &running.inner.workers {
            if !worker.shutdown(WORKER_SHUTDOWN_TIMEOUT).await {
                warn!("worker {} stopped with live links", worker.index());
            }
        }
        info!("link server stopped");
        Ok(())
    }

    /// Dial `addr`, retrying up to `retries` times with back-off, and return
    /// an established link served by this server's workers.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunning`], [`ServerError::Connect`] once the
    /// retries are spent, [`ServerError::Handshake`] if the peer rejects the
    /// request, or [`ServerError::Transport`] if link setup fails.
    pub async fn connect_to_peer(
        &self,
        addr: SocketAddr,
        request: ConnectRequest,
        retries: u32,
    ) -> std::result::Result<Arc<Link>, ServerError> {
        let inner = &self.running.as_ref().ok_or(ServerError::NotRunning)?.inner;
        let backoff = inner.options.backoff.normalized();
        let mut delay = backoff.initial_delay;
        let mut attempts = 0;
        let mut stream = loop {
            attempts += 1;
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(source) if attempts > retries => {
                    return Err(ServerError::Connect {
                        addr,
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    warn!("connect failed, retrying: addr={addr}, attempt={attempts}, error={e}");
                    sleep(delay).await;
                    delay = backoff.next_delay(delay);
                }
            }
        };
        if let Err(e) = inner.options.socket.apply(&stream) {
            warn!("failed to apply socket options: error={e}, addr={addr}");
        }
        handshake::connect(&mut stream, &request, inner.options.handshake_timeout).await?;

        let link = inner.establish(stream, 0)?;
        if let Err(e) = inner.register(&link) {
            link.uninitialize();
            inner.registry.remove(link.id());
            return Err(e.into());
        }
        Ok(link)
    }

    /// Look up a live link.
    #[must_use]
    pub fn link(&self, id: LinkId) -> Option<Arc<Link>> {
        self.running.as_ref()?.inner.registry.get(id)
    }

    /// Every live link, ordered by id.
    #[must_use]
    pub fn links(&self) -> Vec<Arc<Link>> {
        self.running
            .as_ref()
            .map(|running| running.inner.registry.active_links())
            .unwrap_or_default()
    }
}

impl Drop for LinkServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
        }
    }
}
