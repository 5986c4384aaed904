//! Plain value structs configuring links, workers and the server.
//!
//! Everything here is `serde`-derived so the settings can be loaded from
//! whatever format the embedding process already uses. Builder-style setters
//! are provided for programmatic construction.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::{handshake::DEFAULT_HANDSHAKE_TIMEOUT, queue::MAX_SEND_QUEUE_CAP};

/// Exponential back-off between accept or connect retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound once delays have doubled.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Clamp delays to at least 1ms and ensure `initial_delay <= max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use fabriclink::config::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::from_millis(5),
    ///     max_delay: Duration::ZERO,
    /// };
    /// let normalized = cfg.normalized();
    /// assert_eq!(normalized.initial_delay, Duration::from_millis(1));
    /// assert_eq!(normalized.max_delay, Duration::from_millis(5));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    /// The delay following `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration { (current * 2).min(self.max_delay) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum KeepAliveSetting {
    Disabled,
    Idle(Duration),
}

/// Socket options applied to every accepted or dialled link.
///
/// Unset options leave the operating system default in place.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use fabriclink::config::SocketOptions;
///
/// let options = SocketOptions::default()
///     .nodelay(true)
///     .keepalive(Some(Duration::from_secs(30)));
/// assert_ne!(options, SocketOptions::default());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketOptions {
    nodelay: Option<bool>,
    keepalive: Option<KeepAliveSetting>,
    linger: Option<Duration>,
    send_buffer_size: Option<u32>,
    recv_buffer_size: Option<u32>,
}

impl SocketOptions {
    /// Configure `TCP_NODELAY`.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = Some(enabled);
        self
    }

    /// Enable `SO_KEEPALIVE` with the given idle time, or disable it.
    #[must_use]
    pub fn keepalive(mut self, idle: Option<Duration>) -> Self {
        self.keepalive = Some(idle.map_or(KeepAliveSetting::Disabled, KeepAliveSetting::Idle));
        self
    }

    /// Configure `SO_LINGER`.
    #[must_use]
    pub fn linger(mut self, duration: Duration) -> Self {
        self.linger = Some(duration);
        self
    }

    /// Configure `SO_SNDBUF`.
    #[must_use]
    pub fn send_buffer_size(mut self, size: u32) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Configure `SO_RCVBUF`.
    #[must_use]
    pub fn recv_buffer_size(mut self, size: u32) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        let sock = SockRef::from(stream);
        if let Some(enabled) = self.nodelay {
            stream.set_nodelay(enabled)?;
        }
        match self.keepalive {
            Some(KeepAliveSetting::Idle(idle)) => {
                sock.set_keepalive(true)?;
                sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
            }
            Some(KeepAliveSetting::Disabled) => sock.set_keepalive(false)?,
            None => {}
        }
        if let Some(linger) = self.linger {
            sock.set_linger(Some(linger))?;
        }
        if let Some(size) = self.send_buffer_size {
            sock.set_send_buffer_size(size as usize)?;
        }
        if let Some(size) = self.recv_buffer_size {
            sock.set_recv_buffer_size(size as usize)?;
        }
        Ok(())
    }
}

/// Settings for a single worker thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// Upper bound on one readiness wait; housekeeping runs at this cadence.
    pub poll_timeout: Duration,
    /// Maximum number of links the worker accepts.
    pub max_links: usize,
    /// Prefix for the worker thread name; the index is appended.
    pub thread_name: String,
}

impl WorkerOptions {
    /// Check that a worker can run with these settings.
    ///
    /// # Errors
    ///
    /// Returns a static description of the first invalid field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.poll_timeout.is_zero() {
            return Err("poll_timeout must be non-zero");
        }
        if self.max_links == 0 {
            return Err("max_links must be at least 1");
        }
        Ok(())
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(500),
            max_links: 4096,
            thread_name: "fabriclink-worker".to_owned(),
        }
    }
}

/// Server configuration.
///
/// # Examples
///
/// ```
/// use fabriclink::config::ServerOptions;
///
/// let options = ServerOptions::default()
///     .worker_count(4)
///     .link_send_queue_size(32)
///     .magic(0xACC1);
/// assert_eq!(options.worker_count, 4);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOptions {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
    /// Whether to accept inbound connections at all.
    pub enable_listener: bool,
    /// Number of worker threads links are sharded across.
    pub worker_count: usize,
    /// Send queue capacity of every link.
    pub link_send_queue_size: usize,
    /// Magic both sides of the handshake must agree on.
    pub magic: u16,
    /// Protocol version both sides must agree on.
    pub version: u16,
    /// Bound on the handshake exchange.
    pub handshake_timeout: Duration,
    /// Accept and connect retry back-off.
    pub backoff: BackoffConfig,
    /// Options applied to every link socket.
    pub socket: SocketOptions,
    /// Per-worker settings.
    pub worker: WorkerOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            enable_listener: true,
            worker_count: 2,
            link_send_queue_size: 64,
            magic: 0,
            version: 1,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            backoff: BackoffConfig::default(),
            socket: SocketOptions::default().nodelay(true),
            worker: WorkerOptions::default(),
        }
    }
}

impl ServerOptions {
    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Enable or disable the listener.
    #[must_use]
    pub fn enable_listener(mut self, enabled: bool) -> Self {
        self.enable_listener = enabled;
        self
    }

    /// Set the number of workers.
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the per-link send queue capacity.
    #[must_use]
    pub fn link_send_queue_size(mut self, size: usize) -> Self {
        self.link_send_queue_size = size;
        self
    }

    /// Set the handshake magic.
    #[must_use]
    pub fn magic(mut self, magic: u16) -> Self {
        self.magic = magic;
        self
    }

    /// Set the protocol version.
    #[must_use]
    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the retry back-off.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set link socket options.
    #[must_use]
    pub fn socket(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }

    /// Set the worker poll timeout.
    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.worker.poll_timeout = timeout;
        self
    }

    /// Check ranges that would otherwise fail later at link setup.
    ///
    /// # Errors
    ///
    /// Returns a static description of the first invalid field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.worker_count == 0 {
            return Err("worker_count must be at least 1");
        }
        if self.link_send_queue_size == 0 || self.link_send_queue_size >= MAX_SEND_QUEUE_CAP {
            return Err("link_send_queue_size out of range");
        }
        self.worker.validate()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ServerOptions::default().worker_count(0))]
    #[case(ServerOptions::default().link_send_queue_size(0))]
    #[case(ServerOptions::default().link_send_queue_size(MAX_SEND_QUEUE_CAP))]
    #[case(ServerOptions::default().poll_timeout(Duration::ZERO))]
    fn validate_rejects_bad_ranges(#[case] options: ServerOptions) {
        assert!(options.validate().is_err());
    }

    #[rstest]
    #[case(WorkerOptions { poll_timeout: Duration::ZERO, ..WorkerOptions::default() })]
    #[case(WorkerOptions { max_links: 0, ..WorkerOptions::default() })]
    fn worker_validate_rejects_bad_settings(#[case] options: WorkerOptions) {
        assert!(options.validate().is_err());
        let server = ServerOptions {
            worker: options,
            ..ServerOptions::default()
        };
        assert!(server.validate().is_err());
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let cfg = BackoffConfig {
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(cfg.next_delay(cfg.initial_delay), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn socket_options_apply_to_stream() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (client, _) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = client.expect("connect");
        SocketOptions::default()
            .nodelay(true)
            .keepalive(Some(Duration::from_secs(30)))
            .apply(&client)
            .expect("apply");
        assert!(client.nodelay().expect("nodelay"));
    }
}
