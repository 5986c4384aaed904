//! Accept loop and per-connection handshake for [`LinkServer`](super::LinkServer).

use std::{net::SocketAddr, sync::Arc};

use futures::FutureExt;
use log::{error, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::ServerInner;
use crate::{config::BackoffConfig, handshake, panic::format_panic};

/// Accept connections until `shutdown` fires, handing each to its own task.
///
/// Accept failures back off exponentially between `backoff.initial_delay`
/// and `backoff.max_delay`; a successful accept resets the delay.
pub(super) async fn accept_loop(
    listener: TcpListener,
    inner: Arc<ServerInner>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    backoff: BackoffConfig,
) {
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok((stream, peer_addr)) => {
                    spawn_connection_task(stream, peer_addr, Arc::clone(&inner), &tracker);
                    delay = backoff.initial_delay;
                }
                Err(e) => {
                    let local_addr = listener.local_addr().ok();
                    warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                    sleep(delay).await;
                    delay = backoff.next_delay(delay);
                }
            },
        }
    }
}

/// Spawn a task running the handshake for one connection, logging and
/// discarding any panics.
fn spawn_connection_task(
    stream: TcpStream,
    peer_addr: SocketAddr,
    inner: Arc<ServerInner>,
    tracker: &TaskTracker,
) {
    tracker.spawn(async move {
        let fut = std::panic::AssertUnwindSafe(process_stream(stream, peer_addr, inner)).catch_unwind();
        if let Err(panic) = fut.await {
            let panic_msg = format_panic(panic);
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr}");
            tracing::error!(panic = %panic_msg, %peer_addr, "connection task panicked");
        }
    });
}

async fn process_stream(mut stream: TcpStream, peer_addr: SocketAddr, inner: Arc<ServerInner>) {
    if let Err(e) = inner.options.socket.apply(&stream) {
        warn!("failed to apply socket options: error={e}, peer_addr={peer_addr}");
    }
    let request = match handshake::accept(
        &mut stream,
        inner.options.magic,
        inner.options.version,
        inner.options.handshake_timeout,
    )
    .await
    {
        Ok(request) => request,
        Err(e) => {
            warn!("handshake failed: error={e}, peer_addr={peer_addr}");
            return;
        }
    };

    let link = match inner.establish(stream, request.rank_id) {
        Ok(link) => link,
        Err(e) => {
            error!("link setup failed: error={e}, peer_addr={peer_addr}");
            return;
        }
    };
    if let Err(e) = inner.dispatcher.new_link(&request, &link) {
        warn!(
            "new link rejected: error={e}, link_id={}, peer_addr={peer_addr}",
            link.id()
        );
        link.uninitialize();
        inner.registry.remove(link.id());
        return;
    }
    if let Err(e) = inner.register(&link) {
        error!("link registration failed: error={e}, link_id={}", link.id());
        link.uninitialize();
        inner.registry.remove(link.id());
    }
}
