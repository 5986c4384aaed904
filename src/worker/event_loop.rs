//! The worker's event loop.

use std::{
    collections::HashMap,
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use futures::{
    FutureExt,
    StreamExt,
    future::{AbortHandle, Abortable, BoxFuture, abortable},
    stream::FuturesUnordered,
};
use tokio::{
    io::Ready,
    select,
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, error, trace};

use super::{Command, Interest, WorkerShared};
use crate::{
    link::{Link, LinkId},
    panic::format_panic,
};

type Readiness = (LinkId, io::Result<Ready>);

struct Armed {
    abort: AbortHandle,
    interest: Interest,
}

struct EventLoop {
    shared: Arc<WorkerShared>,
    armed: HashMap<LinkId, Armed>,
    pending: FuturesUnordered<Abortable<BoxFuture<'static, Readiness>>>,
}

/// Run until the worker's shutdown token fires.
pub(super) async fn run(shared: Arc<WorkerShared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let _stopped = shared.stopped.clone().drop_guard();
    let shutdown = shared.shutdown.clone();
    let mut tick = interval(shared.options.poll_timeout);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut state = EventLoop {
        shared,
        armed: HashMap::new(),
        pending: FuturesUnordered::new(),
    };

    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => state.apply(command),
                None => break,
            },
            Some(ready) = state.pending.next(), if !state.pending.is_empty() => {
                if let Ok((id, ready)) = ready {
                    state.dispatch(id, ready);
                }
            }
            _ = tick.tick() => state.housekeeping(),
        }
    }

    state.teardown();
}

impl EventLoop {
    fn link(&self, id: LinkId) -> Option<Arc<Link>> {
        self.shared.links.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn apply(&mut self, command: Command) {
        trace!(worker = self.shared.index, ?command, "worker command");
        match command {
            Command::Register(id) => {
                if let Some(link) = self.link(id) {
                    let interest = link.interest();
                    self.arm(&link, interest);
                }
            }
            Command::Modify(id, interest) => {
                let unchanged = self
                    .armed
                    .get(&id)
                    .is_some_and(|armed| armed.interest == interest);
                if !unchanged && let Some(link) = self.link(id) {
                    self.arm(&link, interest);
                }
            }
            Command::Deregister(id) => self.disarm(id),
        }
    }

    fn arm(&mut self, link: &Arc<Link>, interest: Interest) {
        self.disarm(link.id());
        let Some(stream) = link.stream() else {
            return;
        };
        let id = link.id();
        let wait = async move {
            let ready = stream.ready(interest.to_tokio()).await;
            (id, ready)
        }
        .boxed();
        let (wait, abort) = abortable(wait);
        self.pending.push(wait);
        self.armed.insert(id, Armed { abort, interest });
    }

    fn disarm(&mut self, id: LinkId) {
        if let Some(armed) = self.armed.remove(&id) {
            armed.abort.abort();
        }
    }

    fn dispatch(&mut self, id: LinkId, ready: io::Result<Ready>) {
        self.armed.remove(&id);
        let Some(link) = self.link(id) else {
            return;
        };
        let ready = match ready {
            Ok(ready) => ready,
            Err(e) => {
                link.fail(Some(e.into()));
                return;
            }
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            link.handle_ready(ready.is_readable(), ready.is_writable());
        }));
        if let Err(panic) = outcome {
            let panic_msg = format_panic(panic);
            error!(
                worker = self.shared.index,
                link_id = %id,
                panic = %panic_msg,
                "link handler panicked"
            );
        }
        if link.is_established() && self.shared.links.contains_key(&id) {
            let interest = link.interest();
            self.arm(&link, interest);
        }
    }

    fn housekeeping(&mut self) {
        self.shared.links.retain(|_, link| link.is_established());
        let links = &self.shared.links;
        self.armed.retain(|id, armed| {
            let live = links.contains_key(id);
            if !live {
                armed.abort.abort();
            }
            live
        });
        trace!(
            worker = self.shared.index,
            links = self.shared.links.len(),
            armed = self.armed.len(),
            "worker housekeeping"
        );
    }

    fn teardown(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.abort.abort();
        }
        let links: Vec<_> = self
            .shared
            .links
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.shared.links.clear();
        for link in links {
            link.uninitialize();
        }
        debug!(worker = self.shared.index, "worker stopped");
    }
}
