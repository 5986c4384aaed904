//! Application callbacks and their routing.

use std::{collections::HashMap, error::Error, sync::Arc};

use tracing::{debug, warn};

use super::registry::LinkRegistry;
use crate::{
    buffer::SharedBuffer,
    context::RequestContext,
    error::Result,
    handshake::ConnectRequest,
    header::{MessageHeader, SentOutcome},
    link::{Link, LinkHandler},
    receive::InboundMessage,
};

/// Error a new-link handler returns to refuse a link.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Called after a peer completes the handshake and before its link is
/// registered with a worker. Returning an error closes the link.
pub type NewLinkHandler =
    Arc<dyn Fn(&ConnectRequest, &Arc<Link>) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Called with each request of one message type.
pub type RequestHandler = Arc<dyn Fn(RequestContext) + Send + Sync>;

/// Called when a frame of one message type was written or dropped.
pub type RequestSentHandler =
    Arc<dyn Fn(SentOutcome, &MessageHeader, Option<SharedBuffer>) + Send + Sync>;

/// Called once when a link breaks.
pub type LinkBrokenHandler = Arc<dyn Fn(&Arc<Link>) + Send + Sync>;

#[derive(Clone, Default)]
pub(super) struct Handlers {
    pub(super) new_link: Option<NewLinkHandler>,
    pub(super) requests: HashMap<i16, RequestHandler>,
    pub(super) sent: HashMap<i16, RequestSentHandler>,
    pub(super) broken: Option<LinkBrokenHandler>,
}

/// Routes link events to the registered handlers.
pub(super) struct Dispatcher {
    handlers: Handlers,
    registry: Arc<LinkRegistry>,
}

impl Dispatcher {
    pub(super) fn new(handlers: Handlers, registry: Arc<LinkRegistry>) -> Self {
        Self { handlers, registry }
    }

    pub(super) fn new_link(
        &self,
        request: &ConnectRequest,
        link: &Arc<Link>,
    ) -> std::result::Result<(), HandlerError> {
        match &self.handlers.new_link {
            Some(handler) => handler(request, link),
            None => Ok(()),
        }
    }
}

impl LinkHandler for Dispatcher {
    fn on_received(&self, link: &Arc<Link>, message: Result<InboundMessage>) {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!(link_id = %link.id(), error = %e, "link error reported to dispatcher");
                return;
            }
        };
        match self.handlers.requests.get(&message.header.msg_type) {
            Some(handler) => handler(RequestContext::new(Arc::clone(link), message)),
            None => warn!(
                link_id = %link.id(),
                msg_type = message.header.msg_type,
                "no handler for message type"
            ),
        }
    }

    fn on_sent(
        &self,
        _link: &Arc<Link>,
        outcome: SentOutcome,
        header: &MessageHeader,
        context: Option<SharedBuffer>,
    ) {
        if let Some(handler) = self.handlers.sent.get(&header.msg_type) {
            handler(outcome, header, context);
        }
    }

    fn on_broken(&self, link: &Arc<Link>) {
        self.registry.remove(link.id());
        if let Some(handler) = &self.handlers.broken {
            handler(link);
        }
    }
}
