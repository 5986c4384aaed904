//! Inbound request handed to server handlers.

use std::sync::Arc;

use crate::{
    buffer::DataBuffer,
    error::Result,
    header::MessageHeader,
    link::Link,
    receive::InboundMessage,
};

/// A received frame together with the link it arrived on.
///
/// The context may be moved to another task and answered later; the reply
/// fails with [`crate::TransportError::NotEstablished`] if the link closed in
/// the meantime.
#[derive(Debug)]
pub struct RequestContext {
    header: MessageHeader,
    body: DataBuffer,
    link: Arc<Link>,
}

impl RequestContext {
    pub(crate) fn new(link: Arc<Link>, message: InboundMessage) -> Self {
        Self {
            header: message.header,
            body: message.body,
            link,
        }
    }

    /// Header of the request frame.
    #[must_use]
    pub fn header(&self) -> &MessageHeader { &self.header }

    /// Message kind.
    #[must_use]
    pub fn msg_type(&self) -> i16 { self.header.msg_type }

    /// Correlation id.
    #[must_use]
    pub fn seq_no(&self) -> u32 { self.header.seq_no }

    /// Request body.
    #[must_use]
    pub fn body(&self) -> &[u8] { self.body.as_slice() }

    /// Take ownership of the body buffer.
    #[must_use]
    pub fn into_body(self) -> DataBuffer { self.body }

    /// Link the request arrived on.
    #[must_use]
    pub fn link(&self) -> &Arc<Link> { &self.link }

    /// Answer on the same link with the request's type and sequence number.
    ///
    /// # Errors
    ///
    /// Fails as [`Link::send`] does.
    pub fn reply(&self, result: i16, payload: &[u8]) -> Result<()> {
        self.link
            .send_with_result(self.header.msg_type, result, self.header.seq_no, payload)
    }
}
