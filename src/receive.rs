//! Partial-read reassembly of inbound frames.
//!
//! [`ReceiveState`] is driven by the link's read path: the caller asks for
//! [`ReceiveState::unfilled`], reads whatever the socket has into it, and
//! reports the byte count through [`ReceiveState::advance`]. Reads may stop
//! at any byte boundary; the state resumes exactly where it left off on the
//! next readiness event.

use crate::{
    buffer::{DataBuffer, MAX_RECV_BODY_LEN},
    error::{FramingError, Result, TransportError},
    header::{HEADER_LEN, MessageHeader},
};

/// A fully reassembled inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Decoded frame header.
    pub header: MessageHeader,
    /// Body bytes; exactly `header.body_len` long.
    pub body: DataBuffer,
}

#[derive(Debug)]
enum Phase {
    Header,
    Body(MessageHeader),
}

/// Per-link reassembly state for one in-progress frame.
#[derive(Debug)]
pub struct ReceiveState {
    header_buf: [u8; HEADER_LEN],
    header_read: usize,
    body: DataBuffer,
    body_read: usize,
    phase: Phase,
}

impl Default for ReceiveState {
    fn default() -> Self { Self::new() }
}

impl ReceiveState {
    /// Create a state waiting for the first header byte.
    #[must_use]
    pub fn new() -> Self {
        Self {
            header_buf: [0; HEADER_LEN],
            header_read: 0,
            body: DataBuffer::default(),
            body_read: 0,
            phase: Phase::Header,
        }
    }

    /// The slice the next read should fill.
    ///
    /// While the header is incomplete only the remaining header bytes are
    /// exposed, so a read never spills into the body of the same frame or
    /// into the next frame.
    pub fn unfilled(&mut self) -> &mut [u8] {
        match self.phase {
            Phase::Header => &mut self.header_buf[self.header_read..],
            Phase::Body(header) => &mut self.body.storage_mut()[self.body_read..header.body_len()],
        }
    }

    /// Record that `n` bytes were written into [`ReceiveState::unfilled`].
    ///
    /// Returns the completed frame once its last body byte arrives and resets
    /// for the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::OversizedBody`] when a completed header declares
    /// a body above [`MAX_RECV_BODY_LEN`], and
    /// [`TransportError::AllocationFailed`] if the body buffer cannot be
    /// reserved.
    pub fn advance(&mut self, n: usize) -> Result<Option<InboundMessage>> {
        match self.phase {
            Phase::Header => {
                self.header_read += n;
                debug_assert!(self.header_read <= HEADER_LEN, "header overrun");
                if self.header_read < HEADER_LEN {
                    return Ok(None);
                }
                let header = MessageHeader::decode(self.header_buf);
                self.begin_body(header)?;
                if header.body_len == 0 {
                    return Ok(Some(self.finish(header)));
                }
                Ok(None)
            }
            Phase::Body(header) => {
                self.body_read += n;
                debug_assert!(self.body_read <= header.body_len(), "body overrun");
                if self.body_read < header.body_len() {
                    return Ok(None);
                }
                Ok(Some(self.finish(header)))
            }
        }
    }

    /// Copy as much of `src` as the current frame needs.
    ///
    /// Returns the number of bytes consumed and the frame completed by them,
    /// if any. Call repeatedly with the unconsumed tail to decode several
    /// frames from one chunk.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`ReceiveState::advance`].
    pub fn feed(&mut self, src: &[u8]) -> Result<(usize, Option<InboundMessage>)> {
        let dst = self.unfilled();
        let n = dst.len().min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
        let message = self.advance(n)?;
        Ok((n, message))
    }

    /// Whether part of a frame has been read.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.header_read > 0 || matches!(self.phase, Phase::Body(_))
    }

    /// Bytes of the current frame read so far, header included.
    #[must_use]
    pub fn bytes_received(&self) -> usize { self.header_read + self.body_read }

    /// Bytes the current frame needs in total, or the header size until the
    /// header is complete.
    #[must_use]
    pub fn bytes_expected(&self) -> usize {
        match self.phase {
            Phase::Header => HEADER_LEN,
            Phase::Body(header) => HEADER_LEN + header.body_len(),
        }
    }

    /// Describe an end-of-stream observed at the current position.
    #[must_use]
    pub fn eof_error(&self) -> Option<FramingError> {
        self.in_progress().then(|| FramingError::PrematureEof {
            received: self.bytes_received(),
            expected: self.bytes_expected(),
        })
    }

    fn begin_body(&mut self, header: MessageHeader) -> Result<()> {
        let declared = header.body_len();
        if declared > MAX_RECV_BODY_LEN {
            return Err(FramingError::OversizedBody {
                declared,
                max: MAX_RECV_BODY_LEN,
            }
            .into());
        }
        self.body = DataBuffer::with_capacity(declared).map_err(|_| {
            TransportError::AllocationFailed {
                resource: "receive body",
            }
        })?;
        self.body_read = 0;
        self.phase = Phase::Body(header);
        Ok(())
    }

    fn finish(&mut self, header: MessageHeader) -> InboundMessage {
        let mut body = std::mem::take(&mut self.body);
        // Capacity was reserved as exactly `body_len` in `begin_body`.
        let _ = body.set_len(header.body_len());
        self.header_read = 0;
        self.body_read = 0;
        self.phase = Phase::Header;
        InboundMessage { header, body }
    }
}
