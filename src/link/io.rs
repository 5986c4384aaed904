//! Read and write paths driven by the owning worker.

use std::{
    io::{self, IoSlice},
    sync::Arc,
};

use tokio::net::TcpStream;
use tracing::trace;

use super::Link;
use crate::{
    buffer::DataBuffer,
    error::{Result, TransportError},
    header::{HEADER_LEN, SentOutcome},
    metrics::{self, Direction},
    queue::{LinkedMessageQueue, QueueEntry},
    receive::InboundMessage,
    sync::lock,
};

/// Frames decoded per readiness event before yielding to other links.
const MAX_FRAMES_PER_EVENT: usize = 64;

/// Where the read path stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// The socket has no more data for now.
    Pending,
    /// The per-event frame budget ran out; data may remain.
    Yielded,
    /// The peer closed the stream on a frame boundary.
    PeerClosed,
}

/// Where the send drain stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteStatus {
    /// Every queued frame was written.
    Drained,
    /// The socket buffer filled up; the remainder stays queued.
    Blocked,
}

impl Link {
    /// Read until the socket would block, delivering each completed frame.
    ///
    /// Frames are handed to the handler after the receive state is released,
    /// so handlers may freely use the link.
    pub(crate) fn receive(self: &Arc<Self>) -> Result<ReadStatus> {
        let stream = self.stream().ok_or(TransportError::NotEstablished)?;
        let mut messages = Vec::new();
        let status = {
            let mut state = lock(&self.receive);
            loop {
                if messages.len() >= MAX_FRAMES_PER_EVENT {
                    break Ok(ReadStatus::Yielded);
                }
                match stream.try_read(state.unfilled()) {
                    Ok(0) => {
                        break state
                            .eof_error()
                            .map_or(Ok(ReadStatus::PeerClosed), |e| Err(TransportError::from(e)));
                    }
                    Ok(n) => match state.advance(n) {
                        Ok(Some(message)) => messages.push(message),
                        Ok(None) => {}
                        Err(e) => break Err(e),
                    },
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(ReadStatus::Pending),
                    Err(e) => break Err(e.into()),
                }
            }
        };
        self.deliver(messages);
        status
    }

    fn deliver(self: &Arc<Self>, messages: Vec<InboundMessage>) {
        for message in messages {
            trace!(link_id = %self.id, header = %message.header, "frame received");
            metrics::inc_frames(Direction::Inbound);
            self.handler.on_received(self, Ok(message));
        }
    }

    /// Write queued frames until the queue empties or the socket blocks.
    ///
    /// A partially written frame stays at the front with its progress
    /// recorded, so the next writable event resumes mid-frame.
    pub(crate) fn flush(self: &Arc<Self>) -> Result<WriteStatus> {
        let stream = self.stream().ok_or(TransportError::NotEstablished)?;
        let mut completed = Vec::new();
        let queue = lock(&self.core)
            .queue
            .clone()
            .ok_or(TransportError::NotEstablished)?;
        let status = {
            let mut scratch = lock(&self.scratch);
            drain_queue(&stream, &queue, &mut scratch, &mut completed)
        };
        for entry in completed {
            trace!(link_id = %self.id, header = %entry.header, "frame sent");
            metrics::inc_frames(Direction::Outbound);
            self.handler
                .on_sent(self, SentOutcome::Sent, &entry.header, entry.context);
        }
        status.map_err(TransportError::from)
    }
}

fn drain_queue(
    stream: &TcpStream,
    queue: &LinkedMessageQueue,
    scratch: &mut DataBuffer,
    completed: &mut Vec<QueueEntry>,
) -> io::Result<WriteStatus> {
    loop {
        match queue.with_front(|entry| write_entry(stream, entry, scratch)) {
            None => return Ok(WriteStatus::Drained),
            Some(Ok(true)) => completed.extend(queue.dequeue_front()),
            Some(Ok(false)) => return Ok(WriteStatus::Blocked),
            Some(Err(e)) => return Err(e),
        }
    }
}

/// Push as much of `entry` as the socket accepts.
///
/// Returns `Ok(true)` once the whole frame is written and `Ok(false)` when
/// the socket would block first.
fn write_entry(
    stream: &TcpStream,
    entry: &mut QueueEntry,
    scratch: &mut DataBuffer,
) -> io::Result<bool> {
    while !entry.is_complete() {
        let written = entry.written();
        let header = entry.header.to_bytes();
        let payload = entry.payload_bytes();
        let frame_len = entry.frame_len();
        let result = if written == 0 && frame_len <= scratch.capacity() {
            let buf = scratch.storage_mut();
            buf[..HEADER_LEN].copy_from_slice(&header);
            buf[HEADER_LEN..frame_len].copy_from_slice(payload);
            stream.try_write(&buf[..frame_len])
        } else if written < HEADER_LEN {
            stream.try_write_vectored(&[IoSlice::new(&header[written..]), IoSlice::new(payload)])
        } else {
            stream.try_write(&payload[written - HEADER_LEN..])
        };
        match result {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => entry.advance(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
