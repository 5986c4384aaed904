//! Bounded FIFO of outbound frames for a single link.
//!
//! Producers (any thread holding the link) append with
//! [`LinkedMessageQueue::enqueue_back`]; the owning worker drains from the
//! front when the socket is writable. A full queue rejects the entry with
//! [`TransportError::QueueFull`] instead of blocking or dropping, leaving flow
//! control to the caller.

use std::collections::VecDeque;

use crate::{
    buffer::SharedBuffer,
    error::{Result, TransportError},
    header::MessageHeader,
    sync::{Mutex, lock},
};

/// Protocol upper bound (exclusive) on a link's send queue capacity.
pub const MAX_SEND_QUEUE_CAP: usize = 256;

/// One queued frame plus the caller's completion context.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    /// Header written ahead of the payload.
    pub header: MessageHeader,
    /// Frame body, absent for header-only frames.
    pub payload: Option<SharedBuffer>,
    /// Opaque value handed back through the sent notification.
    pub context: Option<SharedBuffer>,
    written: usize,
}

impl QueueEntry {
    /// Bundle a frame for queuing.
    #[must_use]
    pub fn new(
        header: MessageHeader,
        payload: Option<SharedBuffer>,
        context: Option<SharedBuffer>,
    ) -> Self {
        Self {
            header,
            payload,
            context,
            written: 0,
        }
    }

    /// Payload bytes, empty when there is no payload.
    #[must_use]
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().map_or(&[], |buf| buf.as_slice())
    }

    /// Total encoded size of the frame.
    #[must_use]
    pub fn frame_len(&self) -> usize { crate::header::HEADER_LEN + self.payload_bytes().len() }

    /// Bytes of the frame already handed to the socket.
    #[must_use]
    pub fn written(&self) -> usize { self.written }

    /// Whether any byte of the frame has been written.
    #[must_use]
    pub fn is_started(&self) -> bool { self.written > 0 }

    /// Whether the whole frame has been written.
    #[must_use]
    pub fn is_complete(&self) -> bool { self.written >= self.frame_len() }

    pub(crate) fn advance(&mut self, n: usize) {
        self.written = (self.written + n).min(self.frame_len());
    }
}

/// Thread-safe bounded FIFO of [`QueueEntry`] values.
#[derive(Debug)]
pub struct LinkedMessageQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    capacity: usize,
}

impl LinkedMessageQueue {
    /// Create a queue holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidParam`] unless
    /// `0 < capacity < MAX_SEND_QUEUE_CAP`, and
    /// [`TransportError::AllocationFailed`] if the slots cannot be reserved.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity >= MAX_SEND_QUEUE_CAP {
            return Err(TransportError::InvalidParam(
                "send queue capacity out of range",
            ));
        }
        let mut entries = VecDeque::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| TransportError::AllocationFailed {
                resource: "send queue",
            })?;
        Ok(Self {
            entries: Mutex::new(entries),
            capacity,
        })
    }

    /// Append `entry` at the back.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::QueueFull`] when the queue already holds
    /// `capacity` entries; the queue is left unchanged.
    pub fn enqueue_back(&self, entry: QueueEntry) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.len() >= self.capacity {
            return Err(TransportError::QueueFull {
                capacity: self.capacity,
            });
        }
        entries.push_back(entry);
        Ok(())
    }

    /// Remove and return the oldest entry.
    pub fn dequeue_front(&self) -> Option<QueueEntry> { lock(&self.entries).pop_front() }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize { lock(&self.entries).len() }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool { lock(&self.entries).is_empty() }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize { self.capacity }

    /// Remove every entry, oldest first.
    pub fn drain(&self) -> Vec<QueueEntry> { lock(&self.entries).drain(..).collect() }

    /// Run `f` against the front entry without removing it.
    ///
    /// The lock is held for the duration of `f`, so `f` must not touch the
    /// queue itself.
    pub(crate) fn with_front<R>(&self, f: impl FnOnce(&mut QueueEntry) -> R) -> Option<R> {
        lock(&self.entries).front_mut().map(f)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::buffer::DataBuffer;

    fn entry(seq: u32) -> QueueEntry { QueueEntry::new(MessageHeader::new(1, seq), None, None) }

    #[rstest]
    #[case(0)]
    #[case(MAX_SEND_QUEUE_CAP)]
    #[case(MAX_SEND_QUEUE_CAP + 1)]
    fn rejects_out_of_range_capacity(#[case] capacity: usize) {
        assert!(matches!(
            LinkedMessageQueue::new(capacity),
            Err(TransportError::InvalidParam(_))
        ));
    }

    #[test]
    fn full_queue_rejects_and_keeps_size() {
        let queue = LinkedMessageQueue::new(2).expect("queue");
        queue.enqueue_back(entry(1)).expect("first");
        queue.enqueue_back(entry(2)).expect("second");
        let err = queue.enqueue_back(entry(3)).expect_err("full");
        assert!(matches!(err, TransportError::QueueFull { capacity: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn frame_len_counts_header_and_payload() {
        let payload = DataBuffer::from_slice(b"PING").expect("buffer").into_shared();
        let mut entry = QueueEntry::new(MessageHeader::new(1, 1).with_body_len(4), Some(payload), None);
        assert_eq!(entry.frame_len(), crate::header::HEADER_LEN + 4);
        entry.advance(5);
        assert!(entry.is_started());
        assert!(!entry.is_complete());
        entry.advance(100);
        assert!(entry.is_complete());
        assert_eq!(entry.written(), entry.frame_len());
    }

    #[test]
    fn with_front_updates_in_place() {
        let queue = LinkedMessageQueue::new(4).expect("queue");
        queue.enqueue_back(entry(7)).expect("enqueue");
        assert_eq!(queue.with_front(|front| { front.advance(3); front.written() }), Some(3));
        let front = queue.dequeue_front().expect("front");
        assert_eq!(front.written(), 3);
        assert_eq!(queue.with_front(|front| front.header.seq_no), None);
    }

    #[test]
    fn drain_returns_in_fifo_order() {
        let queue = LinkedMessageQueue::new(8).expect("queue");
        for seq in 0..5 {
            queue.enqueue_back(entry(seq)).expect("enqueue");
        }
        let seqs: Vec<_> = queue.drain().into_iter().map(|e| e.header.seq_no).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Push,
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> { prop_oneof![Just(Op::Push), Just(Op::Pop)] }

    proptest! {
        #[test]
        fn size_bounded_and_order_preserved(
            capacity in 1usize..MAX_SEND_QUEUE_CAP,
            ops in proptest::collection::vec(op(), 0..512),
        ) {
            let queue = LinkedMessageQueue::new(capacity).expect("queue");
            let mut model = std::collections::VecDeque::new();
            let mut next = 0u32;
            for op in ops {
                match op {
                    Op::Push => {
                        let result = queue.enqueue_back(entry(next));
                        if model.len() < capacity {
                            prop_assert!(result.is_ok());
                            model.push_back(next);
                        } else {
                            let full = matches!(result, Err(TransportError::QueueFull { .. }));
                            prop_assert!(full);
                        }
                        next += 1;
                    }
                    Op::Pop => {
                        let got = queue.dequeue_front().map(|e| e.header.seq_no);
                        prop_assert_eq!(got, model.pop_front());
                    }
                }
                prop_assert!(queue.len() <= capacity);
                prop_assert_eq!(queue.len(), model.len());
            }
        }
    }
}
