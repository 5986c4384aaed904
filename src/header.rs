//! Fixed-size wire header preceding every frame.
//!
//! A frame is `[MessageHeader][body]`. The header is [`HEADER_LEN`] bytes in
//! network byte order:
//!
//! | offset | size | field      |
//! |--------|------|------------|
//! | 0      | 2    | `msg_type` |
//! | 2      | 2    | `result`   |
//! | 4      | 4    | `seq_no`   |
//! | 8      | 4    | `body_len` |

use std::fmt;

use bytes::{Buf, BufMut};

/// Encoded size of a [`MessageHeader`].
pub const HEADER_LEN: usize = 12;

/// Wire descriptor for one frame.
///
/// Headers are plain values: build one with [`MessageHeader::new`] and the
/// `with_*` setters, then hand it to a link which copies it into its queue.
///
/// # Examples
///
/// ```
/// use fabriclink::header::{HEADER_LEN, MessageHeader};
///
/// let header = MessageHeader::new(1, 7).with_body_len(4);
/// let bytes = header.to_bytes();
/// assert_eq!(bytes.len(), HEADER_LEN);
/// assert_eq!(MessageHeader::decode(bytes), header);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    /// Message kind used to route the frame to a handler.
    pub msg_type: i16,
    /// Reply status, zero for requests and successful replies.
    pub result: i16,
    /// Correlation id pairing replies with requests.
    pub seq_no: u32,
    /// Number of body bytes following the header.
    pub body_len: u32,
}

impl MessageHeader {
    /// Create a header with no body and a zero result.
    #[must_use]
    pub const fn new(msg_type: i16, seq_no: u32) -> Self {
        Self {
            msg_type,
            result: 0,
            seq_no,
            body_len: 0,
        }
    }

    /// Set the result code.
    #[must_use]
    pub const fn with_result(mut self, result: i16) -> Self {
        self.result = result;
        self
    }

    /// Set the declared body length.
    #[must_use]
    pub const fn with_body_len(mut self, body_len: u32) -> Self {
        self.body_len = body_len;
        self
    }

    /// Declared body length as a `usize`.
    #[must_use]
    pub fn body_len(&self) -> usize { self.body_len as usize }

    /// Append the encoded header to `dst`.
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_i16(self.msg_type);
        dst.put_i16(self.result);
        dst.put_u32(self.seq_no);
        dst.put_u32(self.body_len);
    }

    /// Encode into a fixed array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut cursor = &mut out[..];
        self.encode(&mut cursor);
        out
    }

    /// Decode a header from its wire representation.
    #[must_use]
    pub fn decode(bytes: [u8; HEADER_LEN]) -> Self {
        let mut src = &bytes[..];
        Self {
            msg_type: src.get_i16(),
            result: src.get_i16(),
            seq_no: src.get_u32(),
            body_len: src.get_u32(),
        }
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={} result={} seq={} len={}",
            self.msg_type, self.result, self.seq_no, self.body_len
        )
    }
}

/// Final delivery state of an enqueued frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SentOutcome {
    /// Every byte of the frame reached the socket.
    Sent,
    /// The link closed before the frame was fully written.
    Failed,
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn encodes_in_network_order() {
        let header = MessageHeader::new(0x0102, 0x0304_0506)
            .with_result(-1)
            .with_body_len(0x0708_090a);
        assert_eq!(
            header.to_bytes(),
            [0x01, 0x02, 0xff, 0xff, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a]
        );
    }

    #[test]
    fn encode_appends_to_buffer() {
        let mut dst = BytesMut::from(&b"xx"[..]);
        MessageHeader::new(3, 9).encode(&mut dst);
        assert_eq!(dst.len(), 2 + HEADER_LEN);
        assert_eq!(&dst[..2], b"xx");
    }

    #[test]
    fn display_lists_fields() {
        let header = MessageHeader::new(2, 5).with_body_len(10);
        assert_eq!(header.to_string(), "type=2 result=0 seq=5 len=10");
    }
}
