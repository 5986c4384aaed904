//! Blocking frame I/O for the raw peer side of a link.

use std::{
    io::{self, Read, Write},
    net::{TcpListener, TcpStream},
    time::Duration,
};

use fabriclink::{HEADER_LEN, MessageHeader};

/// Read timeout applied to peer sockets so a missing frame fails the test
/// instead of hanging it.
pub const PEER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Connected loopback pair `(local, peer)`. The peer has
/// [`PEER_READ_TIMEOUT`] set.
///
/// # Errors
///
/// Returns any socket error.
pub fn socket_pair() -> io::Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let local = TcpStream::connect(listener.local_addr()?)?;
    let (peer, _) = listener.accept()?;
    peer.set_read_timeout(Some(PEER_READ_TIMEOUT))?;
    Ok((local, peer))
}

/// Read one complete frame.
///
/// # Errors
///
/// Returns any read error, including a timeout.
pub fn read_frame(stream: &mut TcpStream) -> io::Result<(MessageHeader, Vec<u8>)> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header)?;
    let header = MessageHeader::decode(header);
    let mut body = vec![0u8; header.body_len()];
    stream.read_exact(&mut body)?;
    Ok((header, body))
}

/// Write a well-formed frame carrying `body`.
///
/// # Errors
///
/// Returns any write error.
///
/// # Panics
///
/// Panics if `body` is longer than `u32::MAX`.
pub fn write_frame(stream: &mut TcpStream, msg_type: i16, seq_no: u32, body: &[u8]) -> io::Result<()> {
    let len = u32::try_from(body.len()).expect("body fits in a frame");
    let header = MessageHeader::new(msg_type, seq_no).with_body_len(len);
    write_raw(stream, header, body)
}

/// Write `header` and `body` verbatim, even if they disagree.
///
/// # Errors
///
/// Returns any write error.
pub fn write_raw(stream: &mut TcpStream, header: MessageHeader, body: &[u8]) -> io::Result<()> {
    stream.write_all(&header.to_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}
