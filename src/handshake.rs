//! Connection handshake exchanged before any framed traffic.
//!
//! The connecting side sends a [`ConnectRequest`]; the accepting side checks
//! its magic number and protocol version and answers with a
//! [`ConnectResponse`]. Both messages are bincode-encoded with big-endian,
//! fixed-width integers, so they have a constant size on the wire and the
//! reader never consumes bytes belonging to the first frame.

use std::time::Duration;

use bincode::{
    Decode,
    Encode,
    config,
    decode_from_slice,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default bound on a complete handshake exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_HANDSHAKE_LEN: usize = 64;

/// Response code for an accepted connection.
pub const ACCEPTED: i16 = 0;
/// Response code for an unexpected magic number.
pub const REJECT_BAD_MAGIC: i16 = 1;
/// Response code for an unsupported protocol version.
pub const REJECT_VERSION: i16 = 2;

/// Sent by the connecting peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ConnectRequest {
    /// Deployment-specific constant both sides must agree on.
    pub magic: u16,
    /// Protocol version spoken by the caller.
    pub version: u16,
    /// Rank of the connecting process in the cluster.
    pub rank_id: u64,
}

/// Sent back by the accepting peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ConnectResponse {
    /// [`ACCEPTED`] or a rejection code.
    pub result: i16,
}

/// Failures while establishing a link.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The request carried a different magic number.
    #[error("magic mismatch: expected {expected:#06x}, got {got:#06x}")]
    BadMagic {
        /// Magic configured locally.
        expected: u16,
        /// Magic received from the peer.
        got: u16,
    },

    /// The request carried an unsupported version.
    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Version configured locally.
        expected: u16,
        /// Version received from the peer.
        got: u16,
    },

    /// The accepting peer refused the connection.
    #[error("connection rejected with code {0}")]
    Rejected(i16),

    /// The exchange did not finish in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The peer sent bytes that do not decode.
    #[error("malformed handshake: {0}")]
    Decode(#[from] DecodeError),

    /// A handshake message could not be encoded.
    #[error("failed to encode handshake: {0}")]
    Encode(#[from] EncodeError),

    /// Socket failure during the exchange.
    #[error("handshake I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn wire_config() -> impl config::Config {
    config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Read exactly one handshake message from `reader`.
///
/// Bytes are requested only as the decoder reports them missing, so nothing
/// past the message is consumed.
///
/// # Errors
///
/// Returns [`HandshakeError::Decode`] for malformed or oversized input and
/// [`HandshakeError::Io`] if the stream fails or ends early.
pub async fn read_message<R, T>(reader: &mut R) -> Result<T, HandshakeError>
where
    R: AsyncRead + Unpin,
    T: Decode<()>,
{
    let mut buf = Vec::new();
    loop {
        match decode_from_slice::<T, _>(&buf, wire_config()) {
            Ok((value, _)) => return Ok(value),
            Err(DecodeError::UnexpectedEnd { additional }) => {
                let start = buf.len();
                if start + additional > MAX_HANDSHAKE_LEN {
                    return Err(DecodeError::Other("handshake too long").into());
                }
                buf.resize(start + additional, 0);
                reader.read_exact(&mut buf[start..]).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Encode and write one handshake message.
///
/// # Errors
///
/// Returns [`HandshakeError::Encode`] or [`HandshakeError::Io`].
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), HandshakeError>
where
    W: AsyncWrite + Unpin,
    T: Encode,
{
    let bytes = encode_to_vec(message, wire_config())?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Run the accepting side of the handshake.
///
/// On a magic or version mismatch the matching rejection code is sent before
/// the error is returned.
///
/// # Errors
///
/// Returns the mismatch, a decode/I/O failure, or
/// [`HandshakeError::Timeout`].
pub async fn accept<S>(
    stream: &mut S,
    magic: u16,
    version: u16,
    timeout: Duration,
) -> Result<ConnectRequest, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        let request: ConnectRequest = read_message(stream).await?;
        let verdict = if request.magic != magic {
            Err(HandshakeError::BadMagic {
                expected: magic,
                got: request.magic,
            })
        } else if request.version != version {
            Err(HandshakeError::VersionMismatch {
                expected: version,
                got: request.version,
            })
        } else {
            Ok(request)
        };
        let result = match &verdict {
            Ok(_) => ACCEPTED,
            Err(HandshakeError::BadMagic { .. }) => REJECT_BAD_MAGIC,
            Err(_) => REJECT_VERSION,
        };
        write_message(stream, &ConnectResponse { result }).await?;
        verdict
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))?
}

/// Run the connecting side of the handshake.
///
/// # Errors
///
/// Returns [`HandshakeError::Rejected`] when the peer answers with a
/// non-zero code, or a decode/I/O/timeout failure.
pub async fn connect<S>(
    stream: &mut S,
    request: &ConnectRequest,
    timeout: Duration,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        write_message(stream, request).await?;
        let response: ConnectResponse = read_message(stream).await?;
        match response.result {
            ACCEPTED => Ok(()),
            code => Err(HandshakeError::Rejected(code)),
        }
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))?
}
