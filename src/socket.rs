//! Idempotent, race-free ownership of a link's socket.
//!
//! A [`SocketSlot`] is either open, holding the stream, or closed. Closing
//! takes the stream out under the slot's lock, so when several threads race to
//! close the same link exactly one of them receives the stream and performs
//! the graceful shutdown. Every other caller observes the closed state. I/O
//! paths borrow the stream through [`SocketSlot::get`], which hands out a
//! reference-counted clone, so a stream is never released while an in-flight
//! read or write still uses it.

use std::{net::Shutdown, sync::Arc};

use crate::sync::{Mutex, lock};

/// Streams that support a half-close before being released.
pub trait GracefulClose {
    /// Send FIN in both directions. Errors are ignored; the peer may already
    /// be gone.
    fn shutdown_both(&self);
}

impl GracefulClose for std::net::TcpStream {
    fn shutdown_both(&self) { let _ = self.shutdown(Shutdown::Both); }
}

#[cfg(not(loom))]
impl GracefulClose for tokio::net::TcpStream {
    fn shutdown_both(&self) { let _ = socket2::SockRef::from(self).shutdown(Shutdown::Both); }
}

/// Atomic open-or-closed cell around a shared stream.
#[derive(Debug)]
pub struct SocketSlot<S> {
    inner: Mutex<Option<Arc<S>>>,
}

impl<S> Default for SocketSlot<S> {
    fn default() -> Self { Self::empty() }
}

impl<S> SocketSlot<S> {
    /// An open slot holding `stream`.
    pub fn new(stream: S) -> Self {
        Self {
            inner: Mutex::new(Some(Arc::new(stream))),
        }
    }

    /// A slot with nothing attached yet.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Attach `stream` to an empty slot.
    ///
    /// Returns the stream back if the slot is already occupied.
    ///
    /// # Errors
    ///
    /// Gives `stream` back unchanged when a stream is already attached.
    pub fn attach(&self, stream: S) -> Result<(), S> {
        let mut slot = lock(&self.inner);
        if slot.is_some() {
            return Err(stream);
        }
        *slot = Some(Arc::new(stream));
        Ok(())
    }

    /// A handle to the open stream, or `None` once closed.
    #[must_use]
    pub fn get(&self) -> Option<Arc<S>> { lock(&self.inner).clone() }

    /// Whether a stream is attached.
    #[must_use]
    pub fn is_open(&self) -> bool { lock(&self.inner).is_some() }
}

impl<S: GracefulClose> SocketSlot<S> {
    /// Close the stream.
    ///
    /// Returns `true` only for the single caller that took the stream out of
    /// the slot and shut it down. The descriptor itself is released when the
    /// last outstanding [`SocketSlot::get`] handle drops.
    pub fn close(&self) -> bool {
        let taken = lock(&self.inner).take();
        match taken {
            Some(stream) => {
                stream.shutdown_both();
                true
            }
            None => false,
        }
    }
}
