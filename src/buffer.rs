//! Growable byte container used for message payloads.
//!
//! [`DataBuffer`] separates its reserved capacity from the number of bytes
//! that are logically valid. Growth goes through [`DataBuffer::alloc_if_need`]
//! only: it reallocates when the requested size exceeds the current capacity,
//! discards the previous contents, and never shrinks. Every allocation is
//! fallible; a buffer whose backing store could not be allocated stays in the
//! "unallocated" state and reports zero capacity instead of panicking.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, TransportError};

/// Largest body, in bytes, a single frame may carry.
pub const MAX_RECV_BODY_LEN: usize = 10 * 1024 * 1024;

/// Buffer shared between a queue entry and any caller awaiting completion.
pub type SharedBuffer = Arc<DataBuffer>;

/// Owned byte buffer with a capacity/length split and a capped maximum size.
///
/// # Examples
///
/// ```
/// use fabriclink::buffer::DataBuffer;
///
/// let mut buf = DataBuffer::from_slice(b"PING").expect("allocate");
/// assert_eq!(buf.as_slice(), b"PING");
/// assert!(buf.alloc_if_need(64));
/// assert!(buf.capacity() >= 64);
/// assert!(buf.is_empty());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataBuffer {
    mem: Option<Box<[u8]>>,
    data_len: usize,
}

fn try_alloc(size: usize) -> Option<Box<[u8]>> {
    let mut mem = Vec::new();
    mem.try_reserve_exact(size).ok()?;
    mem.resize(size, 0);
    Some(mem.into_boxed_slice())
}

impl DataBuffer {
    /// Create an empty buffer with `capacity` bytes reserved.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidParam`] if `capacity` exceeds
    /// [`MAX_RECV_BODY_LEN`] and [`TransportError::AllocationFailed`] if the
    /// reservation fails.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity > MAX_RECV_BODY_LEN {
            return Err(TransportError::InvalidParam("buffer capacity exceeds maximum"));
        }
        let mem = try_alloc(capacity).ok_or(TransportError::AllocationFailed {
            resource: "data buffer",
        })?;
        Ok(Self {
            mem: Some(mem),
            data_len: 0,
        })
    }

    /// Create a buffer holding a copy of `data`.
    ///
    /// # Errors
    ///
    /// Fails as [`DataBuffer::with_capacity`] does for `data.len()`; no
    /// partially filled buffer is ever returned.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let mut buf = Self::with_capacity(data.len())?;
        buf.storage_mut()[..data.len()].copy_from_slice(data);
        buf.data_len = data.len();
        Ok(buf)
    }

    /// Ensure at least `new_size` bytes of capacity.
    ///
    /// Returns `false` without touching the buffer when `new_size` exceeds
    /// [`MAX_RECV_BODY_LEN`]. When growth is needed the old contents are
    /// dropped and the valid length resets to zero; if the new allocation
    /// fails the buffer is left unallocated and `false` is returned.
    pub fn alloc_if_need(&mut self, new_size: usize) -> bool {
        if new_size > MAX_RECV_BODY_LEN {
            return false;
        }
        if self.mem.is_some() && new_size <= self.capacity() {
            return true;
        }
        let target = new_size.max(self.capacity());
        self.mem = None;
        self.data_len = 0;
        self.mem = try_alloc(target);
        self.mem.is_some()
    }

    /// Whether a backing store is currently held.
    #[must_use]
    pub fn is_allocated(&self) -> bool { self.mem.is_some() }

    /// Reserved bytes, or zero when unallocated.
    #[must_use]
    pub fn capacity(&self) -> usize { self.mem.as_deref().map_or(0, <[u8]>::len) }

    /// Number of logically valid bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.data_len }

    /// Whether no valid bytes are held.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.data_len == 0 }

    /// The valid bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.mem.as_deref().map_or(&[], |mem| &mem[..self.data_len])
    }

    /// Mark the first `len` bytes of the backing store as valid.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidParam`] if `len` exceeds the capacity.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.capacity() {
            return Err(TransportError::InvalidParam("length exceeds buffer capacity"));
        }
        self.data_len = len;
        Ok(())
    }

    /// Overwrite the buffer with `data`, growing it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidParam`] for oversized input and
    /// [`TransportError::AllocationFailed`] if growth fails.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_RECV_BODY_LEN {
            return Err(TransportError::InvalidParam("data exceeds maximum body length"));
        }
        if !self.alloc_if_need(data.len()) {
            return Err(TransportError::AllocationFailed {
                resource: "data buffer",
            });
        }
        self.storage_mut()[..data.len()].copy_from_slice(data);
        self.data_len = data.len();
        Ok(())
    }

    /// The whole backing store, valid or not.
    pub(crate) fn storage_mut(&mut self) -> &mut [u8] {
        self.mem.as_deref_mut().unwrap_or(&mut [])
    }

    /// Copy the valid bytes into an immutable [`Bytes`].
    #[must_use]
    pub fn to_bytes(&self) -> Bytes { Bytes::copy_from_slice(self.as_slice()) }

    /// Wrap the buffer for sharing with a queue entry.
    #[must_use]
    pub fn into_shared(self) -> SharedBuffer { Arc::new(self) }
}
