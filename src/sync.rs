//! Synchronisation primitives, swapped for `loom` models under `cfg(loom)`.

use std::sync::PoisonError;
#[cfg(not(loom))]
pub(crate) use std::sync::{Mutex, MutexGuard};

#[cfg(loom)]
pub(crate) use loom::sync::{Mutex, MutexGuard};

/// Lock `mutex`, recovering the guard if a panicking holder poisoned it.
///
/// Every critical section in this crate leaves its data consistent before
/// any call that could unwind, so the inner value is still valid.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
