//! Established link counting and RAII guard.

use std::sync::atomic::{AtomicU64, Ordering};

static ACTIVE_LINKS: AtomicU64 = AtomicU64::new(0);

/// Counts one established link for as long as it is held.
#[derive(Debug)]
pub(super) struct ActiveLink;

impl ActiveLink {
    pub(super) fn new() -> Self {
        ACTIVE_LINKS.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_links();
        Self
    }
}

impl Drop for ActiveLink {
    fn drop(&mut self) {
        ACTIVE_LINKS.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::dec_links();
    }
}

/// Number of links currently established in this process.
#[must_use]
pub fn active_link_count() -> u64 { ACTIVE_LINKS.load(Ordering::Relaxed) }
