//! Registry of live links keyed by [`LinkId`].
//!
//! Entries are weak: a link is kept alive by the worker serving it, not by
//! the registry, so a closed link disappears once its worker lets go of it.
//! Dead entries are pruned lazily at lookup time or in bulk by
//! [`LinkRegistry::active_links`].

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::link::{Link, LinkId};

/// Concurrent map of links owned by a server.
#[derive(Debug, Default)]
pub struct LinkRegistry(DashMap<LinkId, Weak<Link>>);

impl LinkRegistry {
    /// Fetch link `id` if it is still established.
    pub fn get(&self, id: LinkId) -> Option<Arc<Link>> {
        let link = self
            .0
            .get(&id)
            .and_then(|weak| weak.upgrade())
            .filter(|link| link.is_established());
        if link.is_none() {
            self.0.remove(&id);
        }
        link
    }

    /// Track a newly established link.
    pub fn insert(&self, link: &Arc<Link>) { self.0.insert(link.id(), Arc::downgrade(link)); }

    /// Forget link `id`.
    pub fn remove(&self, id: LinkId) { self.0.remove(&id); }

    /// Number of tracked entries, including ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Prune closed links, then return the remaining ones ordered by id.
    #[must_use]
    pub fn active_links(&self) -> Vec<Arc<Link>> {
        let mut links = Vec::with_capacity(self.0.len());
        self.0.retain(|_, weak| match weak.upgrade() {
            Some(link) if link.is_established() => {
                links.push(link);
                true
            }
            _ => false,
        });
        links.sort_by_key(|link| link.id());
        links
    }
}
