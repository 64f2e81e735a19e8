//! Short-lived metadata cache keyed by filename.
//!
//! Entries copied out of one playlist (cut/paste, drag between playlists) keep
//! their resolved metadata for a few seconds so re-inserting them does not
//! trigger a rescan.

use std::time::{Duration, Instant};

use playlist_types::Tuple;

use crate::entry::PlaylistAddItem;
use crate::multihash::MultiHash;
use crate::probe::DecoderHandle;

#[derive(Clone)]
struct CachedItem {
    tuple: Tuple,
    decoder: Option<DecoderHandle>,
    stored: Instant,
}

pub(crate) struct MetadataCache {
    items: MultiHash<String, CachedItem>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            items: MultiHash::new(),
            ttl,
        }
    }

    pub fn store(&self, filename: &str, tuple: Tuple, decoder: Option<DecoderHandle>) {
        self.items.insert(
            filename.to_string(),
            CachedItem {
                tuple,
                decoder,
                stored: Instant::now(),
            },
        );
    }

    /// Complete `item` from the cache; fields the caller already supplied win.
    pub fn fill(&self, item: &mut PlaylistAddItem) {
        if item.tuple.is_some() && item.decoder.is_some() {
            return;
        }
        let Some(cached) = self.items.get(&item.filename) else {
            return;
        };
        if item.tuple.is_none() && cached.tuple.is_valid() {
            item.tuple = Some(cached.tuple);
        }
        if item.decoder.is_none() {
            item.decoder = cached.decoder;
        }
    }

    /// Drop items older than the TTL. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.evict_older_than(Instant::now())
    }

    fn evict_older_than(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let removed = self
            .items
            .iterate(|_, item| now.saturating_duration_since(item.stored) >= ttl);
        if removed > 0 {
            tracing::debug!(removed, "metadata cache evicted");
        }
        removed
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}
