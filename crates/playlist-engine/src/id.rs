//! Stamp registry mapping [`PlaylistId`]s to live playlist slots.
//!
//! A stamp outlives its playlist: removing a playlist only clears the slot, so
//! lookups through an old id resolve to `None` instead of to whatever playlist
//! now occupies the same display index.

use playlist_types::PlaylistId;

use crate::multihash::MultiHash;

/// First stamp handed out when no preferred stamp is requested.
pub const FIRST_STAMP: i32 = 1000;

pub(crate) struct IdTable {
    slots: MultiHash<i32, Option<usize>>,
    next: i32,
}

impl IdTable {
    pub fn new() -> Self {
        Self {
            slots: MultiHash::new(),
            next: FIRST_STAMP,
        }
    }

    /// Allocate a stamp, honouring `preferred` when it has never been used.
    pub fn create(&mut self, preferred: Option<i32>) -> PlaylistId {
        if let Some(stamp) = preferred.filter(|&s| s >= 0) {
            let hash = self.slots.hash_of(&stamp);
            if self.slots.lookup(&stamp, hash, |_| Some(None), |_| false).added {
                return PlaylistId(stamp);
            }
        }

        while self.slots.contains(&self.next) {
            self.next += 1;
        }
        let stamp = self.next;
        self.next += 1;
        self.slots.insert(stamp, None);
        PlaylistId(stamp)
    }

    /// Current display index of `id`, if its playlist is still alive.
    pub fn resolve(&self, id: PlaylistId) -> Option<usize> {
        self.slots.get(&id.0).flatten()
    }

    pub fn set_index(&self, id: PlaylistId, index: usize) {
        self.slots.insert(id.0, Some(index));
    }

    /// Detach `id` from its playlist; the stamp stays reserved.
    pub fn kill(&self, id: PlaylistId) {
        self.slots.insert(id.0, None);
    }

    /// Number of stamps that still point at a playlist.
    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        let mut live = 0;
        self.slots.iterate(|_, slot| {
            if slot.is_some() {
                live += 1;
            }
            false
        });
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_never_reused() {
        let mut ids = IdTable::new();
        let a = ids.create(None);
        let b = ids.create(None);
        assert_eq!(a, PlaylistId(FIRST_STAMP));
        assert_eq!(b, PlaylistId(FIRST_STAMP + 1));

        ids.set_index(a, 0);
        ids.kill(a);
        assert_eq!(ids.resolve(a), None);

        let c = ids.create(Some(a.0));
        assert_ne!(c, a);
    }

    #[test]
    fn preferred_stamp_is_used_when_free() {
        let mut ids = IdTable::new();
        assert_eq!(ids.create(Some(1001)), PlaylistId(1001));
        assert_eq!(ids.create(None), PlaylistId(1000));
        assert_eq!(ids.create(None), PlaylistId(1002));
    }

    #[test]
    fn live_count_ignores_dead_stamps() {
        let mut ids = IdTable::new();
        let a = ids.create(None);
        let b = ids.create(None);
        ids.set_index(a, 0);
        ids.set_index(b, 1);
        ids.kill(b);
        assert_eq!(ids.live_count(), 1);
        assert_eq!(ids.resolve(a), Some(0));
    }
}
