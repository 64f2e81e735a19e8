//! State of one open playlist.
//!
//! [`PlaylistData`] owns its entries and keeps position, focus and the play queue
//! as [`EntryKey`]s, so reordering never leaves a cursor pointing at the wrong
//! row. Aggregate lengths and the selection count are maintained incrementally
//! by every mutation.
//!
//! Nothing here knows about locking, scanning or notifications: operations
//! report which rows they touched and the registry turns that into updates.

use std::cmp::Ordering;
use std::collections::HashMap;

use playlist_types::{PlaylistId, Tuple, Update};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::entry::{Entry, EntryKey};

pub(crate) const DEFAULT_TITLE: &str = "New Playlist";
pub(crate) const TEMP_TITLE: &str = "Now Playing";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScanStatus {
    NotScanning,
    /// Some entries may still be unscanned.
    ScanActive,
    /// Every entry has been visited; waiting for outstanding jobs to drain.
    ScanEnding,
}

/// Result of removing a contiguous run of entries.
pub(crate) struct Removal {
    pub at: usize,
    pub removed: Vec<EntryKey>,
    pub position_cleared: bool,
    pub queue_changed: bool,
}

/// Result of removing every selected entry.
pub(crate) struct SelectedRemoval {
    /// Untouched rows at the head.
    pub before: usize,
    /// Rows between the head and the untouched tail.
    pub span: usize,
    /// Row to continue playback from when the playing entry was removed.
    pub hint: usize,
    pub removed: Vec<EntryKey>,
    pub position_cleared: bool,
    pub queue_changed: bool,
}

/// Outcome of [`PlaylistData::next_song`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Advance {
    Stuck,
    Moved,
    /// Position moved to the head of the play queue, now at this row.
    Dequeued(usize),
}

pub(crate) struct PlaylistData {
    pub id: PlaylistId,
    pub title: String,
    pub filename: Option<String>,
    pub modified: bool,
    pub scan_status: ScanStatus,
    pub next_update: Update,
    pub last_update: Update,
    pub resume_time: i64,
    entries: Vec<Entry>,
    index: HashMap<EntryKey, usize>,
    position: Option<EntryKey>,
    focus: Option<EntryKey>,
    queue: Vec<EntryKey>,
    selected_count: usize,
    last_shuffle_num: u64,
    total_length: i64,
    selected_length: i64,
}

impl PlaylistData {
    pub fn new(id: PlaylistId) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            filename: None,
            modified: true,
            scan_status: ScanStatus::NotScanning,
            next_update: Update::default(),
            last_update: Update::default(),
            resume_time: 0,
            entries: Vec::new(),
            index: HashMap::new(),
            position: None,
            focus: None,
            queue: Vec::new(),
            selected_count: 0,
            last_shuffle_num: 0,
            total_length: 0,
            selected_length: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, row: usize) -> Option<&Entry> {
        self.entries.get(row)
    }

    /// Mutable access for fields that do not feed the aggregates
    /// (decoder, error, tuple state). Use [`Self::set_entry_tuple`] for metadata.
    pub fn entry_mut(&mut self, row: usize) -> Option<&mut Entry> {
        self.entries.get_mut(row)
    }

    pub fn find(&self, key: EntryKey) -> Option<usize> {
        self.index.get(&key).copied()
    }

    pub fn position(&self) -> Option<usize> {
        self.position.and_then(|key| self.find(key))
    }

    pub fn focus(&self) -> Option<usize> {
        self.focus.and_then(|key| self.find(key))
    }

    pub fn total_length(&self) -> i64 {
        self.total_length
    }

    pub fn selected_length(&self) -> i64 {
        self.selected_length
    }

    pub fn selected_count(&self) -> usize {
        self.selected_count
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn renumber(&mut self, from: usize) {
        self.renumber_range(from, self.entries.len());
    }

    fn renumber_range(&mut self, from: usize, to: usize) {
        for row in from..to {
            self.index.insert(self.entries[row].key, row);
        }
    }

    /// Splice `entries` in at `at` (clamped to the end). Returns `(at, count)`.
    pub fn insert(&mut self, at: Option<usize>, entries: Vec<Entry>) -> (usize, usize) {
        let len = self.entries.len();
        let at = at.filter(|&at| at <= len).unwrap_or(len);
        let count = entries.len();
        for entry in &entries {
            debug_assert!(!entry.selected && !entry.queued);
            self.total_length += entry.length;
        }
        self.entries.splice(at..at, entries);
        self.renumber(at);
        (at, count)
    }

    /// Remove `count` entries starting at `at`; `None` when nothing was removed.
    pub fn remove(&mut self, at: usize, count: usize) -> Option<Removal> {
        let len = self.entries.len();
        let at = at.min(len);
        let count = count.min(len - at);
        if count == 0 {
            return None;
        }
        let end = at + count;

        let mut position_cleared = false;
        if let Some(pos) = self.position() {
            if pos >= at && pos < end {
                self.set_position(None, false);
                position_cleared = true;
            }
        }

        if let Some(focus) = self.focus() {
            if focus >= at && focus < end {
                self.focus = if end < len {
                    Some(self.entries[end].key)
                } else if at > 0 {
                    Some(self.entries[at - 1].key)
                } else {
                    None
                };
            }
        }

        let mut queue_changed = false;
        let mut removed = Vec::with_capacity(count);
        for entry in self.entries.drain(at..end) {
            if entry.queued {
                self.queue.retain(|key| *key != entry.key);
                queue_changed = true;
            }
            if entry.selected {
                self.selected_count -= 1;
                self.selected_length -= entry.length;
            }
            self.total_length -= entry.length;
            self.index.remove(&entry.key);
            removed.push(entry.key);
        }
        self.renumber(at);

        Some(Removal {
            at,
            removed,
            position_cleared,
            queue_changed,
        })
    }

    pub fn set_entry_tuple(&mut self, row: usize, tuple: Tuple) {
        let Some(entry) = self.entries.get_mut(row) else {
            return;
        };
        self.total_length -= entry.length;
        if entry.selected {
            self.selected_length -= entry.length;
        }
        entry.set_tuple(tuple);
        self.total_length += entry.length;
        if entry.selected {
            self.selected_length += entry.length;
        }
    }

    /// Move the play cursor. `update_shuffle` stamps the entry as the most
    /// recently played in the shuffle order.
    pub fn set_position(&mut self, row: Option<usize>, update_shuffle: bool) {
        let row = row.filter(|&row| row < self.entries.len());
        self.position = row.map(|row| self.entries[row].key);
        self.resume_time = 0;
        if let (Some(row), true) = (row, update_shuffle) {
            self.last_shuffle_num += 1;
            self.entries[row].shuffle_num = self.last_shuffle_num;
        }
    }

    /// Returns the span of rows whose focus state changed.
    pub fn set_focus(&mut self, row: Option<usize>) -> Option<(usize, usize)> {
        let new_key = row.and_then(|row| self.entries.get(row)).map(|e| e.key);
        if new_key == self.focus {
            return None;
        }
        let old = self.focus();
        self.focus = new_key;
        let new = self.focus();

        let rows: Vec<usize> = old.into_iter().chain(new).collect();
        let first = rows.iter().min()?;
        let last = rows.iter().max()?;
        Some((*first, *last))
    }

    /// Returns `true` if the selection actually changed.
    pub fn select(&mut self, row: usize, selected: bool) -> bool {
        let Some(entry) = self.entries.get_mut(row) else {
            return false;
        };
        if entry.selected == selected {
            return false;
        }
        entry.selected = selected;
        if selected {
            self.selected_count += 1;
            self.selected_length += entry.length;
        } else {
            self.selected_count -= 1;
            self.selected_length -= entry.length;
        }
        true
    }

    pub fn selected_in(&self, at: usize, count: usize) -> usize {
        let at = at.min(self.entries.len());
        let end = at.saturating_add(count).min(self.entries.len());
        self.entries[at..end].iter().filter(|e| e.selected).count()
    }

    pub fn select_all(&mut self, selected: bool) -> Option<(usize, usize)> {
        let mut first = None;
        let mut last = 0;
        for (row, entry) in self.entries.iter_mut().enumerate() {
            if entry.selected != selected {
                entry.selected = selected;
                first.get_or_insert(row);
                last = row;
            }
        }
        if selected {
            self.selected_count = self.entries.len();
            self.selected_length = self.total_length;
        } else {
            self.selected_count = 0;
            self.selected_length = 0;
        }
        first.map(|first| (first, last))
    }

    /// Move the selected entry at `row` by up to `distance` unselected neighbours,
    /// gathering every other selected entry around it.
    ///
    /// Returns `(achieved, top, bottom)` where `top..bottom` is the rearranged span.
    pub fn shift(&mut self, row: usize, distance: isize) -> Option<(isize, usize, usize)> {
        let entry = self.entries.get(row)?;
        if !entry.selected || distance == 0 {
            return None;
        }
        let len = self.entries.len();
        let mut shift = 0isize;
        let mut center;

        if distance < 0 {
            center = row;
            while center > 0 && shift > distance {
                center -= 1;
                if !self.entries[center].selected {
                    shift -= 1;
                }
            }
        } else {
            center = row + 1;
            while center < len && shift < distance {
                if !self.entries[center].selected {
                    shift += 1;
                }
                center += 1;
            }
        }

        let top = (0..center)
            .find(|&i| self.entries[i].selected)
            .unwrap_or(center);
        let bottom = (center + 1..=len)
            .rev()
            .find(|&i| self.entries[i - 1].selected)
            .unwrap_or(center);

        let block: Vec<Entry> = self.entries.drain(top..bottom).collect();
        let split = center - top;
        let mut head = Vec::new();
        let mut selected = Vec::new();
        let mut tail = Vec::new();
        for (offset, entry) in block.into_iter().enumerate() {
            if entry.selected {
                selected.push(entry);
            } else if offset < split {
                head.push(entry);
            } else {
                tail.push(entry);
            }
        }
        self.entries
            .splice(top..top, head.into_iter().chain(selected).chain(tail));
        self.renumber_range(top, bottom);

        Some((shift, top, bottom))
    }

    fn unselected_focus(&self) -> Option<EntryKey> {
        let focus = self.focus()?;
        if !self.entries[focus].selected {
            return self.focus;
        }
        self.entries[focus + 1..]
            .iter()
            .chain(self.entries[..focus].iter().rev())
            .find(|e| !e.selected)
            .map(|e| e.key)
    }

    pub fn remove_selected(&mut self) -> Option<SelectedRemoval> {
        if self.selected_count == 0 {
            return None;
        }

        let mut position_cleared = false;
        if let Some(pos) = self.position() {
            if self.entries[pos].selected {
                self.set_position(None, false);
                position_cleared = true;
            }
        }
        self.focus = self.unselected_focus();

        let before = self
            .entries
            .iter()
            .position(|e| e.selected)
            .unwrap_or(self.entries.len());
        let mut after = 0;
        let mut queue_changed = false;
        let mut removed = Vec::new();

        let old = std::mem::take(&mut self.entries);
        for entry in old {
            if entry.selected {
                if entry.queued {
                    self.queue.retain(|key| *key != entry.key);
                    queue_changed = true;
                }
                self.total_length -= entry.length;
                self.index.remove(&entry.key);
                removed.push(entry.key);
                after = 0;
            } else {
                self.entries.push(entry);
                after += 1;
            }
        }
        self.selected_count = 0;
        self.selected_length = 0;
        self.renumber(before);

        let len = self.entries.len();
        Some(SelectedRemoval {
            before,
            span: len - after - before,
            hint: len - after,
            removed,
            position_cleared,
            queue_changed,
        })
    }

    pub fn reverse(&mut self) {
        self.entries.reverse();
        self.renumber(0);
    }

    /// Reverse the order of the selected entries among themselves.
    pub fn reverse_selected(&mut self) {
        let rows: Vec<usize> = self.selected_rows();
        let (mut lo, mut hi) = (0, rows.len());
        while lo + 1 < hi {
            hi -= 1;
            self.entries.swap(rows[lo], rows[hi]);
            lo += 1;
        }
        self.renumber(0);
    }

    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.entries.shuffle(rng);
        self.renumber(0);
    }

    /// Shuffle the selected entries among their own rows.
    pub fn randomize_selected<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let rows = self.selected_rows();
        for i in (1..rows.len()).rev() {
            let j = rng.random_range(0..=i);
            self.entries.swap(rows[i], rows[j]);
        }
        self.renumber(0);
    }

    fn selected_rows(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.selected)
            .map(|(row, _)| row)
            .collect()
    }

    /// Stable sort of the whole list.
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Entry, &Entry) -> Ordering,
    {
        self.entries.sort_by(compare);
        self.renumber(0);
    }

    /// Stable sort of the selected entries within the rows they occupy.
    pub fn sort_selected_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Entry, &Entry) -> Ordering,
    {
        let mut selected = Vec::new();
        let mut slots = Vec::with_capacity(self.entries.len());
        for entry in std::mem::take(&mut self.entries) {
            if entry.selected {
                selected.push(entry);
                slots.push(None);
            } else {
                slots.push(Some(entry));
            }
        }
        selected.sort_by(compare);
        let mut sorted = selected.into_iter();
        self.entries = slots
            .into_iter()
            .filter_map(|slot| slot.or_else(|| sorted.next()))
            .collect();
        self.renumber(0);
    }

    /// Queue the entry at `row` at queue slot `at` (`None` appends).
    pub fn queue_insert(&mut self, at: Option<usize>, row: usize) -> bool {
        let Some(entry) = self.entries.get_mut(row) else {
            return false;
        };
        if entry.queued {
            return false;
        }
        match at {
            None => self.queue.push(entry.key),
            Some(at) if at <= self.queue.len() => self.queue.insert(at, entry.key),
            Some(_) => return false,
        }
        entry.queued = true;
        true
    }

    /// Queue every selected, not yet queued entry at slot `at` (`None` appends).
    pub fn queue_insert_selected(&mut self, at: Option<usize>) -> Option<(usize, usize)> {
        let at = match at {
            None => self.queue.len(),
            Some(at) if at <= self.queue.len() => at,
            Some(_) => return None,
        };
        let mut added = Vec::new();
        let mut first = None;
        let mut last = 0;
        for (row, entry) in self.entries.iter_mut().enumerate() {
            if !entry.selected || entry.queued {
                continue;
            }
            entry.queued = true;
            added.push(entry.key);
            first.get_or_insert(row);
            last = row;
        }
        self.queue.splice(at..at, added);
        first.map(|first| (first, last))
    }

    /// Row of the entry at queue slot `at`.
    pub fn queue_entry(&self, at: usize) -> Option<usize> {
        self.queue.get(at).and_then(|key| self.find(*key))
    }

    /// Queue slot of the entry at `row`.
    pub fn queue_find(&self, row: usize) -> Option<usize> {
        let entry = self.entries.get(row)?;
        if !entry.queued {
            return None;
        }
        self.queue.iter().position(|key| *key == entry.key)
    }

    pub fn queue_remove(&mut self, at: usize, count: usize) -> Option<(usize, usize)> {
        if count == 0 || at.saturating_add(count) > self.queue.len() {
            return None;
        }
        let keys: Vec<EntryKey> = self.queue.drain(at..at + count).collect();
        self.unqueue_rows(&keys)
    }

    pub fn queue_remove_selected(&mut self) -> Option<(usize, usize)> {
        let (keys, kept): (Vec<EntryKey>, Vec<EntryKey>) = self
            .queue
            .iter()
            .copied()
            .partition(|key| self.find(*key).is_some_and(|row| self.entries[row].selected));
        self.queue = kept;
        self.unqueue_rows(&keys)
    }

    fn unqueue_rows(&mut self, keys: &[EntryKey]) -> Option<(usize, usize)> {
        let mut span: Option<(usize, usize)> = None;
        for key in keys {
            let Some(row) = self.find(*key) else {
                continue;
            };
            self.entries[row].queued = false;
            span = Some(match span {
                None => (row, row),
                Some((first, last)) => (first.min(row), last.max(row)),
            });
        }
        span
    }

    fn same_album(a: &Entry, b: &Entry) -> bool {
        match &a.tuple.album {
            Some(album) => b.tuple.album.as_ref() == Some(album),
            None => false,
        }
    }

    /// Advance to the next entry in shuffle order, picking a new one at random
    /// when the established order is exhausted.
    pub fn shuffle_next<R: Rng + ?Sized>(&mut self, by_album: bool, rng: &mut R) -> bool {
        if let Some(pos) = self.position() {
            let current = self.entries[pos].shuffle_num;
            let next = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.shuffle_num > current)
                .min_by_key(|(_, e)| e.shuffle_num)
                .map(|(row, _)| row);
            if let Some(next) = next {
                self.set_position(Some(next), false);
                return true;
            }

            // keep playing the current album
            if by_album && pos + 1 < self.entries.len() {
                let next = &self.entries[pos + 1];
                if next.shuffle_num == 0 && Self::same_album(&self.entries[pos], next) {
                    self.set_position(Some(pos + 1), true);
                    return true;
                }
            }
        }

        // with album shuffle only the first entry of each album run is a choice
        let choices: Vec<usize> = (0..self.entries.len())
            .filter(|&row| {
                let entry = &self.entries[row];
                let prev = row.checked_sub(1).map(|p| &self.entries[p]);
                entry.shuffle_num == 0
                    && (!by_album
                        || prev.is_none_or(|p| p.shuffle_num != 0 || !Self::same_album(p, entry)))
            })
            .collect();
        if choices.is_empty() {
            return false;
        }
        let pick = choices[rng.random_range(0..choices.len())];
        self.set_position(Some(pick), true);
        true
    }

    /// Step back to the most recently played entry before the current one.
    pub fn shuffle_prev(&mut self) -> bool {
        let current = self.position().map(|pos| self.entries[pos].shuffle_num);
        let found = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.shuffle_num != 0 && current.is_none_or(|cur| e.shuffle_num < cur))
            .max_by_key(|(_, e)| e.shuffle_num)
            .map(|(row, _)| row);
        match found {
            Some(row) => {
                self.set_position(Some(row), false);
                true
            }
            None => false,
        }
    }

    pub fn shuffle_reset(&mut self) {
        self.last_shuffle_num = 0;
        for entry in &mut self.entries {
            entry.shuffle_num = 0;
        }
    }

    /// Pick the next position: queue head first, then shuffle order, then `hint`.
    pub fn next_song<R: Rng + ?Sized>(
        &mut self,
        repeat: bool,
        hint: usize,
        shuffle: bool,
        by_album: bool,
        rng: &mut R,
    ) -> Advance {
        let len = self.entries.len();
        if len == 0 {
            return Advance::Stuck;
        }

        if !self.queue.is_empty() {
            let key = self.queue.remove(0);
            let Some(row) = self.find(key) else {
                debug_assert!(false, "queued entry missing from playlist");
                return Advance::Stuck;
            };
            self.set_position(Some(row), true);
            self.entries[row].queued = false;
            return Advance::Dequeued(row);
        }

        if shuffle {
            if !self.shuffle_next(by_album, rng) {
                if !repeat {
                    return Advance::Stuck;
                }
                self.shuffle_reset();
                if !self.shuffle_next(by_album, rng) {
                    return Advance::Stuck;
                }
            }
            return Advance::Moved;
        }

        let row = if hint >= len {
            if !repeat {
                return Advance::Stuck;
            }
            0
        } else {
            hint
        };
        self.set_position(Some(row), true);
        Advance::Moved
    }

    pub fn prev_song(&mut self, shuffle: bool) -> bool {
        if shuffle {
            return self.shuffle_prev();
        }
        match self.position() {
            Some(pos) if pos > 0 => {
                self.set_position(Some(pos - 1), true);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn assert_invariants(&self) {
        let total: i64 = self.entries.iter().map(|e| e.length).sum();
        let selected: i64 = self
            .entries
            .iter()
            .filter(|e| e.selected)
            .map(|e| e.length)
            .sum();
        assert_eq!(total, self.total_length);
        assert_eq!(selected, self.selected_length);
        assert_eq!(
            self.entries.iter().filter(|e| e.selected).count(),
            self.selected_count
        );
        for (row, entry) in self.entries.iter().enumerate() {
            assert_eq!(self.index.get(&entry.key), Some(&row));
            let in_queue = self.queue.iter().filter(|k| **k == entry.key).count();
            assert!(in_queue <= 1);
            assert_eq!(entry.queued, in_queue == 1);
        }
        assert_eq!(self.index.len(), self.entries.len());
        assert!(self.queue.iter().all(|key| self.index.contains_key(key)));
    }
}
