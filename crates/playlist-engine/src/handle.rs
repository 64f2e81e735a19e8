//! Public playlist handle.
//!
//! A [`Playlist`] is only a [`PlaylistId`] plus a weak reference to the engine.
//! Every call re-resolves the id under the engine lock; once the playlist (or
//! the engine) is gone, reads return empty defaults and writes do nothing.

use std::collections::HashSet;
use std::fmt;
use std::sync::Weak;

use playlist_types::{GetMode, PlaylistEvent, PlaylistId, SortType, Tuple, Update, UpdateLevel};

use crate::engine::Shared;
use crate::entry::{Entry, EntryInfo, EntryKey, PlaylistAddItem};
use crate::playlist::ScanStatus;
use crate::probe::{DecoderHandle, local_path};
use crate::registry::{Core, UpdateFlags};
use crate::sort;

#[derive(Clone)]
pub struct Playlist {
    shared: Weak<Shared>,
    id: PlaylistId,
}

impl PartialEq for Playlist {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Playlist {}

impl fmt::Debug for Playlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Playlist").field(&self.id).finish()
    }
}

fn span(first: usize, last: usize) -> (usize, usize) {
    (first, last + 1 - first)
}

impl Playlist {
    pub(crate) fn new(shared: Weak<Shared>, id: PlaylistId) -> Self {
        Self { shared, id }
    }

    fn read<T>(&self, default: T, f: impl FnOnce(&Core, usize) -> T) -> T {
        let Some(shared) = self.shared.upgrade() else {
            return default;
        };
        let core = shared.lock();
        match core.index_of(self.id) {
            Some(pi) => f(&core, pi),
            None => default,
        }
    }

    /// Run a mutation and wake callers blocked on entry scans afterwards,
    /// since the mutation may have removed what they wait for.
    fn write<T>(&self, default: T, f: impl FnOnce(&mut Core, usize) -> T) -> T {
        let Some(shared) = self.shared.upgrade() else {
            return default;
        };
        let result = {
            let mut core = shared.lock();
            match core.index_of(self.id) {
                Some(pi) => f(&mut core, pi),
                None => default,
            }
        };
        shared.notify();
        result
    }

    fn entry_with<T>(
        &self,
        row: usize,
        mode: GetMode,
        need_decoder: bool,
        need_tuple: bool,
        f: impl FnOnce(&Entry) -> T,
    ) -> Option<T> {
        let shared = self.shared.upgrade()?;
        let core = match mode {
            GetMode::Wait => shared.wait_for_entry(self.id, row, need_decoder, need_tuple),
            GetMode::NoWait => shared.lock(),
        };
        let pi = core.index_of(self.id)?;
        core.playlists[pi].entry(row).map(f)
    }

    pub fn id(&self) -> PlaylistId {
        self.id
    }

    /// Current display index, `None` once the playlist is deleted.
    pub fn index(&self) -> Option<usize> {
        self.read(None, |_, pi| Some(pi))
    }

    pub fn exists(&self) -> bool {
        self.index().is_some()
    }

    // ---- metadata -----------------------------------------------------

    pub fn title(&self) -> String {
        self.read(String::new(), |core, pi| core.playlists[pi].title.clone())
    }

    pub fn set_title(&self, title: &str) {
        self.write((), |core, pi| {
            let p = &mut core.playlists[pi];
            p.title = title.to_string();
            p.modified = true;
            core.queue_update(None, UpdateLevel::Metadata, 0, 0, UpdateFlags::default());
        });
    }

    /// File the playlist was loaded from or saved to.
    pub fn filename(&self) -> Option<String> {
        self.read(None, |core, pi| core.playlists[pi].filename.clone())
    }

    pub fn set_filename(&self, filename: Option<&str>) {
        self.write((), |core, pi| {
            let p = &mut core.playlists[pi];
            p.filename = filename.map(str::to_string);
            p.modified = true;
            core.queue_update(None, UpdateLevel::Metadata, 0, 0, UpdateFlags::default());
        });
    }

    pub fn modified(&self) -> bool {
        self.read(false, |core, pi| core.playlists[pi].modified)
    }

    pub fn set_modified(&self, modified: bool) {
        self.write((), |core, pi| core.playlists[pi].modified = modified);
    }

    // ---- entries ------------------------------------------------------

    pub fn n_entries(&self) -> usize {
        self.read(0, |core, pi| core.playlists[pi].len())
    }

    /// Sum of known entry lengths in milliseconds.
    pub fn total_length(&self) -> i64 {
        self.read(0, |core, pi| core.playlists[pi].total_length())
    }

    pub fn selected_length(&self) -> i64 {
        self.read(0, |core, pi| core.playlists[pi].selected_length())
    }

    /// Insert `items` at row `at` (`None` appends). Items without metadata are
    /// completed from the metadata cache when possible.
    pub fn insert_items(&self, at: Option<usize>, mut items: Vec<PlaylistAddItem>) {
        if let Some(shared) = self.shared.upgrade() {
            for item in &mut items {
                shared.cache.fill(item);
            }
        }
        self.write((), |core, pi| core.insert_items(pi, at, items));
    }

    pub fn remove_entries(&self, at: usize, count: usize) {
        self.write((), |core, pi| core.remove_entries(pi, at, count));
    }

    pub fn entry_filename(&self, row: usize) -> Option<String> {
        self.entry_with(row, GetMode::NoWait, false, false, |e| e.filename.clone())
    }

    /// Decoder of the entry at `row`. With [`GetMode::Wait`], blocks until the
    /// entry has been probed.
    pub fn entry_decoder(&self, row: usize, mode: GetMode) -> Option<DecoderHandle> {
        self.entry_with(row, mode, true, false, |e| e.decoder.clone())
            .flatten()
    }

    /// Metadata of the entry at `row`. With [`GetMode::Wait`], blocks until the
    /// tuple has been read (or the read has failed).
    pub fn entry_tuple(&self, row: usize, mode: GetMode) -> Option<Tuple> {
        self.entry_with(row, mode, false, true, |e| e.tuple.clone())
    }

    pub fn entry_error(&self, row: usize) -> Option<String> {
        self.entry_with(row, GetMode::NoWait, false, false, |e| e.error.clone())
            .flatten()
    }

    pub fn entry_info(&self, row: usize, mode: GetMode) -> Option<EntryInfo> {
        self.entry_with(row, mode, true, true, Entry::info)
    }

    pub fn entries(&self) -> Vec<EntryInfo> {
        self.read(Vec::new(), |core, pi| {
            core.playlists[pi].entries().iter().map(Entry::info).collect()
        })
    }

    // ---- position and focus -------------------------------------------

    pub fn position(&self) -> Option<usize> {
        self.read(None, |core, pi| core.playlists[pi].position())
    }

    /// Move the play cursor; an out-of-range row clears it. Restarts playback
    /// if this playlist is playing.
    pub fn set_position(&self, row: Option<usize>) {
        self.write((), |core, pi| {
            core.playlists[pi].set_position(row, true);
            core.change_playback(pi);
            core.updates.position(self.id);
        });
    }

    pub fn focus(&self) -> Option<usize> {
        self.read(None, |core, pi| core.playlists[pi].focus())
    }

    pub fn set_focus(&self, row: Option<usize>) {
        self.write((), |core, pi| {
            if let Some((first, last)) = core.playlists[pi].set_focus(row) {
                let (at, count) = span(first, last);
                core.queue_update(Some(pi), UpdateLevel::Selection, at, count, UpdateFlags::default());
            }
        });
    }

    // ---- selection ----------------------------------------------------

    pub fn select_entry(&self, row: usize, selected: bool) {
        self.write((), |core, pi| {
            if core.playlists[pi].select(row, selected) {
                core.queue_update(Some(pi), UpdateLevel::Selection, row, 1, UpdateFlags::default());
            }
        });
    }

    pub fn entry_selected(&self, row: usize) -> bool {
        self.entry_with(row, GetMode::NoWait, false, false, |e| e.selected)
            .unwrap_or(false)
    }

    pub fn n_selected(&self) -> usize {
        self.read(0, |core, pi| core.playlists[pi].selected_count())
    }

    /// Selected entries among rows `at..at + count`.
    pub fn n_selected_in(&self, at: usize, count: usize) -> usize {
        self.read(0, |core, pi| core.playlists[pi].selected_in(at, count))
    }

    pub fn select_all(&self, selected: bool) {
        self.write((), |core, pi| {
            if let Some((first, last)) = core.playlists[pi].select_all(selected) {
                let (at, count) = span(first, last);
                core.queue_update(Some(pi), UpdateLevel::Selection, at, count, UpdateFlags::default());
            }
        });
    }

    /// Move the selected entry at `row` by `distance`, gathering the rest of
    /// the selection around it. Returns the distance actually moved.
    pub fn shift_entries(&self, row: usize, distance: isize) -> isize {
        self.write(0, |core, pi| match core.playlists[pi].shift(row, distance) {
            Some((achieved, top, bottom)) => {
                core.queue_update(
                    Some(pi),
                    UpdateLevel::Structure,
                    top,
                    bottom - top,
                    UpdateFlags::default(),
                );
                achieved
            }
            None => 0,
        })
    }

    pub fn remove_selected(&self) {
        self.write((), |core, pi| core.remove_selected(pi));
    }

    // ---- ordering -----------------------------------------------------

    fn reorder_all(&self, f: impl FnOnce(&mut crate::playlist::PlaylistData)) {
        self.write((), |core, pi| {
            let p = &mut core.playlists[pi];
            f(p);
            let len = p.len();
            core.queue_update(Some(pi), UpdateLevel::Structure, 0, len, UpdateFlags::default());
        });
    }

    pub fn reverse_order(&self) {
        self.reorder_all(|p| p.reverse());
    }

    pub fn reverse_selected(&self) {
        self.reorder_all(|p| p.reverse_selected());
    }

    pub fn randomize_order(&self) {
        self.reorder_all(|p| p.randomize(&mut rand::rng()));
    }

    pub fn randomize_selected(&self) {
        self.reorder_all(|p| p.randomize_selected(&mut rand::rng()));
    }

    /// Stable sort. Unscanned entries sort first under tuple schemes.
    pub fn sort_entries(&self, scheme: SortType) {
        self.reorder_all(|p| p.sort_by(|a, b| sort::compare(scheme, a, b)));
    }

    pub fn sort_selected(&self, scheme: SortType) {
        self.reorder_all(|p| p.sort_selected_by(|a, b| sort::compare(scheme, a, b)));
    }

    /// Sort by `scheme` and drop every entry equal to its predecessor. Under
    /// tuple schemes only resolved tuples are compared.
    pub fn remove_duplicates(&self, scheme: SortType) {
        self.write((), |core, pi| {
            let p = &mut core.playlists[pi];
            p.select_all(false);
            p.sort_by(|a, b| sort::compare(scheme, a, b));

            let duplicates: Vec<usize> = p
                .entries()
                .windows(2)
                .enumerate()
                .filter(|(_, pair)| {
                    let (prev, cur) = (&pair[0], &pair[1]);
                    if scheme.by_filename() {
                        sort::compare(scheme, prev, cur).is_eq()
                    } else {
                        prev.tuple.is_valid()
                            && cur.tuple.is_valid()
                            && sort::compare_tuples(scheme, &prev.tuple, &cur.tuple).is_eq()
                    }
                })
                .map(|(n, _)| n + 1)
                .collect();
            for row in duplicates {
                p.select(row, true);
            }

            let len = p.len();
            core.queue_update(Some(pi), UpdateLevel::Structure, 0, len, UpdateFlags::default());
            core.remove_selected(pi);
        });
    }

    /// Drop local files that no longer exist. Remote entries are kept.
    pub fn remove_unavailable(&self) {
        let candidates: Vec<(EntryKey, String)> = self.read(Vec::new(), |core, pi| {
            core.playlists[pi]
                .entries()
                .iter()
                .map(|e| (e.key, e.filename.clone()))
                .collect()
        });

        // filesystem checks run without the lock
        let missing: HashSet<EntryKey> = candidates
            .into_iter()
            .filter(|(_, filename)| local_path(filename).is_ok_and(|path| !path.exists()))
            .map(|(key, _)| key)
            .collect();
        if missing.is_empty() {
            return;
        }

        self.write((), |core, pi| {
            let p = &mut core.playlists[pi];
            if let Some((first, last)) = p.select_all(false) {
                let (at, count) = span(first, last);
                core.queue_update(Some(pi), UpdateLevel::Selection, at, count, UpdateFlags::default());
            }
            let p = &mut core.playlists[pi];
            for key in &missing {
                if let Some(row) = p.find(*key) {
                    p.select(row, true);
                }
            }
            core.remove_selected(pi);
        });
    }

    // ---- rescans ------------------------------------------------------

    fn rescan_where(&self, filter: impl Fn(&Entry) -> bool) {
        self.write((), |core, pi| {
            if core.rescan(pi, filter) == 0 {
                return;
            }
            let len = core.playlists[pi].len();
            core.queue_update(Some(pi), UpdateLevel::Metadata, 0, len, UpdateFlags::default());
            core.scan_restart();
        });
    }

    /// Forget every entry's metadata and scan the playlist again.
    pub fn rescan_all(&self) {
        self.rescan_where(|_| true);
    }

    pub fn rescan_selected(&self) {
        self.rescan_where(|e| e.selected);
    }

    // ---- play queue ---------------------------------------------------

    pub fn n_queued(&self) -> usize {
        self.read(0, |core, pi| core.playlists[pi].queue_len())
    }

    /// Queue the entry at `row` at queue slot `at` (`None` appends).
    pub fn queue_insert(&self, at: Option<usize>, row: usize) {
        self.write((), |core, pi| {
            if core.playlists[pi].queue_insert(at, row) {
                core.queue_update(Some(pi), UpdateLevel::Selection, row, 1, UpdateFlags::QUEUE);
            }
        });
    }

    pub fn queue_insert_selected(&self, at: Option<usize>) {
        self.write((), |core, pi| {
            if let Some((first, last)) = core.playlists[pi].queue_insert_selected(at) {
                let (at, count) = span(first, last);
                core.queue_update(Some(pi), UpdateLevel::Selection, at, count, UpdateFlags::QUEUE);
            }
        });
    }

    /// Row of the entry at queue slot `at`.
    pub fn queue_get_entry(&self, at: usize) -> Option<usize> {
        self.read(None, |core, pi| core.playlists[pi].queue_entry(at))
    }

    /// Queue slot of the entry at `row`.
    pub fn queue_find_entry(&self, row: usize) -> Option<usize> {
        self.read(None, |core, pi| core.playlists[pi].queue_find(row))
    }

    pub fn queue_remove(&self, at: usize, count: usize) {
        self.write((), |core, pi| {
            if let Some((first, last)) = core.playlists[pi].queue_remove(at, count) {
                let (at, count) = span(first, last);
                core.queue_update(Some(pi), UpdateLevel::Selection, at, count, UpdateFlags::QUEUE);
            }
        });
    }

    pub fn queue_remove_selected(&self) {
        self.write((), |core, pi| {
            if let Some((first, last)) = core.playlists[pi].queue_remove_selected() {
                let (at, count) = span(first, last);
                core.queue_update(Some(pi), UpdateLevel::Selection, at, count, UpdateFlags::QUEUE);
            }
        });
    }

    // ---- navigation ---------------------------------------------------

    /// Advance the position: queue head first, then shuffle order or the next
    /// row. Returns `false` at the end of the list without `repeat`.
    pub fn next_song(&self, repeat: bool) -> bool {
        self.write(false, |core, pi| {
            let hint = core.playlists[pi].position().map_or(0, |pos| pos + 1);
            if !core.next_song_locked(pi, repeat, hint) {
                return false;
            }
            core.change_playback(pi);
            core.updates.position(self.id);
            true
        })
    }

    pub fn prev_song(&self) -> bool {
        self.write(false, |core, pi| {
            let shuffle = core.settings.shuffle;
            if !core.playlists[pi].prev_song(shuffle) {
                return false;
            }
            core.change_playback(pi);
            core.updates.position(self.id);
            true
        })
    }

    // ---- status -------------------------------------------------------

    /// Changes recorded since the last flush.
    pub fn update_pending(&self) -> bool {
        self.read(false, |core, pi| core.playlists[pi].next_update.is_pending())
    }

    /// The update delivered by the most recent flush.
    pub fn update_detail(&self) -> Update {
        self.read(Update::default(), |core, pi| core.playlists[pi].last_update)
    }

    pub fn scan_in_progress(&self) -> bool {
        self.read(false, |core, pi| {
            core.playlists[pi].scan_status != ScanStatus::NotScanning
        })
    }

    // ---- playlist-level actions ---------------------------------------

    /// Play this playlist from its position (or the first `next_song` pick).
    pub fn start_playback(&self, paused: bool) {
        self.write((), |core, pi| core.play(Some(pi), paused));
    }

    pub fn activate(&self) {
        self.write((), |core, _| {
            if core.active != self.id {
                core.active = self.id;
                core.updates.event(PlaylistEvent::Activate);
            }
        });
    }

    /// Delete the playlist. The last remaining playlist is replaced by a fresh one.
    pub fn remove(&self) {
        self.write((), |core, pi| core.remove_playlist(pi));
    }

    /// Copy resolved metadata of the selected entries into the metadata cache.
    pub fn cache_selected(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let selected: Vec<(String, Tuple, Option<DecoderHandle>)> = self.read(Vec::new(), |core, pi| {
            core.playlists[pi]
                .entries()
                .iter()
                .filter(|e| e.selected && e.tuple.is_valid())
                .map(|e| (e.filename.clone(), e.tuple.clone(), e.decoder.clone()))
                .collect()
        });
        for (filename, tuple, decoder) in selected {
            shared.cache.store(&filename, tuple, decoder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::playback::NullPlayback;
    use crate::probe::{CoverArt, Probe};
    use anyhow::{Result, anyhow};
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct NoFiles;

    impl Probe for NoFiles {
        fn probe(&self, filename: &str) -> Result<DecoderHandle> {
            Err(anyhow!("cannot open {filename}"))
        }

        fn read_tuple(&self, _: &str, _: &DecoderHandle) -> Result<Tuple> {
            Err(anyhow!("unreachable"))
        }

        fn read_image(&self, _: &str, _: &DecoderHandle) -> Result<Option<CoverArt>> {
            Ok(None)
        }
    }

    fn engine() -> Engine {
        let (engine, _control) = Engine::new(
            EngineConfig::default(),
            Arc::new(NoFiles),
            Box::new(NullPlayback::default()),
        )
        .unwrap();
        engine
    }

    fn tagged(entries: &[(&str, &str)]) -> Vec<PlaylistAddItem> {
        entries
            .iter()
            .map(|(filename, title)| {
                let mut tuple = Tuple::valid();
                tuple.title = Some(title.to_string());
                PlaylistAddItem::new(*filename).with_tuple(tuple)
            })
            .collect()
    }

    fn filenames(playlist: &Playlist) -> Vec<String> {
        playlist.entries().into_iter().map(|e| e.filename).collect()
    }

    #[test]
    fn selection_and_focus_queue_selection_updates() {
        let engine = engine();
        let playlist = engine.active_playlist();
        playlist.insert_items(None, tagged(&[("a", "A"), ("b", "B"), ("c", "C")]));
        engine.process_pending_update();

        playlist.select_entry(1, true);
        playlist.set_focus(Some(2));
        assert!(playlist.update_pending());
        engine.process_pending_update();

        let detail = playlist.update_detail();
        assert_eq!(detail.level, UpdateLevel::Selection);
        assert_eq!(detail.before, 1);
        assert_eq!(detail.after, 0);
        assert_eq!(playlist.n_selected(), 1);
        assert_eq!(playlist.n_selected_in(0, 2), 1);
        engine.shutdown();
    }

    #[test]
    fn remove_duplicates_by_title_keeps_first() {
        let engine = engine();
        let playlist = engine.active_playlist();
        playlist.insert_items(
            None,
            tagged(&[("1.mp3", "B"), ("2.mp3", "A"), ("3.mp3", "B"), ("4.mp3", "A")]),
        );

        playlist.remove_duplicates(SortType::Title);
        assert_eq!(filenames(&playlist), vec!["2.mp3", "1.mp3"]);
        assert_eq!(playlist.n_selected(), 0);
        engine.shutdown();
    }

    #[test]
    fn remove_unavailable_drops_missing_local_files() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("playlist-unavailable-{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        let present = dir.join("here.flac");
        std::fs::write(&present, b"").unwrap();
        let present = present.to_string_lossy().to_string();
        let gone = dir.join("gone.flac").to_string_lossy().to_string();

        let engine = engine();
        let playlist = engine.active_playlist();
        playlist.insert_items(
            None,
            tagged(&[
                (&present, "here"),
                (&gone, "gone"),
                ("http://radio.example/stream", "radio"),
            ]),
        );

        playlist.remove_unavailable();
        assert_eq!(
            filenames(&playlist),
            vec![present, "http://radio.example/stream".to_string()]
        );
        engine.shutdown();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn queue_operations_flag_queue_changes() {
        let engine = engine();
        let playlist = engine.active_playlist();
        playlist.insert_items(None, tagged(&[("a", "A"), ("b", "B"), ("c", "C")]));
        engine.process_pending_update();

        playlist.queue_insert(None, 2);
        playlist.queue_insert(None, 0);
        assert_eq!(playlist.n_queued(), 2);
        assert_eq!(playlist.queue_get_entry(0), Some(2));
        assert_eq!(playlist.queue_find_entry(0), Some(1));
        engine.process_pending_update();
        assert!(playlist.update_detail().queue_changed);

        assert!(playlist.next_song(false));
        assert_eq!(playlist.position(), Some(2));
        assert_eq!(playlist.n_queued(), 1);

        playlist.queue_remove(0, 1);
        assert_eq!(playlist.n_queued(), 0);
        engine.shutdown();
    }

    #[test]
    fn failed_scan_is_reported_through_wait() {
        let engine = engine();
        let playlist = engine.active_playlist();
        playlist.insert_items(None, vec![PlaylistAddItem::new("/nowhere/x.ogg")]);

        let tuple = playlist.entry_tuple(0, GetMode::Wait).unwrap();
        assert_eq!(tuple.state(), playlist_types::TupleState::Failed);
        assert_eq!(tuple.formatted_title.as_deref(), Some("x"));
        assert!(playlist.entry_error(0).unwrap().contains("cannot open"));
        assert_eq!(playlist.entry_decoder(0, GetMode::NoWait), None);
        engine.shutdown();
    }

    #[test]
    fn cached_metadata_fills_new_items() {
        let engine = engine();
        let first = engine.active_playlist();
        first.insert_items(None, tagged(&[("a.flac", "Alpha")]));
        first.select_all(true);
        first.cache_selected();

        let second = engine.insert_playlist(None);
        second.insert_items(None, vec![PlaylistAddItem::new("a.flac")]);
        let tuple = second.entry_tuple(0, GetMode::NoWait).unwrap();
        assert_eq!(tuple.title.as_deref(), Some("Alpha"));
        engine.shutdown();
    }
}
