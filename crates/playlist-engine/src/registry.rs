//! State guarded by the engine lock.
//!
//! [`Core`] owns every open playlist together with the id table, the scan
//! coordinator, the pending-update batch and the playback bridge. All methods
//! assume the caller holds the engine mutex; none of them block or call
//! listener code.

use playlist_types::{PlaylistEvent, PlaylistId, TupleState, Update, UpdateLevel};

use crate::config::Settings;
use crate::entry::{Entry, EntryKey, PlaylistAddItem, is_blacklisted};
use crate::id::IdTable;
use crate::playback::PlaybackBridge;
use crate::playlist::{Advance, PlaylistData, ScanStatus};
use crate::scan::{JobId, ScanCoordinator, ScanRequest, ScanResult};
use crate::state_file::{ResumeState, SavedPlaylist, SavedState};
use crate::update::{PendingBatch, UpdateDispatcher};

/// Extra information attached to a queued update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct UpdateFlags {
    pub queue_changed: bool,
    /// Scan-driven change; may wait for the batching window.
    pub delayed: bool,
}

impl UpdateFlags {
    pub const QUEUE: Self = Self {
        queue_changed: true,
        delayed: false,
    };
    pub const DELAYED: Self = Self {
        queue_changed: false,
        delayed: true,
    };
}

pub(crate) struct Core {
    pub playlists: Vec<PlaylistData>,
    pub ids: IdTable,
    pub active: PlaylistId,
    pub playing: Option<PlaylistId>,
    /// Playlist index to restart by `resume()`.
    pub resume_playlist: Option<usize>,
    pub resume_paused: bool,
    pub scan: ScanCoordinator,
    pub updates: UpdateDispatcher,
    pub playback: PlaybackBridge,
    pub settings: Settings,
    pub shutting_down: bool,
    next_entry: u64,
}

impl Core {
    /// Build the core with one empty playlist, active.
    pub fn new(
        settings: Settings,
        scan: ScanCoordinator,
        updates: UpdateDispatcher,
        playback: PlaybackBridge,
    ) -> Self {
        let mut core = Self {
            playlists: Vec::new(),
            ids: IdTable::new(),
            active: PlaylistId(-1),
            playing: None,
            resume_playlist: None,
            resume_paused: false,
            scan,
            updates,
            playback,
            settings,
            shutting_down: false,
            next_entry: 0,
        };
        core.scan.enabled = core.scan.enabled_nominal && !settings.metadata_on_play;
        core.active = core.insert_playlist(None, None);
        core.discard_updates();
        core
    }

    pub fn index_of(&self, id: PlaylistId) -> Option<usize> {
        self.ids.resolve(id)
    }

    pub fn active_index(&self) -> usize {
        self.ids.resolve(self.active).unwrap_or(0)
    }

    pub fn playing_index(&self) -> Option<usize> {
        self.playing.and_then(|id| self.ids.resolve(id))
    }

    fn renumber(&self, from: usize) {
        for (index, playlist) in self.playlists.iter().enumerate().skip(from) {
            self.ids.set_index(playlist.id, index);
        }
    }

    pub fn new_entries(&mut self, items: Vec<PlaylistAddItem>) -> Vec<Entry> {
        items
            .into_iter()
            .map(|item| {
                self.next_entry += 1;
                Entry::new(EntryKey(self.next_entry), item)
            })
            .collect()
    }

    // ---- updates ------------------------------------------------------

    /// Record a change of `level` to rows `at..at + count` of playlist `pi`
    /// (`None` for changes to the playlist set itself).
    pub fn queue_update(
        &mut self,
        pi: Option<usize>,
        level: UpdateLevel,
        at: usize,
        count: usize,
        flags: UpdateFlags,
    ) {
        let mut delayable = false;
        if let Some(p) = pi.and_then(|pi| self.playlists.get_mut(pi)) {
            if level == UpdateLevel::Structure {
                p.scan_status = ScanStatus::ScanActive;
            }
            if level >= UpdateLevel::Metadata {
                if Some(p.id) == self.playing {
                    if let Some(row) = p.position() {
                        self.playback.set_info(row, &p.entries()[row].tuple);
                    }
                }
                p.modified = true;
            }

            let mut update = Update::span(level, p.len(), at, count);
            update.queue_changed = flags.queue_changed;
            p.next_update.merge(&update);

            // only batch while this playlist is still being scanned
            delayable =
                flags.delayed && self.scan.enabled && p.scan_status != ScanStatus::NotScanning;
        }

        if level == UpdateLevel::Structure {
            self.scan_restart();
        }
        self.updates.request(level, delayable);
    }

    /// Hand the pending batch to the flusher and rotate per-playlist records.
    pub fn take_pending(&mut self) -> PendingBatch {
        let batch = self.updates.take();
        if batch.level != UpdateLevel::None {
            for p in &mut self.playlists {
                p.last_update = std::mem::take(&mut p.next_update);
            }
        }
        batch
    }

    pub fn discard_updates(&mut self) {
        self.updates.discard();
        for p in &mut self.playlists {
            p.next_update = Update::default();
            p.last_update = Update::default();
        }
    }

    // ---- scanning -----------------------------------------------------

    pub fn scan_queue_entry(&mut self, pi: usize, row: usize, for_playback: bool) -> Option<JobId> {
        let p = self.playlists.get(pi)?;
        let entry = p.entry(row)?;
        let request = ScanRequest {
            job: 0,
            filename: entry.filename.clone(),
            want_tuple: !entry.tuple.is_valid(),
            want_image: for_playback,
            decoder: entry.decoder.clone(),
        };
        let (id, key) = (p.id, entry.key);
        let job = self.scan.start(id, key, request, for_playback);
        tracing::debug!(playlist = %id, entry = row, job, for_playback, "scan queued");
        Some(job)
    }

    /// Queue the next entry a blocked caller is waiting for.
    fn scan_queue_priority(&mut self) -> bool {
        while let Some((id, key)) = self.scan.next_priority() {
            let Some(pi) = self.ids.resolve(id) else {
                continue;
            };
            let wanted = self.playlists[pi].find(key).filter(|&row| {
                let entry = &self.playlists[pi].entries()[row];
                !self.scan.has_entry(key) && !(entry.decoder.is_some() && entry.tuple.is_valid())
            });
            match wanted {
                Some(row) => {
                    self.scan_queue_entry(pi, row, false);
                    return true;
                }
                // a dropped request may have been the last thing the playlist waited on
                None => self.scan_check_complete(pi),
            }
        }
        false
    }

    /// Advance the sweep to the next unscanned entry and queue it.
    fn scan_queue_next_entry(&mut self) -> bool {
        if !self.scan.enabled {
            return false;
        }
        while self.scan.cursor_playlist < self.playlists.len() {
            let pi = self.scan.cursor_playlist;
            if self.playlists[pi].scan_status == ScanStatus::ScanActive {
                while self.scan.cursor_row < self.playlists[pi].len() {
                    let row = self.scan.cursor_row;
                    self.scan.cursor_row += 1;
                    let entry = &self.playlists[pi].entries()[row];
                    if entry.tuple.state() == TupleState::Initial
                        && !self.scan.has_entry(entry.key)
                        && !is_blacklisted(&entry.filename)
                    {
                        self.scan_queue_entry(pi, row, false);
                        return true;
                    }
                }
                self.playlists[pi].scan_status = ScanStatus::ScanEnding;
                self.scan_check_complete(pi);
            }
            self.scan.cursor_playlist += 1;
            self.scan.cursor_row = 0;
        }
        false
    }

    /// Top up outstanding pool jobs to the worker budget.
    pub fn schedule(&mut self) {
        while self.scan.has_room() {
            if self.scan_queue_priority() {
                continue;
            }
            if !self.scan_queue_next_entry() {
                break;
            }
        }
    }

    pub fn scan_restart(&mut self) {
        self.scan.restart_sweep();
        self.schedule();
    }

    pub fn scan_check_complete(&mut self, pi: usize) {
        let p = &mut self.playlists[pi];
        if p.scan_status != ScanStatus::ScanEnding || self.scan.has_playlist(p.id) {
            return;
        }
        p.scan_status = ScanStatus::NotScanning;
        tracing::debug!(playlist = %p.id, "scan complete");
        self.updates.scan_complete(p.id);
    }

    /// Apply a finished scan to its entry, if both still exist.
    pub fn finish_scan(&mut self, result: ScanResult) {
        let Some(job) = self.scan.take(result.job) else {
            tracing::debug!(job = result.job, "stale scan result discarded");
            return;
        };
        let Some(pi) = self.ids.resolve(job.playlist) else {
            self.schedule();
            return;
        };

        if let Some(row) = self.playlists[pi].find(job.entry) {
            self.apply_scan(pi, row, result);
        }

        self.schedule();
        self.scan_check_complete(pi);
    }

    fn apply_scan(&mut self, pi: usize, row: usize, result: ScanResult) {
        let ScanResult {
            decoder,
            tuple,
            error,
            ..
        } = result;
        let p = &mut self.playlists[pi];
        let mut changed = false;

        let Some(entry) = p.entry_mut(row) else {
            return;
        };
        if entry.decoder.is_none() {
            entry.decoder = decoder;
        }
        if !entry.tuple.is_valid() && tuple.is_valid() {
            p.set_entry_tuple(row, tuple);
            changed = true;
        }

        let id = p.id;
        let Some(entry) = p.entry_mut(row) else {
            return;
        };
        if entry.decoder.is_none() || !entry.tuple.is_valid() {
            if let Some(error) = &error {
                tracing::warn!(playlist = %id, entry = row, file = %entry.filename, error = %error, "scan failed");
            }
            entry.error = error;
        }
        if entry.tuple.state() == TupleState::Initial {
            entry.mark_failed();
            changed = true;
        }

        if changed {
            self.queue_update(Some(pi), UpdateLevel::Metadata, row, 1, UpdateFlags::DELAYED);
        }
    }

    /// A caller needs `row` scanned now: dispatch if the budget allows,
    /// otherwise put it ahead of the sweep.
    pub fn request_scan(&mut self, pi: usize, row: usize) {
        if self.scan.has_room() {
            self.scan_queue_entry(pi, row, false);
            return;
        }
        let p = &self.playlists[pi];
        if let Some(entry) = p.entry(row) {
            self.scan.prioritize(p.id, entry.key);
        }
    }

    /// Give an unstarted playback scan of `row` to the pool, for a caller
    /// blocked on the entry while playback has not read it.
    pub fn release_playback_scan(&mut self, pi: usize, row: usize) -> bool {
        let Some(key) = self.playlists.get(pi).and_then(|p| p.entry(row)).map(|e| e.key) else {
            return false;
        };
        let unstarted = self
            .scan
            .find_entry_mut(key)
            .is_some_and(|job| job.for_playback && !job.handled_by_playback);
        if !unstarted {
            return false;
        }
        self.scan.cancel(key);
        self.request_scan(pi, row);
        tracing::debug!(playlist = %self.playlists[pi].id, entry = row, "playback scan handed to pool");
        true
    }

    /// Reset matching entries to `Initial` and restart the sweep.
    pub fn rescan(&mut self, pi: usize, filter: impl Fn(&Entry) -> bool) -> usize {
        let rows: Vec<usize> = self.playlists[pi]
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, entry)| filter(entry))
            .map(|(row, _)| row)
            .collect();
        let p = &mut self.playlists[pi];
        for &row in &rows {
            p.set_entry_tuple(row, Default::default());
        }
        if !rows.is_empty() {
            p.scan_status = ScanStatus::ScanActive;
        }
        rows.len()
    }

    // ---- playback -----------------------------------------------------

    pub fn start_playback(&mut self, seek_ms: i64, paused: bool) {
        self.scan.reset_playback();
        self.playback.play(seek_ms, paused);

        // playback always opens the entry through a fresh scan
        if let Some(pi) = self.playing_index() {
            if let Some(row) = self.playlists[pi].position() {
                let key = self.playlists[pi].entries()[row].key;
                self.scan.cancel(key);
                self.scan_queue_entry(pi, row, true);
            }
        }
        self.schedule();
    }

    pub fn stop_playback(&mut self) {
        self.scan.reset_playback();
        self.playback.stop();
        self.schedule();
    }

    /// Follow a position change of playlist `pi` with playback, if it is playing.
    pub fn change_playback(&mut self, pi: usize) {
        if Some(self.playlists[pi].id) != self.playing {
            return;
        }
        if self.playlists[pi].position().is_some() {
            let paused = self.playback.paused();
            self.start_playback(0, paused);
            self.updates.event(PlaylistEvent::PlaybackBegin);
        } else {
            self.playing = None;
            self.stop_playback();
            self.updates.event(PlaylistEvent::SetPlaying);
            self.updates.event(PlaylistEvent::PlaybackStop);
        }
    }

    /// Play playlist `target` (or stop with `None`).
    pub fn play(&mut self, target: Option<usize>, paused: bool) {
        let mut target = target.filter(|&pi| pi < self.playlists.len());
        if target.map(|pi| self.playlists[pi].id) == self.playing {
            if self.playing.is_some() && self.playback.paused() != paused {
                self.playback.set_paused(paused);
            }
            return;
        }

        if let Some(current) = self.playing_index() {
            self.playlists[current].resume_time = self.playback.time_ms();
        }

        let mut position_changed = false;
        if let Some(pi) = target {
            if self.playlists[pi].position().is_none() {
                if self.next_song_locked(pi, true, 0) {
                    position_changed = true;
                } else {
                    target = None;
                }
            }
        }

        self.playing = target.map(|pi| self.playlists[pi].id);
        match target {
            Some(pi) => {
                let seek = self.playlists[pi].resume_time;
                self.start_playback(seek, paused);
            }
            None => self.stop_playback(),
        }

        if let (Some(pi), true) = (target, position_changed) {
            self.updates.position(self.playlists[pi].id);
        }
        self.updates.event(PlaylistEvent::SetPlaying);
        self.updates.event(if target.is_some() {
            PlaylistEvent::PlaybackBegin
        } else {
            PlaylistEvent::PlaybackStop
        });
    }

    /// Move the position of playlist `pi` to the next entry.
    pub fn next_song_locked(&mut self, pi: usize, repeat: bool, hint: usize) -> bool {
        let Settings {
            shuffle,
            album_shuffle,
            ..
        } = self.settings;
        let advance =
            self.playlists[pi].next_song(repeat, hint, shuffle, album_shuffle, &mut rand::rng());
        match advance {
            Advance::Stuck => false,
            Advance::Moved => true,
            Advance::Dequeued(row) => {
                self.queue_update(Some(pi), UpdateLevel::Selection, row, 1, UpdateFlags::QUEUE);
                true
            }
        }
    }

    /// Serial-checked lookup of the entry playback is working on.
    pub fn playback_entry(&self, serial: u64) -> Option<(usize, usize)> {
        if !self.playback.check_serial(serial) {
            return None;
        }
        let pi = self.playing_index()?;
        let row = self.playlists[pi].position()?;
        Some((pi, row))
    }

    // ---- entries ------------------------------------------------------

    pub fn insert_items(&mut self, pi: usize, at: Option<usize>, items: Vec<PlaylistAddItem>) {
        if items.is_empty() {
            return;
        }
        let entries = self.new_entries(items);
        let (at, count) = self.playlists[pi].insert(at, entries);
        self.queue_update(Some(pi), UpdateLevel::Structure, at, count, UpdateFlags::default());
    }

    /// Drop the scan jobs of removed entries.
    fn cancel_removed(&mut self, keys: &[EntryKey]) {
        for key in keys {
            self.scan.cancel(*key);
        }
    }

    pub fn remove_entries(&mut self, pi: usize, at: usize, count: usize) {
        let Some(removal) = self.playlists[pi].remove(at, count) else {
            return;
        };
        self.cancel_removed(&removal.removed);

        if removal.position_cleared {
            if self.settings.advance_on_delete {
                let repeat = self.settings.repeat;
                self.next_song_locked(pi, repeat, removal.at);
            }
            self.change_playback(pi);
        }

        let flags = UpdateFlags {
            queue_changed: removal.queue_changed,
            delayed: false,
        };
        self.queue_update(Some(pi), UpdateLevel::Structure, removal.at, 0, flags);
        if removal.position_cleared {
            self.updates.position(self.playlists[pi].id);
        }
    }

    pub fn remove_selected(&mut self, pi: usize) {
        let Some(removal) = self.playlists[pi].remove_selected() else {
            return;
        };
        self.cancel_removed(&removal.removed);

        if removal.position_cleared {
            if self.settings.advance_on_delete {
                let repeat = self.settings.repeat;
                self.next_song_locked(pi, repeat, removal.hint);
            }
            self.change_playback(pi);
        }

        let flags = UpdateFlags {
            queue_changed: removal.queue_changed,
            delayed: false,
        };
        self.queue_update(
            Some(pi),
            UpdateLevel::Structure,
            removal.before,
            removal.span,
            flags,
        );
        if removal.position_cleared {
            self.updates.position(self.playlists[pi].id);
        }
    }

    // ---- playlist set -------------------------------------------------

    /// Create a playlist at `at` (clamped to the end), preferring `stamp`.
    pub fn insert_playlist(&mut self, at: Option<usize>, stamp: Option<i32>) -> PlaylistId {
        let len = self.playlists.len();
        let at = at.filter(|&at| at <= len).unwrap_or(len);
        let id = self.ids.create(stamp);
        self.playlists.insert(at, PlaylistData::new(id));
        self.renumber(at);
        tracing::info!(playlist = %id, at, "playlist created");
        self.queue_update(Some(at), UpdateLevel::Structure, 0, 0, UpdateFlags::default());
        id
    }

    pub fn reorder(&mut self, from: usize, to: usize, count: usize) -> bool {
        let len = self.playlists.len();
        if from + count > len || to + count > len || count == 0 || from == to {
            return false;
        }
        let moved: Vec<PlaylistData> = self.playlists.drain(from..from + count).collect();
        self.playlists.splice(to..to, moved);
        self.renumber(from.min(to));
        self.queue_update(None, UpdateLevel::Structure, 0, 0, UpdateFlags::default());
        true
    }

    pub fn remove_playlist(&mut self, pi: usize) {
        let id = self.playlists[pi].id;
        self.scan.cancel_playlist(id);
        self.playlists.remove(pi);
        self.ids.kill(id);
        tracing::info!(playlist = %id, "playlist removed");

        if self.playlists.is_empty() {
            let fresh = self.ids.create(None);
            self.playlists.push(PlaylistData::new(fresh));
        }
        self.renumber(pi);

        if self.active == id {
            let next = pi.min(self.playlists.len() - 1);
            self.active = self.playlists[next].id;
            self.updates.event(PlaylistEvent::Activate);
        }
        if self.playing == Some(id) {
            self.playing = None;
            self.stop_playback();
            self.updates.event(PlaylistEvent::SetPlaying);
            self.updates.event(PlaylistEvent::PlaybackStop);
        }

        self.queue_update(None, UpdateLevel::Structure, 0, 0, UpdateFlags::default());
    }

    // ---- persisted state ----------------------------------------------

    pub fn snapshot_state(&self) -> SavedState {
        let paused = self.playback.paused();
        let time = self.playback.time_ms();
        let playlists = self
            .playlists
            .iter()
            .enumerate()
            .map(|(index, p)| {
                let is_playing = Some(p.id) == self.playing;
                SavedPlaylist {
                    index,
                    stamp: Some(p.id.0),
                    filename: p.filename.clone(),
                    position: p.position(),
                    resume_state: if is_playing && paused {
                        ResumeState::Pause
                    } else {
                        ResumeState::Play
                    },
                    resume_time: if is_playing { time } else { p.resume_time },
                }
            })
            .collect();
        SavedState {
            active: Some(self.active_index()),
            playing: self.playing_index(),
            playlists,
        }
    }

    pub fn apply_saved(&mut self, state: &SavedState) {
        for saved in &state.playlists {
            if saved.index == self.playlists.len() {
                self.insert_playlist(None, saved.stamp);
            }
            let Some(p) = self.playlists.get_mut(saved.index) else {
                continue;
            };
            p.filename = saved.filename.clone();
            if let Some(row) = saved.position.filter(|&row| row < p.len()) {
                p.set_position(Some(row), true);
            }
            p.resume_time = saved.resume_time;
        }

        let active = state.active.filter(|&i| i < self.playlists.len()).unwrap_or(0);
        self.active = self.playlists[active].id;

        self.resume_playlist = state.playing;
        self.resume_paused = false;
        if let Some(index) = state.playing {
            match state.playlists.iter().find(|s| s.index == index) {
                Some(saved) if saved.resume_state == ResumeState::Stop => {
                    self.resume_playlist = None;
                }
                Some(saved) if saved.resume_state == ResumeState::Pause => {
                    self.resume_paused = true;
                }
                _ => {}
            }
        }

        for p in &mut self.playlists {
            let focus = p.position().or((!p.is_empty()).then_some(0));
            if let Some(row) = focus {
                p.select_all(false);
                p.select(row, true);
                p.set_focus(Some(row));
            }
        }
        self.discard_updates();
    }
}
