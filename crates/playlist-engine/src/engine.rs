//! Engine entry point and process-wide operations.
//!
//! One mutex guards the whole [`Core`]; a companion condition variable wakes
//! callers blocked on an entry's scan. Scanning runs on the worker pool and
//! only re-enters the lock to claim a job and apply its result.

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::ReentrantMutex;
use playlist_types::{PlaylistEvent, PlaylistId, Tuple, UpdateLevel};

use crate::cache::MetadataCache;
use crate::config::{EngineConfig, Settings};
use crate::control::{ControlLoop, ControlMsg};
use crate::entry::is_blacklisted;
use crate::events::{EventBus, ListenerId};
use crate::handle::Playlist;
use crate::playback::{DecodeInfo, PlaybackBridge, PlaybackSink};
use crate::playlist::{DEFAULT_TITLE, ScanStatus, TEMP_TITLE};
use crate::probe::Probe;
use crate::registry::{Core, UpdateFlags};
use crate::scan::{JobId, ScanCoordinator, ScanResult, ScanStats};
use crate::scanner::{self, ScanHooks, ScannerPool};
use crate::state_file;
use crate::update::UpdateDispatcher;

pub(crate) struct Shared {
    core: Mutex<Core>,
    cond: Condvar,
    /// Serializes deliveries; reentrant so a listener may flush again.
    flush_lock: ReentrantMutex<()>,
    pub events: EventBus,
    pub cache: MetadataCache,
    probe: Arc<dyn Probe>,
    pool: Mutex<Option<ScannerPool>>,
    control_tx: Sender<ControlMsg>,
    control_thread: Mutex<Option<JoinHandle<()>>>,
    config: EngineConfig,
}

impl Shared {
    pub fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify(&self) {
        self.cond.notify_all();
    }

    /// Swap out pending notifications and deliver them outside the lock.
    pub fn flush(&self) {
        let _serial = self.flush_lock.lock();
        let batch = self.lock().take_pending();
        let events = batch.into_events();
        if events.is_empty() {
            return;
        }
        tracing::debug!(count = events.len(), "flushing playlist events");
        self.events.publish(&events);
    }

    /// Block until the entry at `row` has what the caller needs, issuing at
    /// most one scan request. Returns with the lock held.
    pub fn wait_for_entry(
        &self,
        id: PlaylistId,
        row: usize,
        need_decoder: bool,
        need_tuple: bool,
    ) -> MutexGuard<'_, Core> {
        let mut core = self.lock();
        let mut scan_started = false;
        loop {
            if core.shutting_down {
                break;
            }
            let Some(pi) = core.index_of(id) else {
                break;
            };
            let Some(entry) = core.playlists[pi].entry(row) else {
                break;
            };
            if is_blacklisted(&entry.filename) {
                break;
            }
            if (!need_decoder || entry.decoder.is_some()) && (!need_tuple || entry.tuple.is_valid())
            {
                break;
            }
            let key = entry.key;
            if !core.scan.is_pending(key) {
                if scan_started {
                    break;
                }
                core.request_scan(pi, row);
            } else if !scan_started {
                // playback may never read the entry; do not wait on it
                core.release_playback_scan(pi, row);
            }
            scan_started = true;
            core = self.cond.wait(core).unwrap_or_else(PoisonError::into_inner);
        }
        core
    }

    pub fn save_state(&self, path: &Path) -> Result<()> {
        let state = self.lock().snapshot_state();
        state_file::write(path, &state)?;
        tracing::info!(path = %path.display(), playlists = state.playlists.len(), "playlist state saved");
        Ok(())
    }

    pub fn autosave(&self) {
        let Some(path) = self.config.state_path.as_deref() else {
            return;
        };
        if let Err(err) = self.save_state(path) {
            tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "autosave failed");
        }
    }
}

struct EngineHooks(Weak<Shared>);

impl ScanHooks for EngineHooks {
    fn claim(&self, job: JobId) -> bool {
        self.0
            .upgrade()
            .is_some_and(|shared| shared.lock().scan.claim(job))
    }

    fn finish(&self, result: ScanResult) {
        if let Some(shared) = self.0.upgrade() {
            shared.lock().finish_scan(result);
            shared.notify();
        }
    }
}

/// Handle to a running playlist engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Build the engine and its scan workers. The returned [`ControlLoop`] must
    /// be run (or spawned) for notifications to be delivered automatically.
    pub fn new(
        config: EngineConfig,
        probe: Arc<dyn Probe>,
        sink: Box<dyn PlaybackSink>,
    ) -> Result<(Self, ControlLoop)> {
        let (scan_tx, scan_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();

        let core = Core::new(
            config.settings(),
            ScanCoordinator::new(config.scan_threads, scan_tx),
            UpdateDispatcher::new(config.delayed_update(), control_tx.clone()),
            PlaybackBridge::new(sink),
        );

        let shared = Arc::new(Shared {
            core: Mutex::new(core),
            cond: Condvar::new(),
            flush_lock: ReentrantMutex::new(()),
            events: EventBus::new(),
            cache: MetadataCache::new(config.cache_ttl()),
            probe: probe.clone(),
            pool: Mutex::new(None),
            control_tx,
            control_thread: Mutex::new(None),
            config: config.clone(),
        });

        let hooks: Arc<dyn ScanHooks> = Arc::new(EngineHooks(Arc::downgrade(&shared)));
        let pool = ScannerPool::spawn(config.scan_threads, scan_rx, probe, hooks)?;
        *shared.pool.lock().unwrap_or_else(PoisonError::into_inner) = Some(pool);

        let control = ControlLoop::new(
            Arc::downgrade(&shared),
            control_rx,
            config.autosave_interval(),
            config.cache_ttl(),
        );
        tracing::info!(scan_threads = config.scan_threads, "playlist engine started");
        Ok((Self { shared }, control))
    }

    /// Build the engine and run its control loop on a dedicated thread.
    pub fn start(
        config: EngineConfig,
        probe: Arc<dyn Probe>,
        sink: Box<dyn PlaybackSink>,
    ) -> Result<Self> {
        let (engine, control) = Self::new(config, probe, sink)?;
        let handle = control.spawn()?;
        *engine
            .shared
            .control_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(engine)
    }

    fn handle(&self, id: PlaylistId) -> Playlist {
        Playlist::new(Arc::downgrade(&self.shared), id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    // ---- playlists ----------------------------------------------------

    pub fn n_playlists(&self) -> usize {
        self.shared.lock().playlists.len()
    }

    pub fn by_index(&self, index: usize) -> Option<Playlist> {
        let id = self.shared.lock().playlists.get(index)?.id;
        Some(self.handle(id))
    }

    /// Handle for `id` if that playlist still exists.
    pub fn by_id(&self, id: PlaylistId) -> Option<Playlist> {
        self.shared.lock().index_of(id)?;
        Some(self.handle(id))
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        let ids: Vec<PlaylistId> = self.shared.lock().playlists.iter().map(|p| p.id).collect();
        ids.into_iter().map(|id| self.handle(id)).collect()
    }

    /// Create an empty playlist at `at` (`None` appends).
    pub fn insert_playlist(&self, at: Option<usize>) -> Playlist {
        let id = self.shared.lock().insert_playlist(at, None);
        self.handle(id)
    }

    /// Like [`Self::insert_playlist`], reusing `stamp` if it was never handed out.
    pub fn insert_with_stamp(&self, at: Option<usize>, stamp: i32) -> Playlist {
        let id = self.shared.lock().insert_playlist(at, Some(stamp));
        self.handle(id)
    }

    /// Move `count` playlists starting at `from` so the first lands at `to`.
    pub fn reorder_playlists(&self, from: usize, to: usize, count: usize) -> bool {
        self.shared.lock().reorder(from, to, count)
    }

    pub fn active_playlist(&self) -> Playlist {
        let id = self.shared.lock().active;
        self.handle(id)
    }

    /// Insert a playlist after the active one and activate it.
    pub fn new_playlist(&self) -> Playlist {
        let playlist = {
            let mut core = self.shared.lock();
            let at = core.active_index() + 1;
            let id = core.insert_playlist(Some(at), None);
            self.handle(id)
        };
        playlist.activate();
        playlist
    }

    /// The active playlist if it is empty and untitled, otherwise a new one after it.
    pub fn blank_playlist(&self) -> Playlist {
        let mut core = self.shared.lock();
        let pi = core.active_index();
        let current = &core.playlists[pi];
        let reusable = current.title == DEFAULT_TITLE && current.is_empty();
        let id = if reusable {
            current.id
        } else {
            core.insert_playlist(Some(pi + 1), None)
        };
        self.handle(id)
    }

    /// The playlist titled "Now Playing", creating it from a blank one if needed.
    pub fn temporary_playlist(&self) -> Playlist {
        let existing = self
            .shared
            .lock()
            .playlists
            .iter()
            .find(|p| p.title == TEMP_TITLE)
            .map(|p| p.id);
        if let Some(id) = existing {
            return self.handle(id);
        }
        let playlist = self.blank_playlist();
        playlist.set_title(TEMP_TITLE);
        playlist
    }

    pub fn playing_playlist(&self) -> Option<Playlist> {
        let id = self.shared.lock().playing?;
        Some(self.handle(id))
    }

    // ---- playback -----------------------------------------------------

    pub fn stop_playback(&self) {
        self.shared.lock().play(None, false);
    }

    /// Restart playback where the persisted state left it.
    pub fn resume(&self) {
        let mut core = self.shared.lock();
        if core.settings.always_resume_paused {
            core.resume_paused = true;
        }
        let (target, paused) = (core.resume_playlist, core.resume_paused);
        core.play(target, paused);
    }

    /// Current playback serial, if something is playing.
    pub fn playback_serial(&self) -> Option<u64> {
        self.shared.lock().playback.serial()
    }

    pub fn playback_check_serial(&self, serial: u64) -> bool {
        self.shared.lock().playback.check_serial(serial)
    }

    /// Called by the playback thread to open the current entry. Runs the
    /// pending playback scan on the calling thread. `None` once `serial` is stale.
    pub fn playback_entry_read(&self, serial: u64) -> Option<DecodeInfo> {
        let request = {
            let mut core = self.shared.lock();
            let (pi, row) = core.playback_entry(serial)?;
            let key = core.playlists[pi].entries()[row].key;
            let pending = match core.scan.find_entry_mut(key) {
                Some(job) if job.for_playback => {
                    job.handled_by_playback = true;
                    job.request.take()
                }
                _ => None,
            };
            match pending {
                Some(request) => request,
                None => {
                    core.scan.cancel(key);
                    core.scan_queue_entry(pi, row, true)?;
                    let job = core.scan.find_entry_mut(key)?;
                    job.handled_by_playback = true;
                    job.request.take()?
                }
            }
        };

        let result = scanner::run(self.shared.probe.as_ref(), &request);
        let image = result.image.clone();
        let error = result.error.clone();

        let info = {
            let mut guard = self.shared.lock();
            let core = &mut *guard;
            core.finish_scan(result);
            core.playback_entry(serial).map(|(pi, row)| {
                let entry = &core.playlists[pi].entries()[row];
                core.playback.set_info(row, &entry.tuple);
                DecodeInfo {
                    filename: entry.filename.clone(),
                    decoder: entry.decoder.clone(),
                    tuple: entry.tuple.clone(),
                    image,
                    error,
                }
            })
        };
        self.shared.notify();
        info
    }

    /// Stream metadata read by the playback thread for the playing entry.
    pub fn playback_entry_set_tuple(&self, serial: u64, tuple: Tuple) {
        let mut core = self.shared.lock();
        let Some((pi, row)) = core.playback_entry(serial) else {
            return;
        };
        core.playlists[pi].set_entry_tuple(row, tuple);
        core.queue_update(Some(pi), UpdateLevel::Metadata, row, 1, UpdateFlags::default());
    }

    // ---- scanning -----------------------------------------------------

    /// Reset every entry for `filename` in every playlist and rescan.
    pub fn rescan_file(&self, filename: &str) {
        let mut core = self.shared.lock();
        let mut restart = false;
        for pi in 0..core.playlists.len() {
            let rows: Vec<usize> = core.playlists[pi]
                .entries()
                .iter()
                .enumerate()
                .filter(|(_, e)| e.filename == filename)
                .map(|(row, _)| row)
                .collect();
            for &row in &rows {
                core.playlists[pi].set_entry_tuple(row, Tuple::default());
                core.queue_update(Some(pi), UpdateLevel::Metadata, row, 1, UpdateFlags::default());
            }
            if !rows.is_empty() {
                core.playlists[pi].scan_status = ScanStatus::ScanActive;
                restart = true;
            }
        }
        if restart {
            core.scan_restart();
        }
    }

    /// Nominal scan switch; background scanning also stays off while
    /// `metadata_on_play` is set.
    pub fn enable_scan(&self, enable: bool) {
        let mut core = self.shared.lock();
        core.scan.enabled_nominal = enable;
        core.scan.enabled = enable && !core.settings.metadata_on_play;
        core.scan_restart();
    }

    pub fn scan_in_progress_any(&self) -> bool {
        self.shared
            .lock()
            .playlists
            .iter()
            .any(|p| p.scan_status != ScanStatus::NotScanning)
    }

    pub fn scan_stats(&self) -> ScanStats {
        self.shared.lock().scan.stats()
    }

    // ---- settings -----------------------------------------------------

    pub fn settings(&self) -> Settings {
        self.shared.lock().settings
    }

    pub fn set_shuffle(&self, shuffle: bool) {
        self.shared.lock().settings.shuffle = shuffle;
    }

    pub fn set_album_shuffle(&self, album_shuffle: bool) {
        self.shared.lock().settings.album_shuffle = album_shuffle;
    }

    pub fn set_repeat(&self, repeat: bool) {
        self.shared.lock().settings.repeat = repeat;
    }

    pub fn set_advance_on_delete(&self, advance: bool) {
        self.shared.lock().settings.advance_on_delete = advance;
    }

    pub fn set_always_resume_paused(&self, paused: bool) {
        self.shared.lock().settings.always_resume_paused = paused;
    }

    pub fn set_metadata_on_play(&self, on_play: bool) {
        let mut core = self.shared.lock();
        core.settings.metadata_on_play = on_play;
        core.scan.enabled = core.scan.enabled_nominal && !on_play;
        core.scan_restart();
    }

    // ---- notifications ------------------------------------------------

    pub fn update_pending_any(&self) -> bool {
        self.shared.lock().updates.is_pending()
    }

    /// Deliver pending notifications now, on the calling thread.
    pub fn process_pending_update(&self) {
        self.shared.flush();
    }

    pub fn subscribe(&self) -> Receiver<PlaylistEvent> {
        self.shared.events.subscribe()
    }

    pub fn add_listener<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&PlaylistEvent) + Send + Sync + 'static,
    {
        self.shared.events.add_listener(f)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.events.remove_listener(id)
    }

    // ---- persisted state ----------------------------------------------

    pub fn save_state(&self, path: &Path) -> Result<()> {
        self.shared.save_state(path)
    }

    /// Restore positions and resume information. `false` when no state file exists.
    pub fn load_state(&self, path: &Path) -> Result<bool> {
        let Some(state) = state_file::read(path)? else {
            return Ok(false);
        };
        self.shared.lock().apply_saved(&state);
        tracing::info!(path = %path.display(), playlists = state.playlists.len(), "playlist state loaded");
        Ok(true)
    }

    // ---- housekeeping -------------------------------------------------

    pub fn evict_cache(&self) -> usize {
        self.shared.cache.evict_expired()
    }

    /// Stop playback and scanning, join the workers and the control thread.
    pub fn shutdown(&self) {
        {
            let mut core = self.shared.lock();
            if core.shutting_down {
                return;
            }
            core.shutting_down = true;
            core.playing = None;
            core.playback.stop();
            core.scan.close();
        }
        self.shared.notify();

        let pool = self
            .shared
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.join();
        }

        let _ = self.shared.control_tx.send(ControlMsg::Shutdown);
        let control = self
            .shared
            .control_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = control {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::warn!("control thread exited by panic");
            }
        }
        tracing::info!("playlist engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PlaylistAddItem;
    use crate::playback::NullPlayback;
    use crate::probe::{CoverArt, DecoderHandle};

    struct Upper;

    impl Probe for Upper {
        fn probe(&self, _: &str) -> Result<DecoderHandle> {
            Ok(DecoderHandle::new("test"))
        }

        fn read_tuple(&self, filename: &str, _: &DecoderHandle) -> Result<Tuple> {
            let mut tuple = Tuple::valid();
            tuple.title = Some(filename.to_uppercase());
            Ok(tuple)
        }

        fn read_image(&self, _: &str, _: &DecoderHandle) -> Result<Option<CoverArt>> {
            Ok(None)
        }
    }

    fn engine() -> Engine {
        let (engine, _control) = Engine::new(
            EngineConfig::default(),
            Arc::new(Upper),
            Box::new(NullPlayback::default()),
        )
        .unwrap();
        engine
    }

    #[test]
    fn starts_with_one_active_playlist() {
        let engine = engine();
        assert_eq!(engine.n_playlists(), 1);
        assert_eq!(engine.active_playlist().id(), PlaylistId(1000));
        engine.shutdown();
    }

    #[test]
    fn blank_and_temporary_playlists() {
        let engine = engine();
        let first = engine.active_playlist();
        assert_eq!(engine.blank_playlist(), first);

        first.insert_items(None, vec![PlaylistAddItem::new("a.flac")]);
        let blank = engine.blank_playlist();
        assert_ne!(blank, first);
        assert_eq!(blank.index(), Some(1));

        let temp = engine.temporary_playlist();
        assert_eq!(temp.title(), TEMP_TITLE);
        assert_eq!(engine.temporary_playlist(), temp);
        engine.shutdown();
    }

    #[test]
    fn playback_read_checks_serial() {
        let engine = engine();
        let playlist = engine.active_playlist();
        playlist.insert_items(None, vec![PlaylistAddItem::new("a.flac")]);
        playlist.start_playback(false);

        let serial = engine.playback_serial().unwrap();
        let info = engine.playback_entry_read(serial).unwrap();
        assert_eq!(info.filename, "a.flac");
        assert_eq!(info.tuple.title.as_deref(), Some("A.FLAC"));
        assert_eq!(info.decoder, Some(DecoderHandle::new("test")));

        engine.stop_playback();
        assert!(!engine.playback_check_serial(serial));
        assert!(engine.playback_entry_read(serial).is_none());
        engine.shutdown();
    }

    #[test]
    fn removed_playlist_handle_is_inert() {
        let engine = engine();
        let extra = engine.insert_playlist(None);
        extra.insert_items(None, vec![PlaylistAddItem::new("a.flac")]);
        extra.remove();

        assert!(!extra.exists());
        assert_eq!(extra.n_entries(), 0);
        assert_eq!(extra.entry_filename(0), None);
        extra.insert_items(None, vec![PlaylistAddItem::new("b.flac")]);
        assert_eq!(engine.n_playlists(), 1);
        engine.shutdown();
    }
}
