mod common;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use playlist_engine::types::{GetMode, PlaylistEvent, UpdateLevel};

use common::{ScriptedProbe, manual_engine, record, tagged};

#[test]
fn mutations_between_flushes_coalesce_into_one_update() {
    let (engine, _control) = manual_engine(ScriptedProbe::with_delay(Duration::ZERO));
    let seen = record(&engine);
    let playlist = engine.active_playlist();
    let names: Vec<String> = (0..10).map(|n| format!("{n}.flac")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    playlist.insert_items(None, tagged(&refs));
    engine.process_pending_update();
    seen.lock().unwrap().clear();

    playlist.select_entry(2, true);
    playlist.select_entry(5, true);
    playlist.remove_entries(7, 1);
    engine.process_pending_update();

    let events = seen.lock().unwrap().clone();
    let updates: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, PlaylistEvent::Update { .. }))
        .collect();
    assert_eq!(
        updates,
        vec![&PlaylistEvent::Update {
            level: UpdateLevel::Structure
        }]
    );
    assert_eq!(events[0], *updates[0]);

    let detail = playlist.update_detail();
    assert_eq!(detail.level, UpdateLevel::Structure);
    assert_eq!(detail.before, 2);
    assert_eq!(detail.after, 2);
    assert!(!playlist.update_pending());
    engine.shutdown();
}

#[test]
fn no_op_mutations_queue_nothing() {
    let (engine, _control) = manual_engine(ScriptedProbe::with_delay(Duration::ZERO));
    let playlist = engine.active_playlist();
    playlist.insert_items(None, tagged(&["a", "b", "c"]));
    playlist.select_entry(1, true);
    engine.process_pending_update();

    playlist.remove_entries(1, 0);
    playlist.select_entry(1, true);
    playlist.select_entry(0, false);
    playlist.queue_remove(0, 1);
    assert_eq!(playlist.shift_entries(0, 1), 0);
    assert!(!playlist.update_pending());
    assert!(!engine.update_pending_any());
    engine.shutdown();
}

#[test]
fn removing_the_playing_entry_reports_structure_then_position() {
    let (engine, _control) = manual_engine(ScriptedProbe::with_delay(Duration::ZERO));
    let seen = record(&engine);
    let playlist = engine.active_playlist();
    playlist.insert_items(None, tagged(&["a", "b", "c"]));
    playlist.set_position(Some(1));
    playlist.start_playback(false);
    engine.process_pending_update();
    seen.lock().unwrap().clear();

    playlist.remove_entries(1, 1);
    engine.process_pending_update();

    assert_eq!(playlist.position(), None);
    assert!(engine.playing_playlist().is_none());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            PlaylistEvent::Update {
                level: UpdateLevel::Structure
            },
            PlaylistEvent::Position {
                playlist: playlist.id()
            },
            PlaylistEvent::SetPlaying,
            PlaylistEvent::PlaybackStop,
            PlaylistEvent::ScanComplete {
                playlist: playlist.id()
            },
        ]
    );
    engine.shutdown();
}

#[test]
fn advance_on_delete_moves_to_the_vacated_row() {
    let (engine, _control) = manual_engine(ScriptedProbe::with_delay(Duration::ZERO));
    engine.set_advance_on_delete(true);
    let playlist = engine.active_playlist();
    playlist.insert_items(None, tagged(&["a", "b", "c"]));
    playlist.set_position(Some(1));
    playlist.start_playback(false);

    playlist.remove_entries(1, 1);
    assert_eq!(playlist.position(), Some(1));
    assert_eq!(playlist.entry_filename(1).as_deref(), Some("c"));
    assert_eq!(engine.playing_playlist(), Some(playlist.clone()));
    engine.shutdown();
}

#[test]
fn listener_may_flush_again_from_inside_a_callback() {
    let (engine, _control) = manual_engine(ScriptedProbe::with_delay(Duration::ZERO));
    let inner = engine.clone();
    engine.add_listener(move |event| {
        if matches!(event, PlaylistEvent::Activate) {
            inner.process_pending_update();
        }
    });
    let second = engine.insert_playlist(None);
    second.activate();
    engine.process_pending_update();
    assert_eq!(engine.active_playlist(), second);
    engine.shutdown();
}

#[test]
fn playlist_management_keeps_handles_valid() {
    let (engine, _control) = manual_engine(ScriptedProbe::with_delay(Duration::ZERO));
    let first = engine.active_playlist();
    let created = engine.new_playlist();
    assert_eq!(engine.active_playlist(), created);
    assert_eq!(created.index(), Some(1));

    let third = engine.insert_playlist(Some(0));
    assert_eq!(first.index(), Some(1));
    assert_eq!(created.index(), Some(2));

    assert!(engine.reorder_playlists(0, 2, 1));
    assert_eq!(third.index(), Some(2));
    assert_eq!(engine.by_index(0), Some(first.clone()));

    created.remove();
    assert_eq!(engine.n_playlists(), 2);
    assert!(!created.exists());
    assert_eq!(engine.active_playlist(), third);
    assert!(engine.by_id(created.id()).is_none());
    engine.shutdown();
}

#[test]
fn state_file_restores_positions_and_resume() {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("playlist-engine-state-{nanos}"));
    let path = dir.join("playlist-state");

    {
        let (engine, _control) = manual_engine(ScriptedProbe::with_delay(Duration::ZERO));
        let first = engine.active_playlist();
        first.insert_items(None, tagged(&["a", "b"]));
        first.set_position(Some(1));
        let second = engine.insert_playlist(None);
        second.insert_items(None, tagged(&["c", "d", "e"]));
        second.set_position(Some(2));
        second.set_filename(Some("/lists/second.m3u"));
        second.start_playback(true);
        second.activate();
        engine.save_state(&path).unwrap();
        engine.shutdown();
    }

    let (engine, _control) = manual_engine(ScriptedProbe::with_delay(Duration::ZERO));
    let first = engine.active_playlist();
    first.insert_items(None, tagged(&["a", "b"]));
    let second = engine.insert_playlist(None);
    second.insert_items(None, tagged(&["c", "d", "e"]));

    assert!(engine.load_state(&path).unwrap());
    assert!(!engine.update_pending_any());
    assert_eq!(engine.active_playlist(), second);
    assert_eq!(first.position(), Some(1));
    assert_eq!(second.position(), Some(2));
    assert_eq!(second.focus(), Some(2));
    assert!(second.entry_selected(2));
    assert_eq!(second.filename().as_deref(), Some("/lists/second.m3u"));

    engine.resume();
    assert_eq!(engine.playing_playlist(), Some(second.clone()));
    let serial = engine.playback_serial().unwrap();
    let info = engine.playback_entry_read(serial).unwrap();
    assert_eq!(info.filename, "e");
    assert_eq!(
        second.entry_tuple(2, GetMode::NoWait).unwrap().title.as_deref(),
        Some("e")
    );

    engine.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_state_file_is_not_an_error() {
    let (engine, _control) = manual_engine(ScriptedProbe::with_delay(Duration::ZERO));
    let path = std::env::temp_dir().join("playlist-engine-no-such-dir/state");
    assert!(!engine.load_state(&path).unwrap());
    engine.shutdown();
}
