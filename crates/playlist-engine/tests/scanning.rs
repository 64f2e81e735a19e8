mod common;

use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use playlist_engine::Playlist;
use playlist_engine::types::{GetMode, PlaylistEvent, TupleState};

use common::{ScriptedProbe, items, running_engine};

/// Block until `playlist` reports scan completion and is idle.
fn wait_scan_complete(rx: &Receiver<PlaylistEvent>, playlist: &Playlist) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match rx.recv_deadline(deadline) {
            Ok(PlaylistEvent::ScanComplete { playlist: done })
                if done == playlist.id() && !playlist.scan_in_progress() =>
            {
                return;
            }
            Ok(_) => {}
            Err(err) => panic!("no scan-complete for {}: {err}", playlist.id()),
        }
    }
}

#[test]
fn scan_completes_once_and_resolves_every_entry() {
    let probe = ScriptedProbe::with_delay(Duration::from_millis(2));
    let engine = running_engine(probe.clone(), 2);
    let rx = engine.subscribe();

    let playlist = engine.active_playlist();
    let names: Vec<String> = (0..24)
        .map(|n| {
            if n % 5 == 0 {
                format!("/music/broken-{n}.flac")
            } else {
                format!("/music/track-{n}.flac")
            }
        })
        .collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    playlist.insert_items(None, items(&refs));

    wait_scan_complete(&rx, &playlist);
    assert!(!playlist.scan_in_progress());

    for (row, info) in playlist.entries().iter().enumerate() {
        let state = info.tuple.state();
        assert_ne!(state, TupleState::Initial, "row {row} left unscanned");
        if info.filename.contains("broken") {
            assert_eq!(state, TupleState::Failed);
            assert!(info.error.is_some());
        } else {
            assert_eq!(state, TupleState::Valid);
            assert_eq!(info.length, 1000);
        }
    }
    assert_eq!(playlist.total_length(), 1000 * 19);

    // no second completion without new work
    std::thread::sleep(Duration::from_millis(100));
    let again = rx
        .try_iter()
        .filter(|event| matches!(event, PlaylistEvent::ScanComplete { .. }))
        .count();
    assert_eq!(again, 0);
    engine.shutdown();
}

#[test]
fn outstanding_jobs_never_exceed_worker_budget() {
    let probe = ScriptedProbe::with_delay(Duration::from_millis(3));
    let engine = running_engine(probe.clone(), 2);
    let rx = engine.subscribe();

    let mut playlists = vec![engine.active_playlist()];
    playlists.push(engine.insert_playlist(None));
    playlists.push(engine.insert_playlist(None));
    for (n, playlist) in playlists.iter().enumerate() {
        let names: Vec<String> = (0..10).map(|i| format!("/p{n}/{i}.mp3")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        playlist.insert_items(None, items(&refs));
    }

    for playlist in &playlists {
        wait_scan_complete(&rx, playlist);
    }
    let stats = engine.scan_stats();
    assert!(stats.peak <= 2, "peak outstanding {}", stats.peak);
    assert!(probe.peak() <= 2, "peak concurrent probes {}", probe.peak());
    assert_eq!(stats.outstanding, 0);
    assert!(!engine.scan_in_progress_any());
    engine.shutdown();
}

#[test]
fn deleting_a_playlist_mid_scan_is_harmless() {
    let probe = ScriptedProbe::with_delay(Duration::from_millis(5));
    let engine = running_engine(probe.clone(), 2);
    let rx = engine.subscribe();

    let doomed = engine.insert_playlist(None);
    let names: Vec<String> = (0..20).map(|i| format!("/doomed/{i}.ogg")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    doomed.insert_items(None, items(&refs));
    std::thread::sleep(Duration::from_millis(8));
    doomed.remove();
    assert!(!doomed.exists());

    let survivor = engine.active_playlist();
    survivor.insert_items(None, items(&["/kept/a.ogg", "/kept/b.ogg"]));
    wait_scan_complete(&rx, &survivor);
    assert_eq!(
        survivor.entry_tuple(1, GetMode::NoWait).unwrap().state(),
        TupleState::Valid
    );
    engine.shutdown();
}

#[test]
fn waiting_readers_share_a_single_scan() {
    let probe = ScriptedProbe::with_delay(Duration::from_millis(20));
    let engine = running_engine(probe.clone(), 2);
    engine.enable_scan(false);

    let playlist = engine.active_playlist();
    playlist.insert_items(None, items(&["/lazy/a.wav", "/lazy/b.wav"]));
    let unscanned = playlist.entry_tuple(0, GetMode::NoWait).unwrap();
    assert_eq!(unscanned.state(), TupleState::Initial);

    let barrier = Arc::new(Barrier::new(4));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let playlist = playlist.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                playlist.entry_tuple(0, GetMode::Wait).unwrap()
            })
        })
        .collect();
    for reader in readers {
        let tuple = reader.join().unwrap();
        assert_eq!(tuple.state(), TupleState::Valid);
        assert_eq!(tuple.title.as_deref(), Some("a"));
    }

    assert_eq!(probe.calls("/lazy/a.wav"), 1);
    assert_eq!(probe.calls("/lazy/b.wav"), 0);
    assert!(playlist.entry_decoder(0, GetMode::NoWait).is_some());
    engine.shutdown();
}

#[test]
fn wait_on_failed_entry_returns_after_one_attempt() {
    let probe = ScriptedProbe::with_delay(Duration::ZERO);
    let engine = running_engine(probe.clone(), 1);
    engine.enable_scan(false);

    let playlist = engine.active_playlist();
    playlist.insert_items(None, items(&["/x/broken.flac"]));
    let tuple = playlist.entry_tuple(0, GetMode::Wait).unwrap();
    assert_eq!(tuple.state(), TupleState::Failed);
    assert_eq!(probe.calls("/x/broken.flac"), 1);

    // a failed tuple gets one fresh attempt per blocking read
    let again = playlist.entry_tuple(0, GetMode::Wait).unwrap();
    assert_eq!(again.state(), TupleState::Failed);
    assert_eq!(probe.calls("/x/broken.flac"), 2);
    engine.shutdown();
}

#[test]
fn rescan_resets_metadata_and_scans_again() {
    let probe = ScriptedProbe::with_delay(Duration::ZERO);
    let engine = running_engine(probe.clone(), 2);
    let rx = engine.subscribe();

    let playlist = engine.active_playlist();
    playlist.insert_items(None, items(&["/r/one.mp3", "/r/two.mp3"]));
    wait_scan_complete(&rx, &playlist);
    assert_eq!(probe.calls("/r/one.mp3"), 1);

    playlist.rescan_all();
    wait_scan_complete(&rx, &playlist);
    assert_eq!(
        playlist.entry_tuple(0, GetMode::NoWait).unwrap().state(),
        TupleState::Valid
    );
    // the decoder is kept, so only the tag read is repeated
    assert_eq!(probe.calls("/r/one.mp3"), 1);
    engine.shutdown();
}
