//! `playlist-cli`: drive the playlist engine from the command line.
//!
//! - `scan`: add files to the "Now Playing" playlist, wait for the background
//!   scan to finish and print the resolved metadata.
//! - `order`: print the sequence `next` walks through, honouring shuffle,
//!   album shuffle and repeat.

mod cli;
mod config;
mod library;

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use crossbeam_channel::Receiver;
use playlist_engine::types::{GetMode, PlaylistEvent, SortType, Tuple, TupleState};
use playlist_engine::{Engine, NullPlayback, Playlist, PlaylistAddItem, SymphoniaProbe};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct EntryReport<'a> {
    row: usize,
    filename: &'a str,
    tuple: &'a Tuple,
    error: Option<&'a str>,
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,playlist_engine=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::engine_config(&args)?;
    let engine = Engine::start(
        config,
        Arc::new(SymphoniaProbe),
        Box::new(NullPlayback::default()),
    )?;

    let signal_engine = engine.clone();
    let _ = ctrlc::set_handler(move || {
        save_state(&signal_engine);
        std::process::exit(130);
    });

    if let Some(path) = engine.config().state_path.as_deref() {
        engine.load_state(path)?;
    }

    let result = match &args.cmd {
        cli::Command::Scan {
            paths,
            sort,
            dedupe,
            json,
        } => {
            let files = library::collect(paths)?;
            run_scan(&engine, files, *sort, *dedupe, *json)
        }
        cli::Command::Order {
            paths,
            count,
            shuffle,
            album_shuffle,
            repeat,
        } => {
            engine.set_shuffle(*shuffle);
            engine.set_album_shuffle(*album_shuffle);
            let files = library::collect(paths)?;
            run_order(&engine, files, *count, *repeat)
        }
    };

    save_state(&engine);
    engine.shutdown();
    result
}

fn save_state(engine: &Engine) {
    let Some(path) = engine.config().state_path.clone() else {
        return;
    };
    if let Err(err) = engine.save_state(&path) {
        tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "state save failed");
    }
}

/// Replace the "Now Playing" playlist with `files` and wait for its scan.
fn load_files(engine: &Engine, files: Vec<String>) -> Result<Playlist> {
    if files.is_empty() {
        bail!("no audio files found");
    }
    let events = engine.subscribe();
    let playlist = engine.temporary_playlist();
    playlist.remove_entries(0, playlist.n_entries());
    playlist.insert_items(None, files.into_iter().map(PlaylistAddItem::new).collect());
    playlist.activate();
    // background scanning is off in metadata-on-play mode
    if !engine.settings().metadata_on_play {
        tracing::info!(entries = playlist.n_entries(), "scanning");
        wait_scanned(&events, &playlist);
    }
    Ok(playlist)
}

/// Returns once `playlist` is idle; every return to idle emits `ScanComplete`.
fn wait_scanned(events: &Receiver<PlaylistEvent>, playlist: &Playlist) {
    while playlist.scan_in_progress() {
        if events.recv().is_err() {
            return;
        }
    }
}

fn run_scan(
    engine: &Engine,
    files: Vec<String>,
    sort: Option<SortType>,
    dedupe: bool,
    json: bool,
) -> Result<()> {
    let playlist = load_files(engine, files)?;
    if let Some(scheme) = sort {
        if dedupe {
            playlist.remove_duplicates(scheme);
        } else {
            playlist.sort_entries(scheme);
        }
    }

    let entries = playlist.entries();
    if json {
        let report: Vec<EntryReport<'_>> = entries
            .iter()
            .enumerate()
            .map(|(row, info)| EntryReport {
                row,
                filename: &info.filename,
                tuple: &info.tuple,
                error: info.error.as_deref(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (row, info) in entries.iter().enumerate() {
        let title = info.tuple.formatted_title.as_deref().unwrap_or(&info.filename);
        match info.tuple.state() {
            TupleState::Failed => println!(
                "{row:>4}  {title}  [failed: {}]",
                info.error.as_deref().unwrap_or("no metadata")
            ),
            _ => println!("{row:>4}  {title}  {}", format_length(info.length)),
        }
    }
    println!(
        "{} entries, total {}",
        entries.len(),
        format_length(playlist.total_length())
    );
    Ok(())
}

fn run_order(engine: &Engine, files: Vec<String>, count: usize, repeat: bool) -> Result<()> {
    let playlist = load_files(engine, files)?;
    for step in 0..count {
        if !playlist.next_song(repeat) {
            break;
        }
        let Some(row) = playlist.position() else {
            break;
        };
        let title = playlist
            .entry_tuple(row, GetMode::NoWait)
            .and_then(|t| t.formatted_title)
            .unwrap_or_default();
        println!("{step:>4}  #{row:<4} {title}");
    }
    Ok(())
}

fn format_length(ms: i64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}
