//! Line-oriented persisted playlist state.
//!
//! ```text
//! active 0
//! playing 1
//! playlist 0
//! stamp 1000
//! position 3
//! resume-state 0
//! resume-time 0
//! playlist 1
//! ...
//! ```
//!
//! Each line is `key value`. Unknown keys are ignored so older readers accept
//! newer files.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResumeState {
    #[default]
    Stop,
    Play,
    Pause,
}

impl ResumeState {
    fn code(self) -> i32 {
        match self {
            ResumeState::Stop => 0,
            ResumeState::Play => 1,
            ResumeState::Pause => 2,
        }
    }

    fn from_code(code: i32) -> Self {
        match code {
            1 => ResumeState::Play,
            2 => ResumeState::Pause,
            _ => ResumeState::Stop,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SavedPlaylist {
    pub index: usize,
    pub stamp: Option<i32>,
    pub filename: Option<String>,
    pub position: Option<usize>,
    pub resume_state: ResumeState,
    pub resume_time: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SavedState {
    pub active: Option<usize>,
    pub playing: Option<usize>,
    pub playlists: Vec<SavedPlaylist>,
}

fn index_value(value: &str) -> Option<usize> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|n| usize::try_from(n).ok())
}

pub fn parse(text: &str) -> SavedState {
    let mut state = SavedState::default();
    for line in text.lines() {
        let (key, value) = line.split_once(' ').unwrap_or((line, ""));
        if key == "playlist" {
            if let Some(index) = index_value(value) {
                state.playlists.push(SavedPlaylist {
                    index,
                    ..SavedPlaylist::default()
                });
            }
            continue;
        }
        match (key, state.playlists.last_mut()) {
            ("active", _) => state.active = index_value(value),
            ("playing", _) => state.playing = index_value(value),
            ("stamp", Some(current)) => current.stamp = value.trim().parse().ok(),
            ("filename", Some(current)) => current.filename = Some(value.to_string()),
            ("position", Some(current)) => current.position = index_value(value),
            ("resume-state", Some(current)) => {
                current.resume_state = ResumeState::from_code(value.trim().parse().unwrap_or(0));
            }
            ("resume-time", Some(current)) => {
                current.resume_time = value.trim().parse().unwrap_or(0);
            }
            _ => {}
        }
    }
    state
}

fn signed(index: Option<usize>) -> i64 {
    index.map_or(-1, |i| i as i64)
}

pub fn render(state: &SavedState) -> String {
    let mut out = String::new();
    out.push_str(&format!("active {}\n", signed(state.active)));
    out.push_str(&format!("playing {}\n", signed(state.playing)));
    for playlist in &state.playlists {
        out.push_str(&format!("playlist {}\n", playlist.index));
        if let Some(stamp) = playlist.stamp {
            out.push_str(&format!("stamp {stamp}\n"));
        }
        if let Some(filename) = playlist.filename.as_deref().filter(|f| !f.contains('\n')) {
            out.push_str(&format!("filename {filename}\n"));
        }
        out.push_str(&format!("position {}\n", signed(playlist.position)));
        out.push_str(&format!("resume-state {}\n", playlist.resume_state.code()));
        out.push_str(&format!("resume-time {}\n", playlist.resume_time));
    }
    out
}

/// Read the state file; a missing file is not an error.
pub fn read(path: &Path) -> Result<Option<SavedState>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(parse(&text))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read state file {}", path.display())),
    }
}

/// Write atomically through a temporary sibling file.
pub fn write(path: &Path, state: &SavedState) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("create state directory {}", dir.display()))?;
    }
    let tmp = path.with_extension("tmp");
    let mut file =
        fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
    file.write_all(render(state).as_bytes())
        .with_context(|| format!("write {}", tmp.display()))?;
    file.sync_all().ok();
    drop(file);
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
