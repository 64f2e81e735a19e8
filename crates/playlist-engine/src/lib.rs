//! Playlist engine: ordered playlists with cursors, selection and a play
//! queue, a bounded pool of background metadata scanners, and coalesced
//! change notifications.
//!
//! All playlist state sits behind one lock inside [`Engine`]. Callers hold
//! [`Playlist`] handles, which are ids and never keep a playlist alive.

mod cache;
mod control;
mod engine;
mod entry;
mod events;
mod handle;
mod id;
mod playback;
mod playlist;
mod registry;
mod scan;
mod scanner;
mod sort;
mod update;

pub mod config;
pub mod multihash;
pub mod probe;
pub mod state_file;

pub use config::{EngineConfig, Settings};
pub use control::ControlLoop;
pub use engine::Engine;
pub use entry::{EntryInfo, PlaylistAddItem};
pub use events::{Listener, ListenerId};
pub use handle::Playlist;
pub use id::FIRST_STAMP;
pub use playback::{DecodeInfo, NullPlayback, PlaybackSink};
pub use probe::{CoverArt, DecoderHandle, Probe, SymphoniaProbe};
pub use scan::ScanStats;

pub use playlist_types as types;
