//! Narrow interface between the playlist core and the playback thread.
//!
//! Playback is identified by a serial that changes every time the playing
//! playlist or entry changes. The playback thread passes its serial back on
//! every call; a stale serial resolves to nothing instead of to whatever entry
//! is playing now.

use playlist_types::Tuple;

use crate::probe::{CoverArt, DecoderHandle};

/// Output side driven by the engine.
///
/// Called with the engine lock held: implementations must return quickly and
/// must not call back into the engine.
pub trait PlaybackSink: Send {
    /// Start (or restart) playback of the current entry under `serial`.
    fn play(&mut self, serial: u64, seek_ms: i64, paused: bool);
    fn stop(&mut self);
    fn paused(&self) -> bool;
    fn set_paused(&mut self, paused: bool);
    /// Current playback time in milliseconds.
    fn time_ms(&self) -> i64;
    /// Metadata for the playing entry changed.
    fn set_info(&mut self, _row: usize, _tuple: &Tuple) {}
}

/// Sink that only tracks state; used when no output is attached.
#[derive(Debug, Default)]
pub struct NullPlayback {
    pub serial: Option<u64>,
    pub paused: bool,
    pub seek_ms: i64,
}

impl PlaybackSink for NullPlayback {
    fn play(&mut self, serial: u64, seek_ms: i64, paused: bool) {
        self.serial = Some(serial);
        self.seek_ms = seek_ms;
        self.paused = paused;
    }

    fn stop(&mut self) {
        self.serial = None;
        self.paused = false;
    }

    fn paused(&self) -> bool {
        self.paused
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn time_ms(&self) -> i64 {
        self.seek_ms
    }
}

/// What the playback thread needs to open the current entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeInfo {
    pub filename: String,
    pub decoder: Option<DecoderHandle>,
    pub tuple: Tuple,
    pub image: Option<CoverArt>,
    pub error: Option<String>,
}

pub(crate) struct PlaybackBridge {
    serial: u64,
    active: bool,
    sink: Box<dyn PlaybackSink>,
}

impl PlaybackBridge {
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            serial: 0,
            active: false,
            sink,
        }
    }

    pub fn play(&mut self, seek_ms: i64, paused: bool) -> u64 {
        self.serial += 1;
        self.active = true;
        self.sink.play(self.serial, seek_ms, paused);
        tracing::info!(serial = self.serial, seek_ms, paused, "playback start");
        self.serial
    }

    pub fn stop(&mut self) {
        self.serial += 1;
        if self.active {
            tracing::info!(serial = self.serial, "playback stop");
        }
        self.active = false;
        self.sink.stop();
    }

    pub fn check_serial(&self, serial: u64) -> bool {
        self.active && serial == self.serial
    }

    pub fn serial(&self) -> Option<u64> {
        self.active.then_some(self.serial)
    }

    pub fn paused(&self) -> bool {
        self.sink.paused()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.sink.set_paused(paused);
    }

    pub fn time_ms(&self) -> i64 {
        self.sink.time_ms()
    }

    pub fn set_info(&mut self, row: usize, tuple: &Tuple) {
        self.sink.set_info(row, tuple);
    }
}
