use playlist_types::{Tuple, TupleState};

use crate::probe::DecoderHandle;

/// Stable identity of an entry, independent of its row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntryKey(pub(crate) u64);

/// Item handed to [`crate::Playlist::insert_items`].
///
/// Metadata and decoder are optional; anything missing is filled in by the
/// background scan (or from the metadata cache).
#[derive(Clone, Debug, Default)]
pub struct PlaylistAddItem {
    pub filename: String,
    pub tuple: Option<Tuple>,
    pub decoder: Option<DecoderHandle>,
}

impl PlaylistAddItem {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    pub fn with_tuple(mut self, tuple: Tuple) -> Self {
        self.tuple = Some(tuple);
        self
    }

    pub fn with_decoder(mut self, decoder: DecoderHandle) -> Self {
        self.decoder = Some(decoder);
        self
    }
}

/// Owned snapshot of one entry, safe to keep after the lock is released.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub filename: String,
    pub decoder: Option<DecoderHandle>,
    pub tuple: Tuple,
    pub error: Option<String>,
    /// Duration in milliseconds (0 when unknown).
    pub length: i64,
    pub selected: bool,
    pub queued: bool,
}

pub(crate) struct Entry {
    pub key: EntryKey,
    pub filename: String,
    pub decoder: Option<DecoderHandle>,
    pub tuple: Tuple,
    pub error: Option<String>,
    pub length: i64,
    /// Play order within the current shuffle session; 0 = not played yet.
    pub shuffle_num: u64,
    pub selected: bool,
    pub queued: bool,
}

impl Entry {
    pub fn new(key: EntryKey, item: PlaylistAddItem) -> Self {
        let mut entry = Self {
            key,
            filename: item.filename,
            decoder: item.decoder,
            tuple: Tuple::default(),
            error: None,
            length: 0,
            shuffle_num: 0,
            selected: false,
            queued: false,
        };
        entry.set_tuple(item.tuple.unwrap_or_default());
        entry
    }

    /// Replace metadata wholesale. Callers owning aggregate lengths must
    /// account for the old and new `length` around this call.
    pub fn set_tuple(&mut self, mut tuple: Tuple) {
        self.error = None;
        if tuple.state() != TupleState::Initial {
            tuple.format_title(&self.filename);
        }
        self.length = tuple.length();
        self.tuple = tuple;
    }

    /// Give up on an entry the scanner could not resolve.
    pub fn mark_failed(&mut self) {
        self.tuple.state = TupleState::Failed;
        self.tuple.format_title(&self.filename);
    }

    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            filename: self.filename.clone(),
            decoder: self.decoder.clone(),
            tuple: self.tuple.clone(),
            error: self.error.clone(),
            length: self.length,
            selected: self.selected,
            queued: self.queued,
        }
    }
}

/// Sources that cannot be scanned without consuming them.
pub(crate) fn is_blacklisted(filename: &str) -> bool {
    filename.starts_with("stdin://")
}
