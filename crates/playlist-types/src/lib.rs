//! Plain data shared by the playlist engine and its consumers.
//!
//! Everything here is owned and serializable so it can cross the engine lock
//! (and thread boundaries) as a snapshot rather than a reference into live state.

use serde::{Deserialize, Serialize};

/// Process-unique playlist stamp.
///
/// Stamps are never reused while the engine is alive, so a stale id simply
/// stops resolving once its playlist is removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(pub i32);

impl std::fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Severity of a playlist change, ordered from least to most invasive.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum UpdateLevel {
    /// Nothing changed.
    #[default]
    None,
    /// Selection, focus or queue membership changed.
    Selection,
    /// Entry metadata (or playlist title/filename) changed.
    Metadata,
    /// Entries were added, removed or reordered.
    Structure,
}

/// Coalesced description of the changes made to one playlist since the last flush.
///
/// `before` and `after` count the entries at the head and tail that were left
/// untouched; everything in between may have changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub level: UpdateLevel,
    pub before: usize,
    pub after: usize,
    pub queue_changed: bool,
}

impl Update {
    /// Record covering `count` entries starting at `at` in a list of `len` entries.
    pub fn span(level: UpdateLevel, len: usize, at: usize, count: usize) -> Self {
        Self {
            level,
            before: at,
            after: len.saturating_sub(at + count),
            queue_changed: false,
        }
    }

    /// Whether this record carries any change at all.
    pub fn is_pending(&self) -> bool {
        self.level != UpdateLevel::None
    }

    /// Fold `other` into `self`: max level, min untouched boundaries.
    pub fn merge(&mut self, other: &Update) {
        if !self.is_pending() {
            *self = *other;
            return;
        }
        self.level = self.level.max(other.level);
        self.before = self.before.min(other.before);
        self.after = self.after.min(other.after);
        self.queue_changed |= other.queue_changed;
    }
}

/// Lifecycle of an entry's metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TupleState {
    /// Not scanned yet.
    #[default]
    Initial,
    /// Metadata was read successfully.
    Valid,
    /// Scanning finished without usable metadata.
    Failed,
}

/// Metadata record for one entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    pub state: TupleState,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub comment: Option<String>,
    pub publisher: Option<String>,
    pub catalog_number: Option<String>,
    /// Display title derived from the other fields (see [`Tuple::format_title`]).
    pub formatted_title: Option<String>,
    /// Codec or container label, e.g. `FLAC`.
    pub format: Option<String>,
    pub year: Option<i32>,
    pub track: Option<i32>,
    pub disc: Option<i32>,
    /// Duration in milliseconds.
    pub length_ms: Option<i64>,
}

impl Tuple {
    /// Empty tuple in the `Valid` state, ready to be filled in by a tag reader.
    pub fn valid() -> Self {
        Self {
            state: TupleState::Valid,
            ..Self::default()
        }
    }

    pub fn state(&self) -> TupleState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == TupleState::Valid
    }

    /// Non-negative duration used for aggregate playlist lengths.
    pub fn length(&self) -> i64 {
        self.length_ms.unwrap_or(0).max(0)
    }

    /// Fill `formatted_title` from artist/title, falling back to the file name.
    pub fn format_title(&mut self, filename: &str) {
        let title = match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => format!("{artist} - {title}"),
            (None, Some(title)) => title.clone(),
            _ => display_name(filename),
        };
        self.formatted_title = Some(title);
    }
}

/// Last path segment of `filename` without its extension.
pub fn display_name(filename: &str) -> String {
    let base = basename(filename);
    match base.rfind('.') {
        Some(dot) if dot > 0 => base[..dot].to_string(),
        _ => base.to_string(),
    }
}

/// Last path segment of `filename`.
pub fn basename(filename: &str) -> &str {
    filename.rsplit('/').next().unwrap_or(filename)
}

/// Ordering schemes understood by the sort and dedupe utilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortType {
    Path,
    Filename,
    Title,
    Album,
    Artist,
    AlbumArtist,
    Date,
    Genre,
    Track,
    FormattedTitle,
    Length,
    Comment,
    Publisher,
    CatalogNum,
    Disc,
}

impl SortType {
    pub const ALL: [SortType; 15] = [
        SortType::Path,
        SortType::Filename,
        SortType::Title,
        SortType::Album,
        SortType::Artist,
        SortType::AlbumArtist,
        SortType::Date,
        SortType::Genre,
        SortType::Track,
        SortType::FormattedTitle,
        SortType::Length,
        SortType::Comment,
        SortType::Publisher,
        SortType::CatalogNum,
        SortType::Disc,
    ];

    /// `true` for schemes that only look at the filename.
    pub fn by_filename(self) -> bool {
        matches!(self, SortType::Path | SortType::Filename)
    }
}

impl std::str::FromStr for SortType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let found = match norm.as_str() {
            "path" => SortType::Path,
            "filename" => SortType::Filename,
            "title" => SortType::Title,
            "album" => SortType::Album,
            "artist" => SortType::Artist,
            "album_artist" => SortType::AlbumArtist,
            "date" | "year" => SortType::Date,
            "genre" => SortType::Genre,
            "track" => SortType::Track,
            "formatted_title" => SortType::FormattedTitle,
            "length" => SortType::Length,
            "comment" => SortType::Comment,
            "publisher" => SortType::Publisher,
            "catalog_num" | "catalog_number" => SortType::CatalogNum,
            "disc" => SortType::Disc,
            _ => return Err(format!("unknown sort scheme: {s}")),
        };
        Ok(found)
    }
}

/// Whether an entry accessor may block until the entry has been scanned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GetMode {
    /// Return whatever is known right now.
    #[default]
    NoWait,
    /// Block until the requested data is read (issuing at most one scan).
    Wait,
}

/// Notifications delivered to listeners after each flush, outside the engine lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaylistEvent {
    /// One or more playlists changed; per-playlist detail is in `update_detail`.
    Update { level: UpdateLevel },
    /// The position of `playlist` changed.
    Position { playlist: PlaylistId },
    /// Every entry of `playlist` has been scanned and no scan job is outstanding.
    ScanComplete { playlist: PlaylistId },
    /// The active playlist changed.
    Activate,
    /// The playing playlist changed.
    SetPlaying,
    /// Playback started on a new entry.
    PlaybackBegin,
    /// Playback stopped.
    PlaybackStop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_takes_max_level_and_min_bounds() {
        let mut update = Update::default();
        update.merge(&Update::span(UpdateLevel::Selection, 10, 4, 1));
        update.merge(&Update::span(UpdateLevel::Metadata, 10, 7, 2));
        update.merge(&Update {
            queue_changed: true,
            ..Update::span(UpdateLevel::Selection, 10, 2, 1)
        });

        assert_eq!(update.level, UpdateLevel::Metadata);
        assert_eq!(update.before, 2);
        assert_eq!(update.after, 1);
        assert!(update.queue_changed);
    }

    #[test]
    fn format_title_falls_back_to_file_name() {
        let mut tuple = Tuple::valid();
        tuple.format_title("/music/Some Album/03 Track.flac");
        assert_eq!(tuple.formatted_title.as_deref(), Some("03 Track"));

        tuple.artist = Some("Artist".to_string());
        tuple.title = Some("Song".to_string());
        tuple.format_title("/music/x.flac");
        assert_eq!(tuple.formatted_title.as_deref(), Some("Artist - Song"));
    }

    #[test]
    fn sort_type_parses_loose_names() {
        assert_eq!("album-artist".parse::<SortType>(), Ok(SortType::AlbumArtist));
        assert_eq!("Catalog Number".parse::<SortType>(), Ok(SortType::CatalogNum));
        assert!("bpm".parse::<SortType>().is_err());
    }
}
