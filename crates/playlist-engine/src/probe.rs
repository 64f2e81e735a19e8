//! Decoder lookup and tag reading used by the background scanner.
//!
//! The engine knows nothing about file formats. It talks to a [`Probe`], which
//! resolves a decoder for a file and reads its metadata. [`SymphoniaProbe`] is
//! the stock implementation backed by symphonia's format probe.

use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use playlist_types::Tuple;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey, StandardVisualKey, Tag, Visual};
use symphonia::core::probe::{Hint, ProbeResult};

/// Larger embedded pictures are not handed to playback.
const IMAGE_LIMIT: usize = 4 << 20;

/// Opaque decoder identity resolved by a [`Probe`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DecoderHandle(Arc<str>);

impl DecoderHandle {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Embedded picture read for the playing entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverArt {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Decoder/tag-reader registry consulted by scan workers.
///
/// Implementations run on worker threads outside the engine lock and may
/// block on I/O. They must not call back into the engine.
pub trait Probe: Send + Sync {
    /// Find a decoder able to open `filename`.
    fn probe(&self, filename: &str) -> Result<DecoderHandle>;

    /// Read metadata for `filename` using `decoder`.
    fn read_tuple(&self, filename: &str, decoder: &DecoderHandle) -> Result<Tuple>;

    /// Read embedded cover art, if any.
    fn read_image(&self, filename: &str, decoder: &DecoderHandle) -> Result<Option<CoverArt>>;
}

/// [`Probe`] backed by symphonia's format registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaProbe;

impl Probe for SymphoniaProbe {
    fn probe(&self, filename: &str) -> Result<DecoderHandle> {
        let path = local_path(filename)?;
        let ext = extension_of(&path);
        if !is_supported_extension(&ext) {
            return Err(anyhow!("no decoder for {}", path.display()));
        }
        File::open(&path).with_context(|| format!("open {}", path.display()))?;
        Ok(DecoderHandle::new(ext))
    }

    fn read_tuple(&self, filename: &str, decoder: &DecoderHandle) -> Result<Tuple> {
        let path = local_path(filename)?;
        let mut probed = open_format(&path, decoder.name())?;

        let mut tuple = Tuple::valid();
        tuple.format = Some(decoder.name().to_ascii_uppercase());

        if let Some(track) = probed.format.default_track() {
            let params = &track.codec_params;
            if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
                if rate > 0 {
                    tuple.length_ms = Some((frames.saturating_mul(1000) / rate as u64) as i64);
                }
            }
        }

        let mut tags: Vec<Tag> = Vec::new();
        if let Some(meta) = probed.metadata.get() {
            if let Some(rev) = meta.current() {
                tags.extend(rev.tags().iter().cloned());
            }
        }
        if let Some(rev) = probed.format.metadata().current() {
            tags.extend(rev.tags().iter().cloned());
        }
        for tag in &tags {
            apply_tag(&mut tuple, tag);
        }

        if tuple.album_artist.is_none() {
            tuple.album_artist = tuple.artist.clone();
        }
        Ok(tuple)
    }

    fn read_image(&self, filename: &str, decoder: &DecoderHandle) -> Result<Option<CoverArt>> {
        let path = local_path(filename)?;
        let mut probed = open_format(&path, decoder.name())?;

        let mut visuals: Vec<Visual> = Vec::new();
        if let Some(rev) = probed.format.metadata().current() {
            visuals.extend(rev.visuals().iter().cloned());
        }
        if let Some(meta) = probed.metadata.get() {
            if let Some(rev) = meta.current() {
                visuals.extend(rev.visuals().iter().cloned());
            }
        }

        // front cover wins; otherwise the first picture that fits
        visuals.sort_by_key(|v| v.usage != Some(StandardVisualKey::FrontCover));
        Ok(visuals
            .into_iter()
            .find(|v| v.data.len() <= IMAGE_LIMIT)
            .map(|v| CoverArt {
                mime_type: v.media_type,
                data: v.data.into_vec(),
            }))
    }
}

fn open_format(path: &Path, ext_hint: &str) -> Result<ProbeResult> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hint = Hint::new();
    if !ext_hint.is_empty() {
        hint.with_extension(ext_hint);
    }
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probe {}", path.display()))
}

fn apply_tag(tuple: &mut Tuple, tag: &Tag) {
    let value = tag.value.to_string();
    match tag.std_key {
        Some(StandardTagKey::TrackTitle) => set_once(&mut tuple.title, value),
        Some(StandardTagKey::Artist) => set_once(&mut tuple.artist, value),
        Some(StandardTagKey::Album) => set_once(&mut tuple.album, value),
        Some(StandardTagKey::AlbumArtist) => set_once(&mut tuple.album_artist, value),
        Some(StandardTagKey::Genre) => set_once(&mut tuple.genre, value),
        Some(StandardTagKey::Comment) => set_once(&mut tuple.comment, value),
        Some(StandardTagKey::Label) => set_once(&mut tuple.publisher, value),
        Some(StandardTagKey::IdentCatalogNumber) => set_once(&mut tuple.catalog_number, value),
        // "3/12" and "1999-04-01" keep their leading number
        Some(StandardTagKey::TrackNumber) => {
            tuple.track = tuple.track.or_else(|| leading_number(&value));
        }
        Some(StandardTagKey::DiscNumber) => {
            tuple.disc = tuple.disc.or_else(|| leading_number(&value));
        }
        Some(StandardTagKey::Date) => {
            tuple.year = tuple.year.or_else(|| leading_number(&value));
        }
        _ => {}
    }
}

fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() && !value.trim().is_empty() {
        *slot = Some(value);
    }
}

/// Strip a `file://` scheme; other URI schemes are not readable here.
pub(crate) fn local_path(filename: &str) -> Result<PathBuf> {
    if let Some(rest) = filename.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    if filename.contains("://") {
        return Err(anyhow!("unsupported URI scheme: {filename}"));
    }
    Ok(PathBuf::from(filename))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(OsStr::to_str)
        .unwrap_or("")
        .to_ascii_lowercase()
}

pub fn is_supported_extension(ext: &str) -> bool {
    matches!(
        ext,
        "flac" | "wav" | "aiff" | "aif" | "mp3" | "m4a" | "aac" | "alac" | "ogg" | "oga"
    )
}

fn leading_number(raw: &str) -> Option<i32> {
    let digits: &str = raw
        .trim()
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or("");
    digits.parse().ok()
}
