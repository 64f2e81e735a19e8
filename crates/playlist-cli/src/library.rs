//! Expand command-line paths into playable files.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use playlist_engine::probe::is_supported_extension;

/// Files named explicitly are kept as given; directories are searched
/// recursively for supported extensions, sorted by path.
pub fn collect(paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = Vec::new();
            walk(path, &mut found)?;
            found.sort();
            out.extend(found);
        } else {
            out.push(path.to_string_lossy().into_owned());
        }
    }
    Ok(out)
}

fn walk(dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read_dir {:?}", dir))? {
        let entry = entry.context("read_dir entry")?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out)?;
            continue;
        }
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .unwrap_or("")
            .to_ascii_lowercase();
        if is_supported_extension(&ext) {
            out.push(path.to_string_lossy().into_owned());
        }
    }
    Ok(())
}
