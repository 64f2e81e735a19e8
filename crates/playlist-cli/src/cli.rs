use std::path::PathBuf;

use clap::{Parser, Subcommand};
use playlist_engine::types::SortType;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "playlist-cli", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML config file with an `[engine]` table
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum number of background scan jobs
    #[arg(long)]
    pub scan_threads: Option<usize>,

    /// Persisted playlist state file (loaded at start, saved on exit)
    #[arg(long)]
    pub state: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add files to the "Now Playing" playlist, scan them and print their metadata
    Scan {
        /// Audio files or directories (searched recursively)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Sort scheme applied after scanning, e.g. `album`, `track`, `path`
        #[arg(long)]
        sort: Option<SortType>,

        /// Drop entries that are equal under the sort scheme
        #[arg(long, requires = "sort")]
        dedupe: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the order `next` would play the given files in
    Order {
        /// Audio files or directories (searched recursively)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Number of steps to print
        #[arg(long, default_value_t = 20)]
        count: usize,

        #[arg(long)]
        shuffle: bool,

        /// With --shuffle, play whole albums once picked
        #[arg(long)]
        album_shuffle: bool,

        /// Wrap around (or re-roll the shuffle) at the end
        #[arg(long)]
        repeat: bool,
    },
}
