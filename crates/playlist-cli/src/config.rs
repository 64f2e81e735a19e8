//! Configuration loading.
//!
//! The TOML file is optional; command-line flags override its values.

use std::path::Path;

use anyhow::{Context, Result};
use playlist_engine::EngineConfig;
use serde::Deserialize;

use crate::cli::Args;

/// Top-level CLI configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    /// Engine settings; missing keys use engine defaults.
    pub engine: Option<EngineConfig>,
}

impl CliConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg =
            toml::from_str::<CliConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Resolve the engine configuration from the optional file and CLI overrides.
pub fn engine_config(args: &Args) -> Result<EngineConfig> {
    let file = match args.config.as_deref() {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    let mut config = file.engine.unwrap_or_default();
    if let Some(threads) = args.scan_threads {
        config.scan_threads = threads.max(1);
    }
    if let Some(state) = args.state.clone() {
        config.state_path = Some(state);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_table_is_optional() {
        let cfg: CliConfig = toml::from_str("").unwrap();
        assert!(cfg.engine.is_none());

        let cfg: CliConfig = toml::from_str(
            r#"
            [engine]
            scan_threads = 4
            repeat = true
            state_path = "/tmp/playlist-state"
            "#,
        )
        .unwrap();
        let engine = cfg.engine.unwrap();
        assert_eq!(engine.scan_threads, 4);
        assert!(engine.repeat);
        assert_eq!(engine.delayed_update_ms, 250);
    }
}
