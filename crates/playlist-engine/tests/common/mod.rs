#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use playlist_engine::types::{PlaylistEvent, Tuple, display_name};
use playlist_engine::{
    ControlLoop, CoverArt, DecoderHandle, Engine, EngineConfig, NullPlayback, PlaylistAddItem,
    Probe,
};

/// In-memory probe: files whose name contains `broken` fail to open, every
/// other file gets a title derived from its name.
#[derive(Default)]
pub struct ScriptedProbe {
    pub delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedProbe {
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn calls(&self, filename: &str) -> usize {
        self.calls.lock().unwrap().get(filename).copied().unwrap_or(0)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Probe for ScriptedProbe {
    fn probe(&self, filename: &str) -> Result<DecoderHandle> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(filename.to_string())
            .or_default() += 1;
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if filename.contains("broken") {
            return Err(anyhow!("unreadable: {filename}"));
        }
        Ok(DecoderHandle::new("scripted"))
    }

    fn read_tuple(&self, filename: &str, _: &DecoderHandle) -> Result<Tuple> {
        let mut tuple = Tuple::valid();
        tuple.title = Some(display_name(filename));
        tuple.length_ms = Some(1000);
        Ok(tuple)
    }

    fn read_image(&self, _: &str, _: &DecoderHandle) -> Result<Option<CoverArt>> {
        Ok(None)
    }
}

pub fn config(scan_threads: usize) -> EngineConfig {
    EngineConfig {
        scan_threads,
        delayed_update_ms: 20,
        autosave_secs: 0,
        ..EngineConfig::default()
    }
}

/// Engine whose notifications are only delivered by `process_pending_update`.
pub fn manual_engine(probe: Arc<ScriptedProbe>) -> (Engine, ControlLoop) {
    Engine::new(config(2), probe, Box::new(NullPlayback::default())).unwrap()
}

pub fn running_engine(probe: Arc<ScriptedProbe>, scan_threads: usize) -> Engine {
    Engine::start(config(scan_threads), probe, Box::new(NullPlayback::default())).unwrap()
}

pub fn items(names: &[&str]) -> Vec<PlaylistAddItem> {
    names.iter().map(|name| PlaylistAddItem::new(*name)).collect()
}

pub fn tagged(names: &[&str]) -> Vec<PlaylistAddItem> {
    names
        .iter()
        .map(|name| {
            let mut tuple = Tuple::valid();
            tuple.title = Some(name.to_string());
            tuple.length_ms = Some(1000);
            PlaylistAddItem::new(*name).with_tuple(tuple)
        })
        .collect()
}

/// Collects every delivered event.
pub fn record(engine: &Engine) -> Arc<Mutex<Vec<PlaylistEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.add_listener(move |event| sink.lock().unwrap().push(event.clone()));
    seen
}
