//! Control thread: delivers coalesced notifications and runs housekeeping.
//!
//! Listener callbacks run here one at a time, never concurrently with each
//! other and never with the engine lock held.

use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::engine::Shared;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlMsg {
    /// Deliver pending notifications after `delay` (`None` = as soon as possible).
    Flush { delay: Option<Duration> },
    Shutdown,
}

/// Event loop owning notification delivery, autosave and cache eviction.
///
/// Returned by [`crate::Engine::new`]; call [`ControlLoop::run`] on a thread of
/// your choosing or [`ControlLoop::spawn`] to get a dedicated one.
pub struct ControlLoop {
    shared: Weak<Shared>,
    rx: Receiver<ControlMsg>,
    autosave: Option<Duration>,
    evict_every: Duration,
}

impl ControlLoop {
    pub(crate) fn new(
        shared: Weak<Shared>,
        rx: Receiver<ControlMsg>,
        autosave: Option<Duration>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            shared,
            rx,
            autosave,
            evict_every: cache_ttl.max(Duration::from_secs(1)),
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("playlist-control".to_string())
            .spawn(move || self.run())
            .context("spawn playlist control thread")
    }

    /// Run until the engine shuts down or is dropped.
    pub fn run(self) {
        let started = Instant::now();
        let mut flush_at: Option<Instant> = None;
        let mut autosave_at = self.autosave.map(|every| started + every);
        let mut evict_at = started + self.evict_every;

        loop {
            let deadline = [flush_at, autosave_at]
                .into_iter()
                .flatten()
                .fold(evict_at, Instant::min);

            match self.rx.recv_deadline(deadline) {
                Ok(ControlMsg::Flush { delay }) => {
                    let at = Instant::now() + delay.unwrap_or_default();
                    flush_at = Some(flush_at.map_or(at, |current| current.min(at)));
                }
                Ok(ControlMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let Some(shared) = self.shared.upgrade() else {
                break;
            };
            let now = Instant::now();

            if flush_at.is_some_and(|at| at <= now) {
                flush_at = None;
                shared.flush();
            }
            if autosave_at.is_some_and(|at| at <= now) {
                shared.autosave();
                autosave_at = self.autosave.map(|every| now + every);
            }
            if evict_at <= now {
                shared.cache.evict_expired();
                evict_at = now + self.evict_every;
            }
        }
        tracing::debug!("playlist control loop stopped");
    }
}
