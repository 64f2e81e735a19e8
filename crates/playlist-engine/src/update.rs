//! Coalescing of change notifications.
//!
//! Mutations record their level here (per-playlist detail lives on each
//! playlist's `next_update`). The first pending change asks the control loop
//! for a flush; later changes merge into the same batch. Scan-driven metadata
//! changes may ask for a delayed flush so a large sweep produces a handful of
//! notifications instead of one per file.

use std::time::Duration;

use crossbeam_channel::Sender;
use playlist_types::{PlaylistEvent, PlaylistId, UpdateLevel};

use crate::control::ControlMsg;

/// Everything collected since the previous flush, in delivery order.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PendingBatch {
    pub level: UpdateLevel,
    pub positions: Vec<PlaylistId>,
    pub events: Vec<PlaylistEvent>,
    pub scan_complete: Vec<PlaylistId>,
}

impl PendingBatch {
    /// Flatten into events: general update, positions, playback/activation, scan completion.
    pub fn into_events(self) -> Vec<PlaylistEvent> {
        let mut out = Vec::new();
        if self.level != UpdateLevel::None {
            out.push(PlaylistEvent::Update { level: self.level });
        }
        out.extend(
            self.positions
                .into_iter()
                .map(|playlist| PlaylistEvent::Position { playlist }),
        );
        out.extend(self.events);
        out.extend(
            self.scan_complete
                .into_iter()
                .map(|playlist| PlaylistEvent::ScanComplete { playlist }),
        );
        out
    }
}

pub(crate) struct UpdateDispatcher {
    batch: PendingBatch,
    /// The scheduled flush is a delayed one.
    delayed: bool,
    delay: Duration,
    control: Sender<ControlMsg>,
}

impl UpdateDispatcher {
    pub fn new(delay: Duration, control: Sender<ControlMsg>) -> Self {
        Self {
            batch: PendingBatch::default(),
            delayed: false,
            delay,
            control,
        }
    }

    fn idle(&self) -> bool {
        self.batch.level == UpdateLevel::None
            && self.batch.positions.is_empty()
            && self.batch.events.is_empty()
            && self.batch.scan_complete.is_empty()
    }

    fn schedule(&mut self, delay: Option<Duration>) {
        self.delayed = delay.is_some();
        // the control loop may already be gone during shutdown
        let _ = self.control.send(ControlMsg::Flush { delay });
    }

    fn schedule_now(&mut self) {
        if self.idle() || self.delayed {
            self.schedule(None);
        }
    }

    /// Record a change of `level`. `delayable` lets the flush wait for the batching window.
    pub fn request(&mut self, level: UpdateLevel, delayable: bool) {
        if delayable {
            if self.idle() {
                self.schedule(Some(self.delay));
            }
        } else {
            self.schedule_now();
        }
        self.batch.level = self.batch.level.max(level);
    }

    pub fn position(&mut self, playlist: PlaylistId) {
        self.schedule_now();
        if !self.batch.positions.contains(&playlist) {
            self.batch.positions.push(playlist);
        }
    }

    pub fn event(&mut self, event: PlaylistEvent) {
        self.schedule_now();
        self.batch.events.push(event);
    }

    /// A scan-complete signal forces any delayed flush to happen now.
    pub fn scan_complete(&mut self, playlist: PlaylistId) {
        self.schedule_now();
        if !self.batch.scan_complete.contains(&playlist) {
            self.batch.scan_complete.push(playlist);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.batch.level != UpdateLevel::None
    }

    pub fn take(&mut self) -> PendingBatch {
        self.delayed = false;
        std::mem::take(&mut self.batch)
    }

    /// Drop everything queued so far without notifying anyone.
    pub fn discard(&mut self) {
        self.take();
    }
}
