//! Bookkeeping for in-flight background scans.
//!
//! [`ScanCoordinator`] owns the job list, the worker budget and the sweep cursor.
//! It lives inside the engine core and is only touched under the engine lock.
//! Jobs name their target by `(PlaylistId, EntryKey)` and are re-resolved when
//! a result comes back, so a deleted playlist or entry is detected rather than
//! dereferenced.

use std::collections::VecDeque;

use crossbeam_channel::Sender;
use playlist_types::{PlaylistId, Tuple};

use crate::entry::EntryKey;
use crate::probe::{CoverArt, DecoderHandle};

pub(crate) type JobId = u64;

/// Work order handed to a scanner thread (or run by the playback thread).
#[derive(Clone, Debug)]
pub(crate) struct ScanRequest {
    pub job: JobId,
    pub filename: String,
    pub want_tuple: bool,
    pub want_image: bool,
    pub decoder: Option<DecoderHandle>,
}

/// What a scan produced. Failures are data, never dropped.
#[derive(Clone, Debug)]
pub(crate) struct ScanResult {
    pub job: JobId,
    pub decoder: Option<DecoderHandle>,
    /// `Initial` when no tuple was read.
    pub tuple: Tuple,
    pub image: Option<CoverArt>,
    pub error: Option<String>,
}

impl ScanResult {
    pub fn failed(job: JobId, error: String) -> Self {
        Self {
            job,
            decoder: None,
            tuple: Tuple::default(),
            image: None,
            error: Some(error),
        }
    }
}

pub(crate) struct ScanJob {
    pub id: JobId,
    pub playlist: PlaylistId,
    pub entry: EntryKey,
    /// Run by the playback thread instead of the pool.
    pub for_playback: bool,
    pub handled_by_playback: bool,
    /// Picked up by a worker.
    pub claimed: bool,
    /// Request kept for the playback thread; pool jobs have already sent theirs.
    pub request: Option<ScanRequest>,
}

/// Snapshot of scan activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Jobs currently handed to the worker pool.
    pub outstanding: usize,
    /// Highest `outstanding` value seen so far.
    pub peak: usize,
    /// Jobs whose result came back while the job was still registered.
    pub finished: u64,
}

pub(crate) struct ScanCoordinator {
    jobs: Vec<ScanJob>,
    /// Entries a blocked caller is waiting for; served before the sweep.
    priority: VecDeque<(PlaylistId, EntryKey)>,
    budget: usize,
    pub cursor_playlist: usize,
    pub cursor_row: usize,
    pub enabled_nominal: bool,
    pub enabled: bool,
    next_job: JobId,
    dispatch: Option<Sender<ScanRequest>>,
    peak: usize,
    finished: u64,
}

impl ScanCoordinator {
    pub fn new(budget: usize, dispatch: Sender<ScanRequest>) -> Self {
        Self {
            jobs: Vec::new(),
            priority: VecDeque::new(),
            budget: budget.max(1),
            cursor_playlist: 0,
            cursor_row: 0,
            enabled_nominal: true,
            enabled: true,
            next_job: 1,
            dispatch: Some(dispatch),
            peak: 0,
            finished: 0,
        }
    }

    /// Jobs counted against the budget.
    pub fn pool_jobs(&self) -> usize {
        self.jobs.iter().filter(|job| !job.for_playback).count()
    }

    pub fn has_room(&self) -> bool {
        self.dispatch.is_some() && self.pool_jobs() < self.budget
    }

    pub fn stats(&self) -> ScanStats {
        ScanStats {
            outstanding: self.pool_jobs(),
            peak: self.peak,
            finished: self.finished,
        }
    }

    /// Any job running or promised for `playlist`.
    pub fn has_playlist(&self, playlist: PlaylistId) -> bool {
        self.jobs.iter().any(|job| job.playlist == playlist)
            || self.priority.iter().any(|(id, _)| *id == playlist)
    }

    pub fn has_entry(&self, entry: EntryKey) -> bool {
        self.jobs.iter().any(|job| job.entry == entry)
    }

    /// Scan already running or promised to a waiting caller.
    pub fn is_pending(&self, entry: EntryKey) -> bool {
        self.has_entry(entry) || self.priority.iter().any(|(_, key)| *key == entry)
    }

    pub fn find_entry_mut(&mut self, entry: EntryKey) -> Option<&mut ScanJob> {
        self.jobs.iter_mut().find(|job| job.entry == entry)
    }

    /// Register a job; pool jobs are sent to the workers immediately.
    pub fn start(
        &mut self,
        playlist: PlaylistId,
        entry: EntryKey,
        mut request: ScanRequest,
        for_playback: bool,
    ) -> JobId {
        let id = self.next_job;
        self.next_job += 1;
        request.job = id;

        let mut job = ScanJob {
            id,
            playlist,
            entry,
            for_playback,
            handled_by_playback: false,
            claimed: false,
            request: None,
        };
        if for_playback {
            job.request = Some(request);
        } else {
            self.send(request);
        }
        self.jobs.push(job);
        self.peak = self.peak.max(self.pool_jobs());
        id
    }

    fn send(&mut self, request: ScanRequest) {
        let sent = self
            .dispatch
            .as_ref()
            .is_some_and(|tx| tx.send(request).is_ok());
        if !sent {
            tracing::debug!("scan pool gone; request dropped");
        }
    }

    /// Worker is about to run `job`; `false` if it was cancelled meanwhile.
    pub fn claim(&mut self, job: JobId) -> bool {
        match self.jobs.iter_mut().find(|j| j.id == job) {
            Some(j) => {
                j.claimed = true;
                true
            }
            None => false,
        }
    }

    /// Remove and return a finished job. Results of cancelled jobs are not counted.
    pub fn take(&mut self, job: JobId) -> Option<ScanJob> {
        let pos = self.jobs.iter().position(|j| j.id == job)?;
        self.finished += 1;
        Some(self.jobs.remove(pos))
    }

    /// Drop the job for `entry`, if any. A worker that already claimed it
    /// finishes, and its result is discarded.
    pub fn cancel(&mut self, entry: EntryKey) -> bool {
        match self.jobs.iter().position(|j| j.entry == entry) {
            Some(pos) => {
                let job = self.jobs.remove(pos);
                tracing::debug!(job = job.id, claimed = job.claimed, "scan cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_playlist(&mut self, playlist: PlaylistId) {
        self.jobs.retain(|job| job.playlist != playlist);
        self.priority.retain(|(id, _)| *id != playlist);
    }

    /// Ask for `entry` to be scanned ahead of the sweep.
    pub fn prioritize(&mut self, playlist: PlaylistId, entry: EntryKey) {
        if !self.priority.iter().any(|(_, key)| *key == entry) {
            self.priority.push_back((playlist, entry));
        }
    }

    pub fn next_priority(&mut self) -> Option<(PlaylistId, EntryKey)> {
        self.priority.pop_front()
    }

    /// Detach the playback job: if playback never ran it, hand the entry back
    /// to the pool ahead of the sweep.
    pub fn reset_playback(&mut self) {
        let mut requeue = Vec::new();
        self.jobs.retain(|job| {
            if !job.for_playback {
                return true;
            }
            if !job.handled_by_playback {
                requeue.push((job.playlist, job.entry));
                return false;
            }
            true
        });
        for job in self.jobs.iter_mut().filter(|job| job.for_playback) {
            job.for_playback = false;
        }
        for (playlist, entry) in requeue.into_iter().rev() {
            self.priority.push_front((playlist, entry));
        }
    }

    pub fn restart_sweep(&mut self) {
        self.cursor_playlist = 0;
        self.cursor_row = 0;
    }

    /// Stop dispatching and forget every job; used at shutdown.
    pub fn close(&mut self) {
        self.dispatch = None;
        self.jobs.clear();
        self.priority.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn request(filename: &str) -> ScanRequest {
        ScanRequest {
            job: 0,
            filename: filename.to_string(),
            want_tuple: true,
            want_image: false,
            decoder: None,
        }
    }

    #[test]
    fn pool_jobs_are_dispatched_and_playback_jobs_kept() {
        let (tx, rx) = unbounded();
        let mut scan = ScanCoordinator::new(2, tx);
        let p = PlaylistId(1000);

        let a = scan.start(p, EntryKey(1), request("a"), false);
        let b = scan.start(p, EntryKey(2), request("b"), true);
        assert_eq!(rx.try_recv().unwrap().job, a);
        assert!(rx.try_recv().is_err());
        assert_eq!(scan.pool_jobs(), 1);
        assert!(scan.find_entry_mut(EntryKey(2)).unwrap().request.is_some());

        assert!(scan.take(b).is_some());
        assert!(scan.take(b).is_none());
        assert_eq!(scan.stats().finished, 1);
    }

    #[test]
    fn cancel_prevents_claim() {
        let (tx, _rx) = unbounded();
        let mut scan = ScanCoordinator::new(2, tx);
        let job = scan.start(PlaylistId(1000), EntryKey(5), request("a"), false);
        assert!(scan.cancel(EntryKey(5)));
        assert!(!scan.claim(job));
        assert!(!scan.has_entry(EntryKey(5)));

        assert!(scan.take(job).is_none());
        assert_eq!(scan.stats().finished, 0);
    }

    #[test]
    fn unhandled_playback_job_goes_back_to_priority() {
        let (tx, _rx) = unbounded();
        let mut scan = ScanCoordinator::new(2, tx);
        let p = PlaylistId(1000);
        scan.start(p, EntryKey(1), request("a"), true);
        scan.start(p, EntryKey(2), request("b"), true);
        scan.find_entry_mut(EntryKey(2)).unwrap().handled_by_playback = true;

        scan.reset_playback();
        assert!(!scan.has_entry(EntryKey(1)));
        assert!(scan.is_pending(EntryKey(1)));
        assert_eq!(scan.next_priority(), Some((p, EntryKey(1))));
        let kept = scan.find_entry_mut(EntryKey(2)).unwrap();
        assert!(!kept.for_playback);
    }
}
