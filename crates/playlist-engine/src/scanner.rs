//! Fixed-size pool of scan worker threads.
//!
//! Workers pull [`ScanRequest`]s from a channel, run the probe outside the
//! engine lock and hand the [`ScanResult`] back through [`ScanHooks`]. A panic
//! inside the probe is caught and reported as a failed result for that job.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use playlist_types::TupleState;

use crate::probe::Probe;
use crate::scan::{JobId, ScanRequest, ScanResult};

/// Callbacks from worker threads back into the engine.
pub(crate) trait ScanHooks: Send + Sync {
    /// `false` if the job was cancelled before the worker got to it.
    fn claim(&self, job: JobId) -> bool;
    fn finish(&self, result: ScanResult);
}

pub(crate) struct ScannerPool {
    handles: Vec<JoinHandle<()>>,
}

impl ScannerPool {
    pub fn spawn(
        threads: usize,
        requests: Receiver<ScanRequest>,
        probe: Arc<dyn Probe>,
        hooks: Arc<dyn ScanHooks>,
    ) -> Result<Self> {
        let mut handles = Vec::with_capacity(threads);
        for n in 0..threads.max(1) {
            let requests = requests.clone();
            let probe = probe.clone();
            let hooks = hooks.clone();
            let handle = std::thread::Builder::new()
                .name(format!("playlist-scan-{n}"))
                .spawn(move || worker_loop(requests, probe, hooks))
                .with_context(|| format!("spawn scan worker {n}"))?;
            handles.push(handle);
        }
        Ok(Self { handles })
    }

    /// Wait for every worker to exit. The request channel must be closed first.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::warn!("scan worker exited by panic");
            }
        }
    }
}

fn worker_loop(requests: Receiver<ScanRequest>, probe: Arc<dyn Probe>, hooks: Arc<dyn ScanHooks>) {
    while let Ok(request) = requests.recv() {
        if !hooks.claim(request.job) {
            continue;
        }
        let result = run(probe.as_ref(), &request);
        hooks.finish(result);
    }
    tracing::debug!("scan worker stopped");
}

/// Execute one request, turning errors and panics into a result.
pub(crate) fn run(probe: &dyn Probe, request: &ScanRequest) -> ScanResult {
    match panic::catch_unwind(AssertUnwindSafe(|| scan(probe, request))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(file = %request.filename, error = %message, "scan panicked");
            ScanResult::failed(request.job, format!("scanner panicked: {message}"))
        }
    }
}

fn scan(probe: &dyn Probe, request: &ScanRequest) -> ScanResult {
    let mut result = ScanResult {
        job: request.job,
        decoder: request.decoder.clone(),
        tuple: Default::default(),
        image: None,
        error: None,
    };

    let decoder = match result.decoder.clone() {
        Some(decoder) => decoder,
        None => match probe.probe(&request.filename) {
            Ok(decoder) => {
                result.decoder = Some(decoder.clone());
                decoder
            }
            Err(err) => {
                tracing::warn!(file = %request.filename, error = %err, "no decoder");
                result.error = Some(format!("{err:#}"));
                return result;
            }
        },
    };

    if request.want_tuple {
        match probe.read_tuple(&request.filename, &decoder) {
            Ok(mut tuple) => {
                if tuple.state == TupleState::Initial {
                    tuple.state = TupleState::Valid;
                }
                result.tuple = tuple;
            }
            Err(err) => {
                tracing::warn!(file = %request.filename, error = %err, "metadata read failed");
                result.error = Some(format!("{err:#}"));
            }
        }
    }

    if request.want_image {
        match probe.read_image(&request.filename, &decoder) {
            Ok(image) => result.image = image,
            Err(err) => tracing::debug!(file = %request.filename, error = %err, "no cover art"),
        }
    }

    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
