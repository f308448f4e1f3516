//! Watch-and-dispatch loop.
//!
//! Accepted events wait out the settle delay in their own task, then go into
//! a bounded queue drained by a fixed set of workers. Each worker runs one
//! file at a time through the [`Pipeline`].

use super::domain::WatchedFile;
use super::pipeline::{FileState, Pipeline, log_transition};
use super::watcher::{WatchEvent, WatchEventKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pool sizing and timing.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub settle_delay: Duration,
    pub workers: usize,
    pub queue_depth: usize,
}

/// Counts of files that reached a final state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub archived: usize,
    pub failed: usize,
}

/// Paths currently between detection and a final state.
#[derive(Debug, Clone, Default)]
struct InFlight(Arc<StdMutex<HashSet<PathBuf>>>);

impl InFlight {
    /// Returns `false` if the path was already claimed.
    fn claim(&self, path: &Path) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf())
    }

    fn release(&self, path: &Path) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<Pipeline>, settings: DispatchSettings) -> Self {
        Self { pipeline, settings }
    }

    /// Consume events until the channel closes or `cancel` fires.
    ///
    /// On cancellation intake stops at once and files still waiting in the
    /// queue are left untouched; jobs already running finish. When the
    /// channel simply closes, everything accepted so far is processed.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<WatchEvent>,
        cancel: CancellationToken,
    ) -> DispatchSummary {
        let workers = self.settings.workers.max(1);
        let (job_tx, job_rx) = mpsc::channel::<WatchedFile>(self.settings.queue_depth.max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));
        let in_flight = InFlight::default();

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            pool.spawn(worker_loop(
                worker_id,
                Arc::clone(&self.pipeline),
                Arc::clone(&job_rx),
                in_flight.clone(),
                cancel.clone(),
            ));
        }
        info!(
            workers,
            queue_depth = self.settings.queue_depth,
            settle_delay_ms = self.settings.settle_delay.as_millis() as u64,
            "Dispatcher started"
        );

        let mut settling = JoinSet::new();
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!("Event source closed");
                break;
            };
            let Some(file) = accept(&event, &in_flight) else {
                continue;
            };
            settling.spawn(settle_and_enqueue(
                file,
                self.settings.settle_delay,
                job_tx.clone(),
                in_flight.clone(),
                cancel.clone(),
            ));
            // Reap finished settle tasks so the set stays small.
            while settling.try_join_next().is_some() {}
        }

        while settling.join_next().await.is_some() {}
        drop(job_tx);

        let mut summary = DispatchSummary::default();
        while let Some(result) = pool.join_next().await {
            match result {
                Ok(counts) => {
                    summary.archived += counts.archived;
                    summary.failed += counts.failed;
                }
                Err(e) => warn!(error = %e, "Worker task ended abnormally"),
            }
        }
        info!(
            archived = summary.archived,
            failed = summary.failed,
            "Dispatcher stopped"
        );
        summary
    }
}

/// Decide whether an event starts a new file lifecycle.
fn accept(event: &WatchEvent, in_flight: &InFlight) -> Option<WatchedFile> {
    if event.kind != WatchEventKind::Created || event.is_dir {
        return None;
    }
    let file = WatchedFile::detect(&event.path)?;
    if !in_flight.claim(&file.original) {
        debug!(path = %event.path.display(), "Already in flight; ignoring duplicate event");
        return None;
    }
    log_transition(&file, FileState::Detected);
    Some(file)
}

async fn settle_and_enqueue(
    file: WatchedFile,
    delay: Duration,
    jobs: mpsc::Sender<WatchedFile>,
    in_flight: InFlight,
    cancel: CancellationToken,
) {
    if !delay.is_zero() {
        tokio::select! {
            () = cancel.cancelled() => {
                in_flight.release(&file.original);
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }

    if !file.current.exists() {
        debug!(path = %file.current.display(), "File disappeared before processing");
        in_flight.release(&file.original);
        return;
    }

    let original = file.original.clone();
    let sent = tokio::select! {
        () = cancel.cancelled() => false,
        sent = jobs.send(file) => sent.is_ok(),
    };
    if !sent {
        in_flight.release(&original);
    }
}

async fn worker_loop(
    worker_id: usize,
    pipeline: Arc<Pipeline>,
    jobs: Arc<Mutex<mpsc::Receiver<WatchedFile>>>,
    in_flight: InFlight,
    cancel: CancellationToken,
) -> DispatchSummary {
    let mut counts = DispatchSummary::default();

    loop {
        let job = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(file) = job else {
            break;
        };

        let original = file.original.clone();
        debug!(worker_id, path = %original.display(), "Worker picked up file");
        match pipeline.handle(file).await {
            FileState::Archived => counts.archived += 1,
            _ => counts.failed += 1,
        }
        in_flight.release(&original);
    }

    debug!(worker_id, "Worker stopped");
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_filters_events() {
        let in_flight = InFlight::default();
        let dir = tempfile::TempDir::new().unwrap();

        let modified = WatchEvent {
            path: dir.path().join("a.png"),
            kind: WatchEventKind::Other,
            is_dir: false,
        };
        assert!(accept(&modified, &in_flight).is_none());

        let folder = WatchEvent {
            path: dir.path().join("shots.png"),
            kind: WatchEventKind::Created,
            is_dir: true,
        };
        assert!(accept(&folder, &in_flight).is_none());

        let gif = WatchEvent {
            path: dir.path().join("a.gif"),
            kind: WatchEventKind::Created,
            is_dir: false,
        };
        assert!(accept(&gif, &in_flight).is_none());

        let png = WatchEvent {
            path: dir.path().join("a.png"),
            kind: WatchEventKind::Created,
            is_dir: false,
        };
        assert!(accept(&png, &in_flight).is_some());
        assert!(accept(&png, &in_flight).is_none());

        in_flight.release(&png.path);
        assert!(accept(&png, &in_flight).is_some());
    }
}
