//! Progress persistence for a running task.

use crate::db::Database;
use crate::extraction::StageProgress;
use crate::types::{Event, ReleaseId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Writes overall progress for one run, never lowering it
///
/// Writes are serialized, so a late periodic report cannot land after a higher
/// final one.
pub(crate) struct ProgressTracker {
    id: ReleaseId,
    db: Arc<Database>,
    event_tx: tokio::sync::broadcast::Sender<Event>,
    last: tokio::sync::Mutex<f32>,
}

impl ProgressTracker {
    pub(crate) fn new(
        id: ReleaseId,
        db: Arc<Database>,
        event_tx: tokio::sync::broadcast::Sender<Event>,
        start: f32,
    ) -> Self {
        Self {
            id,
            db,
            event_tx,
            last: tokio::sync::Mutex::new(start.clamp(0.0, 1.0)),
        }
    }

    /// Persist and broadcast `progress`, raised to the last written value if lower
    pub(crate) async fn report(
        &self,
        progress: f32,
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
    ) {
        let mut last = self.last.lock().await;
        let value = progress.clamp(0.0, 1.0).max(*last);
        *last = value;

        if let Err(e) = self
            .db
            .update_progress(&self.id, value, downloaded_bytes, total_bytes)
            .await
        {
            tracing::error!(release = %self.id, error = %e, "Failed to update progress");
        }

        self.event_tx
            .send(Event::Progress {
                id: self.id.clone(),
                progress: value,
                downloaded_bytes,
                total_bytes,
            })
            .ok();
    }
}

/// What a reporter samples
#[derive(Clone)]
pub(crate) enum ProgressSource {
    /// Bytes on disk against the release total, when known
    Bytes {
        counter: Arc<AtomicU64>,
        total: Option<u64>,
    },
    /// Work done within a merge or extraction step
    Stage(Arc<StageProgress>),
}

impl ProgressSource {
    fn fraction(&self) -> f32 {
        match self {
            ProgressSource::Bytes { counter, total } => match total {
                Some(total) if *total > 0 => {
                    (counter.load(Ordering::Relaxed).min(*total) as f64 / *total as f64) as f32
                }
                _ => 0.0,
            },
            ProgressSource::Stage(stage) => stage.fraction(),
        }
    }

    fn byte_counts(&self) -> (Option<u64>, Option<u64>) {
        match self {
            ProgressSource::Bytes { counter, total } => {
                (Some(counter.load(Ordering::Relaxed)), *total)
            }
            ProgressSource::Stage(_) => (None, None),
        }
    }

    /// Map the sampled fraction into `[start, end]` and write it
    pub(crate) async fn report(&self, tracker: &ProgressTracker, start: f32, end: f32) {
        let progress = start + (end - start) * self.fraction();
        let (downloaded, total) = self.byte_counts();
        tracker.report(progress, downloaded, total).await;
    }
}

/// Parameters for spawning a progress reporter background task
pub(crate) struct ProgressReporterParams {
    /// Writer shared with the phase
    pub tracker: Arc<ProgressTracker>,
    /// Counter sampled on every tick
    pub source: ProgressSource,
    /// Overall progress at fraction 0
    pub start: f32,
    /// Overall progress at fraction 1
    pub end: f32,
    /// Time between writes
    pub interval: Duration,
    /// Stops the reporter
    pub stop: CancellationToken,
}

/// Spawn a background task that periodically reports phase progress.
///
/// The phase writes its own final value after stopping the reporter.
pub(crate) fn spawn_progress_reporter(
    params: ProgressReporterParams,
) -> tokio::task::JoinHandle<()> {
    let ProgressReporterParams {
        tracker,
        source,
        start,
        end,
        interval,
        stop,
    } = params;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    source.report(&tracker, start, end).await;
                }
                _ = stop.cancelled() => {
                    break;
                }
            }
        }
    })
}
