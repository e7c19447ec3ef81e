//! Job update broadcaster backing `watch` streams.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use log::warn;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::job::CompilationJob;

/// Snapshot of a job after a persisted change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job: CompilationJob,
    pub percent: u8,
    pub label: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn from_job(job: &CompilationJob) -> Self {
        Self {
            percent: job.progress_percent(),
            label: job.status.label(),
            timestamp: job.updated_at,
            job: job.clone(),
        }
    }
}

/// Broadcasts job snapshots to watchers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, job: &CompilationJob) {
        // No receivers is fine
        let _ = self.sender.send(JobEvent::from_job(job));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Stream of snapshots for one job: `initial` first, then every update
/// until the job reaches a terminal status.
///
/// `receiver` must be subscribed before `initial` is read so no update
/// falls between the two.
pub fn job_stream(
    initial: CompilationJob,
    receiver: broadcast::Receiver<JobEvent>,
) -> BoxStream<'static, CompilationJob> {
    let job_id = initial.id.clone();
    let finished = initial.status.is_terminal();
    let first = stream::once(async move { initial });
    if finished {
        return first.boxed();
    }

    let rest = stream::unfold(Some(receiver), move |receiver| {
        let job_id = job_id.clone();
        async move {
            let mut receiver = receiver?;
            loop {
                match receiver.recv().await {
                    Ok(event) if event.job.id == job_id => {
                        let next = if event.job.status.is_terminal() {
                            None
                        } else {
                            Some(receiver)
                        };
                        return Some((event.job, next));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Watcher for job {} skipped {} updates", job_id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    });
    first.chain(rest).boxed()
}
