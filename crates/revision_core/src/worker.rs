//! crates/revision_core/src/worker.rs
//!
//! The detached grading worker. Submissions are handed off through an
//! explicit queue rather than an unawaited call, so failures are observable
//! and a retry policy can be plugged in. The submitting request returns as
//! soon as the job is enqueued; callers poll the submission to observe
//! completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::PracticeError;
use crate::grading::GradingOrchestrator;
use crate::ports::PortError;

/// One unit of grading work.
#[derive(Debug, Clone)]
pub struct GradingJob {
    pub session_id: Uuid,
    pub submission_id: Uuid,
    pub attempt: u32,
}

/// Decides whether a job that failed at the gateway is re-queued, and after
/// how long. Only gateway failures are consulted; quota denials and state
/// conflicts are never retried.
pub trait RetryPolicy: Send + Sync {
    /// The delay before attempt `attempt + 1`, or `None` to give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// The default policy: failed gradings stay ungraded until a caller
/// explicitly re-requests grading.
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Retries at a fixed interval up to a bounded number of attempts.
pub struct FixedDelay {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

//=========================================================================================
// Queue Handle and Worker Loop
//=========================================================================================

/// The sending half of the grading queue, held by request handlers.
#[derive(Clone)]
pub struct GradingQueue {
    tx: mpsc::Sender<GradingJob>,
}

impl GradingQueue {
    /// Enqueues a grading job. Fails only if the worker has shut down.
    pub async fn enqueue(
        &self,
        session_id: Uuid,
        submission_id: Uuid,
    ) -> Result<(), PracticeError> {
        self.tx
            .send(GradingJob {
                session_id,
                submission_id,
                attempt: 0,
            })
            .await
            .map_err(|_| {
                PracticeError::Port(PortError::Unexpected(
                    "grading worker is not running".to_string(),
                ))
            })
    }
}

/// Spawns the grading worker and returns the queue handle plus the worker's
/// join handle. The worker drains jobs until every `GradingQueue` clone has
/// been dropped, isolating each job's failure from the loop.
pub fn spawn_grading_worker(
    orchestrator: Arc<GradingOrchestrator>,
    retry: Arc<dyn RetryPolicy>,
    capacity: usize,
) -> (GradingQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<GradingJob>(capacity);
    // A weak handle for re-queueing retries: it must not keep the channel
    // open once all external senders are gone, or the worker never stops.
    let requeue = tx.downgrade();

    let handle = tokio::spawn(async move {
        info!("Grading worker started.");
        while let Some(job) = rx.recv().await {
            let session_id = job.session_id;
            let submission_id = job.submission_id;
            match orchestrator.grade(session_id, submission_id).await {
                Ok(()) => {}
                Err(PracticeError::GatewayFailure(reason)) => {
                    error!(%session_id, %submission_id, %reason, "Grading failed at the gateway; submission stays ungraded.");
                    if let Some(delay) = retry.next_delay(job.attempt) {
                        let requeue = requeue.clone();
                        let next = GradingJob {
                            attempt: job.attempt + 1,
                            ..job
                        };
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            if let Some(tx) = requeue.upgrade() {
                                if tx.send(next).await.is_err() {
                                    warn!("Dropped grading retry: worker shut down.");
                                }
                            }
                        });
                    }
                }
                Err(PracticeError::QuotaExceeded(action)) => {
                    warn!(%session_id, %submission_id, %action, "Grading denied by the usage ledger; submission stays ungraded.");
                }
                Err(e) => {
                    error!(%session_id, %submission_id, error = %e, "Grading job failed.");
                }
            }
        }
        info!("Grading worker stopped.");
    });

    (GradingQueue { tx }, handle)
}
