//! Bounded pool of ingestion workers fed from the Upload Queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};

use crate::ingestion::worker::IngestionWorker;
use crate::queue::retry::{Disposition, RetryPolicy};
use crate::queue::{JobQueue, Reservation};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Final state of one delivery of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retrying { delay: Duration },
    DeadLettered,
    Dropped,
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    worker: Arc<IngestionWorker>,
    retry: RetryPolicy,
    concurrency: usize,
    poll_interval: Duration,
    recovery_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        worker: Arc<IngestionWorker>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        let recovery_interval = queue.lease();
        Self {
            queue,
            worker,
            retry,
            concurrency: concurrency.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
            recovery_interval,
        }
    }

    /// How long to wait before polling again when the queue is empty.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How often to look for jobs whose lease ran out. Defaults to the
    /// queue's lease.
    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    /// Consumes jobs until `shutdown` flips to `true`, then waits for jobs
    /// already running to finish. Queue errors are logged and retried, never
    /// fatal.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut next_recovery = Instant::now();
        info!(concurrency = self.concurrency, "ingestion worker pool started");

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit,
                _ = shutdown.changed() => break,
            };
            let Ok(permit) = permit else { break };

            if Instant::now() >= next_recovery {
                next_recovery = match self.queue.recover_stalled().await {
                    Ok(_) => Instant::now() + self.recovery_interval,
                    Err(e) => {
                        warn!(error = %e, "failed to recover stalled jobs, will retry");
                        Instant::now() + self.poll_interval
                    }
                };
            }

            if let Err(e) = self.queue.promote_due().await {
                warn!(error = %e, "failed to promote delayed jobs");
            }

            match self.queue.reserve().await {
                Ok(Some(reservation)) => {
                    let queue = self.queue.clone();
                    let worker = self.worker.clone();
                    let retry = self.retry.clone();
                    tokio::spawn(async move {
                        handle_reservation(queue.as_ref(), &worker, &retry, reservation).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    self.idle(&mut shutdown).await;
                }
                Err(e) => {
                    drop(permit);
                    warn!(error = %e, "failed to reserve job");
                    self.idle(&mut shutdown).await;
                }
            }
        }

        info!("shutting down ingestion worker pool, waiting for running jobs");
        let all = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        if semaphore.acquire_many(all).await.is_err() {
            warn!("worker semaphore closed during shutdown");
        }
        info!("ingestion worker pool stopped");
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

/// Runs one reserved job, renewing its lease until it finishes, and settles
/// it on the queue according to `retry`.
pub async fn handle_reservation(
    queue: &dyn JobQueue,
    worker: &IngestionWorker,
    retry: &RetryPolicy,
    reservation: Reservation,
) -> JobOutcome {
    let job_id = reservation.job.id;
    let attempt = reservation.job.attempts.saturating_add(1);
    let span = info_span!("ingest", %job_id, attempt);

    let work = worker.process_resume(&reservation.job.data).instrument(span);
    tokio::pin!(work);

    let mut heartbeat = tokio::time::interval((queue.lease() / 3).max(MIN_HEARTBEAT));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    let result = loop {
        tokio::select! {
            result = &mut work => break result,
            _ = heartbeat.tick() => match queue.extend_lease(&reservation).await {
                Ok(true) => {}
                Ok(false) => warn!(%job_id, "lease lost, job may be delivered again"),
                Err(e) => warn!(%job_id, error = %e, "failed to extend job lease"),
            },
        }
    };

    let (outcome, settled) = match result {
        Ok(report) => {
            info!(
                %job_id,
                candidate_id = %report.candidate_id,
                chunks = report.chunks_indexed,
                file_removed = report.file_removed,
                "job completed"
            );
            (JobOutcome::Completed, queue.complete(&reservation).await)
        }
        Err(e) => match retry.decide(e.kind(), attempt) {
            Disposition::Retry { delay } => {
                warn!(
                    %job_id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "job failed, will retry"
                );
                (
                    JobOutcome::Retrying { delay },
                    queue.retry_later(&reservation, delay).await,
                )
            }
            Disposition::DeadLetter => {
                error!(
                    %job_id,
                    attempt,
                    error = %e,
                    payload = %reservation.job.data,
                    "job dead-lettered"
                );
                (JobOutcome::DeadLettered, queue.discard(&reservation).await)
            }
            Disposition::Drop => {
                error!(
                    %job_id,
                    error = %e,
                    payload = %reservation.job.data,
                    "dropping malformed job"
                );
                (JobOutcome::Dropped, queue.discard(&reservation).await)
            }
        },
    };

    if let Err(e) = settled {
        error!(%job_id, error = %e, "failed to settle job on the queue");
    }
    outcome
}
