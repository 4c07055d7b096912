//! Upload Queue: at-least-once delivery of ingestion payloads.
//!
//! A job lives in exactly one of three places: `wait` (ready), `active`
//! (reserved by a worker) or `delayed` (backing off before a retry). Finished
//! and failed jobs are removed rather than kept around.
//!
//! Every reservation carries a lease. The holder renews it while working;
//! stalled-job recovery only returns active jobs whose lease has run out, so
//! several consumer processes can share one queue.

pub mod memory;
pub mod redis_queue;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use memory::InMemoryQueue;
pub use redis_queue::RedisQueue;

/// Lease granted by `reserve` unless a queue is built with another one.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid queue envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// Envelope stored in the queue around the raw job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub id: Uuid,
    /// Failed attempts so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Raw JSON payload, decoded by the handler.
    pub data: String,
}

impl QueuedJob {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempts: 0,
            enqueued_at: Utc::now(),
            data: data.into(),
        }
    }

    pub fn encode(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, QueueError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The same job with one more failed attempt on record.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempts: self.attempts.saturating_add(1),
            ..self.clone()
        }
    }
}

/// A job handed to one worker. `raw` is the exact stored envelope, used to
/// remove it from `active` afterwards.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub job: QueuedJob,
    pub raw: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queues a raw payload and returns the new job id.
    async fn enqueue(&self, data: &str) -> Result<Uuid, QueueError>;

    /// Moves the oldest waiting job to `active` under a fresh lease. Returns
    /// `None` when nothing is waiting; never blocks. Envelopes that fail to
    /// decode are logged and removed.
    async fn reserve(&self) -> Result<Option<Reservation>, QueueError>;

    /// Length of the lease granted by `reserve` and `extend_lease`.
    fn lease(&self) -> Duration;

    /// Pushes the lease deadline out by another `lease()`. Returns `false`
    /// when the job is no longer held, i.e. it was recovered after the lease
    /// ran out.
    async fn extend_lease(&self, reservation: &Reservation) -> Result<bool, QueueError>;

    /// Removes a finished job.
    async fn complete(&self, reservation: &Reservation) -> Result<(), QueueError>;

    /// Moves a failed job to `delayed`, due after `delay`, with its attempt
    /// count bumped.
    async fn retry_later(
        &self,
        reservation: &Reservation,
        delay: Duration,
    ) -> Result<(), QueueError>;

    /// Removes a job that will not be retried.
    async fn discard(&self, reservation: &Reservation) -> Result<(), QueueError>;

    /// Moves delayed jobs whose backoff has elapsed back to `wait`.
    async fn promote_due(&self) -> Result<usize, QueueError>;

    /// Moves active jobs whose lease has expired back to the head of `wait`,
    /// oldest reservation first. Jobs still under lease are left alone.
    async fn recover_stalled(&self) -> Result<usize, QueueError>;
}
