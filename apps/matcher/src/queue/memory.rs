//! In-process Upload Queue with the same wait/active/delayed semantics as
//! the Redis one. Used by tests and single-process development.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::error;
use uuid::Uuid;

use crate::queue::{JobQueue, QueueError, QueuedJob, Reservation, DEFAULT_LEASE};

#[derive(Debug, Default)]
struct State {
    wait: VecDeque<String>,
    /// Reserved envelopes with their lease deadlines, oldest reservation first.
    active: Vec<(String, Instant)>,
    delayed: Vec<(Instant, String)>,
}

#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    lease: Duration,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            lease: DEFAULT_LEASE,
        }
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Pushes an envelope exactly as given, bypassing encoding.
    pub async fn push_raw(&self, raw: impl Into<String>) {
        self.state.lock().await.wait.push_back(raw.into());
    }

    pub async fn waiting(&self) -> usize {
        self.state.lock().await.wait.len()
    }

    pub async fn active(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn delayed(&self) -> usize {
        self.state.lock().await.delayed.len()
    }
}

fn remove_active(active: &mut Vec<(String, Instant)>, raw: &str) {
    if let Some(pos) = active.iter().position(|(r, _)| r == raw) {
        active.remove(pos);
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, data: &str) -> Result<Uuid, QueueError> {
        let job = QueuedJob::new(data);
        let raw = job.encode()?;
        self.state.lock().await.wait.push_back(raw);
        Ok(job.id)
    }

    async fn reserve(&self) -> Result<Option<Reservation>, QueueError> {
        let mut state = self.state.lock().await;
        while let Some(raw) = state.wait.pop_front() {
            match QueuedJob::decode(&raw) {
                Ok(job) => {
                    state.active.push((raw.clone(), Instant::now() + self.lease));
                    return Ok(Some(Reservation { job, raw }));
                }
                Err(e) => error!(error = %e, envelope = %raw, "dropping undecodable queue entry"),
            }
        }
        Ok(None)
    }

    fn lease(&self) -> Duration {
        self.lease
    }

    async fn extend_lease(&self, reservation: &Reservation) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        match state.active.iter_mut().find(|(r, _)| *r == reservation.raw) {
            Some((_, deadline)) => {
                *deadline = Instant::now() + self.lease;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete(&self, reservation: &Reservation) -> Result<(), QueueError> {
        remove_active(&mut self.state.lock().await.active, &reservation.raw);
        Ok(())
    }

    async fn retry_later(
        &self,
        reservation: &Reservation,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let raw = reservation.job.next_attempt().encode()?;
        let mut state = self.state.lock().await;
        remove_active(&mut state.active, &reservation.raw);
        state.delayed.push((Instant::now() + delay, raw));
        Ok(())
    }

    async fn discard(&self, reservation: &Reservation) -> Result<(), QueueError> {
        self.complete(reservation).await
    }

    async fn promote_due(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let (due, pending): (Vec<_>, Vec<_>) =
            state.delayed.drain(..).partition(|(at, _)| *at <= now);
        state.delayed = pending;
        let moved = due.len();
        state.wait.extend(due.into_iter().map(|(_, raw)| raw));
        Ok(moved)
    }

    async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let (stalled, held): (Vec<_>, Vec<_>) = state
            .active
            .drain(..)
            .partition(|(_, deadline)| *deadline <= now);
        state.active = held;
        let moved = stalled.len();
        for (raw, _) in stalled.into_iter().rev() {
            state.wait.push_front(raw);
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_reservation() {
        let queue = InMemoryQueue::new();
        queue.enqueue("first").await.unwrap();
        queue.enqueue("second").await.unwrap();

        let a = queue.reserve().await.unwrap().unwrap();
        let b = queue.reserve().await.unwrap().unwrap();
        assert_eq!(a.job.data, "first");
        assert_eq!(b.job.data, "second");
        assert_eq!(queue.active().await, 2);
        assert!(queue.reserve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_removes_from_active() {
        let queue = InMemoryQueue::new();
        queue.enqueue("job").await.unwrap();
        let r = queue.reserve().await.unwrap().unwrap();
        queue.complete(&r).await.unwrap();
        assert_eq!(queue.active().await, 0);
        assert_eq!(queue.waiting().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_backoff() {
        let queue = InMemoryQueue::new();
        queue.enqueue("job").await.unwrap();
        let r = queue.reserve().await.unwrap().unwrap();
        queue
            .retry_later(&r, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(queue.active().await, 0);
        assert_eq!(queue.delayed().await, 1);

        assert_eq!(queue.promote_due().await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(queue.promote_due().await.unwrap(), 1);

        let again = queue.reserve().await.unwrap().unwrap();
        assert_eq!(again.job.id, r.job.id);
        assert_eq!(again.job.attempts, 1);
    }

    #[tokio::test]
    async fn test_undecodable_envelope_is_skipped() {
        let queue = InMemoryQueue::new();
        queue.push_raw("{broken").await;
        queue.enqueue("good").await.unwrap();

        let r = queue.reserve().await.unwrap().unwrap();
        assert_eq!(r.job.data, "good");
        assert_eq!(queue.waiting().await, 0);
        assert_eq!(queue.active().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_stalled_requeues_in_order() {
        let queue = InMemoryQueue::new();
        queue.enqueue("a").await.unwrap();
        queue.enqueue("b").await.unwrap();
        queue.enqueue("c").await.unwrap();
        queue.reserve().await.unwrap();
        queue.reserve().await.unwrap();

        tokio::time::advance(DEFAULT_LEASE).await;
        assert_eq!(queue.recover_stalled().await.unwrap(), 2);
        assert_eq!(queue.active().await, 0);
        let order: Vec<String> = [
            queue.reserve().await.unwrap().unwrap(),
            queue.reserve().await.unwrap().unwrap(),
            queue.reserve().await.unwrap().unwrap(),
        ]
        .into_iter()
        .map(|r| r.job.data)
        .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_leaves_leased_jobs_alone() {
        let queue = InMemoryQueue::new().with_lease(Duration::from_secs(30));
        queue.enqueue("job").await.unwrap();
        let first = queue.reserve().await.unwrap().unwrap();

        // another consumer starting up while the job is still held
        assert_eq!(queue.recover_stalled().await.unwrap(), 0);
        assert!(queue.reserve().await.unwrap().is_none());
        assert_eq!(queue.active().await, 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(queue.recover_stalled().await.unwrap(), 1);
        let second = queue.reserve().await.unwrap().unwrap();
        assert_eq!(second.job.id, first.job.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_lease_keeps_job_reserved() {
        let queue = InMemoryQueue::new().with_lease(Duration::from_secs(10));
        queue.enqueue("job").await.unwrap();
        let r = queue.reserve().await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(queue.extend_lease(&r).await.unwrap());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(queue.recover_stalled().await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(queue.recover_stalled().await.unwrap(), 1);
        assert!(!queue.extend_lease(&r).await.unwrap());
    }
}
