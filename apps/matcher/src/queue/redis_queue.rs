//! Redis-backed Upload Queue.
//!
//! Keys, for a queue named `resume-upload`:
//! - `resume-upload:wait` list, producers `LPUSH`, workers take from the right
//! - `resume-upload:active` list of reserved envelopes, newest on the left
//! - `resume-upload:leases` sorted set of reserved envelopes scored by lease
//!   deadline in epoch millis
//! - `resume-upload:delayed` sorted set scored by due time in epoch millis
//!
//! Lease deadlines come from the Redis server clock, so consumers on hosts
//! with skewed clocks still agree on which leases have expired.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{error, info};
use uuid::Uuid;

use crate::queue::{JobQueue, QueueError, QueuedJob, Reservation, DEFAULT_LEASE};

/// Delayed jobs promoted per `promote_due` call.
const PROMOTE_BATCH: usize = 100;

const PROMOTE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, member in ipairs(due) do
    redis.call('ZREM', KEYS[1], member)
    redis.call('LPUSH', KEYS[2], member)
end
return #due
";

const RESERVE_SCRIPT: &str = r"
local raw = redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT')
if not raw then
    return false
end
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
redis.call('ZADD', KEYS[3], now + tonumber(ARGV[1]), raw)
return raw
";

const EXTEND_SCRIPT: &str = r"
if not redis.call('ZSCORE', KEYS[1], ARGV[2]) then
    return 0
end
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
redis.call('ZADD', KEYS[1], now + tonumber(ARGV[1]), ARGV[2])
return 1
";

// `active` is newest first, so walking it from the left and pushing each
// expired entry onto the dequeue end leaves the oldest at the head.
const RECOVER_SCRIPT: &str = r"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local moved = 0
for _, raw in ipairs(redis.call('LRANGE', KEYS[1], 0, -1)) do
    local deadline = redis.call('ZSCORE', KEYS[3], raw)
    if not deadline or tonumber(deadline) <= now then
        redis.call('LREM', KEYS[1], 1, raw)
        redis.call('ZREM', KEYS[3], raw)
        redis.call('RPUSH', KEYS[2], raw)
        moved = moved + 1
    end
end
return moved
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub wait: String,
    pub active: String,
    pub leases: String,
    pub delayed: String,
}

impl QueueKeys {
    pub fn new(name: &str) -> Self {
        Self {
            wait: format!("{name}:wait"),
            active: format!("{name}:active"),
            leases: format!("{name}:leases"),
            delayed: format!("{name}:delayed"),
        }
    }
}

pub struct RedisQueue {
    conn: ConnectionManager,
    keys: QueueKeys,
    lease: Duration,
    promote: Script,
    reserve: Script,
    extend: Script,
    recover: Script,
}

impl RedisQueue {
    pub async fn connect(url: &str, name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(queue = name, "connected to redis queue");
        Ok(Self {
            conn,
            keys: QueueKeys::new(name),
            lease: DEFAULT_LEASE,
            promote: Script::new(PROMOTE_SCRIPT),
            reserve: Script::new(RESERVE_SCRIPT),
            extend: Script::new(EXTEND_SCRIPT),
            recover: Script::new(RECOVER_SCRIPT),
        })
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    fn lease_ms(&self) -> u64 {
        u64::try_from(self.lease.as_millis()).unwrap_or(u64::MAX)
    }

    /// Drops `raw` from `active` and its lease, leaving it nowhere.
    async fn release(&self, raw: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lrem(&self.keys.active, 1, raw)
            .ignore()
            .zrem(&self.keys.leases, raw)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, data: &str) -> Result<Uuid, QueueError> {
        let job = QueuedJob::new(data);
        let raw = job.encode()?;
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.keys.wait, raw).await?;
        Ok(job.id)
    }

    async fn reserve(&self) -> Result<Option<Reservation>, QueueError> {
        let mut conn = self.conn.clone();
        loop {
            let raw: Option<String> = self
                .reserve
                .key(&self.keys.wait)
                .key(&self.keys.active)
                .key(&self.keys.leases)
                .arg(self.lease_ms())
                .invoke_async(&mut conn)
                .await?;
            let Some(raw) = raw else {
                return Ok(None);
            };

            match QueuedJob::decode(&raw) {
                Ok(job) => return Ok(Some(Reservation { job, raw })),
                Err(e) => {
                    error!(error = %e, envelope = %raw, "dropping undecodable queue entry");
                    self.release(&raw).await?;
                }
            }
        }
    }

    fn lease(&self) -> Duration {
        self.lease
    }

    async fn extend_lease(&self, reservation: &Reservation) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let held: i64 = self
            .extend
            .key(&self.keys.leases)
            .arg(self.lease_ms())
            .arg(&reservation.raw)
            .invoke_async(&mut conn)
            .await?;
        Ok(held == 1)
    }

    async fn complete(&self, reservation: &Reservation) -> Result<(), QueueError> {
        self.release(&reservation.raw).await
    }

    async fn retry_later(
        &self,
        reservation: &Reservation,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let raw = reservation.job.next_attempt().encode()?;
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let due_ms = Utc::now().timestamp_millis().saturating_add(delay_ms);

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lrem(&self.keys.active, 1, &reservation.raw)
            .ignore()
            .zrem(&self.keys.leases, &reservation.raw)
            .ignore()
            .zadd(&self.keys.delayed, raw, due_ms)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn discard(&self, reservation: &Reservation) -> Result<(), QueueError> {
        self.complete(reservation).await
    }

    async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let moved: usize = self
            .promote
            .key(&self.keys.delayed)
            .key(&self.keys.wait)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let moved: usize = self
            .recover
            .key(&self.keys.active)
            .key(&self.keys.wait)
            .key(&self.keys.leases)
            .invoke_async(&mut conn)
            .await?;
        if moved > 0 {
            info!(moved, "returned jobs with expired leases to the wait list");
        }
        Ok(moved)
    }
}
