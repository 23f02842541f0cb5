//! Fixed-window counters, kept either in Redis or in process memory.

use super::policy::RateLimitPolicy;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Entries kept by [`MemoryStore`] before expired windows are swept.
const SWEEP_THRESHOLD: usize = 10_000;

/// Minimum time between two sweeps of [`MemoryStore`].
const SWEEP_INTERVAL_SECS: i64 = 60;

/// Prefix for every counter key written to Redis.
const REDIS_KEY_PREFIX: &str = "locale_gateway:ratelimit:";

/// Increment `KEYS[1]`, give it an expiry of `ARGV[1]` seconds if it has
/// none, and return the new count with the remaining TTL.
const HIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return {count, redis.call('TTL', KEYS[1])}
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis rate limit store failed: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Outcome of counting one request against a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub window_secs: u64,
    /// Unix timestamp (seconds) at which the current window ends
    pub reset_at: i64,
    /// Seconds until the window ends, at least 1
    pub retry_after: u64,
}

impl RateLimitDecision {
    fn new(policy: RateLimitPolicy, count: u32, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let allowed = count <= policy.limit;
        let until_reset = (reset_at - now).num_milliseconds().max(0) as u64;

        Self {
            allowed,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(count),
            window_secs: policy.window_secs,
            reset_at: reset_at.timestamp(),
            retry_after: until_reset.div_ceil(1000).max(1),
        }
    }
}

/// Request count for one key in its current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<String, RateLimitRecord>,
    last_sweep: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Drop expired windows once the map is large, at most once per interval.
    fn maybe_sweep(&mut self, now: DateTime<Utc>) {
        if self.records.len() < SWEEP_THRESHOLD {
            return;
        }
        if let Some(last) = self.last_sweep {
            if now - last < ChronoDuration::seconds(SWEEP_INTERVAL_SECS) {
                return;
            }
        }

        let before = self.records.len();
        self.records.retain(|_, record| now <= record.window_reset_at);
        self.last_sweep = Some(now);
        debug!("Swept {} expired rate limit windows", before - self.records.len());
    }
}

/// Process-local counters. Not shared between instances.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request for `key` at `now`.
    ///
    /// A window starts at the first request and ends `window_secs` later;
    /// requests after `window_reset_at` start a fresh window. Rejected
    /// requests do not increase the count.
    pub fn hit(&self, key: &str, policy: RateLimitPolicy, now: DateTime<Utc>) -> RateLimitDecision {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.maybe_sweep(now);

        let window = ChronoDuration::seconds(policy.window_secs as i64);
        let record = state.records.entry(key.to_string()).or_insert_with(|| RateLimitRecord {
            count: 0,
            window_reset_at: now + window,
        });

        if now > record.window_reset_at {
            record.count = 0;
            record.window_reset_at = now + window;
        }

        if record.count >= policy.limit {
            // Report one past the limit so the decision is a rejection
            return RateLimitDecision::new(policy, policy.limit.saturating_add(1), record.window_reset_at, now);
        }

        record.count += 1;
        RateLimitDecision::new(policy, record.count, record.window_reset_at, now)
    }

    /// Current record for `key`, expired or not.
    pub fn record(&self, key: &str) -> Option<RateLimitRecord> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters shared by every instance through Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    hit_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            hit_script: Script::new(HIT_SCRIPT),
        })
    }

    /// Count one request for `key`.
    ///
    /// Runs as one Lua script, so the increment and the expiry are atomic.
    /// The first request of a window sets the expiry and later ones leave
    /// it; a key left without an expiry gets a fresh one. Works on any
    /// Redis with scripting, without `EXPIRE NX` (Redis 7+).
    pub async fn hit(
        &self,
        key: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, StoreError> {
        let key = format!("{}{}", REDIS_KEY_PREFIX, key);
        let mut connection = self.connection.clone();

        let (count, ttl): (u32, i64) = self
            .hit_script
            .key(&key)
            .arg(policy.window_secs)
            .invoke_async(&mut connection)
            .await?;

        // A negative TTL means the key has no expiry; treat it as a full window
        let ttl = if ttl < 0 { policy.window_secs as i64 } else { ttl };
        let reset_at = now + ChronoDuration::seconds(ttl);

        Ok(RateLimitDecision::new(policy, count, reset_at, now))
    }
}

/// Where counters live.
#[derive(Debug)]
pub enum RateLimitStore {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl RateLimitStore {
    pub fn backend_name(&self) -> &'static str {
        match self {
            RateLimitStore::Redis(_) => "redis",
            RateLimitStore::Memory(_) => "memory",
        }
    }

    pub async fn hit(
        &self,
        key: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, StoreError> {
        match self {
            RateLimitStore::Redis(store) => store.hit(key, policy, now).await,
            RateLimitStore::Memory(store) => Ok(store.hit(key, policy, now)),
        }
    }
}
