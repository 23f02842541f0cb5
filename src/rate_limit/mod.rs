//! Per-client, per-route-class request limiting.
//!
//! Counters live in Redis when `REDIS_URL` is set and reachable, so every
//! instance shares the same budget. Otherwise each process keeps its own.

mod identifier;
mod middleware;
mod policy;
mod store;

pub use identifier::{client_identifier, UNKNOWN_CLIENT};
pub use middleware::{rate_limit, RateLimitExceeded};
pub use policy::{InvalidPolicy, RateLimitPolicies, RateLimitPolicy, RouteClass};
pub use store::{MemoryStore, RateLimitDecision, RateLimitRecord, RateLimitStore, RedisStore, StoreError};

use crate::retry::{with_retry, RetryConfig};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

#[derive(Debug)]
pub struct RateLimiter {
    store: RateLimitStore,
    policies: RateLimitPolicies,
}

impl RateLimiter {
    pub fn new(store: RateLimitStore, policies: RateLimitPolicies) -> Self {
        Self { store, policies }
    }

    pub fn in_memory(policies: RateLimitPolicies) -> Self {
        Self::new(RateLimitStore::Memory(MemoryStore::new()), policies)
    }

    /// Use Redis at `redis_url` if given and reachable, else process memory.
    pub async fn connect(redis_url: Option<&str>, policies: RateLimitPolicies) -> Self {
        let Some(url) = redis_url else {
            info!("REDIS_URL not set, rate limiting with in-process counters");
            return Self::in_memory(policies);
        };

        match with_retry(&RetryConfig::store_connect(), "Redis connect", || RedisStore::connect(url)).await {
            Ok(store) => {
                info!("✓ Rate limiting backed by Redis");
                Self::new(RateLimitStore::Redis(store), policies)
            }
            Err(e) => {
                warn!("Could not reach Redis ({}), rate limiting with in-process counters", e);
                Self::in_memory(policies)
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    /// Count a request from `identifier` against the budget of `class`.
    pub async fn admit(&self, identifier: &str, class: RouteClass) -> Result<RateLimitDecision, StoreError> {
        self.admit_at(identifier, class, Utc::now()).await
    }

    pub async fn admit_at(
        &self,
        identifier: &str,
        class: RouteClass,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, StoreError> {
        let key = format!("{}:{}", class.as_str(), identifier);
        self.store.hit(&key, self.policies.for_class(class), now).await
    }
}
