//! Route classes and the request budget attached to each.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Paths that are never rate limited.
const EXEMPT_PREFIXES: &[&str] = &["/assets/", "/favicon.ico", "/health"];

/// Group of routes sharing one request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// The geolocation proxy under `/api/geolocation`
    Geolocation,
    /// Any other `/api/` route
    Api,
    /// Public pages
    Public,
}

impl RouteClass {
    /// Classify a request path, or `None` when the path is exempt.
    pub fn classify(path: &str) -> Option<RouteClass> {
        if EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
            return None;
        }

        if path.starts_with("/api/geolocation") {
            Some(RouteClass::Geolocation)
        } else if path.starts_with("/api/") {
            Some(RouteClass::Api)
        } else {
            Some(RouteClass::Public)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Geolocation => "geolocation",
            RouteClass::Api => "api",
            RouteClass::Public => "public",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `limit` requests per `window_secs` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window_secs: u64,
}

impl RateLimitPolicy {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid rate limit {0:?}: expected <limit>/<window_secs>, both greater than zero")]
pub struct InvalidPolicy(String);

impl FromStr for RateLimitPolicy {
    type Err = InvalidPolicy;

    /// Parse `"<limit>/<window_secs>"`, e.g. `"20/60"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidPolicy(s.to_string());

        let (limit, window) = s.split_once('/').ok_or_else(invalid)?;
        let limit: u32 = limit.trim().parse().map_err(|_| invalid())?;
        let window_secs: u64 = window.trim().parse().map_err(|_| invalid())?;

        if limit == 0 || window_secs == 0 {
            return Err(invalid());
        }

        Ok(Self::new(limit, window_secs))
    }
}

/// Budgets for every route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicies {
    pub geolocation: RateLimitPolicy,
    pub api: RateLimitPolicy,
    pub public: RateLimitPolicy,
}

impl RateLimitPolicies {
    pub fn for_class(&self, class: RouteClass) -> RateLimitPolicy {
        match class {
            RouteClass::Geolocation => self.geolocation,
            RouteClass::Api => self.api,
            RouteClass::Public => self.public,
        }
    }
}

impl Default for RateLimitPolicies {
    fn default() -> Self {
        Self {
            geolocation: RateLimitPolicy::new(20, 60),
            api: RateLimitPolicy::new(10, 10),
            public: RateLimitPolicy::new(100, 60),
        }
    }
}
