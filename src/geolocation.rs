//! Client for the IP geolocation provider.
//!
//! Lookups for the caller's own address (no explicit IP) are cached for a
//! fixed TTL and de-duplicated: while one such request is outstanding, every
//! other caller awaits the same shared future instead of issuing its own.
//! Lookups for an explicit IP always go to the provider.
//!
//! Failures never propagate to callers of [`GeolocationClient::fetch_location`];
//! they are logged, remembered in [`GeolocationClient::last_error`] and turned
//! into `None`.

use crate::retry::{with_retry_if, RetryConfig};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Settings for the geolocation provider.
#[derive(Clone)]
pub struct GeolocationConfig {
    /// Provider base URL, e.g. "https://ipapi.co"
    pub base_url: String,
    /// Optional credential sent as the `key` query parameter
    pub api_key: Option<String>,
    /// Upper bound for one lookup, retries included
    pub timeout: Duration,
    /// How long a caller-IP lookup stays cached
    pub cache_ttl: Duration,
}

impl std::fmt::Debug for GeolocationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeolocationConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ipapi.co".to_string(),
            api_key: None,
            timeout: Duration::from_secs(3),
            cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Location data returned by the provider.
///
/// Only the fields the site uses are typed; everything else the provider
/// sends is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeolocationRecord {
    #[serde(default)]
    pub ip: String,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub timezone: Option<String>,
    /// Comma-separated language preference list, e.g. "en-US,es-US,fr"
    pub languages: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum GeolocationError {
    #[error("geolocation lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("geolocation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("geolocation provider returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("geolocation provider reported an error: {0}")]
    Provider(String),

    #[error("invalid geolocation response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("not an IP address: {0:?}")]
    InvalidIp(String),
}

impl GeolocationError {
    /// Whether another attempt could succeed (network trouble or 5xx).
    fn is_transient(&self) -> bool {
        match self {
            GeolocationError::Http(e) => e.is_connect() || e.is_timeout(),
            GeolocationError::Status(status) => status.is_server_error(),
            _ => false,
        }
    }
}

fn parse_ip(ip: &str) -> Result<IpAddr, GeolocationError> {
    ip.trim()
        .parse()
        .map_err(|_| GeolocationError::InvalidIp(ip.to_string()))
}

type SharedLookup = Shared<BoxFuture<'static, Option<Arc<GeolocationRecord>>>>;

#[derive(Default)]
struct CacheState {
    record: Option<Arc<GeolocationRecord>>,
    fetched_at: Option<Instant>,
    last_error: Option<String>,
    in_flight: Option<SharedLookup>,
}

impl CacheState {
    fn fresh_record(&self, ttl: Duration) -> Option<Arc<GeolocationRecord>> {
        match (&self.record, self.fetched_at) {
            (Some(record), Some(fetched_at)) if fetched_at.elapsed() < ttl => Some(Arc::clone(record)),
            _ => None,
        }
    }
}

struct Inner {
    http: reqwest::Client,
    config: GeolocationConfig,
    state: Mutex<CacheState>,
}

/// Geolocation provider client with a shared cache.
///
/// Cloning is cheap; clones share the cache and the in-flight lookup.
#[derive(Clone)]
pub struct GeolocationClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for GeolocationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeolocationClient")
            .field("base_url", &self.inner.config.base_url)
            .field("timeout", &self.inner.config.timeout)
            .finish_non_exhaustive()
    }
}

impl GeolocationClient {
    pub fn new(config: GeolocationConfig) -> Result<Self, GeolocationError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                state: Mutex::new(CacheState::default()),
            }),
        })
    }

    pub fn config(&self) -> &GeolocationConfig {
        &self.inner.config
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoint(&self, ip: Option<IpAddr>) -> String {
        let base = self.inner.config.base_url.trim_end_matches('/');
        match ip {
            Some(ip) => format!("{}/{}/json/", base, ip),
            None => format!("{}/json/", base),
        }
    }

    /// One request to the provider, without timeout or retries.
    async fn request(&self, ip: Option<IpAddr>) -> Result<GeolocationRecord, GeolocationError> {
        let url = self.endpoint(ip);
        debug!("Fetching geolocation data from: {}", url);

        let mut request = self.inner.http.get(&url);
        if let Some(key) = &self.inner.config.api_key {
            request = request.query(&[("key", key)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GeolocationError::Status(status));
        }

        let body: serde_json::Value = response.json().await?;
        if body.get("error").and_then(serde_json::Value::as_bool) == Some(true) {
            let reason = body
                .get("reason")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("Geolocation lookup failed");
            return Err(GeolocationError::Provider(reason.to_string()));
        }

        Ok(serde_json::from_value(body)?)
    }

    /// Look up a location, bounded by the configured timeout.
    ///
    /// Bypasses the cache. Transient failures are retried while time remains.
    ///
    /// `ip` must parse as an IP address; anything else is rejected before a
    /// request is made.
    pub async fn lookup(&self, ip: Option<&str>) -> Result<GeolocationRecord, GeolocationError> {
        let ip = ip.map(parse_ip).transpose()?;
        let timeout = self.inner.config.timeout;
        let retry = RetryConfig::geolocation_lookup();
        let attempt = with_retry_if(
            &retry,
            "Geolocation lookup",
            || self.request(ip),
            GeolocationError::is_transient,
        );

        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| GeolocationError::Timeout(timeout))?
    }

    /// Get location data for `ip`, or for the caller's own address when `None`.
    ///
    /// Returns `None` on any failure; the reason is available from
    /// [`last_error`](Self::last_error).
    pub async fn fetch_location(&self, ip: Option<&str>) -> Option<Arc<GeolocationRecord>> {
        if let Some(ip) = ip {
            return match self.lookup(Some(ip)).await {
                Ok(record) => {
                    self.lock_state().last_error = None;
                    Some(Arc::new(record))
                }
                Err(e) => {
                    warn!("Geolocation lookup for {} failed: {}", ip, e);
                    self.lock_state().last_error = Some(e.to_string());
                    None
                }
            };
        }

        let pending = {
            let mut state = self.lock_state();

            if let Some(record) = state.fresh_record(self.inner.config.cache_ttl) {
                debug!("Using cached geolocation data");
                return Some(record);
            }

            match &state.in_flight {
                Some(pending) => {
                    debug!("Geolocation request already in progress, waiting");
                    pending.clone()
                }
                None => {
                    // Runs as its own task: it completes even if every waiter is dropped
                    let client = self.clone();
                    let task = tokio::spawn(async move { client.populate_cache().await });
                    let pending = async move {
                        task.await.unwrap_or_else(|e| {
                            warn!("Geolocation lookup task failed: {}", e);
                            None
                        })
                    }
                    .boxed()
                    .shared();
                    state.in_flight = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Run the caller-IP lookup and store its outcome.
    async fn populate_cache(&self) -> Option<Arc<GeolocationRecord>> {
        let result = self.lookup(None).await;

        let mut state = self.lock_state();
        state.in_flight = None;

        match result {
            Ok(record) => {
                let record = Arc::new(record);
                state.record = Some(Arc::clone(&record));
                state.fetched_at = Some(Instant::now());
                state.last_error = None;
                info!(
                    "Geolocation data cached (country: {})",
                    record.country_code.as_deref().unwrap_or("unknown")
                );
                Some(record)
            }
            Err(e) => {
                warn!("Geolocation lookup failed: {}", e);
                state.last_error = Some(e.to_string());
                None
            }
        }
    }

    /// Drop the cached record and any remembered error.
    pub fn clear_cache(&self) {
        let mut state = self.lock_state();
        state.record = None;
        state.fetched_at = None;
        state.last_error = None;
        debug!("Geolocation cache cleared");
    }

    /// Clear the cache, then look up again.
    pub async fn force_refresh(&self, ip: Option<&str>) -> Option<Arc<GeolocationRecord>> {
        self.clear_cache();
        self.fetch_location(ip).await
    }

    /// Lowercased country code for `ip` (or the caller).
    pub async fn country_code(&self, ip: Option<&str>) -> Option<String> {
        self.fetch_location(ip)
            .await
            .and_then(|record| record.country_code.clone())
            .map(|code| code.trim().to_ascii_lowercase())
            .filter(|code| !code.is_empty())
    }

    /// The cached caller-IP record, if still fresh.
    pub fn cached(&self) -> Option<Arc<GeolocationRecord>> {
        self.lock_state().fresh_record(self.inner.config.cache_ttl)
    }

    /// Message of the most recent failed lookup, cleared by a success.
    pub fn last_error(&self) -> Option<String> {
        self.lock_state().last_error.clone()
    }

    /// Whether a caller-IP lookup is outstanding.
    pub fn is_loading(&self) -> bool {
        self.lock_state().in_flight.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    // ==================== Helper Functions ====================

    fn create_test_client(base_url: &str) -> GeolocationClient {
        GeolocationClient::new(GeolocationConfig {
            base_url: base_url.to_string(),
            api_key: None,
            timeout: Duration::from_secs(2),
            cache_ttl: Duration::from_secs(300),
        })
        .expect("client should build")
    }

    fn create_location_response(country_code: &str, languages: &str) -> serde_json::Value {
        serde_json::json!({
            "ip": "93.184.216.34",
            "city": "Rome",
            "region": "Lazio",
            "country_code": country_code,
            "country_name": "Italy",
            "timezone": "Europe/Rome",
            "languages": languages,
            "asn": "AS15133",
            "in_eu": true
        })
    }

    // ==================== Parsing Tests ====================

    #[test]
    fn test_record_keeps_unknown_fields() {
        let record: GeolocationRecord =
            serde_json::from_value(create_location_response("IT", "it-IT,en")).unwrap();
        assert_eq!(record.country_code.as_deref(), Some("IT"));
        assert_eq!(record.languages.as_deref(), Some("it-IT,en"));
        assert_eq!(record.extra.get("asn").and_then(|v| v.as_str()), Some("AS15133"));
    }

    #[test]
    fn test_record_accepts_null_fields() {
        let record: GeolocationRecord =
            serde_json::from_value(serde_json::json!({"ip": "1.1.1.1", "languages": null})).unwrap();
        assert!(record.languages.is_none());
        assert!(record.country_code.is_none());
    }

    #[test]
    fn test_endpoint_shapes() {
        let client = create_test_client("https://geo.example.com/");
        assert_eq!(client.endpoint(None), "https://geo.example.com/json/");
        assert_eq!(
            client.endpoint(Some("8.8.8.8".parse().unwrap())),
            "https://geo.example.com/8.8.8.8/json/"
        );
        assert_eq!(
            client.endpoint(Some("2606:4700::1111".parse().unwrap())),
            "https://geo.example.com/2606:4700::1111/json/"
        );
    }

    // ==================== fetch_location Tests ====================

    #[tokio::test]
    async fn test_fetch_location_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_location_response("IT", "it-IT,en")))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let record = client.fetch_location(None).await.expect("Should succeed");

        assert_eq!(record.country_code.as_deref(), Some("IT"));
        assert!(client.last_error().is_none());
        assert!(!client.is_loading());
    }

    #[tokio::test]
    async fn test_caller_lookup_is_cached() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_location_response("FR", "fr-FR")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let first = client.fetch_location(None).await.unwrap();
        let second = client.fetch_location(None).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(client.cached().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_caller_lookups_share_one_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(create_location_response("DE", "de-DE"))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let other = client.clone();

        let (first, second) = tokio::join!(client.fetch_location(None), other.fetch_location(None));

        let first = first.expect("first caller gets the record");
        let second = second.expect("second caller gets the record");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_explicit_ip_bypasses_cache() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/8.8.8.8/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_location_response("US", "en-US")))
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert!(client.fetch_location(Some("8.8.8.8")).await.is_some());
        assert!(client.fetch_location(Some("8.8.8.8")).await.is_some());
        assert!(client.cached().is_none());
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_location_response("ES", "es-ES")))
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = GeolocationClient::new(GeolocationConfig {
            base_url: mock_server.uri(),
            cache_ttl: Duration::from_millis(50),
            ..GeolocationConfig::default()
        })
        .unwrap();

        assert!(client.fetch_location(None).await.is_some());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(client.cached().is_none());
        assert!(client.fetch_location(None).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_cache_forces_new_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_location_response("GB", "en-GB")))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert!(client.fetch_location(None).await.is_some());

        client.clear_cache();
        assert!(client.cached().is_none());
        assert!(client.last_error().is_none());

        assert!(client.fetch_location(None).await.is_some());
        assert!(client.force_refresh(None).await.is_some());
    }

    #[tokio::test]
    async fn test_api_key_is_sent_as_query_parameter() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .and(query_param("key", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_location_response("IN", "en-IN,hi")))
            .mount(&mock_server)
            .await;

        let client = GeolocationClient::new(GeolocationConfig {
            base_url: mock_server.uri(),
            api_key: Some("secret-key".to_string()),
            ..GeolocationConfig::default()
        })
        .unwrap();

        assert!(client.fetch_location(None).await.is_some());
    }

    #[tokio::test]
    async fn test_country_code_is_lowercased() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_location_response("IT", "it-IT,en")))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert_eq!(client.country_code(None).await.as_deref(), Some("it"));
    }

    // ==================== Failure Tests ====================

    #[tokio::test]
    async fn test_provider_error_flag_returns_none() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": true,
                "reason": "RateLimited"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert!(client.fetch_location(None).await.is_none());

        let error = client.last_error().expect("error should be recorded");
        assert!(error.contains("RateLimited"));
        assert!(!client.is_loading());
    }

    #[tokio::test]
    async fn test_timeout_returns_none() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(create_location_response("IT", "it"))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let client = GeolocationClient::new(GeolocationConfig {
            base_url: mock_server.uri(),
            timeout: Duration::from_millis(200),
            ..GeolocationConfig::default()
        })
        .unwrap();

        let started = Instant::now();
        assert!(client.fetch_location(None).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(client.last_error().is_some());
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert!(client.fetch_location(None).await.is_none());
        assert!(client.last_error().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert!(client.fetch_location(None).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_json_returns_none() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert!(client.fetch_location(None).await.is_none());
        assert!(client.last_error().is_some());
    }

    #[tokio::test]
    async fn test_connection_error_returns_none() {
        let client = create_test_client("http://127.0.0.1:1");
        assert!(client.fetch_location(Some("8.8.8.8")).await.is_none());
        assert!(client.last_error().is_some());
    }

    #[tokio::test]
    async fn test_success_clears_previous_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/1.2.3.4/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": true,
                "reason": "Reserved IP Address"
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_location_response("SA", "ar-SA")))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert!(client.fetch_location(Some("1.2.3.4")).await.is_none());
        assert!(client.last_error().is_some());

        assert!(client.fetch_location(None).await.is_some());
        assert!(client.last_error().is_none());
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_stall_lookup() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(create_location_response("ES", "es-ES"))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());

        // Give up long before the provider answers
        let abandoned = tokio::time::timeout(Duration::from_millis(50), client.fetch_location(None)).await;
        assert!(abandoned.is_err());
        assert!(client.is_loading());

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(!client.is_loading());
        assert!(client.cached().is_some());
        let record = client.fetch_location(None).await.expect("lookup finished without waiters");
        assert_eq!(record.country_code.as_deref(), Some("ES"));
    }

    // ==================== IP Validation Tests ====================

    #[tokio::test]
    async fn test_non_ip_input_never_reaches_provider() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_location_response("US", "en-US")))
            .expect(0)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());

        for input in ["../internal/usage?", "8.8.8.8/../x", "example.com", ""] {
            assert!(client.fetch_location(Some(input)).await.is_none(), "{:?}", input);
            assert!(client.last_error().unwrap().contains("not an IP address"));
        }

        let err = client.lookup(Some("../x?")).await.unwrap_err();
        assert!(matches!(err, GeolocationError::InvalidIp(_)));
    }
}
