use crate::geolocation::GeolocationConfig;
use crate::locale::LocaleDirectory;
use crate::rate_limit::{RateLimitPolicies, RateLimitPolicy};
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub site_url: String,

    // Routing
    pub default_country: String,

    // Geolocation provider
    pub geolocation: GeolocationConfig,

    // Rate limiting
    pub redis_url: Option<String>,
    pub rate_limits: RateLimitPolicies,
}

/// Read an optional variable; empty values count as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional variable, falling back to `default` when unset.
fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_var(name) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", name, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = RateLimitPolicies::default();
        let geolocation_defaults = GeolocationConfig::default();

        let default_country = optional_var("DEFAULT_COUNTRY").unwrap_or_else(|| "in".to_string());
        if !LocaleDirectory::is_valid_country_code(&default_country) {
            bail!("DEFAULT_COUNTRY must be a two-letter country code, got {:?}", default_country);
        }

        let port = parsed_var("PORT", 8080u16)?;

        Ok(Self {
            port,
            site_url: optional_var("SITE_URL")
                .unwrap_or_else(|| format!("http://localhost:{}", port))
                .trim_end_matches('/')
                .to_string(),

            default_country: default_country.to_ascii_lowercase(),

            geolocation: GeolocationConfig {
                base_url: optional_var("GEOLOCATION_API_URL")
                    .unwrap_or(geolocation_defaults.base_url)
                    .trim_end_matches('/')
                    .to_string(),
                api_key: optional_var("GEOLOCATION_API_KEY"),
                timeout: Duration::from_millis(parsed_var("GEOLOCATION_TIMEOUT_MS", 3000u64)?),
                cache_ttl: Duration::from_secs(parsed_var("GEOLOCATION_CACHE_TTL_SECS", 300u64)?),
            },

            redis_url: optional_var("REDIS_URL"),
            rate_limits: RateLimitPolicies {
                geolocation: parsed_var::<RateLimitPolicy>("RATE_LIMIT_GEOLOCATION", defaults.geolocation)?,
                api: parsed_var::<RateLimitPolicy>("RATE_LIMIT_API", defaults.api)?,
                public: parsed_var::<RateLimitPolicy>("RATE_LIMIT_PUBLIC", defaults.public)?,
            },
        })
    }
}
