//! Geolocation-driven redirect for the site root.
//!
//! A visitor landing on `/` is sent to the home page of the country their
//! address geolocates to, in the best language the provider reports for
//! them. Any failure, including a slow provider, sends them to the default
//! country instead. The decision is made server-side before the first
//! response, so `/` itself is never cached.

use crate::geolocation::{GeolocationClient, GeolocationRecord};
use crate::locale::LocaleDirectory;
use crate::resolver::localized_path;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a root redirect target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectSource {
    /// From the visitor's geolocation
    Geolocated,
    /// Geolocation unavailable; the default country was used
    Fallback,
}

/// Where to send a visitor of the site root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRedirect {
    pub location: String,
    pub source: RedirectSource,
}

/// Computes the redirect target for the site root.
#[derive(Debug, Clone)]
pub struct RootRedirector {
    geolocation: GeolocationClient,
    directory: &'static LocaleDirectory,
    default_country: String,
    timeout: Duration,
}

impl RootRedirector {
    pub fn new(
        geolocation: GeolocationClient,
        directory: &'static LocaleDirectory,
        default_country: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            geolocation,
            directory,
            default_country: default_country.into().to_ascii_lowercase(),
            timeout,
        }
    }

    pub fn geolocation(&self) -> &GeolocationClient {
        &self.geolocation
    }

    fn fallback(&self) -> RootRedirect {
        RootRedirect {
            location: format!("/{}", self.default_country),
            source: RedirectSource::Fallback,
        }
    }

    /// Decide where the root path redirects for a visitor at `client_ip`.
    ///
    /// Public addresses are looked up explicitly; anything else (missing,
    /// private, loopback) uses the provider's view of the caller, which is
    /// cached. Never fails.
    pub async fn target(&self, client_ip: Option<&str>) -> RootRedirect {
        let lookup_ip = client_ip.filter(|ip| is_public_ip(ip));

        let record = match tokio::time::timeout(
            self.timeout,
            self.geolocation.fetch_location(lookup_ip),
        )
        .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Failed to detect visitor location, using default country");
                return self.fallback();
            }
            Err(_) => {
                warn!(
                    "Geolocation did not answer within {:?}, using default country",
                    self.timeout
                );
                return self.fallback();
            }
        };

        match target_for_record(self.directory, &record) {
            Some(location) => {
                info!("Redirecting root visitor to {}", location);
                RootRedirect {
                    location,
                    source: RedirectSource::Geolocated,
                }
            }
            None => {
                debug!("Geolocation record has no usable country code");
                self.fallback()
            }
        }
    }

    /// Like [`target`](Self::target), but returns `None` when the visitor is
    /// already on the target path.
    pub async fn redirect_from(&self, current_path: &str, client_ip: Option<&str>) -> Option<RootRedirect> {
        let redirect = self.target(client_ip).await;
        if suppress_redundant(current_path, &redirect.location).is_none() {
            debug!("Already on {}, not redirecting", redirect.location);
            return None;
        }
        Some(redirect)
    }
}

/// Redirect target for a geolocation record: `/<country>` when the detected
/// language is the country's default, else `/<country>/<language>`.
///
/// Returns `None` when the record carries no well-formed country code.
pub fn target_for_record(directory: &LocaleDirectory, record: &GeolocationRecord) -> Option<String> {
    let provider_code = record
        .country_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())?;

    let country = directory.country_from_provider(provider_code);
    if !LocaleDirectory::is_valid_country_code(&country.code) {
        return None;
    }

    let language = LocaleDirectory::detect_best_language(&country, record.languages.as_deref().unwrap_or(""));
    Some(localized_path(&country, language, ""))
}

/// `Some(target)` unless it equals the current path.
pub fn suppress_redundant<'a>(current_path: &str, target: &'a str) -> Option<&'a str> {
    let current = current_path.trim_end_matches('/');
    let normalized_target = target.trim_end_matches('/');
    if current == normalized_target && !current.is_empty() {
        None
    } else {
        Some(target)
    }
}

/// Whether `ip` is a globally routable address worth geolocating.
pub fn is_public_ip(ip: &str) -> bool {
    match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        Ok(IpAddr::V6(v6)) => {
            let first = v6.segments()[0];
            let unique_local = (first & 0xfe00) == 0xfc00;
            let link_local = (first & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
        Err(_) => false,
    }
}
