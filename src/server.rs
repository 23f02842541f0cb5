//! HTTP surface: the router, its handlers and the shared application state.
//!
//! Every request passes the rate limiter first. `/` is answered by the root
//! redirect flow, `/api/geolocation` proxies the provider, and every other
//! path goes through the locale resolver.

use crate::config::Config;
use crate::geolocation::GeolocationClient;
use crate::locale::LocaleDirectory;
use crate::rate_limit::{client_identifier, rate_limit, RateLimiter};
use crate::redirect::{is_public_ip, RootRedirector};
use crate::resolver::{KnownPages, LocaleResolution, LocaleResolver, Resolution};
use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    middleware::from_fn_with_state,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::debug;

const PAGE_CACHE_CONTROL: &str = "public, max-age=300, stale-while-revalidate=600";
const ROOT_CACHE_CONTROL: &str = "private, no-store";

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("permissions-policy", "camera=(), microphone=(), geolocation=()"),
];

/// Components shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub resolver: Arc<LocaleResolver<'static>>,
    pub redirector: RootRedirector,
    pub limiter: Arc<RateLimiter>,
    /// Absolute site origin without trailing slash, used for canonical links
    pub site_url: Arc<str>,
}

impl AppState {
    pub fn new(config: &Config, limiter: RateLimiter) -> Result<Self> {
        let directory = LocaleDirectory::builtin();
        let geolocation = GeolocationClient::new(config.geolocation.clone())
            .context("Failed to build geolocation HTTP client")?;

        Ok(Self {
            resolver: Arc::new(LocaleResolver::new(
                directory,
                config.default_country.as_str(),
                KnownPages::default(),
            )),
            redirector: RootRedirector::new(
                geolocation,
                directory,
                config.default_country.as_str(),
                config.geolocation.timeout,
            ),
            limiter: Arc::new(limiter),
            site_url: Arc::from(config.site_url.trim_end_matches('/')),
        })
    }
}

/// Build the application router with all middleware attached.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/geolocation", get(geolocation_proxy))
        .fallback(page)
        .layer(from_fn_with_state(state.limiter.clone(), rate_limit));

    for &(name, value) in SECURITY_HEADERS {
        router = router.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Address the request came from, as far as the forwarding headers tell.
fn visitor_ip(headers: &HeaderMap, connect_info: Option<ConnectInfo<SocketAddr>>) -> String {
    client_identifier(headers, connect_info.map(|ConnectInfo(addr)| addr.ip()))
}

async fn health() -> &'static str {
    "OK"
}

async fn root(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let client_ip = visitor_ip(&headers, connect_info);
    let Some(redirect) = state.redirector.redirect_from(uri.path(), Some(&client_ip)).await else {
        return page(State(state), uri).await;
    };
    debug!("Root visitor {} -> {} ({:?})", client_ip, redirect.location, redirect.source);

    (
        StatusCode::FOUND,
        [
            (header::LOCATION, redirect.location),
            (header::CACHE_CONTROL, ROOT_CACHE_CONTROL.to_string()),
        ],
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct GeolocationQuery {
    ip: Option<String>,
}

async fn geolocation_proxy(
    State(state): State<AppState>,
    Query(query): Query<GeolocationQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let requested = match query.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty()) {
        Some(raw) => match raw.parse::<IpAddr>() {
            Ok(ip) => Some(ip.to_string()),
            Err(_) => {
                debug!("Rejecting geolocation proxy request for {:?}", raw);
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": true, "reason": "Invalid IP address" })),
                )
                    .into_response();
            }
        },
        None => None,
    };
    let visitor = visitor_ip(&headers, connect_info);
    let ip = requested.or_else(|| is_public_ip(&visitor).then_some(visitor));

    let geolocation = state.redirector.geolocation();
    match geolocation.fetch_location(ip.as_deref()).await {
        Some(record) => Json(record.as_ref().clone()).into_response(),
        None => {
            let reason = geolocation
                .last_error()
                .unwrap_or_else(|| "Geolocation lookup failed".to_string());
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CACHE_CONTROL, "no-store")],
                Json(serde_json::json!({ "error": true, "reason": reason })),
            )
                .into_response()
        }
    }
}

async fn page(State(state): State<AppState>, uri: Uri) -> Response {
    match state.resolver.resolve(uri.path()) {
        Resolution::Allow(resolution) => render_page(&state, uri.path(), &resolution),
        Resolution::Redirect(target) => {
            let location = match uri.query() {
                Some(query) => format!("{}?{}", target, query),
                None => target,
            };
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
        }
        Resolution::NotFound => (
            StatusCode::NOT_FOUND,
            Html(format!(
                "<!DOCTYPE html>\n<html lang=\"en-US\" dir=\"ltr\">\n<head><meta charset=\"utf-8\"><title>Page not found</title></head>\n<body><h1>Page not found</h1><p><a href=\"{}\">Go to the home page</a></p></body>\n</html>\n",
                state.resolver.default_home()
            )),
        )
            .into_response(),
    }
}

fn render_page(state: &AppState, current_path: &str, resolution: &LocaleResolution) -> Response {
    let country = &resolution.country;
    let language = &resolution.language;
    let canonical = format!("{}{}", state.site_url, resolution.canonical_path());

    let switcher: String = country
        .languages
        .iter()
        .map(|lang| {
            format!(
                "<a href=\"{}\" hreflang=\"{}\">{}</a>",
                state.resolver.switch_language_path(current_path, country, lang),
                lang.code,
                lang.native_name
            )
        })
        .collect::<Vec<_>>()
        .join(" | ");

    let title = match resolution.page_path.as_str() {
        "" => "Home",
        page => page.rsplit('/').next().unwrap_or(page),
    };

    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\" dir=\"{dir}\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title} | {flag} {country}</title>\n</head>\n<body data-country=\"{code}\" data-language=\"{language}\" data-page=\"{page}\">\n<nav>{switcher}</nav>\n<main id=\"app\"></main>\n</body>\n</html>\n",
        lang = language.html_tag,
        dir = language.direction,
        title = title,
        flag = country.flag,
        country = country.name,
        code = country.code,
        language = language.code,
        page = resolution.page_path,
        switcher = switcher,
    );

    (
        [
            (header::CONTENT_LANGUAGE, language.html_tag.to_string()),
            (header::LINK, format!("<{}>; rel=\"canonical\"", canonical)),
            (header::CACHE_CONTROL, PAGE_CACHE_CONTROL.to_string()),
        ],
        Html(html),
    )
        .into_response()
}
