//! Client identification for rate limiting.

use axum::http::HeaderMap;
use std::net::IpAddr;

/// Identifier shared by every client that cannot be identified.
pub const UNKNOWN_CLIENT: &str = "unknown";

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Derive the client identifier for a request.
///
/// Preference order: leftmost `X-Forwarded-For` entry, `X-Real-IP`, the
/// socket peer address, then [`UNKNOWN_CLIENT`].
pub fn client_identifier(headers: &HeaderMap, remote_addr: Option<IpAddr>) -> String {
    let forwarded = header_value(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    forwarded
        .or_else(|| header_value(headers, "x-real-ip"))
        .map(str::to_string)
        .or_else(|| remote_addr.map(|ip| ip.to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
