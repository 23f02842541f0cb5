use super::identifier::client_identifier;
use super::policy::RouteClass;
use super::store::RateLimitDecision;
use super::RateLimiter;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at));
}

/// 429 response for a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitExceeded(pub RateLimitDecision);

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let decision = self.0;

        let mut headers = HeaderMap::new();
        apply_headers(&mut headers, &decision);
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(decision.retry_after));

        let body = serde_json::json!({
            "statusCode": 429,
            "statusMessage": "Too Many Requests",
            "message": format!(
                "Rate limit exceeded. Maximum {} requests per {} seconds. Please try again later.",
                decision.limit, decision.window_secs
            ),
            "limit": decision.limit,
            "remaining": decision.remaining,
            "resetAt": decision.reset_at,
            "retryAfter": decision.retry_after,
        });

        (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
    }
}

/// axum middleware: count the request, reject it with 429 once the client's
/// budget for the route class is spent, and stamp `X-RateLimit-*` headers on
/// admitted responses.
///
/// If the store fails the request is admitted without headers.
pub async fn rate_limit(State(limiter): State<Arc<RateLimiter>>, request: Request, next: Next) -> Response {
    let Some(class) = RouteClass::classify(request.uri().path()) else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let identifier = client_identifier(request.headers(), peer);

    match limiter.admit(&identifier, class).await {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(request).await;
            apply_headers(response.headers_mut(), &decision);
            response
        }
        Ok(decision) => {
            warn!(
                "Rate limit exceeded for {} on {} routes ({} per {}s)",
                identifier, class, decision.limit, decision.window_secs
            );
            RateLimitExceeded(decision).into_response()
        }
        Err(e) => {
            warn!("Rate limit check failed, admitting request: {}", e);
            next.run(request).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{RateLimitPolicies, RateLimitPolicy};
    use axum::{body::Body, http, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    fn app(public: RateLimitPolicy) -> Router {
        let limiter = Arc::new(RateLimiter::in_memory(RateLimitPolicies {
            public,
            ..RateLimitPolicies::default()
        }));
        Router::new()
            .route("/page", get(|| async { "ok" }))
            .route("/health", get(|| async { "OK" }))
            .layer(from_fn_with_state(limiter, rate_limit))
    }

    fn get_from(path: &str, client: &str) -> Request {
        http::Request::builder()
            .uri(path)
            .header("x-forwarded-for", client)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_admitted_response_has_headers() {
        let app = app(RateLimitPolicy::new(5, 60));
        let response = app.oneshot(get_from("/page", "203.0.113.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
        assert!(response.headers().contains_key("x-ratelimit-reset"));
        assert!(!response.headers().contains_key("retry-after"));
    }

    #[tokio::test]
    async fn test_rejection_is_429_with_json_body() {
        let app = app(RateLimitPolicy::new(1, 60));
        let first = app.clone().oneshot(get_from("/page", "203.0.113.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(get_from("/page", "203.0.113.1")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()["x-ratelimit-remaining"], "0");
        assert!(second.headers().contains_key("retry-after"));

        let bytes = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["statusCode"], 429);
        assert_eq!(body["statusMessage"], "Too Many Requests");
        assert_eq!(body["limit"], 1);
    }

    #[tokio::test]
    async fn test_exempt_paths_are_not_counted() {
        let app = app(RateLimitPolicy::new(1, 60));
        for _ in 0..3 {
            let response = app.clone().oneshot(get_from("/health", "203.0.113.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key("x-ratelimit-limit"));
        }
    }

    #[tokio::test]
    async fn test_unidentified_clients_share_a_budget() {
        let app = app(RateLimitPolicy::new(1, 60));
        let request = || http::Request::builder().uri("/page").body(Body::empty()).unwrap();

        assert_eq!(app.clone().oneshot(request()).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            app.oneshot(request()).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
