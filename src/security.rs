use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header::HeaderName},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;

use crate::AppState;
use crate::error::AppError;
use crate::ratelimit::RateLimitStatus;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Byte-wise comparison that does not exit early, so a mismatched key takes
/// the same time regardless of where it diverges.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Audit identifier for the caller: API key suffix when present, proxy
/// address otherwise. The full key never reaches the logs.
pub fn client_identifier(headers: &HeaderMap) -> String {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        let suffix: String = key
            .chars()
            .rev()
            .take(8)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return format!("api-key-{suffix}");
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|addr| format!("ip-{}", addr.trim()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_rate_limit_headers(response: &mut Response, status: RateLimitStatus) {
    let headers = response.headers_mut();
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };
    set("x-ratelimit-limit", status.limit.to_string());
    set("x-ratelimit-remaining", status.remaining.to_string());
    set("x-ratelimit-reset", status.reset.to_string());
}

/// Request gate for every classification endpoint, in fixed order: API key
/// first, then the rate limiter. A rejected key never consumes quota.
pub async fn gate(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let client_id = client_identifier(request.headers());

    let Some(presented) = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        tracing::warn!(client = %client_id, "request without API key");
        counter!("auth_failures_total").increment(1);
        return AppError::MissingApiKey.into_response();
    };

    if !constant_time_eq(presented, &state.config.api_key) {
        tracing::warn!(client = %client_id, "invalid API key");
        counter!("auth_failures_total").increment(1);
        return AppError::InvalidApiKey.into_response();
    }

    if !state.limiter.check(&client_id) {
        tracing::warn!(client = %client_id, "rate limit exceeded");
        counter!("rate_limited_total").increment(1);
        let mut response =
            AppError::RateLimitExceeded(state.config.rate_limit_per_minute).into_response();
        apply_rate_limit_headers(&mut response, state.limiter.status(&client_id));
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(&mut response, state.limiter.status(&client_id));
    response
}
