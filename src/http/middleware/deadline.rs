//! Deadline for non-long-running requests, optionally shortened by `?timeout=`.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;

use crate::http::request_info::RequestInfo;
use crate::http::response;
use crate::http::server::ChainState;

pub async fn request_deadline(
    State(state): State<Arc<ChainState>>,
    req: Request,
    next: Next,
) -> Response {
    let long_running = req
        .extensions()
        .get::<RequestInfo>()
        .map(|info| state.resolver.is_long_running(info))
        .unwrap_or(false);
    if long_running {
        return next.run(req).await;
    }

    let requested = match requested_timeout(req.uri().query()) {
        Ok(requested) => requested,
        Err(e) => {
            tracing::debug!(uri = %req.uri(), error = %e, "Bad timeout parameter");
            return response::bad_request(e);
        }
    };
    let timeout = match requested {
        Some(t) if !t.is_zero() && t < state.request_timeout => t,
        _ => state.request_timeout,
    };

    let uri = req.uri().clone();
    match tokio::time::timeout(timeout, next.run(req)).await {
        Ok(resp) => resp,
        Err(_) => {
            tracing::warn!(%uri, timeout = ?timeout, "Request timed out");
            response::status(
                StatusCode::GATEWAY_TIMEOUT,
                "Timeout",
                "request did not complete within the allowed duration",
            )
        }
    }
}

fn requested_timeout(query: Option<&str>) -> Result<Option<Duration>, String> {
    let Some(query) = query else {
        return Ok(None);
    };
    let value = url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "timeout")
        .map(|(_, v)| v.into_owned());
    match value {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => parse_duration(&v)
            .map(Some)
            .ok_or_else(|| format!("invalid timeout specified in the request URL: {v:?}")),
    }
}

/// Parse durations such as `30s`, `1m30s`, `250ms` or `1h`.
fn parse_duration(s: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "ns" => value / 1e9,
            "us" | "µs" => value / 1e6,
            "ms" => value / 1e3,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return None,
        };
        total += Duration::try_from_secs_f64(seconds).ok()?;
        rest = &rest[unit_len..];
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_go_style_durations() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("1.5h"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("5x"), None);
    }

    #[test]
    fn timeout_query_parameter() {
        assert_eq!(requested_timeout(None), Ok(None));
        assert_eq!(requested_timeout(Some("watch=1")), Ok(None));
        assert_eq!(
            requested_timeout(Some("limit=5&timeout=5s")),
            Ok(Some(Duration::from_secs(5)))
        );
        assert!(requested_timeout(Some("timeout=soon")).is_err());
    }
}
