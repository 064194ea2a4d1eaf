//! Status error bodies written by the filters.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// A failure body in the `v1` `Status` shape clients already parse.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub kind: &'static str,
    pub api_version: &'static str,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub status: &'static str,
    pub message: String,
    pub reason: &'static str,
    pub code: u16,
}

pub fn status(code: StatusCode, reason: &'static str, message: impl Into<String>) -> Response {
    let body = Status {
        kind: "Status",
        api_version: "v1",
        metadata: serde_json::Map::new(),
        status: "Failure",
        message: message.into(),
        reason,
        code: code.as_u16(),
    };
    (code, Json(body)).into_response()
}

pub fn unauthorized(challenge: bool) -> Response {
    let mut resp = status(StatusCode::UNAUTHORIZED, "Unauthorized", "Unauthorized");
    if challenge {
        resp.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(r#"Basic realm="admission-gate""#),
        );
    }
    resp
}

pub fn forbidden(message: impl Into<String>) -> Response {
    status(StatusCode::FORBIDDEN, "Forbidden", message)
}

pub fn internal_error(message: impl Into<String>) -> Response {
    status(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", message)
}

pub fn bad_request(message: impl Into<String>) -> Response {
    status(StatusCode::BAD_REQUEST, "BadRequest", message)
}

/// Refused because the server is draining: try again shortly.
pub fn shutting_down() -> Response {
    let mut resp = status(
        StatusCode::SERVICE_UNAVAILABLE,
        "ServiceUnavailable",
        "apiserver is shutting down",
    );
    resp.headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    resp
}

/// Retry-after mode: tell the client to go elsewhere and close the connection.
pub fn retry_after() -> Response {
    let mut resp = status(
        StatusCode::TOO_MANY_REQUESTS,
        "TooManyRequests",
        "The apiserver is shutting down, please try again later.",
    );
    let headers = resp.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    resp
}
