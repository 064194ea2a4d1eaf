//! Webhook error classification.

use std::time::Duration;
use thiserror::Error;

use crate::resilience::RetryHint;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum WebhookError {
    #[error("invalid webhook descriptor: {0}")]
    Descriptor(String),

    #[error("failed to build webhook client: {0}")]
    Client(String),

    #[error("connection reset by webhook: {0}")]
    ConnectionReset(String),

    #[error("webhook request timed out")]
    Timeout,

    #[error("webhook returned HTTP {status}: {message}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("webhook transport error: {0}")]
    Transport(String),

    #[error("failed to decode webhook response: {0}")]
    Decode(String),
}

impl RetryHint for WebhookError {
    /// Delay the server asked for through `Retry-After`, if any.
    fn retry_after(&self) -> Option<Duration> {
        match self {
            WebhookError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl WebhookError {

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return WebhookError::Timeout;
        }
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::BrokenPipe
                ) {
                    return WebhookError::ConnectionReset(err.to_string());
                }
            }
            source = cause.source();
        }
        WebhookError::Transport(err.to_string())
    }
}

/// Retry on connection resets, timeouts, 5xx, 429, or any explicit retry hint.
pub fn default_should_retry(err: &WebhookError) -> bool {
    match err {
        WebhookError::ConnectionReset(_) | WebhookError::Timeout => true,
        WebhookError::Status {
            status,
            retry_after,
            ..
        } => *status >= 500 || *status == 429 || retry_after.is_some(),
        _ => false,
    }
}

/// Retry on every error. Used by the audit webhook.
pub fn retry_on_any_error(_: &WebhookError) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, retry_after: Option<Duration>) -> WebhookError {
        WebhookError::Status {
            status: code,
            retry_after,
            message: String::new(),
        }
    }

    #[test]
    fn default_predicate() {
        assert!(default_should_retry(&WebhookError::ConnectionReset("reset".into())));
        assert!(default_should_retry(&WebhookError::Timeout));
        assert!(default_should_retry(&status(500, None)));
        assert!(default_should_retry(&status(503, None)));
        assert!(default_should_retry(&status(429, None)));
        assert!(default_should_retry(&status(409, Some(Duration::from_secs(1)))));

        assert!(!default_should_retry(&status(400, None)));
        assert!(!default_should_retry(&status(403, None)));
        assert!(!default_should_retry(&WebhookError::Decode("eof".into())));
        assert!(!default_should_retry(&WebhookError::Transport("refused".into())));
    }
}
