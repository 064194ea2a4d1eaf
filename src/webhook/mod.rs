//! Generic webhook client.
//!
//! # Data Flow
//! ```text
//! descriptor file (clusters / users / contexts)
//!     → descriptor.rs (resolve current context → server URL + TLS + token)
//!     → GenericWebhook (reqwest client, fixed request timeout)
//!     → post(): JSON body → retry loop (resilience::retries) → decoded reply
//! ```
//!
//! # Design Decisions
//! - One client type serves token review, access review and audit delivery
//! - Errors are classified once (error.rs) so retry predicates stay simple
//! - The retry predicate is swappable per webhook kind

pub mod descriptor;
pub mod error;

use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::observability::metrics;
use crate::resilience::{with_exponential_backoff, Backoff};

pub use descriptor::{Descriptor, ResolvedTarget};
pub use error::{default_should_retry, retry_on_any_error, WebhookError};

/// Per-attempt request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept in [`WebhookError::Status`].
const MAX_ERROR_BODY: usize = 512;

pub type ShouldRetry = Arc<dyn Fn(&WebhookError) -> bool + Send + Sync>;

/// A retrying JSON-over-HTTP client for one remote endpoint.
#[derive(Clone)]
pub struct GenericWebhook {
    client: reqwest::Client,
    url: Url,
    token: Option<String>,
    backoff: Backoff,
    should_retry: ShouldRetry,
    kind: &'static str,
}

impl GenericWebhook {
    /// Build a client from a descriptor file on disk.
    pub fn from_descriptor_file(
        path: &Path,
        backoff: Backoff,
        kind: &'static str,
    ) -> Result<Self, WebhookError> {
        let descriptor = Descriptor::load(path)?;
        Self::from_target(descriptor.resolve()?, backoff, kind)
    }

    /// Build a client from a resolved descriptor.
    pub fn from_target(
        target: ResolvedTarget,
        backoff: Backoff,
        kind: &'static str,
    ) -> Result<Self, WebhookError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(target.insecure_skip_tls_verify);

        if let Some(ca) = &target.ca_pem {
            let cert = reqwest::Certificate::from_pem(ca)
                .map_err(|e| WebhookError::Client(format!("certificate authority: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = &target.identity_pem {
            let identity = reqwest::Identity::from_pem(identity)
                .map_err(|e| WebhookError::Client(format!("client certificate: {e}")))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| WebhookError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: target.server,
            token: target.token,
            backoff,
            should_retry: Arc::new(default_should_retry),
            kind,
        })
    }

    /// Plain client for an endpoint without TLS material.
    pub fn new(url: Url, backoff: Backoff, kind: &'static str) -> Result<Self, WebhookError> {
        Self::from_target(
            ResolvedTarget {
                server: url,
                ca_pem: None,
                insecure_skip_tls_verify: false,
                identity_pem: None,
                token: None,
            },
            backoff,
            kind,
        )
    }

    /// Replace the retry predicate.
    pub fn with_should_retry<F>(mut self, should_retry: F) -> Self
    where
        F: Fn(&WebhookError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(should_retry);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// POST `body` and decode the JSON reply, retrying per the backoff policy.
    pub async fn post<Req, Resp>(&self, body: &Req) -> Result<Resp, WebhookError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let bytes = self.post_with_retry(body).await?;
        serde_json::from_slice(&bytes).map_err(|e| WebhookError::Decode(e.to_string()))
    }

    /// POST `body`, ignoring any reply body.
    pub async fn post_ack<Req>(&self, body: &Req) -> Result<(), WebhookError>
    where
        Req: Serialize + Sync,
    {
        self.post_with_retry(body).await.map(|_| ())
    }

    async fn post_with_retry<Req>(&self, body: &Req) -> Result<Vec<u8>, WebhookError>
    where
        Req: Serialize + Sync,
    {
        let start = Instant::now();
        let should_retry = Arc::clone(&self.should_retry);
        let result = with_exponential_backoff(
            &self.backoff,
            move |e: &WebhookError| should_retry(e),
            || self.post_once(body),
        )
        .await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        metrics::record_webhook_request(self.kind, outcome, start);
        if let Err(e) = &result {
            tracing::warn!(kind = self.kind, url = %self.url, error = %e, "Webhook call failed");
        }
        result
    }

    async fn post_once<Req>(&self, body: &Req) -> Result<Vec<u8>, WebhookError>
    where
        Req: Serialize + Sync,
    {
        let mut request = self.client.post(self.url.clone()).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(WebhookError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(WebhookError::Status {
                status: status.as_u16(),
                retry_after,
                message,
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(WebhookError::from_reqwest)
    }
}

impl std::fmt::Debug for GenericWebhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericWebhook")
            .field("kind", &self.kind)
            .field("url", &self.url.as_str())
            .field("backoff", &self.backoff)
            .finish()
    }
}
