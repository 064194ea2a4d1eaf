//! Authorization subsystem.
//!
//! # Data Flow
//! ```text
//! Attributes (user + verb + resource or path)
//!     → UnionAuthorizer (configured modes, in order)
//!         ├── AlwaysAllow / AlwaysDeny
//!         └── WebhookAuthorizer
//!               → SAR cache (allow / deny TTLs, key size ceiling)
//!               → SubjectAccessReview POST (retry)
//!     → Verdict { decision, reason, error }
//! ```
//!
//! # Design Decisions
//! - Authorizers never fail the call; errors ride along in the verdict
//!   next to a decision (NoOpinion for transport failures)
//! - First Allow or Deny wins; NoOpinion means "ask the next one"

pub mod always;
pub mod union;
pub mod webhook;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::authn::UserInfo;
use crate::config::schema::{AuthorizationConfig, AuthorizationMode};
use crate::resilience::Backoff;
use crate::webhook::{GenericWebhook, WebhookError};

pub use always::{AlwaysAllowAuthorizer, AlwaysDenyAuthorizer};
pub use union::UnionAuthorizer;
pub use webhook::WebhookAuthorizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    NoOpinion,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "forbid",
            Decision::NoOpinion => "no-opinion",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is being asked for and by whom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub user: UserInfo,
    pub verb: String,
    pub namespace: String,
    pub api_group: String,
    pub api_version: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
    /// `false` for non-resource URLs such as `/healthz`.
    pub resource_request: bool,
    pub path: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("webhook authorization failed: {0}")]
    Webhook(String),

    #[error("webhook subject access review returned both allow and deny")]
    AmbiguousDecision,

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Aggregate(Vec<AuthzError>),
}

/// The outcome of one authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub reason: String,
    pub error: Option<AuthzError>,
}

impl Verdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Allow,
            reason: reason.into(),
            error: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: reason.into(),
            error: None,
        }
    }

    pub fn no_opinion() -> Self {
        Self {
            decision: Decision::NoOpinion,
            reason: String::new(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: AuthzError) -> Self {
        self.error = Some(error);
        self
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, attrs: &Attributes) -> Verdict;

    fn name(&self) -> &str;
}

/// Compose the configured modes into one authorizer.
pub fn from_config(config: &AuthorizationConfig) -> Result<Arc<dyn Authorizer>, WebhookError> {
    let mut authorizers: Vec<Arc<dyn Authorizer>> = Vec::with_capacity(config.modes.len());
    for mode in &config.modes {
        let authorizer: Arc<dyn Authorizer> = match mode {
            AuthorizationMode::AlwaysAllow => Arc::new(AlwaysAllowAuthorizer),
            AuthorizationMode::AlwaysDeny => Arc::new(AlwaysDenyAuthorizer),
            AuthorizationMode::Webhook => {
                let settings = config.webhook.clone().unwrap_or_default();
                let backoff = Backoff::with_initial(Duration::from_millis(settings.initial_backoff_ms));
                let client =
                    GenericWebhook::from_descriptor_file(&settings.config_file, backoff, "authz")?;
                Arc::new(WebhookAuthorizer::new(
                    Arc::new(client),
                    Duration::from_secs(settings.authorized_ttl_secs),
                    Duration::from_secs(settings.unauthorized_ttl_secs),
                ))
            }
        };
        authorizers.push(authorizer);
    }
    tracing::info!(modes = ?config.modes, "Authorization chain built");
    Ok(Arc::new(UnionAuthorizer::new(authorizers)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn modes_compose_in_order() {
        let config = AuthorizationConfig {
            modes: vec![AuthorizationMode::AlwaysDeny, AuthorizationMode::AlwaysAllow],
            webhook: None,
        };
        let authorizer = from_config(&config).unwrap();
        assert_eq!(authorizer.authorize(&Attributes::default()).await.decision, Decision::Deny);
    }

    #[test]
    fn missing_descriptor_is_fatal() {
        let config = AuthorizationConfig {
            modes: vec![AuthorizationMode::Webhook],
            webhook: Some(crate::config::schema::AuthzWebhookConfig {
                config_file: "/no/such/descriptor.yaml".into(),
                ..Default::default()
            }),
        };
        assert!(from_config(&config).is_err());
    }
}
