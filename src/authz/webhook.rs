//! SubjectAccessReview webhook authorizer with a response cache.

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{Attributes, Authorizer, AuthzError, Decision, Verdict};
use crate::observability::metrics;
use crate::webhook::{GenericWebhook, WebhookError};

pub const SAR_API_VERSION: &str = "authorization.k8s.io/v1";
pub const SAR_KIND: &str = "SubjectAccessReview";

pub const DEFAULT_CACHE_CAPACITY: u64 = 8192;
/// Ceiling on the summed length of caller-controlled attribute strings.
pub const MAX_CONTROLLED_ATTR_CACHE_SIZE: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAccessReview {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub spec: SubjectAccessReviewSpec,
    #[serde(default)]
    pub status: SubjectAccessReviewStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAccessReviewSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_attributes: Option<ResourceAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_resource_attributes: Option<NonResourceAttributes>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub verb: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subresource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NonResourceAttributes {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub verb: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAccessReviewStatus {
    #[serde(default)]
    pub allowed: bool,
    #[serde(default)]
    pub denied: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub evaluation_error: String,
}

impl SubjectAccessReviewSpec {
    pub fn from_attributes(attrs: &Attributes) -> Self {
        let mut spec = Self {
            user: attrs.user.name.clone(),
            uid: attrs.user.uid.clone(),
            groups: attrs.user.groups.clone(),
            extra: attrs.user.extra.clone(),
            ..Self::default()
        };
        if attrs.resource_request {
            spec.resource_attributes = Some(ResourceAttributes {
                namespace: attrs.namespace.clone(),
                verb: attrs.verb.clone(),
                group: attrs.api_group.clone(),
                version: attrs.api_version.clone(),
                resource: attrs.resource.clone(),
                subresource: attrs.subresource.clone(),
                name: attrs.name.clone(),
            });
        } else {
            spec.non_resource_attributes = Some(NonResourceAttributes {
                path: attrs.path.clone(),
                verb: attrs.verb.clone(),
            });
        }
        spec
    }
}

/// Whether a response for `attrs` may be cached.
pub fn should_cache(attrs: &Attributes) -> bool {
    let controlled = attrs.namespace.len()
        + attrs.verb.len()
        + attrs.api_group.len()
        + attrs.api_version.len()
        + attrs.resource.len()
        + attrs.subresource.len()
        + attrs.name.len()
        + attrs.path.len();
    controlled < MAX_CONTROLLED_ATTR_CACHE_SIZE
}

#[async_trait]
pub trait SubjectAccessReviewer: Send + Sync {
    async fn review(
        &self,
        review: &SubjectAccessReview,
    ) -> Result<SubjectAccessReviewStatus, WebhookError>;
}

#[async_trait]
impl SubjectAccessReviewer for GenericWebhook {
    async fn review(
        &self,
        review: &SubjectAccessReview,
    ) -> Result<SubjectAccessReviewStatus, WebhookError> {
        let reply: SubjectAccessReview = self.post(review).await?;
        Ok(reply.status)
    }
}

#[derive(Debug, Clone)]
struct CachedStatus {
    status: SubjectAccessReviewStatus,
    expires_at: Instant,
}

pub struct WebhookAuthorizer {
    reviewer: Arc<dyn SubjectAccessReviewer>,
    cache: Cache<String, CachedStatus>,
    authorized_ttl: Duration,
    unauthorized_ttl: Duration,
}

impl WebhookAuthorizer {
    pub fn new(
        reviewer: Arc<dyn SubjectAccessReviewer>,
        authorized_ttl: Duration,
        unauthorized_ttl: Duration,
    ) -> Self {
        Self {
            reviewer,
            cache: Cache::builder().max_capacity(DEFAULT_CACHE_CAPACITY).build(),
            authorized_ttl,
            unauthorized_ttl,
        }
    }

    async fn cached(&self, key: &str) -> Option<SubjectAccessReviewStatus> {
        let entry = self.cache.get(key).await?;
        if entry.expires_at > Instant::now() {
            return Some(entry.status);
        }
        self.cache.invalidate(key).await;
        None
    }

    async fn store(&self, key: String, status: &SubjectAccessReviewStatus) {
        // A reply that both allows and denies is a protocol violation.
        if status.allowed && status.denied {
            return;
        }
        let ttl = if status.allowed {
            self.authorized_ttl
        } else {
            self.unauthorized_ttl
        };
        if ttl.is_zero() {
            return;
        }
        let entry = CachedStatus {
            status: status.clone(),
            expires_at: Instant::now() + ttl,
        };
        self.cache.insert(key, entry).await;
    }
}

#[async_trait]
impl Authorizer for WebhookAuthorizer {
    async fn authorize(&self, attrs: &Attributes) -> Verdict {
        let spec = SubjectAccessReviewSpec::from_attributes(attrs);
        let cacheable = should_cache(attrs);
        let key = match serde_json::to_string(&spec) {
            Ok(key) => key,
            Err(e) => {
                return Verdict::no_opinion().with_error(AuthzError::Webhook(e.to_string()));
            }
        };

        let cached = if cacheable { self.cached(&key).await } else { None };
        let status = match cached {
            Some(status) => {
                metrics::record_authz_cache("hit");
                status
            }
            None => {
                metrics::record_authz_cache(if cacheable { "miss" } else { "bypass" });
                let review = SubjectAccessReview {
                    api_version: SAR_API_VERSION.to_string(),
                    kind: SAR_KIND.to_string(),
                    spec,
                    status: SubjectAccessReviewStatus::default(),
                };
                let status = match self.reviewer.review(&review).await {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to make webhook authorizer request");
                        return Verdict::no_opinion().with_error(AuthzError::Webhook(e.to_string()));
                    }
                };
                if cacheable {
                    self.store(key, &status).await;
                }
                status
            }
        };

        verdict_from_status(status)
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

fn verdict_from_status(status: SubjectAccessReviewStatus) -> Verdict {
    let mut verdict = match (status.allowed, status.denied) {
        (true, true) => {
            let reason = if status.reason.is_empty() {
                "webhook returned both allow and deny".to_string()
            } else {
                status.reason
            };
            return Verdict::deny(reason).with_error(AuthzError::AmbiguousDecision);
        }
        (_, true) => Verdict::deny(status.reason),
        (true, _) => Verdict::allow(status.reason),
        _ => Verdict {
            decision: Decision::NoOpinion,
            reason: status.reason,
            error: None,
        },
    };
    if !status.evaluation_error.is_empty() {
        verdict.error = Some(AuthzError::Evaluation(status.evaluation_error));
    }
    verdict
}
