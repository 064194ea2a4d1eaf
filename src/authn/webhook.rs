//! Token review against a remote webhook.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{priority, Audiences, AuthResult, AuthnError, Response, TokenAuthenticator, UserInfo};
use crate::webhook::{GenericWebhook, WebhookError};

pub const TOKEN_REVIEW_API_VERSION: &str = "authentication.k8s.io/v1";
pub const TOKEN_REVIEW_KIND: &str = "TokenReview";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenReview {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub spec: TokenReviewSpec,
    #[serde(default)]
    pub status: TokenReviewStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenReviewSpec {
    pub token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenReviewStatus {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub user: UserInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl TokenReview {
    pub fn new(token: &str, audiences: Option<&Audiences>) -> Self {
        Self {
            api_version: TOKEN_REVIEW_API_VERSION.to_string(),
            kind: TOKEN_REVIEW_KIND.to_string(),
            spec: TokenReviewSpec {
                token: token.to_string(),
                audiences: audiences.map(|a| a.as_slice().to_vec()).unwrap_or_default(),
            },
            status: TokenReviewStatus::default(),
        }
    }
}

/// Sends a review and returns the remote status.
#[async_trait]
pub trait TokenReviewer: Send + Sync {
    async fn review(&self, review: &TokenReview) -> Result<TokenReviewStatus, WebhookError>;
}

#[async_trait]
impl TokenReviewer for GenericWebhook {
    async fn review(&self, review: &TokenReview) -> Result<TokenReviewStatus, WebhookError> {
        let reply: TokenReview = self.post(review).await?;
        Ok(reply.status)
    }
}

pub struct WebhookTokenAuthenticator {
    reviewer: Arc<dyn TokenReviewer>,
    /// Audiences assumed for tokens when the remote does not report any.
    implicit_audiences: Audiences,
}

impl WebhookTokenAuthenticator {
    pub fn new(reviewer: Arc<dyn TokenReviewer>, implicit_audiences: Audiences) -> Self {
        Self {
            reviewer,
            implicit_audiences,
        }
    }
}

#[async_trait]
impl TokenAuthenticator for WebhookTokenAuthenticator {
    async fn authenticate_token(&self, token: &str, audiences: Option<&Audiences>) -> AuthResult {
        let wanted = audiences.filter(|a| !a.is_empty());
        let review = TokenReview::new(token, wanted);

        let status = self.reviewer.review(&review).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to make webhook authenticator request");
            AuthnError::Webhook(e.to_string())
        })?;

        let mut granted = Audiences::default();
        if let Some(wanted) = wanted {
            let reported = if status.audiences.is_empty() {
                self.implicit_audiences.clone()
            } else {
                Audiences::new(status.audiences.iter().cloned())
            };
            granted = wanted.intersect(&reported);
            if granted.is_empty() {
                tracing::debug!("Token review audiences do not intersect the requested ones");
                return Ok(None);
            }
        }

        if !status.authenticated {
            if !status.error.is_empty() {
                return Err(AuthnError::Rejected(status.error));
            }
            return Ok(None);
        }

        Ok(Some(Response {
            user: status.user,
            audiences: granted,
        }))
    }

    fn name(&self) -> &str {
        "webhook token authenticator"
    }

    fn priority(&self) -> i32 {
        priority::TOKEN_WEBHOOK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedReviewer {
        reply: Result<TokenReviewStatus, WebhookError>,
        seen: Mutex<Vec<TokenReview>>,
    }

    #[async_trait]
    impl TokenReviewer for FixedReviewer {
        async fn review(&self, review: &TokenReview) -> Result<TokenReviewStatus, WebhookError> {
            self.seen.lock().unwrap().push(review.clone());
            self.reply.clone()
        }
    }

    fn authenticator(
        reply: Result<TokenReviewStatus, WebhookError>,
        implicit: &[&str],
    ) -> (WebhookTokenAuthenticator, Arc<FixedReviewer>) {
        let reviewer = Arc::new(FixedReviewer {
            reply,
            seen: Mutex::new(Vec::new()),
        });
        let auth = WebhookTokenAuthenticator::new(reviewer.clone(), Audiences::new(implicit.iter().copied()));
        (auth, reviewer)
    }

    fn ok(user: &str, audiences: &[&str]) -> TokenReviewStatus {
        TokenReviewStatus {
            authenticated: true,
            user: UserInfo::named(user),
            audiences: audiences.iter().map(|s| s.to_string()).collect(),
            error: String::new(),
        }
    }

    #[tokio::test]
    async fn authenticated_without_audiences() {
        let (auth, reviewer) = authenticator(Ok(ok("alice", &[])), &[]);
        let resp = auth.authenticate_token("tok", None).await.unwrap().unwrap();
        assert_eq!(resp.user.name, "alice");
        assert!(resp.audiences.is_empty());

        let seen = reviewer.seen.lock().unwrap();
        assert_eq!(seen[0].api_version, TOKEN_REVIEW_API_VERSION);
        assert_eq!(seen[0].spec.token, "tok");
        assert!(seen[0].spec.audiences.is_empty());
    }

    #[tokio::test]
    async fn audiences_are_intersected() {
        let wanted = Audiences::new(["api", "other"]);
        let (auth, reviewer) = authenticator(Ok(ok("alice", &["other", "x"])), &[]);
        let resp = auth.authenticate_token("tok", Some(&wanted)).await.unwrap().unwrap();
        assert_eq!(resp.audiences, Audiences::new(["other"]));
        assert_eq!(reviewer.seen.lock().unwrap()[0].spec.audiences, vec!["api", "other"]);
    }

    #[tokio::test]
    async fn empty_intersection_fails_even_when_authenticated() {
        let wanted = Audiences::new(["api"]);
        let (auth, _) = authenticator(Ok(ok("alice", &["elsewhere"])), &[]);
        assert_eq!(auth.authenticate_token("tok", Some(&wanted)).await, Ok(None));
    }

    #[tokio::test]
    async fn implicit_audiences_fill_in() {
        let wanted = Audiences::new(["api"]);
        let (auth, _) = authenticator(Ok(ok("alice", &[])), &["api"]);
        let resp = auth.authenticate_token("tok", Some(&wanted)).await.unwrap().unwrap();
        assert_eq!(resp.audiences, wanted);
    }

    #[tokio::test]
    async fn remote_error_and_denial() {
        let denied = TokenReviewStatus {
            error: "token expired".into(),
            ..TokenReviewStatus::default()
        };
        let (auth, _) = authenticator(Ok(denied), &[]);
        assert_eq!(
            auth.authenticate_token("tok", None).await,
            Err(AuthnError::Rejected("token expired".into()))
        );

        let (auth, _) = authenticator(Ok(TokenReviewStatus::default()), &[]);
        assert_eq!(auth.authenticate_token("tok", None).await, Ok(None));

        let (auth, _) = authenticator(Err(WebhookError::Timeout), &[]);
        assert!(matches!(auth.authenticate_token("tok", None).await, Err(AuthnError::Webhook(_))));
    }
}
