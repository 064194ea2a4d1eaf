//! Anonymous fallback identity.

use async_trait::async_trait;
use axum::http::request::Parts;

use super::user::{UserInfo, ALL_UNAUTHENTICATED, ANONYMOUS};
use super::{priority, Audiences, AuthResult, RequestAuthenticator, Response};

/// Authenticates every request as `system:anonymous`.
#[derive(Debug, Default)]
pub struct AnonymousAuthenticator;

impl AnonymousAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RequestAuthenticator for AnonymousAuthenticator {
    async fn authenticate_request(&self, req: &Parts) -> AuthResult {
        let audiences = req.extensions.get::<Audiences>().cloned().unwrap_or_default();
        Ok(Some(Response {
            user: UserInfo::named(ANONYMOUS).with_groups([ALL_UNAUTHENTICATED]),
            audiences,
        }))
    }

    fn name(&self) -> &str {
        "anonymous authenticator"
    }

    fn priority(&self) -> i32 {
        priority::ANONYMOUS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::testing::{parts, Outcome, StubAuthenticator};
    use crate::authn::union::UnionAuthenticator;
    use std::sync::Arc;

    fn with_anonymous(chain: StubAuthenticator) -> UnionAuthenticator {
        UnionAuthenticator::fail_on_error(vec![Arc::new(chain), Arc::new(AnonymousAuthenticator)])
    }

    #[tokio::test]
    async fn absent_credentials_become_anonymous() {
        let auth = with_anonymous(StubAuthenticator::new(0, Outcome::NotAuthenticated));
        let resp = auth.authenticate_request(&parts(&[])).await.unwrap().unwrap();
        assert_eq!(resp.user.name, ANONYMOUS);
        assert_eq!(resp.user.groups, vec![ALL_UNAUTHENTICATED]);
    }

    #[tokio::test]
    async fn chain_error_is_not_converted() {
        let auth = with_anonymous(StubAuthenticator::new(0, Outcome::Error("expired")));
        let result = auth.authenticate_request(&parts(&[])).await;
        assert!(matches!(result, Err(_)), "got {result:?}");
    }

    #[tokio::test]
    async fn real_identity_is_kept() {
        let auth = with_anonymous(StubAuthenticator::new(0, Outcome::Success("alice")));
        let resp = auth.authenticate_request(&parts(&[])).await.unwrap().unwrap();
        assert_eq!(resp.user.name, "alice");
    }

    #[tokio::test]
    async fn carries_requested_audiences() {
        let mut req = parts(&[]);
        req.extensions.insert(Audiences::new(["api"]));
        let resp = AnonymousAuthenticator.authenticate_request(&req).await.unwrap().unwrap();
        assert!(resp.audiences.has("api"));
    }
}
