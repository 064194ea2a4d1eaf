//! Adds `system:authenticated` to every successful result.

use async_trait::async_trait;
use axum::http::request::Parts;
use std::sync::Arc;

use super::user::{ALL_AUTHENTICATED, ALL_UNAUTHENTICATED};
use super::{AuthResult, RequestAuthenticator};

pub struct AuthenticatedGroupAdder {
    inner: Arc<dyn RequestAuthenticator>,
}

impl AuthenticatedGroupAdder {
    pub fn new(inner: Arc<dyn RequestAuthenticator>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RequestAuthenticator for AuthenticatedGroupAdder {
    async fn authenticate_request(&self, req: &Parts) -> AuthResult {
        let mut resp = match self.inner.authenticate_request(req).await? {
            Some(resp) => resp,
            None => return Ok(None),
        };
        if !resp.user.in_group(ALL_UNAUTHENTICATED) {
            resp.user.add_group(ALL_AUTHENTICATED);
        }
        Ok(Some(resp))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::testing::{parts, Outcome, StubAuthenticator};

    #[tokio::test]
    async fn adds_group_once() {
        let adder = AuthenticatedGroupAdder::new(Arc::new(StubAuthenticator::new(
            0,
            Outcome::Success("alice"),
        )));
        let resp = adder.authenticate_request(&parts(&[])).await.unwrap().unwrap();
        assert_eq!(resp.user.groups, vec![ALL_AUTHENTICATED]);
    }

    #[tokio::test]
    async fn passes_through_failures() {
        let adder = AuthenticatedGroupAdder::new(Arc::new(StubAuthenticator::new(
            0,
            Outcome::NotAuthenticated,
        )));
        assert_eq!(adder.authenticate_request(&parts(&[])).await, Ok(None));

        let adder = AuthenticatedGroupAdder::new(Arc::new(StubAuthenticator::new(
            0,
            Outcome::Error("boom"),
        )));
        assert!(adder.authenticate_request(&parts(&[])).await.is_err());
    }
}
