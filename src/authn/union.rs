//! Priority-ordered unions of authenticators.
//!
//! The first member to return a [`Response`] wins. Errors from earlier
//! members are collected and only surfaced when nobody succeeds, unless the
//! union was built with `fail_on_error`, in which case the first error ends
//! evaluation.

use async_trait::async_trait;
use axum::http::request::Parts;
use std::sync::Arc;

use super::{Audiences, AuthResult, AuthnError, RequestAuthenticator, TokenAuthenticator};

/// Union of request authenticators.
pub struct UnionAuthenticator {
    handlers: Vec<Arc<dyn RequestAuthenticator>>,
    fail_on_error: bool,
}

impl UnionAuthenticator {
    /// Sort `handlers` by ascending priority (stable) and union them.
    pub fn new(mut handlers: Vec<Arc<dyn RequestAuthenticator>>) -> Self {
        handlers.sort_by_key(|h| h.priority());
        Self {
            handlers,
            fail_on_error: false,
        }
    }

    /// Union in the given order that stops at the first error.
    pub fn fail_on_error(handlers: Vec<Arc<dyn RequestAuthenticator>>) -> Self {
        Self {
            handlers,
            fail_on_error: true,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl RequestAuthenticator for UnionAuthenticator {
    async fn authenticate_request(&self, req: &Parts) -> AuthResult {
        let mut errors = Vec::new();
        for handler in &self.handlers {
            match handler.authenticate_request(req).await {
                Ok(Some(resp)) => return Ok(Some(resp)),
                Ok(None) => {}
                Err(e) if self.fail_on_error => return Err(e),
                Err(e) => {
                    tracing::debug!(authenticator = handler.name(), error = %e, "Authenticator failed");
                    errors.push(e);
                }
            }
        }
        match AuthnError::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "union authenticator"
    }
}

/// Union of token authenticators.
pub struct TokenUnion {
    handlers: Vec<Arc<dyn TokenAuthenticator>>,
    fail_on_error: bool,
}

impl TokenUnion {
    pub fn new(mut handlers: Vec<Arc<dyn TokenAuthenticator>>) -> Self {
        handlers.sort_by_key(|h| h.priority());
        Self {
            handlers,
            fail_on_error: false,
        }
    }

    pub fn fail_on_error(handlers: Vec<Arc<dyn TokenAuthenticator>>) -> Self {
        Self {
            handlers,
            fail_on_error: true,
        }
    }
}

#[async_trait]
impl TokenAuthenticator for TokenUnion {
    async fn authenticate_token(&self, token: &str, audiences: Option<&Audiences>) -> AuthResult {
        let mut errors = Vec::new();
        for handler in &self.handlers {
            match handler.authenticate_token(token, audiences).await {
                Ok(Some(resp)) => return Ok(Some(resp)),
                Ok(None) => {}
                Err(e) if self.fail_on_error => return Err(e),
                Err(e) => {
                    tracing::debug!(authenticator = handler.name(), error = %e, "Token authenticator failed");
                    errors.push(e);
                }
            }
        }
        match AuthnError::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "token union authenticator"
    }
}
