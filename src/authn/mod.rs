//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! request
//!     → RequestAuthenticator union (sorted by priority, first success wins)
//!         ├── request-header / x509 / basic / session
//!         └── bearer + websocket-protocol
//!               → token cache (success / failure TTL)
//!               → TokenAuthenticator union
//!                     ├── token file
//!                     ├── bootstrap token (SecretStore lookup)
//!                     └── webhook token review (retry + audience intersection)
//!     → group adder (system:authenticated)
//!     → fail-on-error union with anonymous (only when enabled)
//!     → Response { user, audiences } | not authenticated | error
//! ```
//!
//! # Design Decisions
//! - `Ok(None)` is "no credentials recognized"; `Err` is "credentials were
//!   presented and something went wrong". Only the former falls through to
//!   anonymous.
//! - Chains are built once (builder.rs) and are read-only afterwards
//! - Every decorator is a plain struct wrapping an `Arc<dyn ...>`

pub mod anonymous;
pub mod bearer;
pub mod bootstrap;
pub mod builder;
pub mod cache;
pub mod group;
pub mod header;
pub mod password;
pub mod session;
pub mod tokenfile;
pub mod union;
pub mod user;
pub mod webhook;
pub mod x509;

use async_trait::async_trait;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use builder::AuthenticatorBuilder;
pub use user::UserInfo;

/// Evaluation order of the built-in authenticators. Lower runs first.
pub mod priority {
    pub const REQUEST_HEADER: i32 = 10;
    pub const X509: i32 = 20;
    pub const PASSWORD: i32 = 30;
    pub const SESSION: i32 = 40;
    pub const TOKEN: i32 = 50;
    pub const ANONYMOUS: i32 = 1000;

    pub const TOKEN_FILE: i32 = 10;
    pub const TOKEN_BOOTSTRAP: i32 = 20;
    pub const TOKEN_WEBHOOK: i32 = 30;
}

/// Outcome of an authentication attempt.
pub type AuthResult = Result<Option<Response>, AuthnError>;

/// A successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub user: UserInfo,
    pub audiences: Audiences,
}

impl Response {
    pub fn new(user: UserInfo) -> Self {
        Self {
            user,
            audiences: Audiences::default(),
        }
    }
}

/// Ordered set of audience identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Audiences(Vec<String>);

impl Audiences {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for item in items {
            let item = item.into();
            if !out.contains(&item) {
                out.push(item);
            }
        }
        Self(out)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, audience: &str) -> bool {
        self.0.iter().any(|a| a == audience)
    }

    /// Members of `self` also present in `other`, in `self`'s order.
    pub fn intersect(&self, other: &Audiences) -> Audiences {
        Audiences(self.0.iter().filter(|a| other.has(a)).cloned().collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthnError {
    #[error("invalid bearer token")]
    InvalidBearerToken,

    #[error("malformed credentials: {0}")]
    Malformed(String),

    #[error("token review failed: {0}")]
    Webhook(String),

    #[error("token review rejected: {0}")]
    Rejected(String),

    #[error("credential lookup failed: {0}")]
    Lookup(String),

    #[error("{}", join_errors(.0))]
    Aggregate(Vec<AuthnError>),
}

fn join_errors(errors: &[AuthnError]) -> String {
    let parts: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

impl AuthnError {
    /// Collapse collected errors: none is `None`, one is itself.
    pub fn aggregate(mut errors: Vec<AuthnError>) -> Option<AuthnError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(AuthnError::Aggregate(errors)),
        }
    }
}

/// Authenticates a whole request.
#[async_trait]
pub trait RequestAuthenticator: Send + Sync {
    async fn authenticate_request(&self, req: &Parts) -> AuthResult;

    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    /// Whether this authenticator is configured. Checked once at composition.
    fn available(&self) -> bool {
        true
    }
}

/// Authenticates a bare token.
#[async_trait]
pub trait TokenAuthenticator: Send + Sync {
    /// `audiences` are the audiences the caller wants the token to be valid for.
    async fn authenticate_token(&self, token: &str, audiences: Option<&Audiences>) -> AuthResult;

    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    fn available(&self) -> bool {
        true
    }
}

/// Compare secrets without short-circuiting on the first mismatch.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
pub(crate) mod testing {
    //! Stub authenticators shared by the unit tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub enum Outcome {
        Success(&'static str),
        NotAuthenticated,
        Error(&'static str),
    }

    pub struct StubAuthenticator {
        pub name: String,
        pub priority: i32,
        pub outcome: Outcome,
        pub calls: Arc<AtomicUsize>,
    }

    impl StubAuthenticator {
        pub fn new(priority: i32, outcome: Outcome) -> Self {
            Self {
                name: format!("stub-{priority}"),
                priority,
                outcome,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn result(&self) -> AuthResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Success(name) => Ok(Some(Response::new(UserInfo::named(name)))),
                Outcome::NotAuthenticated => Ok(None),
                Outcome::Error(msg) => Err(AuthnError::Lookup(msg.to_string())),
            }
        }
    }

    #[async_trait]
    impl RequestAuthenticator for StubAuthenticator {
        async fn authenticate_request(&self, _req: &Parts) -> AuthResult {
            self.result()
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
    }

    #[async_trait]
    impl TokenAuthenticator for StubAuthenticator {
        async fn authenticate_token(&self, _token: &str, _aud: Option<&Audiences>) -> AuthResult {
            self.result()
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
    }

    pub fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = axum::http::Request::builder().uri("/api/v1/pods");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }
}
