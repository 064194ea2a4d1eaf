//! Cookie sessions backed by an external store.

use async_trait::async_trait;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use std::collections::HashMap;
use std::sync::Arc;

use super::{priority, AuthResult, AuthnError, RequestAuthenticator, Response, UserInfo};

pub const DEFAULT_COOKIE_NAME: &str = "sid";

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// `Ok(None)` for unknown or expired sessions.
    async fn lookup(&self, session_id: &str) -> Result<Option<UserInfo>, AuthnError>;
}

#[derive(Debug, Default)]
pub struct StaticSessionStore {
    sessions: HashMap<String, UserInfo>,
}

impl StaticSessionStore {
    pub fn new(sessions: HashMap<String, UserInfo>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl SessionStore for StaticSessionStore {
    async fn lookup(&self, session_id: &str) -> Result<Option<UserInfo>, AuthnError> {
        Ok(self.sessions.get(session_id).cloned())
    }
}

pub struct SessionAuthenticator {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
}

impl SessionAuthenticator {
    pub fn new(store: Arc<dyn SessionStore>, cookie_name: impl Into<String>) -> Self {
        Self {
            store,
            cookie_name: cookie_name.into(),
        }
    }

    fn session_id<'a>(&self, req: &'a Parts) -> Option<&'a str> {
        req.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim_matches('"'))
            .filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl RequestAuthenticator for SessionAuthenticator {
    async fn authenticate_request(&self, req: &Parts) -> AuthResult {
        let Some(id) = self.session_id(req) else {
            return Ok(None);
        };
        Ok(self.store.lookup(id).await?.map(Response::new))
    }

    fn name(&self) -> &str {
        "session authenticator"
    }

    fn priority(&self) -> i32 {
        priority::SESSION
    }
}
