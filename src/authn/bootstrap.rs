//! Bootstrap tokens: `<id>.<secret>` checked against a stored secret.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use super::{constant_time_eq, priority, Audiences, AuthResult, AuthnError, Response, TokenAuthenticator, UserInfo};

pub const SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";
pub const SECRET_NAME_PREFIX: &str = "bootstrap-token-";
pub const USER_PREFIX: &str = "system:bootstrap:";
pub const DEFAULT_GROUP: &str = "system:bootstrappers";
const EXTRA_GROUP_PREFIX: &str = "system:bootstrappers:";

pub const KEY_TOKEN_ID: &str = "token-id";
pub const KEY_TOKEN_SECRET: &str = "token-secret";
pub const KEY_EXPIRATION: &str = "expiration";
pub const KEY_USAGE_AUTHENTICATION: &str = "usage-bootstrap-authentication";
pub const KEY_EXTRA_GROUPS: &str = "auth-extra-groups";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub secret_type: String,
    pub data: HashMap<String, String>,
    /// Marked for deletion; treated as absent.
    pub deleting: bool,
}

/// Read access to stored secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Secret>, AuthnError>;
}

/// In-memory store, mostly useful for wiring and tests.
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, Secret>,
}

impl StaticSecretStore {
    pub fn new(secrets: impl IntoIterator<Item = Secret>) -> Self {
        Self {
            secrets: secrets.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get(&self, name: &str) -> Result<Option<Secret>, AuthnError> {
        Ok(self.secrets.get(name).cloned())
    }
}

/// Split `abcdef.0123456789abcdef` into id and secret.
pub fn parse_token(token: &str) -> Option<(&str, &str)> {
    let (id, secret) = token.split_once('.')?;
    let valid = |s: &str, len: usize| {
        s.len() == len && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    };
    (valid(id, 6) && valid(secret, 16)).then_some((id, secret))
}

fn extra_groups(secret: &Secret) -> Option<Vec<String>> {
    let mut groups = vec![DEFAULT_GROUP.to_string()];
    let Some(raw) = secret.data.get(KEY_EXTRA_GROUPS) else {
        return Some(groups);
    };
    for group in raw.split(',').map(str::trim).filter(|g| !g.is_empty()) {
        if !group.starts_with(EXTRA_GROUP_PREFIX) {
            return None;
        }
        if !groups.iter().any(|g| g == group) {
            groups.push(group.to_string());
        }
    }
    Some(groups)
}

fn expired(secret: &Secret, now: DateTime<Utc>) -> bool {
    match secret.data.get(KEY_EXPIRATION) {
        None => false,
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => at.with_timezone(&Utc) <= now,
            // Unparseable expiry never grants access.
            Err(_) => true,
        },
    }
}

pub struct BootstrapTokenAuthenticator {
    store: Arc<dyn SecretStore>,
}

impl BootstrapTokenAuthenticator {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TokenAuthenticator for BootstrapTokenAuthenticator {
    async fn authenticate_token(&self, token: &str, _audiences: Option<&Audiences>) -> AuthResult {
        let Some((id, token_secret)) = parse_token(token) else {
            return Ok(None);
        };
        let name = format!("{SECRET_NAME_PREFIX}{id}");
        let Some(secret) = self.store.get(&name).await? else {
            tracing::debug!(secret = %name, "No secret for bootstrap token");
            return Ok(None);
        };

        if secret.deleting || secret.secret_type != SECRET_TYPE {
            return Ok(None);
        }
        let stored_secret = secret.data.get(KEY_TOKEN_SECRET).map(String::as_str).unwrap_or("");
        if !constant_time_eq(stored_secret.as_bytes(), token_secret.as_bytes()) {
            tracing::debug!(secret = %name, "Bootstrap token secret mismatch");
            return Ok(None);
        }
        if secret.data.get(KEY_TOKEN_ID).map(String::as_str) != Some(id) {
            return Ok(None);
        }
        if expired(&secret, Utc::now()) {
            tracing::debug!(secret = %name, "Bootstrap token expired");
            return Ok(None);
        }
        if secret.data.get(KEY_USAGE_AUTHENTICATION).map(String::as_str) != Some("true") {
            return Ok(None);
        }
        let Some(groups) = extra_groups(&secret) else {
            tracing::debug!(secret = %name, "Bootstrap token has invalid extra groups");
            return Ok(None);
        };

        let user = UserInfo::named(format!("{USER_PREFIX}{id}")).with_groups(groups);
        Ok(Some(Response::new(user)))
    }

    fn name(&self) -> &str {
        "bootstrap token authenticator"
    }

    fn priority(&self) -> i32 {
        priority::TOKEN_BOOTSTRAP
    }
}
