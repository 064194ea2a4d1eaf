//! Composition of the authentication chain.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::anonymous::AnonymousAuthenticator;
use super::bearer::{BearerTokenAuthenticator, WebSocketProtocolAuthenticator};
use super::bootstrap::{BootstrapTokenAuthenticator, SecretStore};
use super::cache::CachingTokenAuthenticator;
use super::group::AuthenticatedGroupAdder;
use super::header::{RequestHeaderAuthenticator, RequestHeaderConfig};
use super::password::PasswordFileAuthenticator;
use super::session::{SessionAuthenticator, SessionStore};
use super::tokenfile::TokenFileAuthenticator;
use super::union::{TokenUnion, UnionAuthenticator};
use super::webhook::WebhookTokenAuthenticator;
use super::x509::X509Authenticator;
use super::{Audiences, RequestAuthenticator, TokenAuthenticator};
use crate::config::schema::AuthenticationConfig;
use crate::resilience::Backoff;
use crate::webhook::{GenericWebhook, WebhookError};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("token file: {0}")]
    TokenFile(String),

    #[error("password file: {0}")]
    PasswordFile(String),

    #[error("token webhook: {0}")]
    Webhook(#[from] WebhookError),

    #[error("bootstrap tokens are enabled but no secret store was provided")]
    MissingSecretStore,

    #[error("sessions are enabled but no session store was provided")]
    MissingSessionStore,
}

/// Storage collaborators some authenticators read from.
#[derive(Clone, Default)]
pub struct CredentialStores {
    pub secrets: Option<Arc<dyn SecretStore>>,
    pub sessions: Option<Arc<dyn SessionStore>>,
}

/// Collects authenticators and assembles them into one chain.
pub struct AuthenticatorBuilder {
    request: Vec<Arc<dyn RequestAuthenticator>>,
    tokens: Vec<Arc<dyn TokenAuthenticator>>,
    anonymous: bool,
    token_success_ttl: Duration,
    token_failure_ttl: Duration,
}

impl Default for AuthenticatorBuilder {
    fn default() -> Self {
        Self {
            request: Vec::new(),
            tokens: Vec::new(),
            anonymous: false,
            token_success_ttl: Duration::from_secs(10),
            token_failure_ttl: Duration::ZERO,
        }
    }
}

impl AuthenticatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anonymous(mut self, enabled: bool) -> Self {
        self.anonymous = enabled;
        self
    }

    pub fn token_cache_ttls(mut self, success: Duration, failure: Duration) -> Self {
        self.token_success_ttl = success;
        self.token_failure_ttl = failure;
        self
    }

    pub fn request_authenticator(mut self, auth: Arc<dyn RequestAuthenticator>) -> Self {
        self.request.push(auth);
        self
    }

    pub fn token_authenticator(mut self, auth: Arc<dyn TokenAuthenticator>) -> Self {
        self.tokens.push(auth);
        self
    }

    /// Translate configuration into authenticators. Files and webhook
    /// descriptors are read here, so every error surfaces before serving.
    pub fn from_config(
        config: &AuthenticationConfig,
        stores: &CredentialStores,
    ) -> Result<Self, BuildError> {
        let mut builder = Self::new().anonymous(config.anonymous).token_cache_ttls(
            Duration::from_secs(config.token_success_cache_ttl_secs),
            Duration::from_secs(config.token_failure_cache_ttl_secs),
        );

        let headers = &config.request_header;
        builder = builder.request_authenticator(Arc::new(RequestHeaderAuthenticator::new(
            RequestHeaderConfig {
                username_headers: headers.username_headers.clone(),
                group_headers: headers.group_headers.clone(),
                extra_prefixes: headers.extra_headers_prefix.clone(),
                allowed_names: headers.allowed_names.clone(),
                require_client_cert: headers.require_client_cert,
            },
        )));

        if config.client_certificates {
            builder = builder.request_authenticator(Arc::new(X509Authenticator));
        }

        if let Some(path) = &config.password_file {
            let auth = PasswordFileAuthenticator::from_file(path).map_err(BuildError::PasswordFile)?;
            builder = builder.request_authenticator(Arc::new(auth));
        }

        if config.session.enabled {
            let store = stores.sessions.clone().ok_or(BuildError::MissingSessionStore)?;
            builder = builder.request_authenticator(Arc::new(SessionAuthenticator::new(
                store,
                config.session.cookie_name.clone(),
            )));
        }

        if let Some(path) = &config.token_file {
            let auth = TokenFileAuthenticator::from_file(path).map_err(BuildError::TokenFile)?;
            builder = builder.token_authenticator(Arc::new(auth));
        }

        if config.bootstrap_token {
            let store = stores.secrets.clone().ok_or(BuildError::MissingSecretStore)?;
            builder = builder.token_authenticator(Arc::new(BootstrapTokenAuthenticator::new(store)));
        }

        if let Some(webhook) = &config.webhook {
            let backoff = Backoff::with_initial(Duration::from_millis(webhook.initial_backoff_ms));
            let client = GenericWebhook::from_descriptor_file(&webhook.config_file, backoff, "authn")?;
            let implicit = Audiences::new(config.api_audiences.iter().cloned());
            let mut auth: Arc<dyn TokenAuthenticator> =
                Arc::new(WebhookTokenAuthenticator::new(Arc::new(client), implicit));
            if webhook.cache_ttl_secs > 0 {
                let ttl = Duration::from_secs(webhook.cache_ttl_secs);
                auth = Arc::new(CachingTokenAuthenticator::new(auth, false, ttl, ttl));
            }
            builder = builder.token_authenticator(auth);
        }

        Ok(builder)
    }

    pub fn build(self) -> Arc<dyn RequestAuthenticator> {
        let mut request: Vec<Arc<dyn RequestAuthenticator>> = self
            .request
            .into_iter()
            .filter(|a| {
                let available = a.available();
                if !available {
                    tracing::debug!(authenticator = a.name(), "Skipping unavailable authenticator");
                }
                available
            })
            .collect();

        let tokens: Vec<Arc<dyn TokenAuthenticator>> =
            self.tokens.into_iter().filter(|t| t.available()).collect();
        if !tokens.is_empty() {
            let mut token_chain: Arc<dyn TokenAuthenticator> = Arc::new(TokenUnion::new(tokens));
            if !self.token_success_ttl.is_zero() || !self.token_failure_ttl.is_zero() {
                token_chain = Arc::new(CachingTokenAuthenticator::new(
                    token_chain,
                    true,
                    self.token_success_ttl,
                    self.token_failure_ttl,
                ));
            }
            request.push(Arc::new(BearerTokenAuthenticator::new(token_chain.clone())));
            request.push(Arc::new(WebSocketProtocolAuthenticator::new(token_chain)));
        }

        if request.is_empty() {
            tracing::info!(anonymous = self.anonymous, "No authenticators configured");
            if self.anonymous {
                return Arc::new(AnonymousAuthenticator::new());
            }
            return Arc::new(UnionAuthenticator::new(Vec::new()));
        }

        let names: Vec<&str> = request.iter().map(|a| a.name()).collect();
        tracing::info!(authenticators = ?names, anonymous = self.anonymous, "Authentication chain built");

        let chain: Arc<dyn RequestAuthenticator> =
            Arc::new(AuthenticatedGroupAdder::new(Arc::new(UnionAuthenticator::new(request))));
        if self.anonymous {
            Arc::new(UnionAuthenticator::fail_on_error(vec![
                chain,
                Arc::new(AnonymousAuthenticator::new()),
            ]))
        } else {
            chain
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::testing::{parts, Outcome, StubAuthenticator};
    use crate::authn::user::{ALL_AUTHENTICATED, ANONYMOUS};
    use crate::authn::AuthnError;
    use std::io::Write;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn empty_chain_is_anonymous_or_nothing() {
        let chain = AuthenticatorBuilder::new().anonymous(true).build();
        let resp = chain.authenticate_request(&parts(&[])).await.unwrap().unwrap();
        assert_eq!(resp.user.name, ANONYMOUS);

        let chain = AuthenticatorBuilder::new().build();
        assert_eq!(chain.authenticate_request(&parts(&[])).await, Ok(None));
    }

    #[tokio::test]
    async fn token_chain_is_cached_and_grouped() {
        let stub = StubAuthenticator::new(1, Outcome::Success("alice"));
        let calls = stub.calls.clone();
        let chain = AuthenticatorBuilder::new().token_authenticator(Arc::new(stub)).build();

        let req = parts(&[("authorization", "Bearer t0k")]);
        for _ in 0..3 {
            let resp = chain.authenticate_request(&req).await.unwrap().unwrap();
            assert_eq!(resp.user.name, "alice");
            assert!(resp.user.in_group(ALL_AUTHENTICATED));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bad_token_does_not_become_anonymous() {
        let chain = AuthenticatorBuilder::new()
            .anonymous(true)
            .token_cache_ttls(Duration::ZERO, Duration::ZERO)
            .token_authenticator(Arc::new(StubAuthenticator::new(1, Outcome::NotAuthenticated)))
            .build();

        let with_token = parts(&[("authorization", "Bearer nope")]);
        assert_eq!(
            chain.authenticate_request(&with_token).await,
            Err(AuthnError::InvalidBearerToken)
        );

        let resp = chain.authenticate_request(&parts(&[])).await.unwrap().unwrap();
        assert_eq!(resp.user.name, ANONYMOUS);
    }

    #[tokio::test]
    async fn from_config_reads_token_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s3cret,bob,42").unwrap();
        let config = AuthenticationConfig {
            anonymous: false,
            token_file: Some(file.path().to_path_buf()),
            ..AuthenticationConfig::default()
        };
        let chain = AuthenticatorBuilder::from_config(&config, &CredentialStores::default())
            .unwrap()
            .build();
        let resp = chain
            .authenticate_request(&parts(&[("authorization", "Bearer s3cret")]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.user.name, "bob");
        assert_eq!(chain.authenticate_request(&parts(&[])).await, Ok(None));
    }

    #[test]
    fn missing_stores_are_reported() {
        let config = AuthenticationConfig {
            bootstrap_token: true,
            ..AuthenticationConfig::default()
        };
        assert!(matches!(
            AuthenticatorBuilder::from_config(&config, &CredentialStores::default()),
            Err(BuildError::MissingSecretStore)
        ));
    }
}
