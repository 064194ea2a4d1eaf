//! Adapters that pull a token out of a request and hand it to a token chain.

use async_trait::async_trait;
use axum::http::header::{HeaderName, AUTHORIZATION, CONNECTION, SEC_WEBSOCKET_PROTOCOL, UPGRADE};
use axum::http::request::Parts;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::sync::Arc;

use super::{priority, Audiences, AuthResult, AuthnError, RequestAuthenticator, TokenAuthenticator};

/// Subprotocol prefix carrying a base64url bearer token on websocket upgrades.
pub const WEBSOCKET_TOKEN_PREFIX: &str = "base64url.bearer.authorization.k8s.io.";

fn request_audiences(req: &Parts) -> Option<&Audiences> {
    req.extensions.get::<Audiences>()
}

/// Turns a definitive "no" from the token chain into an error so that
/// a request with a bad token never falls through to anonymous.
fn reject_unknown(result: AuthResult) -> AuthResult {
    match result {
        Ok(None) => Err(AuthnError::InvalidBearerToken),
        other => other,
    }
}

/// `Authorization: Bearer <token>`.
pub struct BearerTokenAuthenticator {
    tokens: Arc<dyn TokenAuthenticator>,
}

impl BearerTokenAuthenticator {
    pub fn new(tokens: Arc<dyn TokenAuthenticator>) -> Self {
        Self { tokens }
    }
}

pub(crate) fn bearer_token(req: &Parts) -> Option<&str> {
    let value = req.headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl RequestAuthenticator for BearerTokenAuthenticator {
    async fn authenticate_request(&self, req: &Parts) -> AuthResult {
        let Some(token) = bearer_token(req) else {
            return Ok(None);
        };
        reject_unknown(self.tokens.authenticate_token(token, request_audiences(req)).await)
    }

    fn name(&self) -> &str {
        "bearer token authenticator"
    }

    fn priority(&self) -> i32 {
        priority::TOKEN
    }
}

/// Bearer token smuggled in `Sec-WebSocket-Protocol`, for browser clients
/// that cannot set headers on upgrade.
pub struct WebSocketProtocolAuthenticator {
    tokens: Arc<dyn TokenAuthenticator>,
}

impl WebSocketProtocolAuthenticator {
    pub fn new(tokens: Arc<dyn TokenAuthenticator>) -> Self {
        Self { tokens }
    }
}

fn is_websocket_upgrade(req: &Parts) -> bool {
    let header_has = |name: HeaderName, wanted: &str| {
        req.headers.get_all(name).iter().any(|v| {
            v.to_str()
                .map(|s| s.split(',').any(|p| p.trim().eq_ignore_ascii_case(wanted)))
                .unwrap_or(false)
        })
    };
    header_has(CONNECTION, "upgrade") && header_has(UPGRADE, "websocket")
}

/// Extract the token from the protocol list. A missing, duplicated or
/// undecodable token yields `None`.
fn websocket_token(req: &Parts) -> Option<String> {
    let mut encoded = req
        .headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|p| p.trim().strip_prefix(WEBSOCKET_TOKEN_PREFIX));
    let first = encoded.next()?;
    if encoded.next().is_some() {
        tracing::debug!("Multiple bearer token subprotocols");
        return None;
    }
    let token = URL_SAFE_NO_PAD
        .decode(first)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok());
    if token.is_none() {
        tracing::debug!("Undecodable websocket bearer token");
    }
    token.filter(|t| !t.is_empty())
}

#[async_trait]
impl RequestAuthenticator for WebSocketProtocolAuthenticator {
    async fn authenticate_request(&self, req: &Parts) -> AuthResult {
        if !is_websocket_upgrade(req) {
            return Ok(None);
        }
        let Some(token) = websocket_token(req) else {
            return Ok(None);
        };
        reject_unknown(self.tokens.authenticate_token(&token, request_audiences(req)).await)
    }

    fn name(&self) -> &str {
        "websocket protocol authenticator"
    }

    fn priority(&self) -> i32 {
        priority::TOKEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::testing::{parts, Outcome, StubAuthenticator};

    fn bearer(outcome: Outcome) -> BearerTokenAuthenticator {
        BearerTokenAuthenticator::new(Arc::new(StubAuthenticator::new(1, outcome)))
    }

    #[tokio::test]
    async fn scheme_is_case_insensitive() {
        let auth = bearer(Outcome::Success("alice"));
        for header in ["Bearer abc", "bearer abc", "BEARER abc"] {
            let resp = auth.authenticate_request(&parts(&[("authorization", header)])).await;
            assert_eq!(resp.unwrap().unwrap().user.name, "alice");
        }
    }

    #[tokio::test]
    async fn missing_or_empty_token_is_not_authenticated() {
        let auth = bearer(Outcome::Success("alice"));
        assert_eq!(auth.authenticate_request(&parts(&[])).await, Ok(None));
        assert_eq!(
            auth.authenticate_request(&parts(&[("authorization", "Bearer ")])).await,
            Ok(None)
        );
        assert_eq!(
            auth.authenticate_request(&parts(&[("authorization", "Basic Zm9v")])).await,
            Ok(None)
        );
    }

    #[tokio::test]
    async fn unknown_token_is_an_error() {
        let auth = bearer(Outcome::NotAuthenticated);
        assert_eq!(
            auth.authenticate_request(&parts(&[("authorization", "Bearer abc")])).await,
            Err(AuthnError::InvalidBearerToken)
        );
    }

    #[tokio::test]
    async fn websocket_protocol_token() {
        let stub = StubAuthenticator::new(1, Outcome::Success("ws-user"));
        let calls = stub.calls.clone();
        let auth = WebSocketProtocolAuthenticator::new(Arc::new(stub));
        let protocol = format!("{WEBSOCKET_TOKEN_PREFIX}{}, v4.channel.k8s.io", URL_SAFE_NO_PAD.encode("tok"));
        let req = parts(&[
            ("connection", "Upgrade"),
            ("upgrade", "websocket"),
            ("sec-websocket-protocol", &protocol),
        ]);
        let resp = auth.authenticate_request(&req).await.unwrap().unwrap();
        assert_eq!(resp.user.name, "ws-user");

        // Not an upgrade: ignored entirely.
        let req = parts(&[("sec-websocket-protocol", &protocol)]);
        assert_eq!(auth.authenticate_request(&req).await, Ok(None));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn websocket_garbage_is_not_authenticated() {
        let auth = WebSocketProtocolAuthenticator::new(Arc::new(StubAuthenticator::new(
            1,
            Outcome::Success("x"),
        )));
        let protocol = format!("{WEBSOCKET_TOKEN_PREFIX}***");
        let req = parts(&[
            ("connection", "keep-alive, Upgrade"),
            ("upgrade", "websocket"),
            ("sec-websocket-protocol", &protocol),
        ]);
        assert_eq!(auth.authenticate_request(&req).await, Ok(None));
    }
}
