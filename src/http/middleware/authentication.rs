//! Authentication filter and the audit of failed attempts.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::audit::new_audit_context;
use crate::audit::event::ResponseStatus;
use crate::audit::{AuditContext, Stage};
use crate::authn::{Audiences, UserInfo};
use crate::http::request_info::RequestInfo;
use crate::http::response;
use crate::http::server::ChainState;
use crate::observability::metrics;

/// Front-proxy headers stripped from every authenticated request.
const STANDARD_USERNAME_HEADER: &str = "x-remote-user";
const STANDARD_GROUP_HEADER: &str = "x-remote-group";
const STANDARD_EXTRA_PREFIX: &str = "x-remote-extra-";

pub async fn authenticate(
    State(state): State<Arc<ChainState>>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();
    let challenge = match state.authenticator.authenticate_request(&parts).await {
        Ok(Some(resp)) if audiences_acceptable(&state.api_audiences, &resp.audiences) => {
            metrics::record_authn("success");
            tracing::debug!(user = %resp.user.name, groups = ?resp.user.groups, "Authenticated request");
            clear_authentication_headers(&mut parts.headers, &state);
            parts.extensions.insert(resp.user);
            parts.extensions.insert(resp.audiences);
            return next.run(Request::from_parts(parts, body)).await;
        }
        Ok(Some(resp)) => {
            metrics::record_authn("audience_mismatch");
            tracing::warn!(
                audiences = ?resp.audiences.as_slice(),
                accepted = ?state.api_audiences.as_slice(),
                "Unable to match the audience"
            );
            false
        }
        Ok(None) => {
            metrics::record_authn("unauthenticated");
            true
        }
        Err(e) => {
            metrics::record_authn("error");
            tracing::error!(error = %e, uri = %parts.uri, "Unable to authenticate the request");
            false
        }
    };

    let failed = failed_authentication_context(&state, &Request::from_parts(parts, body));
    if let (Some(ctx), Some(backend)) = (failed, state.audit.clone()) {
        if let Err(e) = ctx.process(Stage::ResponseStarted, backend.as_ref()).await {
            tracing::warn!(audit_id = %ctx.audit_id(), error = %e, "Failed authentication not audited");
        }
    }
    response::unauthorized(challenge)
}

fn audiences_acceptable(api: &Audiences, response: &Audiences) -> bool {
    api.is_empty() || response.is_empty() || !api.intersect(response).is_empty()
}

fn clear_authentication_headers(headers: &mut HeaderMap, state: &ChainState) {
    headers.remove(header::AUTHORIZATION);
    let names = state
        .request_header_names
        .iter()
        .map(String::as_str)
        .chain([STANDARD_USERNAME_HEADER, STANDARD_GROUP_HEADER]);
    let doomed: Vec<String> = headers
        .keys()
        .map(|k| k.as_str().to_string())
        .filter(|k| {
            names.clone().any(|n| n == k)
                || k.starts_with(STANDARD_EXTRA_PREFIX)
                || state.request_header_prefixes.iter().any(|p| k.starts_with(p.as_str()))
        })
        .collect();
    for name in doomed {
        headers.remove(name.as_str());
    }
}

/// The 401 event for a request the audit filter never sees. The request is
/// not held across the delivery await.
fn failed_authentication_context(state: &ChainState, req: &Request) -> Option<AuditContext> {
    state.audit.as_ref()?;
    let info = req.extensions().get::<RequestInfo>().cloned().unwrap_or_default();
    let attrs = info.attributes(UserInfo::default());
    let ctx = new_audit_context(state, req, &attrs)?;
    ctx.set_response_status(ResponseStatus {
        code: 401,
        message: attempted_methods(req),
        ..ResponseStatus::default()
    });
    Some(ctx)
}

fn attempted_methods(req: &Request) -> String {
    let mut methods = Vec::new();
    let auth = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim();
    if let Some((scheme, _)) = auth.split_once(' ') {
        if scheme.eq_ignore_ascii_case("basic") {
            methods.push("basic");
        } else if scheme.eq_ignore_ascii_case("bearer") {
            methods.push("bearer");
        }
    }
    if req.extensions().get::<crate::authn::x509::ClientCertificate>().is_some() {
        methods.push("x509");
    }
    if methods.is_empty() {
        "Authentication failed, no credentials provided".to_string()
    } else {
        format!("Authentication failed, attempted: {}", methods.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_rules() {
        let api = Audiences::new(["api"]);
        assert!(audiences_acceptable(&Audiences::default(), &Audiences::new(["x"])));
        assert!(audiences_acceptable(&api, &Audiences::default()));
        assert!(audiences_acceptable(&api, &Audiences::new(["x", "api"])));
        assert!(!audiences_acceptable(&api, &Audiences::new(["x"])));
    }

    #[test]
    fn attempted_methods_message() {
        let req = Request::builder()
            .header("authorization", "Bearer abc")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(attempted_methods(&req), "Authentication failed, attempted: bearer");
        let req = Request::builder().body(axum::body::Body::empty()).unwrap();
        assert_eq!(attempted_methods(&req), "Authentication failed, no credentials provided");
    }
}
