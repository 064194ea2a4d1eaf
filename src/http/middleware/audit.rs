//! Audit filter: one event per request, emitted at each stage the policy keeps.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use futures_util::{FutureExt, StreamExt};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::impersonation::OriginalUser;
use crate::audit::event::{truncate_user_agent, ObjectReference, ResponseStatus};
use crate::audit::{AuditContext, Backend, Event, Level, Stage};
use crate::authn::UserInfo;
use crate::authz::Attributes;
use crate::http::request_info::RequestInfo;
use crate::http::response;
use crate::http::server::ChainState;

/// Request and response header carrying the audit ID.
pub const AUDIT_ID_HEADER: &str = "audit-id";

/// Largest body buffered into an event.
const MAX_AUDITED_BODY: usize = 3 * 1024 * 1024;

pub async fn audit(State(state): State<Arc<ChainState>>, mut req: Request, next: Next) -> Response {
    let Some(backend) = state.audit.clone() else {
        return next.run(req).await;
    };
    let info = req.extensions().get::<RequestInfo>().cloned().unwrap_or_default();
    let user = req.extensions().get::<UserInfo>().cloned().unwrap_or_default();
    let attrs = info.attributes(user);
    let Some(ctx) = new_audit_context(&state, &req, &attrs) else {
        return next.run(req).await;
    };
    if let Some(OriginalUser(original)) = req.extensions().get::<OriginalUser>().cloned() {
        ctx.set_impersonation(original);
    }
    let audit_id = ctx.audit_id();
    req.extensions_mut().insert(ctx.clone());

    if let Err(e) = ctx.process(Stage::RequestReceived, backend.as_ref()).await {
        tracing::error!(audit_id = %audit_id, error = %e, "Failed to store audit event");
        let resp = response::internal_error(format!("failed to store audit event: {e}"));
        return with_audit_id(resp, &audit_id);
    }

    let long_running = state.resolver.is_long_running(&info);
    let level = ctx.level();
    if level.at_least(Level::Request) && !long_running {
        req = match capture_request_object(req, &ctx).await {
            Ok(req) => req,
            Err(resp) => return with_audit_id(resp, &audit_id),
        };
    }

    let resp = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(resp) => resp,
        Err(panic) => {
            ctx.set_response_status(ResponseStatus {
                code: 500,
                message: "an internal error occurred while serving the request".to_string(),
                ..ResponseStatus::default()
            });
            emit(&ctx, Stage::Panic, backend.as_ref()).await;
            std::panic::resume_unwind(panic);
        }
    };

    if !ctx.has_response_status() {
        ctx.set_response_status(ResponseStatus::code(resp.status().as_u16()));
    }
    let resp = with_audit_id(resp, &audit_id);

    if long_running {
        emit(&ctx, Stage::ResponseStarted, backend.as_ref()).await;
        return complete_at_stream_end(resp, ctx, backend);
    }
    let resp = if level.at_least(Level::RequestResponse) {
        capture_response_object(resp, &ctx).await
    } else {
        resp
    };
    emit(&ctx, Stage::ResponseComplete, backend.as_ref()).await;
    resp
}

/// Buffer the request body into the event and hand the handler a replayable copy.
async fn capture_request_object(req: Request, ctx: &AuditContext) -> Result<Request, Response> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_AUDITED_BODY)
        .await
        .map_err(|e| response::bad_request(format!("reading request body: {e}")))?;
    if let Some(object) = json_object(&bytes) {
        ctx.set_request_object(object);
    }
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

async fn capture_response_object(resp: Response, ctx: &AuditContext) -> Response {
    let (parts, body) = resp.into_parts();
    match axum::body::to_bytes(body, MAX_AUDITED_BODY).await {
        Ok(bytes) => {
            if let Some(object) = json_object(&bytes) {
                ctx.set_response_object(object);
            }
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            tracing::error!(audit_id = %ctx.audit_id(), error = %e, "Failed to buffer response for audit");
            response::internal_error("failed to read response body")
        }
    }
}

/// Non-JSON and empty bodies are not recorded.
fn json_object(bytes: &[u8]) -> Option<serde_json::Value> {
    if bytes.is_empty() {
        return None;
    }
    serde_json::from_slice(bytes).ok()
}

/// Emit a stage after `RequestReceived`; failures there never fail the request.
async fn emit(ctx: &AuditContext, stage: Stage, backend: &dyn Backend) {
    if let Err(e) = ctx.process(stage, backend).await {
        tracing::warn!(audit_id = %ctx.audit_id(), %stage, error = %e, "Audit event not delivered");
    }
}

/// Sends `ResponseComplete` when the streamed body is dropped.
struct CompleteOnDrop {
    ctx: AuditContext,
    backend: Arc<dyn Backend>,
}

impl Drop for CompleteOnDrop {
    fn drop(&mut self) {
        let ctx = self.ctx.clone();
        let backend = self.backend.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { emit(&ctx, Stage::ResponseComplete, backend.as_ref()).await });
        }
    }
}

fn complete_at_stream_end(resp: Response, ctx: AuditContext, backend: Arc<dyn Backend>) -> Response {
    let (parts, body) = resp.into_parts();
    let guard = CompleteOnDrop { ctx, backend };
    let stream = body.into_data_stream().map(move |chunk| {
        let _ = &guard;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

fn with_audit_id(mut resp: Response, audit_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(audit_id) {
        resp.headers_mut().insert(AUDIT_ID_HEADER, value);
    }
    resp
}

/// Build the event for a request, or `None` when the policy records nothing.
pub(crate) fn new_audit_context(
    state: &ChainState,
    req: &Request,
    attrs: &Attributes,
) -> Option<AuditContext> {
    let rac = state.policy.level_and_stages(attrs);
    if rac.level == Level::None {
        return None;
    }

    let audit_id = req
        .headers()
        .get(AUDIT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut event = Event::new(audit_id, rac.level);
    event.request_uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    event.verb = attrs.verb.clone();
    event.user = attrs.user.clone();
    event.user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(truncate_user_agent)
        .unwrap_or_default();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    event.source_ips = source_ips(req.headers(), remote);
    if attrs.resource_request {
        event.object_ref = Some(ObjectReference {
            resource: attrs.resource.clone(),
            namespace: attrs.namespace.clone(),
            name: attrs.name.clone(),
            api_group: attrs.api_group.clone(),
            api_version: attrs.api_version.clone(),
            subresource: attrs.subresource.clone(),
        });
    }
    Some(AuditContext::new(event, rac.omit_stages))
}

/// Forwarded-for chain, then the real-ip header, then the peer; without duplicates.
pub(crate) fn source_ips(headers: &HeaderMap, remote: Option<SocketAddr>) -> Vec<String> {
    let mut ips: Vec<String> = Vec::new();
    let mut push = |ip: &str| {
        let ip = ip.trim();
        if ip.parse::<std::net::IpAddr>().is_ok() && !ips.iter().any(|existing| existing == ip) {
            ips.push(ip.to_string());
        }
    };
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        forwarded.split(',').for_each(&mut push);
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        push(real);
    }
    if let Some(addr) = remote {
        push(&addr.ip().to_string());
    }
    ips
}
