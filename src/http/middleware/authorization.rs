//! Authorization filter.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::audit::AuditContext;
use crate::authn::UserInfo;
use crate::authz::{Attributes, Decision};
use crate::http::request_info::RequestInfo;
use crate::http::response;
use crate::http::server::ChainState;
use crate::observability::metrics;

pub const DECISION_ANNOTATION_KEY: &str = "authorization.k8s.io/decision";
pub const REASON_ANNOTATION_KEY: &str = "authorization.k8s.io/reason";

pub async fn authorize(State(state): State<Arc<ChainState>>, req: Request, next: Next) -> Response {
    let Some(info) = req.extensions().get::<RequestInfo>().cloned() else {
        return response::internal_error("no request info found for request");
    };
    let Some(user) = req.extensions().get::<UserInfo>().cloned() else {
        return response::internal_error("no user found for request");
    };
    let audit = req.extensions().get::<AuditContext>().cloned();
    let annotate = |key: &str, value: &str| {
        if let Some(ctx) = &audit {
            ctx.add_annotation(key, value);
        }
    };

    let attrs = info.attributes(user);
    let verdict = state.authorizer.authorize(&attrs).await;
    metrics::record_authz_decision(verdict.decision.as_str());

    // Evaluation errors do not override an Allow.
    if verdict.decision == Decision::Allow {
        annotate(DECISION_ANNOTATION_KEY, "allow");
        annotate(REASON_ANNOTATION_KEY, &verdict.reason);
        return next.run(req).await;
    }
    if let Some(err) = &verdict.error {
        tracing::error!(user = %attrs.user.name, uri = %req.uri(), error = %err, "Authorization failed");
        annotate(REASON_ANNOTATION_KEY, "internal error");
        return response::internal_error(err.to_string());
    }

    tracing::info!(user = %attrs.user.name, uri = %req.uri(), reason = %verdict.reason, "Forbidden");
    annotate(DECISION_ANNOTATION_KEY, "forbid");
    annotate(REASON_ANNOTATION_KEY, &verdict.reason);
    response::forbidden(forbidden_message(&attrs, &verdict.reason))
}

/// `<resource> "<name>" is forbidden: User "<user>" cannot <verb> ...: <reason>`
pub fn forbidden_message(attrs: &Attributes, reason: &str) -> String {
    let username = if attrs.user.name.is_empty() {
        "<unknown>"
    } else {
        attrs.user.name.as_str()
    };

    let mut message = if !attrs.resource_request {
        format!(
            "forbidden: User \"{username}\" cannot {} path \"{}\"",
            attrs.verb, attrs.path
        )
    } else {
        let mut resource = attrs.resource.clone();
        if !attrs.subresource.is_empty() {
            resource = format!("{resource}/{}", attrs.subresource);
        }
        let subject = if attrs.name.is_empty() {
            resource.clone()
        } else {
            format!("{resource} \"{}\"", attrs.name)
        };
        let scope = if attrs.namespace.is_empty() {
            "at the cluster scope".to_string()
        } else {
            format!("in the namespace \"{}\"", attrs.namespace)
        };
        format!(
            "{subject} is forbidden: User \"{username}\" cannot {} resource \"{resource}\" in API group \"{}\" {scope}",
            attrs.verb, attrs.api_group
        )
    };
    if !reason.is_empty() {
        message = format!("{message}: {reason}");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let attrs = Attributes {
            user: UserInfo::named("bob"),
            verb: "get".into(),
            namespace: "default".into(),
            resource: "pods".into(),
            name: "web".into(),
            resource_request: true,
            ..Attributes::default()
        };
        assert_eq!(
            forbidden_message(&attrs, "no rule"),
            "pods \"web\" is forbidden: User \"bob\" cannot get resource \"pods\" in API group \"\" in the namespace \"default\": no rule"
        );

        let attrs = Attributes {
            user: UserInfo::named("bob"),
            verb: "get".into(),
            path: "/version".into(),
            ..Attributes::default()
        };
        assert_eq!(
            forbidden_message(&attrs, ""),
            "forbidden: User \"bob\" cannot get path \"/version\""
        );
    }
}
