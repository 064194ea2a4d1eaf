//! Acting as another user, each requested identity authorized with verb `impersonate`.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::authn::user::{
    service_account_groups, service_account_username, split_service_account, ALL_AUTHENTICATED,
    ALL_UNAUTHENTICATED, ANONYMOUS,
};
use crate::authn::UserInfo;
use crate::authz::{Attributes, Decision};
use crate::http::response;
use crate::http::server::ChainState;

pub const IMPERSONATE_USER_HEADER: &str = "impersonate-user";
pub const IMPERSONATE_GROUP_HEADER: &str = "impersonate-group";
pub const IMPERSONATE_EXTRA_PREFIX: &str = "impersonate-extra-";

/// The authenticated user of a request that is acting as someone else.
#[derive(Debug, Clone)]
pub struct OriginalUser(pub UserInfo);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Impersonation {
    User(String),
    ServiceAccount { namespace: String, name: String },
    Group(String),
    Extra { key: String, value: String },
}

fn requested_impersonations(headers: &HeaderMap) -> Result<Vec<Impersonation>, String> {
    let mut requests = Vec::new();

    let user = headers
        .get(IMPERSONATE_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !user.is_empty() {
        requests.push(match split_service_account(user) {
            Some((namespace, name)) => Impersonation::ServiceAccount {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            None => Impersonation::User(user.to_string()),
        });
    }

    let mut has_groups_or_extra = false;
    for group in headers.get_all(IMPERSONATE_GROUP_HEADER) {
        has_groups_or_extra = true;
        let group = group.to_str().map_err(|e| format!("invalid group header: {e}"))?;
        requests.push(Impersonation::Group(group.to_string()));
    }
    for (name, value) in headers {
        let Some(encoded) = name.as_str().strip_prefix(IMPERSONATE_EXTRA_PREFIX) else {
            continue;
        };
        has_groups_or_extra = true;
        let value = value.to_str().map_err(|e| format!("invalid extra header: {e}"))?;
        requests.push(Impersonation::Extra {
            key: crate::authn::header::percent_decode(encoded),
            value: value.to_string(),
        });
    }

    if has_groups_or_extra && user.is_empty() {
        return Err("requested groups or extra without impersonating a user".to_string());
    }
    Ok(requests)
}

pub async fn impersonate(
    State(state): State<Arc<ChainState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let requests = match requested_impersonations(req.headers()) {
        Ok(requests) => requests,
        Err(e) => {
            tracing::debug!(error = %e, "Bad impersonation request");
            return response::internal_error(e);
        }
    };
    if requests.is_empty() {
        return next.run(req).await;
    }
    let Some(requestor) = req.extensions().get::<UserInfo>().cloned() else {
        return response::internal_error("no user found for request");
    };

    let groups_specified = req.headers().contains_key(IMPERSONATE_GROUP_HEADER);
    let mut username = String::new();
    let mut groups: Vec<String> = Vec::new();
    let mut extra: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for request in &requests {
        let mut attrs = Attributes {
            user: requestor.clone(),
            verb: "impersonate".to_string(),
            resource_request: true,
            ..Attributes::default()
        };
        match request {
            Impersonation::ServiceAccount { namespace, name } => {
                attrs.resource = "serviceaccounts".to_string();
                attrs.namespace = namespace.clone();
                attrs.name = name.clone();
                username = service_account_username(namespace, name);
                if !groups_specified {
                    groups = service_account_groups(namespace);
                }
            }
            Impersonation::User(name) => {
                attrs.resource = "users".to_string();
                attrs.name = name.clone();
                username = name.clone();
            }
            Impersonation::Group(group) => {
                attrs.resource = "groups".to_string();
                attrs.name = group.clone();
                groups.push(group.clone());
            }
            Impersonation::Extra { key, value } => {
                attrs.resource = "userextras".to_string();
                attrs.subresource = key.clone();
                attrs.name = value.clone();
                extra.entry(key.clone()).or_default().push(value.clone());
            }
        }

        let verdict = state.authorizer.authorize(&attrs).await;
        if verdict.decision != Decision::Allow || verdict.error.is_some() {
            tracing::info!(
                user = %requestor.name,
                resource = %attrs.resource,
                name = %attrs.name,
                reason = %verdict.reason,
                "Impersonation forbidden"
            );
            return response::forbidden(format!(
                "{} \"{}\" is forbidden: User \"{}\" cannot impersonate resource \"{}\": {}",
                attrs.resource, attrs.name, requestor.name, attrs.resource, verdict.reason
            ));
        }
    }

    if username != ANONYMOUS {
        if !groups.iter().any(|g| g == ALL_AUTHENTICATED || g == ALL_UNAUTHENTICATED) {
            groups.push(ALL_AUTHENTICATED.to_string());
        }
    } else if !groups.iter().any(|g| g == ALL_UNAUTHENTICATED) {
        groups.push(ALL_UNAUTHENTICATED.to_string());
    }

    let acting = UserInfo {
        name: username,
        uid: String::new(),
        groups,
        extra,
    };
    tracing::debug!(user = %requestor.name, acting_as = %acting.name, "Impersonating");

    let headers = req.headers_mut();
    headers.remove(IMPERSONATE_USER_HEADER);
    headers.remove(IMPERSONATE_GROUP_HEADER);
    let extras: Vec<_> = headers
        .keys()
        .filter(|k| k.as_str().starts_with(IMPERSONATE_EXTRA_PREFIX))
        .cloned()
        .collect();
    for name in extras {
        headers.remove(name);
    }

    req.extensions_mut().insert(OriginalUser(requestor));
    req.extensions_mut().insert(acting);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_requests() {
        let mut headers = HeaderMap::new();
        headers.insert(IMPERSONATE_USER_HEADER, HeaderValue::from_static("system:serviceaccount:ns:bot"));
        headers.append(IMPERSONATE_GROUP_HEADER, HeaderValue::from_static("devs"));
        headers.append(IMPERSONATE_GROUP_HEADER, HeaderValue::from_static("ops"));
        headers.insert("impersonate-extra-scopes%2fread", HeaderValue::from_static("pods"));

        let requests = requested_impersonations(&headers).unwrap();
        assert_eq!(
            requests,
            vec![
                Impersonation::ServiceAccount {
                    namespace: "ns".into(),
                    name: "bot".into()
                },
                Impersonation::Group("devs".into()),
                Impersonation::Group("ops".into()),
                Impersonation::Extra {
                    key: "scopes/read".into(),
                    value: "pods".into()
                },
            ]
        );
    }

    #[test]
    fn groups_without_user_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(IMPERSONATE_GROUP_HEADER, HeaderValue::from_static("devs"));
        assert!(requested_impersonations(&headers).is_err());
        assert!(requested_impersonations(&HeaderMap::new()).unwrap().is_empty());
    }
}
