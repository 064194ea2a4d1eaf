//! Derive authorization attributes from the request line.
//!
//! ```text
//! /api/{version}/...                         core group
//! /apis/{group}/{version}/...                named group
//!     [/watch|/proxy]                        legacy verb prefix
//!     [/namespaces/{namespace}]
//!     /{resource}[/{name}[/{subresource}]]
//! anything else                              non-resource request
//! ```

use axum::http::{Method, Uri};
use std::collections::HashSet;

use crate::authn::UserInfo;
use crate::authz::Attributes;

/// What the request is about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub is_resource_request: bool,
    pub path: String,
    pub verb: String,
    pub api_prefix: String,
    pub api_group: String,
    pub api_version: String,
    pub namespace: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
}

impl RequestInfo {
    pub fn attributes(&self, user: UserInfo) -> Attributes {
        Attributes {
            user,
            verb: self.verb.clone(),
            namespace: self.namespace.clone(),
            api_group: self.api_group.clone(),
            api_version: self.api_version.clone(),
            resource: self.resource.clone(),
            subresource: self.subresource.clone(),
            name: self.name.clone(),
            resource_request: self.is_resource_request,
            path: self.path.clone(),
        }
    }
}

/// Resolves [`RequestInfo`] and decides which requests are long-running.
#[derive(Debug, Clone)]
pub struct RequestInfoResolver {
    api_prefixes: HashSet<String>,
    groupless_prefixes: HashSet<String>,
    long_running_verbs: HashSet<String>,
    long_running_subresources: HashSet<String>,
}

impl Default for RequestInfoResolver {
    fn default() -> Self {
        let set = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<HashSet<_>>();
        Self {
            api_prefixes: set(&["api", "apis"]),
            groupless_prefixes: set(&["api"]),
            long_running_verbs: set(&["watch", "proxy"]),
            long_running_subresources: set(&["attach", "exec", "proxy", "log", "portforward"]),
        }
    }
}

impl RequestInfoResolver {
    pub fn resolve(&self, method: &Method, uri: &Uri) -> RequestInfo {
        let path = uri.path();
        let mut info = RequestInfo {
            is_resource_request: false,
            path: path.to_string(),
            verb: method.as_str().to_lowercase(),
            ..RequestInfo::default()
        };

        let all: Vec<&str> = path.trim_matches('/').split('/').collect();
        if all.len() < 3 || !self.api_prefixes.contains(all[0]) {
            return info;
        }
        let prefix = all[0];
        let mut parts = &all[1..];

        let mut api_group = "";
        if !self.groupless_prefixes.contains(prefix) {
            if parts.len() < 3 {
                return info;
            }
            api_group = parts[0];
            parts = &parts[1..];
        }
        let api_version = parts[0];
        parts = &parts[1..];

        let verb = if parts[0] == "watch" || parts[0] == "proxy" {
            if parts.len() < 2 {
                return info;
            }
            let verb = parts[0].to_string();
            parts = &parts[1..];
            verb
        } else {
            match *method {
                Method::POST => "create",
                Method::GET | Method::HEAD => "get",
                Method::PUT => "update",
                Method::PATCH => "patch",
                Method::DELETE => "delete",
                _ => "",
            }
            .to_string()
        };

        let mut namespace = "";
        if parts[0] == "namespaces" && parts.len() > 1 {
            namespace = parts[1];
            // `/namespaces/{ns}` alone is a get of the namespace itself.
            if parts.len() > 2 {
                parts = &parts[2..];
            }
        }

        info.is_resource_request = true;
        info.api_prefix = prefix.to_string();
        info.api_group = api_group.to_string();
        info.api_version = api_version.to_string();
        info.namespace = namespace.to_string();
        info.verb = verb;
        if parts.len() >= 3 && info.verb != "proxy" {
            info.subresource = parts[2].to_string();
        }
        if parts.len() >= 2 {
            info.name = parts[1].to_string();
        }
        info.resource = parts[0].to_string();

        if parts.len() == 1 && info.verb == "get" {
            info.verb = "list".to_string();
        }
        if (info.verb == "list" || info.verb == "get") && watch_requested(uri) {
            info.verb = "watch".to_string();
        }
        if info.verb == "delete" && info.name.is_empty() {
            info.verb = "deletecollection".to_string();
        }
        info
    }

    /// Watches, proxies and streaming subresources are tracked as watches.
    pub fn is_long_running(&self, info: &RequestInfo) -> bool {
        info.is_resource_request
            && (self.long_running_verbs.contains(&info.verb)
                || self.long_running_subresources.contains(&info.subresource))
    }
}

fn watch_requested(uri: &Uri) -> bool {
    uri.query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .any(|(k, v)| k == "watch" && (v == "1" || v.eq_ignore_ascii_case("true")))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(method: Method, uri: &str) -> RequestInfo {
        RequestInfoResolver::default().resolve(&method, &uri.parse().unwrap())
    }

    #[test]
    fn core_group_resources() {
        let info = resolve(Method::GET, "/api/v1/namespaces/default/pods/web-0");
        assert!(info.is_resource_request);
        assert_eq!(info.verb, "get");
        assert_eq!(info.api_group, "");
        assert_eq!(info.api_version, "v1");
        assert_eq!(info.namespace, "default");
        assert_eq!(info.resource, "pods");
        assert_eq!(info.name, "web-0");

        let info = resolve(Method::GET, "/api/v1/namespaces/default/pods");
        assert_eq!(info.verb, "list");

        let info = resolve(Method::GET, "/api/v1/namespaces/default/pods/web-0/log");
        assert_eq!(info.subresource, "log");
    }

    #[test]
    fn named_groups_and_collections() {
        let info = resolve(Method::DELETE, "/apis/apps/v1/namespaces/ns/deployments");
        assert_eq!(info.api_group, "apps");
        assert_eq!(info.verb, "deletecollection");

        let info = resolve(Method::POST, "/apis/apps/v1/deployments");
        assert_eq!(info.verb, "create");
        assert_eq!(info.namespace, "");

        let info = resolve(Method::GET, "/api/v1/namespaces/kube-system");
        assert_eq!(info.resource, "namespaces");
        assert_eq!(info.name, "kube-system");
    }

    #[test]
    fn watches_are_long_running() {
        let resolver = RequestInfoResolver::default();
        let info = resolve(Method::GET, "/api/v1/pods?watch=true");
        assert_eq!(info.verb, "watch");
        assert!(resolver.is_long_running(&info));

        let info = resolve(Method::GET, "/api/v1/watch/namespaces/ns/pods");
        assert_eq!(info.verb, "watch");
        assert_eq!(info.namespace, "ns");
        assert!(resolver.is_long_running(&info));

        let info = resolve(Method::POST, "/api/v1/namespaces/ns/pods/p/exec");
        assert!(resolver.is_long_running(&info));
        assert!(!resolver.is_long_running(&resolve(Method::GET, "/api/v1/pods")));
    }

    #[test]
    fn other_paths_are_non_resource() {
        for path in ["/version", "/api", "/api/v1", "/apis/apps/v1", "/metrics/cadvisor"] {
            let info = resolve(Method::GET, path);
            assert!(!info.is_resource_request, "{path}");
            assert_eq!(info.verb, "get");
            assert_eq!(info.path, path);
        }
    }
}
