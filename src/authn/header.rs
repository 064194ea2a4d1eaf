//! Identity asserted by a trusted front proxy through request headers.

use async_trait::async_trait;
use axum::http::request::Parts;

use super::x509::ClientCertificate;
use super::{priority, AuthResult, AuthnError, RequestAuthenticator, Response, UserInfo};

#[derive(Debug, Clone, Default)]
pub struct RequestHeaderConfig {
    pub username_headers: Vec<String>,
    pub group_headers: Vec<String>,
    pub extra_prefixes: Vec<String>,
    /// When set, the proxy must present a client certificate whose CN is
    /// listed. Empty accepts any certificate.
    pub allowed_names: Vec<String>,
    /// Require a client certificate at all.
    pub require_client_cert: bool,
}

pub struct RequestHeaderAuthenticator {
    config: RequestHeaderConfig,
}

impl RequestHeaderAuthenticator {
    pub fn new(config: RequestHeaderConfig) -> Self {
        let lower = |v: &[String]| v.iter().map(|h| h.to_ascii_lowercase()).collect();
        Self {
            config: RequestHeaderConfig {
                username_headers: lower(&config.username_headers),
                group_headers: lower(&config.group_headers),
                extra_prefixes: lower(&config.extra_prefixes),
                ..config
            },
        }
    }

    /// Headers that must not reach downstream handlers once authentication ran.
    pub fn header_names(&self) -> impl Iterator<Item = &str> {
        self.config
            .username_headers
            .iter()
            .chain(&self.config.group_headers)
            .map(String::as_str)
    }

    pub fn extra_prefixes(&self) -> &[String] {
        &self.config.extra_prefixes
    }

    fn verify_proxy(&self, req: &Parts) -> Result<bool, AuthnError> {
        let needs_cert = self.config.require_client_cert || !self.config.allowed_names.is_empty();
        if !needs_cert {
            return Ok(true);
        }
        let Some(cert) = req.extensions.get::<ClientCertificate>() else {
            return Ok(false);
        };
        if self.config.allowed_names.is_empty()
            || self.config.allowed_names.iter().any(|n| *n == cert.common_name)
        {
            Ok(true)
        } else {
            Err(AuthnError::Rejected(format!(
                "x509: subject with cn={} is not in the allowed list",
                cert.common_name
            )))
        }
    }
}

pub(crate) fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[async_trait]
impl RequestAuthenticator for RequestHeaderAuthenticator {
    async fn authenticate_request(&self, req: &Parts) -> AuthResult {
        if !self.verify_proxy(req)? {
            return Ok(None);
        }

        let name = self.config.username_headers.iter().find_map(|h| {
            req.headers
                .get(h.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        });
        let Some(name) = name else {
            return Ok(None);
        };

        let mut user = UserInfo::named(name);
        for header in &self.config.group_headers {
            for value in req.headers.get_all(header.as_str()) {
                if let Ok(group) = value.to_str() {
                    user.add_group(group.trim());
                }
            }
        }
        for (header, value) in &req.headers {
            let header = header.as_str();
            let Some(prefix) = self.config.extra_prefixes.iter().find(|p| header.starts_with(p.as_str()))
            else {
                continue;
            };
            let key = percent_decode(&header[prefix.len()..]).to_ascii_lowercase();
            if key.is_empty() {
                continue;
            }
            if let Ok(value) = value.to_str() {
                user.extra.entry(key).or_default().push(value.to_string());
            }
        }
        Ok(Some(Response::new(user)))
    }

    fn name(&self) -> &str {
        "request header authenticator"
    }

    fn priority(&self) -> i32 {
        priority::REQUEST_HEADER
    }

    fn available(&self) -> bool {
        !self.config.username_headers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::testing::parts;

    fn config() -> RequestHeaderConfig {
        RequestHeaderConfig {
            username_headers: vec!["X-Remote-User".into()],
            group_headers: vec!["X-Remote-Group".into()],
            extra_prefixes: vec!["X-Remote-Extra-".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reads_user_groups_and_extra() {
        let auth = RequestHeaderAuthenticator::new(config());
        let req = parts(&[
            ("x-remote-user", "alice"),
            ("x-remote-group", "dev"),
            ("x-remote-group", "ops"),
            ("x-remote-extra-scopes", "view"),
            ("x-remote-extra-Acme.com%2Fproject", "p1"),
        ]);
        let resp = auth.authenticate_request(&req).await.unwrap().unwrap();
        assert_eq!(resp.user.name, "alice");
        assert_eq!(resp.user.groups, vec!["dev", "ops"]);
        assert_eq!(resp.user.extra["scopes"], vec!["view"]);
        assert_eq!(resp.user.extra["acme.com/project"], vec!["p1"]);
    }

    #[tokio::test]
    async fn missing_user_header_is_not_authenticated() {
        let auth = RequestHeaderAuthenticator::new(config());
        assert_eq!(auth.authenticate_request(&parts(&[("x-remote-group", "dev")])).await, Ok(None));
    }

    #[tokio::test]
    async fn allowed_names_are_enforced() {
        let auth = RequestHeaderAuthenticator::new(RequestHeaderConfig {
            allowed_names: vec!["front-proxy".into()],
            ..config()
        });
        let mut req = parts(&[("x-remote-user", "alice")]);
        assert_eq!(auth.authenticate_request(&req).await, Ok(None));

        req.extensions.insert(ClientCertificate {
            common_name: "intruder".into(),
            organizations: vec![],
        });
        assert!(auth.authenticate_request(&req).await.is_err());

        req.extensions.insert(ClientCertificate {
            common_name: "front-proxy".into(),
            organizations: vec![],
        });
        assert!(auth.authenticate_request(&req).await.unwrap().is_some());
    }

    #[test]
    fn unavailable_without_username_headers() {
        let auth = RequestHeaderAuthenticator::new(RequestHeaderConfig::default());
        assert!(!auth.available());
    }
}
