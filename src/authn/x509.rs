//! Client-certificate identity.
//!
//! TLS termination happens in front of the gate; whatever terminates it
//! attaches the verified peer certificate subject as a [`ClientCertificate`]
//! request extension.

use async_trait::async_trait;
use axum::http::request::Parts;

use super::{priority, AuthResult, RequestAuthenticator, Response, UserInfo};

/// Subject of a verified client certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCertificate {
    pub common_name: String,
    pub organizations: Vec<String>,
}

/// Maps CN to user name and O to groups.
#[derive(Debug, Default)]
pub struct X509Authenticator;

#[async_trait]
impl RequestAuthenticator for X509Authenticator {
    async fn authenticate_request(&self, req: &Parts) -> AuthResult {
        let Some(cert) = req.extensions.get::<ClientCertificate>() else {
            return Ok(None);
        };
        if cert.common_name.is_empty() {
            return Ok(None);
        }
        let user = UserInfo::named(&cert.common_name).with_groups(cert.organizations.iter().cloned());
        Ok(Some(Response::new(user)))
    }

    fn name(&self) -> &str {
        "x509 authenticator"
    }

    fn priority(&self) -> i32 {
        priority::X509
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::testing::parts;

    #[tokio::test]
    async fn subject_becomes_user() {
        let mut req = parts(&[]);
        assert_eq!(X509Authenticator.authenticate_request(&req).await, Ok(None));

        req.extensions.insert(ClientCertificate {
            common_name: "node-1".into(),
            organizations: vec!["system:nodes".into(), "system:nodes".into()],
        });
        let resp = X509Authenticator.authenticate_request(&req).await.unwrap().unwrap();
        assert_eq!(resp.user.name, "node-1");
        assert_eq!(resp.user.groups, vec!["system:nodes"]);
    }
}
