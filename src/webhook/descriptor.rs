//! Cluster-style connection descriptor shared by all webhook kinds.
//!
//! ```yaml
//! clusters:
//!   - name: policy
//!     cluster:
//!       server: https://policy.example.com/review
//!       certificate-authority: /etc/gate/ca.pem
//! users:
//!   - name: gate
//!     user:
//!       client-certificate: /etc/gate/client.pem
//!       client-key: /etc/gate/client-key.pem
//! contexts:
//!   - name: webhook
//!     context: { cluster: policy, user: gate }
//! current-context: webhook
//! ```

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use super::error::WebhookError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Descriptor {
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub current_context: String,

    /// Directory relative file references are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Cluster {
    pub server: String,
    pub certificate_authority: Option<String>,
    pub certificate_authority_data: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: AuthInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AuthInfo {
    pub client_certificate: Option<String>,
    pub client_certificate_data: Option<String>,
    pub client_key: Option<String>,
    pub client_key_data: Option<String>,
    pub token: Option<String>,
    pub token_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: Context,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Context {
    pub cluster: String,
    pub user: String,
}

/// Everything needed to build an HTTP client for one webhook.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub server: Url,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    /// Client certificate followed by its key, PEM encoded.
    pub identity_pem: Option<Vec<u8>>,
    pub token: Option<String>,
}

impl Descriptor {
    /// Read and parse a descriptor file.
    pub fn load(path: &Path) -> Result<Self, WebhookError> {
        let content = fs::read_to_string(path).map_err(|e| {
            WebhookError::Descriptor(format!("reading {}: {e}", path.display()))
        })?;
        let mut descriptor: Descriptor = serde_yaml::from_str(&content).map_err(|e| {
            WebhookError::Descriptor(format!("parsing {}: {e}", path.display()))
        })?;
        descriptor.base_dir = path.parent().map(Path::to_path_buf);
        Ok(descriptor)
    }

    /// Pick the cluster and user named by the current context.
    ///
    /// Without a current context, a lone context is used; without any
    /// context, a lone cluster is used with the first user (if any).
    pub fn resolve(&self) -> Result<ResolvedTarget, WebhookError> {
        let (cluster_name, user_name) = match self.active_context()? {
            Some(ctx) => (ctx.cluster.clone(), Some(ctx.user.clone())),
            None => match self.clusters.as_slice() {
                [only] => (only.name.clone(), self.users.first().map(|u| u.name.clone())),
                _ => {
                    return Err(WebhookError::Descriptor(
                        "no current-context and not exactly one cluster".into(),
                    ))
                }
            },
        };

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == cluster_name)
            .map(|c| &c.cluster)
            .ok_or_else(|| WebhookError::Descriptor(format!("cluster {cluster_name:?} not found")))?;

        let user = match user_name.as_deref() {
            Some("") | None => None,
            Some(name) => Some(
                self.users
                    .iter()
                    .find(|u| u.name == name)
                    .map(|u| &u.user)
                    .ok_or_else(|| WebhookError::Descriptor(format!("user {name:?} not found")))?,
            ),
        };

        let server = Url::parse(&cluster.server)
            .map_err(|e| WebhookError::Descriptor(format!("server {:?}: {e}", cluster.server)))?;
        if !matches!(server.scheme(), "http" | "https") {
            return Err(WebhookError::Descriptor(format!(
                "server {:?} must use http or https",
                cluster.server
            )));
        }

        let ca_pem = self.material(
            cluster.certificate_authority.as_deref(),
            cluster.certificate_authority_data.as_deref(),
        )?;

        let mut identity_pem = None;
        let mut token = None;
        if let Some(user) = user {
            let cert = self.material(
                user.client_certificate.as_deref(),
                user.client_certificate_data.as_deref(),
            )?;
            let key = self.material(user.client_key.as_deref(), user.client_key_data.as_deref())?;
            identity_pem = match (cert, key) {
                (Some(mut cert), Some(key)) => {
                    cert.push(b'\n');
                    cert.extend_from_slice(&key);
                    Some(cert)
                }
                (None, None) => None,
                _ => {
                    return Err(WebhookError::Descriptor(
                        "client certificate and key must be set together".into(),
                    ))
                }
            };
            token = match (&user.token, &user.token_file) {
                (Some(t), _) => Some(t.clone()),
                (None, Some(file)) => {
                    let raw = fs::read_to_string(self.path(file)).map_err(|e| {
                        WebhookError::Descriptor(format!("reading token file {file}: {e}"))
                    })?;
                    Some(raw.trim().to_string())
                }
                (None, None) => None,
            };
        }

        Ok(ResolvedTarget {
            server,
            ca_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            identity_pem,
            token,
        })
    }

    fn active_context(&self) -> Result<Option<&Context>, WebhookError> {
        if !self.current_context.is_empty() {
            return self
                .contexts
                .iter()
                .find(|c| c.name == self.current_context)
                .map(|c| Some(&c.context))
                .ok_or_else(|| {
                    WebhookError::Descriptor(format!(
                        "current-context {:?} not found",
                        self.current_context
                    ))
                });
        }
        Ok(match self.contexts.as_slice() {
            [only] => Some(&only.context),
            _ => None,
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        let p = Path::new(file);
        match &self.base_dir {
            Some(base) if p.is_relative() => base.join(p),
            _ => p.to_path_buf(),
        }
    }

    /// Inline base64 data wins over a file reference.
    fn material(&self, file: Option<&str>, data: Option<&str>) -> Result<Option<Vec<u8>>, WebhookError> {
        if let Some(data) = data {
            return STANDARD
                .decode(data.trim())
                .map(Some)
                .map_err(|e| WebhookError::Descriptor(format!("invalid base64 data: {e}")));
        }
        match file {
            Some(file) => fs::read(self.path(file))
                .map(Some)
                .map_err(|e| WebhookError::Descriptor(format!("reading {file}: {e}"))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
clusters:
  - name: policy
    cluster:
      server: https://policy.example.com/review
      insecure-skip-tls-verify: true
users:
  - name: gate
    user:
      token: s3cret
contexts:
  - name: webhook
    context:
      cluster: policy
      user: gate
current-context: webhook
"#;

    #[test]
    fn resolves_current_context() {
        let d: Descriptor = serde_yaml::from_str(DESCRIPTOR).unwrap();
        let target = d.resolve().unwrap();
        assert_eq!(target.server.as_str(), "https://policy.example.com/review");
        assert!(target.insecure_skip_tls_verify);
        assert_eq!(target.token.as_deref(), Some("s3cret"));
        assert!(target.ca_pem.is_none());
        assert!(target.identity_pem.is_none());
    }

    #[test]
    fn lone_cluster_without_context() {
        let d: Descriptor = serde_yaml::from_str(
            "clusters:\n  - name: only\n    cluster:\n      server: http://127.0.0.1:9000/\n",
        )
        .unwrap();
        let target = d.resolve().unwrap();
        assert_eq!(target.server.port(), Some(9000));
        assert!(target.token.is_none());
    }

    #[test]
    fn missing_context_is_an_error() {
        let mut d: Descriptor = serde_yaml::from_str(DESCRIPTOR).unwrap();
        d.current_context = "nope".into();
        assert!(matches!(d.resolve(), Err(WebhookError::Descriptor(_))));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let d: Descriptor = serde_yaml::from_str(
            "clusters:\n  - name: only\n    cluster:\n      server: ftp://example.com\n",
        )
        .unwrap();
        assert!(d.resolve().is_err());
    }

    #[test]
    fn inline_ca_data_is_decoded() {
        let data = STANDARD.encode(b"-----BEGIN CERTIFICATE-----");
        let yaml = format!(
            "clusters:\n  - name: only\n    cluster:\n      server: https://x\n      certificate-authority-data: {data}\n"
        );
        let d: Descriptor = serde_yaml::from_str(&yaml).unwrap();
        let target = d.resolve().unwrap();
        assert_eq!(target.ca_pem.unwrap(), b"-----BEGIN CERTIFICATE-----".to_vec());
    }
}
