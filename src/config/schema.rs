//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML config
//! file. Durations are plain integers with a `_secs` or `_ms` suffix.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the gate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Listener settings.
    pub server: ServerConfig,

    /// Authentication chain composition.
    pub authentication: AuthenticationConfig,

    /// Authorizer modes and webhook settings.
    pub authorization: AuthorizationConfig,

    /// Audit policy and backends.
    pub audit: AuditConfig,

    /// Graceful shutdown timings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Deadline for non-long-running requests.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthenticationConfig {
    /// Fall back to `system:anonymous` when nothing authenticates.
    pub anonymous: bool,

    /// Audiences requests are authenticated for. Empty disables audience checks.
    pub api_audiences: Vec<String>,

    pub token_success_cache_ttl_secs: u64,
    pub token_failure_cache_ttl_secs: u64,

    /// CSV `token,user,uid[,"groups"]`.
    pub token_file: Option<PathBuf>,

    /// CSV `password,user,uid[,"groups"]`.
    pub password_file: Option<PathBuf>,

    /// Accept bootstrap tokens. Requires a secret store at composition.
    pub bootstrap_token: bool,

    /// Map verified client certificates to users.
    pub client_certificates: bool,

    pub request_header: RequestHeaderSettings,

    pub session: SessionSettings,

    pub webhook: Option<TokenWebhookConfig>,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            anonymous: true,
            api_audiences: Vec::new(),
            token_success_cache_ttl_secs: 10,
            token_failure_cache_ttl_secs: 0,
            token_file: None,
            password_file: None,
            bootstrap_token: false,
            client_certificates: false,
            request_header: RequestHeaderSettings::default(),
            session: SessionSettings::default(),
            webhook: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RequestHeaderSettings {
    pub username_headers: Vec<String>,
    pub group_headers: Vec<String>,
    pub extra_headers_prefix: Vec<String>,
    pub allowed_names: Vec<String>,
    pub require_client_cert: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Requires a session store at composition.
    pub enabled: bool,
    pub cookie_name: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cookie_name: "sid".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenWebhookConfig {
    /// Cluster-style descriptor (YAML).
    pub config_file: PathBuf,

    /// Cache for webhook replies. Zero disables.
    pub cache_ttl_secs: u64,

    pub initial_backoff_ms: u64,
}

impl Default for TokenWebhookConfig {
    fn default() -> Self {
        Self {
            config_file: PathBuf::new(),
            cache_ttl_secs: 120,
            initial_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum AuthorizationMode {
    AlwaysAllow,
    AlwaysDeny,
    Webhook,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Evaluated in order; first Allow or Deny wins.
    pub modes: Vec<AuthorizationMode>,

    pub webhook: Option<AuthzWebhookConfig>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            modes: vec![AuthorizationMode::AlwaysAllow],
            webhook: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthzWebhookConfig {
    pub config_file: PathBuf,
    pub authorized_ttl_secs: u64,
    pub unauthorized_ttl_secs: u64,
    pub initial_backoff_ms: u64,
}

impl Default for AuthzWebhookConfig {
    fn default() -> Self {
        Self {
            config_file: PathBuf::new(),
            authorized_ttl_secs: 300,
            unauthorized_ttl_secs: 30,
            initial_backoff_ms: 500,
        }
    }
}

/// How a backend is wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuditMode {
    #[default]
    Batch,
    Blocking,
    BlockingStrict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditLogFormat {
    #[default]
    Json,
    Legacy,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    /// Audit policy (YAML). Without one nothing is audited.
    pub policy_file: Option<PathBuf>,

    pub log: AuditLogConfig,

    pub webhook: AuditWebhookConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditLogConfig {
    /// File path, or `-` for stdout. Unset disables the log backend.
    pub path: Option<String>,
    pub format: AuditLogFormat,
    pub max_age_days: u32,
    pub max_backups: u32,
    pub max_size_mb: u64,
    pub mode: AuditMode,
    pub batch: BatchConfig,
    pub truncate: TruncateConfig,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            format: AuditLogFormat::Json,
            max_age_days: 0,
            max_backups: 0,
            max_size_mb: 0,
            mode: AuditMode::Blocking,
            batch: BatchConfig::for_log(),
            truncate: TruncateConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditWebhookConfig {
    /// Cluster-style descriptor. Unset disables the webhook backend.
    pub config_file: Option<PathBuf>,
    pub initial_backoff_ms: u64,
    pub mode: AuditMode,
    pub batch: BatchConfig,
    pub truncate: TruncateConfig,
}

impl Default for AuditWebhookConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            initial_backoff_ms: 10_000,
            mode: AuditMode::Batch,
            batch: BatchConfig::default(),
            truncate: TruncateConfig::default(),
        }
    }
}

/// Buffered backend settings. `Default` is the webhook profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    pub buffer_size: usize,
    pub max_batch_size: usize,
    pub max_batch_wait_ms: u64,
    pub throttle_enabled: bool,
    pub throttle_qps: f64,
    pub throttle_burst: u32,
    /// Deliver batches on spawned tasks instead of the batching loop.
    pub async_delegate: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            max_batch_size: 400,
            max_batch_wait_ms: 30_000,
            throttle_enabled: true,
            throttle_qps: 10.0,
            throttle_burst: 15,
            async_delegate: true,
        }
    }
}

impl BatchConfig {
    pub fn for_log() -> Self {
        Self {
            max_batch_size: 1,
            max_batch_wait_ms: 0,
            throttle_enabled: false,
            async_delegate: false,
            ..Self::default()
        }
    }

    pub fn max_batch_wait(&self) -> Duration {
        Duration::from_millis(self.max_batch_wait_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TruncateConfig {
    pub enabled: bool,
    pub max_batch_size: usize,
    pub max_event_size: usize,
}

impl Default for TruncateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_batch_size: 10 * 1024 * 1024,
            max_event_size: 100 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Keep serving this long after shutdown starts, for load balancers
    /// to notice readyz failing.
    pub shutdown_delay_secs: u64,

    /// Answer new requests with 429 + Retry-After during the delay.
    pub send_retry_after: bool,

    /// How long watches get to drain. Zero closes them immediately.
    pub watch_termination_grace_secs: u64,

    /// Bound on the HTTP server shutdown after requests drained.
    pub shutdown_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            shutdown_delay_secs: 0,
            send_retry_after: false,
            watch_termination_grace_secs: 0,
            shutdown_timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
