//! Turn audit configuration into a policy checker and a backend chain.

use std::sync::Arc;
use std::time::Duration;

use super::buffered::{BatchSettings, BufferedBackend};
use super::ignore_errors::IgnoreErrorsBackend;
use super::log::LogBackend;
use super::policy::{Policy, PolicyChecker, RuleEvaluator};
use super::truncate::{TruncateBackend, TruncateLimits};
use super::union::UnionBackend;
use super::webhook::WebhookBackend;
use super::{AuditError, Backend};
use crate::config::schema::{AuditConfig, AuditMode, BatchConfig, TruncateConfig};

/// Wrap a sink according to its delivery mode, then its size limits.
pub fn wrap_backend(
    delegate: Arc<dyn Backend>,
    mode: AuditMode,
    batch: &BatchConfig,
    truncate: &TruncateConfig,
) -> Arc<dyn Backend> {
    let mut backend: Arc<dyn Backend> = match mode {
        AuditMode::BlockingStrict => delegate,
        AuditMode::Blocking => Arc::new(IgnoreErrorsBackend::new(delegate)),
        AuditMode::Batch => Arc::new(BufferedBackend::new(delegate, BatchSettings::from(batch))),
    };
    if truncate.enabled {
        backend = Arc::new(TruncateBackend::new(
            backend,
            TruncateLimits {
                max_batch_size: truncate.max_batch_size,
                max_event_size: truncate.max_event_size,
            },
        ));
    }
    backend
}

/// Every configured sink, unioned. `None` when auditing is off.
pub fn build_backend(config: &AuditConfig) -> Result<Option<Arc<dyn Backend>>, AuditError> {
    let mut backends: Vec<Arc<dyn Backend>> = Vec::new();

    if let Some(log) = LogBackend::from_config(&config.log)? {
        backends.push(wrap_backend(
            Arc::new(log),
            config.log.mode,
            &config.log.batch,
            &config.log.truncate,
        ));
    }

    let webhook = &config.webhook;
    if let Some(path) = &webhook.config_file {
        let backend = WebhookBackend::from_descriptor_file(
            path,
            Duration::from_millis(webhook.initial_backoff_ms),
        )?;
        backends.push(wrap_backend(
            Arc::new(backend),
            webhook.mode,
            &webhook.batch,
            &webhook.truncate,
        ));
    }

    if backends.is_empty() {
        return Ok(None);
    }
    let backend = UnionBackend::of(backends);
    tracing::info!(backend = %backend.name(), "Audit backend built");
    Ok(Some(backend))
}

/// The rule evaluator for the configured policy file, if any.
pub fn build_policy_checker(config: &AuditConfig) -> Result<Option<Arc<dyn PolicyChecker>>, AuditError> {
    match &config.policy_file {
        Some(path) => Ok(Some(Arc::new(RuleEvaluator::new(Policy::load(path)?)))),
        None => Ok(None),
    }
}
