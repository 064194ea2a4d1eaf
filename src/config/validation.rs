//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that referenced sections exist (webhook modes need webhook settings)
//! - Validate value ranges (batch sizes > 0, parsable addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GateConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{AuthorizationMode, BatchConfig, GateConfig, TruncateConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("server.bind_address", "not a socket address"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    let authz = &config.authorization;
    if authz.modes.is_empty() {
        errors.push(ValidationError::new("authorization.modes", "at least one mode is required"));
    }
    for (i, mode) in authz.modes.iter().enumerate() {
        if authz.modes[..i].contains(mode) {
            errors.push(ValidationError::new("authorization.modes", format!("{mode:?} listed twice")));
        }
    }
    if authz.modes.contains(&AuthorizationMode::Webhook) && authz.webhook.is_none() {
        errors.push(ValidationError::new(
            "authorization.webhook",
            "required when the Webhook mode is enabled",
        ));
    }

    let authn = &config.authentication;
    if let Some(webhook) = &authn.webhook {
        if webhook.config_file.as_os_str().is_empty() {
            errors.push(ValidationError::new("authentication.webhook.config_file", "must be set"));
        }
    }
    if authn.session.enabled && authn.session.cookie_name.is_empty() {
        errors.push(ValidationError::new("authentication.session.cookie_name", "must not be empty"));
    }

    check_batch("audit.log.batch", &config.audit.log.batch, &mut errors);
    check_batch("audit.webhook.batch", &config.audit.webhook.batch, &mut errors);
    check_truncate("audit.log.truncate", &config.audit.log.truncate, &mut errors);
    check_truncate("audit.webhook.truncate", &config.audit.webhook.truncate, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_batch(field: &str, batch: &BatchConfig, errors: &mut Vec<ValidationError>) {
    if batch.buffer_size == 0 {
        errors.push(ValidationError::new(format!("{field}.buffer_size"), "must be positive"));
    }
    if batch.max_batch_size == 0 {
        errors.push(ValidationError::new(format!("{field}.max_batch_size"), "must be positive"));
    }
    if batch.throttle_enabled && !(batch.throttle_qps > 0.0 && batch.throttle_burst > 0) {
        errors.push(ValidationError::new(
            format!("{field}.throttle_qps"),
            "qps and burst must be positive when throttling",
        ));
    }
}

fn check_truncate(field: &str, truncate: &TruncateConfig, errors: &mut Vec<ValidationError>) {
    if !truncate.enabled {
        return;
    }
    if truncate.max_event_size == 0 {
        errors.push(ValidationError::new(format!("{field}.max_event_size"), "must be positive"));
    }
    if truncate.max_batch_size < truncate.max_event_size {
        errors.push(ValidationError::new(
            format!("{field}.max_batch_size"),
            "must not be smaller than max_event_size",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::AuthzWebhookConfig;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&GateConfig::default()), Ok(()));
    }

    #[test]
    fn webhook_mode_needs_settings() {
        let mut config = GateConfig::default();
        config.authorization.modes = vec![AuthorizationMode::Webhook];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "authorization.webhook");

        config.authorization.webhook = Some(AuthzWebhookConfig::default());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn truncate_limits() {
        let mut config = GateConfig::default();
        config.audit.webhook.truncate.enabled = true;
        config.audit.webhook.truncate.max_batch_size = 10;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("max_event_size"));
    }
}
