//! Audit log backend: one line per event, JSON or legacy text.

use async_trait::async_trait;
use chrono::SecondsFormat;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::rotate::{open_rotating, RotationPolicy};
use super::{AuditError, Backend, Event};
use crate::config::schema::{AuditLogConfig, AuditLogFormat};
use crate::lifecycle::Signal;
use crate::observability::metrics;

const PLUGIN_NAME: &str = "log";

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

pub struct LogBackend {
    out: Sink,
    format: AuditLogFormat,
}

impl LogBackend {
    pub fn new(out: Box<dyn Write + Send>, format: AuditLogFormat) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            format,
        }
    }

    /// `None` when no log path is configured.
    pub fn from_config(config: &AuditLogConfig) -> Result<Option<Self>, AuditError> {
        let Some(path) = config.path.as_deref() else {
            return Ok(None);
        };
        let out: Box<dyn Write + Send> = if path == "-" {
            Box::new(io::stdout())
        } else {
            let policy = RotationPolicy {
                max_size_bytes: config.max_size_mb * 1024 * 1024,
                max_backups: config.max_backups,
                max_age: (config.max_age_days > 0)
                    .then(|| Duration::from_secs(u64::from(config.max_age_days) * 24 * 60 * 60)),
            };
            let file = open_rotating(std::path::Path::new(path), policy)
                .map_err(|e| AuditError::Log(format!("opening {path}: {e}")))?;
            Box::new(file)
        };
        tracing::info!(path, format = ?config.format, "Audit log enabled");
        Ok(Some(Self::new(out, config.format)))
    }

    fn encode(&self, event: &Event) -> Result<String, AuditError> {
        match self.format {
            AuditLogFormat::Json => serde_json::to_string(event)
                .map_err(|e| AuditError::Log(format!("encoding event: {e}"))),
            AuditLogFormat::Legacy => Ok(legacy_line(event)),
        }
    }
}

fn quoted_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("{s:?}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Single-line human readable rendering.
pub fn legacy_line(event: &Event) -> String {
    let (username, groups) = if event.user.name.is_empty() {
        ("<none>".to_string(), "<none>".to_string())
    } else if event.user.groups.is_empty() {
        (event.user.name.clone(), "<none>".to_string())
    } else {
        (event.user.name.clone(), quoted_list(&event.user.groups))
    };
    let (as_user, as_groups) = match &event.impersonated_user {
        Some(user) => (user.name.clone(), quoted_list(&user.groups)),
        None => ("<self>".to_string(), "<lookup>".to_string()),
    };
    let namespace = event
        .object_ref
        .as_ref()
        .map(|o| o.namespace.as_str())
        .filter(|ns| !ns.is_empty())
        .unwrap_or("<none>");
    let response = event
        .response_status
        .as_ref()
        .map(|s| s.code.to_string())
        .unwrap_or_else(|| "<deferred>".to_string());
    let ip = event.source_ips.first().map(String::as_str).unwrap_or("<unknown>");

    format!(
        "{} AUDIT: id={:?} stage={:?} ip={:?} method={:?} user={:?} groups={:?} as={:?} asgroups={:?} user-agent={:?} namespace={:?} uri={:?} response=\"{}\"",
        event.request_received_timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        event.audit_id,
        event.stage.to_string(),
        ip,
        event.verb,
        username,
        groups,
        as_user,
        as_groups,
        event.user_agent,
        namespace,
        event.request_uri,
        response,
    )
}

#[async_trait]
impl Backend for LogBackend {
    async fn process_events(&self, events: &[Arc<Event>]) -> Result<(), AuditError> {
        let mut lines = String::new();
        for event in events {
            lines.push_str(&self.encode(event)?);
            lines.push('\n');
        }

        // File writes block; keep them off the runtime workers.
        let out = self.out.clone();
        tokio::task::spawn_blocking(move || {
            let mut out = out.lock().unwrap_or_else(PoisonError::into_inner);
            out.write_all(lines.as_bytes()).and_then(|()| out.flush())
        })
        .await
        .map_err(|e| AuditError::Log(format!("writer task: {e}")))?
        .map_err(|e| AuditError::Log(format!("writing events: {e}")))?;
        metrics::record_audit_events(PLUGIN_NAME, events.len());
        Ok(())
    }

    fn run(&self, _stop: Signal) -> Result<(), AuditError> {
        Ok(())
    }

    async fn shutdown(&self) {
        let out = self.out.clone();
        let flushed = tokio::task::spawn_blocking(move || {
            out.lock().unwrap_or_else(PoisonError::into_inner).flush()
        })
        .await;
        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Flushing audit log failed"),
            Err(e) => tracing::warn!(error = %e, "Audit log flush task failed"),
        }
    }

    fn name(&self) -> String {
        PLUGIN_NAME.to_string()
    }
}
