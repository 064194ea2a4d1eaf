//! `/healthz`, `/livez` and `/readyz` handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::fmt::Write;
use std::sync::Arc;

use super::checks::{HealthCheck, PingCheck, ShutdownCheck};
use crate::lifecycle::LifecycleSignals;

/// The checks behind each endpoint.
#[derive(Clone)]
pub struct HealthChecks {
    pub healthz: Vec<Arc<dyn HealthCheck>>,
    pub livez: Vec<Arc<dyn HealthCheck>>,
    pub readyz: Vec<Arc<dyn HealthCheck>>,
}

impl HealthChecks {
    pub fn new(signals: &LifecycleSignals) -> Self {
        let ping: Arc<dyn HealthCheck> = Arc::new(PingCheck);
        let shutdown: Arc<dyn HealthCheck> =
            Arc::new(ShutdownCheck::new(signals.shutdown_initiated.clone()));
        Self {
            healthz: vec![ping.clone()],
            livez: vec![ping.clone()],
            readyz: vec![ping, shutdown],
        }
    }

}

#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    verbose: Option<String>,
    #[serde(default)]
    exclude: Option<String>,
}

pub fn health_router(checks: HealthChecks) -> Router {
    let checks = Arc::new(checks);
    Router::new()
        .route(
            "/healthz",
            get(|State(c): State<Arc<HealthChecks>>, Query(q): Query<HealthQuery>| async move {
                evaluate("healthz", &c.healthz, &q)
            }),
        )
        .route(
            "/livez",
            get(|State(c): State<Arc<HealthChecks>>, Query(q): Query<HealthQuery>| async move {
                evaluate("livez", &c.livez, &q)
            }),
        )
        .route(
            "/readyz",
            get(|State(c): State<Arc<HealthChecks>>, Query(q): Query<HealthQuery>| async move {
                evaluate("readyz", &c.readyz, &q)
            }),
        )
        .with_state(checks)
}

fn evaluate(endpoint: &str, checks: &[Arc<dyn HealthCheck>], query: &HealthQuery) -> Response {
    let excluded: Vec<&str> = query
        .exclude
        .as_deref()
        .map(|e| e.split(',').map(str::trim).collect())
        .unwrap_or_default();

    let mut report = String::new();
    let mut failed = false;
    for check in checks {
        if excluded.contains(&check.name()) {
            let _ = writeln!(report, "[+]{} excluded: ok", check.name());
            continue;
        }
        match check.check() {
            Ok(()) => {
                let _ = writeln!(report, "[+]{} ok", check.name());
            }
            Err(reason) => {
                failed = true;
                tracing::debug!(endpoint, check = check.name(), reason = %reason, "Health check failed");
                let _ = writeln!(report, "[-]{} failed: reason withheld", check.name());
            }
        }
    }

    if failed {
        tracing::info!(endpoint, "Health endpoint reporting failure");
        let _ = write!(report, "{endpoint} check failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, report).into_response();
    }
    if query.verbose.is_some() {
        let _ = write!(report, "{endpoint} check passed");
        return (StatusCode::OK, report).into_response();
    }
    (StatusCode::OK, "ok").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let resp = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn readyz_fails_from_shutdown_initiated() {
        let signals = LifecycleSignals::new();
        let router = health_router(HealthChecks::new(&signals));

        assert_eq!(get(router.clone(), "/readyz").await, (StatusCode::OK, "ok".to_string()));
        signals.shutdown_initiated.signal();

        let (status, body) = get(router.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("[-]shutdown failed"));
        assert_eq!(get(router, "/livez").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn verbose_and_exclude() {
        let signals = LifecycleSignals::new();
        signals.shutdown_initiated.signal();
        let router = health_router(HealthChecks::new(&signals));

        let (status, body) = get(router.clone(), "/readyz?verbose&exclude=shutdown").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("[+]ping ok"));
        assert!(body.contains("[+]shutdown excluded: ok"));
        assert!(body.ends_with("readyz check passed"));
    }
}
