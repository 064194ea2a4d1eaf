//! Metrics collection and exposition.
//!
//! # Metrics
//! - `authn_requests_total{result}`: authentication outcomes at the filter
//! - `authn_token_cache_total{outcome}`: token cache hits and misses
//! - `authz_decisions_total{decision}`: authorization outcomes at the filter
//! - `authz_webhook_cache_total{outcome}`: SAR cache hits, misses and bypasses
//! - `webhook_requests_total{kind,result}` and `webhook_request_duration_seconds{kind}`
//! - `audit_events_total{backend}`, `audit_events_dropped_total{backend}`,
//!   `audit_batches_total{backend}`
//! - `lifecycle_signals_total{signal}`: shutdown cascade progress

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}

fn describe_metrics() {
    describe_counter!("authn_requests_total", "Authentication attempts by result");
    describe_counter!("authn_token_cache_total", "Token cache lookups by outcome");
    describe_counter!("authz_decisions_total", "Authorization decisions by result");
    describe_counter!("authz_webhook_cache_total", "SubjectAccessReview cache lookups");
    describe_counter!("webhook_requests_total", "Remote webhook calls by kind and result");
    describe_histogram!("webhook_request_duration_seconds", "Remote webhook call latency");
    describe_counter!("audit_events_total", "Audit events handed to a backend");
    describe_counter!("audit_events_dropped_total", "Audit events dropped by a backend");
    describe_counter!("audit_batches_total", "Audit batches delivered to a delegate");
    describe_counter!("lifecycle_signals_total", "Lifecycle signals fired");
}

pub fn record_authn(result: &'static str) {
    counter!("authn_requests_total", "result" => result).increment(1);
}

pub fn record_token_cache(outcome: &'static str) {
    counter!("authn_token_cache_total", "outcome" => outcome).increment(1);
}

pub fn record_authz_decision(decision: &'static str) {
    counter!("authz_decisions_total", "decision" => decision).increment(1);
}

pub fn record_authz_cache(outcome: &'static str) {
    counter!("authz_webhook_cache_total", "outcome" => outcome).increment(1);
}

pub fn record_webhook_request(kind: &'static str, result: &'static str, start: Instant) {
    counter!("webhook_requests_total", "kind" => kind, "result" => result).increment(1);
    histogram!("webhook_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_audit_events(backend: &str, count: usize) {
    counter!("audit_events_total", "backend" => backend.to_string()).increment(count as u64);
}

pub fn record_audit_dropped(backend: &str, count: usize) {
    counter!("audit_events_dropped_total", "backend" => backend.to_string())
        .increment(count as u64);
}

pub fn record_audit_batch(backend: &str) {
    counter!("audit_batches_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_lifecycle_signal(signal: &'static str) {
    counter!("lifecycle_signals_total", "signal" => signal).increment(1);
}
