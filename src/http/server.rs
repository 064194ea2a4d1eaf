//! HTTP server setup: composition of the handler chain and serving.
//!
//! # Responsibilities
//! - Build authenticators, authorizers and audit backends from config
//! - Wrap the API router in the filter chain; mount health endpoints beside it
//! - Wire up cross-cutting layers (tracing, audit ID propagation)
//! - Serve until the shutdown orchestrator says the listener may close

use axum::{
    http::HeaderName,
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::audit::options::build_policy_checker;
use crate::audit::policy::FixedLevelChecker;
use crate::audit::{self, AuditError, Backend, Level, PolicyChecker};
use crate::authn::builder::{BuildError, CredentialStores};
use crate::authn::{Audiences, AuthenticatorBuilder, RequestAuthenticator};
use crate::authz::{self, Authorizer};
use crate::config::GateConfig;
use crate::health::{health_router, HealthChecks};
use crate::http::middleware::{
    self, authenticate, authorize, impersonate, recover_panics, request_deadline,
    resolve_request_info, shutdown_gate,
};
use crate::http::request_info::RequestInfoResolver;
use crate::lifecycle::{Lifecycle, ShutdownError, ShutdownOptions, ShutdownOrchestrator};
use crate::webhook::WebhookError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("authentication: {0}")]
    Authentication(#[from] BuildError),

    #[error("authorization: {0}")]
    Authorization(#[from] WebhookError),

    #[error("audit: {0}")]
    Audit(#[from] AuditError),

    #[error("listener: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown: {0}")]
    Shutdown(#[from] ShutdownError),
}

/// The decision makers the chain is composed of. Built once, read-only after.
#[derive(Clone)]
pub struct Components {
    pub authenticator: Arc<dyn RequestAuthenticator>,
    pub authorizer: Arc<dyn Authorizer>,
    pub audit: Option<Arc<dyn Backend>>,
    pub policy: Arc<dyn PolicyChecker>,
}

impl Components {
    /// Every file and descriptor is read here; any error is fatal before serving.
    pub fn from_config(config: &GateConfig, stores: &CredentialStores) -> Result<Self, ServerError> {
        let authenticator = AuthenticatorBuilder::from_config(&config.authentication, stores)?.build();
        let authorizer = authz::from_config(&config.authorization)?;
        let audit = audit::build_backend(&config.audit)?;
        let policy: Arc<dyn PolicyChecker> = match build_policy_checker(&config.audit)? {
            Some(policy) => policy,
            None => {
                if audit.is_some() {
                    tracing::warn!("Audit backend configured without a policy file, nothing will be recorded");
                }
                Arc::new(FixedLevelChecker {
                    level: Level::None,
                    omit_stages: Vec::new(),
                })
            }
        };
        Ok(Self {
            authenticator,
            authorizer,
            audit,
            policy,
        })
    }
}

/// Shared state of the filters.
pub struct ChainState {
    pub authenticator: Arc<dyn RequestAuthenticator>,
    pub authorizer: Arc<dyn Authorizer>,
    pub audit: Option<Arc<dyn Backend>>,
    pub policy: Arc<dyn PolicyChecker>,
    pub api_audiences: Audiences,
    /// Lowercased front-proxy header names stripped after authentication.
    pub request_header_names: Vec<String>,
    pub request_header_prefixes: Vec<String>,
    pub resolver: RequestInfoResolver,
    pub lifecycle: Lifecycle,
    pub request_timeout: Duration,
}

/// The admission gate in front of an API router.
pub struct GateServer {
    state: Arc<ChainState>,
    orchestrator: ShutdownOrchestrator,
    api: Router,
}

impl GateServer {
    pub fn new(config: &GateConfig, components: Components, api: Router) -> Self {
        let orchestrator = ShutdownOrchestrator::new(ShutdownOptions::from(&config.shutdown))
            .with_audit_backend(components.audit.clone());
        let headers = &config.authentication.request_header;
        let lower = |names: &[String]| names.iter().map(|n| n.to_ascii_lowercase()).collect::<Vec<_>>();
        let mut request_header_names = lower(&headers.username_headers);
        request_header_names.extend(lower(&headers.group_headers));

        let state = Arc::new(ChainState {
            authenticator: components.authenticator,
            authorizer: components.authorizer,
            audit: components.audit,
            policy: components.policy,
            api_audiences: Audiences::new(config.authentication.api_audiences.iter().cloned()),
            request_header_names,
            request_header_prefixes: lower(&headers.extra_headers_prefix),
            resolver: RequestInfoResolver::default(),
            lifecycle: orchestrator.lifecycle(),
            request_timeout: config.server.request_timeout(),
        });
        Self {
            state,
            orchestrator,
            api,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle.clone()
    }

    /// Register work that must finish before new requests are refused.
    pub fn add_pre_shutdown_hook<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.orchestrator.add_pre_shutdown_hook(name, hook);
    }

    /// Health endpoints plus the API router behind the filter chain.
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let chain = self
            .api
            .clone()
            .layer(from_fn_with_state(state.clone(), authorize))
            .layer(from_fn_with_state(state.clone(), middleware::audit))
            .layer(from_fn_with_state(state.clone(), impersonate))
            .layer(from_fn_with_state(state.clone(), authenticate))
            .layer(from_fn_with_state(state.clone(), request_deadline))
            .layer(from_fn_with_state(state.clone(), shutdown_gate))
            .layer(from_fn_with_state(state.clone(), resolve_request_info))
            .layer(from_fn(recover_panics));

        let audit_id = HeaderName::from_static(middleware::AUDIT_ID_HEADER);
        Router::new()
            .merge(health_router(HealthChecks::new(&state.lifecycle.signals)))
            .merge(chain)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(SetRequestIdLayer::new(audit_id.clone(), MakeRequestUuid))
                    .layer(PropagateRequestIdLayer::new(audit_id)),
            )
    }

    /// Serve on `listener` until `stop` resolves, then walk the shutdown cascade.
    pub async fn run<S>(self, listener: TcpListener, stop: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        self.orchestrator.start_audit()?;

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let stop_listening = self.orchestrator.stop_listening_signal();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    stop_listening.signaled().await;
                    tracing::info!("HTTP listener closing");
                })
                .await
        });
        tracing::info!(address = %addr, "Admission gate listening");

        self.orchestrator.run(stop, Some(server)).await?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
