//! Outermost filters: panic recovery and request info resolution.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::http::response;
use crate::http::server::ChainState;

/// Turn a panicking handler into a 500 instead of a dropped connection.
pub async fn recover_panics(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(resp) => resp,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(%method, %uri, panic = %message, "Handler panicked");
            response::internal_error("an internal error occurred while serving the request")
        }
    }
}

pub async fn resolve_request_info(
    State(state): State<Arc<ChainState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let info = state.resolver.resolve(req.method(), req.uri());
    req.extensions_mut().insert(info);
    next.run(req).await
}
