//! Wait-group membership and refusal of new work while shutting down.

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use futures_util::{future, stream, StreamExt};
use std::sync::Arc;

use crate::http::request_info::RequestInfo;
use crate::http::response;
use crate::http::server::ChainState;
use crate::lifecycle::{Signal, WatchGuard};

/// Handed to long-running handlers: end the stream once this fires.
#[derive(Debug, Clone)]
pub struct ServerShutdownSignal(pub Signal);

pub async fn shutdown_gate(
    State(state): State<Arc<ChainState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let lifecycle = &state.lifecycle;
    if lifecycle.should_retry_after() {
        tracing::debug!(uri = %req.uri(), "Shutting down, asking client to retry");
        return response::retry_after();
    }

    let long_running = req
        .extensions()
        .get::<RequestInfo>()
        .map(|info| state.resolver.is_long_running(info))
        .unwrap_or(false);

    if long_running {
        let guard = match lifecycle.watches.add() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::debug!(uri = %req.uri(), error = %e, "Refusing watch while draining");
                return response::shutting_down();
            }
        };
        req.extensions_mut().insert(ServerShutdownSignal(
            lifecycle.signals.not_accepting_new_requests.clone(),
        ));
        let resp = next.run(req).await;
        return release_at_stream_end(resp, guard);
    }

    let _guard = match lifecycle.requests.add() {
        Ok(guard) => guard,
        Err(e) => {
            tracing::debug!(uri = %req.uri(), error = %e, "Refusing request while draining");
            return response::shutting_down();
        }
    };
    next.run(req).await
}

/// Keep the watch slot until the body ends. A finished stream waits for a
/// drain token; a client that goes away releases the slot immediately.
fn release_at_stream_end(resp: Response, guard: WatchGuard) -> Response {
    let (parts, body) = resp.into_parts();
    let release = stream::once(async move {
        guard.done().await;
        None
    })
    .filter_map(future::ready);
    let body = Body::from_stream(body.into_data_stream().chain(release));
    Response::from_parts(parts, body)
}
