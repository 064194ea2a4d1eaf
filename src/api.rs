//! A small API served behind the gate: identity echo, version and a watch stream.

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, get},
    Extension, Json, Router,
};
use futures_util::stream;
use serde_json::json;
use std::time::Duration;

use crate::authn::UserInfo;
use crate::http::middleware::ServerShutdownSignal;
use crate::http::RequestInfo;

/// Interval between watch heartbeats.
const WATCH_HEARTBEAT: Duration = Duration::from_secs(1);

pub fn router() -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/whoami", get(whoami))
        .route("/api/{*rest}", any(resource))
        .route("/apis/{*rest}", any(resource))
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn whoami(Extension(user): Extension<UserInfo>) -> Json<UserInfo> {
    Json(user)
}

/// Echo what the request resolved to; watches stream until shutdown.
async fn resource(req: Request) -> Response {
    let Some(info) = req.extensions().get::<RequestInfo>().cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if info.verb != "watch" {
        return Json(json!({
            "verb": info.verb,
            "apiGroup": info.api_group,
            "apiVersion": info.api_version,
            "namespace": info.namespace,
            "resource": info.resource,
            "subresource": info.subresource,
            "name": info.name,
        }))
        .into_response();
    }

    let Some(ServerShutdownSignal(stop)) = req.extensions().get::<ServerShutdownSignal>().cloned()
    else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let resource = info.resource;
    let events = stream::unfold((stop, 0u64), move |(stop, seq)| {
        let resource = resource.clone();
        async move {
            let tick = tokio::select! {
                _ = stop.signaled() => false,
                _ = tokio::time::sleep(WATCH_HEARTBEAT) => true,
            };
            if !tick {
                return None;
            }
            let line = format!("{{\"type\":\"BOOKMARK\",\"resource\":\"{resource}\",\"seq\":{seq}}}\n");
            Some((Ok::<_, std::io::Error>(line), (stop, seq + 1)))
        }
    });
    Body::from_stream(events).into_response()
}
