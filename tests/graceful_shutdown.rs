//! Shutdown behavior as seen by clients of a real listener.

mod common;

use admission_gate::config::GateConfig;
use axum::{routing::get, Router};
use common::{client, start_gate};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

fn slow_api() -> Router {
    Router::new()
        .route("/fast", get(|| async { "fast" }))
        .route(
            "/slow",
            get(|| async {
                sleep(Duration::from_millis(2500)).await;
                "slow"
            }),
        )
}

async fn wait_for_status(url: &str, want: u16) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(resp) = client().get(url).send().await {
            if resp.status().as_u16() == want {
                return;
            }
        }
        assert!(Instant::now() < deadline, "{url} never returned {want}");
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn readyz_fails_as_soon_as_shutdown_starts() {
    let mut config = GateConfig::default();
    config.shutdown.shutdown_delay_secs = 1;
    let mut gate = start_gate(config, slow_api()).await;

    let resp = client().get(gate.url("/readyz")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");

    gate.stop();
    wait_for_status(&gate.url("/readyz?verbose"), 500).await;

    // Requests are still served during the delay.
    let resp = client().get(gate.url("/fast")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let result = timeout(Duration::from_secs(10), &mut gate.handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
}

#[tokio::test]
async fn in_flight_request_finishes_before_exit() {
    let mut gate = start_gate(GateConfig::default(), slow_api()).await;

    let url = gate.url("/slow");
    let in_flight = tokio::spawn(async move { client().get(url).send().await });
    sleep(Duration::from_millis(200)).await;

    gate.stop();
    let resp = in_flight.await.unwrap().unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "slow");

    let result = timeout(Duration::from_secs(10), &mut gate.handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
}

#[tokio::test]
async fn retry_after_mode_turns_new_requests_away() {
    let mut config = GateConfig::default();
    config.shutdown.send_retry_after = true;
    let mut gate = start_gate(config, slow_api()).await;

    // Keeps the listener open while draining.
    let url = gate.url("/slow");
    let in_flight = tokio::spawn(async move { client().get(url).send().await });
    sleep(Duration::from_millis(200)).await;

    gate.stop();
    wait_for_status(&gate.url("/fast"), 429).await;

    let resp = client().get(gate.url("/fast")).send().await.unwrap();
    assert_eq!(resp.status(), 429);
    assert_eq!(
        resp.headers().get("retry-after").and_then(|v| v.to_str().ok()),
        Some("5")
    );

    let resp = in_flight.await.unwrap().unwrap();
    assert_eq!(resp.status(), 200);

    let result = timeout(Duration::from_secs(10), &mut gate.handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
}
