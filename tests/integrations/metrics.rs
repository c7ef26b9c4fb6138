#[path = "../helpers/mod.rs"]
mod helpers;

use alertrelay::core::{DisconnectReason, TransportEvent};
use alertrelay::session::test_utils::FakeTransport;
use alertrelay::session::ConnectionState;
use helpers::app::{TestAppBuilder, BOB};
use serde_json::json;
use std::time::Duration;

fn metric_value(body: &str, name: &str) -> Option<f64> {
    body.lines()
        .find(|line| line.split([' ', '{']).next() == Some(name))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

// The Prometheus recorder is process-global, so everything that needs it
// lives in this one test.
#[tokio::test]
async fn metrics_endpoint_reflects_dispatches_and_connection_state() {
    let transport = FakeTransport::new();
    transport.fail_recipient(BOB);
    let app = TestAppBuilder::new()
        .with_transport(transport)
        .with_metrics()
        .start()
        .await
        .unwrap();
    app.wait_for_state(ConnectionState::Connected).await;

    let response = app.post_json("/alert", json!({ "location": "Home" })).await;
    assert_eq!(response.status(), 200);

    assert!(app.transport.emit(TransportEvent::Closed(DisconnectReason::from_status(
        Some(500),
        "stream errored"
    ))));
    app.transport.wait_for_connects(2, Duration::from_secs(2)).await;
    app.wait_for_state(ConnectionState::Connected).await;

    let url = format!("http://{}/metrics", app.metrics_addr());
    let body = reqwest::get(&url).await.unwrap().text().await.unwrap();

    assert_eq!(metric_value(&body, "alerts_dispatched_total"), Some(1.0));
    assert_eq!(metric_value(&body, "messages_sent_total"), Some(1.0));
    assert_eq!(metric_value(&body, "messages_failed_total"), Some(1.0));
    assert_eq!(metric_value(&body, "reconnects_total"), Some(1.0));
    assert_eq!(metric_value(&body, "connection_state"), Some(2.0));
    assert_eq!(metric_value(&body, "transport_connected"), Some(1.0));
    assert!(body.contains("dispatch_duration_seconds_bucket"));

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}
