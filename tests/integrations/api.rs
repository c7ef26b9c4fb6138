#[path = "../helpers/mod.rs"]
mod helpers;

use alertrelay::core::{DisconnectReason, TransportEvent};
use alertrelay::session::test_utils::FakeTransport;
use alertrelay::session::ConnectionState;
use helpers::app::{TestAppBuilder, ALICE, BOB};
use serde_json::{json, Value};
use std::time::Duration;

const SHUTDOWN: Duration = Duration::from_secs(5);

#[tokio::test]
async fn health_before_connect_reports_not_connected() {
    let app = TestAppBuilder::new().with_manual_transport().start().await.unwrap();

    let response = app.get("/health").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "running");
    assert_eq!(body["whatsappConnected"], false);
    assert_eq!(body["connectionState"], "connecting");
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

    // POST is accepted too and has no side effects.
    let response = app.post("/health").await;
    assert_eq!(response.status(), 200);
    app.transport.wait_for_connects(1, Duration::from_secs(2)).await;
    assert_eq!(app.transport.connect_count(), 1);

    app.shutdown(SHUTDOWN).await.unwrap();
}

#[tokio::test]
async fn alert_renders_template_for_every_default_recipient() {
    let app = TestAppBuilder::new().start().await.unwrap();
    app.wait_for_state(ConnectionState::Connected).await;

    let response = app.post_json("/alert", json!({ "location": "Home" })).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["recipients"], 2);
    let message = body["message"].as_str().unwrap();
    assert!(message.starts_with("Emergency at Home on "), "{message}");
    assert!(!message.contains('{'), "unrendered placeholder in {message}");

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], json!({ "recipient": ALICE, "success": true }));
    assert_eq!(results[1], json!({ "recipient": BOB, "success": true }));

    let sent = app.transport.sent_messages();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(_, text)| text == message));

    app.shutdown(SHUTDOWN).await.unwrap();
}

#[tokio::test]
async fn alert_while_disconnected_is_rejected_with_503() {
    let app = TestAppBuilder::new().with_manual_transport().start().await.unwrap();

    let response = app.post_json("/alert", json!({ "location": "Home" })).await;
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "success": false, "error": "WhatsApp not connected" }));

    // Readiness is checked first, so even a malformed body gets 503.
    let response = app.post_raw("/alert", "{not json").await;
    assert_eq!(response.status(), 503);

    let response = app.post("/test").await;
    assert_eq!(response.status(), 503);
    assert!(app.transport.sent_messages().is_empty());

    app.shutdown(SHUTDOWN).await.unwrap();
}

#[tokio::test]
async fn one_failing_recipient_does_not_fail_the_request() {
    let transport = FakeTransport::new();
    transport.fail_recipient(BOB);
    let app = TestAppBuilder::new().with_transport(transport).start().await.unwrap();
    app.wait_for_state(ConnectionState::Connected).await;

    let response = app.post_json("/alert", json!({})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["success"], true);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert!(results[1]["error"].as_str().unwrap().contains("simulated failure"));

    app.shutdown(SHUTDOWN).await.unwrap();
}

#[tokio::test]
async fn request_fields_override_configured_defaults() {
    let app = TestAppBuilder::new().start().await.unwrap();
    app.wait_for_state(ConnectionState::Connected).await;

    let response = app
        .post_json(
            "/alert",
            json!({ "message": "Fall detected in {location}", "recipients": ["15550000000@s.whatsapp.net"] }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Fall detected in {location}");
    assert_eq!(body["recipients"], 1);

    let sent = app.transport.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.as_str(), "15550000000@s.whatsapp.net");

    app.shutdown(SHUTDOWN).await.unwrap();
}

#[tokio::test]
async fn empty_body_uses_defaults() {
    let app = TestAppBuilder::new()
        .with_config_modifier(|c| c.alert.default_location = "Kitchen".to_string())
        .start()
        .await
        .unwrap();
    app.wait_for_state(ConnectionState::Connected).await;

    let response = app.post("/alert").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().starts_with("Emergency at Kitchen"));
    assert_eq!(body["recipients"], 2);

    app.shutdown(SHUTDOWN).await.unwrap();
}

#[tokio::test]
async fn invalid_requests_get_400() {
    let app = TestAppBuilder::new().start().await.unwrap();
    app.wait_for_state(ConnectionState::Connected).await;

    for body in [
        r#"{not json"#,
        r#"{"recipients": []}"#,
        r#"{"recipients": ["  "]}"#,
        r#"{"location": 5}"#,
    ] {
        let response = app.post_raw("/alert", body).await;
        assert_eq!(response.status(), 400, "body {body}");
        let json: Value = response.json().await.unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].is_string());
    }
    assert!(app.transport.sent_messages().is_empty());

    app.shutdown(SHUTDOWN).await.unwrap();
}

#[tokio::test]
async fn test_endpoint_sends_configured_test_message() {
    let app = TestAppBuilder::new()
        .with_config_modifier(|c| c.alert.test_message = "system check".to_string())
        .start()
        .await
        .unwrap();
    app.wait_for_state(ConnectionState::Connected).await;

    let response = app.post("/test").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "system check");
    assert_eq!(body["recipients"], 2);
    assert_eq!(
        app.transport
            .sent_messages()
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>(),
        vec!["system check", "system check"]
    );

    app.shutdown(SHUTDOWN).await.unwrap();
}

#[tokio::test]
async fn pairing_challenge_is_exposed_until_the_session_opens() {
    let app = TestAppBuilder::new().with_manual_transport().start().await.unwrap();
    app.transport.wait_for_connects(1, Duration::from_secs(2)).await;

    let body: Value = app.get("/pairing").await.json().await.unwrap();
    assert_eq!(body, json!({ "state": "connecting", "pairing": null }));

    assert!(app
        .transport
        .emit(TransportEvent::PairingChallenge("2@qr-payload".to_string())));
    let mut pairing = app.connection.subscribe_pairing();
    tokio::time::timeout(Duration::from_secs(2), pairing.wait_for(|p| p.is_some()))
        .await
        .unwrap()
        .unwrap();

    let body: Value = app.get("/pairing").await.json().await.unwrap();
    assert_eq!(body["pairing"]["payload"], "2@qr-payload");
    assert!(body["pairing"]["issuedAt"].is_string());

    assert!(app.transport.emit(TransportEvent::Open));
    app.wait_for_state(ConnectionState::Connected).await;
    let body: Value = app.get("/pairing").await.json().await.unwrap();
    assert_eq!(body, json!({ "state": "connected", "pairing": null }));

    app.shutdown(SHUTDOWN).await.unwrap();
}

#[tokio::test]
async fn pair_is_only_allowed_after_logout() {
    let app = TestAppBuilder::new().start().await.unwrap();
    app.wait_for_state(ConnectionState::Connected).await;

    let response = app.post("/pair").await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    assert!(app
        .transport
        .emit(TransportEvent::Closed(DisconnectReason::LoggedOut)));
    app.wait_for_state(ConnectionState::LoggedOut).await;

    let response = app.post("/pair").await;
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "success": true }));

    app.transport.wait_for_connects(2, Duration::from_secs(2)).await;
    app.wait_for_state(ConnectionState::Connected).await;

    app.shutdown(SHUTDOWN).await.unwrap();
}
