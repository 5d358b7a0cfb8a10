//! End-to-end tests for the dispense dispatch flow, driving the state machine with a scripted gateway and an
//! in-memory backend. Tokio's paused clock makes the timing assertions exact.

mod support;

use std::time::Duration;

use dispense_engine::{
    db_types::{DispenseStatus, MachineRef},
    transport::TransportError,
    DispenseApi,
    DispenseError,
    DispenseOutcome,
    DispenseRequest,
    GatewayConfig,
    SlotRequest,
};
use support::{paid_payment, online_machine, ConnectScript, ConnectionScript, FakeConnector, MemoryBackend, MACHINE_TAG, MACHINE_UID};
use tokio::time::Instant;

fn test_config() -> GatewayConfig {
    GatewayConfig::new("ws://gateway.test/machines")
}

fn seeded_backend() -> MemoryBackend {
    let db = MemoryBackend::new();
    db.add_machine(online_machine(), &[("3", Some("prod-choc")), ("5", Some("prod-soda")), ("7", None)]);
    db.add_payment(paid_payment("pay-1", "user-1"));
    db
}

fn single_request(slot: &str) -> DispenseRequest {
    DispenseRequest {
        user_id: "user-1".to_string(),
        payment_id: "pay-1".to_string(),
        machine_id: MachineRef::from(MACHINE_UID),
        slot_number: Some(slot.to_string()),
        slots: Vec::new(),
    }
}

fn batch_request(slots: &[(&str, u32)]) -> DispenseRequest {
    DispenseRequest {
        user_id: "user-1".to_string(),
        payment_id: "pay-1".to_string(),
        machine_id: MachineRef::from(MACHINE_UID),
        slot_number: None,
        slots: slots.iter().map(|(n, q)| SlotRequest { slot_number: (*n).to_string(), quantity: *q }).collect(),
    }
}

#[tokio::test(start_paused = true)]
async fn quiet_send_settles_as_success_at_the_settle_timeout() {
    let db = seeded_backend();
    let connector = FakeConnector::new();
    let api = DispenseApi::new(db.clone(), connector.clone(), test_config());

    let start = Instant::now();
    let outcome = api.process_dispense_request(&single_request("3")).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(5));

    let DispenseOutcome::Single(receipt) = outcome else { panic!("expected a single receipt") };
    assert!(receipt.acknowledged);
    assert!(receipt.command_sent);
    assert!(receipt.response.is_none());

    let frames = connector.sent_frames();
    assert_eq!(frames.len(), 1);
    let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(frame["type"], "dispense");
    assert_eq!(frame["machineId"], MACHINE_UID);
    assert_eq!(frame["slotNumber"], "3");

    let logs = db.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, DispenseStatus::Sent);
    assert_eq!(logs[0].product_id.as_deref(), Some("prod-choc"));
    assert_eq!(db.quantity("pay-1", "prod-choc"), 1);
}

#[tokio::test(start_paused = true)]
async fn gateway_reply_settles_early() {
    let db = seeded_backend();
    let connector = FakeConnector::scripted(vec![ConnectScript::Accept(ConnectionScript::replying_after(
        Duration::from_secs(1),
        r#"{"ok":true}"#,
    ))]);
    let api = DispenseApi::new(db.clone(), connector, test_config());

    let start = Instant::now();
    let outcome = api.process_dispense_request(&single_request("3")).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(1));

    let DispenseOutcome::Single(receipt) = outcome else { panic!("expected a single receipt") };
    assert_eq!(receipt.response.as_deref(), Some(r#"{"ok":true}"#));
    assert_eq!(db.logs()[0].status, DispenseStatus::Sent);
    // The captured response rides along on the log for audit.
    assert!(db.logs()[0].gateway_response.as_deref().unwrap().contains("ok"));
}

#[tokio::test(start_paused = true)]
async fn close_after_send_is_a_success() {
    let db = seeded_backend();
    let connector =
        FakeConnector::scripted(vec![ConnectScript::Accept(ConnectionScript::closing_after(Duration::from_secs(2), 1000))]);
    let api = DispenseApi::new(db.clone(), connector, test_config());

    let outcome = api.process_dispense_request(&single_request("3")).await.unwrap();
    let DispenseOutcome::Single(receipt) = outcome else { panic!("expected a single receipt") };
    assert!(receipt.acknowledged);
    assert!(receipt.response.is_none());
    assert_eq!(db.logs()[0].status, DispenseStatus::Sent);
}

#[tokio::test(start_paused = true)]
async fn transport_error_after_send_is_ignored() {
    let db = seeded_backend();
    let script = ConnectionScript {
        send_error: None,
        events: vec![(
            Duration::from_secs(1),
            dispense_engine::transport::GatewayEvent::Error("broken pipe".to_string()),
        )],
    };
    let connector = FakeConnector::scripted(vec![ConnectScript::Accept(script)]);
    let api = DispenseApi::new(db.clone(), connector, test_config());

    let start = Instant::now();
    let outcome = api.process_dispense_request(&single_request("3")).await.unwrap();
    // The error does not settle the attempt; the quiet period still has to run out.
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert!(matches!(outcome, DispenseOutcome::Single(_)));
    assert_eq!(db.logs()[0].status, DispenseStatus::Sent);
}

#[tokio::test(start_paused = true)]
async fn refused_connection_fails_the_attempt() {
    let db = seeded_backend();
    let connector = FakeConnector::scripted(vec![ConnectScript::Refuse("connection refused".to_string())]);
    let api = DispenseApi::new(db.clone(), connector, test_config());

    let err = api.process_dispense_request(&single_request("3")).await.unwrap_err();
    assert!(matches!(err, DispenseError::GatewayUnreachable(_)));
    assert_eq!(err.status_code(), 502);

    let logs = db.logs();
    assert_eq!(logs[0].status, DispenseStatus::Failed);
    assert!(logs[0].error_message.as_deref().unwrap().contains("connection refused"));
    assert_eq!(db.quantity("pay-1", "prod-choc"), 0);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_gateway_times_out_at_the_connect_timeout() {
    let db = seeded_backend();
    let connector = FakeConnector::scripted(vec![ConnectScript::Unresponsive]);
    let api = DispenseApi::new(db.clone(), connector, test_config());

    let start = Instant::now();
    let err = api.process_dispense_request(&single_request("3")).await.unwrap_err();
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert!(matches!(err, DispenseError::ConnectTimeout));
    assert_eq!(err.status_code(), 504);
    assert_eq!(db.logs()[0].status, DispenseStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_is_retried_when_configured() {
    let db = seeded_backend();
    let connector =
        FakeConnector::scripted(vec![ConnectScript::Unresponsive, ConnectScript::Accept(ConnectionScript::quiet())]);
    let mut config = test_config();
    config.connect_attempts = 2;
    let api = DispenseApi::new(db.clone(), connector.clone(), config);

    let start = Instant::now();
    let outcome = api.process_dispense_request(&single_request("3")).await.unwrap();
    // One full connect timeout, then the retry connects instantly and the settle window runs.
    assert_eq!(start.elapsed(), Duration::from_secs(15));
    assert!(matches!(outcome, DispenseOutcome::Single(_)));
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(db.logs()[0].attempt_count, 2);
    assert_eq!(db.logs()[0].status, DispenseStatus::Sent);
}

#[tokio::test(start_paused = true)]
async fn close_before_send_fails_the_attempt() {
    let db = seeded_backend();
    let connector = FakeConnector::scripted(vec![ConnectScript::Accept(ConnectionScript::rejecting_send(
        TransportError::ClosedBeforeSend(1006),
    ))]);
    let api = DispenseApi::new(db.clone(), connector, test_config());

    let err = api.process_dispense_request(&single_request("3")).await.unwrap_err();
    assert!(matches!(err, DispenseError::ClosedBeforeSend(1006)));
    assert_eq!(err.status_code(), 502);
    assert_eq!(db.logs()[0].status, DispenseStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn already_dispensed_payment_never_reaches_the_gateway() {
    let db = seeded_backend();
    let connector = FakeConnector::new();
    let api = DispenseApi::new(db.clone(), connector.clone(), test_config());

    api.process_dispense_request(&single_request("3")).await.unwrap();
    let err = api.process_dispense_request(&single_request("3")).await.unwrap_err();
    assert!(matches!(err, DispenseError::AlreadyDispensed { .. }));
    assert_eq!(err.status_code(), 409);
    // Only the first request opened a connection.
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(db.logs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn machine_tag_is_accepted_as_an_alias() {
    let db = seeded_backend();
    let connector = FakeConnector::new();
    let api = DispenseApi::new(db.clone(), connector.clone(), test_config());

    let mut req = single_request("3");
    req.machine_id = MachineRef::from(MACHINE_TAG);
    api.process_dispense_request(&req).await.unwrap();

    // The command frame carries the canonical uid, not the tag the client used.
    let frame: serde_json::Value = serde_json::from_str(&connector.sent_frames()[0]).unwrap();
    assert_eq!(frame["machineId"], MACHINE_UID);
}

#[tokio::test(start_paused = true)]
async fn batch_dispenses_in_slot_order_with_a_delay_between_units() {
    let db = seeded_backend();
    let connector = FakeConnector::new();
    let api = DispenseApi::new(db.clone(), connector.clone(), test_config());

    let start = Instant::now();
    let outcome = api.process_dispense_request(&batch_request(&[("3", 2), ("5", 1)])).await.unwrap();
    // Three units, each settling after 5 s, with a 1 s pause between consecutive units but not after the last.
    assert_eq!(start.elapsed(), Duration::from_secs(17));

    let DispenseOutcome::Batch(receipt) = outcome else { panic!("expected a batch receipt") };
    assert_eq!(receipt.total, 3);
    assert_eq!(receipt.successful, 3);
    assert_eq!(receipt.failed, 0);
    assert!(!receipt.partial_success);

    let slots: Vec<String> =
        connector.sent_frames().iter().map(|f| serde_json::from_str::<serde_json::Value>(f).unwrap()["slotNumber"].as_str().unwrap().to_string()).collect();
    assert_eq!(slots, vec!["3", "3", "5"]);
    assert_eq!(db.quantity("pay-1", "prod-choc"), 2);
    assert_eq!(db.quantity("pay-1", "prod-soda"), 1);
}

#[tokio::test(start_paused = true)]
async fn batch_with_one_failed_unit_is_a_partial_success() {
    let db = seeded_backend();
    let connector = FakeConnector::scripted(vec![
        ConnectScript::Accept(ConnectionScript::quiet()),
        ConnectScript::Refuse("connection refused".to_string()),
        ConnectScript::Accept(ConnectionScript::quiet()),
    ]);
    let api = DispenseApi::new(db.clone(), connector, test_config());

    let outcome = api.process_dispense_request(&batch_request(&[("3", 2), ("5", 1)])).await.unwrap();
    let DispenseOutcome::Batch(receipt) = outcome else { panic!("expected a batch receipt") };
    assert_eq!(receipt.total, 3);
    assert_eq!(receipt.successful, 2);
    assert_eq!(receipt.failed, 1);
    assert!(receipt.partial_success);
    assert!(!receipt.results[1].success);
    assert!(receipt.results[1].error.as_deref().unwrap().contains("connection refused"));

    // One log row per unit, with the failed one marked as such.
    let statuses: Vec<DispenseStatus> = {
        let mut logs = db.logs();
        logs.sort_by_key(|l| l.id);
        logs.iter().map(|l| l.status).collect()
    };
    assert_eq!(statuses, vec![DispenseStatus::Sent, DispenseStatus::Failed, DispenseStatus::Sent]);
}

#[tokio::test(start_paused = true)]
async fn batch_where_every_unit_fails_is_an_error() {
    let db = seeded_backend();
    let connector = FakeConnector::scripted(vec![
        ConnectScript::Refuse("down".to_string()),
        ConnectScript::Refuse("down".to_string()),
    ]);
    let api = DispenseApi::new(db.clone(), connector, test_config());

    let err = api.process_dispense_request(&batch_request(&[("3", 1), ("5", 1)])).await.unwrap_err();
    assert!(matches!(err, DispenseError::AllDispensesFailed { total: 2 }));
    assert_eq!(err.status_code(), 502);
}

#[tokio::test(start_paused = true)]
async fn missing_gateway_url_fails_before_any_side_effects() {
    let db = seeded_backend();
    let connector = FakeConnector::new();
    let mut config = test_config();
    config.gateway_url = None;
    let api = DispenseApi::new(db.clone(), connector.clone(), config);

    let err = api.process_dispense_request(&single_request("3")).await.unwrap_err();
    assert!(matches!(err, DispenseError::NotConfigured(_)));
    assert_eq!(err.status_code(), 500);
    assert_eq!(connector.connect_count(), 0);
    assert!(db.logs().is_empty());
}
