// tests/remote_config_tests.rs
//! Integration tests for the remote configuration protocol

use gridlink_core::config::{AcquisitionSettings, ConfigHandle, RemoteSettings};
use gridlink_core::hal::MockHttpClient;
use gridlink_core::registers::RegisterMap;
use gridlink_core::utils::time::ManualClock;
use gridlink_core::RemoteConfigHandler;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CONFIG_URL: &str = "http://cloud/api/inverter/config";

struct Harness {
    http: Arc<MockHttpClient>,
    handle: Arc<ConfigHandle>,
    handler: RemoteConfigHandler,
}

fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let http = Arc::new(MockHttpClient::new());
    let handle = Arc::new(ConfigHandle::new(AcquisitionSettings::default()));
    let handler = RemoteConfigHandler::new(
        http.clone(),
        CONFIG_URL,
        handle.clone(),
        RegisterMap::default_inverter(),
        RemoteSettings::default(),
        Arc::new(ManualClock::starting_at(Duration::from_secs(1_700_000_000))),
    );
    Harness {
        http,
        handle,
        handler,
    }
}

#[tokio::test]
async fn test_pull_apply_acknowledge_cycle() {
    let h = harness();
    h.http.on_get(
        "/api/inverter/config",
        200,
        r#"{"nonce":7,"config_update":{"sampling_interval":10,"registers":["voltage","current","bogus"]}}"#,
    );
    h.http.on_post("/api/inverter/config/ack", 200, "");

    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    h.handler.on_update(Box::new(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    }));

    let ack = h.handler.check_for_update().await.unwrap().unwrap();

    // Interval 5000 -> 10000 ms accepted; registers {0,1} already polled
    assert_eq!(ack.nonce, 7);
    assert!(ack.all_success);
    assert_eq!(ack.config_ack.accepted.len(), 1);
    assert_eq!(ack.config_ack.accepted[0].parameter, "sampling_interval");
    assert_eq!(ack.config_ack.accepted[0].old_value.as_deref(), Some("5000"));
    assert_eq!(ack.config_ack.accepted[0].new_value.as_deref(), Some("10000"));
    assert_eq!(ack.config_ack.rejected.len(), 0);
    assert_eq!(ack.config_ack.unchanged.len(), 1);
    assert_eq!(ack.config_ack.unchanged[0].parameter, "registers");

    // The shared snapshot saw the accepted interval, registers untouched
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.polling_interval_ms, 10_000);
    assert_eq!(snapshot.minimum_registers.len(), 10);

    // Update callback fired once
    assert_eq!(updates.load(Ordering::Relaxed), 1);

    // The ack travelled to the /ack endpoint
    let posts = h.http.requests_to("/api/inverter/config/ack");
    assert_eq!(posts.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&posts[0].body).unwrap();
    assert_eq!(body["nonce"], 7);
    assert_eq!(body["all_success"], true);
    assert_eq!(body["config_ack"]["accepted"][0]["parameter"], "sampling_interval");
    assert_eq!(body["config_ack"]["accepted"][0]["reason"], "Applied successfully");
    // Unchanged entries carry no old/new values
    assert!(body["config_ack"]["unchanged"][0].get("old_value").is_none());
    assert!(body["config_ack"]["unchanged"][0].get("reason").is_some());
}

#[tokio::test]
async fn test_out_of_bounds_parameters_rejected() {
    let h = harness();
    h.http.on_get(
        "/api/inverter/config",
        200,
        // Zero-second interval is below the 1 s floor; register 11 is unknown
        r#"{"nonce":11,"config_update":{"sampling_interval":0,"registers":[0,1,2,11]}}"#,
    );
    h.http.on_post("/api/inverter/config/ack", 200, "");

    let ack = h.handler.check_for_update().await.unwrap().unwrap();

    assert!(!ack.all_success);
    assert_eq!(ack.config_ack.rejected.len(), 2);
    assert_eq!(ack.config_ack.accepted.len(), 0);

    // Nothing mutated
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.polling_interval_ms, 5_000);
}

#[tokio::test]
async fn test_rejected_parameter_does_not_block_the_rest() {
    let h = harness();
    h.http.on_get(
        "/api/inverter/config",
        200,
        r#"{"nonce":13,"config_update":{"sampling_interval":0,"registers":[3,4]}}"#,
    );
    h.http.on_post("/api/inverter/config/ack", 200, "");

    h.handle
        .update(|c| c.minimum_registers = [0, 1].into_iter().collect());

    let ack = h.handler.check_for_update().await.unwrap().unwrap();

    // Interval rejected, register change still applied
    assert!(!ack.all_success);
    assert_eq!(ack.config_ack.rejected.len(), 1);
    assert_eq!(ack.config_ack.rejected[0].parameter, "sampling_interval");
    assert_eq!(ack.config_ack.accepted.len(), 1);
    assert_eq!(ack.config_ack.accepted[0].parameter, "registers");

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.polling_interval_ms, 5_000);
    assert_eq!(
        snapshot.minimum_registers.iter().copied().collect::<Vec<_>>(),
        vec![3, 4]
    );
}

#[tokio::test]
async fn test_register_replacement_applies() {
    let h = harness();
    h.http.on_get(
        "/api/inverter/config",
        200,
        // Not a subset of the current set only if current set is smaller;
        // shrink the current set first
        r#"{"nonce":12,"config_update":{"registers":[3,4,5]}}"#,
    );
    h.http.on_post("/api/inverter/config/ack", 200, "");

    h.handle
        .update(|c| c.minimum_registers = [0, 1].into_iter().collect());

    let ack = h.handler.check_for_update().await.unwrap().unwrap();
    assert!(ack.all_success);
    assert_eq!(ack.config_ack.accepted.len(), 1);

    let snapshot = h.handle.snapshot();
    assert_eq!(
        snapshot.minimum_registers.iter().copied().collect::<Vec<_>>(),
        vec![3, 4, 5]
    );
}

#[tokio::test]
async fn test_no_update_object_is_quiet() {
    let h = harness();
    h.http.on_get("/api/inverter/config", 200, r#"{"status":"ok"}"#);

    let result = h.handler.check_for_update().await.unwrap();
    assert!(result.is_none());
    assert!(h.http.requests_to("/ack").is_empty());
}

#[tokio::test]
async fn test_transport_failure_is_swallowed_by_tick() {
    let h = harness();
    h.http.on_get("/api/inverter/config", 500, "");

    // tick logs and swallows; the direct call reports the error
    h.handler.tick().await;
    assert!(h.handler.check_for_update().await.is_err());
    assert!(h.http.requests_to("/ack").is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_protocol_error() {
    let h = harness();
    h.http.on_get("/api/inverter/config", 200, "{broken");

    assert!(h.handler.check_for_update().await.is_err());
}

#[tokio::test]
async fn test_duplicate_nonce_acknowledged_unchanged() {
    let h = harness();
    h.http.on_get(
        "/api/inverter/config",
        200,
        r#"{"nonce":9,"config_update":{"sampling_interval":30}}"#,
    );
    h.http.on_post("/api/inverter/config/ack", 200, "");

    let first = h.handler.check_for_update().await.unwrap().unwrap();
    assert!(first.all_success);

    let second = h.handler.check_for_update().await.unwrap().unwrap();
    assert!(!second.all_success);
    assert_eq!(second.config_ack.unchanged.len(), 1);
    assert_eq!(second.config_ack.unchanged[0].parameter, "request");

    // Interval applied exactly once
    assert_eq!(h.handle.snapshot().polling_interval_ms, 30_000);
}

#[tokio::test]
async fn test_duplicate_nonce_with_multiple_fields_collapses_to_one_entry() {
    let h = harness();
    h.http.on_get(
        "/api/inverter/config",
        200,
        r#"{"nonce":21,"config_update":{"sampling_interval":45,"registers":[3,4]}}"#,
    );
    h.http.on_post("/api/inverter/config/ack", 200, "");

    h.handle
        .update(|c| c.minimum_registers = [0, 1].into_iter().collect());

    let first = h.handler.check_for_update().await.unwrap().unwrap();
    assert_eq!(first.config_ack.accepted.len(), 2);

    // The replay carries both fields, but the ack does not re-answer them
    // per parameter: the whole request collapses to a single unchanged
    // "request" entry
    let second = h.handler.check_for_update().await.unwrap().unwrap();
    assert!(!second.all_success);
    assert_eq!(second.config_ack.unchanged.len(), 1);
    assert_eq!(second.config_ack.unchanged[0].parameter, "request");
    assert!(second.config_ack.unchanged[0]
        .reason
        .contains("nonce already processed"));
    assert_eq!(second.config_ack.accepted.len(), 0);
    assert_eq!(second.config_ack.rejected.len(), 0);

    // Neither field was applied a second time
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.polling_interval_ms, 45_000);
    assert_eq!(
        snapshot.minimum_registers.iter().copied().collect::<Vec<_>>(),
        vec![3, 4]
    );
}
