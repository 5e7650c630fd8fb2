//! Integration tests for the WhatsApp relay
//!
//! These tests run the facades and the automation loop against an in-process
//! fake bridge bound to a loopback port.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use whatsapp_relay::accounts::{AccountRegistry, BridgeSupervisor};
use whatsapp_relay::automation::Automation;
use whatsapp_relay::bridge::BridgeClient;
use whatsapp_relay::config::{BridgeMode, Config, PROCESSED_WINDOW};
use whatsapp_relay::multi::{self, MultiState};
use whatsapp_relay::relay::{self, RelayState};
use whatsapp_relay::store::{AutomationConfig, AutomationState};

/// Requests the fake bridge received on `POST /send`
type SentLog = Arc<Mutex<Vec<Value>>>;

/// Payload the fake bridge answers `GET /messages` with
type Inbox = Arc<Mutex<Value>>;

#[derive(Clone)]
struct FakeBridge {
    sent: SentLog,
    inbox: Inbox,
}

async fn serve_app(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a bridge that reports connected, serves `inbox` and records sends
async fn spawn_fake_bridge(inbox: Value) -> (std::net::SocketAddr, SentLog) {
    spawn_fake_bridge_with(Arc::new(Mutex::new(inbox))).await
}

/// Same as `spawn_fake_bridge`, with an inbox the test can swap between cycles
async fn spawn_fake_bridge_with(inbox: Inbox) -> (std::net::SocketAddr, SentLog) {
    let sent: SentLog = Arc::new(Mutex::new(Vec::new()));
    let fake = FakeBridge {
        sent: sent.clone(),
        inbox,
    };

    let app = Router::new()
        .route("/status", get(|| async { Json(json!({"connected": true})) }))
        .route(
            "/messages",
            get(|State(fake): State<FakeBridge>| async move {
                let inbox = fake.inbox.lock().unwrap().clone();
                Json(inbox)
            }),
        )
        .route(
            "/send",
            post(
                |State(fake): State<FakeBridge>, Json(body): Json<Value>| async move {
                    fake.sent.lock().unwrap().push(body);
                    Json(json!({"success": true}))
                },
            ),
        )
        .with_state(fake);

    (serve_app(app).await, sent)
}

fn sent_bodies(log: &SentLog) -> Vec<Value> {
    log.lock().unwrap().clone()
}

// ============================================================================
// Single-account facade
// ============================================================================

/// Offline sends are simulated and show up in GET /messages
#[tokio::test]
async fn test_relay_offline_simulation() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::for_test(temp_dir.path());
    let state = Arc::new(RelayState::new(&config));
    let base = format!("http://{}", serve_app(relay::router(state)).await);
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{}/send", base))
        .json(&json!({"to": "+4917012345", "message": "hallo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "simulated");
    assert_eq!(body["message"]["to"], "+4917012345");

    let messages: Value = http
        .get(format!("{}/messages?limit=5", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(messages.as_array().unwrap().len(), 1);
    assert_eq!(messages[0]["message"], "hallo");

    let status: Value = http
        .get(format!("{}/bridge_status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["bridge_online"], false);
    assert_eq!(status["simulation_mode"], true);
}

/// Missing `to` or `message` is rejected before touching the bridge
#[tokio::test]
async fn test_relay_rejects_incomplete_send() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::for_test(temp_dir.path());
    let state = Arc::new(RelayState::new(&config));
    let base = format!("http://{}", serve_app(relay::router(state.clone())).await);
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{}/send", base))
        .json(&json!({"to": "+49"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("message"));

    let resp = http
        .post(format!("{}/send", base))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(state.simulated_count().await, 0);
}

/// Online mode forwards `{to, message}` to the bridge
#[tokio::test]
async fn test_relay_online_forwards() {
    let temp_dir = TempDir::new().unwrap();
    let (bridge_addr, sent) = spawn_fake_bridge(json!({"messages": []})).await;

    let mut config = Config::for_test(temp_dir.path());
    config.bridge_url = format!("http://{}", bridge_addr);
    config.bridge_mode = BridgeMode::Online;
    let base = format!(
        "http://{}",
        serve_app(relay::router(Arc::new(RelayState::new(&config)))).await
    );

    let body: Value = reqwest::Client::new()
        .post(format!("{}/send", base))
        .json(&json!({"to": "+4917012345", "message": "hallo"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "sent");
    assert_eq!(body["bridge_response"]["success"], true);

    let sent = sent_bodies(&sent);
    assert_eq!(sent, vec![json!({"to": "+4917012345", "message": "hallo"})]);
}

/// A dead bridge in online mode yields 200 with an error body
#[tokio::test]
async fn test_relay_online_bridge_down() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::for_test(temp_dir.path());
    config.bridge_url = "http://127.0.0.1:1".to_string();
    config.bridge_mode = BridgeMode::Online;
    let base = format!(
        "http://{}",
        serve_app(relay::router(Arc::new(RelayState::new(&config)))).await
    );
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{}/send", base))
        .json(&json!({"to": "+49", "message": "hallo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");

    let status: Value = http
        .get(format!("{}/bridge_status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["bridge_online"], false);
    assert_eq!(status["error"], "Bridge unreachable");
}

// ============================================================================
// Multi-account facade
// ============================================================================

/// Create an account, then route a send to its bridge by header
#[tokio::test]
async fn test_multi_account_routing() {
    let temp_dir = TempDir::new().unwrap();
    let (bridge_addr, sent) = spawn_fake_bridge(json!({"messages": [{"id": "x"}]})).await;

    let config = Config::for_test(temp_dir.path());
    let state = Arc::new(MultiState::new(
        AccountRegistry::new("127.0.0.1", bridge_addr.port()),
        BridgeSupervisor::new(None, temp_dir.path().to_path_buf()),
        BridgeClient::from_config(&config),
    ));
    let base = format!("http://{}", serve_app(multi::router(state)).await);
    let http = reqwest::Client::new();

    let created: Value = http
        .post(format!("{}/accounts", base))
        .query(&[("user_id", "u1"), ("phone_number", "+4917012345")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let account_id = created["account_id"].as_str().unwrap().to_string();
    assert_eq!(account_id.len(), 8);
    assert_eq!(created["bridge_port"], bridge_addr.port());

    // same user and phone map to the same account
    let again: Value = http
        .post(format!("{}/accounts", base))
        .query(&[("user_id", "u1"), ("phone_number", "+4917012345")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["account_id"], account_id.as_str());

    let body: Value = http
        .post(format!("{}/send", base))
        .header("X-Account-Id", &account_id)
        .json(&json!({"to": "+4915199999", "message": "hi"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "sent");
    assert_eq!(body["account_id"], account_id.as_str());
    assert_eq!(sent_bodies(&sent).len(), 1);

    let messages: Value = http
        .get(format!("{}/messages", base))
        .query(&[("account_id", account_id.as_str())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(messages["messages"][0]["id"], "x");

    let status: Value = http
        .get(format!("{}/accounts/{}/status", base, account_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["bridge_online"], true);

    let listed: Value = http
        .get(format!("{}/accounts", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed[0]["status"], "connected");
}

/// Missing account id is 400, unknown account id is 404
#[tokio::test]
async fn test_multi_account_errors() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::for_test(temp_dir.path());
    let state = Arc::new(MultiState::new(
        AccountRegistry::new("127.0.0.1", 3000),
        BridgeSupervisor::new(None, temp_dir.path().to_path_buf()),
        BridgeClient::from_config(&config),
    ));
    let base = format!("http://{}", serve_app(multi::router(state)).await);
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{}/send", base))
        .json(&json!({"to": "+49", "message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = http
        .post(format!("{}/send", base))
        .header("X-Account-Id", "deadbeef")
        .json(&json!({"to": "+49", "message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = http
        .post(format!("{}/send", base))
        .header("X-Account-Id", "deadbeef")
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["detail"].is_string());

    let resp = http
        .post(format!("{}/accounts", base))
        .query(&[("user_id", "u1")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

/// Accounts survive a reload and new ports continue after the stored ones
#[test]
fn test_account_registry_persistence() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::for_test(temp_dir.path());

    let mut registry = AccountRegistry::persistent(&config);
    let (first, _) = registry.create_account("u1", "+491", None).unwrap();
    let (second, _) = registry.create_account("u2", "+492", Some("Zweiter")).unwrap();
    registry.save().unwrap();
    assert_eq!(second.bridge_port, first.bridge_port + 1);

    let mut reloaded = AccountRegistry::persistent(&config);
    assert_eq!(reloaded.load().unwrap(), 2);
    assert_eq!(
        reloaded.get(&second.account_id).unwrap().display_name.as_deref(),
        Some("Zweiter")
    );

    let (third, created) = reloaded.create_account("u3", "+493", None).unwrap();
    assert!(created);
    assert_eq!(third.bridge_port, second.bridge_port + 1);
    assert_eq!(
        third.display_name,
        Some(format!("User_{}", third.account_id))
    );
}

// ============================================================================
// Automation
// ============================================================================

fn busy_rules(config: &Config) {
    let rules = AutomationConfig {
        auto_reply_keywords: vec!["arbeit".to_string()],
        auto_reply_message: "busy".to_string(),
        intelligent_responses: Default::default(),
        ..AutomationConfig::default()
    };
    rules.save(&config.automation_config_file).unwrap();
}

/// A matching inbound message gets exactly one reply across cycles
#[tokio::test]
async fn test_automation_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let inbox = json!({"messages": [
        {"id": "m1", "phone": "+4917012345", "text": "wann ist die arbeit fertig", "type": "received"},
        {"id": "m2", "phone": "+4917012345", "text": "arbeit?", "type": "sent"},
        {"phone": "+4917012345", "text": "arbeit ohne id", "type": "received"}
    ]});
    let (bridge_addr, sent) = spawn_fake_bridge(inbox).await;

    let mut config = Config::for_test(temp_dir.path());
    config.bridge_url = format!("http://{}", bridge_addr);
    busy_rules(&config);

    let mut automation = Automation::new(&config);
    let report = automation.run_cycle().await;
    assert!(report.bridge_available);
    assert!(report.success);
    assert_eq!(report.processing_result.processed, 1);
    assert_eq!(report.processing_result.replies_sent, 1);
    assert_eq!(
        sent_bodies(&sent),
        vec![json!({"to": "+4917012345", "message": "busy"})]
    );

    let state = AutomationState::load(&config.state_file);
    assert_eq!(state.processed_messages, vec!["m1".to_string()]);
    assert_eq!(state.last_message_id.as_deref(), Some("m1"));
    assert_eq!(state.auto_replies_sent, 1);
    assert_eq!(state.total_messages_processed, 1);

    // a fresh process picks up the persisted state and does not reply again
    let mut restarted = Automation::new(&config);
    let report = restarted.run_cycle().await;
    assert_eq!(report.processing_result.processed, 0);
    assert_eq!(report.processing_result.replies_sent, 0);
    assert_eq!(sent_bodies(&sent).len(), 1);
    assert_eq!(restarted.state().auto_replies_sent, 1);
}

/// With the bridge down the cycle falls back to the mock message
#[tokio::test]
async fn test_automation_offline_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::for_test(temp_dir.path());
    config.bridge_url = "http://127.0.0.1:1".to_string();

    let mut automation = Automation::new(&config);
    let report = automation.run_cycle().await;
    assert!(!report.bridge_available);
    assert!(report.success);
    assert_eq!(report.processing_result.processed, 1);
    assert_eq!(
        report.processing_result.messages[0].phone,
        config.target_phone
    );
}

fn single_message(id: &str, timestamp: Value) -> Value {
    json!({"messages": [
        {"id": id, "phone": "+4917012345", "text": "arbeit?", "type": "received", "timestamp": timestamp}
    ]})
}

/// An id pushed out of the window by newer ones is answered again
#[tokio::test]
async fn test_evicted_id_gets_second_reply() {
    let temp_dir = TempDir::new().unwrap();
    let inbox: Inbox = Arc::new(Mutex::new(single_message("m0", json!(1700000000))));
    let (bridge_addr, sent) = spawn_fake_bridge_with(inbox.clone()).await;

    let mut config = Config::for_test(temp_dir.path());
    config.bridge_url = format!("http://{}", bridge_addr);
    busy_rules(&config);
    let mut automation = Automation::new(&config);

    let report = automation.run_cycle().await;
    assert_eq!(report.processing_result.replies_sent, 1);

    // still inside the window: no second reply
    let report = automation.run_cycle().await;
    assert_eq!(report.processing_result.replies_sent, 0);

    for i in 1..=PROCESSED_WINDOW {
        *inbox.lock().unwrap() = single_message(&format!("m{}", i), json!(1700000000 + i));
        let report = automation.run_cycle().await;
        assert_eq!(report.processing_result.replies_sent, 1);
    }
    assert!(!automation.state().is_processed("m0"));

    *inbox.lock().unwrap() = single_message("m0", json!(1700000000));
    let report = automation.run_cycle().await;
    assert_eq!(report.processing_result.processed, 1);
    assert_eq!(report.processing_result.replies_sent, 1);

    let sent = sent_bodies(&sent);
    assert_eq!(sent.len(), PROCESSED_WINDOW + 2);
    assert!(sent.iter().all(|b| b["message"] == "busy"));
    assert_eq!(automation.state().auto_replies_sent, PROCESSED_WINDOW as u64 + 2);
}

/// Only the newest ids stay in the dedupe window
#[test]
fn test_processed_window_eviction() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("automation_state.json");
    let mut state = AutomationState::default();

    for i in 0..=PROCESSED_WINDOW {
        state.record_processed(&format!("id-{}", i));
    }
    state.save(&path).unwrap();

    let reloaded = AutomationState::load(&path);
    assert_eq!(reloaded.processed_messages.len(), PROCESSED_WINDOW);
    assert!(!reloaded.is_processed("id-0"));
    assert!(reloaded.is_processed(&format!("id-{}", PROCESSED_WINDOW)));
    assert_eq!(reloaded.total_messages_processed, PROCESSED_WINDOW as u64 + 1);
}

/// Partial config files keep defaults for the keys they omit
#[test]
fn test_partial_config_merges_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("automation_config.json");
    std::fs::write(&path, r#"{"auto_reply_message": "später"}"#).unwrap();

    let config = AutomationConfig::load(&path);
    assert_eq!(config.auto_reply_message, "später");
    assert!(config.auto_reply_enabled);
    assert_eq!(config.message_check_interval, 300);
    assert_eq!(config.intelligent_responses.len(), 3);
}
