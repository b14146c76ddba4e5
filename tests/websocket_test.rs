mod common;

use std::time::Duration;

use common::{
    create_state,
    mock_provider::{self, MockProvider, MockProviderConfig, MOCK_API_KEY},
    test_config, wait_until, TestServer, EVENT_TIMEOUT,
};
use prompt_relay::config::RelayBackend;
use serde_json::{json, Value};

async fn http_relay_server(provider: &MockProvider, api_key: &str) -> (TestServer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.relay.backend = RelayBackend::Http;
    config
        .relay
        .endpoint_overrides
        .insert("kimi".to_string(), provider.url().to_string());
    let state = create_state(config, &[("KIMI_API_KEY", api_key)]);
    (TestServer::start(state).await, dir)
}

async fn mock_relay_server() -> (TestServer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = create_state(test_config(dir.path()), &[("KIMI_API_KEY", MOCK_API_KEY)]);
    (TestServer::start(state).await, dir)
}

fn stream_request(model: &str, text: &str) -> Value {
    json!({
        "type": "stream",
        "model": model,
        "messages": [{ "role": "user", "content": text }],
        "temperature": 1.5
    })
}

#[tokio::test]
async fn test_stream_through_http_relay() {
    let provider = MockProvider::start(MockProviderConfig::default()).await;
    let (server, _dir) = http_relay_server(&provider, MOCK_API_KEY).await;

    let mut client = server.connect().await;
    let greeting = client.next_of_type("connectionCount", EVENT_TIMEOUT).await;
    assert_eq!(greeting.unwrap()["count"], 1);

    client.send_json(stream_request("kimi", "Say hello")).await;
    let events = client.collect_stream(EVENT_TIMEOUT).await;

    let chunks: Vec<&Value> = events.iter().filter(|e| e["type"] == "chunk").collect();
    let text: String = chunks
        .iter()
        .map(|e| e["content"].as_str().unwrap())
        .collect();
    assert_eq!(text, "Hello, 世界!");
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk["sequence"], i as u64);
    }

    let last = events.last().unwrap();
    assert_eq!(last["type"], "complete");
    assert_eq!(last["sequence"], chunks.len() as u64);

    // Upstream request shape
    assert_eq!(provider.request_count(), 1);
    assert_eq!(provider.last_auth().as_deref(), Some("Bearer test-key"));
    let body = provider.last_body().unwrap();
    assert_eq!(body["model"], "moonshot-v1-8k");
    assert_eq!(body["stream"], true);
    assert_eq!(body["temperature"], 1.0);
    assert!(body["max_tokens"].as_u64().unwrap() <= 4096);

    let stats = server.state.sessions.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 1);

    let status: Value = reqwest::get(server.http_url("/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["sessions"]["completed"], 1);

    client.close().await;
}

#[tokio::test]
async fn test_upstream_rejection_yields_single_error() {
    let provider = MockProvider::start(MockProviderConfig::default()).await;
    let (server, _dir) = http_relay_server(&provider, "wrong-key").await;

    let mut client = server.connect().await;
    client.send_json(stream_request("kimi", "hello")).await;

    let events = client.collect_stream(EVENT_TIMEOUT).await;
    assert_eq!(events.len(), 1);
    let error = &events[0];
    assert_eq!(error["type"], "error");
    assert_eq!(error["sequence"], 0);
    let message = error["content"].as_str().unwrap();
    assert!(message.starts_with("API request failed (401)"), "{}", message);
    assert!(message.contains("invalid_api_key"));

    // No completion follows an error
    let trailing = client
        .next_of_type("complete", Duration::from_millis(200))
        .await;
    assert!(trailing.is_none());

    let stats = server.state.sessions.stats();
    assert_eq!(stats.error, 1);
}

#[tokio::test]
async fn test_cut_off_upstream_ends_in_error() {
    let provider = MockProvider::start(MockProviderConfig {
        frames: vec![mock_provider::sse_delta("Hel")],
        cut_off: true,
        ..Default::default()
    })
    .await;
    let (server, _dir) = http_relay_server(&provider, MOCK_API_KEY).await;

    let mut client = server.connect().await;
    client.send_json(stream_request("kimi", "hello")).await;

    let events = client.collect_stream(EVENT_TIMEOUT).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "chunk");
    assert_eq!(events[0]["content"], "Hel");
    assert_eq!(events[1]["type"], "error");
    assert_eq!(events[1]["sequence"], 1);

    let trailing = client
        .next_of_type("complete", Duration::from_millis(200))
        .await;
    assert!(trailing.is_none());

    let stats = server.state.sessions.stats();
    assert_eq!(stats.error, 1);
    assert_eq!(stats.completed, 0);
}

#[tokio::test]
async fn test_unknown_model_reports_error_without_session() {
    let (server, _dir) = mock_relay_server().await;
    let mut client = server.connect().await;

    client.send_json(stream_request("no-such-model", "hello")).await;
    let events = client.collect_stream(EVENT_TIMEOUT).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert_eq!(events[0]["content"], "Unknown model: no-such-model");
    assert!(server.state.sessions.is_empty());
}

#[tokio::test]
async fn test_mock_relay_greeting() {
    let (server, _dir) = mock_relay_server().await;
    let mut client = server.connect().await;

    client.send_json(stream_request("deepseek", "hi there")).await;
    let events = client.collect_stream(EVENT_TIMEOUT).await;
    let text: String = events
        .iter()
        .filter(|e| e["type"] == "chunk")
        .map(|e| e["content"].as_str().unwrap())
        .collect();
    assert_eq!(text.trim_end(), "你好！Hello! 这是一个测试响应。");
    assert_eq!(events.last().unwrap()["type"], "complete");
}

#[tokio::test]
async fn test_speed_test_excluded_from_client_count() {
    let (server, _dir) = mock_relay_server().await;

    let mut client = server.connect().await;
    client.next_of_type("connectionCount", EVENT_TIMEOUT).await;
    assert_eq!(server.state.manager.client_count(), 1);

    client
        .send_json(json!({
            "type": "stream",
            "model": "kimi",
            "mode": "speed_test",
            "messages": [{ "role": "user", "content": "ping" }]
        }))
        .await;

    let events = client.collect_stream(EVENT_TIMEOUT).await;
    assert_eq!(events.last().unwrap()["type"], "complete");

    assert_eq!(server.state.manager.client_count(), 0);
    assert_eq!(server.state.manager.connection_count(), 1);
    // Speed tests never register sessions
    assert!(server.state.sessions.is_empty());

    client.send_json(json!({ "type": "getClientCount" })).await;
    let count = client.next_of_type("connectionCount", EVENT_TIMEOUT).await;
    assert_eq!(count.unwrap()["count"], 0);
}

#[tokio::test]
async fn test_cancel_unknown_session() {
    let (server, _dir) = mock_relay_server().await;
    let mut client = server.connect().await;

    client
        .send_json(json!({
            "type": "control",
            "action": "cancel",
            "sessionId": "does-not-exist"
        }))
        .await;

    let event = client.next_of_type("error", EVENT_TIMEOUT).await.unwrap();
    assert_eq!(event["content"], "Session not found");
    assert!(event.get("sequence").is_none());
    assert!(server.state.sessions.is_empty());
}

#[tokio::test]
async fn test_invalid_json_reports_error() {
    let (server, _dir) = mock_relay_server().await;
    let mut client = server.connect().await;

    client.send_raw("{not json").await;
    let event = client.next_of_type("error", EVENT_TIMEOUT).await.unwrap();
    assert_eq!(event["content"], "Invalid request format");

    // Connection stays usable
    client.send_json(json!({ "type": "getClientCount" })).await;
    assert!(client
        .next_of_type("connectionCount", EVENT_TIMEOUT)
        .await
        .is_some());
}

#[tokio::test]
async fn test_disconnect_completes_bound_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.relay.mock_chunk_delay = Duration::from_millis(50);
    let server = TestServer::start(create_state(config, &[])).await;

    let mut client = server.connect().await;
    client.send_json(stream_request("deepseek", "tell me a story")).await;
    client.next_of_type("chunk", EVENT_TIMEOUT).await.unwrap();
    assert_eq!(server.state.sessions.stats().active, 1);

    client.close().await;

    let sessions = server.state.sessions.clone();
    assert!(wait_until(EVENT_TIMEOUT, || sessions.stats().completed == 1).await);
    let manager = server.state.manager.clone();
    assert!(wait_until(EVENT_TIMEOUT, || manager.connection_count() == 0).await);
}
