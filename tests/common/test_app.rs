#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use prompt_relay::{
    config::{RelayBackend, ServerConfig},
    providers::StaticCredentials,
    server::{build_app, AppState},
};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Config tuned for tests: short delays, mock relay, agents under `data_dir`.
pub fn test_config(data_dir: &std::path::Path) -> ServerConfig {
    let mut config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        complete_delay: Duration::from_millis(20),
        agent_data_dir: data_dir.to_path_buf(),
        ..Default::default()
    };
    config.relay.backend = RelayBackend::Mock;
    config.relay.mock_chunk_delay = Duration::from_millis(1);
    config
}

pub fn create_state(config: ServerConfig, keys: &[(&str, &str)]) -> Arc<AppState> {
    let credentials = StaticCredentials::new(keys.iter().map(|(k, v)| (*k, *v)));
    AppState::new(config, Arc::new(credentials)).expect("app state")
}

pub fn create_test_app(state: Arc<AppState>) -> Router {
    build_app(state)
}

/// A relay server bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(state: Arc<AppState>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = listener.local_addr().expect("test server addr");
        let app = build_app(state.clone());

        let handle = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/websocket", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect(&self) -> WsClient {
        let (socket, _) = tokio_tungstenite::connect_async(self.ws_url())
            .await
            .expect("websocket connect");
        WsClient { socket }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct WsClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send_json(&mut self, value: Value) {
        self.socket
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.socket
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("send");
    }

    /// Next JSON event, skipping control frames. `None` on timeout or close.
    pub async fn next_event(&mut self, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.socket.next())
                .await
                .ok()??;
            match frame.ok()? {
                Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Next event of the given `type`, discarding others.
    pub async fn next_of_type(&mut self, kind: &str, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = self.next_event(remaining).await?;
            if event["type"] == kind {
                return Some(event);
            }
        }
    }

    /// Collect stream events until `complete` or `error`.
    pub async fn collect_stream(&mut self, timeout: Duration) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut events = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Some(event) = self.next_event(remaining).await else {
                return events;
            };
            match event["type"].as_str() {
                Some("connectionCount") => continue,
                Some("complete") | Some("error") => {
                    events.push(event);
                    return events;
                }
                _ => events.push(event),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}
