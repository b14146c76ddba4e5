// Mock chat completion provider for integration tests
#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures_util::stream;
use parking_lot::Mutex;
use serde_json::{json, Value};

pub const MOCK_API_KEY: &str = "test-key";

/// Frames streamed back on a successful request, in order.
pub fn default_frames() -> Vec<String> {
    vec![
        sse_delta("Hello"),
        ": keep-alive\n\n".to_string(),
        "data: {not json}\n\n".to_string(),
        sse_delta(", 世界"),
        "data: {\"choices\":[{\"delta\":{}}]}\n\n".to_string(),
        sse_delta("!"),
        "data: [DONE]\n\n".to_string(),
    ]
}

pub fn sse_delta(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "choices": [{ "delta": { "content": content } }] })
    )
}

#[derive(Clone)]
pub struct MockProviderConfig {
    pub api_key: String,
    pub frames: Vec<String>,
    /// Pause between frames
    pub frame_delay: Duration,
    /// Drop the connection after the last frame instead of ending the body
    pub cut_off: bool,
}

impl Default for MockProviderConfig {
    fn default() -> Self {
        Self {
            api_key: MOCK_API_KEY.to_string(),
            frames: default_frames(),
            frame_delay: Duration::from_millis(5),
            cut_off: false,
        }
    }
}

struct ProviderState {
    config: MockProviderConfig,
    requests: AtomicUsize,
    last_body: Mutex<Option<Value>>,
    last_auth: Mutex<Option<String>>,
}

pub struct MockProvider {
    state: Arc<ProviderState>,
    url: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockProvider {
    pub async fn start(config: MockProviderConfig) -> Self {
        let state = Arc::new(ProviderState {
            config,
            requests: AtomicUsize::new(0),
            last_body: Mutex::new(None),
            last_auth: Mutex::new(None),
        });

        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock provider");
        let addr = listener.local_addr().expect("mock provider addr");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                eprintln!("Mock provider error: {}", e);
            }
        });

        Self {
            state,
            url: format!("http://{}/v1/chat/completions", addr),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Value> {
        self.state.last_body.lock().clone()
    }

    pub fn last_auth(&self) -> Option<String> {
        self.state.last_auth.lock().clone()
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn chat_completions_handler(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock() = Some(body);

    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *state.last_auth.lock() = auth.clone();

    let expected = format!("Bearer {}", state.config.api_key);
    if auth.as_deref() != Some(expected.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": {
                    "type": "invalid_api_key",
                    "message": "Incorrect API key provided"
                }
            })),
        )
            .into_response();
    }

    let delay = state.config.frame_delay;
    let frames = state.config.frames.clone();
    let cut_off = state.config.cut_off;
    let body_stream = stream::unfold(
        (frames.into_iter(), cut_off),
        move |(mut frames, cut_off)| async move {
            tokio::time::sleep(delay).await;
            match frames.next() {
                Some(frame) => Some((Ok(frame), (frames, cut_off))),
                // A body error makes the server reset the connection mid-body
                None if cut_off => Some((
                    Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "upstream cut off",
                    )),
                    (frames, false),
                )),
                None => None,
            }
        },
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body_stream))
        .unwrap()
}
