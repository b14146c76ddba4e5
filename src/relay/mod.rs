//! Streaming relay between the proxy and upstream chat completion APIs.
//!
//! A relay drives one stream request to the end and reports progress through
//! a [`StreamHandler`]. Every request ends in exactly one of `on_error` or
//! `on_complete`.

mod error;
mod http_relay;
mod mock;
pub mod sse;

use std::sync::Arc;

use async_trait::async_trait;

pub use self::error::{compose_upstream_error, RelayError};
pub use self::http_relay::HttpRelay;
pub use self::mock::MockRelay;
use crate::{
    config::{RelayBackend, RelayConfig},
    protocols::chat::ChatMessage,
    providers::ProviderRegistry,
    session::{is_speed_test_id, SessionRegistry},
};

#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub session_id: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

/// Receives the output of one stream.
pub trait StreamHandler: Send {
    fn on_chunk(&mut self, content: &str);
    fn on_error(&mut self, message: &str);
    fn on_complete(&mut self);
}

#[async_trait]
pub trait StreamRelay: Send + Sync {
    async fn stream_request(&self, request: RelayRequest, handler: &mut dyn StreamHandler);

    fn name(&self) -> &'static str;
}

/// Tracks characters emitted for a session and mirrors them into the registry.
pub(crate) struct StreamCursor<'a> {
    sessions: &'a SessionRegistry,
    session_id: &'a str,
    position: usize,
    tracked: bool,
}

impl<'a> StreamCursor<'a> {
    pub fn new(sessions: &'a SessionRegistry, session_id: &'a str) -> Self {
        Self {
            sessions,
            session_id,
            position: 0,
            tracked: !is_speed_test_id(session_id),
        }
    }

    pub fn advance(&mut self, fragment: &str) {
        self.position += fragment.chars().count();
        if self.tracked {
            self.sessions
                .update_stream_position(self.session_id, self.position);
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// Build the relay selected by configuration.
pub fn create_relay(
    config: &RelayConfig,
    providers: Arc<ProviderRegistry>,
    sessions: Arc<SessionRegistry>,
) -> Result<Arc<dyn StreamRelay>, RelayError> {
    let relay: Arc<dyn StreamRelay> = match config.backend {
        RelayBackend::Http => Arc::new(HttpRelay::new(
            providers,
            sessions,
            config.connect_timeout,
        )?),
        RelayBackend::Mock => Arc::new(MockRelay::new(sessions, config.mock_chunk_delay)),
    };
    Ok(relay)
}
