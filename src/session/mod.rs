//! In-memory conversation sessions.

mod registry;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use registry::{SessionRegistry, SessionStats};

use crate::protocols::chat::ChatMessage;

/// Prefix of ephemeral ids used by speed tests; never stored.
pub const SPEED_TEST_PREFIX: &str = "speed_test_";

pub fn is_speed_test_id(session_id: &str) -> bool {
    session_id.starts_with(SPEED_TEST_PREFIX)
}

/// `speed_test_<model>_<unix millis>`
pub fn speed_test_session_id(model: &str) -> String {
    format!(
        "{}{}_{}",
        SPEED_TEST_PREFIX,
        model,
        Utc::now().timestamp_millis()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub model: String,
    pub temperature: f64,
    pub messages: Vec<ChatMessage>,
    /// Characters emitted to the client so far
    pub stream_position: usize,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
