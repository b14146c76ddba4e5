//! Client <-> server WebSocket message protocol.

use serde::{Deserialize, Serialize};

use super::chat::ChatMessage;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

// ============================================================================
// Client -> server
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "stream")]
    Stream(StreamRequest),

    #[serde(rename = "control")]
    Control(ControlRequest),

    #[serde(rename = "getClientCount")]
    GetClientCount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    pub model: String,

    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<StreamMode>,
}

impl StreamRequest {
    pub fn is_speed_test(&self) -> bool {
        self.mode == Some(StreamMode::SpeedTest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    SpeedTest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,

    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
}

impl ControlAction {
    pub fn outcome(self) -> ControlOutcome {
        match self {
            ControlAction::Pause => ControlOutcome::Paused,
            ControlAction::Resume => ControlOutcome::Resumed,
            ControlAction::Cancel => ControlOutcome::Cancelled,
        }
    }
}

// ============================================================================
// Server -> client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    Chunk {
        content: String,
        sequence: u64,
    },
    Error {
        content: String,
        /// Absent for errors that belong to no stream
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
    },
    Complete {
        sequence: u64,
    },
    ConnectionCount {
        count: usize,
    },
    Control {
        action: ControlOutcome,
    },
}

impl ServerEvent {
    pub fn connection_error(content: impl Into<String>) -> Self {
        ServerEvent::Error {
            content: content.into(),
            sequence: None,
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail: every field is a plain
        // string or integer.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlOutcome {
    Paused,
    Resumed,
    Cancelled,
}
