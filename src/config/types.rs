use std::{collections::HashMap, path::PathBuf, time::Duration};

use super::{ConfigError, ConfigResult};
use crate::observability::logging::LoggingConfig;

/// Which relay implementation serves stream requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayBackend {
    /// Forward to the real upstream provider APIs.
    #[default]
    Http,
    /// Reply with canned text; no network traffic.
    Mock,
}

impl std::fmt::Display for RelayBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayBackend::Http => write!(f, "http"),
            RelayBackend::Mock => write!(f, "mock"),
        }
    }
}

/// Admission control in front of the streaming relay.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of stream requests in flight at once
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping rounds; a peer that misses one round is dropped
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_age_hours: u64,
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub backend: RelayBackend,
    pub connect_timeout: Duration,
    /// Delay between words emitted by the mock relay
    pub mock_chunk_delay: Duration,
    /// Per model id endpoint URL overrides
    pub endpoint_overrides: HashMap<String, String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: RelayBackend::Http,
            connect_timeout: Duration::from_secs(10),
            mock_chunk_delay: Duration::from_millis(200),
            endpoint_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub queue: QueueConfig,
    pub heartbeat: HeartbeatConfig,
    pub session: SessionConfig,
    pub relay: RelayConfig,
    /// Delay before the `complete` event so clients can flush buffered chunks
    pub complete_delay: Duration,
    pub agent_data_dir: PathBuf,
    /// Placeholder bearer token for admin endpoints; `None` leaves them open
    pub admin_api_key: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub log: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            queue: QueueConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            session: SessionConfig::default(),
            relay: RelayConfig::default(),
            complete_delay: Duration::from_secs(1),
            agent_data_dir: PathBuf::from("data/ai-agents"),
            admin_api_key: None,
            cors_allowed_origins: Vec::new(),
            log: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_streams".to_string(),
                value: "0".to_string(),
                reason: "at least one stream must be allowed in flight".to_string(),
            });
        }
        if self.heartbeat.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_interval".to_string(),
                value: "0".to_string(),
                reason: "heartbeat interval must be positive".to_string(),
            });
        }
        if self.session.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "session_sweep_interval".to_string(),
                value: "0".to_string(),
                reason: "sweep interval must be positive".to_string(),
            });
        }
        for (model, url) in &self.relay.endpoint_overrides {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: format!("endpoint_override[{}]", model),
                    value: url.clone(),
                    reason: "endpoint must be an http(s) URL".to_string(),
                });
            }
        }
        if matches!(&self.admin_api_key, Some(key) if key.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed {
                reason: "admin api key must not be blank".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a `model=url` endpoint override argument.
pub fn parse_endpoint_override(raw: &str) -> ConfigResult<(String, String)> {
    match raw.split_once('=') {
        Some((model, url)) if !model.trim().is_empty() && !url.trim().is_empty() => {
            Ok((model.trim().to_string(), url.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidValue {
            field: "endpoint_override".to_string(),
            value: raw.to_string(),
            reason: "expected <model>=<url>".to_string(),
        }),
    }
}
