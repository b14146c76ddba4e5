use std::{collections::HashMap, path::PathBuf, time::Duration};

use clap::{ArgAction, Parser, ValueEnum};
use prompt_relay::{
    config::{
        parse_endpoint_override, ConfigResult, HeartbeatConfig, QueueConfig, RelayBackend,
        RelayConfig, ServerConfig, SessionConfig,
    },
    observability::logging::{parse_level, LoggingConfig},
    server,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Relay {
    #[value(name = "http")]
    Http,
    #[value(name = "mock")]
    Mock,
}

impl From<Relay> for RelayBackend {
    fn from(relay: Relay) -> Self {
        match relay {
            Relay::Http => RelayBackend::Http,
            Relay::Mock => RelayBackend::Mock,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "prompt-relay")]
#[command(about = "Streaming chat relay in front of multiple LLM providers")]
#[command(long_about = r#"
Prompt Relay - WebSocket streaming relay for hosted LLM chat APIs

Provider API keys are read from the environment (KIMI_API_KEY,
ALIYUN_API_KEY, VOLCES_API_KEY, ...).

Examples:
  # Relay to real providers
  prompt-relay --port 3001

  # Canned replies, no upstream traffic
  prompt-relay --relay mock --mock-chunk-delay-ms 50

  # Point one model at a local endpoint
  prompt-relay --endpoint-override kimi=http://127.0.0.1:9000/v1/chat/completions
"#)]
struct CliArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,

    #[arg(long, env = "MAX_CONCURRENT_STREAMS", default_value_t = 4)]
    max_concurrent_streams: usize,

    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    heartbeat_interval_secs: u64,

    #[arg(long, env = "COMPLETE_DELAY_MS", default_value_t = 1000)]
    complete_delay_ms: u64,

    #[arg(long, env = "SESSION_MAX_AGE_HOURS", default_value_t = 24)]
    session_max_age_hours: u64,

    #[arg(long, default_value_t = 3600)]
    session_sweep_interval_secs: u64,

    #[arg(long, env = "RELAY_BACKEND", value_enum, default_value_t = Relay::Http)]
    relay: Relay,

    #[arg(long, default_value_t = 200)]
    mock_chunk_delay_ms: u64,

    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,

    /// Override a model's upstream URL, as <model>=<url>
    #[arg(long, action = ArgAction::Append)]
    endpoint_override: Vec<String>,

    #[arg(long, env = "AGENT_DATA_DIR", default_value = "data/ai-agents")]
    agent_data_dir: PathBuf,

    /// Bearer token required by admin endpoints
    #[arg(long, env = "ADMIN_API_KEY")]
    admin_api_key: Option<String>,

    #[arg(long, num_args = 0.., value_delimiter = ',')]
    cors_allowed_origins: Vec<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: String,

    #[arg(long)]
    log_dir: Option<String>,

    #[arg(long, default_value_t = false)]
    log_json: bool,
}

impl CliArgs {
    fn endpoint_overrides(&self) -> ConfigResult<HashMap<String, String>> {
        self.endpoint_override
            .iter()
            .map(|raw| parse_endpoint_override(raw))
            .collect()
    }

    fn to_server_config(&self) -> ConfigResult<ServerConfig> {
        Ok(ServerConfig {
            host: self.host.clone(),
            port: self.port,
            queue: QueueConfig {
                max_concurrent: self.max_concurrent_streams,
            },
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(self.heartbeat_interval_secs),
            },
            session: SessionConfig {
                max_age_hours: self.session_max_age_hours,
                sweep_interval: Duration::from_secs(self.session_sweep_interval_secs),
            },
            relay: RelayConfig {
                backend: self.relay.into(),
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                mock_chunk_delay: Duration::from_millis(self.mock_chunk_delay_ms),
                endpoint_overrides: self.endpoint_overrides()?,
            },
            complete_delay: Duration::from_millis(self.complete_delay_ms),
            agent_data_dir: self.agent_data_dir.clone(),
            admin_api_key: self.admin_api_key.clone(),
            cors_allowed_origins: self.cors_allowed_origins.clone(),
            log: LoggingConfig {
                level: parse_level(&self.log_level),
                json_format: self.log_json,
                log_dir: self.log_dir.clone(),
                ..Default::default()
            },
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli_args = CliArgs::parse();

    println!("Prompt Relay starting...");
    println!("Host: {}:{}", cli_args.host, cli_args.port);
    println!("Relay: {:?}", cli_args.relay);
    println!("Max concurrent streams: {}", cli_args.max_concurrent_streams);

    let server_config = cli_args.to_server_config()?;
    server_config.validate()?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move { server::startup(server_config).await })?;
    Ok(())
}
