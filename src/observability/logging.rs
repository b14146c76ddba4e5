//! Logging setup with optional non-blocking file output.

use std::path::PathBuf;

use tracing::{Level, Subscriber};
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    fmt::{time::ChronoUtc, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DEFAULT_LOG_TARGET: &str = "prompt_relay";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub json_format: bool,
    pub log_dir: Option<String>,
    pub colorize: bool,
    pub log_file_name: String,
    pub log_targets: Option<Vec<String>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            log_dir: None,
            colorize: true,
            log_file_name: "prompt-relay".to_string(),
            log_targets: Some(vec![
                DEFAULT_LOG_TARGET.to_string(),
                "tower_http".to_string(),
            ]),
        }
    }
}

/// Keeps the file appender worker alive; drop it only at shutdown.
#[allow(dead_code)]
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn parse_level(raw: &str) -> Level {
    match raw.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

const fn level_to_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

fn build_filter_string(targets: &[String], level_filter: &str) -> String {
    targets
        .iter()
        .map(|target| format!("{}={}", target, level_filter))
        .collect::<Vec<_>>()
        .join(",")
}

/// Rolling file writer under `log_dir`, or `None` if the directory cannot be created.
fn file_writer(log_dir: &str, file_name: &str) -> Option<(NonBlocking, WorkerGuard)> {
    let log_dir = PathBuf::from(log_dir);
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}

fn format_layer<S, W>(writer: W, ansi: bool, json: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()));

    if json {
        layer.json().flatten_event(true).boxed()
    } else {
        layer.boxed()
    }
}

/// Install the global subscriber. Later calls leave the first one in place.
pub fn init_logging(config: LoggingConfig) -> LogGuard {
    let _ = LogTracer::init();

    let level_filter = level_to_str(config.level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let targets = match &config.log_targets {
            Some(targets) if !targets.is_empty() => targets.clone(),
            _ => vec![DEFAULT_LOG_TARGET.to_string()],
        };
        EnvFilter::new(build_filter_string(&targets, level_filter))
    });

    let mut layers = vec![format_layer(
        std::io::stdout,
        config.colorize,
        config.json_format,
    )];

    let file_guard = match config
        .log_dir
        .as_deref()
        .and_then(|dir| file_writer(dir, &config.log_file_name))
    {
        Some((writer, guard)) => {
            layers.push(format_layer(writer, false, config.json_format));
            Some(guard)
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init();

    LogGuard {
        _file_guard: file_guard,
    }
}
