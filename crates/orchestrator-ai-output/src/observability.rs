//! Process-wide `tracing` setup for binaries and demos embedding the crate.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENABLED_KEYS: [&str; 2] = [
    "ORCHESTRATOR_OBSERVABILITY_ENABLED",
    "ORCHESTRATOR_OBSERVABILITY",
];
const LEVEL_KEY: &str = "ORCHESTRATOR_LOG_LEVEL";
const JSON_PATH_KEY: &str = "ORCHESTRATOR_JSON_LOG_PATH";
const DEFAULT_LOG_FILE: &str = "orchestrator.logs.jsonl";

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// Filter directive (`info`, `orchestrator_ai_output=debug`, ...).
    pub level: Option<String>,
    /// Write JSONL to this file instead of compact console output.
    pub json_log_path: Option<PathBuf>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: None,
            json_log_path: None,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

impl ObservabilityConfig {
    /// Reads `ORCHESTRATOR_OBSERVABILITY_ENABLED` (or `ORCHESTRATOR_OBSERVABILITY`),
    /// `ORCHESTRATOR_LOG_LEVEL` and `ORCHESTRATOR_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ENABLED_KEYS
            .iter()
            .find_map(|key| lookup(key))
            .map(|value| parse_flag(&value).unwrap_or(true))
            .unwrap_or(true);
        Self {
            enabled,
            level: lookup(LEVEL_KEY).filter(|level| !level.trim().is_empty()),
            json_log_path: lookup(JSON_PATH_KEY)
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// `ORCHESTRATOR_LOG_LEVEL`, then `RUST_LOG`, then `info`.
    fn env_filter(&self) -> EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber from the environment, once per process.
pub fn init_observability() {
    init_with(ObservabilityConfig::from_env());
}

/// Installs the global subscriber from `config`. Later calls are no-ops.
pub fn init_with(config: ObservabilityConfig) {
    INIT.get_or_init(|| {
        if !config.enabled {
            return;
        }
        let filter = config.env_filter();
        match &config.json_log_path {
            Some(path) => {
                let (dir, file_name) = split_log_path(path);
                if !dir.as_os_str().is_empty() {
                    let _ = std::fs::create_dir_all(&dir);
                }
                let writer = tracing_appender::rolling::never(dir, file_name);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
            None => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
        }
    });
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}
