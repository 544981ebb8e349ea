//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `TRACEGRID_*` environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub reorder: ReorderConfig,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub master: MasterConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Paged storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_page_pointer_bits")]
    pub page_pointer_bits: usize,

    #[serde(default = "default_max_index_levels")]
    pub max_index_levels: usize,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tracegrid").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tracegrid_data".to_string())
}

fn default_page_size() -> usize {
    4096
}

fn default_page_pointer_bits() -> usize {
    32
}

fn default_max_index_levels() -> usize {
    6
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            page_size: default_page_size(),
            page_pointer_bits: default_page_pointer_bits(),
            max_index_levels: default_max_index_levels(),
        }
    }
}

/// Reordering buffer sizes
#[derive(Debug, Clone, Deserialize)]
pub struct ReorderConfig {
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    #[serde(default = "default_thread_buffer_size")]
    pub thread_buffer_size: usize,

    #[serde(default = "default_objects_buffer_size")]
    pub objects_buffer_size: usize,
}

fn default_event_buffer_size() -> usize {
    100_000
}

fn default_thread_buffer_size() -> usize {
    100_000
}

fn default_objects_buffer_size() -> usize {
    1000
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            thread_buffer_size: default_thread_buffer_size(),
            objects_buffer_size: default_objects_buffer_size(),
        }
    }
}

/// Database node configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Hostname reported to the master; defaults to the HOSTNAME variable
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_autoflush_delay")]
    pub autoflush_delay_secs: u64,

    #[serde(default = "default_flush_check_interval")]
    pub flush_check_interval: usize,

    /// Save the event database to `storage.data_dir` on shutdown and reload it on start
    #[serde(default)]
    pub persist_snapshot: bool,
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_autoflush_delay() -> u64 {
    2
}

fn default_flush_check_interval() -> usize {
    16
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            autoflush_delay_secs: default_autoflush_delay(),
            flush_check_interval: default_flush_check_interval(),
            persist_snapshot: false,
        }
    }
}

/// Grid master configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    /// Keepalive timeout; 0 disables the watchdog
    #[serde(default)]
    pub timeout_secs: u64,

    #[serde(default = "default_stats_initial_delay")]
    pub stats_initial_delay_ms: u64,

    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,

    #[serde(default = "default_node_query_timeout")]
    pub node_query_timeout_ms: u64,

    #[serde(default = "default_listener_grace")]
    pub listener_grace_ms: u64,

    #[serde(default)]
    pub reject_duplicate_hosts: bool,

    #[serde(default = "default_expected_nodes")]
    pub expected_nodes: usize,
}

fn default_stats_initial_delay() -> u64 {
    5000
}

fn default_stats_interval() -> u64 {
    3000
}

fn default_node_query_timeout() -> u64 {
    30_000
}

fn default_listener_grace() -> u64 {
    10_000
}

fn default_expected_nodes() -> usize {
    1
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            stats_initial_delay_ms: default_stats_initial_delay(),
            stats_interval_ms: default_stats_interval(),
            node_query_timeout_ms: default_node_query_timeout(),
            listener_grace_ms: default_listener_grace(),
            reject_duplicate_hosts: false,
            expected_nodes: default_expected_nodes(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Largest batch accepted by the ingest and browse endpoints
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8470
}

fn default_max_batch() -> usize {
    10_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            max_batch: default_max_batch(),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tracegrid").join("config.toml")),
            Some(PathBuf::from("/etc/tracegrid/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Storage overrides
        if let Ok(data_dir) = std::env::var("TRACEGRID_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        override_parsed("TRACEGRID_PAGE_SIZE", &mut self.storage.page_size);

        // Reordering overrides
        override_parsed("TRACEGRID_EVENT_BUFFER_SIZE", &mut self.reorder.event_buffer_size);
        override_parsed("TRACEGRID_THREAD_BUFFER_SIZE", &mut self.reorder.thread_buffer_size);

        // Node overrides
        if let Ok(hostname) = std::env::var("TRACEGRID_HOSTNAME") {
            self.node.hostname = hostname;
        }
        override_parsed("TRACEGRID_AUTOFLUSH_DELAY", &mut self.node.autoflush_delay_secs);

        // Master overrides
        override_parsed("TRACEGRID_TIMEOUT", &mut self.master.timeout_secs);
        override_parsed("TRACEGRID_EXPECTED_NODES", &mut self.master.expected_nodes);

        // API overrides
        if let Ok(host) = std::env::var("TRACEGRID_API_HOST") {
            self.api.host = host;
        }
        override_parsed("TRACEGRID_API_PORT", &mut self.api.port);

        // Logging overrides
        if let Ok(level) = std::env::var("TRACEGRID_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TRACEGRID_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn override_parsed<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring invalid value {:?} for {}", value, name),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# tracegrid configuration
#
# Environment variables override these settings:
# - TRACEGRID_DATA_DIR
# - TRACEGRID_PAGE_SIZE
# - TRACEGRID_EVENT_BUFFER_SIZE
# - TRACEGRID_THREAD_BUFFER_SIZE
# - TRACEGRID_HOSTNAME
# - TRACEGRID_AUTOFLUSH_DELAY
# - TRACEGRID_TIMEOUT
# - TRACEGRID_EXPECTED_NODES
# - TRACEGRID_API_HOST
# - TRACEGRID_API_PORT
# - TRACEGRID_LOG_LEVEL
# - TRACEGRID_LOG_FORMAT

[storage]
# Directory for event snapshots
data_dir = "~/.local/share/tracegrid"

# Index page size in bytes (128 to 65536)
page_size = 4096

# Width of page ids in bits (8 to 32)
page_pointer_bits = 32

# Maximum height of an index tree (1 to 6)
max_index_levels = 6

[reorder]
# Events held for reordering before the oldest is processed
event_buffer_size = 100000

# Late events held per producer thread
thread_buffer_size = 100000

# Object records held for reordering
objects_buffer_size = 1000

[node]
# Hostname reported to the master
hostname = "localhost"

# Idle seconds before buffered data is flushed (0 disables autoflush)
autoflush_delay_secs = 2

# Records processed between flush cancellation checks
flush_check_interval = 16

# Save the event database on shutdown and reload it on start
persist_snapshot = false

[master]
# Exit when no keepalive is received for this many seconds (0 disables)
timeout_secs = 0

# Statistics collection schedule (ms)
stats_initial_delay_ms = 5000
stats_interval_ms = 3000

# How long a fanned-out query waits for each node (ms)
node_query_timeout_ms = 30000

# Two listener failures within this window evict the listener (ms)
listener_grace_ms = 10000

# Refuse a second node from an already registered host
reject_duplicate_hosts = false

# Nodes to wait for before the master reports ready
expected_nodes = 1

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8470

# Allowed CORS origins (empty allows any)
cors_origins = []

# Largest ingest or browse batch
max_batch = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_template_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.storage.page_size, 4096);
        assert_eq!(config.reorder.objects_buffer_size, 1000);
        assert_eq!(config.node.autoflush_delay_secs, 2);
        assert_eq!(config.master.stats_interval_ms, 3000);
        assert_eq!(config.api.port, 8470);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[master]\ntimeout_secs = 30\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.master.timeout_secs, 30);
        assert_eq!(config.master.listener_grace_ms, 10_000);
        assert_eq!(config.storage.max_index_levels, 6);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[storage\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }
}
