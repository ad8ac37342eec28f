//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Engine settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory for daily-rolling log files
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Remote service endpoints
    #[serde(default)]
    pub endpoints: EndpointSettings,

    /// Per-call deadlines
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Binary transfer protocol
    #[serde(default)]
    pub upload: UploadConfig,

    /// Asset deployment tiers
    #[serde(default)]
    pub assets: AssetConfig,

    /// Bundler polling
    #[serde(default)]
    pub bundler: BundlerConfig,

    /// Where backend and frontend sources live in a snapshot
    #[serde(default)]
    pub layout: SourceLayoutConfig,

    /// Execution environment passed to the host
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Public frontend URL, `{target}` is replaced with the frontend target
    #[serde(default = "default_frontend_url_template")]
    pub frontend_url_template: String,

    /// Attempt lifecycle
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Retry workflow budget and backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// Daemon-mode HTTP server
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_frontend_url_template() -> String {
    "https://{target}.icp0.io".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            endpoints: EndpointSettings::default(),
            timeouts: TimeoutSettings::default(),
            upload: UploadConfig::default(),
            assets: AssetConfig::default(),
            bundler: BundlerConfig::default(),
            layout: SourceLayoutConfig::default(),
            environment: default_environment(),
            frontend_url_template: default_frontend_url_template(),
            orchestrator: OrchestratorConfig::default(),
            retry: RetryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Remote service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub compiler_url: String,
    pub bundler_url: String,
    pub host_url: String,
    pub flags_url: String,

    /// Optional bearer token sent to every service
    pub api_token: Option<String>,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            compiler_url: "http://localhost:8081".to_string(),
            bundler_url: "http://localhost:8082".to_string(),
            host_url: "http://localhost:8083".to_string(),
            flags_url: "http://localhost:8084".to_string(),
            api_token: None,
        }
    }
}

/// Per-call deadlines, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub compile_secs: u64,
    pub submit_secs: u64,
    pub status_poll_secs: u64,
    pub download_secs: u64,
    pub host_call_secs: u64,
    pub flags_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            compile_secs: 120,
            submit_secs: 30,
            status_poll_secs: 10,
            download_secs: 60,
            host_call_secs: 60,
            flags_secs: 10,
        }
    }
}

/// Binary transfer protocol constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub chunk_threshold: usize,
    pub chunk_size: usize,
    pub max_concurrent_chunks: usize,

    /// Replace the module's state on install instead of upgrading it
    pub reinstall: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: 2_000_000,
            chunk_size: 1_980_000,
            max_concurrent_chunks: 15,
            reinstall: true,
        }
    }
}

/// Asset tier thresholds and concurrency caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub small_asset_max_bytes: usize,
    pub small_concurrency: usize,
    pub large_concurrency: usize,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            small_asset_max_bytes: 100 * 1024,
            small_concurrency: 24,
            large_concurrency: 12,
        }
    }
}

/// Bundler polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlerConfig {
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub project_type: String,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_poll_attempts: 60,
            project_type: "react".to_string(),
        }
    }
}

/// Snapshot source layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLayoutConfig {
    pub backend_dir: String,
    pub frontend_dir: String,

    /// Entry file, relative to `backend_dir`
    pub backend_entry: String,

    pub compile_mode: String,
}

impl Default for SourceLayoutConfig {
    fn default() -> Self {
        Self {
            backend_dir: "backend".to_string(),
            frontend_dir: "frontend".to_string(),
            backend_entry: "main.mo".to_string(),
            compile_mode: "release".to_string(),
        }
    }
}

/// Attempt lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Delay before a finished attempt is reset to idle
    pub cooldown_ms: u64,

    /// Finished attempts kept readable before the oldest are dropped
    pub max_retained_attempts: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 3_000,
            max_retained_attempts: 1_024,
        }
    }
}

/// Retry workflow budget and backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_executions: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_executions: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

/// Daemon-mode HTTP server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}
