//! Error types for the deployment engine

use thiserror::Error;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Compilation error: {0}")]
    CompilationError(String),

    #[error("Bundling error: {0}")]
    BundlingError(String),

    #[error("Bundle job failed: {0}")]
    BundleJobFailed(String),

    #[error("Bundling timed out after {attempts} status polls")]
    BundleTimeout { attempts: u32 },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Install error: {0}")]
    InstallError(String),

    #[error("A deployment is already running for project {0}")]
    AlreadyRunning(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Retry workflow {workflow_id} exhausted its {max} executions")]
    RetryBudgetExhausted { workflow_id: String, max: u32 },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl DeployError {
    /// Short machine-readable kind, used in logs and status responses
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::CompilationError(_) => "compilation",
            DeployError::BundlingError(_) => "bundling",
            DeployError::BundleJobFailed(_) => "bundle_failed",
            DeployError::BundleTimeout { .. } => "bundle_timeout",
            DeployError::ProtocolError(_) => "protocol",
            DeployError::TransportError(_) => "transport",
            DeployError::InstallError(_) => "install",
            DeployError::AlreadyRunning(_) => "already_running",
            DeployError::InvalidTransition(_) => "invalid_transition",
            DeployError::RetryBudgetExhausted { .. } => "retry_exhausted",
            DeployError::StorageError(_) => "storage",
            DeployError::ConfigError(_) => "config",
            DeployError::ServerError(_) => "server",
            DeployError::ShutdownError(_) => "shutdown",
            DeployError::IoError(_) => "io",
            DeployError::JsonError(_) => "json",
        }
    }
}

impl From<reqwest::Error> for DeployError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DeployError::ProtocolError(format!("malformed response body: {}", err))
        } else if err.is_timeout() {
            DeployError::TransportError(format!("deadline exceeded: {}", err))
        } else {
            DeployError::TransportError(err.to_string())
        }
    }
}

impl From<url::ParseError> for DeployError {
    fn from(err: url::ParseError) -> Self {
        DeployError::ConfigError(format!("invalid URL: {}", err))
    }
}
