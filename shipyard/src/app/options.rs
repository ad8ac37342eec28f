//! Application configuration options

use std::sync::Arc;
use std::time::Duration;

use crate::deploy::orchestrator::OrchestratorSettings;
use crate::errors::DeployError;
use crate::http::bundler::{BundlerClient, BundlerSettings};
use crate::http::client::{HttpClient, ServiceKind};
use crate::http::compiler::CompilerClient;
use crate::http::flags::HttpFlagStore;
use crate::http::host::HttpExecutionHost;
use crate::retry::coordinator::RetrySettings;
use crate::services::DeployServices;
use crate::storage::artifacts::FileArtifactStore;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{EndpointSettings, Settings, TimeoutSettings};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Remote services
    pub endpoints: EndpointSettings,
    pub timeouts: TimeoutSettings,
    pub bundler: BundlerSettings,

    pub orchestrator: OrchestratorSettings,
    pub retry: RetrySettings,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let timeouts = settings.timeouts.clone();
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            endpoints: settings.endpoints.clone(),
            bundler: BundlerSettings {
                submit_timeout: Duration::from_secs(timeouts.submit_secs),
                status_timeout: Duration::from_secs(timeouts.status_poll_secs),
                download_timeout: Duration::from_secs(timeouts.download_secs),
                poll_interval: Duration::from_millis(settings.bundler.poll_interval_ms),
                max_poll_attempts: settings.bundler.max_poll_attempts,
            },
            timeouts,
            orchestrator: OrchestratorSettings::from_settings(settings),
            retry: RetrySettings::from(&settings.retry),
        }
    }

    /// Build the HTTP-backed collaborators
    pub fn build_services(&self) -> Result<DeployServices, DeployError> {
        let token = self.endpoints.api_token.clone();
        let client = |url: &str, kind: ServiceKind| -> Result<HttpClient, DeployError> {
            Ok(HttpClient::new(url, kind)?.with_api_token(token.clone()))
        };

        let compiler = CompilerClient::new(
            client(&self.endpoints.compiler_url, ServiceKind::Compiler)?,
            Duration::from_secs(self.timeouts.compile_secs),
        );
        let bundler = BundlerClient::new(
            client(&self.endpoints.bundler_url, ServiceKind::Bundler)?,
            self.bundler.clone(),
        );
        let host = HttpExecutionHost::new(
            client(&self.endpoints.host_url, ServiceKind::Host)?,
            Duration::from_secs(self.timeouts.host_call_secs),
        );
        let flags = HttpFlagStore::new(
            client(&self.endpoints.flags_url, ServiceKind::Flags)?,
            Duration::from_secs(self.timeouts.flags_secs),
        );
        let artifacts = FileArtifactStore::new(self.layout.clone());

        Ok(DeployServices::new(
            Arc::new(compiler),
            Arc::new(bundler),
            Arc::new(host),
            Arc::new(flags),
            Arc::new(artifacts),
        ))
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}
