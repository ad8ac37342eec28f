//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::DeployError;

/// Which remote service a client talks to.
///
/// Decides how a non-success HTTP status is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Compiler,
    Bundler,
    Host,
    Flags,
}

impl ServiceKind {
    fn status_error(&self, message: String) -> DeployError {
        match self {
            ServiceKind::Compiler => DeployError::CompilationError(message),
            ServiceKind::Bundler => DeployError::BundlingError(message),
            ServiceKind::Host => DeployError::InstallError(message),
            ServiceKind::Flags => DeployError::StorageError(message),
        }
    }
}

/// JSON-over-HTTP client for one remote service
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    kind: ServiceKind,
    api_token: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, kind: ServiceKind) -> Result<Self, DeployError> {
        Url::parse(base_url)?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            kind,
            api_token: None,
        })
    }

    /// Attach a bearer token to every request
    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a path against the base URL. Absolute URLs pass through.
    pub fn resolve(&self, path: &str) -> Result<Url, DeployError> {
        if let Ok(url) = Url::parse(path) {
            return Ok(url);
        }
        let joined = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        Url::parse(&joined)
            .map_err(|e| DeployError::ProtocolError(format!("invalid URL {}: {}", joined, e)))
    }

    /// Make a GET request with an explicit deadline
    pub async fn get<T: DeserializeOwned>(&self, path: &str, timeout: Duration) -> Result<T, DeployError> {
        let url = self.resolve(path)?;
        debug!("GET {}", url);

        let mut request = self.client.get(url).timeout(timeout);
        if let Some(token) = &self.api_token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = self.check_status("GET", request.send().await?).await?;
        let body = response.json().await?;
        Ok(body)
    }

    /// Make a POST request with an explicit deadline
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, DeployError> {
        let url = self.resolve(path)?;
        debug!("POST {}", url);

        let mut request = self.client.post(url).timeout(timeout).json(body);
        if let Some(token) = &self.api_token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = self.check_status("POST", request.send().await?).await?;
        let body = response.json().await?;
        Ok(body)
    }

    async fn check_status(&self, method: &str, response: Response) -> Result<Response, DeployError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!("HTTP {} {} failed: {} - {}", method, self.base_url, status, body);
        Err(self.kind.status_error(format!("{}: {}", status, body)))
    }
}
