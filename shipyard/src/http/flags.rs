//! Change-flag persistence client

use std::time::Duration;

use async_trait::async_trait;
use service_models::{ChangeFlagsResponse, ClearChangeFlagsRequest};

use crate::errors::DeployError;
use crate::http::client::HttpClient;
use crate::services::{ChangeFlagStore, ChangeFlags};

/// Reads and clears change flags through the project API
pub struct HttpFlagStore {
    http: HttpClient,
    timeout: Duration,
}

impl HttpFlagStore {
    pub fn new(http: HttpClient, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl ChangeFlagStore for HttpFlagStore {
    async fn get_change_flags(&self, project_id: &str) -> Result<ChangeFlags, DeployError> {
        let path = format!("/projects/{}/flags", project_id);
        let response: ChangeFlagsResponse = self.http.get(&path, self.timeout).await?;
        Ok(ChangeFlags::new(response.backend_changed, response.frontend_changed))
    }

    async fn clear_change_flags(
        &self,
        project_id: &str,
        clear_backend: bool,
        clear_frontend: bool,
    ) -> Result<(), DeployError> {
        let path = format!("/projects/{}/flags/clear", project_id);
        let request = ClearChangeFlagsRequest {
            clear_backend,
            clear_frontend,
        };
        let _: serde_json::Value = self.http.post(&path, &request, self.timeout).await?;
        Ok(())
    }
}
