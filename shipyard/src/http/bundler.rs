//! Bundler service client
//!
//! Bundling is an asynchronous job: submit the sources, poll the status URL
//! on a fixed interval within a bounded budget, then download the output.

use std::time::Duration;

use async_trait::async_trait;
use service_models::{
    BundleDownloadResponse, BundleJobResponse, BundleJobStatus, BundleRequest, BundleStatusResponse,
};
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::http::client::HttpClient;
use crate::models::bundle::{AssetBundle, AssetEntry};
use crate::services::{BundleInput, BundlerService, ProgressFn};

const SUBMIT_PATH: &str = "/bundle";

/// Share of the bundling progress reached once the job is accepted
const SUBMITTED_PROGRESS: f64 = 0.1;

/// Share of the bundling progress reached once the job completes
const COMPLETED_PROGRESS: f64 = 0.9;

/// Bundler settings
#[derive(Debug, Clone)]
pub struct BundlerSettings {
    /// Deadline for job creation
    pub submit_timeout: Duration,

    /// Deadline for one status poll
    pub status_timeout: Duration,

    /// Deadline for the output download
    pub download_timeout: Duration,

    /// Delay before each status poll
    pub poll_interval: Duration,

    /// Poll budget; exhausting it is a fatal timeout
    pub max_poll_attempts: u32,
}

impl Default for BundlerSettings {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 60,
        }
    }
}

/// An accepted bundling job
#[derive(Debug, Clone, PartialEq)]
pub struct BundleJob {
    pub job_id: String,
    pub status_url: String,
    pub download_url: String,
    pub estimated_time: Option<f64>,
}

/// Drives bundling jobs on the remote bundler
pub struct BundlerClient {
    http: HttpClient,
    settings: BundlerSettings,
}

impl BundlerClient {
    pub fn new(http: HttpClient, settings: BundlerSettings) -> Self {
        Self { http, settings }
    }

    /// Create a bundling job
    pub async fn submit(&self, input: &BundleInput) -> Result<BundleJob, DeployError> {
        let request = BundleRequest {
            files: input.files.clone(),
            package_json: input.package_json.clone(),
            project_type: input.project_type.clone(),
        };

        let response: BundleJobResponse = self
            .http
            .post(SUBMIT_PATH, &request, self.settings.submit_timeout)
            .await?;

        if !response.success {
            return Err(DeployError::BundlingError(
                response
                    .error
                    .unwrap_or_else(|| "bundler rejected the job".to_string()),
            ));
        }

        let job = BundleJob {
            job_id: required(response.job_id, "jobId")?,
            status_url: required(response.status_url, "statusUrl")?,
            download_url: required(response.download_url, "downloadUrl")?,
            estimated_time: response.estimated_time,
        };

        info!(
            "Bundle job {} accepted (estimated {:?}s)",
            job.job_id, job.estimated_time
        );
        Ok(job)
    }

    /// Poll until the job completes, fails, or the poll budget runs out.
    ///
    /// Poll failures of any kind count against the budget and are otherwise
    /// ignored.
    pub async fn wait_for_completion(
        &self,
        job: &BundleJob,
        progress: ProgressFn<'_>,
    ) -> Result<(), DeployError> {
        for attempt in 1..=self.settings.max_poll_attempts {
            tokio::time::sleep(self.settings.poll_interval).await;

            let status = match self
                .http
                .get::<BundleStatusResponse>(&job.status_url, self.settings.status_timeout)
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        "Bundle job {} status poll {} failed, will retry: {}",
                        job.job_id, attempt, e
                    );
                    continue;
                }
            };

            match status.status {
                BundleJobStatus::Completed => {
                    info!("Bundle job {} completed after {} polls", job.job_id, attempt);
                    return Ok(());
                }
                BundleJobStatus::Failed => {
                    return Err(DeployError::BundleJobFailed(
                        status
                            .error
                            .unwrap_or_else(|| "bundle job failed".to_string()),
                    ));
                }
                other => {
                    debug!("Bundle job {} is {:?} (poll {})", job.job_id, other, attempt);
                    if let Some(percent) = status.progress {
                        let fraction = (percent / 100.0).clamp(0.0, 1.0);
                        progress(
                            SUBMITTED_PROGRESS
                                + fraction * (COMPLETED_PROGRESS - SUBMITTED_PROGRESS),
                        );
                    }
                }
            }
        }

        Err(DeployError::BundleTimeout {
            attempts: self.settings.max_poll_attempts,
        })
    }

    /// Download and decode the packaged output
    pub async fn download(&self, job: &BundleJob) -> Result<AssetBundle, DeployError> {
        let response: BundleDownloadResponse = self
            .http
            .get(&job.download_url, self.settings.download_timeout)
            .await?;

        if !response.success {
            return Err(DeployError::BundlingError(
                response
                    .error
                    .unwrap_or_else(|| "bundle download failed".to_string()),
            ));
        }
        if response.output.is_empty() {
            return Err(DeployError::BundlingError(format!(
                "bundle job {} produced no output",
                job.job_id
            )));
        }

        let bundle: AssetBundle = response
            .output
            .into_iter()
            .map(|(path, file)| AssetEntry::new(&path, file.data, file.kind))
            .collect();

        info!(
            "Downloaded {} bundled files ({} bytes)",
            bundle.len(),
            bundle.total_bytes()
        );
        Ok(bundle)
    }
}

#[async_trait]
impl BundlerService for BundlerClient {
    async fn bundle(
        &self,
        input: BundleInput,
        progress: ProgressFn<'_>,
    ) -> Result<AssetBundle, DeployError> {
        let job = self.submit(&input).await?;
        progress(SUBMITTED_PROGRESS);

        self.wait_for_completion(&job, progress).await?;
        progress(COMPLETED_PROGRESS);

        let bundle = self.download(&job).await?;
        progress(1.0);
        Ok(bundle)
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, DeployError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DeployError::ProtocolError(format!("bundle job response is missing {}", field)))
}
