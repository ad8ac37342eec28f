//! Binary transfer protocol
//!
//! Small modules are installed with a single call. Anything larger than the
//! chunk threshold goes through an upload session: open, upload every chunk
//! concurrently (capped), finalize once every chunk is acknowledged, then
//! install from the session.

use std::collections::BTreeSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use service_models::InstallMetadata;
use tracing::{debug, error, info, warn};

use crate::errors::DeployError;
use crate::limiter::BoundedLimiter;
use crate::models::artifact::CompiledArtifact;
use crate::models::deployment::ModuleKind;
use crate::services::{ExecutionHost, ProgressFn};
use crate::storage::settings::UploadConfig;

/// Share of the install progress spent uploading chunks
const CHUNK_PHASE_WEIGHT: f64 = 0.8;

/// Progress reported once the session is finalized
const FINALIZED_WEIGHT: f64 = 0.9;

/// Upload protocol settings
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Binaries larger than this take the chunked path
    pub chunk_threshold: usize,
    pub chunk_size: usize,
    pub max_concurrent_chunks: usize,
    pub reinstall: bool,
    pub environment: String,
}

impl UploadSettings {
    pub fn from_config(config: &UploadConfig, environment: &str) -> Self {
        Self {
            chunk_threshold: config.chunk_threshold,
            chunk_size: config.chunk_size.max(1),
            max_concurrent_chunks: config.max_concurrent_chunks,
            reinstall: config.reinstall,
            environment: environment.to_string(),
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default(), "production")
    }
}

/// Number of chunks needed for `size` bytes
pub fn chunk_count(size: usize, chunk_size: usize) -> u32 {
    let chunk_size = chunk_size.max(1);
    size.div_ceil(chunk_size) as u32
}

/// Byte ranges of every chunk, in index order
pub fn chunk_ranges(size: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..size)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(size))
        .collect()
}

/// Which path an install took
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum UploadPath {
    Direct,
    Chunked { session_id: String, total_chunks: u32 },
}

/// Result of installing one module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReport {
    pub target: String,
    pub bytes: usize,
    #[serde(flatten)]
    pub path: UploadPath,
    pub module_hash: Option<String>,
}

/// Host-side upload session, tracked locally.
///
/// Finalization is only allowed once every index has been acknowledged.
#[derive(Debug)]
pub struct UploadSession {
    id: String,
    total_chunks: u32,
    total_bytes: u64,
    acked: BTreeSet<u32>,
}

impl UploadSession {
    pub fn new(id: impl Into<String>, total_chunks: u32, total_bytes: u64) -> Self {
        Self {
            id: id.into(),
            total_chunks,
            total_bytes,
            acked: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Record an acknowledgement. Repeated acks for one index are harmless.
    pub fn acknowledge(&mut self, index: u32) -> Result<(), DeployError> {
        if index >= self.total_chunks {
            return Err(DeployError::ProtocolError(format!(
                "session {} acknowledged chunk {} of {}",
                self.id, index, self.total_chunks
            )));
        }
        self.acked.insert(index);
        Ok(())
    }

    pub fn acked_count(&self) -> u32 {
        self.acked.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.acked_count() == self.total_chunks
    }

    /// Indexes not yet acknowledged
    pub fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|index| !self.acked.contains(index))
            .collect()
    }
}

/// Installs compiled modules on the execution host
pub struct UploadManager<'a> {
    host: &'a dyn ExecutionHost,
    settings: &'a UploadSettings,
}

impl<'a> UploadManager<'a> {
    pub fn new(host: &'a dyn ExecutionHost, settings: &'a UploadSettings) -> Self {
        Self { host, settings }
    }

    /// Install `artifact` on `target`, choosing the direct or chunked path by size
    pub async fn install(
        &self,
        artifact: &CompiledArtifact,
        target: &str,
        metadata: &InstallMetadata,
        progress: ProgressFn<'_>,
    ) -> Result<InstallReport, DeployError> {
        let size = artifact.size();
        if size > self.settings.chunk_threshold {
            self.install_chunked(&artifact.wasm, target, metadata, progress)
                .await
        } else {
            self.install_direct(&artifact.wasm, target, metadata, progress)
                .await
        }
    }

    async fn install_direct(
        &self,
        wasm: &[u8],
        target: &str,
        metadata: &InstallMetadata,
        progress: ProgressFn<'_>,
    ) -> Result<InstallReport, DeployError> {
        info!("Installing {} bytes on {} in a single call", wasm.len(), target);

        let result = self
            .host
            .install_direct(target, wasm, ModuleKind::Backend, metadata, self.settings.reinstall)
            .await?;
        progress(1.0);

        Ok(InstallReport {
            target: result.target,
            bytes: wasm.len(),
            path: UploadPath::Direct,
            module_hash: result.module_hash,
        })
    }

    async fn install_chunked(
        &self,
        wasm: &[u8],
        target: &str,
        metadata: &InstallMetadata,
        progress: ProgressFn<'_>,
    ) -> Result<InstallReport, DeployError> {
        let ranges = chunk_ranges(wasm.len(), self.settings.chunk_size);
        let total_chunks = ranges.len() as u32;

        let session_id = self
            .host
            .open_upload_session(
                total_chunks,
                wasm.len() as u64,
                target,
                ModuleKind::Backend,
                &self.settings.environment,
            )
            .await?;
        info!(
            "Opened upload session {} for {} bytes in {} chunks",
            session_id,
            wasm.len(),
            total_chunks
        );

        let mut session = UploadSession::new(&session_id, total_chunks, wasm.len() as u64);

        let host = self.host;
        let tasks: Vec<_> = ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| {
                let index = index as u32;
                let bytes = &wasm[range];
                let session_id = session_id.as_str();
                move || async move {
                    match host.upload_chunk(session_id, index, bytes).await {
                        Ok(acked) if acked == index => Ok(index),
                        Ok(acked) => Err((
                            index,
                            DeployError::ProtocolError(format!(
                                "chunk {} acknowledged as {}",
                                index, acked
                            )),
                        )),
                        Err(e) => Err((index, e)),
                    }
                }
            })
            .collect();

        let limiter = BoundedLimiter::new(self.settings.max_concurrent_chunks);
        let results = limiter
            .submit(tasks, |done, total| {
                progress(CHUNK_PHASE_WEIGHT * done as f64 / total as f64);
            })
            .await;

        let mut first_failure = None;
        for result in results {
            match result {
                Ok(index) => {
                    debug!("Chunk {} acknowledged", index);
                    session.acknowledge(index)?;
                }
                Err((index, e)) => {
                    error!("Chunk {} of session {} failed: {}", index, session_id, e);
                    first_failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_failure {
            warn!(
                "Abandoning session {} with {} of {} chunks acknowledged",
                session_id,
                session.acked_count(),
                total_chunks
            );
            return Err(e);
        }

        if !session.is_complete() {
            return Err(DeployError::ProtocolError(format!(
                "session {} is missing chunks {:?}",
                session_id,
                session.missing()
            )));
        }

        self.host.finalize_upload(&session_id).await?;
        progress(FINALIZED_WEIGHT);

        let result = self
            .host
            .install_from_session(
                &session_id,
                target,
                ModuleKind::Backend,
                &self.settings.environment,
                metadata,
                self.settings.reinstall,
            )
            .await?;
        progress(1.0);

        info!("Installed session {} on {}", session_id, result.target);

        Ok(InstallReport {
            target: result.target,
            bytes: wasm.len(),
            path: UploadPath::Chunked {
                session_id,
                total_chunks,
            },
            module_hash: result.module_hash,
        })
    }
}
