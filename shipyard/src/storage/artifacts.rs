//! File-backed project artifact storage

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DeployError;
use crate::models::artifact::{CompiledArtifact, InterfaceSet};
use crate::services::ArtifactStore;
use crate::storage::layout::StorageLayout;

/// Metadata stored next to a cached module
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedArtifactMeta {
    source_digest: String,
    size: usize,
    interfaces: InterfaceSet,
    cached_at: chrono::DateTime<chrono::Utc>,
}

/// Stores interface descriptors and the compiled-artifact cache on disk
pub struct FileArtifactStore {
    layout: StorageLayout,
}

impl FileArtifactStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn save_interfaces(&self, project_id: &str, interfaces: &InterfaceSet) -> Result<(), DeployError> {
        self.layout
            .interfaces_file(project_id)
            .write_json(interfaces)
            .await
            .map_err(|e| DeployError::StorageError(format!("saving interfaces: {}", e)))
    }

    async fn load_interfaces(&self, project_id: &str) -> Result<Option<InterfaceSet>, DeployError> {
        let file = self.layout.interfaces_file(project_id);
        if !file.exists().await {
            return Ok(None);
        }
        let interfaces = file
            .read_json()
            .await
            .map_err(|e| DeployError::StorageError(format!("loading interfaces: {}", e)))?;
        Ok(Some(interfaces))
    }

    async fn cache_artifact(&self, project_id: &str, artifact: &CompiledArtifact) -> Result<(), DeployError> {
        let meta = CachedArtifactMeta {
            source_digest: artifact.source_digest.clone(),
            size: artifact.size(),
            interfaces: artifact.interfaces.clone(),
            cached_at: chrono::Utc::now(),
        };

        // Module first, so a readable meta file always has its module.
        self.layout
            .cached_wasm_file(project_id)
            .write_atomic(&artifact.wasm)
            .await?;
        self.layout.cached_meta_file(project_id).write_json(&meta).await?;

        debug!("Cached {} byte artifact for {}", meta.size, project_id);
        Ok(())
    }

    async fn cached_artifact(
        &self,
        project_id: &str,
        source_digest: &str,
    ) -> Result<Option<CompiledArtifact>, DeployError> {
        let meta_file = self.layout.cached_meta_file(project_id);
        let wasm_file = self.layout.cached_wasm_file(project_id);
        if !meta_file.exists().await || !wasm_file.exists().await {
            return Ok(None);
        }

        let meta: CachedArtifactMeta = meta_file.read_json().await?;
        if meta.source_digest != source_digest {
            debug!("Cached artifact for {} is stale", project_id);
            return Ok(None);
        }

        let wasm = wasm_file.read_bytes().await?;
        if wasm.len() != meta.size {
            return Ok(None);
        }

        Ok(Some(CompiledArtifact {
            wasm,
            interfaces: meta.interfaces,
            source_digest: meta.source_digest,
        }))
    }

    async fn evict_cached_artifact(&self, project_id: &str) -> Result<(), DeployError> {
        self.layout.cached_meta_file(project_id).delete().await?;
        self.layout.cached_wasm_file(project_id).delete().await?;
        Ok(())
    }
}
