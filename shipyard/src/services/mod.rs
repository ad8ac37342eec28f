//! Collaborator seams
//!
//! The orchestrator only talks to these traits. Callers construct a
//! [`DeployServices`] value and pass it to every execution; nothing here is a
//! process-wide singleton.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_models::{InstallMetadata, InstallResult, PackageSpec, SourceFile};

use crate::errors::DeployError;
use crate::models::artifact::{CompiledArtifact, InterfaceSet};
use crate::models::bundle::AssetBundle;
use crate::models::deployment::ModuleKind;

/// Fractional progress callback (0.0 ..= 1.0)
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Compiler input
#[derive(Debug, Clone)]
pub struct CompileInput {
    pub files: Vec<SourceFile>,
    pub packages: Vec<PackageSpec>,
    pub main_file: String,
    pub mode: String,

    /// Digest of the source set, stamped on the produced artifact
    pub source_digest: String,
}

/// Bundler input
#[derive(Debug, Clone)]
pub struct BundleInput {
    pub files: Vec<SourceFile>,
    pub package_json: serde_json::Value,
    pub project_type: String,
}

/// Persisted "component changed" flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFlags {
    pub backend_changed: bool,
    pub frontend_changed: bool,
}

impl ChangeFlags {
    pub fn new(backend_changed: bool, frontend_changed: bool) -> Self {
        Self {
            backend_changed,
            frontend_changed,
        }
    }

    /// Both components treated as changed
    pub fn all() -> Self {
        Self::new(true, true)
    }
}

/// Remote compilation service
#[async_trait]
pub trait CompilerService: Send + Sync {
    async fn compile(&self, input: CompileInput) -> Result<CompiledArtifact, DeployError>;
}

/// Remote bundling service
#[async_trait]
pub trait BundlerService: Send + Sync {
    /// Submit, wait for completion and download the packaged output
    async fn bundle(
        &self,
        input: BundleInput,
        progress: ProgressFn<'_>,
    ) -> Result<AssetBundle, DeployError>;
}

/// Remote execution host RPCs
#[async_trait]
pub trait ExecutionHost: Send + Sync {
    async fn open_upload_session(
        &self,
        total_chunks: u32,
        total_bytes: u64,
        target: &str,
        kind: ModuleKind,
        env: &str,
    ) -> Result<String, DeployError>;

    /// Upload one chunk; returns the acknowledged index
    async fn upload_chunk(&self, session_id: &str, index: u32, bytes: &[u8]) -> Result<u32, DeployError>;

    async fn finalize_upload(&self, session_id: &str) -> Result<(), DeployError>;

    async fn install_from_session(
        &self,
        session_id: &str,
        target: &str,
        kind: ModuleKind,
        env: &str,
        metadata: &InstallMetadata,
        reinstall: bool,
    ) -> Result<InstallResult, DeployError>;

    async fn install_direct(
        &self,
        target: &str,
        bytes: &[u8],
        kind: ModuleKind,
        metadata: &InstallMetadata,
        reinstall: bool,
    ) -> Result<InstallResult, DeployError>;

    /// Upload-by-path with overwrite semantics
    async fn store_asset(
        &self,
        target: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), DeployError>;
}

/// Change-flag persistence
#[async_trait]
pub trait ChangeFlagStore: Send + Sync {
    async fn get_change_flags(&self, project_id: &str) -> Result<ChangeFlags, DeployError>;

    async fn clear_change_flags(
        &self,
        project_id: &str,
        clear_backend: bool,
        clear_frontend: bool,
    ) -> Result<(), DeployError>;
}

/// Project artifact storage
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save_interfaces(&self, project_id: &str, interfaces: &InterfaceSet) -> Result<(), DeployError>;

    async fn load_interfaces(&self, project_id: &str) -> Result<Option<InterfaceSet>, DeployError>;

    async fn cache_artifact(&self, project_id: &str, artifact: &CompiledArtifact) -> Result<(), DeployError>;

    /// Cached artifact, only if it was built from `source_digest`
    async fn cached_artifact(
        &self,
        project_id: &str,
        source_digest: &str,
    ) -> Result<Option<CompiledArtifact>, DeployError>;

    async fn evict_cached_artifact(&self, project_id: &str) -> Result<(), DeployError>;
}

/// Every collaborator one execution needs
#[derive(Clone)]
pub struct DeployServices {
    pub compiler: Arc<dyn CompilerService>,
    pub bundler: Arc<dyn BundlerService>,
    pub host: Arc<dyn ExecutionHost>,
    pub flags: Arc<dyn ChangeFlagStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl DeployServices {
    pub fn new(
        compiler: Arc<dyn CompilerService>,
        bundler: Arc<dyn BundlerService>,
        host: Arc<dyn ExecutionHost>,
        flags: Arc<dyn ChangeFlagStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            compiler,
            bundler,
            host,
            flags,
            artifacts,
        }
    }
}
