//! In-memory collaborators shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use service_models::{InstallMetadata, InstallResult};

use shipyard::errors::DeployError;
use shipyard::models::artifact::{CompiledArtifact, InterfaceSet};
use shipyard::models::bundle::{AssetBundle, AssetEntry};
use shipyard::models::deployment::{DeploymentRequest, ModuleKind, ServerPair};
use shipyard::models::snapshot::DeploymentSnapshot;
use shipyard::services::{
    ArtifactStore, BundleInput, BundlerService, ChangeFlagStore, ChangeFlags, CompileInput,
    CompilerService, DeployServices, ExecutionHost, ProgressFn,
};

// ================================= HOST ======================================== //

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    OpenSession { total_chunks: u32, total_bytes: u64 },
    Chunk { index: u32, len: usize },
    Finalize,
    InstallFromSession { reinstall: bool },
    InstallDirect { len: usize },
    Store { path: String, content_type: String },
}

/// Execution host that records every call
#[derive(Default)]
pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
    fail_chunk: Mutex<Option<u32>>,
    fail_store: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_chunk(&self, index: u32) {
        *self.fail_chunk.lock().unwrap() = Some(index);
    }

    pub fn fail_store(&self, path: &str) {
        *self.fail_store.lock().unwrap() = Some(path.to_string());
    }

    /// Delay applied to chunk uploads and asset stores
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stored_paths(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Store { path, .. } => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }

    async fn occupy(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionHost for RecordingHost {
    async fn open_upload_session(
        &self,
        total_chunks: u32,
        total_bytes: u64,
        _target: &str,
        _kind: ModuleKind,
        _env: &str,
    ) -> Result<String, DeployError> {
        self.record(HostCall::OpenSession {
            total_chunks,
            total_bytes,
        });
        Ok("session-1".to_string())
    }

    async fn upload_chunk(&self, _session_id: &str, index: u32, bytes: &[u8]) -> Result<u32, DeployError> {
        self.occupy().await;
        if *self.fail_chunk.lock().unwrap() == Some(index) {
            return Err(DeployError::TransportError(format!("chunk {} dropped", index)));
        }
        self.record(HostCall::Chunk {
            index,
            len: bytes.len(),
        });
        Ok(index)
    }

    async fn finalize_upload(&self, _session_id: &str) -> Result<(), DeployError> {
        self.record(HostCall::Finalize);
        Ok(())
    }

    async fn install_from_session(
        &self,
        _session_id: &str,
        target: &str,
        _kind: ModuleKind,
        _env: &str,
        _metadata: &InstallMetadata,
        reinstall: bool,
    ) -> Result<InstallResult, DeployError> {
        self.record(HostCall::InstallFromSession { reinstall });
        Ok(InstallResult {
            target: target.to_string(),
            module_hash: Some("hash-chunked".to_string()),
        })
    }

    async fn install_direct(
        &self,
        target: &str,
        bytes: &[u8],
        _kind: ModuleKind,
        _metadata: &InstallMetadata,
        _reinstall: bool,
    ) -> Result<InstallResult, DeployError> {
        self.record(HostCall::InstallDirect { len: bytes.len() });
        Ok(InstallResult {
            target: target.to_string(),
            module_hash: Some("hash-direct".to_string()),
        })
    }

    async fn store_asset(
        &self,
        _target: &str,
        path: &str,
        _bytes: &[u8],
        content_type: &str,
    ) -> Result<(), DeployError> {
        self.occupy().await;
        if self.fail_store.lock().unwrap().as_deref() == Some(path) {
            return Err(DeployError::InstallError(format!("store of {} rejected", path)));
        }
        self.record(HostCall::Store {
            path: path.to_string(),
            content_type: content_type.to_string(),
        });
        Ok(())
    }
}

// =============================== COMPILER ====================================== //

#[derive(Default)]
pub struct FakeCompiler {
    calls: AtomicUsize,
    transient_failures: AtomicUsize,
    wasm_size: Mutex<usize>,
    failure: Mutex<Option<String>>,
    last_input: Mutex<Option<CompileInput>>,
}

impl FakeCompiler {
    pub fn new() -> Self {
        let compiler = Self::default();
        *compiler.wasm_size.lock().unwrap() = 1024;
        compiler
    }

    pub fn set_wasm_size(&self, size: usize) {
        *self.wasm_size.lock().unwrap() = size;
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// The next `count` calls fail with a transport error
    pub fn fail_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<CompileInput> {
        self.last_input.lock().unwrap().clone()
    }
}

pub fn sample_interfaces() -> InterfaceSet {
    InterfaceSet {
        candid: "service : { greet : (text) -> (text) }".to_string(),
        typescript: Some("export interface _SERVICE {}".to_string()),
        did_js: Some("export const idlFactory = () => {};".to_string()),
        json_schema: None,
    }
}

#[async_trait]
impl CompilerService for FakeCompiler {
    async fn compile(&self, input: CompileInput) -> Result<CompiledArtifact, DeployError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = Some(input.clone());
        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if transient.is_ok() {
            return Err(DeployError::TransportError("compiler unreachable".to_string()));
        }
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(DeployError::CompilationError(message));
        }
        Ok(CompiledArtifact {
            wasm: vec![7u8; *self.wasm_size.lock().unwrap()],
            interfaces: sample_interfaces(),
            source_digest: input.source_digest,
        })
    }
}

// ================================ BUNDLER ====================================== //

#[derive(Debug, Clone)]
pub enum BundleBehavior {
    Output(Vec<(String, Vec<u8>, String)>),
    Transport(String),
    JobFailed(String),
    /// The job never leaves `processing` within the poll budget
    Timeout(u32),
}

pub struct FakeBundler {
    calls: AtomicUsize,
    transient_failures: AtomicUsize,
    behavior: Mutex<BundleBehavior>,
    last_input: Mutex<Option<BundleInput>>,
}

impl FakeBundler {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            behavior: Mutex::new(BundleBehavior::Output(vec![
                ("index.html".to_string(), b"<html></html>".to_vec(), "text/html".to_string()),
                ("assets/index-4f9a2c1b.js".to_string(), b"console.log(1)".to_vec(), "js".to_string()),
                ("assets/logo.svg".to_string(), b"<svg/>".to_vec(), "asset".to_string()),
            ])),
            last_input: Mutex::new(None),
        }
    }

    pub fn set_behavior(&self, behavior: BundleBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// The next `count` calls fail with a transport error
    pub fn fail_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<BundleInput> {
        self.last_input.lock().unwrap().clone()
    }
}

#[async_trait]
impl BundlerService for FakeBundler {
    async fn bundle(
        &self,
        input: BundleInput,
        progress: ProgressFn<'_>,
    ) -> Result<AssetBundle, DeployError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = Some(input);
        progress(0.5);

        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if transient.is_ok() {
            return Err(DeployError::TransportError("connection reset by peer".to_string()));
        }

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            BundleBehavior::Output(files) => {
                progress(1.0);
                Ok(files
                    .into_iter()
                    .map(|(path, content, kind)| AssetEntry::new(&path, content, kind))
                    .collect())
            }
            BundleBehavior::Transport(message) => Err(DeployError::TransportError(message)),
            BundleBehavior::JobFailed(message) => Err(DeployError::BundleJobFailed(message)),
            BundleBehavior::Timeout(attempts) => Err(DeployError::BundleTimeout { attempts }),
        }
    }
}

// ================================= FLAGS ======================================= //

#[derive(Default)]
pub struct FakeFlags {
    flags: Mutex<ChangeFlags>,
    fail_get: Mutex<bool>,
    fail_clear: Mutex<bool>,
    get_calls: AtomicUsize,
    clears: Mutex<Vec<(bool, bool)>>,
}

impl FakeFlags {
    pub fn new(flags: ChangeFlags) -> Self {
        let store = Self::default();
        *store.flags.lock().unwrap() = flags;
        store
    }

    pub fn set(&self, flags: ChangeFlags) {
        *self.flags.lock().unwrap() = flags;
    }

    pub fn current(&self) -> ChangeFlags {
        *self.flags.lock().unwrap()
    }

    pub fn fail_get(&self) {
        *self.fail_get.lock().unwrap() = true;
    }

    pub fn fail_clear(&self) {
        *self.fail_clear.lock().unwrap() = true;
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> Vec<(bool, bool)> {
        self.clears.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeFlagStore for FakeFlags {
    async fn get_change_flags(&self, _project_id: &str) -> Result<ChangeFlags, DeployError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_get.lock().unwrap() {
            return Err(DeployError::StorageError("flags unavailable".to_string()));
        }
        Ok(self.current())
    }

    async fn clear_change_flags(
        &self,
        _project_id: &str,
        clear_backend: bool,
        clear_frontend: bool,
    ) -> Result<(), DeployError> {
        self.clears.lock().unwrap().push((clear_backend, clear_frontend));
        if *self.fail_clear.lock().unwrap() {
            return Err(DeployError::StorageError("flags are read-only".to_string()));
        }
        let mut flags = self.flags.lock().unwrap();
        if clear_backend {
            flags.backend_changed = false;
        }
        if clear_frontend {
            flags.frontend_changed = false;
        }
        Ok(())
    }
}

// =============================== ARTIFACTS ===================================== //

#[derive(Default)]
pub struct MemoryArtifacts {
    interfaces: Mutex<HashMap<String, InterfaceSet>>,
    cache: Mutex<HashMap<String, CompiledArtifact>>,
    evictions: AtomicUsize,
}

impl MemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_interfaces(&self, project_id: &str, interfaces: InterfaceSet) {
        self.interfaces
            .lock()
            .unwrap()
            .insert(project_id.to_string(), interfaces);
    }

    pub fn put_cached(&self, project_id: &str, artifact: CompiledArtifact) {
        self.cache
            .lock()
            .unwrap()
            .insert(project_id.to_string(), artifact);
    }

    pub fn has_cached(&self, project_id: &str) -> bool {
        self.cache.lock().unwrap().contains_key(project_id)
    }

    pub fn stored_interfaces(&self, project_id: &str) -> Option<InterfaceSet> {
        self.interfaces.lock().unwrap().get(project_id).cloned()
    }

    pub fn evictions(&self) -> usize {
        self.evictions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn save_interfaces(&self, project_id: &str, interfaces: &InterfaceSet) -> Result<(), DeployError> {
        self.put_interfaces(project_id, interfaces.clone());
        Ok(())
    }

    async fn load_interfaces(&self, project_id: &str) -> Result<Option<InterfaceSet>, DeployError> {
        Ok(self.stored_interfaces(project_id))
    }

    async fn cache_artifact(&self, project_id: &str, artifact: &CompiledArtifact) -> Result<(), DeployError> {
        self.put_cached(project_id, artifact.clone());
        Ok(())
    }

    async fn cached_artifact(
        &self,
        project_id: &str,
        source_digest: &str,
    ) -> Result<Option<CompiledArtifact>, DeployError> {
        Ok(self
            .cache
            .lock()
            .unwrap()
            .get(project_id)
            .filter(|artifact| artifact.source_digest == source_digest)
            .cloned())
    }

    async fn evict_cached_artifact(&self, project_id: &str) -> Result<(), DeployError> {
        self.evictions.fetch_add(1, Ordering::SeqCst);
        self.cache.lock().unwrap().remove(project_id);
        Ok(())
    }
}

// ================================ WIRING ======================================= //

/// Every fake, kept around for assertions
pub struct Fakes {
    pub compiler: Arc<FakeCompiler>,
    pub bundler: Arc<FakeBundler>,
    pub host: Arc<RecordingHost>,
    pub flags: Arc<FakeFlags>,
    pub artifacts: Arc<MemoryArtifacts>,
}

impl Fakes {
    pub fn new(flags: ChangeFlags) -> Self {
        Self {
            compiler: Arc::new(FakeCompiler::new()),
            bundler: Arc::new(FakeBundler::new()),
            host: Arc::new(RecordingHost::new()),
            flags: Arc::new(FakeFlags::new(flags)),
            artifacts: Arc::new(MemoryArtifacts::new()),
        }
    }

    pub fn services(&self) -> DeployServices {
        DeployServices::new(
            self.compiler.clone(),
            self.bundler.clone(),
            self.host.clone(),
            self.flags.clone(),
            self.artifacts.clone(),
        )
    }
}

/// A small generated project
pub fn sample_snapshot() -> DeploymentSnapshot {
    DeploymentSnapshot::new(vec![
        ("backend/main.mo", "actor { public func greet(n : Text) : async Text { n } }"),
        (
            "backend/packages.json",
            r#"[{"name":"base","repo":"https://github.com/dfinity/motoko-base","version":"0.11.1"}]"#,
        ),
        ("frontend/package.json", r#"{"name":"demo","version":"1.0.0"}"#),
        ("frontend/src/App.tsx", "export default function App() { return null }"),
        ("frontend/.env", "API_URL=https://api.example\nBACKEND_TARGET_ID=stale\n"),
    ])
}

pub fn sample_request(project_id: &str) -> DeploymentRequest {
    DeploymentRequest::new(project_id, sample_snapshot(), ServerPair::new("be-1", "fe-1"))
}
