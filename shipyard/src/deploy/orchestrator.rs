//! Deployment orchestrator
//!
//! Runs one attempt per call: analyze which components changed, compile and
//! install the backend, then bundle and deploy the frontend. At most one
//! attempt per project is in flight; a second call is rejected immediately.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_models::{InstallMetadata, PackageSpec, SourceFile};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::workflow::WorkflowStateCache;
use crate::deploy::assets::{AssetDeployReport, AssetSettings, PhasedDeployer};
use crate::deploy::attempt::{AttemptBoard, AttemptHandle, DeployEvent, DeploymentAttempt, FailureSummary};
use crate::deploy::fsm::DeploymentEvent;
use crate::deploy::guard::{InFlightGuard, InFlightRegistry};
use crate::deploy::smart::SmartDeploy;
use crate::deploy::upload::{InstallReport, UploadManager, UploadSettings};
use crate::errors::DeployError;
use crate::models::artifact::{CompiledArtifact, InterfaceSet};
use crate::models::deployment::{DeployPlan, DeploymentRequest, ModuleKind};
use crate::models::snapshot::FileContent;
use crate::models::workflow::RetryWorkflow;
use crate::retry::classifier::classify;
use crate::retry::coordinator::WorkflowObserver;
use crate::services::{BundleInput, CompileInput, DeployServices};
use crate::storage::settings::Settings;

/// Where interface descriptors land in the frontend source set
pub const DECLARATIONS_DIR: &str = "src/declarations/backend";

/// Environment file carrying the backend target id
pub const ENV_FILE: &str = ".env";

const BACKEND_TARGET_KEYS: &[&str] = &["BACKEND_TARGET_ID", "VITE_BACKEND_TARGET_ID"];

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub backend_dir: String,
    pub frontend_dir: String,

    /// Entry file, relative to `backend_dir`
    pub backend_entry: String,
    pub compile_mode: String,
    pub project_type: String,
    pub frontend_url_template: String,

    /// Delay before a finished attempt returns to idle
    pub cooldown: Duration,
    pub max_retained_attempts: usize,
    pub event_capacity: usize,
    pub upload: UploadSettings,
    pub assets: AssetSettings,
}

impl OrchestratorSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            backend_dir: settings.layout.backend_dir.clone(),
            frontend_dir: settings.layout.frontend_dir.clone(),
            backend_entry: settings.layout.backend_entry.clone(),
            compile_mode: settings.layout.compile_mode.clone(),
            project_type: settings.bundler.project_type.clone(),
            frontend_url_template: settings.frontend_url_template.clone(),
            cooldown: Duration::from_millis(settings.orchestrator.cooldown_ms),
            max_retained_attempts: settings.orchestrator.max_retained_attempts,
            event_capacity: 256,
            upload: UploadSettings::from_config(&settings.upload, &settings.environment),
            assets: AssetSettings::from(&settings.assets),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Result of a successful execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub attempt_id: String,
    pub project_id: String,
    pub plan: DeployPlan,
    pub backend: Option<InstallReport>,
    pub frontend: Option<AssetDeployReport>,

    /// The frontend's public URL, including one deployed by an earlier attempt
    pub frontend_url: Option<String>,

    /// No component changed and nothing ran
    pub skipped: bool,

    /// The backend install used a cached artifact instead of compiling
    pub artifact_reused: bool,
}

/// Mirrors workflow states and surfaces fixes withheld while a workflow ran
struct WorkflowMirror {
    cache: Arc<WorkflowStateCache>,
    attempts: AttemptBoard,
}

impl WorkflowObserver for WorkflowMirror {
    fn on_workflow_state_changed(&self, workflow: &RetryWorkflow) {
        self.cache.on_workflow_state_changed(workflow);
        if !workflow.is_active() && self.attempts.reveal_fix(&workflow.project_id) {
            debug!(
                "Workflow {} of {} ended, suggested fix surfaced",
                workflow.id, workflow.project_id
            );
        }
    }
}

/// Deployment pipeline driver
pub struct DeploymentOrchestrator {
    settings: OrchestratorSettings,
    in_flight: InFlightRegistry,
    attempts: AttemptBoard,
    workflows: Arc<WorkflowStateCache>,
}

impl DeploymentOrchestrator {
    pub fn new(settings: OrchestratorSettings) -> Self {
        let attempts = AttemptBoard::new(settings.event_capacity).with_retention(settings.max_retained_attempts);
        Self {
            settings,
            in_flight: InFlightRegistry::new(),
            attempts,
            workflows: Arc::new(WorkflowStateCache::new()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Live stage, progress and log events of every project
    pub fn subscribe(&self) -> broadcast::Receiver<DeployEvent> {
        self.attempts.subscribe()
    }

    /// Latest attempt of a project
    pub fn attempt(&self, project_id: &str) -> Option<DeploymentAttempt> {
        self.attempts.get(project_id)
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.in_flight.is_running(project_id)
    }

    /// Latest retry workflow state mirrored for a project
    pub fn workflow(&self, project_id: &str) -> Option<RetryWorkflow> {
        self.workflows.get(project_id)
    }

    /// Observer to register with a retry coordinator
    pub fn workflow_observer(&self) -> Arc<dyn WorkflowObserver> {
        Arc::new(WorkflowMirror {
            cache: self.workflows.clone(),
            attempts: self.attempts.clone(),
        })
    }

    /// Claim the project's execution slot.
    ///
    /// The slot stays claimed until the guard drops; [`Self::execute_reserved`]
    /// runs under it. Fails with [`DeployError::AlreadyRunning`] while another
    /// holder has it.
    pub fn try_reserve(&self, project_id: &str) -> Result<InFlightGuard, DeployError> {
        self.in_flight.try_acquire(project_id).ok_or_else(|| {
            warn!("Rejecting deployment of {}: one is already running", project_id);
            DeployError::AlreadyRunning(project_id.to_string())
        })
    }

    fn check_reservation(&self, guard: &InFlightGuard, project_id: &str) -> Result<(), DeployError> {
        if guard.project_id() == project_id && self.in_flight.owns(guard) {
            Ok(())
        } else {
            Err(DeployError::InvalidTransition(format!(
                "execution slot of {} is not held by this orchestrator",
                project_id
            )))
        }
    }

    /// Clear the project's attempt before a retry re-enters the pipeline.
    /// Only the slot holder may do this, so a running attempt is never wiped.
    pub fn reset_attempt(&self, guard: &InFlightGuard) -> Result<(), DeployError> {
        self.check_reservation(guard, guard.project_id())?;
        self.attempts.reset(guard.project_id());
        Ok(())
    }

    /// Run one deployment attempt.
    ///
    /// Returns [`DeployError::AlreadyRunning`] without touching any state when
    /// the project already has an attempt in flight.
    pub async fn execute(
        &self,
        services: &DeployServices,
        request: DeploymentRequest,
    ) -> Result<DeploymentOutcome, DeployError> {
        let guard = self.try_reserve(&request.project_id)?;
        self.execute_reserved(services, request, &guard).await
    }

    /// Run one deployment attempt under a slot claimed with [`Self::try_reserve`]
    pub async fn execute_reserved(
        &self,
        services: &DeployServices,
        request: DeploymentRequest,
        guard: &InFlightGuard,
    ) -> Result<DeploymentOutcome, DeployError> {
        let project_id = request.project_id.clone();
        self.check_reservation(guard, &project_id)?;

        let handle = self.attempts.begin(&project_id, request.servers.clone())?;
        handle.info(format!(
            "Deploying {} (backend {}, frontend {})",
            project_id, request.servers.backend, request.servers.frontend
        ));

        let result = self.run_pipeline(services, &request, &handle).await;

        match &result {
            Ok(outcome) if outcome.skipped => handle.info("No changes detected, nothing to deploy"),
            Ok(_) => handle.info("Deployment completed"),
            Err(e) => {
                let show_fix = !self.workflows.is_active(&project_id);
                let failure = FailureSummary::new(e, classify(e), show_fix);
                if let Err(transition_error) = handle.fail(failure) {
                    warn!("Could not mark attempt as failed: {}", transition_error);
                }
            }
        }

        self.schedule_cooldown(&handle);
        result
    }

    fn schedule_cooldown(&self, handle: &AttemptHandle) {
        let board = self.attempts.clone();
        let project_id = handle.project_id().to_string();
        let attempt_id = handle.id().to_string();
        let cooldown = self.settings.cooldown;

        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            if board.cool_down(&project_id, &attempt_id) {
                debug!("Attempt {} of {} returned to idle", attempt_id, project_id);
            }
        });
    }

    async fn run_pipeline(
        &self,
        services: &DeployServices,
        request: &DeploymentRequest,
        handle: &AttemptHandle,
    ) -> Result<DeploymentOutcome, DeployError> {
        let project_id = request.project_id.as_str();
        let smart = SmartDeploy::new(services.flags.as_ref());

        let plan = smart.plan(project_id, request.force).await;
        handle.set_plan(plan);
        handle.progress(1.0);

        let mut outcome = DeploymentOutcome {
            attempt_id: handle.id().to_string(),
            project_id: project_id.to_string(),
            plan,
            backend: None,
            frontend: None,
            frontend_url: Some(request.servers.frontend_url(&self.settings.frontend_url_template)),
            skipped: plan == DeployPlan::Skip,
            artifact_reused: false,
        };

        if plan == DeployPlan::Skip {
            handle.transition(DeploymentEvent::Complete)?;
            return Ok(outcome);
        }

        let mut fresh_interfaces = None;

        if plan.runs_backend() {
            handle.transition(DeploymentEvent::CompileBackend)?;
            let (artifact, reused) = self.obtain_artifact(services, request, handle).await?;

            handle.transition(DeploymentEvent::InstallBackend)?;
            let metadata = InstallMetadata {
                name: project_id.to_string(),
                candid: Some(artifact.interfaces.candid.clone()),
                source_digest: artifact.source_digest.clone(),
            };
            let report = UploadManager::new(services.host.as_ref(), &self.settings.upload)
                .install(&artifact, &request.servers.backend, &metadata, &|f| handle.progress(f))
                .await?;
            handle.info(format!(
                "Backend installed on {} ({} bytes)",
                report.target, report.bytes
            ));

            if !smart.mark_deployed(project_id, ModuleKind::Backend).await {
                handle.warn("Backend change flag could not be cleared");
            }
            if let Err(e) = services.artifacts.evict_cached_artifact(project_id).await {
                warn!("Failed to evict cached artifact for {}: {}", project_id, e);
            }

            outcome.backend = Some(report);
            outcome.artifact_reused = reused;
            fresh_interfaces = Some(artifact.interfaces);
        }

        if plan.runs_frontend() {
            handle.transition(DeploymentEvent::BundleFrontend)?;

            let interfaces = match fresh_interfaces {
                Some(interfaces) => Some(interfaces),
                None => match services.artifacts.load_interfaces(project_id).await {
                    Ok(found) => found,
                    Err(e) => {
                        handle.warn(format!("Stored backend interfaces unavailable: {}", e));
                        None
                    }
                },
            };

            let input = self.bundle_input(request, interfaces.as_ref())?;
            handle.info(format!("Bundling {} frontend files", input.files.len()));
            let bundle = services
                .bundler
                .bundle(input, &|f| handle.progress(f))
                .await?;

            handle.transition(DeploymentEvent::DeployFrontend)?;
            let report = PhasedDeployer::new(
                services.host.as_ref(),
                &self.settings.assets,
                &request.servers.frontend,
            )
            .deploy(bundle, project_id, &|f| handle.progress(f))
            .await?;
            handle.info(format!(
                "Deployed {} assets to {}",
                report.total(),
                report.target
            ));

            if !smart.mark_deployed(project_id, ModuleKind::Frontend).await {
                handle.warn("Frontend change flag could not be cleared");
            }

            outcome.frontend = Some(report);
        }

        handle.transition(DeploymentEvent::Complete)?;
        Ok(outcome)
    }

    /// Compile the backend, or reuse an artifact cached for the same sources
    async fn obtain_artifact(
        &self,
        services: &DeployServices,
        request: &DeploymentRequest,
        handle: &AttemptHandle,
    ) -> Result<(CompiledArtifact, bool), DeployError> {
        let project_id = request.project_id.as_str();
        let snapshot = &request.snapshot;
        let backend_dir = self.settings.backend_dir.as_str();
        let source_digest = snapshot.digest_under(backend_dir);

        match services
            .artifacts
            .cached_artifact(project_id, &source_digest)
            .await
        {
            Ok(Some(artifact)) => {
                handle.info(format!(
                    "Reusing cached backend build ({} bytes)",
                    artifact.size()
                ));
                handle.progress(1.0);
                return Ok((artifact, true));
            }
            Ok(None) => {}
            Err(e) => warn!("Artifact cache lookup failed for {}: {}", project_id, e),
        }

        let mut packages = Vec::new();
        let mut files = Vec::new();
        for (path, content) in snapshot.files_under(backend_dir) {
            if path == "packages.json" {
                packages = parse_packages(content)?;
                continue;
            }
            match content.as_text() {
                Some(text) => files.push(SourceFile::text(path, text)),
                None => debug!("Skipping binary backend file {}", path),
            }
        }

        if !files.iter().any(|f| f.name == self.settings.backend_entry) {
            return Err(DeployError::CompilationError(format!(
                "entry file {}/{} not found",
                backend_dir, self.settings.backend_entry
            )));
        }

        handle.info(format!("Compiling {} backend files", files.len()));
        let artifact = services
            .compiler
            .compile(CompileInput {
                files,
                packages,
                main_file: self.settings.backend_entry.clone(),
                mode: self.settings.compile_mode.clone(),
                source_digest,
            })
            .await?;
        handle.progress(1.0);
        handle.info(format!("Backend compiled ({} bytes)", artifact.size()));

        if let Err(e) = services
            .artifacts
            .save_interfaces(project_id, &artifact.interfaces)
            .await
        {
            handle.warn(format!("Could not persist backend interfaces: {}", e));
        }
        if let Err(e) = services.artifacts.cache_artifact(project_id, &artifact).await {
            warn!("Could not cache compiled artifact for {}: {}", project_id, e);
        }

        Ok((artifact, false))
    }

    /// Frontend source set with backend declarations and target id injected
    fn bundle_input(
        &self,
        request: &DeploymentRequest,
        interfaces: Option<&InterfaceSet>,
    ) -> Result<BundleInput, DeployError> {
        let snapshot = &request.snapshot;
        let mut package_json = None;
        let mut existing_env = None;
        let mut files = Vec::new();

        for (path, content) in snapshot.files_under(&self.settings.frontend_dir) {
            match path {
                "package.json" => {
                    let value: serde_json::Value = serde_json::from_slice(content.as_bytes())
                        .map_err(|e| DeployError::BundlingError(format!("invalid package.json: {}", e)))?;
                    package_json = Some(value);
                }
                ENV_FILE => {
                    existing_env = content.as_text().map(str::to_string);
                    continue;
                }
                _ => {}
            }
            files.push(source_file(path, content));
        }

        if let Some(interfaces) = interfaces {
            for (path, content) in interfaces.declaration_files(DECLARATIONS_DIR) {
                files.retain(|f| f.name != path);
                files.push(SourceFile::text(path, content));
            }
        }

        files.push(SourceFile::text(
            ENV_FILE,
            env_file(existing_env.as_deref(), &request.servers.backend),
        ));

        let package_json = package_json.unwrap_or_else(|| {
            json!({
                "name": request.project_id,
                "private": true,
                "version": "0.0.0",
                "type": "module"
            })
        });

        Ok(BundleInput {
            files,
            package_json,
            project_type: self.settings.project_type.clone(),
        })
    }
}

fn source_file(path: &str, content: &FileContent) -> SourceFile {
    match content {
        FileContent::Text(text) => SourceFile::text(path, text.as_str()),
        FileContent::Binary(bytes) => SourceFile {
            name: path.to_string(),
            content: BASE64.encode(bytes),
            encoding: Some("base64".to_string()),
        },
    }
}

fn parse_packages(content: &FileContent) -> Result<Vec<PackageSpec>, DeployError> {
    serde_json::from_slice(content.as_bytes())
        .map_err(|e| DeployError::CompilationError(format!("invalid packages.json: {}", e)))
}

/// `.env` content with the backend target keys set, keeping unrelated lines
pub fn env_file(existing: Option<&str>, backend_target: &str) -> String {
    let mut lines: Vec<String> = existing
        .unwrap_or_default()
        .lines()
        .filter(|line| {
            let key = line.split('=').next().unwrap_or_default().trim();
            !BACKEND_TARGET_KEYS.contains(&key)
        })
        .map(str::to_string)
        .collect();

    for key in BACKEND_TARGET_KEYS {
        lines.push(format!("{}={}", key, backend_target));
    }
    lines.join("\n") + "\n"
}
