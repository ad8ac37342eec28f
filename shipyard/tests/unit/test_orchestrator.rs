//! Deployment orchestrator tests

mod support;

use std::time::Duration;

use shipyard::deploy::attempt::{AttemptLogLevel, DeployEventKind};
use shipyard::deploy::fsm::DeploymentStage;
use shipyard::deploy::orchestrator::{DeploymentOrchestrator, OrchestratorSettings};
use shipyard::deploy::upload::UploadPath;
use shipyard::errors::DeployError;
use shipyard::models::artifact::CompiledArtifact;
use shipyard::models::deployment::{DeployPlan, DeploymentRequest, ServerPair};
use shipyard::models::snapshot::DeploymentSnapshot;
use shipyard::retry::classifier::ErrorCategory;
use shipyard::services::ChangeFlags;

use support::{sample_interfaces, sample_request, sample_snapshot, BundleBehavior, Fakes};

fn orchestrator() -> DeploymentOrchestrator {
    DeploymentOrchestrator::new(OrchestratorSettings {
        cooldown: Duration::from_secs(600),
        ..OrchestratorSettings::default()
    })
}

#[tokio::test]
async fn test_nothing_changed_skips_every_stage() {
    let fakes = Fakes::new(ChangeFlags::new(false, false));
    let orchestrator = orchestrator();

    let outcome = orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await
        .unwrap();

    assert!(outcome.skipped);
    assert_eq!(outcome.plan, DeployPlan::Skip);
    assert_eq!(outcome.frontend_url.as_deref(), Some("https://fe-1.icp0.io"));
    assert_eq!(fakes.flags.get_calls(), 1);
    assert_eq!(fakes.compiler.calls(), 0);
    assert_eq!(fakes.bundler.calls(), 0);
    assert!(fakes.host.calls().is_empty());
    assert!(fakes.flags.clears().is_empty());

    let attempt = orchestrator.attempt("proj").unwrap();
    assert_eq!(attempt.stage(), DeploymentStage::Completed);
    assert_eq!(attempt.plan, Some(DeployPlan::Skip));
    assert!(!orchestrator.is_running("proj"));
}

#[tokio::test]
async fn test_full_deployment() {
    let fakes = Fakes::new(ChangeFlags::all());
    let orchestrator = orchestrator();

    let outcome = orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await
        .unwrap();

    assert_eq!(outcome.plan, DeployPlan::Full);
    assert!(!outcome.artifact_reused);
    let backend = outcome.backend.unwrap();
    assert_eq!(backend.path, UploadPath::Direct);
    assert_eq!(backend.target, "be-1");
    let frontend = outcome.frontend.unwrap();
    assert_eq!(frontend.target, "fe-1");
    assert_eq!(frontend.total(), 3);

    // Compiler saw the backend sources and packages
    let compile = fakes.compiler.last_input().unwrap();
    assert_eq!(compile.main_file, "main.mo");
    assert_eq!(compile.packages.len(), 1);
    assert!(compile.files.iter().all(|f| f.name != "packages.json"));

    // Bundler saw declarations and the backend target
    let bundle = fakes.bundler.last_input().unwrap();
    assert_eq!(bundle.package_json["name"], "demo");
    assert!(bundle
        .files
        .iter()
        .any(|f| f.name == "src/declarations/backend/backend.did"));
    let env = bundle.files.iter().find(|f| f.name == ".env").unwrap();
    assert_eq!(
        env.content,
        "API_URL=https://api.example\nBACKEND_TARGET_ID=be-1\nVITE_BACKEND_TARGET_ID=be-1\n"
    );

    // Both flags cleared, artifact cache evicted, interfaces persisted
    assert_eq!(fakes.flags.current(), ChangeFlags::new(false, false));
    assert_eq!(fakes.artifacts.evictions(), 1);
    assert!(!fakes.artifacts.has_cached("proj"));
    assert_eq!(
        fakes.artifacts.stored_interfaces("proj"),
        Some(sample_interfaces())
    );

    let attempt = orchestrator.attempt("proj").unwrap();
    assert_eq!(attempt.stage(), DeploymentStage::Completed);
    assert_eq!(attempt.progress(), 100);
    assert!(attempt.finished_at.is_some());
    assert!(attempt.failure.is_none());
}

#[tokio::test]
async fn test_backend_only_deployment() {
    let fakes = Fakes::new(ChangeFlags::new(true, false));
    let orchestrator = orchestrator();

    let outcome = orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await
        .unwrap();

    assert_eq!(outcome.plan, DeployPlan::BackendOnly);
    assert!(outcome.backend.is_some());
    assert!(outcome.frontend.is_none());
    // The URL of the earlier frontend deployment is still reported
    assert_eq!(outcome.frontend_url.as_deref(), Some("https://fe-1.icp0.io"));
    assert_eq!(fakes.bundler.calls(), 0);
    assert_eq!(fakes.flags.clears(), vec![(true, false)]);
}

#[tokio::test]
async fn test_frontend_only_uses_stored_interfaces() {
    let fakes = Fakes::new(ChangeFlags::new(false, true));
    fakes.artifacts.put_interfaces("proj", sample_interfaces());
    let orchestrator = orchestrator();

    let outcome = orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await
        .unwrap();

    assert_eq!(outcome.plan, DeployPlan::FrontendOnly);
    assert!(outcome.backend.is_none());
    assert_eq!(fakes.compiler.calls(), 0);

    let bundle = fakes.bundler.last_input().unwrap();
    assert!(bundle
        .files
        .iter()
        .any(|f| f.name == "src/declarations/backend/backend.did.d.ts"));
    assert_eq!(fakes.flags.clears(), vec![(false, true)]);
}

#[tokio::test]
async fn test_bundling_failure_never_deploys_frontend() {
    let fakes = Fakes::new(ChangeFlags::all());
    fakes
        .bundler
        .set_behavior(BundleBehavior::JobFailed("vite exited with code 1".to_string()));
    let orchestrator = orchestrator();
    let mut events = orchestrator.subscribe();

    let err = orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::BundleJobFailed(_)));

    let mut stages = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DeployEventKind::Stage { stage, .. } = event.kind {
            stages.push(stage);
        }
    }
    assert!(!stages.contains(&DeploymentStage::DeployingFrontend));
    assert_eq!(stages.last(), Some(&DeploymentStage::Failed));

    // Only asset stores would show up after the backend install
    assert!(fakes.host.stored_paths().is_empty());
    // Backend went out, so only its flag is cleared
    assert_eq!(fakes.flags.clears(), vec![(true, false)]);

    let attempt = orchestrator.attempt("proj").unwrap();
    assert_eq!(attempt.stage(), DeploymentStage::Failed);
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.kind, "bundle_failed");
    assert_eq!(failure.category, ErrorCategory::Build);
    assert!(!failure.retryable);
    assert!(failure.suggested_fix.is_some());
    assert!(attempt
        .logs
        .iter()
        .any(|entry| entry.level == AttemptLogLevel::Error));
}

#[tokio::test]
async fn test_poll_budget_exhaustion_fails_attempt() {
    let fakes = Fakes::new(ChangeFlags::new(false, true));
    fakes.bundler.set_behavior(BundleBehavior::Timeout(60));
    let orchestrator = orchestrator();

    let err = orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::BundleTimeout { attempts: 60 }));

    let attempt = orchestrator.attempt("proj").unwrap();
    assert_eq!(attempt.stage(), DeploymentStage::Failed);
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.kind, "bundle_timeout");
    assert!(failure.retryable);

    assert!(fakes.host.stored_paths().is_empty());
    // The frontend flag stays set for the next attempt
    assert!(fakes.flags.clears().is_empty());
    assert!(fakes.flags.current().frontend_changed);
}

#[tokio::test]
async fn test_second_execution_is_rejected_while_running() {
    let fakes = Fakes::new(ChangeFlags::all());
    fakes.host.set_delay(Duration::from_millis(20));
    let orchestrator = orchestrator();
    let services = fakes.services();

    let (first, second) = tokio::join!(
        orchestrator.execute(&services, sample_request("proj")),
        orchestrator.execute(&services, sample_request("proj")),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(DeployError::AlreadyRunning(id)) if id == "proj"));
    assert_eq!(fakes.compiler.calls(), 1);
    assert!(!orchestrator.is_running("proj"));

    // The rejected call left the running attempt alone
    let attempt = orchestrator.attempt("proj").unwrap();
    assert_eq!(attempt.stage(), DeploymentStage::Completed);
}

#[tokio::test]
async fn test_other_projects_run_concurrently() {
    let fakes = Fakes::new(ChangeFlags::new(false, true));
    fakes.host.set_delay(Duration::from_millis(5));
    let orchestrator = orchestrator();
    let services = fakes.services();

    let (a, b) = tokio::join!(
        orchestrator.execute(&services, sample_request("alpha")),
        orchestrator.execute(&services, sample_request("beta")),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
}

#[tokio::test]
async fn test_flag_clear_failure_is_not_fatal() {
    let fakes = Fakes::new(ChangeFlags::all());
    fakes.flags.fail_clear();
    let orchestrator = orchestrator();

    let outcome = orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await;
    assert!(outcome.is_ok());

    let attempt = orchestrator.attempt("proj").unwrap();
    assert_eq!(attempt.stage(), DeploymentStage::Completed);
    let warnings = attempt
        .logs
        .iter()
        .filter(|entry| entry.level == AttemptLogLevel::Warn)
        .count();
    assert_eq!(warnings, 2);
}

#[tokio::test]
async fn test_unreadable_flags_deploy_everything() {
    let fakes = Fakes::new(ChangeFlags::new(false, false));
    fakes.flags.fail_get();
    let orchestrator = orchestrator();

    let outcome = orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await
        .unwrap();
    assert_eq!(outcome.plan, DeployPlan::Full);
}

#[tokio::test]
async fn test_cached_artifact_is_reused_then_evicted() {
    let fakes = Fakes::new(ChangeFlags::new(true, false));
    let snapshot = sample_snapshot();
    fakes.artifacts.put_cached(
        "proj",
        CompiledArtifact {
            wasm: vec![9u8; 64],
            interfaces: sample_interfaces(),
            source_digest: snapshot.digest_under("backend"),
        },
    );
    let orchestrator = orchestrator();
    let request = DeploymentRequest::new("proj", snapshot, ServerPair::new("be-1", "fe-1"));

    let outcome = orchestrator
        .execute(&fakes.services(), request)
        .await
        .unwrap();

    assert!(outcome.artifact_reused);
    assert_eq!(outcome.backend.unwrap().bytes, 64);
    assert_eq!(fakes.compiler.calls(), 0);
    assert!(!fakes.artifacts.has_cached("proj"));
}

#[tokio::test]
async fn test_large_backend_takes_chunked_path() {
    let fakes = Fakes::new(ChangeFlags::new(true, false));
    fakes.compiler.set_wasm_size(4_500_000);
    let orchestrator = orchestrator();

    let outcome = orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await
        .unwrap();

    assert!(matches!(
        outcome.backend.unwrap().path,
        UploadPath::Chunked { total_chunks: 3, .. }
    ));
}

#[tokio::test]
async fn test_missing_entry_file_fails_compilation() {
    let fakes = Fakes::new(ChangeFlags::all());
    let orchestrator = orchestrator();
    let snapshot = DeploymentSnapshot::new(vec![
        ("backend/lib.mo", "module {}"),
        ("frontend/src/App.tsx", "export default null"),
    ]);
    let request = DeploymentRequest::new("proj", snapshot, ServerPair::new("be-1", "fe-1"));

    let err = orchestrator
        .execute(&fakes.services(), request)
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::CompilationError(msg) if msg.contains("main.mo")));
    assert_eq!(fakes.compiler.calls(), 0);
    assert_eq!(
        orchestrator.attempt("proj").unwrap().stage(),
        DeploymentStage::Failed
    );
}

#[tokio::test]
async fn test_compile_error_is_classified() {
    let fakes = Fakes::new(ChangeFlags::all());
    fakes
        .compiler
        .fail_with("main.mo:2.1-2.3: syntax error [M0001], unexpected token 'let'");
    let orchestrator = orchestrator();

    orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await
        .unwrap_err();

    let failure = orchestrator.attempt("proj").unwrap().failure.unwrap();
    assert_eq!(failure.category, ErrorCategory::Syntax);
    assert!(failure.summary.starts_with("main.mo:2.1-2.3"));
    assert!(fakes.host.calls().is_empty());
}

#[tokio::test]
async fn test_finished_attempt_cools_down_to_idle() {
    let fakes = Fakes::new(ChangeFlags::new(false, false));
    let orchestrator = DeploymentOrchestrator::new(OrchestratorSettings {
        cooldown: Duration::from_millis(10),
        ..OrchestratorSettings::default()
    });

    orchestrator
        .execute(&fakes.services(), sample_request("proj"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let attempt = orchestrator.attempt("proj").unwrap();
    assert_eq!(attempt.stage(), DeploymentStage::Idle);
    assert!(!attempt.logs.is_empty());
}
