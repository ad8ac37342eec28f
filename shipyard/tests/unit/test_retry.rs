//! Retry coordinator tests

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use shipyard::deploy::fsm::DeploymentStage;
use shipyard::deploy::orchestrator::{DeploymentOrchestrator, OrchestratorSettings};
use shipyard::errors::DeployError;
use shipyard::models::workflow::{RetryWorkflow, WorkflowPhase};
use shipyard::retry::classifier::ErrorCategory;
use shipyard::retry::coordinator::{RetryCoordinator, RetrySettings, WorkflowObserver};
use shipyard::services::ChangeFlags;
use shipyard::utils::BackoffOptions;

use support::{sample_request, BundleBehavior, Fakes};

fn coordinator(max_executions: u32) -> RetryCoordinator {
    RetryCoordinator::new(RetrySettings {
        max_executions,
        backoff: BackoffOptions {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
    })
}

fn orchestrator() -> DeploymentOrchestrator {
    DeploymentOrchestrator::new(OrchestratorSettings {
        cooldown: Duration::from_secs(600),
        ..OrchestratorSettings::default()
    })
}

#[derive(Default)]
struct PhaseRecorder {
    phases: Mutex<Vec<(WorkflowPhase, u32)>>,
}

impl WorkflowObserver for PhaseRecorder {
    fn on_workflow_state_changed(&self, workflow: &RetryWorkflow) {
        self.phases
            .lock()
            .unwrap()
            .push((workflow.phase, workflow.execution_count));
    }
}

#[tokio::test]
async fn test_budget_bounds_executions() {
    let fakes = Fakes::new(ChangeFlags::all());
    fakes
        .bundler
        .set_behavior(BundleBehavior::Transport("bundler unreachable".to_string()));
    let orchestrator = orchestrator();
    let coordinator = coordinator(3);
    let _registration = coordinator.register_observer(orchestrator.workflow_observer());

    let err = coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap_err();

    // The last pipeline error, not a budget error
    assert!(matches!(err, DeployError::TransportError(msg) if msg.contains("unreachable")));

    // One initial execution plus three retries
    assert_eq!(fakes.bundler.calls(), 4);

    let workflow = coordinator.workflow("proj").unwrap();
    assert_eq!(workflow.phase, WorkflowPhase::Exhausted);
    assert_eq!(workflow.execution_count, 3);
    assert!(workflow.execution_count <= workflow.max_executions);
    assert_eq!(workflow.sequential_failures, 4);

    // Mirrored into the orchestrator's cache
    assert_eq!(orchestrator.workflow("proj"), Some(workflow));
    assert!(!orchestrator.is_running("proj"));
    assert_eq!(
        orchestrator.attempt("proj").unwrap().stage(),
        DeploymentStage::Failed
    );
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let fakes = Fakes::new(ChangeFlags::all());
    fakes.bundler.fail_next(2);
    let orchestrator = orchestrator();
    let coordinator = coordinator(3);
    let recorder = Arc::new(PhaseRecorder::default());
    let _registration = coordinator.register_observer(recorder.clone());

    let outcome = coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap();

    assert!(outcome.frontend.is_some());
    assert_eq!(fakes.bundler.calls(), 3);
    // The backend flag was cleared by the first execution
    assert_eq!(fakes.compiler.calls(), 1);

    let workflow = coordinator.workflow("proj").unwrap();
    assert_eq!(workflow.phase, WorkflowPhase::Succeeded);
    assert_eq!(workflow.execution_count, 2);
    assert_eq!(workflow.sequential_failures, 0);

    let phases = recorder.phases.lock().unwrap().clone();
    assert_eq!(
        phases,
        vec![
            (WorkflowPhase::Waiting, 0),
            (WorkflowPhase::Executing, 1),
            (WorkflowPhase::Waiting, 1),
            (WorkflowPhase::Executing, 2),
            (WorkflowPhase::Succeeded, 2),
        ]
    );

    // The retried attempt starts from a clean slate
    let attempt = orchestrator.attempt("proj").unwrap();
    assert_eq!(attempt.stage(), DeploymentStage::Completed);
    assert!(attempt.failure.is_none());
    assert!(attempt
        .logs
        .iter()
        .all(|entry| !entry.message.contains("connection reset")));
}

#[tokio::test]
async fn test_non_retryable_failure_is_not_retried() {
    let fakes = Fakes::new(ChangeFlags::all());
    fakes
        .compiler
        .fail_with("main.mo:1.1-1.2: syntax error [M0001], unexpected token");
    let orchestrator = orchestrator();
    let coordinator = coordinator(3);

    let err = coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::CompilationError(_)));
    assert_eq!(fakes.compiler.calls(), 1);
    assert!(coordinator.workflow("proj").is_none());

    // No workflow is active, so the fix is shown
    let failure = orchestrator.attempt("proj").unwrap().failure.unwrap();
    assert!(failure.suggested_fix.is_some());
}

#[tokio::test]
async fn test_job_failure_abandons_active_workflow() {
    let fakes = Fakes::new(ChangeFlags::new(false, true));
    fakes.bundler.fail_next(1);
    fakes
        .bundler
        .set_behavior(BundleBehavior::JobFailed("missing dependency react-dom".to_string()));
    let orchestrator = orchestrator();
    let coordinator = coordinator(3);
    let _registration = coordinator.register_observer(orchestrator.workflow_observer());

    let err = coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::BundleJobFailed(_)));
    assert_eq!(fakes.bundler.calls(), 2);

    let workflow = coordinator.workflow("proj").unwrap();
    assert_eq!(workflow.phase, WorkflowPhase::Abandoned);
    assert_eq!(workflow.execution_count, 1);

    // Withheld while the retry ran, surfaced once the workflow was abandoned
    let failure = orchestrator.attempt("proj").unwrap().failure.unwrap();
    assert!(failure.suggested_fix.is_some());
    assert!(orchestrator.workflow("proj").is_some_and(|w| !w.is_active()));
}

#[tokio::test]
async fn test_compile_error_after_transient_failure_shows_fix() {
    let fakes = Fakes::new(ChangeFlags::all());
    fakes.compiler.fail_next(1);
    fakes
        .compiler
        .fail_with("main.mo:1.1-1.2: syntax error [M0001], unexpected token");
    let orchestrator = orchestrator();
    let coordinator = coordinator(3);
    let _registration = coordinator.register_observer(orchestrator.workflow_observer());

    let err = coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::CompilationError(_)));
    assert_eq!(fakes.compiler.calls(), 2);
    assert_eq!(
        coordinator.workflow("proj").unwrap().phase,
        WorkflowPhase::Abandoned
    );

    let failure = orchestrator.attempt("proj").unwrap().failure.unwrap();
    assert_eq!(failure.category, ErrorCategory::Syntax);
    assert!(failure.suggested_fix.is_some());
}

#[tokio::test]
async fn test_exhausted_workflow_shows_fix() {
    let fakes = Fakes::new(ChangeFlags::new(false, true));
    fakes.bundler.set_behavior(BundleBehavior::Timeout(60));
    let orchestrator = orchestrator();
    let coordinator = coordinator(1);
    let _registration = coordinator.register_observer(orchestrator.workflow_observer());

    coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap_err();

    assert_eq!(
        coordinator.workflow("proj").unwrap().phase,
        WorkflowPhase::Exhausted
    );
    let failure = orchestrator.attempt("proj").unwrap().failure.unwrap();
    assert_eq!(failure.kind, "bundle_timeout");
    assert!(failure.suggested_fix.is_some());
}

#[tokio::test]
async fn test_zero_budget_never_retries() {
    let fakes = Fakes::new(ChangeFlags::new(false, true));
    fakes
        .bundler
        .set_behavior(BundleBehavior::Transport("timeout".to_string()));
    let orchestrator = orchestrator();
    let coordinator = coordinator(0);

    let err = coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::TransportError(_)));
    assert_eq!(fakes.bundler.calls(), 1);
    assert_eq!(
        coordinator.workflow("proj").unwrap().phase,
        WorkflowPhase::Exhausted
    );
}

#[tokio::test]
async fn test_new_failure_after_success_starts_fresh_workflow() {
    let fakes = Fakes::new(ChangeFlags::new(false, true));
    fakes.bundler.fail_next(1);
    let orchestrator = orchestrator();
    let coordinator = coordinator(3);

    coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap();
    let first = coordinator.workflow("proj").unwrap();
    assert_eq!(first.phase, WorkflowPhase::Succeeded);

    fakes.flags.set(ChangeFlags::new(false, true));
    fakes.bundler.fail_next(1);
    coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap();

    let second = coordinator.workflow("proj").unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.execution_count, 1);
}

#[tokio::test]
async fn test_slot_is_held_during_backoff() {
    let fakes = Fakes::new(ChangeFlags::all());
    fakes.bundler.fail_next(1);
    let orchestrator = orchestrator();
    let coordinator = RetryCoordinator::new(RetrySettings {
        max_executions: 3,
        backoff: BackoffOptions {
            base_delay: Duration::from_millis(150),
            max_delay: Duration::from_millis(150),
            multiplier: 1.0,
        },
    });
    let _registration = coordinator.register_observer(orchestrator.workflow_observer());
    let services = fakes.services();

    let (retried, manual) = tokio::join!(
        coordinator.run(&orchestrator, &services, sample_request("proj")),
        async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let running = orchestrator.is_running("proj");
            let result = orchestrator.execute(&services, sample_request("proj")).await;
            (running, result)
        },
    );

    let (was_running, manual) = manual;
    assert!(was_running);
    assert!(matches!(manual, Err(DeployError::AlreadyRunning(_))));

    // The retried execution was not disturbed
    let outcome = retried.unwrap();
    assert!(outcome.frontend.is_some());
    assert_eq!(fakes.bundler.calls(), 2);

    let workflow = coordinator.workflow("proj").unwrap();
    assert_eq!(workflow.phase, WorkflowPhase::Succeeded);
    assert_eq!(workflow.execution_count, 1);
    assert!(!orchestrator.workflow("proj").unwrap().is_active());
    assert!(!orchestrator.is_running("proj"));
    assert_eq!(
        orchestrator.attempt("proj").unwrap().stage(),
        DeploymentStage::Completed
    );
}

#[tokio::test]
async fn test_concurrent_run_is_rejected_without_workflow() {
    let fakes = Fakes::new(ChangeFlags::all());
    fakes.host.set_delay(Duration::from_millis(20));
    let orchestrator = orchestrator();
    let coordinator = coordinator(3);
    let services = fakes.services();

    let (first, second) = tokio::join!(
        coordinator.run(&orchestrator, &services, sample_request("proj")),
        coordinator.run(&orchestrator, &services, sample_request("proj")),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(DeployError::AlreadyRunning(_))));
    assert!(coordinator.workflow("proj").is_none());
}

#[tokio::test]
async fn test_busy_project_leaves_no_workflow_behind() {
    let fakes = Fakes::new(ChangeFlags::all());
    let orchestrator = orchestrator();
    let coordinator = coordinator(3);
    let _registration = coordinator.register_observer(orchestrator.workflow_observer());

    let guard = orchestrator.try_reserve("proj").unwrap();
    let err = coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::AlreadyRunning(_)));
    assert!(coordinator.workflow("proj").is_none());
    assert!(orchestrator.workflow("proj").is_none());
    assert_eq!(fakes.compiler.calls(), 0);

    // Once released, the project deploys normally
    drop(guard);
    coordinator
        .run(&orchestrator, &fakes.services(), sample_request("proj"))
        .await
        .unwrap();
    assert_eq!(
        orchestrator.attempt("proj").unwrap().stage(),
        DeploymentStage::Completed
    );
}
