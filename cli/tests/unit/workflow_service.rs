//! Tests for the durable provisioning workflow.
//!
//! Every test runs on a paused clock, so TTL holds and retry backoff
//! complete instantly.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use chrono::Utc;
use vmgr_cli::application::ports::{RunStore, UnitCatalog};
use vmgr_cli::application::services::workflow::{
    TtlControl, TtlWatch, WorkflowRunner, WorkflowSettings,
};
use vmgr_cli::domain::error::{EngineError, Step, WorkflowError};
use vmgr_cli::infra::memory::MemoryEngine;
use vmgr_common::{NETWORK_UNIT, NetworkInfo, RunMode, WorkflowPhase, WorkflowRun};

use crate::helpers::{MemoryRunStore, RecordingReporter, fast_workflow_policy};

use WorkflowPhase::{Active, Deploying, Done, EnsuringNetwork, Failed, Start, TearingDown};

const PROJECT: &str = "vmgr";
const RUN_ID: &str = "run-00000000000000aa";

fn runner<'a>(
    engine: &'a MemoryEngine,
    store: &'a MemoryRunStore,
    max_attempts: u32,
) -> WorkflowRunner<'a, MemoryEngine, MemoryRunStore> {
    WorkflowRunner::new(
        engine,
        store,
        WorkflowSettings {
            project: PROJECT.into(),
            location: "westus".into(),
            policy: fast_workflow_policy(max_attempts),
        },
    )
}

async fn unit_names(engine: &MemoryEngine) -> Vec<String> {
    engine
        .list(PROJECT)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.name)
        .collect()
}

fn recorded_run(phase: WorkflowPhase) -> WorkflowRun {
    let mut run = WorkflowRun::new(RUN_ID, PROJECT, "web", RunMode::Ephemeral, 60, Utc::now());
    run.phase = phase;
    run.network = Some(NetworkInfo {
        resource_group: "rg-vmgr".into(),
        subnet_id: "/resourceGroups/rg-vmgr/subnets/default".into(),
    });
    run
}

#[tokio::test(start_paused = true)]
async fn completed_timer_tears_the_vm_down() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();

    let run = runner(&engine, &store, 3)
        .run(
            "web",
            RunMode::Ephemeral,
            Duration::from_secs(300),
            &mut TtlWatch::detached(),
            &RecordingReporter::default(),
        )
        .await
        .unwrap();

    assert_eq!(run.phase, Done);
    assert_eq!(
        store.saved_phases(),
        vec![Start, EnsuringNetwork, Deploying, Active, TearingDown, Done]
    );
    assert_eq!(run.unit_name.as_deref(), Some("vmgrweb"));
    assert!(run.address.as_deref().unwrap().starts_with("10.0.0."));
    // The VM is gone; the shared network stays.
    assert_eq!(unit_names(&engine).await, vec![NETWORK_UNIT]);
}

/// Index of the first `step` call on `unit` in the engine's call log.
fn first_call(engine: &MemoryEngine, step: Step, unit: &str) -> usize {
    engine
        .calls()
        .iter()
        .position(|c| c.step == step && c.unit == unit)
        .unwrap_or_else(|| panic!("no {step} call on {unit}"))
}

#[tokio::test(start_paused = true)]
async fn units_are_refreshed_before_outputs_are_trusted() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();

    runner(&engine, &store, 3)
        .run(
            "web",
            RunMode::Ephemeral,
            Duration::ZERO,
            &mut TtlWatch::detached(),
            &RecordingReporter::default(),
        )
        .await
        .unwrap();

    assert!(
        first_call(&engine, Step::Refresh, NETWORK_UNIT)
            < first_call(&engine, Step::Outputs, NETWORK_UNIT)
    );
    assert!(
        first_call(&engine, Step::Refresh, "vmgrweb") < first_call(&engine, Step::Apply, "vmgrweb")
    );
}

#[tokio::test(start_paused = true)]
async fn deploy_failure_ends_in_failed_and_never_active() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();
    engine.fail_always(
        Step::Apply,
        "vmgrweb",
        EngineError::Operation {
            unit: "vmgrweb".into(),
            op: Step::Apply,
            message: "image not found".into(),
        },
    );

    let err = runner(&engine, &store, 3)
        .run(
            "web",
            RunMode::Ephemeral,
            Duration::from_secs(300),
            &mut TtlWatch::detached(),
            &RecordingReporter::default(),
        )
        .await
        .unwrap_err();

    match err.downcast_ref::<WorkflowError>() {
        Some(WorkflowError::StepFailed {
            phase, attempts, message, ..
        }) => {
            assert_eq!(*phase, Deploying);
            assert_eq!(*attempts, 3);
            assert!(message.contains("image not found"), "got: {message}");
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
    let phases = store.saved_phases();
    assert_eq!(phases, vec![Start, EnsuringNetwork, Deploying, Failed]);
    assert!(!phases.contains(&Active));

    let run = &store.list().await.unwrap()[0];
    let failure = run.error.as_ref().unwrap();
    assert_eq!((failure.phase, failure.attempts), (Deploying, 3));
    let vm_applies = engine
        .calls_of(Step::Apply)
        .into_iter()
        .filter(|u| u == "vmgrweb")
        .count();
    assert_eq!(vm_applies, 3);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_absorbed_by_step_retries() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();
    engine.fail_times(
        Step::Create,
        NETWORK_UNIT,
        EngineError::Unavailable("connection reset".into()),
        2,
    );

    let run = runner(&engine, &store, 3)
        .run(
            "web",
            RunMode::Ephemeral,
            Duration::ZERO,
            &mut TtlWatch::detached(),
            &RecordingReporter::default(),
        )
        .await
        .unwrap();

    assert_eq!(run.phase, Done);
    assert!(run.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_converge_on_one_network_unit() {
    let engine = MemoryEngine::new().with_apply_delay(Duration::from_secs(1));
    let store = MemoryRunStore::default();
    let runner = runner(&engine, &store, 6);
    let reporter = RecordingReporter::default();

    let (a, b) = tokio::join!(
        runner.provision_only(Some("a"), &reporter),
        runner.provision_only(Some("b"), &reporter),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.network, b.network);
    assert!(a.network.is_some());
    let networks = unit_names(&engine)
        .await
        .into_iter()
        .filter(|n| n == NETWORK_UNIT)
        .count();
    assert_eq!(networks, 1);
    // The run that lost the create race selected the existing unit.
    assert!(engine.calls_of(Step::Select).iter().any(|u| u == NETWORK_UNIT));
}

#[tokio::test(start_paused = true)]
async fn existing_network_outputs_are_reused_without_apply() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();
    let runner = runner(&engine, &store, 3);
    let reporter = RecordingReporter::default();

    runner.provision_only(Some("first"), &reporter).await.unwrap();
    runner.provision_only(Some("second"), &reporter).await.unwrap();

    let network_applies = engine
        .calls_of(Step::Apply)
        .into_iter()
        .filter(|u| u == NETWORK_UNIT)
        .count();
    assert_eq!(network_applies, 1);
}

#[tokio::test(start_paused = true)]
async fn provision_only_leaves_the_vm_for_the_reaper() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();

    let run = runner(&engine, &store, 3)
        .provision_only(None, &RecordingReporter::default())
        .await
        .unwrap();

    assert_eq!(run.phase, Done);
    assert_eq!(run.mode, RunMode::Persistent);
    assert_eq!(run.vm_name.len(), 8);
    assert!(run.vm_name.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(store.saved_phases(), vec![Start, EnsuringNetwork, Deploying, Done]);
    let unit = run.unit_name.unwrap();
    assert!(unit_names(&engine).await.contains(&unit));
}

#[tokio::test(start_paused = true)]
async fn resume_continues_from_the_recorded_phase() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();
    store.insert(recorded_run(Deploying));

    let run = runner(&engine, &store, 3)
        .resume(RUN_ID, &mut TtlWatch::detached(), &RecordingReporter::default())
        .await
        .unwrap();

    assert_eq!(run.phase, Done);
    assert_eq!(store.saved_phases(), vec![Active, TearingDown, Done]);
    // EnsuringNetwork already completed before the interruption.
    assert!(!engine.calls().iter().any(|c| c.unit == NETWORK_UNIT));
    assert_eq!(
        engine.config_of(PROJECT, "vmgrweb"),
        None,
        "vm unit removed after teardown"
    );
}

#[tokio::test(start_paused = true)]
async fn resume_of_teardown_tolerates_an_already_removed_unit() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();
    let mut recorded = recorded_run(TearingDown);
    recorded.unit_name = Some("vmgrweb".into());
    store.insert(recorded);

    let run = runner(&engine, &store, 3)
        .resume(RUN_ID, &mut TtlWatch::detached(), &RecordingReporter::default())
        .await
        .unwrap();

    assert_eq!(run.phase, Done);
}

#[tokio::test]
async fn resume_rejects_finished_and_unknown_runs() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();
    store.insert(recorded_run(Done));
    let runner = runner(&engine, &store, 3);
    let reporter = RecordingReporter::default();

    let err = runner
        .resume(RUN_ID, &mut TtlWatch::detached(), &reporter)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WorkflowError>(),
        Some(WorkflowError::AlreadyFinished { phase: Done, .. })
    ));

    let err = runner
        .resume("run-00000000000000bb", &mut TtlWatch::detached(), &reporter)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WorkflowError>(),
        Some(WorkflowError::RunNotFound(_))
    ));
    assert!(engine.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn expire_now_ends_the_hold_early() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();
    let (control, mut watch) = TtlControl::channel();
    control.expire_now();
    let started = Utc::now();

    let run = runner(&engine, &store, 3)
        .run(
            "web",
            RunMode::Ephemeral,
            Duration::from_secs(3600),
            &mut watch,
            &RecordingReporter::default(),
        )
        .await
        .unwrap();

    assert_eq!(run.phase, Done);
    let held_until = run.active_until.unwrap();
    assert!(held_until < started + chrono::Duration::minutes(59));
    assert_eq!(unit_names(&engine).await, vec![NETWORK_UNIT]);
}

#[tokio::test(start_paused = true)]
async fn extend_to_moves_the_deadline_and_persists_it() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();
    let (control, mut watch) = TtlControl::channel();
    let extended = Utc::now() + chrono::Duration::minutes(30);
    control.extend_to(extended);

    let run = runner(&engine, &store, 3)
        .run(
            "web",
            RunMode::Ephemeral,
            Duration::from_secs(60),
            &mut watch,
            &RecordingReporter::default(),
        )
        .await
        .unwrap();

    assert_eq!(run.active_until, Some(extended));
    // Active recorded once on entry and once for the new deadline.
    let actives = store.saved_phases().iter().filter(|p| **p == Active).count();
    assert_eq!(actives, 2);
    drop(control);
}

#[tokio::test]
async fn status_and_list_read_the_run_log() {
    let engine = MemoryEngine::new();
    let store = MemoryRunStore::default();
    store.insert(recorded_run(Active));
    let runner = runner(&engine, &store, 3);

    assert_eq!(runner.status(RUN_ID).await.unwrap().phase, Active);
    assert_eq!(runner.list().await.unwrap().len(), 1);
    assert!(matches!(
        runner
            .status("../etc/passwd")
            .await
            .unwrap_err()
            .downcast_ref::<WorkflowError>(),
        Some(WorkflowError::RunNotFound(_))
    ));
}
