//! Tests for the expiry reaper: selection, failure isolation, and the loop.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use vmgr_cli::application::ports::UnitCatalog;
use vmgr_cli::application::services::reaper::{Reaper, ReaperSchedule};
use vmgr_cli::domain::error::{EngineError, Step, SweepError};
use vmgr_cli::domain::reap::ExpiryPolicy;
use vmgr_cli::infra::memory::MemoryEngine;
use vmgr_common::{NETWORK_UNIT, OutputMap};

use crate::helpers::{RecordingReporter, registry};

const PROJECT: &str = "vmgr";
const HOUR: Duration = Duration::from_secs(3600);

fn ago(now: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    Some(now - chrono::Duration::minutes(minutes))
}

fn seed(engine: &MemoryEngine, name: &str, last_update: Option<DateTime<Utc>>) {
    engine.insert_unit(PROJECT, name, last_update, OutputMap::new());
}

async fn remaining(engine: &MemoryEngine) -> Vec<String> {
    let mut names: Vec<_> = engine
        .list(PROJECT)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.name)
        .collect();
    names.sort();
    names
}

fn reaper(engine: &MemoryEngine, schedule: ReaperSchedule) -> Reaper<'_, MemoryEngine> {
    Reaper::new(registry(engine, PROJECT), ExpiryPolicy::new(HOUR), schedule)
}

#[tokio::test]
async fn sweep_reaps_only_units_older_than_the_threshold() {
    let engine = MemoryEngine::new();
    let now = Utc::now();
    seed(&engine, "vmgr-fresh", ago(now, 5));
    seed(&engine, "vmgr-two-hours", ago(now, 120));
    seed(&engine, "vmgr-ten-hours", ago(now, 600));
    seed(&engine, "vmgr-never-applied", None);
    seed(&engine, NETWORK_UNIT, ago(now, 6000));

    let report = reaper(&engine, ReaperSchedule::default())
        .sweep(now, &RecordingReporter::default())
        .await
        .unwrap();

    assert_eq!((report.found, report.succeeded, report.failed), (2, 2, 0));
    assert_eq!(
        remaining(&engine).await,
        vec!["networking", "vmgr-fresh", "vmgr-never-applied"]
    );
    let mut destroyed = engine.calls_of(Step::Destroy);
    destroyed.sort();
    assert_eq!(destroyed, vec!["vmgr-ten-hours", "vmgr-two-hours"]);
}

#[tokio::test]
async fn one_failing_unit_does_not_stop_the_sweep() {
    let engine = MemoryEngine::new();
    let now = Utc::now();
    seed(&engine, "vmgr-a", ago(now, 120));
    seed(&engine, "vmgr-b", ago(now, 180));
    engine.fail_always(
        Step::Destroy,
        "vmgr-a",
        EngineError::Operation {
            unit: "vmgr-a".into(),
            op: Step::Destroy,
            message: "resource group locked".into(),
        },
    );
    let reporter = RecordingReporter::default();

    let report = reaper(&engine, ReaperSchedule::default())
        .sweep(now, &reporter)
        .await
        .unwrap();

    assert_eq!((report.found, report.succeeded, report.failed), (2, 1, 1));
    assert_eq!(report.failures[0].name, "vmgr-a");
    assert!(report.failures[0].message.contains("resource group locked"));
    assert_eq!(remaining(&engine).await, vec!["vmgr-a"]);
    assert_eq!(reporter.warnings().len(), 1);
    assert_eq!(
        report.into_result().unwrap_err(),
        SweepError::PartialSweepFailure {
            found: 2,
            succeeded: 1,
            failed: 1
        }
    );
}

#[tokio::test]
async fn failure_streak_counts_consecutive_sweeps_and_resets() {
    let engine = MemoryEngine::new();
    let now = Utc::now();
    seed(&engine, "vmgr-stuck", ago(now, 120));
    let error = EngineError::Operation {
        unit: "vmgr-stuck".into(),
        op: Step::Destroy,
        message: "dependency violation".into(),
    };
    engine.fail_times(Step::Destroy, "vmgr-stuck", error, 2);
    let reporter = RecordingReporter::default();
    let mut reaper = reaper(
        &engine,
        ReaperSchedule {
            interval: Duration::from_secs(60),
            alert_after: 2,
        },
    );

    reaper.sweep(now, &reporter).await.unwrap();
    assert_eq!(reaper.failure_streak("vmgr-stuck"), 1);
    reaper.sweep(now, &reporter).await.unwrap();
    assert_eq!(reaper.failure_streak("vmgr-stuck"), 2);

    let report = reaper.sweep(now, &reporter).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(reaper.failure_streak("vmgr-stuck"), 0);
    assert!(remaining(&engine).await.is_empty());
}

#[tokio::test]
async fn sweep_fails_when_the_catalog_cannot_be_listed() {
    let engine = MemoryEngine::new();
    engine.fail_always(
        Step::List,
        PROJECT,
        EngineError::Operation {
            unit: PROJECT.into(),
            op: Step::List,
            message: "backend returned 500".into(),
        },
    );

    let err = reaper(&engine, ReaperSchedule::default())
        .sweep(Utc::now(), &RecordingReporter::default())
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("backend returned 500"));
}

#[tokio::test(start_paused = true)]
async fn run_sweeps_every_interval_until_shutdown() {
    let engine = MemoryEngine::new();
    let schedule = ReaperSchedule {
        interval: Duration::from_secs(60),
        alert_after: 5,
    };

    reaper(&engine, schedule)
        .run(
            tokio::time::sleep(Duration::from_secs(150)),
            &RecordingReporter::default(),
        )
        .await;

    // Sweeps at t = 0s, 60s and 120s; shutdown fires during the third pause.
    assert_eq!(engine.calls_of(Step::List).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn run_survives_a_failed_sweep() {
    let engine = MemoryEngine::new();
    seed(&engine, "vmgr-old", ago(Utc::now(), 180));
    engine.fail_times(
        Step::List,
        PROJECT,
        EngineError::Operation {
            unit: PROJECT.into(),
            op: Step::List,
            message: "backend returned 500".into(),
        },
        1,
    );
    let reporter = RecordingReporter::default();

    reaper(&engine, ReaperSchedule::default())
        .run(tokio::time::sleep(Duration::from_secs(90)), &reporter)
        .await;

    assert_eq!(engine.calls_of(Step::List).len(), 2);
    assert!(remaining(&engine).await.is_empty());
    assert!(reporter.warnings().iter().any(|w| w.starts_with("sweep failed")));
}
