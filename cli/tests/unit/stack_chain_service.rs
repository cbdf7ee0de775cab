//! Tests for the dependency-ordered deploy and destroy of a unit graph.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::Utc;
use vmgr_cli::application::ports::UnitCatalog;
use vmgr_cli::application::services::stack_chain::{self, DestroyOptions};
use vmgr_cli::domain::error::{ConfigurationError, EngineError, Step};
use vmgr_cli::domain::graph::{SITE_CONTAINER_UNIT, UnitDependencyEdge, UnitGraph, UnitSpec};
use vmgr_cli::domain::outputs::{BUCKET_ID_OUTPUT, SiteOutputs, WEBSITE_URL_OUTPUT};
use vmgr_cli::infra::memory::{EngineCall, MemoryEngine};
use vmgr_common::{OutputMap, OutputValue};

use crate::helpers::{RecordingReporter, registry};

const PROJECT: &str = "static-site";

fn site() -> UnitGraph {
    UnitGraph::static_site(PROJECT, "us-west-2")
}

async fn unit_names(engine: &MemoryEngine) -> Vec<String> {
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

#[tokio::test]
async fn deploy_runs_upstream_first_and_wires_outputs() {
    let engine = MemoryEngine::new();
    let reporter = RecordingReporter::default();

    let outcome = stack_chain::deploy(&registry(&engine, PROJECT), &site(), &reporter)
        .await
        .unwrap();

    assert_eq!(outcome.order, vec!["website", "content"]);
    let bucket_id = outcome.outputs["website"][BUCKET_ID_OUTPUT].as_str().unwrap();
    let content_bucket = outcome.outputs["content"]["bucket"].as_str().unwrap();
    assert_eq!(content_bucket, bucket_id);
    assert_ne!(content_bucket, "unset");
    assert!(outcome.outputs["website"].contains_key(WEBSITE_URL_OUTPUT));
    assert_eq!(
        engine.config_of(PROJECT, "content").unwrap()["aws:region"],
        "us-west-2"
    );
}

#[tokio::test]
async fn deploy_twice_is_idempotent() {
    let engine = MemoryEngine::new();
    let reporter = RecordingReporter::default();
    let registry = registry(&engine, PROJECT);

    let first = stack_chain::deploy(&registry, &site(), &reporter).await.unwrap();
    let second = stack_chain::deploy(&registry, &site(), &reporter).await.unwrap();

    assert_eq!(first.outputs, second.outputs);
    assert_eq!(unit_names(&engine).await, vec!["content", "website"]);
    // The second run selects the units the first one created.
    assert_eq!(
        engine.calls_of(Step::Select),
        vec!["website".to_string(), "content".to_string()]
    );
}

#[tokio::test]
async fn destroy_runs_in_reverse_deploy_order() {
    let engine = MemoryEngine::new();
    let reporter = RecordingReporter::default();
    let registry = registry(&engine, PROJECT);

    let deployed = stack_chain::deploy(&registry, &site(), &reporter).await.unwrap();
    let destroyed =
        stack_chain::destroy(&registry, &site(), DestroyOptions::default(), &reporter)
            .await
            .unwrap();

    let mut reversed = deployed.order.clone();
    reversed.reverse();
    assert_eq!(destroyed.order, reversed);
    assert_eq!(engine.calls_of(Step::Destroy), reversed);
    // Without --remove the units stay in the catalog.
    assert_eq!(unit_names(&engine).await, vec!["content", "website"]);
}

#[tokio::test]
async fn destroy_with_remove_empties_the_catalog() {
    let engine = MemoryEngine::new();
    let reporter = RecordingReporter::default();
    let registry = registry(&engine, PROJECT);

    stack_chain::deploy(&registry, &site(), &reporter).await.unwrap();
    stack_chain::destroy(
        &registry,
        &site(),
        DestroyOptions { remove: true },
        &reporter,
    )
    .await
    .unwrap();

    assert!(unit_names(&engine).await.is_empty());
    assert_eq!(engine.calls_of(Step::Remove), vec!["content", "website"]);
}

#[tokio::test]
async fn destroy_reads_upstream_outputs_before_touching_downstream() {
    let engine = MemoryEngine::new();
    let mut website = OutputMap::new();
    website.insert(BUCKET_ID_OUTPUT.into(), OutputValue::plain("bucket-42"));
    engine.insert_unit(PROJECT, "website", Some(Utc::now()), website);
    engine.insert_unit(PROJECT, "content", Some(Utc::now()), OutputMap::new());

    stack_chain::destroy(
        &registry(&engine, PROJECT),
        &site(),
        DestroyOptions::default(),
        &RecordingReporter::default(),
    )
    .await
    .unwrap();

    let calls = engine.calls();
    let upstream_read = calls
        .iter()
        .position(|c| *c == EngineCall { step: Step::Outputs, unit: "website".into() })
        .unwrap();
    let first_downstream = calls.iter().position(|c| c.unit == "content").unwrap();
    assert!(upstream_read < first_downstream, "calls: {calls:?}");
    assert_eq!(engine.config_of(PROJECT, "content").unwrap()["bucket"], "bucket-42");
}

#[tokio::test]
async fn destroy_keeps_stored_config_when_upstream_outputs_are_gone() {
    let engine = MemoryEngine::new();
    engine.insert_unit(PROJECT, "website", None, OutputMap::new());
    engine.insert_unit(PROJECT, "content", Some(Utc::now()), OutputMap::new());
    let reporter = RecordingReporter::default();

    stack_chain::destroy(
        &registry(&engine, PROJECT),
        &site(),
        DestroyOptions::default(),
        &reporter,
    )
    .await
    .unwrap();

    assert_eq!(engine.calls_of(Step::Destroy), vec!["content", "website"]);
    assert!(!engine.config_of(PROJECT, "content").unwrap().contains_key("bucket"));
    assert_eq!(reporter.warnings().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_engine_errors_are_retried() {
    let engine = MemoryEngine::new();
    engine.fail_times(
        Step::Apply,
        "content",
        EngineError::ConcurrentModification { unit: "content".into() },
        2,
    );

    stack_chain::deploy(&registry(&engine, PROJECT), &site(), &RecordingReporter::default())
        .await
        .unwrap();

    assert_eq!(
        engine.calls_of(Step::Apply),
        vec!["website", "content", "content", "content"]
    );
}

#[tokio::test]
async fn failure_stops_the_chain_and_names_unit_and_step() {
    let engine = MemoryEngine::new();
    engine.fail_always(
        Step::Apply,
        "website",
        EngineError::Operation {
            unit: "website".into(),
            op: Step::Apply,
            message: "quota exceeded".into(),
        },
    );

    let err = stack_chain::deploy(&registry(&engine, PROJECT), &site(), &RecordingReporter::default())
        .await
        .unwrap_err();

    let rendered = format!("{err:#}");
    assert!(rendered.starts_with("apply website"), "got: {rendered}");
    assert!(rendered.contains("quota exceeded"));
    assert!(!engine.calls().iter().any(|c| c.unit == "content"));
    // Non-transient: exactly one attempt.
    assert_eq!(engine.calls_of(Step::Apply), vec!["website"]);
}

#[tokio::test]
async fn cycle_is_rejected_before_any_engine_call() {
    let engine = MemoryEngine::new();
    let edge = |from: &str, to: &str| UnitDependencyEdge {
        upstream: from.into(),
        downstream: to.into(),
        output_key: "out".into(),
        config_key: "in".into(),
    };
    let graph = UnitGraph {
        project: PROJECT.into(),
        units: vec![UnitSpec::new("a"), UnitSpec::new("b")],
        edges: vec![edge("a", "b"), edge("b", "a")],
    };

    let err = stack_chain::deploy(&registry(&engine, PROJECT), &graph, &RecordingReporter::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ConfigurationError>(),
        Some(ConfigurationError::DependencyCycle(_))
    ));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn missing_upstream_output_is_a_configuration_error() {
    let engine = MemoryEngine::new();
    let graph = UnitGraph {
        project: PROJECT.into(),
        units: vec![UnitSpec::new("base").with_config("size", "s"), UnitSpec::new("app")],
        edges: vec![UnitDependencyEdge {
            upstream: "base".into(),
            downstream: "app".into(),
            output_key: "endpoint".into(),
            config_key: "endpoint".into(),
        }],
    };

    let err = stack_chain::deploy(&registry(&engine, PROJECT), &graph, &RecordingReporter::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ConfigurationError>(),
        Some(ConfigurationError::MissingOutput { unit, key }) if unit == "base" && key == "endpoint"
    ));
    assert!(!engine.calls().iter().any(|c| c.unit == "app"));
}

#[tokio::test]
async fn site_outputs_are_read_through_the_typed_schema() {
    let engine = MemoryEngine::new();
    let outcome = stack_chain::deploy(
        &registry(&engine, PROJECT),
        &site(),
        &RecordingReporter::default(),
    )
    .await
    .unwrap();

    let site: SiteOutputs = outcome.typed(SITE_CONTAINER_UNIT).unwrap();
    assert_eq!(site.bucket_id, "static-site-website-bucket");
    assert!(site.website_url.starts_with("http://static-site-website-bucket"));
}

#[tokio::test]
async fn container_without_site_outputs_is_rejected() {
    let engine = MemoryEngine::new();
    let graph = UnitGraph {
        project: PROJECT.into(),
        units: vec![UnitSpec::new("content")],
        edges: vec![],
    };
    let outcome = stack_chain::deploy(
        &registry(&engine, PROJECT),
        &graph,
        &RecordingReporter::default(),
    )
    .await
    .unwrap();

    let err = outcome.typed::<SiteOutputs>(SITE_CONTAINER_UNIT).unwrap_err();
    assert_eq!(
        err,
        ConfigurationError::MissingOutput {
            unit: SITE_CONTAINER_UNIT.into(),
            key: BUCKET_ID_OUTPUT.into(),
        }
    );
}
