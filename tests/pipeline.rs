mod common;

use std::sync::Arc;

use bq_pulse::agent::AgentRole;
use bq_pulse::config::{DiscoveryConfig, DiscoveryMode};
use bq_pulse::models::Priority;
use bq_pulse::pipeline::{AnalysisPipeline, PipelineOutcome};
use bq_pulse::progress::{ProgressEmitter, ProgressEvent};

use common::{FakeBackend, ScriptedAgent, StubCatalog};

async fn run_with(
    backend: Arc<FakeBackend>,
    project_id: &str,
    discovery: DiscoveryConfig,
    emitter: ProgressEmitter,
    mut rx: tokio::sync::mpsc::Receiver<ProgressEvent>,
) -> (PipelineOutcome, Vec<ProgressEvent>) {
    let pipeline = AnalysisPipeline::new(backend, discovery, project_id);
    let outcome = pipeline.run(&emitter).await;
    drop(emitter);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome, events)
}

async fn run(backend: Arc<FakeBackend>) -> (PipelineOutcome, Vec<ProgressEvent>) {
    let (emitter, rx) = ProgressEmitter::channel(256);
    run_with(backend, "analytics-prod", DiscoveryConfig::default(), emitter, rx).await
}

fn snapshot_names(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .find_map(|e| match e {
            ProgressEvent::Update {
                snapshot: Some(snapshot),
                ..
            } => Some(
                snapshot
                    .datasets()
                    .iter()
                    .map(|d| d.schema_name.clone())
                    .collect(),
            ),
            _ => None,
        })
        .expect("no snapshot attached to any update")
}

fn assert_single_terminal_last(events: &[ProgressEvent]) {
    let terminals: Vec<_> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_terminal())
        .collect();
    assert_eq!(terminals.len(), 1, "expected exactly one terminal event");
    assert_eq!(terminals[0].0, events.len() - 1, "terminal event is not last");
}

#[tokio::test]
async fn failing_dataset_is_skipped_and_run_completes() {
    let backend = Arc::new(FakeBackend::new(
        StubCatalog::new(&["a", "b", "c"]).failing(&["b"]),
        ScriptedAgent::happy(&["a", "b", "c"]),
    ));

    let (outcome, events) = run(backend).await;

    assert_eq!(outcome, PipelineOutcome::Completed);
    assert_eq!(snapshot_names(&events), vec!["a", "c"]);
    assert_single_terminal_last(&events);

    match events.last() {
        Some(ProgressEvent::Complete {
            report,
            reading_list,
        }) => {
            assert_eq!(report.health_score, 81);
            assert_eq!(report.key_findings.len(), 1);
            assert_eq!(reading_list.len(), 1);
        }
        other => panic!("expected complete, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_reading_list_degrades_to_empty() {
    let agent = ScriptedAgent {
        reading_list: Some("Here are some great articles about BigQuery!".to_string()),
        ..ScriptedAgent::happy(&["a"])
    };
    let backend = Arc::new(FakeBackend::new(StubCatalog::new(&["a"]), agent));

    let (outcome, events) = run(backend).await;

    assert_eq!(outcome, PipelineOutcome::Completed);
    match events.last() {
        Some(ProgressEvent::Complete {
            report,
            reading_list,
        }) => {
            assert!(reading_list.is_empty());
            assert_eq!(report.recommendations[0].title, "Partition events");
        }
        other => panic!("expected complete, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_summary_fails_the_run() {
    let agent = ScriptedAgent {
        summary: Some("The project looks healthy overall.".to_string()),
        ..ScriptedAgent::happy(&["a"])
    };
    let backend = Arc::new(FakeBackend::new(StubCatalog::new(&["a"]), agent));

    let (outcome, events) = run(backend.clone()).await;

    assert_eq!(outcome, PipelineOutcome::Failed);
    assert_single_terminal_last(&events);
    match events.last() {
        Some(ProgressEvent::Error { details }) => {
            assert!(details.starts_with("An error occurred during analysis:"));
            assert!(details.contains("Summary agent produced invalid JSON"));
            assert!(details.contains("The project looks healthy overall."));
        }
        other => panic!("expected error, got {:?}", other),
    }
    // no reading list is requested after a failed summary
    assert!(!backend.agent.calls().contains(&AgentRole::ActionPlanner));
}

#[tokio::test]
async fn empty_summary_fails_the_run() {
    let agent = ScriptedAgent {
        summary: None,
        ..ScriptedAgent::happy(&["a"])
    };
    let backend = Arc::new(FakeBackend::new(StubCatalog::new(&["a"]), agent));

    let (outcome, events) = run(backend).await;

    assert_eq!(outcome, PipelineOutcome::Failed);
    match events.last() {
        Some(ProgressEvent::Error { details }) => {
            assert!(details.contains("summary_agent"));
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn missing_configuration_stops_before_discovery() {
    let backend = Arc::new(
        FakeBackend::new(StubCatalog::new(&["a"]), ScriptedAgent::happy(&["a"])).unconfigured(),
    );

    let (outcome, events) = run(backend.clone()).await;

    assert_eq!(outcome, PipelineOutcome::Failed);
    assert_eq!(events.len(), 1, "only the error is emitted: {:?}", events);
    match events.last() {
        Some(ProgressEvent::Error { details }) => {
            assert!(details.contains("Configuration error"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(backend.agent.calls().is_empty());
    assert!(backend.catalog.queries().is_empty());
}

#[tokio::test]
async fn invalid_project_id_fails_before_any_event() {
    let backend = Arc::new(FakeBackend::new(
        StubCatalog::new(&["a"]),
        ScriptedAgent::happy(&["a"]),
    ));
    let (emitter, rx) = ProgressEmitter::channel(256);

    let (outcome, events) = run_with(
        backend.clone(),
        "My Project",
        DiscoveryConfig::default(),
        emitter,
        rx,
    )
    .await;

    assert_eq!(outcome, PipelineOutcome::Failed);
    assert_eq!(events.len(), 1, "only the error is emitted: {:?}", events);
    match events.last() {
        Some(ProgressEvent::Error { details }) => {
            assert!(details.contains("Invalid identifier: 'My Project'"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(backend.agent.calls().is_empty());
    assert!(backend.catalog.queries().is_empty());
}

#[tokio::test]
async fn off_schema_summary_still_completes() {
    let agent = ScriptedAgent {
        summary: Some(
            r#"{"health_score": 82.5,
                "key_findings": [{"title": "Stale tables", "importance": "Critical"}],
                "recommendations": [{"title": "Archive", "details": "Move to cold storage.", "priority": "Optional"}]}"#
                .to_string(),
        ),
        ..ScriptedAgent::happy(&["a"])
    };
    let backend = Arc::new(FakeBackend::new(StubCatalog::new(&["a"]), agent));

    let (outcome, events) = run(backend).await;

    assert_eq!(outcome, PipelineOutcome::Completed);
    assert_single_terminal_last(&events);
    match events.last() {
        Some(ProgressEvent::Complete { report, .. }) => {
            assert_eq!(report.health_score, 83);
            assert_eq!(report.key_findings[0].importance, Priority::High);
            assert_eq!(report.key_findings[0].details, "");
            assert_eq!(report.recommendations[0].priority, Priority::Medium);
        }
        other => panic!("expected complete, got {:?}", other),
    }
}

#[tokio::test]
async fn unparseable_discovery_fails_the_run() {
    let agent = ScriptedAgent {
        discovery: Some("I found datasets a and b.".to_string()),
        ..ScriptedAgent::happy(&[])
    };
    let backend = Arc::new(FakeBackend::new(StubCatalog::new(&["a"]), agent));

    let (outcome, events) = run(backend.clone()).await;

    assert_eq!(outcome, PipelineOutcome::Failed);
    match events.last() {
        Some(ProgressEvent::Error { details }) => {
            assert!(details.contains("Discovery failed to return a valid dataset list"));
            assert!(details.contains("I found datasets a and b."));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(backend.catalog.queries().is_empty());
}

#[tokio::test]
async fn disconnect_after_discovery_stops_silently() {
    let (emitter, rx) = ProgressEmitter::channel(256);
    let agent = ScriptedAgent {
        cancel_on_discovery: Some(emitter.cancellation_token()),
        ..ScriptedAgent::happy(&["a", "b"])
    };
    let backend = Arc::new(FakeBackend::new(StubCatalog::new(&["a", "b"]), agent));

    let (outcome, events) = run_with(
        backend.clone(),
        "analytics-prod",
        DiscoveryConfig::default(),
        emitter,
        rx,
    ).await;

    assert_eq!(outcome, PipelineOutcome::Cancelled);
    assert!(backend.catalog.queries().is_empty());
    assert!(events.iter().all(|e| !e.is_terminal()));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Checkpoint { text }) if text == "Discovering all datasets in project..."
    ));
    assert_eq!(backend.agent.calls(), vec![AgentRole::DatasetDiscoverer]);
}

#[tokio::test]
async fn disconnect_between_datasets_skips_the_rest() {
    let (emitter, rx) = ProgressEmitter::channel(256);
    let catalog = StubCatalog::new(&["a", "b"]).cancel_after("a", emitter.cancellation_token());
    let backend = Arc::new(FakeBackend::new(catalog, ScriptedAgent::happy(&["a", "b"])));

    let (outcome, events) = run_with(
        backend.clone(),
        "analytics-prod",
        DiscoveryConfig::default(),
        emitter,
        rx,
    )
    .await;

    assert_eq!(outcome, PipelineOutcome::Cancelled);
    assert!(events.iter().all(|e| !e.is_terminal()));
    let queries = backend.catalog.queries();
    assert!(queries.iter().any(|q| q.contains(".a.INFORMATION_SCHEMA")));
    assert!(
        queries
            .iter()
            .all(|q| !q.contains(".b.INFORMATION_SCHEMA") && !q.contains("'b'")),
        "dataset b was queried: {:?}",
        queries
    );
    assert_eq!(backend.regions(), vec!["US"]);
    assert!(events.iter().all(|e| !matches!(
        e,
        ProgressEvent::Update { details, .. } if details == "Fetching details for: b"
    )));
    assert_eq!(backend.agent.calls(), vec![AgentRole::DatasetDiscoverer]);
}

#[tokio::test]
async fn progress_is_monotonic_and_hits_milestones() {
    let names = ["a", "b", "c", "d", "e"];
    let backend = Arc::new(FakeBackend::new(
        StubCatalog::new(&names),
        ScriptedAgent::happy(&names),
    ));

    let (_, events) = run(backend).await;
    let progress: Vec<u8> = events.iter().filter_map(|e| e.progress()).collect();

    assert!(
        progress.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {:?}",
        progress
    );
    for milestone in [0, 10, 75, 85, 95, 100] {
        assert!(progress.contains(&milestone), "missing milestone {}", milestone);
    }
    assert_eq!(
        progress,
        vec![0, 10, 20, 28, 36, 44, 52, 75, 85, 95, 100]
    );
}

#[tokio::test]
async fn discovered_region_scopes_aggregation() {
    let agent = ScriptedAgent {
        discovery: Some(r#"[{"schema_name": "a", "region": "EU"}, {"schema_name": "b"}]"#.to_string()),
        ..ScriptedAgent::happy(&[])
    };
    let backend = Arc::new(FakeBackend::new(StubCatalog::new(&["a", "b"]), agent));

    let (outcome, _) = run(backend.clone()).await;

    assert_eq!(outcome, PipelineOutcome::Completed);
    assert_eq!(backend.regions(), vec!["EU", "US"]);
    let queries = backend.catalog.queries();
    assert!(queries
        .iter()
        .any(|q| q.contains("`region-EU`") && q.contains("schema_name = 'a'")));
    assert!(queries
        .iter()
        .any(|q| q.contains("`region-US`") && q.contains("schema_name = 'b'")));
}

#[tokio::test]
async fn region_scan_discovers_without_the_agent() {
    let backend = Arc::new(FakeBackend::new(
        StubCatalog::new(&["sales", "marketing"]),
        ScriptedAgent::happy(&[]),
    ));
    let discovery = DiscoveryConfig {
        mode: DiscoveryMode::Regions,
        regions: vec!["US".to_string(), "EU".to_string()],
    };
    let (emitter, rx) = ProgressEmitter::channel(256);

    let (outcome, events) = run_with(backend.clone(), "analytics-prod", discovery, emitter, rx).await;

    assert_eq!(outcome, PipelineOutcome::Completed);
    // both regions answer with the same datasets; the first region wins
    assert_eq!(snapshot_names(&events), vec!["marketing", "sales"]);
    assert_eq!(backend.regions(), vec!["US", "EU", "US", "US"]);
    assert!(!backend.agent.calls().contains(&AgentRole::DatasetDiscoverer));
}
