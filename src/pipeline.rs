//! The streaming analysis pipeline.
//!
//! One [`AnalysisPipeline`] serves one request. It walks
//!
//! ```text
//! Init → Discovering → Aggregating → Scoring → Summarizing → Enriching → Complete
//!                                                                  ↘ Failed (from any stage)
//! ```
//!
//! and reports every step through a [`ProgressEmitter`]. A run ends in one
//! of three ways:
//!
//! - **Completed**: the last event is `complete` with the report and reading list.
//! - **Failed**: the last event is a single `error` with a readable message.
//! - **Cancelled**: the listener went away; nothing more is emitted.
//!
//! Credentials and the project id are checked before the first event, so a
//! run that cannot start emits nothing but its `error`.
//!
//! Cancellation is polled before discovery, after discovery, before each
//! dataset, and once aggregation ends. A failing dataset is logged and left
//! out of the snapshot. A failing discovery or summary fails the run. A
//! malformed reading list degrades to an empty one.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::DatasetAggregator;
use crate::agent::{invoke, AgentRole, ReasoningAgent};
use crate::backend::CloudBackend;
use crate::config::{Credentials, DiscoveryConfig, DiscoveryMode};
use crate::decode::{decode_agent_json, decode_discovery};
use crate::discovery::{discover_across_regions, discover_with_agent};
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::models::{AnalysisSnapshot, HealthReport, ReadingListItem, ResourceIdentifier};
use crate::progress::{ProgressEmitter, ProgressEvent};
use crate::prompts::{reading_list_prompt, summary_prompt};
use crate::query::{validate_project_id, MetadataFacade};
use crate::scoring::calculate_health_score;

/// Pipeline states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Init,
    Discovering,
    Aggregating,
    Scoring,
    Summarizing,
    Enriching,
    Complete,
    Failed,
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Progress shown while fetching dataset `index` of `total`: 20 to 60.
pub fn fetch_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 20;
    }
    (20 + index.min(total) * 40 / total) as u8
}

#[derive(Deserialize)]
struct ReadingListEnvelope {
    #[serde(default)]
    reading_list: Vec<ReadingListItem>,
}

/// Report and reading list of a finished run.
struct Finished {
    report: HealthReport,
    reading_list: Vec<ReadingListItem>,
}

pub struct AnalysisPipeline {
    backend: Arc<dyn CloudBackend>,
    discovery: DiscoveryConfig,
    project_id: String,
    run_id: Uuid,
    stage: Stage,
}

impl AnalysisPipeline {
    pub fn new(
        backend: Arc<dyn CloudBackend>,
        discovery: DiscoveryConfig,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            discovery,
            project_id: project_id.into(),
            run_id: Uuid::new_v4(),
            stage: Stage::Init,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Drive the run to its end, emitting events on `emitter`.
    pub async fn run(mut self, emitter: &ProgressEmitter) -> PipelineOutcome {
        let span = info_span!("analysis", run_id = %self.run_id, project = %self.project_id);
        async move {
            info!("analysis started");
            match self.execute(emitter).await {
                Ok(Some(finished)) => {
                    self.enter(Stage::Complete);
                    emitter
                        .emit(ProgressEvent::Complete {
                            report: finished.report,
                            reading_list: finished.reading_list,
                        })
                        .await;
                    info!("analysis complete");
                    PipelineOutcome::Completed
                }
                Ok(None) => {
                    info!(stage = ?self.stage, "client went away, stopping");
                    PipelineOutcome::Cancelled
                }
                Err(e) => {
                    warn!(stage = ?self.stage, error = %e, "analysis failed");
                    self.enter(Stage::Failed);
                    emitter
                        .emit(ProgressEvent::error(format!(
                            "An error occurred during analysis: {}",
                            e
                        )))
                        .await;
                    PipelineOutcome::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    fn enter(&mut self, stage: Stage) {
        debug!(from = ?self.stage, to = ?stage, "stage transition");
        self.stage = stage;
    }

    /// `Ok(None)` means the run was cancelled.
    async fn execute(&mut self, emitter: &ProgressEmitter) -> AnalyzerResult<Option<Finished>> {
        // Nothing is emitted until the run is known to be startable.
        let credentials = self.backend.credentials()?;
        validate_project_id(&self.project_id)?;
        let agent = self
            .backend
            .reasoning_agent(&self.project_id, &credentials)?;

        emitter
            .emit(ProgressEvent::update("Starting", 0, "Initializing..."))
            .await;
        emitter
            .emit(ProgressEvent::checkpoint("Connecting to Google Cloud..."))
            .await;
        if emitter.is_cancelled() {
            return Ok(None);
        }

        // ============ Discovery ============

        self.enter(Stage::Discovering);
        emitter
            .emit(ProgressEvent::update("Discovery", 10, "Discovering datasets..."))
            .await;
        emitter
            .emit(ProgressEvent::checkpoint(
                "Discovering all datasets in project...",
            ))
            .await;

        let datasets = match self.discover(agent.as_ref(), &credentials, emitter).await? {
            Some(datasets) => datasets,
            None => return Ok(None),
        };

        // ============ Aggregation ============

        self.enter(Stage::Aggregating);
        emitter
            .emit(ProgressEvent::checkpoint(format!(
                "Found {} datasets. Fetching details...",
                datasets.len()
            )))
            .await;

        let snapshot = self.aggregate_all(&datasets, &credentials, emitter).await?;
        if emitter.is_cancelled() {
            return Ok(None);
        }
        emitter
            .emit(ProgressEvent::checkpoint("All dataset details collected."))
            .await;

        // ============ Scoring ============

        self.enter(Stage::Scoring);
        emitter
            .emit(ProgressEvent::Update {
                status: "Analyzing",
                progress: 75,
                details: "Calculating health score...".to_string(),
                snapshot: Some(snapshot.clone()),
            })
            .await;
        emitter
            .emit(ProgressEvent::checkpoint(
                "Calculating baseline health score...",
            ))
            .await;
        let baseline = calculate_health_score(&snapshot, Utc::now());
        info!(baseline, datasets = snapshot.len(), "baseline score computed");

        // ============ Summary ============

        self.enter(Stage::Summarizing);
        emitter
            .emit(ProgressEvent::update(
                "Analyzing",
                85,
                "Generating final report...",
            ))
            .await;
        emitter
            .emit(ProgressEvent::checkpoint(
                "Sending data to AI for final analysis...",
            ))
            .await;
        let raw = invoke(
            agent.as_ref(),
            AgentRole::Summarizer,
            &summary_prompt(baseline, &snapshot),
        )
        .await?;
        let report = decode_agent_json::<HealthReport>("Summary agent", &raw)?.normalized();

        // ============ Reading list ============

        self.enter(Stage::Enriching);
        emitter
            .emit(ProgressEvent::update(
                "Analyzing",
                95,
                "Generating reading list...",
            ))
            .await;
        emitter
            .emit(ProgressEvent::checkpoint(
                "Generating personalized reading list...",
            ))
            .await;
        let reading_list = reading_list(agent.as_ref(), &snapshot).await?;

        emitter
            .emit(ProgressEvent::checkpoint("Report generated successfully."))
            .await;

        Ok(Some(Finished {
            report,
            reading_list,
        }))
    }

    /// `Ok(None)` when cancelled while discovery was in flight.
    async fn discover(
        &self,
        agent: &dyn ReasoningAgent,
        credentials: &Credentials,
        emitter: &ProgressEmitter,
    ) -> AnalyzerResult<Option<Vec<ResourceIdentifier>>> {
        match self.discovery.mode {
            DiscoveryMode::Agent => {
                let raw = discover_with_agent(agent, &self.project_id, &credentials.region).await?;
                if emitter.is_cancelled() {
                    return Ok(None);
                }
                decode_discovery(&raw).map(Some)
            }
            DiscoveryMode::Regions => {
                let found = discover_across_regions(
                    self.backend.as_ref(),
                    &self.project_id,
                    credentials,
                    &self.discovery.regions,
                )
                .await;
                if emitter.is_cancelled() {
                    return Ok(None);
                }
                found.map(Some)
            }
        }
    }

    async fn aggregate_all(
        &self,
        datasets: &[ResourceIdentifier],
        credentials: &Credentials,
        emitter: &ProgressEmitter,
    ) -> AnalyzerResult<AnalysisSnapshot> {
        let total = datasets.len();
        let mut details = Vec::with_capacity(total);

        for (i, dataset) in datasets.iter().enumerate() {
            if emitter.is_cancelled() {
                break;
            }
            emitter
                .emit(ProgressEvent::update(
                    "Fetching",
                    fetch_progress(i, total),
                    format!("Fetching details for: {}", dataset.name),
                ))
                .await;

            let region = dataset.region.as_deref().unwrap_or(&credentials.region);
            let executor = self
                .backend
                .query_executor(&self.project_id, region, credentials)?;
            let aggregator = DatasetAggregator::new(MetadataFacade::new(executor));

            match aggregator
                .aggregate(&self.project_id, &dataset.name, region)
                .await
            {
                Ok(detail) => details.push(detail),
                Err(e) => {
                    warn!(dataset = %dataset.name, error = %e, "skipping dataset");
                }
            }
        }

        Ok(AnalysisSnapshot::new(details))
    }
}

/// Ask for the reading list. Malformed output degrades to an empty list.
async fn reading_list(
    agent: &dyn ReasoningAgent,
    snapshot: &AnalysisSnapshot,
) -> AnalyzerResult<Vec<ReadingListItem>> {
    let raw = invoke(
        agent,
        AgentRole::ActionPlanner,
        &reading_list_prompt(snapshot),
    )
    .await?;
    match decode_agent_json::<ReadingListEnvelope>("Reading list agent", &raw) {
        Ok(envelope) => Ok(envelope.reading_list),
        Err(e @ AnalyzerError::MalformedAgentOutput { .. }) => {
            warn!(error = %e, "continuing without a reading list");
            Ok(vec![])
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_progress_spans_twenty_to_sixty() {
        assert_eq!(fetch_progress(0, 4), 20);
        assert_eq!(fetch_progress(1, 4), 30);
        assert_eq!(fetch_progress(3, 4), 50);
        assert_eq!(fetch_progress(0, 3), 20);
        assert_eq!(fetch_progress(2, 3), 46);
        assert_eq!(fetch_progress(3, 3), 60);
        assert_eq!(fetch_progress(0, 0), 20);
    }

    #[test]
    fn fetch_progress_is_monotonic() {
        for total in 1..50 {
            let steps: Vec<u8> = (0..total).map(|i| fetch_progress(i, total)).collect();
            assert!(steps.windows(2).all(|w| w[0] <= w[1]));
            assert!(steps.iter().all(|p| (20..=60).contains(p)));
        }
    }
}
