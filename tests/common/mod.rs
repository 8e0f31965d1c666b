//! In-memory collaborators for pipeline and server tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use bq_pulse::agent::{AgentRole, ReasoningAgent};
use bq_pulse::backend::CloudBackend;
use bq_pulse::config::Credentials;
use bq_pulse::error::{AnalyzerError, AnalyzerResult};
use bq_pulse::models::ProjectSummary;
use bq_pulse::query::{QueryExecutor, Row};

pub const SUMMARY: &str = r#"```json
{
  "health_score": 81,
  "key_findings": [
    {"title": "Large unpartitioned table", "details": "`events` has no partitioning.", "importance": "High"}
  ],
  "recommendations": [
    {"title": "Partition events", "details": "Partition by `event_date`.", "priority": "High"}
  ]
}
```"#;

pub const READING_LIST: &str = r#"{"reading_list": [
  {"url": "https://cloud.google.com/bigquery/docs/partitioned-tables", "summary": "Covers partitioning."}
]}"#;

pub fn discovery_answer(names: &[&str]) -> String {
    let entries: Vec<_> = names.iter().map(|n| json!({ "schema_name": n })).collect();
    format!("```json\n{}\n```", serde_json::to_string(&entries).unwrap())
}

fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Catalog with one base table per dataset. Datasets listed in `failing`
/// fail their table listing. With `cancel_after`, the token fires once the
/// named dataset's tables have been listed.
#[derive(Default)]
pub struct StubCatalog {
    pub datasets: Vec<String>,
    pub failing: Vec<String>,
    pub cancel_after: Option<(String, CancellationToken)>,
    pub queries: Mutex<Vec<String>>,
}

impl StubCatalog {
    pub fn new(datasets: &[&str]) -> Self {
        Self {
            datasets: datasets.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing(mut self, datasets: &[&str]) -> Self {
        self.failing = datasets.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn cancel_after(mut self, dataset: &str, token: CancellationToken) -> Self {
        self.cancel_after = Some((dataset.to_string(), token));
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for StubCatalog {
    async fn execute(&self, query: &str) -> AnalyzerResult<Vec<Row>> {
        self.queries.lock().unwrap().push(query.to_string());

        if query.starts_with("SELECT schema_name FROM") {
            return Ok(self
                .datasets
                .iter()
                .map(|d| row(&[("schema_name", json!(d))]))
                .collect());
        }

        if query.contains("INFORMATION_SCHEMA.TABLES") {
            let dataset = self
                .datasets
                .iter()
                .find(|d| query.contains(&format!(".{}.INFORMATION_SCHEMA", d)));
            return match dataset {
                Some(d) if self.failing.contains(d) => Err(AnalyzerError::query(
                    query,
                    format!("Access Denied: Dataset {}", d),
                )),
                Some(d) => {
                    if let Some((after, token)) = &self.cancel_after {
                        if after == d {
                            token.cancel();
                        }
                    }
                    Ok(vec![row(&[
                        ("table_name", json!(format!("{}_events", d))),
                        ("table_type", json!("BASE TABLE")),
                        (
                            "ddl",
                            json!("CREATE TABLE t\n(\n  id INT64 OPTIONS(description=\"key\"),\n  payload STRING\n);"),
                        ),
                    ])])
                }
                None => Ok(vec![]),
            };
        }

        Ok(vec![])
    }
}

/// Agent answering each role from a script. When `cancel_on_discovery` is
/// set, the token fires as the discovery answer is returned, as if the
/// client disconnected while discovery was in flight.
#[derive(Default)]
pub struct ScriptedAgent {
    pub discovery: Option<String>,
    pub summary: Option<String>,
    pub reading_list: Option<String>,
    pub action_plan: Option<String>,
    pub cancel_on_discovery: Option<CancellationToken>,
    pub calls: Mutex<Vec<AgentRole>>,
}

impl ScriptedAgent {
    pub fn happy(datasets: &[&str]) -> Self {
        Self {
            discovery: Some(discovery_answer(datasets)),
            summary: Some(SUMMARY.to_string()),
            reading_list: Some(READING_LIST.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<AgentRole> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningAgent for ScriptedAgent {
    async fn respond(&self, role: AgentRole, prompt: &str) -> anyhow::Result<Option<String>> {
        self.calls.lock().unwrap().push(role);
        let answer = match role {
            AgentRole::DatasetDiscoverer => {
                if let Some(token) = &self.cancel_on_discovery {
                    token.cancel();
                }
                self.discovery.clone()
            }
            AgentRole::Summarizer => self.summary.clone(),
            AgentRole::ActionPlanner if prompt.starts_with("Task: Generate Action Plan") => {
                self.action_plan.clone()
            }
            AgentRole::ActionPlanner => self.reading_list.clone(),
        };
        Ok(answer)
    }
}

/// Backend handing out the same stub catalog and agent to every request.
pub struct FakeBackend {
    pub catalog: Arc<StubCatalog>,
    pub agent: Arc<ScriptedAgent>,
    pub configured: bool,
    pub regions: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(catalog: StubCatalog, agent: ScriptedAgent) -> Self {
        Self {
            catalog: Arc::new(catalog),
            agent: Arc::new(agent),
            configured: true,
            regions: Mutex::new(vec![]),
        }
    }

    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn regions(&self) -> Vec<String> {
        self.regions.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudBackend for FakeBackend {
    fn credentials(&self) -> AnalyzerResult<Credentials> {
        if !self.configured {
            return Err(AnalyzerError::Configuration(
                "gcp.region is not configured and GOOGLE_CLOUD_REGION is not set".to_string(),
            ));
        }
        Ok(Credentials {
            region: "US".to_string(),
            agent_api_key: "test-key".to_string(),
            access_token: Some("test-token".to_string()),
        })
    }

    fn query_executor(
        &self,
        _project_id: &str,
        region: &str,
        _credentials: &Credentials,
    ) -> AnalyzerResult<Arc<dyn QueryExecutor>> {
        self.regions.lock().unwrap().push(region.to_string());
        Ok(self.catalog.clone())
    }

    fn reasoning_agent(
        &self,
        _project_id: &str,
        _credentials: &Credentials,
    ) -> AnalyzerResult<Arc<dyn ReasoningAgent>> {
        Ok(self.agent.clone())
    }

    async fn list_projects(&self) -> anyhow::Result<Vec<ProjectSummary>> {
        Ok(vec![
            ProjectSummary {
                project_id: "analytics-prod".to_string(),
            },
            ProjectSummary {
                project_id: "analytics-dev".to_string(),
            },
        ])
    }
}
