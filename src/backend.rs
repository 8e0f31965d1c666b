//! Construction of the external collaborators for one request.
//!
//! The pipeline and the HTTP handlers never hold a long-lived query client or
//! agent. They ask a [`CloudBackend`] for fresh ones per request, so nothing
//! leaks between concurrent analyses. [`GcpBackend`] is the production
//! implementation; tests substitute in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::ReasoningAgent;
use crate::config::{Config, Credentials};
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::gemini::{CatalogTool, GeminiAgent};
use crate::models::ProjectSummary;
use crate::projects::search_projects;
use crate::query::{BigQueryClient, QueryExecutor, Row};

/// Factory for per-request collaborators.
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Resolve region and credentials; fails with
    /// [`AnalyzerError::Configuration`] when something required is missing.
    fn credentials(&self) -> AnalyzerResult<Credentials>;

    /// A query executor billed to `project_id` and routed to `region`.
    fn query_executor(
        &self,
        project_id: &str,
        region: &str,
        credentials: &Credentials,
    ) -> AnalyzerResult<Arc<dyn QueryExecutor>>;

    /// A reasoning agent whose catalog tool is scoped to `project_id`.
    fn reasoning_agent(
        &self,
        project_id: &str,
        credentials: &Credentials,
    ) -> AnalyzerResult<Arc<dyn ReasoningAgent>>;

    /// Projects the configured identity can enumerate.
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>>;
}

/// Google Cloud: BigQuery REST for the catalog, Gemini for reasoning.
#[derive(Clone)]
pub struct GcpBackend {
    config: Arc<Config>,
    http: reqwest::Client,
}

impl GcpBackend {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gcp.timeout_secs))
            .build()?;
        Ok(Self { config, http })
    }

    fn access_token(&self, credentials: &Credentials) -> AnalyzerResult<String> {
        credentials.access_token.clone().ok_or_else(|| {
            AnalyzerError::Configuration(format!(
                "{} environment variable not set",
                self.config.gcp.access_token_env
            ))
        })
    }
}

#[async_trait]
impl CloudBackend for GcpBackend {
    fn credentials(&self) -> AnalyzerResult<Credentials> {
        self.config.resolve_credentials()
    }

    fn query_executor(
        &self,
        project_id: &str,
        region: &str,
        credentials: &Credentials,
    ) -> AnalyzerResult<Arc<dyn QueryExecutor>> {
        let token = self.access_token(credentials)?;
        Ok(Arc::new(BigQueryClient::with_http(
            &self.config.gcp,
            self.http.clone(),
            project_id,
            Some(region.to_string()),
            token,
        )))
    }

    fn reasoning_agent(
        &self,
        project_id: &str,
        credentials: &Credentials,
    ) -> AnalyzerResult<Arc<dyn ReasoningAgent>> {
        let agent = GeminiAgent::new(&self.config.agent, credentials.agent_api_key.clone())
            .map_err(|e| AnalyzerError::Configuration(format!("Gemini client: {}", e)))?;
        let catalog = BackendCatalog::new(Arc::new(self.clone()), project_id, credentials.clone());
        Ok(Arc::new(agent.with_catalog(Arc::new(catalog))))
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        // listing needs only the token, not region or agent key
        let token = std::env::var(&self.config.gcp.access_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AnalyzerError::Configuration(format!(
                    "{} environment variable not set",
                    self.config.gcp.access_token_env
                ))
            })?;
        search_projects(&self.http, &self.config.gcp.resource_manager_url, &token).await
    }
}

/// [`CatalogTool`] that builds a region-bound executor per call.
pub struct BackendCatalog {
    backend: Arc<dyn CloudBackend>,
    project_id: String,
    credentials: Credentials,
}

impl BackendCatalog {
    pub fn new(
        backend: Arc<dyn CloudBackend>,
        project_id: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            backend,
            project_id: project_id.into(),
            credentials,
        }
    }
}

#[async_trait]
impl CatalogTool for BackendCatalog {
    async fn run_query(&self, query: &str, region: Option<&str>) -> AnalyzerResult<Vec<Row>> {
        let region = region
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(&self.credentials.region);
        let executor = self
            .backend
            .query_executor(&self.project_id, region, &self.credentials)?;
        executor.execute(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;
    use std::sync::Mutex;

    struct RecordingBackend {
        regions: Mutex<Vec<String>>,
    }

    struct NoRows;

    #[async_trait]
    impl QueryExecutor for NoRows {
        async fn execute(&self, _query: &str) -> AnalyzerResult<Vec<Row>> {
            Ok(vec![])
        }
    }

    struct Silent;

    #[async_trait]
    impl ReasoningAgent for Silent {
        async fn respond(&self, _role: AgentRole, _prompt: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl CloudBackend for RecordingBackend {
        fn credentials(&self) -> AnalyzerResult<Credentials> {
            unreachable!()
        }

        fn query_executor(
            &self,
            _project_id: &str,
            region: &str,
            _credentials: &Credentials,
        ) -> AnalyzerResult<Arc<dyn QueryExecutor>> {
            self.regions.lock().unwrap().push(region.to_string());
            Ok(Arc::new(NoRows))
        }

        fn reasoning_agent(
            &self,
            _project_id: &str,
            _credentials: &Credentials,
        ) -> AnalyzerResult<Arc<dyn ReasoningAgent>> {
            Ok(Arc::new(Silent))
        }

        async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
            Ok(vec![])
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            region: "US".to_string(),
            agent_api_key: "k".to_string(),
            access_token: None,
        }
    }

    #[tokio::test]
    async fn catalog_tool_defaults_to_configured_region() {
        let backend = Arc::new(RecordingBackend {
            regions: Mutex::new(vec![]),
        });
        let catalog = BackendCatalog::new(backend.clone(), "p", credentials());

        catalog.run_query("SELECT 1", None).await.unwrap();
        catalog.run_query("SELECT 1", Some("")).await.unwrap();
        catalog.run_query("SELECT 1", Some("EU")).await.unwrap();

        assert_eq!(*backend.regions.lock().unwrap(), vec!["US", "US", "EU"]);
    }

    #[test]
    fn gcp_executor_requires_access_token() {
        let backend = GcpBackend::new(Arc::new(Config::minimal())).unwrap();
        let err = match backend.query_executor("p", "US", &credentials()) {
            Err(e) => e,
            Ok(_) => panic!("executor built without a token"),
        };
        assert!(matches!(err, AnalyzerError::Configuration(_)));
        assert!(err.to_string().contains("GOOGLE_OAUTH_ACCESS_TOKEN"));
    }
}
