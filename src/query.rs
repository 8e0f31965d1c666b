//! Metadata query facade.
//!
//! Two layers:
//!
//! - [`QueryExecutor`] is the raw capability: run a fully resolved SQL string
//!   and return rows as ordered key → JSON value maps. [`BigQueryClient`] is
//!   the production implementation over the BigQuery REST API.
//! - [`MetadataFacade`] wraps an executor, logs failures with the query text,
//!   and decodes rows into a caller-chosen struct so every catalog query has
//!   an explicit row shape. Schema drift surfaces as a [`AnalyzerError::Query`]
//!   instead of a missing key deep inside the aggregator.
//!
//! Neither layer retries. The caller decides what a failure means.

use async_trait::async_trait;
use chrono::DateTime;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GcpConfig;
use crate::error::{AnalyzerError, AnalyzerResult};

/// One result row. Column order matches the query's select list.
pub type Row = Map<String, Value>;

/// Anything that can run a SQL query against the metadata catalog.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `query` and return all rows.
    ///
    /// The query must already embed the project, dataset, or region it
    /// targets. Implementations report every failure as
    /// [`AnalyzerError::Query`].
    async fn execute(&self, query: &str) -> AnalyzerResult<Vec<Row>>;
}

/// Typed, logging front of a [`QueryExecutor`].
#[derive(Clone)]
pub struct MetadataFacade {
    executor: Arc<dyn QueryExecutor>,
}

impl MetadataFacade {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }

    /// Run `query` and return its raw rows.
    pub async fn rows(&self, query: &str) -> AnalyzerResult<Vec<Row>> {
        debug!(%query, "executing metadata query");
        match self.executor.execute(query).await {
            Ok(rows) => Ok(rows),
            Err(e) => {
                warn!(%query, error = %e, "metadata query failed");
                Err(e)
            }
        }
    }

    /// Run `query` and decode every row into `T`.
    pub async fn fetch<T: DeserializeOwned>(&self, query: &str) -> AnalyzerResult<Vec<T>> {
        let rows = self.rows(query).await?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row)).map_err(|e| {
                    warn!(%query, error = %e, "metadata row did not match expected shape");
                    AnalyzerError::query(query, format!("unexpected row shape: {}", e))
                })
            })
            .collect()
    }
}

/// Reject names that cannot be safely spliced into a catalog query.
///
/// Dataset names are letters, digits, and underscores. Project ids may
/// additionally contain `-`, `.` and `:` (domain-scoped projects).
pub fn validate_dataset_name(name: &str) -> AnalyzerResult<&str> {
    static DATASET: OnceLock<Regex> = OnceLock::new();
    let re = DATASET.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]{1,1024}$").unwrap());
    if re.is_match(name) {
        Ok(name)
    } else {
        Err(AnalyzerError::InvalidIdentifier(name.to_string()))
    }
}

pub fn validate_project_id(id: &str) -> AnalyzerResult<&str> {
    static PROJECT: OnceLock<Regex> = OnceLock::new();
    let re = PROJECT.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-.:]{0,127}$").unwrap());
    if re.is_match(id) {
        Ok(id)
    } else {
        Err(AnalyzerError::InvalidIdentifier(id.to_string()))
    }
}

/// Region names are interpolated into `region-<name>` qualifiers.
pub fn validate_region(region: &str) -> AnalyzerResult<&str> {
    static REGION: OnceLock<Regex> = OnceLock::new();
    let re = REGION.get_or_init(|| Regex::new(r"^[A-Za-z0-9\-]{1,64}$").unwrap());
    if re.is_match(region) {
        Ok(region)
    } else {
        Err(AnalyzerError::InvalidIdentifier(region.to_string()))
    }
}

// ============ BigQuery REST client ============

/// Runs queries through `jobs.query` / `jobs.getQueryResults`.
///
/// The client is bound to one billing project and one location, mirroring
/// how a BigQuery job is routed. Region-scoped views still need the
/// `region-<name>` qualifier inside the SQL.
pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    location: Option<String>,
    access_token: String,
    poll_timeout_ms: u64,
}

impl BigQueryClient {
    pub fn new(
        config: &GcpConfig,
        project_id: impl Into<String>,
        location: Option<String>,
        access_token: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_http(config, http, project_id, location, access_token))
    }

    /// Build a client that shares an existing connection pool.
    pub fn with_http(
        config: &GcpConfig,
        http: reqwest::Client,
        project_id: impl Into<String>,
        location: Option<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: config.bigquery_url.trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            location,
            access_token: access_token.into(),
            poll_timeout_ms: config.poll_timeout_ms,
        }
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    async fn start_query(&self, query: &str) -> anyhow::Result<QueryResponse> {
        let mut body = serde_json::json!({
            "query": query,
            "useLegacySql": false,
            "timeoutMs": self.poll_timeout_ms,
        });
        if let Some(location) = &self.location {
            body["location"] = Value::String(location.clone());
        }

        let url = format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.base_url, self.project_id
        );
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        read_response(resp).await
    }

    async fn query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> anyhow::Result<QueryResponse> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/queries/{}",
            self.base_url, job.project_id, job.job_id
        );
        let mut params: Vec<(&str, String)> =
            vec![("timeoutMs", self.poll_timeout_ms.to_string())];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&params)
            .send()
            .await?;
        read_response(resp).await
    }

    async fn run(&self, query: &str) -> anyhow::Result<Vec<Row>> {
        let mut response = self.start_query(query).await?;
        let mut schema: Option<TableSchema> = None;
        let mut rows = Vec::new();

        loop {
            if let Some(errors) = response.errors.as_ref().filter(|e| !e.is_empty()) {
                anyhow::bail!("{}", errors[0].message);
            }

            if response.job_complete {
                if schema.is_none() {
                    schema = response.schema.take();
                }
                if let Some(schema) = &schema {
                    for raw in response.rows.take().unwrap_or_default() {
                        rows.push(decode_row(&schema.fields, &raw));
                    }
                }
                if response.page_token.is_none() {
                    return Ok(rows);
                }
            }

            let job = response
                .job_reference
                .clone()
                .ok_or_else(|| anyhow::anyhow!("BigQuery response missing jobReference"))?;
            let page_token = if response.job_complete {
                response.page_token.clone()
            } else {
                None
            };
            response = self.query_results(&job, page_token.as_deref()).await?;
        }
    }
}

#[async_trait]
impl QueryExecutor for BigQueryClient {
    async fn execute(&self, query: &str) -> AnalyzerResult<Vec<Row>> {
        self.run(query)
            .await
            .map_err(|e| AnalyzerError::query(query, e))
    }
}

async fn read_response(resp: reqwest::Response) -> anyhow::Result<QueryResponse> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    let message = body
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .unwrap_or("no error message");
    anyhow::bail!("BigQuery API error {}: {}", status, message)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Option<Vec<RawRow>>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    errors: Option<Vec<ErrorProto>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    f: Vec<RawCell>,
}

#[derive(Debug, Deserialize)]
struct RawCell {
    #[serde(default)]
    v: Value,
}

fn decode_row(fields: &[FieldSchema], raw: &RawRow) -> Row {
    fields
        .iter()
        .zip(raw.f.iter())
        .map(|(field, cell)| (field.name.clone(), decode_field(field, &cell.v)))
        .collect()
}

fn decode_field(field: &FieldSchema, v: &Value) -> Value {
    if field.mode.as_deref() == Some("REPEATED") {
        return match v {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| decode_scalar(field, item.get("v").unwrap_or(&Value::Null)))
                    .collect(),
            ),
            _ => Value::Array(vec![]),
        };
    }
    decode_scalar(field, v)
}

/// Convert one REST cell. BigQuery ships every scalar as a string.
fn decode_scalar(field: &FieldSchema, v: &Value) -> Value {
    if v.is_null() {
        return Value::Null;
    }
    match field.field_type.as_str() {
        "RECORD" | "STRUCT" => {
            let cells: Vec<RawCell> = v
                .get("f")
                .and_then(|f| serde_json::from_value(f.clone()).ok())
                .unwrap_or_default();
            Value::Object(decode_row(&field.fields, &RawRow { f: cells }))
        }
        "INTEGER" | "INT64" => v
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| v.clone()),
        "FLOAT" | "FLOAT64" => v
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| v.clone()),
        "BOOLEAN" | "BOOL" => v
            .as_str()
            .map(|s| Value::Bool(s.eq_ignore_ascii_case("true")))
            .unwrap_or_else(|| v.clone()),
        "TIMESTAMP" => v
            .as_str()
            .and_then(parse_epoch_seconds)
            .map(Value::String)
            .unwrap_or_else(|| v.clone()),
        _ => v.clone(),
    }
}

/// TIMESTAMP cells are fractional epoch seconds, e.g. `"1.7000000123E9"`.
fn parse_epoch_seconds(s: &str) -> Option<String> {
    let secs: f64 = s.parse().ok()?;
    let micros = (secs * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros).map(|dt| dt.to_rfc3339())
}
