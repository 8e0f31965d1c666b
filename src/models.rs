//! Core data models used throughout bq-pulse.
//!
//! These types describe the metadata gathered for one project, the report
//! produced from it, and the request/response bodies of the HTTP surface.
//! Field names follow the JSON the web client consumes, so the snapshot can
//! be serialized as-is into progress events and agent prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A discovered dataset, optionally pinned to the region it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl ResourceIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
        }
    }

    pub fn in_region(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: Some(region.into()),
        }
    }
}

/// `table_type` as reported by `INFORMATION_SCHEMA.TABLES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    #[serde(rename = "BASE TABLE")]
    Base,
    #[serde(rename = "VIEW")]
    View,
    #[serde(rename = "EXTERNAL")]
    External,
    #[serde(rename = "OTHER", other)]
    Other,
}

/// One table of a dataset with everything the scorer and the summary agent need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub table_name: String,
    pub table_type: TableKind,
    pub ddl: String,
    pub has_table_description: bool,
    /// Share of columns carrying a description, in `[0, 1]`.
    pub column_description_completeness: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billable_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustering_info: Option<String>,
}

/// A dataset and its tables, in the order the catalog listed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDetail {
    pub schema_name: String,
    pub ddl: String,
    pub has_dataset_description: bool,
    pub tables: Vec<TableRecord>,
}

/// Every dataset gathered during one pipeline run.
///
/// Built once when aggregation finishes and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisSnapshot {
    datasets: Vec<ResourceDetail>,
}

impl AnalysisSnapshot {
    pub fn new(datasets: Vec<ResourceDetail>) -> Self {
        Self { datasets }
    }

    pub fn datasets(&self) -> &[ResourceDetail] {
        &self.datasets
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn table_count(&self) -> usize {
        self.datasets.iter().map(|d| d.tables.len()).sum()
    }

    /// Pretty JSON for prompts. Serialization of these types cannot fail.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Severity attached to findings and recommendations.
///
/// Labels are matched case-insensitively. `critical` and `urgent` read as
/// `High`; any other label reads as `Medium`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(match label.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" | "urgent" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    /// Markdown.
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub importance: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    /// Markdown.
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub priority: Priority,
}

/// Final report written by the summary agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Any JSON number is accepted and rounded to the nearest integer.
    #[serde(deserialize_with = "rounded_score")]
    pub health_score: i64,
    #[serde(default)]
    pub key_findings: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

impl HealthReport {
    /// Clamp the agent's score into `[0, 100]`.
    pub fn normalized(mut self) -> Self {
        self.health_score = self.health_score.clamp(0, 100);
        self
    }
}

fn rounded_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let score = f64::deserialize(deserializer)?;
    if !score.is_finite() {
        return Err(serde::de::Error::custom("health_score is not a finite number"));
    }
    // `as` saturates, and normalized() clamps afterwards.
    Ok(score.round() as i64)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingListItem {
    pub url: String,
    pub summary: String,
}

/// A project the caller's credentials can enumerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: String,
}

/// The recommendation an action plan is requested for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationRef {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

/// Body of `POST /api/generate_action_plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlanRequest {
    pub recommendation: RecommendationRef,
    /// The snapshot the recommendation was derived from, passed through verbatim.
    #[serde(default)]
    pub analysis_context: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlanResponse {
    pub action_plan: String,
}
