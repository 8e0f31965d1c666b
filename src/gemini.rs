//! Gemini implementation of [`ReasoningAgent`].
//!
//! Calls `POST {base_url}/v1beta/models/{model}:generateContent`. Each
//! [`respond`](ReasoningAgent::respond) call is a fresh conversation:
//!
//! 1. Send the role instruction, the prompt, and the role's tools.
//! 2. While the model answers with `functionCall` parts, execute them and
//!    send back `functionResponse` parts (bounded by `agent.max_tool_turns`).
//! 3. Return the concatenated text of the first answer without calls.
//!
//! # Retry Strategy
//!
//! Same policy as every other outbound HTTP call in the crate:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agent::{AgentCapability, AgentRole, ReasoningAgent};
use crate::config::AgentConfig;
use crate::error::AnalyzerResult;
use crate::query::Row;

/// Name of the catalog tool exposed to the discovery role.
pub const CATALOG_TOOL_NAME: &str = "execute_bigquery_query";

/// Catalog access offered to the model as a callable tool.
#[async_trait]
pub trait CatalogTool: Send + Sync {
    /// Run `query`, routed to `region` when given.
    async fn run_query(&self, query: &str, region: Option<&str>) -> AnalyzerResult<Vec<Row>>;
}

pub struct GeminiAgent {
    http: reqwest::Client,
    config: AgentConfig,
    api_key: String,
    catalog: Option<Arc<dyn CatalogTool>>,
}

impl GeminiAgent {
    pub fn new(config: &AgentConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            api_key: api_key.into(),
            catalog: None,
        })
    }

    /// Give roles with [`AgentCapability::CatalogQuery`] access to the catalog.
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogTool>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    async fn generate(&self, body: &Value) -> Result<Value> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(%status, attempt, "Gemini API transient error");
                        last_err = Some(anyhow::anyhow!(
                            "Gemini API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Gemini API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Gemini request failed after retries")))
    }

    async fn call_tool(&self, call: &Value) -> Value {
        let name = call.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let args = call.get("args").cloned().unwrap_or(Value::Null);

        let result = match (name, &self.catalog) {
            (CATALOG_TOOL_NAME, Some(catalog)) => {
                let query = args.get("query").and_then(|q| q.as_str()).unwrap_or("");
                let region = args.get("region").and_then(|r| r.as_str());
                info!(%query, region = ?region, "agent tool call");
                match catalog.run_query(query, region).await {
                    Ok(rows) => json!({ "result": rows }),
                    Err(e) => json!({ "error": format!("An error occurred: {}", e) }),
                }
            }
            _ => json!({ "error": format!("Unknown tool: {}", name) }),
        };

        json!({
            "functionResponse": {
                "name": name,
                "response": result,
            }
        })
    }
}

#[async_trait]
impl ReasoningAgent for GeminiAgent {
    async fn respond(&self, role: AgentRole, prompt: &str) -> Result<Option<String>> {
        let tools = tools_for(role.capability(), self.catalog.is_some());
        let mut contents = vec![json!({ "role": "user", "parts": [{ "text": prompt }] })];

        for turn in 0..self.config.max_tool_turns {
            let body = request_body(role, &contents, &tools);
            let response = self.generate(&body).await?;
            let parts = candidate_parts(&response);

            let calls = function_calls(&parts);
            if calls.is_empty() {
                debug!(role = %role, turn, "agent produced final answer");
                return Ok(final_text(&parts));
            }

            contents.push(json!({ "role": "model", "parts": parts }));
            let mut responses = Vec::with_capacity(calls.len());
            for call in calls {
                responses.push(self.call_tool(call).await);
            }
            contents.push(json!({ "role": "user", "parts": responses }));
        }

        bail!(
            "agent '{}' exceeded {} tool turns without a final answer",
            role,
            self.config.max_tool_turns
        )
    }
}

fn tools_for(capability: AgentCapability, catalog_available: bool) -> Value {
    match capability {
        AgentCapability::CatalogQuery if catalog_available => json!([{
            "functionDeclarations": [{
                "name": CATALOG_TOOL_NAME,
                "description": "Executes a SQL query against Google BigQuery. If a region is given, it targets that region's INFORMATION_SCHEMA.",
                "parameters": {
                    "type": "OBJECT",
                    "properties": {
                        "query": { "type": "STRING", "description": "The SQL query to execute." },
                        "region": { "type": "STRING", "description": "The GCP region for the query." }
                    },
                    "required": ["query"]
                }
            }]
        }]),
        AgentCapability::WebSearch => json!([{ "google_search": {} }]),
        _ => json!([]),
    }
}

fn request_body(role: AgentRole, contents: &[Value], tools: &Value) -> Value {
    let mut body = json!({
        "systemInstruction": { "parts": [{ "text": role.instruction() }] },
        "contents": contents,
    });
    if tools.as_array().is_some_and(|t| !t.is_empty()) {
        body["tools"] = tools.clone();
    }
    body
}

/// Parts of the first candidate, or nothing when the response was blocked.
fn candidate_parts(response: &Value) -> Vec<Value> {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default()
}

fn function_calls(parts: &[Value]) -> Vec<&Value> {
    parts.iter().filter_map(|p| p.get("functionCall")).collect()
}

/// Concatenated text of all parts, skipping thought parts.
fn final_text(parts: &[Value]) -> Option<String> {
    let text: String = parts
        .iter()
        .filter(|p| !p.get("thought").and_then(|t| t.as_bool()).unwrap_or(false))
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_role_declares_catalog_tool() {
        let tools = tools_for(AgentCapability::CatalogQuery, true);
        assert_eq!(
            tools[0]["functionDeclarations"][0]["name"],
            CATALOG_TOOL_NAME
        );
        // without a catalog the role still runs, just without tools
        assert_eq!(tools_for(AgentCapability::CatalogQuery, false), json!([]));
    }

    #[test]
    fn planner_role_gets_search() {
        let tools = tools_for(AgentCapability::WebSearch, false);
        assert!(tools[0].get("google_search").is_some());
    }

    #[test]
    fn body_omits_empty_tool_list() {
        let contents = vec![json!({"role": "user", "parts": [{"text": "hi"}]})];
        let body = request_body(AgentRole::Summarizer, &contents, &json!([]));
        assert!(body.get("tools").is_none());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert!(body["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("health_score"));
    }

    #[test]
    fn final_text_joins_parts_and_skips_thoughts() {
        let response = json!({"candidates": [{"content": {"parts": [
            {"text": "thinking...", "thought": true},
            {"text": "```json\n[{\"schema_name\":"},
            {"text": "\"a\"}]\n```"}
        ]}}]});
        let parts = candidate_parts(&response);
        assert!(function_calls(&parts).is_empty());
        assert_eq!(
            final_text(&parts).as_deref(),
            Some("```json\n[{\"schema_name\":\"a\"}]\n```")
        );
    }

    #[test]
    fn blocked_response_has_no_text() {
        let response = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let parts = candidate_parts(&response);
        assert!(parts.is_empty());
        assert_eq!(final_text(&parts), None);
    }

    #[test]
    fn function_calls_are_detected() {
        let response = json!({"candidates": [{"content": {"parts": [
            {"functionCall": {"name": CATALOG_TOOL_NAME, "args": {"query": "SELECT 1", "region": "US"}}}
        ]}}]});
        let parts = candidate_parts(&response);
        let calls = function_calls(&parts);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["args"]["region"], "US");
    }
}
