//! Decoding of reasoning-agent output.
//!
//! Agents are asked for JSON but answer in free text, usually wrapped in a
//! markdown code fence. Every stage goes through the same two steps:
//! [`strip_code_fence`] on the raw text, then [`decode_agent_json`] into the
//! stage's expected type. A decode failure always keeps the raw text.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{AnalyzerError, AnalyzerResult};
use crate::models::ResourceIdentifier;

/// Remove a surrounding markdown fence (```` ```json ```` or bare ```` ``` ````).
///
/// Text without a leading fence is returned trimmed but otherwise unchanged.
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the info string (`json`, `JSON`, ...) up to the first newline
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Decode agent text as `T`, naming `stage` in the error on failure.
pub fn decode_agent_json<T: DeserializeOwned>(stage: &str, raw: &str) -> AnalyzerResult<T> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(AnalyzerError::MalformedAgentOutput {
            stage: stage.to_string(),
            raw: raw.to_string(),
            reason: "response is empty".to_string(),
        });
    }
    serde_json::from_str(body).map_err(|e| AnalyzerError::MalformedAgentOutput {
        stage: stage.to_string(),
        raw: raw.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DiscoveryOutput {
    List(Vec<DiscoveredEntry>),
    Envelope { datasets: Vec<DiscoveredEntry> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DiscoveredEntry {
    Named {
        #[serde(default)]
        schema_name: Option<String>,
        #[serde(default)]
        region: Option<String>,
    },
    Bare(String),
}

/// Decode the discovery agent's dataset list.
///
/// Accepts `[{"schema_name": "a", "region": "US"}, ...]`, `["a", ...]`, or
/// `{"datasets": [...]}`. Entries without a name are skipped. An empty
/// result is a failure: there is nothing to analyze.
pub fn decode_discovery(raw: &str) -> AnalyzerResult<Vec<ResourceIdentifier>> {
    let parsed: DiscoveryOutput =
        decode_agent_json("Discovery agent", raw).map_err(|e| AnalyzerError::DiscoveryParse {
            raw: raw.to_string(),
            reason: match e {
                AnalyzerError::MalformedAgentOutput { reason, .. } => reason,
                other => other.to_string(),
            },
        })?;

    let entries = match parsed {
        DiscoveryOutput::List(entries) | DiscoveryOutput::Envelope { datasets: entries } => entries,
    };

    let resources: Vec<ResourceIdentifier> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            DiscoveredEntry::Named {
                schema_name: Some(name),
                region,
            } if !name.trim().is_empty() => Some(ResourceIdentifier {
                name: name.trim().to_string(),
                region: region.filter(|r| !r.trim().is_empty()),
            }),
            DiscoveredEntry::Bare(name) if !name.trim().is_empty() => {
                Some(ResourceIdentifier::new(name.trim()))
            }
            _ => None,
        })
        .collect();

    if resources.is_empty() {
        return Err(AnalyzerError::DiscoveryParse {
            raw: raw.to_string(),
            reason: "no datasets in discovery output".to_string(),
        });
    }
    Ok(resources)
}
