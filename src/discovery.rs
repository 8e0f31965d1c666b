//! Dataset discovery.
//!
//! Two strategies, picked by `discovery.mode`:
//!
//! - **agent**: the discovery role queries `INFORMATION_SCHEMA.SCHEMATA`
//!   through its catalog tool and answers with a JSON list, decoded by
//!   [`decode_discovery`](crate::decode::decode_discovery).
//! - **regions**: the same query runs directly against every configured
//!   region. A dataset seen in several regions keeps the first one; a
//!   region that fails to answer is skipped.

use std::collections::HashSet;
use tracing::{info, warn};

use crate::agent::{invoke, AgentRole, ReasoningAgent};
use crate::backend::CloudBackend;
use crate::config::Credentials;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::models::ResourceIdentifier;
use crate::prompts::discovery_prompt;
use crate::query::{validate_project_id, MetadataFacade};

/// Ask the discovery role for the dataset list; returns its raw text.
pub async fn discover_with_agent(
    agent: &dyn ReasoningAgent,
    project_id: &str,
    region: &str,
) -> AnalyzerResult<String> {
    invoke(
        agent,
        AgentRole::DatasetDiscoverer,
        &discovery_prompt(project_id, region),
    )
    .await
}

#[derive(serde::Deserialize)]
struct SchemaRow {
    schema_name: Option<String>,
}

/// Query each region in `regions` and merge the results, sorted by name.
pub async fn discover_across_regions(
    backend: &dyn CloudBackend,
    project_id: &str,
    credentials: &Credentials,
    regions: &[String],
) -> AnalyzerResult<Vec<ResourceIdentifier>> {
    let project = validate_project_id(project_id)?;
    let query = format!("SELECT schema_name FROM `{project}`.INFORMATION_SCHEMA.SCHEMATA");

    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for region in regions {
        let executor = match backend.query_executor(project, region, credentials) {
            Ok(executor) => executor,
            Err(e @ AnalyzerError::Configuration(_)) => return Err(e),
            Err(e) => {
                warn!(%region, error = %e, "skipping region");
                continue;
            }
        };
        let rows: Vec<SchemaRow> = match MetadataFacade::new(executor).fetch(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(%region, error = %e, "skipping region");
                continue;
            }
        };

        info!(%region, datasets = rows.len(), "region answered");
        for name in rows.into_iter().filter_map(|r| r.schema_name) {
            if seen.insert(name.clone()) {
                found.push(ResourceIdentifier::in_region(name, region.as_str()));
            }
        }
    }

    if found.is_empty() {
        return Err(AnalyzerError::DiscoveryParse {
            raw: "[]".to_string(),
            reason: format!("no datasets found in regions {}", regions.join(", ")),
        });
    }

    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}
