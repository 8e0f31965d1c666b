//! Reasoning-step invocation.
//!
//! A [`ReasoningAgent`] turns an instruction (the [`AgentRole`]) plus a
//! free-form prompt into text. The pipeline never talks to an agent backend
//! directly; it goes through [`invoke`], which maps a missing answer to
//! [`AnalyzerError::EmptyAgentResponse`] and backend failures to
//! [`AnalyzerError::Agent`]. Interpreting the text is left to
//! [`crate::decode`].
//!
//! # Roles
//!
//! | Role | Name | Capability |
//! |------|------|------------|
//! | [`AgentRole::DatasetDiscoverer`] | `bigquery_dataset_discoverer` | catalog query tool |
//! | [`AgentRole::Summarizer`] | `summary_agent` | none |
//! | [`AgentRole::ActionPlanner`] | `action_plan_generator` | web search |

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{AnalyzerError, AnalyzerResult};
use crate::prompts;

/// What an agent can do besides writing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCapability {
    None,
    /// May call `execute_bigquery_query` against the metadata catalog.
    CatalogQuery,
    /// May search the web.
    WebSearch,
}

/// The personas the pipeline addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    DatasetDiscoverer,
    Summarizer,
    ActionPlanner,
}

impl AgentRole {
    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::DatasetDiscoverer => "bigquery_dataset_discoverer",
            AgentRole::Summarizer => "summary_agent",
            AgentRole::ActionPlanner => "action_plan_generator",
        }
    }

    /// System instruction sent with every request for this role.
    pub fn instruction(&self) -> &'static str {
        match self {
            AgentRole::DatasetDiscoverer => prompts::DISCOVERY_INSTRUCTION,
            AgentRole::Summarizer => prompts::SUMMARY_INSTRUCTION,
            AgentRole::ActionPlanner => prompts::ACTION_PLAN_INSTRUCTION,
        }
    }

    pub fn capability(&self) -> AgentCapability {
        match self {
            AgentRole::DatasetDiscoverer => AgentCapability::CatalogQuery,
            AgentRole::Summarizer => AgentCapability::None,
            AgentRole::ActionPlanner => AgentCapability::WebSearch,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A backend that can answer a prompt in a given role.
///
/// Implementations hold no state between calls; every call is a fresh
/// conversation.
#[async_trait]
pub trait ReasoningAgent: Send + Sync {
    /// Run one conversation and return the final text, or `None` when the
    /// agent finished without producing any.
    async fn respond(&self, role: AgentRole, prompt: &str) -> anyhow::Result<Option<String>>;
}

/// Ask `agent` to answer `prompt` in `role` and return its final text.
///
/// Waits until the agent finishes. Blank answers count as no answer.
pub async fn invoke(
    agent: &dyn ReasoningAgent,
    role: AgentRole,
    prompt: &str,
) -> AnalyzerResult<String> {
    debug!(role = %role, prompt_len = prompt.len(), "invoking agent");
    match agent.respond(role, prompt).await {
        Ok(Some(text)) if !text.trim().is_empty() => Ok(text),
        Ok(_) => {
            warn!(role = %role, "agent produced no final text");
            Err(AnalyzerError::EmptyAgentResponse {
                role: role.name().to_string(),
            })
        }
        Err(e) => {
            warn!(role = %role, error = %e, "agent invocation failed");
            Err(AnalyzerError::Agent {
                role: role.name().to_string(),
                message: format!("{:#}", e),
            })
        }
    }
}
