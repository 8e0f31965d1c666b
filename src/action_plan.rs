//! Markdown action plan for a single recommendation.

use tracing::info;

use crate::agent::{invoke, AgentRole, ReasoningAgent};
use crate::decode::strip_code_fence;
use crate::error::AnalyzerResult;
use crate::models::ActionPlanRequest;
use crate::prompts::action_plan_prompt;

/// Ask the planner role for a step-by-step plan addressing
/// `request.recommendation`, given the analysis it came from.
pub async fn generate_action_plan(
    agent: &dyn ReasoningAgent,
    request: &ActionPlanRequest,
) -> AnalyzerResult<String> {
    info!(
        title = request.recommendation.title.as_deref().unwrap_or(""),
        "generating action plan"
    );
    let prompt = action_plan_prompt(&request.recommendation, &request.analysis_context);
    let plan = invoke(agent, AgentRole::ActionPlanner, &prompt).await?;
    Ok(strip_markdown_fence(&plan).to_string())
}

/// Models sometimes wrap markdown answers in a ```markdown fence.
fn strip_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```markdown") {
        Some(rest) => rest.trim_end().strip_suffix("```").unwrap_or(rest).trim(),
        None => strip_code_fence(trimmed),
    }
}
