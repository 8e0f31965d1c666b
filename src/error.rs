//! Error taxonomy for the analysis pipeline.
//!
//! Every failure the pipeline can surface is one variant of [`AnalyzerError`].
//! Whether a variant is fatal depends on where it is raised: a [`Query`]
//! error only drops the dataset being aggregated, while the same error during
//! discovery ends the run.
//!
//! Client disconnection is deliberately absent here. It is a cooperative
//! cancellation signal and surfaces as
//! [`PipelineOutcome::Cancelled`](crate::pipeline::PipelineOutcome::Cancelled).
//!
//! [`Query`]: AnalyzerError::Query

use thiserror::Error;

/// Errors produced by the analysis pipeline and its collaborators.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Required region or credential configuration is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A metadata query failed to execute or its rows did not match the
    /// expected shape.
    #[error("Query failed: {cause} (query: {query})")]
    Query { query: String, cause: String },

    /// A project or dataset name is not safe to interpolate into SQL.
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// The discovery stage output could not be read as a dataset list.
    #[error("Discovery failed to return a valid dataset list: {reason}. Raw output: '{raw}'")]
    DiscoveryParse { raw: String, reason: String },

    /// A reasoning step returned text that is not the expected JSON.
    #[error("{stage} produced invalid JSON: {reason}. Raw output: {raw}")]
    MalformedAgentOutput {
        stage: String,
        raw: String,
        reason: String,
    },

    /// The reasoning collaborator finished without producing any text.
    #[error("Agent '{role}' did not produce a final text response")]
    EmptyAgentResponse { role: String },

    /// Transport-level failure talking to the reasoning collaborator.
    #[error("Agent '{role}' failed: {message}")]
    Agent { role: String, message: String },
}

impl AnalyzerError {
    pub fn query(query: impl Into<String>, cause: impl ToString) -> Self {
        AnalyzerError::Query {
            query: query.into(),
            cause: cause.to_string(),
        }
    }

    /// The raw collaborator text attached to this error, if any.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            AnalyzerError::DiscoveryParse { raw, .. }
            | AnalyzerError::MalformedAgentOutput { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Result type for pipeline operations.
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;
