//! TOML configuration parsing and credential resolution.
//!
//! Every section is optional; missing keys fall back to the defaults below.
//! Secrets are never stored in the file itself: the config only names the
//! environment variables they are read from.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::error::AnalyzerError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub gcp: GcpConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GcpConfig {
    /// Default location for region-scoped catalog views. Falls back to
    /// `GOOGLE_CLOUD_REGION` when unset.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_bigquery_url")]
    pub bigquery_url: String,
    #[serde(default = "default_resource_manager_url")]
    pub resource_manager_url: String,
    #[serde(default = "default_gcp_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            region: None,
            access_token_env: default_access_token_env(),
            bigquery_url: default_bigquery_url(),
            resource_manager_url: default_resource_manager_url(),
            timeout_secs: default_gcp_timeout_secs(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

fn default_access_token_env() -> String {
    "GOOGLE_OAUTH_ACCESS_TOKEN".to_string()
}
fn default_bigquery_url() -> String {
    "https://bigquery.googleapis.com".to_string()
}
fn default_resource_manager_url() -> String {
    "https://cloudresourcemanager.googleapis.com".to_string()
}
fn default_gcp_timeout_secs() -> u64 {
    60
}
fn default_poll_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_agent_provider")]
    pub provider: String,
    #[serde(default = "default_agent_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on model ↔ tool round trips for a single invocation.
    #[serde(default = "default_max_tool_turns")]
    pub max_tool_turns: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: default_agent_provider(),
            model: default_agent_model(),
            api_key_env: default_api_key_env(),
            base_url: default_agent_base_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_agent_timeout_secs(),
            max_tool_turns: default_max_tool_turns(),
        }
    }
}

fn default_agent_provider() -> String {
    "gemini".to_string()
}
fn default_agent_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_agent_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_agent_timeout_secs() -> u64 {
    120
}
fn default_max_tool_turns() -> u32 {
    8
}

/// How datasets are discovered before aggregation.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Ask the discovery agent, which queries the catalog through its tool.
    #[default]
    Agent,
    /// Query `INFORMATION_SCHEMA.SCHEMATA` directly in each configured region.
    Regions,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub mode: DiscoveryMode,
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            regions: default_regions(),
        }
    }
}

fn default_regions() -> Vec<String> {
    [
        "US",
        "EU",
        "asia-northeast1",
        "us-central1",
        "us-east1",
        "europe-west1",
        "asia-southeast1",
    ]
    .iter()
    .map(|r| r.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Capacity of the per-request progress channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_event_buffer() -> usize {
    64
}

/// Secrets and locality resolved at the start of a pipeline run.
#[derive(Clone)]
pub struct Credentials {
    pub region: String,
    pub agent_api_key: String,
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("region", &self.region)
            .field("agent_api_key", &"<redacted>")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    /// Configuration with every default applied. Used when no file is given.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Resolve region and credentials from config and environment.
    ///
    /// Region and agent API key are required; the access token is only
    /// needed by the Google transports and is checked there.
    pub fn resolve_credentials(&self) -> Result<Credentials, AnalyzerError> {
        self.resolve_credentials_with(|name| std::env::var(name).ok())
    }

    /// Like [`resolve_credentials`](Self::resolve_credentials) with an
    /// injectable environment lookup.
    pub fn resolve_credentials_with<F>(&self, env: F) -> Result<Credentials, AnalyzerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let region = non_empty(self.gcp.region.clone())
            .or_else(|| non_empty(env("GOOGLE_CLOUD_REGION")))
            .ok_or_else(|| {
                AnalyzerError::Configuration(
                    "gcp.region is not configured and GOOGLE_CLOUD_REGION is not set".to_string(),
                )
            })?;

        let agent_api_key = non_empty(env(&self.agent.api_key_env)).ok_or_else(|| {
            AnalyzerError::Configuration(format!(
                "{} environment variable not set",
                self.agent.api_key_env
            ))
        })?;

        Ok(Credentials {
            region,
            agent_api_key,
            access_token: non_empty(env(&self.gcp.access_token_env)),
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.agent.provider.as_str() {
        "gemini" => {}
        other => anyhow::bail!("Unknown agent provider: '{}'. Must be gemini.", other),
    }

    if config.agent.max_tool_turns == 0 {
        anyhow::bail!("agent.max_tool_turns must be > 0");
    }

    if config.discovery.mode == DiscoveryMode::Regions && config.discovery.regions.is_empty() {
        anyhow::bail!("discovery.regions must not be empty when discovery.mode = \"regions\"");
    }

    if config.server.event_buffer == 0 {
        anyhow::bail!("server.event_buffer must be > 0");
    }

    Ok(())
}
