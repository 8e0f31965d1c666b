//! # bq-pulse
//!
//! Health analysis for BigQuery projects.
//!
//! bq-pulse discovers the datasets of a Google Cloud project, collects their
//! table metadata from `INFORMATION_SCHEMA`, computes a rule-based baseline
//! score, and asks a reasoning agent for a final report and a reading list.
//! Progress streams to the caller as ordered events, over SSE or on the CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌─────────┐   ┌───────────┐
//! │ Discovery │──▶│ Aggregator │──▶│ Scorer  │──▶│  Agent    │
//! │ agent/scan│   │ 5 lookups  │   │ 0..=100 │   │ report +  │
//! └───────────┘   └─────┬──────┘   └─────────┘   │ reading   │
//!                       │                        └─────┬─────┘
//!                       ▼                              ▼
//!                 ┌───────────┐                 ┌────────────┐
//!                 │ BigQuery  │                 │  Progress  │──▶ SSE / CLI
//!                 │ REST API  │                 │  events    │
//!                 └───────────┘                 └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GOOGLE_CLOUD_REGION=US
//! export GEMINI_API_KEY=...
//! export GOOGLE_OAUTH_ACCESS_TOKEN=$(gcloud auth print-access-token)
//! bqp analyze my-project        # one run, report JSON on stdout
//! bqp serve                     # HTTP server on 0.0.0.0:8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credential resolution |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Snapshot, report, and request types |
//! | [`query`] | Metadata query facade and BigQuery REST client |
//! | [`ddl`] | Definition-text heuristics |
//! | [`aggregate`] | Per-dataset metadata aggregation |
//! | [`scoring`] | Baseline health score |
//! | [`agent`] | Reasoning-agent seam and invocation |
//! | [`prompts`] | Role instructions and prompt builders |
//! | [`gemini`] | Gemini implementation of the agent |
//! | [`decode`] | Fence stripping and JSON decoding of agent output |
//! | [`discovery`] | Dataset discovery |
//! | [`progress`] | Progress events, emitter, CLI reporters |
//! | [`pipeline`] | Analysis state machine |
//! | [`backend`] | Per-request collaborator construction |
//! | [`projects`] | Project listing |
//! | [`action_plan`] | Action plans for single recommendations |
//! | [`server`] | HTTP server |

pub mod action_plan;
pub mod agent;
pub mod aggregate;
pub mod backend;
pub mod config;
pub mod ddl;
pub mod decode;
pub mod discovery;
pub mod error;
pub mod gemini;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod projects;
pub mod prompts;
pub mod query;
pub mod scoring;
pub mod server;
