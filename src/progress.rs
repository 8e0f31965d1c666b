//! Analysis progress events and their delivery.
//!
//! The pipeline reports through a [`ProgressEmitter`]: an ordered channel to
//! whoever is listening (an SSE response or the CLI) plus a
//! [`CancellationToken`]. Events arrive in exactly the order they were
//! emitted. When the listener goes away the emitter reports itself
//! cancelled, which the pipeline polls at fixed checkpoints.
//!
//! The CLI renders events with a [`ProgressReporter`] on **stderr** so
//! stdout only carries the final report.

use serde_json::{json, Value};
use std::io::Write;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{AnalysisSnapshot, HealthReport, ReadingListItem};

/// One event of the analysis stream.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Stage change or progress tick.
    Update {
        status: &'static str,
        progress: u8,
        details: String,
        /// Snapshot attached once aggregation is done.
        snapshot: Option<AnalysisSnapshot>,
    },
    /// Human-readable log line for the activity feed.
    Checkpoint { text: String },
    /// Terminal failure.
    Error { details: String },
    /// Terminal success.
    Complete {
        report: HealthReport,
        reading_list: Vec<ReadingListItem>,
    },
}

impl ProgressEvent {
    pub fn update(status: &'static str, progress: u8, details: impl Into<String>) -> Self {
        ProgressEvent::Update {
            status,
            progress,
            details: details.into(),
            snapshot: None,
        }
    }

    pub fn checkpoint(text: impl Into<String>) -> Self {
        ProgressEvent::Checkpoint { text: text.into() }
    }

    pub fn error(details: impl Into<String>) -> Self {
        ProgressEvent::Error {
            details: details.into(),
        }
    }

    /// Event name on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Update { .. } => "update",
            ProgressEvent::Checkpoint { .. } => "checkpoint",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Complete { .. } => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Error { .. } | ProgressEvent::Complete { .. }
        )
    }

    /// Percent complete, for events that carry one.
    pub fn progress(&self) -> Option<u8> {
        match self {
            ProgressEvent::Update { progress, .. } => Some(*progress),
            ProgressEvent::Complete { .. } => Some(100),
            _ => None,
        }
    }

    /// JSON body of the event.
    pub fn payload(&self) -> Value {
        match self {
            ProgressEvent::Update {
                status,
                progress,
                details,
                snapshot,
            } => {
                let mut body = json!({
                    "status": status,
                    "progress": progress,
                    "details": details,
                });
                if let Some(snapshot) = snapshot {
                    body["full_environment_data"] = json!(snapshot);
                }
                body
            }
            ProgressEvent::Checkpoint { text } => json!({ "text": text }),
            ProgressEvent::Error { details } => json!({
                "status": "Error",
                "details": details,
            }),
            ProgressEvent::Complete {
                report,
                reading_list,
            } => json!({
                "status": "Complete",
                "progress": 100,
                "report": report,
                "reading_list": reading_list,
            }),
        }
    }
}

/// Ordered event sink with cooperative cancellation.
#[derive(Clone)]
pub struct ProgressEmitter {
    tx: mpsc::Sender<ProgressEvent>,
    cancel: CancellationToken,
}

impl ProgressEmitter {
    /// Emitter plus the receiving end of its channel.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Use `token` for cancellation instead of a private one.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once the token fired or the receiver was dropped.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Deliver `event`. A closed channel cancels the token.
    pub async fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
        }
    }
}

/// Renders events for a terminal.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Human-friendly progress on stderr: `[ 45%] Fetching  Fetching details for: sales`.
pub struct StderrProgress;

impl StderrProgress {
    fn render(event: &ProgressEvent) -> String {
        match event {
            ProgressEvent::Update {
                status,
                progress,
                details,
                ..
            } => format!("[{:>3}%] {:<10} {}\n", progress, status, details),
            ProgressEvent::Checkpoint { text } => format!("       · {}\n", text),
            ProgressEvent::Error { details } => format!("[error] {}\n", details),
            ProgressEvent::Complete { report, .. } => {
                format!("[100%] Complete   health score {}\n", report.health_score)
            }
        }
    }
}

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        write_flushed(&mut std::io::stderr().lock(), &Self::render(event));
    }
}

/// Machine-readable progress: one `{"event", "data"}` object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn render(event: &ProgressEvent) -> Option<String> {
        let obj = json!({ "event": event.kind(), "data": event.payload() });
        serde_json::to_string(&obj).ok().map(|line| line + "\n")
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        if let Some(line) = Self::render(event) {
            write_flushed(&mut std::io::stderr().lock(), &line);
        }
    }
}

/// Write and flush through one handle.
fn write_flushed<W: Write>(out: &mut W, line: &str) {
    let _ = out.write_all(line.as_bytes());
    let _ = out.flush();
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}' (expected human, json or off)",
                other
            )),
        }
    }
}
