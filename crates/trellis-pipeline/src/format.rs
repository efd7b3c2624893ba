//! Human-readable rendering of pipeline events.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use trellis_types::{StageStatus, TrellisError};

use crate::events::{EventKind, PipelineEvent};

/// How much of the event stream a reader wants to see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Minimal,
    #[default]
    Standard,
    Verbose,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Minimal => "minimal",
            Verbosity::Standard => "standard",
            Verbosity::Verbose => "verbose",
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verbosity {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(Verbosity::Minimal),
            "standard" => Ok(Verbosity::Standard),
            "verbose" => Ok(Verbosity::Verbose),
            other => Err(TrellisError::Other(format!("unknown verbosity: {other}"))),
        }
    }
}

const MINIMAL_KINDS: &[&str] = &[
    "pipeline_started",
    "pipeline_completed",
    "pipeline_failed",
    "error",
];

const STANDARD_KINDS: &[&str] = &[
    "stage_started",
    "stage_completed",
    "stage_retrying",
    "edge_selected",
    "human_gate",
];

pub fn should_emit(event: &PipelineEvent, verbosity: Verbosity) -> bool {
    let name = event.kind.name();
    match verbosity {
        Verbosity::Verbose => true,
        Verbosity::Standard => MINIMAL_KINDS.contains(&name) || STANDARD_KINDS.contains(&name),
        Verbosity::Minimal => MINIMAL_KINDS.contains(&name),
    }
}

/// `42s` under a minute, otherwise `3m 5s` (or `3m` on a whole minute).
pub fn format_duration(ms: u64) -> String {
    if ms < 60_000 {
        return format!("{}s", (ms as f64 / 1000.0).round());
    }
    let mins = ms / 60_000;
    let secs = ((ms % 60_000) as f64 / 1000.0).round();
    if secs > 0.0 {
        format!("{mins}m {secs}s")
    } else {
        format!("{mins}m")
    }
}

/// Render `event`, or `None` when `verbosity` suppresses it.
pub fn format_event(event: &PipelineEvent, verbosity: Verbosity) -> Option<String> {
    if !should_emit(event, verbosity) {
        return None;
    }
    let text = match &event.kind {
        EventKind::PipelineStarted { goal, total_nodes } => {
            format!("[Pipeline] {goal}\n  {total_nodes} nodes")
        }
        EventKind::PipelineCompleted {
            completed_nodes,
            total_nodes,
            duration_ms,
            ..
        } => format!(
            "[Pipeline] Complete — {completed_nodes}/{total_nodes} nodes — {}",
            format_duration(*duration_ms)
        ),
        EventKind::PipelineFailed { reason, .. } => format!("[Pipeline] Failed — {reason}"),
        EventKind::StageStarted {
            node_label,
            stage_num,
            total_nodes,
            ..
        } => format!("  → {node_label} ({stage_num}/{total_nodes})"),
        EventKind::StageCompleted {
            node_label,
            status,
            duration_ms,
            ..
        } => {
            let icon = if *status == StageStatus::Success { '✓' } else { '✗' };
            format!("  {icon} {node_label} — {}", format_duration(*duration_ms))
        }
        EventKind::StageRetrying {
            node_label,
            retry_count,
            max_retries,
            ..
        } => format!("  ↻ Retry {node_label} ({retry_count}/{max_retries})"),
        EventKind::EdgeSelected {
            to_node,
            edge_label,
            ..
        } => {
            let shown = if edge_label.is_empty() { to_node } else { edge_label };
            format!("  ↪ {shown}")
        }
        EventKind::HumanGate {
            node_label,
            choices,
            ..
        } => format!(
            "  ⏸ Awaiting approval: {node_label}\n  Choices: {}",
            choices.join(" | ")
        ),
        EventKind::Error { node_id, message } => format!("  ✗ Error at {node_id}: {message}"),
    };
    Some(text)
}
