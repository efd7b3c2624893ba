//! Checkpoint save/restore for pipeline execution.
//!
//! After each handler node completes, the executor can persist a
//! [`Checkpoint`] to `<dir>/checkpoint.json`, so external tooling can inspect
//! or resume a run. Writes go to a temp file that is then renamed over the
//! previous checkpoint; a reader never sees a partial file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trellis_types::{Context, ContextValue, Result, StageStatus};

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
const CHECKPOINT_TMP_FILE: &str = "checkpoint.json.tmp";

/// Snapshot of one run's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub pipeline_id: String,
    pub timestamp: DateTime<Utc>,
    /// The node whose completion produced this checkpoint.
    pub current_node: String,
    pub completed_nodes: Vec<String>,
    pub node_retries: HashMap<String, u32>,
    pub node_outcomes: HashMap<String, StageStatus>,
    pub context_values: HashMap<String, ContextValue>,
    pub logs: Vec<String>,
}

impl Checkpoint {
    /// The saved context values and logs as a live [`Context`].
    pub fn restore_context(&self) -> Context {
        Context::from_parts(self.context_values.clone(), self.logs.clone())
    }
}

/// Save a checkpoint to the given directory, creating it if needed.
pub async fn save_checkpoint(dir: &Path, checkpoint: &Checkpoint) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(CHECKPOINT_FILE);
    let tmp = dir.join(CHECKPOINT_TMP_FILE);
    let json = serde_json::to_string_pretty(checkpoint)?;
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    tracing::debug!(path = %path.display(), node = %checkpoint.current_node, "Checkpoint saved");
    Ok(path)
}

/// Load the checkpoint in `dir`. A missing, unreadable, or malformed file
/// yields `None`.
pub async fn load_checkpoint(dir: &Path) -> Option<Checkpoint> {
    let path = dir.join(CHECKPOINT_FILE);
    let json = match tokio::fs::read_to_string(&path).await {
        Ok(json) => json,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "No readable checkpoint");
            return None;
        }
    };
    match serde_json::from_str(&json) {
        Ok(checkpoint) => Some(checkpoint),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Malformed checkpoint");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
