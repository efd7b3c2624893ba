//! Shared types, errors, context, and outcome for the Trellis workflow engine.
//!
//! This crate provides the foundational types used across all other Trellis crates:
//! - `TrellisError`: unified error taxonomy
//! - `ContextValue` / `Context`: the key-value store threaded through one run
//! - `StageStatus` / `Outcome`: result of executing a node handler

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unified error type for all Trellis subsystems.
#[derive(Debug, thiserror::Error)]
pub enum TrellisError {
    // === Compile-time Errors ===
    #[error("{message} at line {line}, column {column}")]
    Lex {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("{message} at line {line}, column {column}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    // === Pipeline Errors ===
    #[error("Pipeline validation failed: {0}")]
    Validation(String),

    #[error("Handler '{handler}' failed on node '{node}': {message}")]
    Handler {
        handler: String,
        node: String,
        message: String,
    },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TrellisError {
    /// Returns `true` for errors raised while turning source text into a graph.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            TrellisError::Lex { .. } | TrellisError::Parse { .. } | TrellisError::InvalidDuration(_)
        )
    }

    /// Source position of a lexer or parser error.
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            TrellisError::Lex { line, column, .. } | TrellisError::Parse { line, column, .. } => {
                Some((*line, *column))
            }
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, TrellisError>`.
pub type Result<T> = std::result::Result<T, TrellisError>;

// ---------------------------------------------------------------------------
// ContextValue: tagged value stored in the run context
// ---------------------------------------------------------------------------

/// A value stored in a [`Context`]: a string, a number, or a nested record.
///
/// `Display` is the canonical stringification used by condition matching:
/// numbers in decimal form, records as compact JSON with sorted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    String(String),
    Number(serde_json::Number),
    Record(BTreeMap<String, ContextValue>),
}

impl ContextValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ContextValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::String(s) => f.write_str(s),
            ContextValue::Number(n) => write!(f, "{n}"),
            ContextValue::Record(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::String(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::String(value.to_owned())
    }
}

impl From<&String> for ContextValue {
    fn from(value: &String) -> Self {
        ContextValue::String(value.clone())
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Number(value.into())
    }
}

impl From<u32> for ContextValue {
    fn from(value: u32) -> Self {
        ContextValue::Number(value.into())
    }
}

impl From<usize> for ContextValue {
    fn from(value: usize) -> Self {
        ContextValue::Number((value as u64).into())
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        match serde_json::Number::from_f64(value) {
            Some(n) => ContextValue::Number(n),
            None => ContextValue::String(value.to_string()),
        }
    }
}

impl From<BTreeMap<String, ContextValue>> for ContextValue {
    fn from(value: BTreeMap<String, ContextValue>) -> Self {
        ContextValue::Record(value)
    }
}

// ---------------------------------------------------------------------------
// Context: key-value store for one pipeline run
// ---------------------------------------------------------------------------

/// Key-value store owned by a single pipeline run.
///
/// Only one logical task touches a run's context at a time, so it is a plain
/// value: handlers receive `&mut Context` and `clone()` is a deep, fully
/// independent copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    values: HashMap<String, ContextValue>,
    logs: Vec<String>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a context from a snapshot and log list, e.g. out of a checkpoint.
    pub fn from_parts(values: HashMap<String, ContextValue>, logs: Vec<String>) -> Self {
        Self { values, logs }
    }

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    /// Canonical string form of `key`, or `default` when it is absent.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .map(ToString::to_string)
            .unwrap_or_else(|| default.to_owned())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Append a free-form log entry.
    pub fn append_log(&mut self, entry: impl Into<String>) {
        self.logs.push(entry.into());
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Plain serializable copy of the current values.
    pub fn snapshot(&self) -> HashMap<String, ContextValue> {
        self.values.clone()
    }

    /// Shallow merge: keys in `updates` overwrite, everything else is kept.
    pub fn apply_updates(&mut self, updates: HashMap<String, ContextValue>) {
        self.values.extend(updates);
    }
}

// ---------------------------------------------------------------------------
// StageStatus: outcome status of a pipeline node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Skipped,
}

impl StageStatus {
    /// The lowercase name used in edge conditions and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::PartialSuccess => "partial_success",
            StageStatus::Retry => "retry",
            StageStatus::Fail => "fail",
            StageStatus::Skipped => "skipped",
        }
    }

    /// Whether a node with this status is eligible for retry-in-place.
    pub fn wants_retry(&self) -> bool {
        matches!(self, StageStatus::Fail | StageStatus::Retry)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(StageStatus::Success),
            "partial_success" => Ok(StageStatus::PartialSuccess),
            "retry" => Ok(StageStatus::Retry),
            "fail" => Ok(StageStatus::Fail),
            "skipped" => Ok(StageStatus::Skipped),
            other => Err(TrellisError::Other(format!("unknown stage status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome: result of executing a node handler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: StageStatus,
    #[serde(default)]
    pub preferred_label: String,
    #[serde(default)]
    pub suggested_next_ids: Vec<String>,
    #[serde(default)]
    pub context_updates: HashMap<String, ContextValue>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl Outcome {
    /// An outcome with the given status and every other field empty.
    pub fn new(status: StageStatus) -> Self {
        Self {
            status,
            preferred_label: String::new(),
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: None,
        }
    }

    pub fn success() -> Self {
        Self::new(StageStatus::Success)
    }

    /// Create a failed outcome with the given reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::new(StageStatus::Fail)
        }
    }

    /// Create an outcome with a specific status and preferred label.
    pub fn with_label(status: StageStatus, label: impl Into<String>) -> Self {
        Self {
            preferred_label: label.into(),
            ..Self::new(status)
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_suggested_next_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggested_next_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context_update(
        mut self,
        key: impl Into<String>,
        value: impl Into<ContextValue>,
    ) -> Self {
        self.context_updates.insert(key.into(), value.into());
        self
    }
}
