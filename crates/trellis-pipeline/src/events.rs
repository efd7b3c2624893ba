//! Pipeline lifecycle events and the sinks that receive them.
//!
//! The executor awaits [`EventSink::emit`] for every event in emission order.
//! [`EventEmitter`] fans events out over a [`tokio::sync::broadcast`] channel
//! so external observers can subscribe without coupling to the engine.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trellis_types::StageStatus;

/// One lifecycle event. Serializes flat, with the variant name under `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub pipeline_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl PipelineEvent {
    pub fn new(pipeline_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    PipelineStarted {
        goal: String,
        total_nodes: usize,
    },
    PipelineCompleted {
        goal: String,
        completed_nodes: usize,
        total_nodes: usize,
        duration_ms: u64,
    },
    PipelineFailed {
        goal: String,
        reason: String,
    },
    StageStarted {
        node_id: String,
        node_label: String,
        stage_num: usize,
        total_nodes: usize,
    },
    StageCompleted {
        node_id: String,
        node_label: String,
        stage_num: usize,
        total_nodes: usize,
        status: StageStatus,
        duration_ms: u64,
    },
    StageRetrying {
        node_id: String,
        node_label: String,
        retry_count: u32,
        max_retries: u32,
    },
    EdgeSelected {
        from_node: String,
        to_node: String,
        edge_label: String,
    },
    HumanGate {
        node_id: String,
        node_label: String,
        choices: Vec<String>,
    },
    Error {
        node_id: String,
        message: String,
    },
}

impl EventKind {
    /// The serialized `kind` tag.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PipelineStarted { .. } => "pipeline_started",
            EventKind::PipelineCompleted { .. } => "pipeline_completed",
            EventKind::PipelineFailed { .. } => "pipeline_failed",
            EventKind::StageStarted { .. } => "stage_started",
            EventKind::StageCompleted { .. } => "stage_completed",
            EventKind::StageRetrying { .. } => "stage_retrying",
            EventKind::EdgeSelected { .. } => "edge_selected",
            EventKind::HumanGate { .. } => "human_gate",
            EventKind::Error { .. } => "error",
        }
    }
}

/// Receiver for pipeline events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: PipelineEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: PipelineEvent) {}
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Send to all current subscribers. With no receivers the event is dropped.
    pub fn send(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventSink for EventEmitter {
    async fn emit(&self, event: PipelineEvent) {
        self.send(event);
    }
}

/// Records events in memory, for tests and post-run inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The `kind` tag of every recorded event, in order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind.name()).collect()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn emit(&self, event: PipelineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
