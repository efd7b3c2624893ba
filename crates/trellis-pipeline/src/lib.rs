//! Pipeline execution engine, node handlers, validation, and edge selection.
//!
//! This crate runs parsed Trellis graphs: handler dispatch, edge selection,
//! retries and goal gates, checkpoints, lifecycle events and their text
//! rendering, and the lint rules that gate a run.

pub mod checkpoint;
pub mod condition;
pub mod edge_selection;
pub mod engine;
pub mod events;
pub mod format;
pub mod goal_gate;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod label;
pub mod retry;
pub mod runner;
pub mod validation;

pub use checkpoint::{load_checkpoint, save_checkpoint, Checkpoint, CHECKPOINT_FILE};
pub use condition::{evaluate_condition, parse_condition, Clause, ConditionExpr, Operator};
pub use edge_selection::select_edge;
pub use engine::{
    new_pipeline_id, PipelineConfig, PipelineExecutor, PipelineResult, PipelineStatus,
};
pub use events::{CollectingSink, EventEmitter, EventKind, EventSink, NullSink, PipelineEvent};
pub use format::{format_duration, format_event, should_emit, Verbosity};
pub use goal_gate::{check_goal_gates, resolve_retry_target, GoalGateResult};
pub use handler::{HandlerRegistry, NodeHandler};
pub use handlers::{build_node_prompt, parse_outcome, CodergenHandler, PromptRunner, ToolHandler};
pub use label::normalize_label;
pub use retry::{max_retries_for, BackoffPolicy};
pub use runner::{start_pipeline_run, MessageSender, MessageSink};
pub use validation::{
    validate, validate_or_raise, Diagnostic, LintRule, Severity, ValidationReport,
};
