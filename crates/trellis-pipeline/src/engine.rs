//! Pipeline execution engine: the core traversal loop.
//!
//! A run validates the graph, seeds a [`Context`], then walks one node at a
//! time from the start node until it reaches an exit node or fails. Handler
//! errors never escape [`PipelineExecutor::run`]; every terminal failure is
//! reported through [`PipelineResult::failure_reason`] and an event.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use trellis_dot::{Graph, Node};
use trellis_types::{Context, Outcome, StageStatus};

use crate::checkpoint::{save_checkpoint, Checkpoint};
use crate::edge_selection::select_edge;
use crate::events::{EventKind, EventSink, NullSink, PipelineEvent};
use crate::goal_gate::{check_goal_gates, resolve_retry_target};
use crate::graph::{find_start_node, node_label};
use crate::handler::{HandlerRegistry, CONDITIONAL_TYPE, EXIT_TYPE, START_TYPE, WAIT_HUMAN_TYPE};
use crate::retry::{max_retries_for, BackoffPolicy};
use crate::validation::validate;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// When set, a checkpoint is written here after every handler stage.
    pub checkpoint_dir: Option<PathBuf>,
    /// Loop guard against cycles that never reach an exit.
    pub max_iterations: usize,
    pub backoff: BackoffPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: None,
            max_iterations: 1000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    Failed,
}

/// The result of a pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub pipeline_id: String,
    pub status: PipelineStatus,
    pub completed_nodes: Vec<String>,
    pub failure_reason: Option<String>,
    pub node_outcomes: HashMap<String, StageStatus>,
    pub final_context: Context,
}

impl PipelineResult {
    pub fn is_completed(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    /// A failed result for a run that never started traversal.
    pub fn failed(pipeline_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            status: PipelineStatus::Failed,
            completed_nodes: Vec::new(),
            failure_reason: Some(reason.into()),
            node_outcomes: HashMap::new(),
            final_context: Context::new(),
        }
    }
}

/// `pipeline-<epoch millis>-<8 random hex chars>`.
pub fn new_pipeline_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("pipeline-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Mutable bookkeeping for one run. Owned by the traversal loop.
struct RunState {
    pipeline_id: String,
    goal: String,
    context: Context,
    completed_nodes: Vec<String>,
    node_retries: HashMap<String, u32>,
    node_outcomes: HashMap<String, StageStatus>,
    stage_num: usize,
    total_nodes: usize,
    started: Instant,
}

impl RunState {
    fn new(pipeline_id: String, graph: &Graph) -> Self {
        let goal = graph.string_attr("goal", "");
        let mut context = Context::new();
        context.set("graph.goal", goal.as_str());
        context.set("run_id", pipeline_id.as_str());
        for (key, value) in &graph.attributes {
            context.set(format!("graph.{key}"), value.to_string());
        }

        Self {
            pipeline_id,
            goal,
            context,
            completed_nodes: Vec::new(),
            node_retries: HashMap::new(),
            node_outcomes: HashMap::new(),
            stage_num: 0,
            total_nodes: graph.nodes.len(),
            started: Instant::now(),
        }
    }

    fn finish(self, status: PipelineStatus, failure_reason: Option<String>) -> PipelineResult {
        PipelineResult {
            pipeline_id: self.pipeline_id,
            status,
            completed_nodes: self.completed_nodes,
            failure_reason,
            node_outcomes: self.node_outcomes,
            final_context: self.context,
        }
    }
}

/// What the loop does after one node.
enum Step {
    Goto(String),
    Done {
        status: PipelineStatus,
        reason: Option<String>,
    },
}

impl Step {
    fn failed(reason: impl Into<String>) -> Self {
        Step::Done {
            status: PipelineStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

/// The core pipeline executor. Owns a handler registry and drives graph traversal.
pub struct PipelineExecutor {
    registry: HandlerRegistry,
    sink: Arc<dyn EventSink>,
    config: PipelineConfig,
}

impl PipelineExecutor {
    /// Create an executor with the given handler registry, no event sink, and
    /// the default configuration.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            sink: Arc::new(NullSink),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate and execute `graph` to completion or failure.
    pub async fn run(&self, graph: &Graph) -> PipelineResult {
        let pipeline_id = new_pipeline_id();

        let report = validate(graph);
        for warning in report.warnings() {
            tracing::warn!(pipeline = %pipeline_id, rule = %warning.rule, "{}", warning.message);
        }
        if !report.is_valid() {
            let reason = report.error_message();
            tracing::warn!(pipeline = %pipeline_id, %reason, "Pipeline validation failed");
            return PipelineResult::failed(pipeline_id, reason);
        }

        let mut state = RunState::new(pipeline_id, graph);

        let Some(start) = find_start_node(graph) else {
            self.emit_failed(&state, "No start node").await;
            return state.finish(PipelineStatus::Failed, Some("No start node".to_string()));
        };

        self.emit(
            &state,
            EventKind::PipelineStarted {
                goal: state.goal.clone(),
                total_nodes: state.total_nodes,
            },
        )
        .await;
        tracing::info!(pipeline = %state.pipeline_id, goal = %state.goal, nodes = state.total_nodes, "Pipeline started");

        let mut current = start.id.clone();
        let mut iterations = 0usize;
        loop {
            if iterations >= self.config.max_iterations {
                self.emit_failed(&state, "Max iterations exceeded (possible infinite loop)")
                    .await;
                return state.finish(
                    PipelineStatus::Failed,
                    Some("Max iterations exceeded".to_string()),
                );
            }
            iterations += 1;

            match self.step(graph, &mut state, &current).await {
                Step::Goto(next) => current = next,
                Step::Done { status, reason } => return state.finish(status, reason),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Per-node dispatch
    // -----------------------------------------------------------------------

    async fn step(&self, graph: &Graph, state: &mut RunState, node_id: &str) -> Step {
        let Some(node) = graph.node(node_id) else {
            let reason = format!("Node not found: {node_id}");
            self.emit_failed(state, &reason).await;
            return Step::failed(reason);
        };

        state.context.set("current_node", node_id);
        let handler_type = self.registry.resolve_type(node);
        tracing::debug!(pipeline = %state.pipeline_id, node = %node_id, handler = %handler_type, "Visiting node");

        match handler_type.as_str() {
            EXIT_TYPE => self.finish_at_exit(graph, state, node).await,
            START_TYPE | CONDITIONAL_TYPE => self.pass_through(graph, state, node).await,
            _ => self.execute_stage(graph, state, node, &handler_type).await,
        }
    }

    /// Exit node: enforce goal gates, then complete the run.
    async fn finish_at_exit(&self, graph: &Graph, state: &mut RunState, node: &Node) -> Step {
        let gates = check_goal_gates(graph, &state.completed_nodes, &state.node_outcomes);
        if !gates.all_satisfied {
            if let Some(target) = self.redirect_to_retry_target(graph, state, gates.first_failed()) {
                return Step::Goto(target);
            }
            let failed = gates.failed_node_ids.join(", ");
            self.emit_failed(state, &format!("Goal gate(s) failed: {failed}"))
                .await;
            return Step::failed(format!("Goal gate failed: {failed}"));
        }

        state.completed_nodes.push(node.id.clone());
        let duration_ms = state.started.elapsed().as_millis() as u64;
        self.emit(
            state,
            EventKind::PipelineCompleted {
                goal: state.goal.clone(),
                completed_nodes: state.completed_nodes.len(),
                total_nodes: state.total_nodes,
                duration_ms,
            },
        )
        .await;
        tracing::info!(pipeline = %state.pipeline_id, duration_ms, "Pipeline completed");
        Step::Done {
            status: PipelineStatus::Completed,
            reason: None,
        }
    }

    /// Start and conditional nodes do no work; they record success and route.
    async fn pass_through(&self, graph: &Graph, state: &mut RunState, node: &Node) -> Step {
        let outcome = Outcome::success();
        state.completed_nodes.push(node.id.clone());
        state.node_outcomes.insert(node.id.clone(), outcome.status);
        state.context.set("outcome", outcome.status.as_str());
        self.advance(graph, state, node, &outcome).await
    }

    async fn execute_stage(
        &self,
        graph: &Graph,
        state: &mut RunState,
        node: &Node,
        handler_type: &str,
    ) -> Step {
        let Some(handler) = self.registry.get(handler_type) else {
            let message = format!("No handler for type: {handler_type}");
            tracing::warn!(pipeline = %state.pipeline_id, node = %node.id, "{message}");
            self.emit(
                state,
                EventKind::Error {
                    node_id: node.id.clone(),
                    message: message.clone(),
                },
            )
            .await;
            return Step::failed(message);
        };

        let label = node_label(node);
        state.stage_num += 1;
        self.emit(
            state,
            EventKind::StageStarted {
                node_id: node.id.clone(),
                node_label: label.clone(),
                stage_num: state.stage_num,
                total_nodes: state.total_nodes,
            },
        )
        .await;

        if handler_type == WAIT_HUMAN_TYPE {
            let choices = graph
                .outgoing_edges(&node.id)
                .into_iter()
                .map(|e| {
                    let edge_label = e.label();
                    if edge_label.is_empty() {
                        e.to.clone()
                    } else {
                        edge_label
                    }
                })
                .collect();
            self.emit(
                state,
                EventKind::HumanGate {
                    node_id: node.id.clone(),
                    node_label: label.clone(),
                    choices,
                },
            )
            .await;
        }

        let stage_start = Instant::now();
        let outcome = match handler.execute(node, &mut state.context, graph).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(pipeline = %state.pipeline_id, node = %node.id, error = %e, "Handler failed");
                Outcome::fail(e.to_string())
            }
        };

        state.context.set("outcome", outcome.status.as_str());
        state
            .context
            .set("preferred_label", outcome.preferred_label.as_str());
        state.context.apply_updates(outcome.context_updates.clone());
        state.node_outcomes.insert(node.id.clone(), outcome.status);
        state.completed_nodes.push(node.id.clone());

        self.emit(
            state,
            EventKind::StageCompleted {
                node_id: node.id.clone(),
                node_label: label.clone(),
                stage_num: state.stage_num,
                total_nodes: state.total_nodes,
                status: outcome.status,
                duration_ms: stage_start.elapsed().as_millis() as u64,
            },
        )
        .await;

        self.persist_checkpoint(state, &node.id).await;

        if outcome.status.wants_retry() {
            let max_retries = max_retries_for(node, graph);
            let retry_count = state.node_retries.get(&node.id).copied().unwrap_or(0);
            if retry_count < max_retries {
                return self
                    .retry_in_place(state, node, &label, retry_count, max_retries)
                    .await;
            }
        }

        self.advance(graph, state, node, &outcome).await
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Take the selected outgoing edge, or fall back to a retry target when a
    /// failed node has nowhere to go.
    async fn advance(&self, graph: &Graph, state: &mut RunState, node: &Node, outcome: &Outcome) -> Step {
        if let Some(edge) = select_edge(node, outcome, &state.context, graph) {
            let edge_label = edge.label();
            if !edge_label.is_empty() {
                self.emit(
                    state,
                    EventKind::EdgeSelected {
                        from_node: node.id.clone(),
                        to_node: edge.to.clone(),
                        edge_label,
                    },
                )
                .await;
            }
            tracing::debug!(pipeline = %state.pipeline_id, from = %node.id, to = %edge.to, "Edge selected");
            return Step::Goto(edge.to.clone());
        }

        if outcome.status == StageStatus::Fail {
            if let Some(target) = self.redirect_to_retry_target(graph, state, Some(&node.id)) {
                return Step::Goto(target);
            }
        }

        self.emit_failed(
            state,
            &format!(
                "No outgoing edge from \"{}\" with outcome \"{}\"",
                node.id, outcome.status
            ),
        )
        .await;
        Step::failed(format!("Dead end at {}", node.id))
    }

    /// Retry the same node after a backoff delay, undoing its bookkeeping.
    async fn retry_in_place(
        &self,
        state: &mut RunState,
        node: &Node,
        label: &str,
        retry_count: u32,
        max_retries: u32,
    ) -> Step {
        let attempt = retry_count + 1;
        state.node_retries.insert(node.id.clone(), attempt);
        state
            .context
            .set(format!("internal.retry_count.{}", node.id), attempt);

        self.emit(
            state,
            EventKind::StageRetrying {
                node_id: node.id.clone(),
                node_label: label.to_string(),
                retry_count: attempt,
                max_retries,
            },
        )
        .await;

        let delay = self.config.backoff.delay_for_attempt(retry_count);
        tracing::warn!(
            pipeline = %state.pipeline_id,
            node = %node.id,
            attempt,
            max_retries,
            delay_ms = delay.as_millis() as u64,
            "Retrying stage"
        );
        tokio::time::sleep(delay).await;

        state.completed_nodes.pop();
        state.stage_num = state.stage_num.saturating_sub(1);
        Step::Goto(node.id.clone())
    }

    /// Jump to the retry target resolved from `from` (node, then graph level).
    fn redirect_to_retry_target(&self, graph: &Graph, state: &RunState, from: Option<&str>) -> Option<String> {
        let target = resolve_retry_target(from.and_then(|id| graph.node(id)), graph)?;
        tracing::info!(
            pipeline = %state.pipeline_id,
            from = from.unwrap_or_default(),
            target = %target,
            "Redirecting to retry target"
        );
        Some(target)
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    async fn emit(&self, state: &RunState, kind: EventKind) {
        self.sink
            .emit(PipelineEvent::new(state.pipeline_id.as_str(), kind))
            .await;
    }

    async fn emit_failed(&self, state: &RunState, reason: &str) {
        tracing::warn!(pipeline = %state.pipeline_id, %reason, "Pipeline failed");
        self.emit(
            state,
            EventKind::PipelineFailed {
                goal: state.goal.clone(),
                reason: reason.to_string(),
            },
        )
        .await;
    }

    /// Write a checkpoint if configured. Failures are logged, never fatal.
    async fn persist_checkpoint(&self, state: &RunState, node_id: &str) {
        let Some(dir) = &self.config.checkpoint_dir else {
            return;
        };
        let checkpoint = Checkpoint {
            pipeline_id: state.pipeline_id.clone(),
            timestamp: Utc::now(),
            current_node: node_id.to_string(),
            completed_nodes: state.completed_nodes.clone(),
            node_retries: state.node_retries.clone(),
            node_outcomes: state.node_outcomes.clone(),
            context_values: state.context.snapshot(),
            logs: state.context.logs().to_vec(),
        };
        if let Err(e) = save_checkpoint(dir, &checkpoint).await {
            tracing::warn!(pipeline = %state.pipeline_id, path = %dir.display(), error = %e, "Failed to save checkpoint");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use trellis_types::Result;

    use crate::events::CollectingSink;
    use crate::handler::NodeHandler;

    fn parse_graph(dot: &str) -> Graph {
        trellis_dot::parse(dot).unwrap()
    }

    /// Returns scripted statuses in order, then success forever.
    struct Scripted {
        statuses: Mutex<Vec<StageStatus>>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(statuses: &[StageStatus]) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let mut queue = statuses.to_vec();
            queue.reverse();
            (
                Self {
                    statuses: Mutex::new(queue),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl NodeHandler for Scripted {
        fn handler_type(&self) -> &str {
            "codergen"
        }

        async fn execute(&self, node: &Node, context: &mut Context, _graph: &Graph) -> Result<Outcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            context.append_log(format!("ran {}", node.id));
            let status = self.statuses.lock().unwrap().pop().unwrap_or(StageStatus::Success);
            Ok(Outcome::new(status))
        }
    }

    fn executor_with(handler: impl NodeHandler + 'static) -> (PipelineExecutor, Arc<CollectingSink>) {
        let mut registry = HandlerRegistry::new();
        registry.register(handler);
        let sink = Arc::new(CollectingSink::new());
        let executor = PipelineExecutor::new(registry)
            .with_sink(sink.clone())
            .with_config(PipelineConfig::default().with_backoff(BackoffPolicy::None));
        (executor, sink)
    }

    // Test 1: Linear pipeline (start -> A -> exit) completes successfully
    #[tokio::test]
    async fn linear_pipeline_completes() {
        let graph = parse_graph(
            r#"digraph G {
                goal = "Ship it"
                start [shape=Mdiamond]
                process [label="Process", prompt="Do work"]
                done [shape=Msquare]
                start -> process -> done
            }"#,
        );
        let (handler, calls) = Scripted::new(&[]);
        let (executor, sink) = executor_with(handler);
        let result = executor.run(&graph).await;

        assert!(result.is_completed());
        assert_eq!(result.completed_nodes, vec!["start", "process", "done"]);
        assert_eq!(result.failure_reason, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.node_outcomes["start"], StageStatus::Success);
        assert_eq!(result.node_outcomes["process"], StageStatus::Success);
        assert_eq!(
            sink.kinds(),
            vec!["pipeline_started", "stage_started", "stage_completed", "pipeline_completed"]
        );
    }

    // Test 2: Context is seeded from graph attributes and carries outcomes
    #[tokio::test]
    async fn context_seeded_and_updated() {
        let graph = parse_graph(
            r#"digraph G {
                goal = "Ship it"
                retries = 3
                start [shape=Mdiamond]
                work [label="Work"]
                done [shape=Msquare]
                start -> work -> done
            }"#,
        );
        let (handler, _) = Scripted::new(&[]);
        let (executor, _) = executor_with(handler);
        let result = executor.run(&graph).await;

        let ctx = &result.final_context;
        assert_eq!(ctx.get_string("graph.goal", ""), "Ship it");
        assert_eq!(ctx.get_string("graph.retries", ""), "3");
        assert_eq!(ctx.get_string("run_id", ""), result.pipeline_id);
        assert_eq!(ctx.get_string("outcome", ""), "success");
        assert_eq!(ctx.get_string("current_node", ""), "done");
        assert_eq!(ctx.logs(), &["ran work".to_string()]);
    }

    // Test 3: Invalid graph fails without events
    #[tokio::test]
    async fn validation_failure_emits_nothing() {
        let graph = parse_graph("digraph G { work [label=\"Work\"] }");
        let (handler, calls) = Scripted::new(&[]);
        let (executor, sink) = executor_with(handler);
        let result = executor.run(&graph).await;

        assert_eq!(result.status, PipelineStatus::Failed);
        let reason = result.failure_reason.unwrap();
        assert!(reason.contains("start node"), "got: {reason}");
        assert!(reason.contains("exit node"), "got: {reason}");
        assert!(result.completed_nodes.is_empty());
        assert!(sink.events().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // Test 4: Retry in place undoes bookkeeping and reuses the stage number
    #[tokio::test]
    async fn retry_in_place_reruns_node() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape=Mdiamond]
                work [label="Work", max_retries=2]
                done [shape=Msquare]
                start -> work -> done
            }"#,
        );
        let (handler, calls) = Scripted::new(&[StageStatus::Fail, StageStatus::Retry]);
        let (executor, sink) = executor_with(handler);
        let result = executor.run(&graph).await;

        assert!(result.is_completed());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.completed_nodes, vec!["start", "work", "done"]);
        assert_eq!(result.final_context.get_string("internal.retry_count.work", ""), "2");

        let retries: Vec<u32> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::StageRetrying { retry_count, max_retries, .. } => {
                    assert_eq!(max_retries, 2);
                    Some(retry_count)
                }
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![1, 2]);

        let stage_nums: Vec<usize> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::StageStarted { stage_num, .. } => Some(stage_num),
                _ => None,
            })
            .collect();
        assert_eq!(stage_nums, vec![1, 1, 1]);
    }

    // Test 5: Exhausted retries on a node with no outgoing edge is a dead end
    #[tokio::test]
    async fn dead_end_after_retries() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape=Mdiamond]
                work [label="Work", max_retries=1]
                done [shape=Msquare]
                start -> work [weight=2]
                start -> done
            }"#,
        );
        let (handler, calls) = Scripted::new(&[StageStatus::Fail, StageStatus::Fail]);
        let (executor, sink) = executor_with(handler);
        let result = executor.run(&graph).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(result.failure_reason.as_deref(), Some("Dead end at work"));
        match sink.events().pop().unwrap().kind {
            EventKind::PipelineFailed { reason, .. } => {
                assert_eq!(reason, "No outgoing edge from \"work\" with outcome \"fail\"")
            }
            other => panic!("expected pipeline_failed, got {other:?}"),
        }
    }

    // Test 5b: A failed dead end jumps to the node's retry target instead
    #[tokio::test]
    async fn failed_dead_end_redirects_to_retry_target() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape=Mdiamond]
                work [label="Work", retry_target="start"]
                done [shape=Msquare]
                start -> work [condition="outcome=success"]
                start -> done [condition="outcome=fail"]
            }"#,
        );
        let (handler, calls) = Scripted::new(&[StageStatus::Fail, StageStatus::Fail]);
        let (executor, _) = executor_with(handler);
        let result = executor.run(&graph).await;

        // Two failures jump back to start; the success after that has no edge.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            result.completed_nodes,
            vec!["start", "work", "start", "work", "start", "work"]
        );
        assert_eq!(result.failure_reason.as_deref(), Some("Dead end at work"));
    }

    // Test 6: Goal gate redirects to its retry target, then succeeds
    #[tokio::test]
    async fn goal_gate_redirects_to_retry_target() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape=Mdiamond]
                review [label="Review", goal_gate=true, retry_target="review"]
                done [shape=Msquare]
                start -> review -> done
            }"#,
        );
        let (handler, calls) = Scripted::new(&[StageStatus::Fail]);
        let (executor, _) = executor_with(handler);
        let result = executor.run(&graph).await;

        assert!(result.is_completed());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.node_outcomes["review"], StageStatus::Success);
    }

    // Test 7: Goal gate failure without a retry target fails the run
    #[tokio::test]
    async fn goal_gate_failure_without_retry_target() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape=Mdiamond]
                review [label="Review", goal_gate=true]
                done [shape=Msquare]
                start -> review -> done
            }"#,
        );
        let (handler, _) = Scripted::new(&[StageStatus::Fail]);
        let (executor, sink) = executor_with(handler);
        let result = executor.run(&graph).await;

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(result.failure_reason.as_deref(), Some("Goal gate failed: review"));
        let last = sink.events().pop().unwrap();
        assert_eq!(
            last.kind,
            EventKind::PipelineFailed {
                goal: String::new(),
                reason: "Goal gate(s) failed: review".into(),
            }
        );
    }

    // Test 8: Missing handler emits an error event and stops
    #[tokio::test]
    async fn missing_handler_fails() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape=Mdiamond]
                deploy [label="Deploy", type="deploy"]
                done [shape=Msquare]
                start -> deploy -> done
            }"#,
        );
        let (handler, _) = Scripted::new(&[]);
        let (executor, sink) = executor_with(handler);
        let result = executor.run(&graph).await;

        assert_eq!(result.failure_reason.as_deref(), Some("No handler for type: deploy"));
        assert_eq!(result.completed_nodes, vec!["start"]);
        assert_eq!(sink.kinds(), vec!["pipeline_started", "error"]);
    }

    // Test 9: Iteration cap stops an endless loop
    #[tokio::test]
    async fn iteration_cap_stops_cycles() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape=Mdiamond]
                a [label="A"]
                b [label="B"]
                done [shape=Msquare]
                start -> a -> b
                b -> a [weight=5]
                b -> done [condition="outcome=fail"]
            }"#,
        );
        let (handler, _) = Scripted::new(&[]);
        let mut registry = HandlerRegistry::new();
        registry.register(handler);
        let sink = Arc::new(CollectingSink::new());
        let executor = PipelineExecutor::new(registry)
            .with_sink(sink.clone())
            .with_config(PipelineConfig::default().with_max_iterations(10));
        let result = executor.run(&graph).await;

        assert_eq!(result.failure_reason.as_deref(), Some("Max iterations exceeded"));
        match sink.events().pop().unwrap().kind {
            EventKind::PipelineFailed { reason, .. } => {
                assert_eq!(reason, "Max iterations exceeded (possible infinite loop)")
            }
            other => panic!("expected pipeline_failed, got {other:?}"),
        }
    }

    // Test 10: Handler errors become failed outcomes
    #[tokio::test]
    async fn handler_error_becomes_fail_outcome() {
        struct Broken;

        #[async_trait]
        impl NodeHandler for Broken {
            fn handler_type(&self) -> &str {
                "codergen"
            }
            async fn execute(&self, node: &Node, _ctx: &mut Context, _graph: &Graph) -> Result<Outcome> {
                Err(trellis_types::TrellisError::Handler {
                    handler: "codergen".into(),
                    node: node.id.clone(),
                    message: "boom".into(),
                })
            }
        }

        let graph = parse_graph(
            r#"digraph G {
                start [shape=Mdiamond]
                work [label="Work"]
                recover [label="Recover"]
                done [shape=Msquare]
                start -> work
                work -> done [condition="outcome=success"]
                work -> recover [condition="outcome=fail"]
                recover -> done
            }"#,
        );
        let (executor, _) = executor_with(Broken);
        let result = executor.run(&graph).await;

        assert_eq!(result.node_outcomes["work"], StageStatus::Fail);
        // recover also dispatches to Broken and fails; its only edge still leads on.
        assert!(result.completed_nodes.contains(&"recover".to_string()));
        assert!(result.is_completed());
    }

    #[test]
    fn pipeline_id_format() {
        let id = new_pipeline_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "pipeline");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert_ne!(new_pipeline_id(), id);
    }

    #[test]
    fn config_defaults_and_builders() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_iterations, 1000);
        assert_eq!(config.checkpoint_dir, None);
        assert_eq!(config.backoff, BackoffPolicy::default());

        let config = config
            .with_checkpoint_dir("/tmp/cp")
            .with_max_iterations(5)
            .with_backoff(BackoffPolicy::None);
        assert_eq!(config.checkpoint_dir, Some(PathBuf::from("/tmp/cp")));
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.backoff, BackoffPolicy::None);
    }
}
