//! Pipeline validation: lint rules and diagnostics.
//!
//! Structural rules produce `Error` diagnostics that block a run; advisory
//! rules produce `Warning`s. Call [`validate`] for the full report or
//! [`validate_or_raise`] to fail when any error is present.

use std::collections::{HashSet, VecDeque};

use trellis_dot::Graph;
use trellis_types::{Result, TrellisError};

use crate::goal_gate::resolve_retry_target;
use crate::graph::{is_codergen_shaped, is_exit_node, start_nodes};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub edge: Option<(String, String)>,
    pub fix: Option<String>,
}

impl Diagnostic {
    fn error(rule: &str, message: String) -> Self {
        Self {
            rule: rule.into(),
            severity: Severity::Error,
            message,
            node_id: None,
            edge: None,
            fix: None,
        }
    }

    fn warning(rule: &str, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(rule, message)
        }
    }

    fn at_node(mut self, id: &str) -> Self {
        self.node_id = Some(id.to_string());
        self
    }

    fn at_edge(mut self, from: &str, to: &str) -> Self {
        self.edge = Some((from.to_string(), to.to_string()));
        self
    }

    fn with_fix(mut self, fix: &str) -> Self {
        self.fix = Some(fix.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// All diagnostics from one validation pass, in rule order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.errors().is_empty()
    }

    /// Error messages joined with `"; "`.
    pub fn error_message(&self) -> String {
        self.errors()
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct StartNodeRule;
impl LintRule for StartNodeRule {
    fn name(&self) -> &str { "start_node" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let starts = start_nodes(graph);
        match starts.len() {
            0 => vec![Diagnostic::error(
                self.name(),
                "Graph must have exactly one start node (shape=Mdiamond)".into(),
            )
            .with_fix("Add a node with shape=Mdiamond")],
            1 => vec![],
            n => vec![Diagnostic::error(
                self.name(),
                format!(
                    "Graph has {n} start nodes, expected exactly one: {}",
                    starts.iter().map(|s| s.id.as_str()).collect::<Vec<_>>().join(", ")
                ),
            )
            .with_fix("Remove extra start nodes so only one remains")],
        }
    }
}

struct ExitNodeRule;
impl LintRule for ExitNodeRule {
    fn name(&self) -> &str { "exit_node" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        if graph.nodes.values().any(is_exit_node) {
            return vec![];
        }
        vec![Diagnostic::error(
            self.name(),
            "Graph must have at least one exit node (shape=Msquare)".into(),
        )
        .with_fix("Add a node with shape=Msquare")]
    }
}

struct StartNoIncomingRule;
impl LintRule for StartNoIncomingRule {
    fn name(&self) -> &str { "start_no_incoming" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        start_nodes(graph)
            .into_iter()
            .filter(|n| !graph.incoming_edges(&n.id).is_empty())
            .map(|n| {
                Diagnostic::error(
                    self.name(),
                    format!("Start node \"{}\" must not have incoming edges", n.id),
                )
                .at_node(&n.id)
            })
            .collect()
    }
}

struct ExitNoOutgoingRule;
impl LintRule for ExitNoOutgoingRule {
    fn name(&self) -> &str { "exit_no_outgoing" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        graph
            .sorted_node_ids()
            .into_iter()
            .filter_map(|id| graph.node(id))
            .filter(|n| is_exit_node(n) && !graph.outgoing_edges(&n.id).is_empty())
            .map(|n| {
                Diagnostic::error(
                    self.name(),
                    format!("Exit node \"{}\" must not have outgoing edges", n.id),
                )
                .at_node(&n.id)
            })
            .collect()
    }
}

struct EdgeEndpointsExistRule;
impl LintRule for EdgeEndpointsExistRule {
    fn name(&self) -> &str { "edge_endpoints_exist" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for edge in &graph.edges {
            if !graph.nodes.contains_key(&edge.from) {
                diags.push(
                    Diagnostic::error(
                        self.name(),
                        format!("Edge references unknown source node: \"{}\"", edge.from),
                    )
                    .at_edge(&edge.from, &edge.to),
                );
            }
            if !graph.nodes.contains_key(&edge.to) {
                diags.push(
                    Diagnostic::error(
                        self.name(),
                        format!("Edge references unknown target node: \"{}\"", edge.to),
                    )
                    .at_edge(&edge.from, &edge.to),
                );
            }
        }
        diags
    }
}

/// Breadth-first from the unique start node. Skipped when the start node is
/// missing or ambiguous; [`StartNodeRule`] reports that.
struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str { "reachability" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let starts = start_nodes(graph);
        let [start] = starts.as_slice() else {
            return vec![];
        };

        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start.id.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            for edge in graph.outgoing_edges(id) {
                queue.push_back(edge.to.as_str());
            }
        }

        graph
            .sorted_node_ids()
            .into_iter()
            .filter(|id| !reachable.contains(id))
            .map(|id| {
                Diagnostic::error(self.name(), format!("Node \"{id}\" is not reachable from start"))
                    .at_node(id)
                    .with_fix("Add an edge leading to this node, or remove it")
            })
            .collect()
    }
}

struct PromptOnCodergenRule;
impl LintRule for PromptOnCodergenRule {
    fn name(&self) -> &str { "prompt_on_codergen" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        graph
            .sorted_node_ids()
            .into_iter()
            .filter_map(|id| graph.node(id))
            .filter(|n| {
                is_codergen_shaped(n)
                    && n.string_attr("prompt", "").is_empty()
                    && n.string_attr("label", "").is_empty()
            })
            .map(|n| {
                Diagnostic::warning(
                    self.name(),
                    format!("Codergen node \"{}\" has no prompt or label", n.id),
                )
                .at_node(&n.id)
                .with_fix("Add a prompt=\"...\" attribute")
            })
            .collect()
    }
}

struct GoalGateHasRetryRule;
impl LintRule for GoalGateHasRetryRule {
    fn name(&self) -> &str { "goal_gate_has_retry" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        graph
            .sorted_node_ids()
            .into_iter()
            .filter_map(|id| graph.node(id))
            .filter(|n| {
                n.boolean_attr("goal_gate", false) && resolve_retry_target(Some(n), graph).is_none()
            })
            .map(|n| {
                Diagnostic::warning(
                    self.name(),
                    format!("Goal gate node \"{}\" has no retry_target", n.id),
                )
                .at_node(&n.id)
                .with_fix("Set retry_target on the node or the graph")
            })
            .collect()
    }
}

struct RetryTargetExistsRule;
impl LintRule for RetryTargetExistsRule {
    fn name(&self) -> &str { "retry_target_exists" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for id in graph.sorted_node_ids() {
            let Some(node) = graph.node(id) else { continue };
            for key in ["retry_target", "fallback_retry_target"] {
                let target = node.string_attr(key, "");
                if !target.is_empty() && !graph.nodes.contains_key(&target) {
                    diags.push(
                        Diagnostic::warning(
                            self.name(),
                            format!("Node \"{id}\" has {key} \"{target}\" which does not exist"),
                        )
                        .at_node(id),
                    );
                }
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(graph: &Graph) -> ValidationReport {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(StartNodeRule),
        Box::new(ExitNodeRule),
        Box::new(StartNoIncomingRule),
        Box::new(ExitNoOutgoingRule),
        Box::new(EdgeEndpointsExistRule),
        Box::new(ReachabilityRule),
        Box::new(PromptOnCodergenRule),
        Box::new(GoalGateHasRetryRule),
        Box::new(RetryTargetExistsRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(graph));
    }
    ValidationReport { diagnostics }
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(graph: &Graph) -> Result<ValidationReport> {
    let report = validate(graph);
    if !report.is_valid() {
        return Err(TrellisError::Validation(report.error_message()));
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
