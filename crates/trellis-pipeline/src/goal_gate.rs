use std::collections::HashMap;

use trellis_dot::{Graph, Node};
use trellis_types::StageStatus;

/// Result of checking all goal gate nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalGateResult {
    pub all_satisfied: bool,
    /// Unsatisfied gates, in completion order.
    pub failed_node_ids: Vec<String>,
}

impl GoalGateResult {
    pub fn first_failed(&self) -> Option<&str> {
        self.failed_node_ids.first().map(String::as_str)
    }
}

/// Check whether every completed node flagged `goal_gate=true` recorded a
/// success. Only completed nodes are checked.
pub fn check_goal_gates(
    graph: &Graph,
    completed_nodes: &[String],
    node_outcomes: &HashMap<String, StageStatus>,
) -> GoalGateResult {
    let mut failed_node_ids: Vec<String> = Vec::new();
    for node_id in completed_nodes {
        let Some(node) = graph.node(node_id) else {
            continue;
        };
        if !node.boolean_attr("goal_gate", false) || failed_node_ids.contains(node_id) {
            continue;
        }
        if node_outcomes.get(node_id) != Some(&StageStatus::Success) {
            failed_node_ids.push(node_id.clone());
        }
    }
    GoalGateResult {
        all_satisfied: failed_node_ids.is_empty(),
        failed_node_ids,
    }
}

/// Resolve the retry target using 4-level fallback:
/// 1. Node `retry_target`
/// 2. Node `fallback_retry_target`
/// 3. Graph `retry_target` attribute
/// 4. Graph `fallback_retry_target` attribute
///
/// A candidate is skipped unless it names a node in the graph.
pub fn resolve_retry_target(node: Option<&Node>, graph: &Graph) -> Option<String> {
    let node_candidates = node
        .map(|n| {
            vec![
                n.string_attr("retry_target", ""),
                n.string_attr("fallback_retry_target", ""),
            ]
        })
        .unwrap_or_default();
    node_candidates
        .into_iter()
        .chain([
            graph.string_attr("retry_target", ""),
            graph.string_attr("fallback_retry_target", ""),
        ])
        .find(|target| !target.is_empty() && graph.nodes.contains_key(target))
}
