//! 5-step edge selection algorithm.
//!
//! After a node completes, this module determines which outgoing edge to follow
//! based on a priority cascade: condition match, preferred label, suggested next
//! IDs, best unconditional edge, and finally best of any edge. "Best" means
//! highest weight, ties broken by the lexically smallest target id.

use trellis_dot::{Edge, Graph, Node};
use trellis_types::{Context, Outcome};

use crate::condition::evaluate_condition;
use crate::label::normalize_label;

/// Select the next edge to follow after a node completes.
/// Returns `None` only when the node has no outgoing edges.
pub fn select_edge<'g>(
    node: &Node,
    outcome: &Outcome,
    context: &Context,
    graph: &'g Graph,
) -> Option<&'g Edge> {
    let edges = graph.outgoing_edges(&node.id);
    if edges.is_empty() {
        return None;
    }

    // Step 1: Condition-matching edges
    let matched: Vec<&Edge> = edges
        .iter()
        .copied()
        .filter(|e| {
            let cond = e.condition();
            !cond.is_empty() && evaluate_condition(&cond, outcome, context)
        })
        .collect();
    if let Some(edge) = best_by_weight_then_lexical(&matched) {
        return Some(edge);
    }

    // Unconditional edges plus those whose condition holds
    let eligible: Vec<&Edge> = edges
        .iter()
        .copied()
        .filter(|e| {
            let cond = e.condition();
            cond.is_empty() || evaluate_condition(&cond, outcome, context)
        })
        .collect();

    // Step 2: Preferred label match, in edge order
    if !outcome.preferred_label.is_empty() {
        let preferred = normalize_label(&outcome.preferred_label);
        let hit = eligible.iter().copied().find(|e| {
            let label = e.label();
            !label.is_empty() && normalize_label(&label) == preferred
        });
        if hit.is_some() {
            return hit;
        }
    }

    // Step 3: Suggested next IDs, in suggestion order
    for suggested in &outcome.suggested_next_ids {
        if let Some(edge) = eligible.iter().copied().find(|e| &e.to == suggested) {
            return Some(edge);
        }
    }

    // Step 4: Best unconditional edge
    let unconditional: Vec<&Edge> = edges
        .iter()
        .copied()
        .filter(|e| e.condition().is_empty())
        .collect();
    if let Some(edge) = best_by_weight_then_lexical(&unconditional) {
        return Some(edge);
    }

    // Step 5: Last resort, any edge
    best_by_weight_then_lexical(&edges)
}

/// Pick the edge with the highest weight; break ties by lexicographically
/// smallest `to` field. `min_by` keeps the first of fully equal edges.
pub fn best_by_weight_then_lexical<'g>(edges: &[&'g Edge]) -> Option<&'g Edge> {
    edges
        .iter()
        .copied()
        .min_by(|a, b| b.weight().cmp(&a.weight()).then_with(|| a.to.cmp(&b.to)))
}
