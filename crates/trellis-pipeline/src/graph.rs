//! Shape conventions shared by the validator and the executor.

use trellis_dot::{Graph, Node};

pub const START_SHAPE: &str = "Mdiamond";
pub const EXIT_SHAPE: &str = "Msquare";

pub fn node_shape(node: &Node) -> String {
    node.string_attr("shape", "")
}

pub fn is_start_node(node: &Node) -> bool {
    node_shape(node) == START_SHAPE
}

pub fn is_exit_node(node: &Node) -> bool {
    node_shape(node) == EXIT_SHAPE
}

/// Human-readable name: the `label` attribute, or the id.
pub fn node_label(node: &Node) -> String {
    let label = node.string_attr("label", "");
    if label.is_empty() {
        node.id.clone()
    } else {
        label
    }
}

/// Nodes with `box` shape or no shape at all dispatch to the codergen handler.
pub fn is_codergen_shaped(node: &Node) -> bool {
    matches!(node_shape(node).as_str(), "" | "box")
}

/// All start-shaped nodes, in id order.
pub fn start_nodes(graph: &Graph) -> Vec<&Node> {
    graph
        .sorted_node_ids()
        .into_iter()
        .filter_map(|id| graph.node(id))
        .filter(|n| is_start_node(n))
        .collect()
}

pub fn find_start_node(graph: &Graph) -> Option<&Node> {
    start_nodes(graph).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_and_labels() {
        let graph = trellis_dot::parse(
            r#"digraph G {
                s [shape=Mdiamond]
                e [shape=Msquare]
                w [label="Write code"]
                t [shape=parallelogram]
            }"#,
        )
        .unwrap();
        assert!(is_start_node(graph.node("s").unwrap()));
        assert!(is_exit_node(graph.node("e").unwrap()));
        assert_eq!(node_label(graph.node("w").unwrap()), "Write code");
        assert_eq!(node_label(graph.node("t").unwrap()), "t");
        assert!(is_codergen_shaped(graph.node("w").unwrap()));
        assert!(!is_codergen_shaped(graph.node("t").unwrap()));
        assert_eq!(find_start_node(&graph).map(|n| n.id.as_str()), Some("s"));
    }

    #[test]
    fn start_lookup_is_deterministic() {
        let graph =
            trellis_dot::parse("digraph G { b [shape=Mdiamond] a [shape=Mdiamond] }").unwrap();
        let ids: Vec<_> = start_nodes(&graph).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(find_start_node(&graph).unwrap().id, "a");
    }
}
