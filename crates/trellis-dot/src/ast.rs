use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::attrs;

pub type Attributes = HashMap<String, AttributeValue>;

/// A compiled workflow graph. Edges refer to nodes by id; look them up
/// through [`Graph::node`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    pub attributes: Attributes,
    pub nodes: HashMap<String, Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Edges leaving `id`, in source order.
    pub fn outgoing_edges(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == id).collect()
    }

    pub fn incoming_edges(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.to == id).collect()
    }

    /// Node ids in lexical order, for deterministic iteration over the map.
    pub fn sorted_node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn string_attr(&self, key: &str, default: &str) -> String {
        attrs::get_string_attr(&self.attributes, key, default)
    }

    pub fn integer_attr(&self, key: &str, default: i64) -> i64 {
        attrs::get_integer_attr(&self.attributes, key, default)
    }

    pub fn boolean_attr(&self, key: &str, default: bool) -> bool {
        attrs::get_boolean_attr(&self.attributes, key, default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub attributes: Attributes,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn string_attr(&self, key: &str, default: &str) -> String {
        attrs::get_string_attr(&self.attributes, key, default)
    }

    pub fn integer_attr(&self, key: &str, default: i64) -> i64 {
        attrs::get_integer_attr(&self.attributes, key, default)
    }

    pub fn boolean_attr(&self, key: &str, default: bool) -> bool {
        attrs::get_boolean_attr(&self.attributes, key, default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub attributes: Attributes,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn string_attr(&self, key: &str, default: &str) -> String {
        attrs::get_string_attr(&self.attributes, key, default)
    }

    pub fn integer_attr(&self, key: &str, default: i64) -> i64 {
        attrs::get_integer_attr(&self.attributes, key, default)
    }

    pub fn boolean_attr(&self, key: &str, default: bool) -> bool {
        attrs::get_boolean_attr(&self.attributes, key, default)
    }

    /// The `condition` attribute, empty when the edge is unconditional.
    pub fn condition(&self) -> String {
        self.string_attr("condition", "")
    }

    pub fn label(&self) -> String {
        self.string_attr("label", "")
    }

    pub fn weight(&self) -> i64 {
        self.integer_attr("weight", 0)
    }
}

/// A typed attribute value. Durations are stored in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    #[serde(with = "crate::duration_serde")]
    Duration(i64),
}

impl AttributeValue {
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "string",
            AttributeValue::Integer(_) => "integer",
            AttributeValue::Float(_) => "float",
            AttributeValue::Boolean(_) => "boolean",
            AttributeValue::Duration(_) => "duration",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Canonical text form, used when seeding `graph.<key>` context entries.
impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Integer(n) => write!(f, "{n}"),
            AttributeValue::Float(x) => write!(f, "{x}"),
            AttributeValue::Boolean(b) => write!(f, "{b}"),
            AttributeValue::Duration(ms) => write!(f, "{ms}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::Integer(n)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Graph {
        let mut graph = Graph {
            name: "G".into(),
            ..Default::default()
        };
        for id in ["b", "a", "c"] {
            graph.nodes.insert(id.into(), Node::new(id));
        }
        graph.edges.push(Edge::new("a", "b"));
        graph.edges.push(Edge::new("a", "c"));
        graph.edges.push(Edge::new("b", "c"));
        graph
    }

    #[test]
    fn edge_queries_keep_source_order() {
        let graph = sample();
        let out: Vec<_> = graph.outgoing_edges("a").iter().map(|e| e.to.as_str()).collect();
        assert_eq!(out, vec!["b", "c"]);
        let inc: Vec<_> = graph.incoming_edges("c").iter().map(|e| e.from.as_str()).collect();
        assert_eq!(inc, vec!["a", "b"]);
        assert!(graph.outgoing_edges("c").is_empty());
    }

    #[test]
    fn sorted_ids() {
        assert_eq!(sample().sorted_node_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(AttributeValue::from("x").to_string(), "x");
        assert_eq!(AttributeValue::Integer(-3).to_string(), "-3");
        assert_eq!(AttributeValue::Float(1.5).to_string(), "1.5");
        assert_eq!(AttributeValue::Boolean(true).to_string(), "true");
        assert_eq!(AttributeValue::Duration(900_000).to_string(), "900000");
    }

    #[test]
    fn duration_serializes_with_unit() {
        let json = serde_json::to_string(&AttributeValue::Duration(250)).unwrap();
        assert_eq!(json, r#"{"Duration":"250ms"}"#);
        let back: AttributeValue = serde_json::from_str(r#"{"Duration":"15m"}"#).unwrap();
        assert_eq!(back, AttributeValue::Duration(900_000));
    }

    #[test]
    fn edge_convenience_accessors() {
        let mut edge = Edge::new("a", "b");
        assert_eq!(edge.condition(), "");
        assert_eq!(edge.weight(), 0);
        edge.attributes.insert("weight".into(), AttributeValue::Float(2.9));
        edge.attributes.insert("label".into(), "Yes".into());
        assert_eq!(edge.weight(), 2);
        assert_eq!(edge.label(), "Yes");
    }
}
