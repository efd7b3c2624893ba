//! Node handler trait and the registry that maps handler types to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use trellis_dot::{Graph, Node};
use trellis_types::{Context, Outcome, Result};

use crate::graph::node_shape;

// ---------------------------------------------------------------------------
// NodeHandler trait
// ---------------------------------------------------------------------------

/// Work performed for one node. Handlers may update `context` directly or
/// return `context_updates` on the outcome; an `Err` is turned into a failed
/// outcome by the executor.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The handler type identifier (e.g. "codergen", "tool").
    fn handler_type(&self) -> &str;

    async fn execute(&self, node: &Node, context: &mut Context, graph: &Graph) -> Result<Outcome>;
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

pub const START_TYPE: &str = "start";
pub const EXIT_TYPE: &str = "exit";
pub const CONDITIONAL_TYPE: &str = "conditional";
pub const WAIT_HUMAN_TYPE: &str = "wait.human";
pub const DEFAULT_TYPE: &str = "codergen";

pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
    shape_to_type: HashMap<&'static str, &'static str>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        // `parallel` and `fan_in` are names only; nothing fans out.
        let shape_to_type = HashMap::from([
            ("Mdiamond", START_TYPE),
            ("Msquare", EXIT_TYPE),
            ("box", DEFAULT_TYPE),
            ("hexagon", WAIT_HUMAN_TYPE),
            ("diamond", CONDITIONAL_TYPE),
            ("parallelogram", "tool"),
            ("component", "parallel"),
            ("tripleoctagon", "fan_in"),
        ]);

        Self {
            handlers: HashMap::new(),
            shape_to_type,
        }
    }

    /// Register under the handler's own [`NodeHandler::handler_type`].
    pub fn register(&mut self, handler: impl NodeHandler + 'static) {
        let t = handler.handler_type().to_string();
        self.handlers.insert(t, Arc::new(handler));
    }

    /// Register a shared handler under an explicit type name.
    pub fn register_as(&mut self, handler_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler_type.into(), handler);
    }

    /// Resolve a node to its handler type using 3-step priority:
    /// 1. Explicit `type` attribute on the node
    /// 2. Shape-based mapping
    /// 3. Default: `"codergen"`
    pub fn resolve_type(&self, node: &Node) -> String {
        let explicit = node.string_attr("type", "");
        if !explicit.is_empty() {
            return explicit;
        }
        self.shape_to_type
            .get(node_shape(node).as_str())
            .copied()
            .unwrap_or(DEFAULT_TYPE)
            .to_string()
    }

    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(handler_type).cloned()
    }

    pub fn has(&self, handler_type: &str) -> bool {
        self.handlers.contains_key(handler_type)
    }

    /// Registered handler types, sorted.
    pub fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
