//! ToolHandler: asks the prompt runner to execute a node's `tool_command`
//! (parallelogram shape).

use std::sync::Arc;

use async_trait::async_trait;
use trellis_dot::{Graph, Node};
use trellis_types::{Context, Outcome, Result};

use super::{parse_outcome, PromptRunner};
use crate::handler::NodeHandler;

pub struct ToolHandler {
    runner: Arc<dyn PromptRunner>,
}

impl ToolHandler {
    pub fn new(runner: Arc<dyn PromptRunner>) -> Self {
        Self { runner }
    }
}

pub fn build_tool_prompt(command: &str) -> String {
    format!(
        "Run this command and report the result:\n```\n{command}\n```\nReport the outcome with [outcome:success] or [outcome:fail]."
    )
}

#[async_trait]
impl NodeHandler for ToolHandler {
    fn handler_type(&self) -> &str {
        "tool"
    }

    async fn execute(&self, node: &Node, _context: &mut Context, _graph: &Graph) -> Result<Outcome> {
        let command = node.string_attr("tool_command", "");
        if command.is_empty() {
            tracing::warn!(node = %node.id, "Tool node has no tool_command");
            return Ok(Outcome::fail("No tool_command attribute"));
        }

        tracing::info!(node = %node.id, command = %command, "Executing tool command");
        let response = self
            .runner
            .run_prompt(&build_tool_prompt(&command), node)
            .await?;
        Ok(parse_outcome(&response).with_notes(response))
    }
}
