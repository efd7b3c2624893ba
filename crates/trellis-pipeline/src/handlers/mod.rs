//! Prompt-driven node handlers.
//!
//! Both built-in handlers turn a node into a text prompt, hand it to a
//! host-supplied [`PromptRunner`], and read the two tagged markers back out of
//! the response. Nothing else in the response is interpreted.

pub mod tool_handler;

pub use tool_handler::ToolHandler;

use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use trellis_dot::{Graph, Node};
use trellis_types::{Context, Outcome, Result, StageStatus};

use crate::graph::node_label;
use crate::handler::NodeHandler;

static OUTCOME_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[outcome:(success|fail|partial_success|retry|skipped)\]")
        .expect("outcome marker pattern is valid")
});

static LABEL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[preferred_label:([^\]]+)\]").expect("label marker pattern is valid")
});

/// Executes a prompt on behalf of a node and returns the free-text response.
#[async_trait]
pub trait PromptRunner: Send + Sync {
    async fn run_prompt(&self, prompt: &str, node: &Node) -> Result<String>;
}

/// Build the prompt sent for a node: a task header, the goal, the task text
/// with `$goal` expanded, and the marker instructions.
pub fn build_node_prompt(node: &Node, context: &Context) -> String {
    let label = node_label(node);
    let goal = context.get_string("graph.goal", "");
    let prompt = node.string_attr("prompt", "");

    let text = if prompt.is_empty() {
        format!("Complete this task: {label}")
    } else {
        prompt
    };
    let text = text.replace("$goal", &goal);

    let mut parts = vec![format!("## Pipeline Task: {label}\n")];
    if !goal.is_empty() {
        parts.push(format!("**Goal:** {goal}\n"));
    }
    parts.push(text);
    parts.push("\n---".to_string());
    parts.push(
        "When done, end your response with `[outcome:success]` if the task succeeded or `[outcome:fail]` if it failed."
            .to_string(),
    );
    parts.push("If you recommend a specific next step, add `[preferred_label:YourChoice]`.".to_string());
    parts.join("\n")
}

/// Read `[outcome:...]` (default success) and `[preferred_label:...]` from a
/// response. The first occurrence of each wins.
pub fn parse_outcome(response: &str) -> Outcome {
    let status = OUTCOME_MARKER
        .captures(response)
        .and_then(|c| c.get(1))
        .and_then(|m| StageStatus::from_str(m.as_str()).ok())
        .unwrap_or(StageStatus::Success);
    let label = LABEL_MARKER
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    Outcome::with_label(status, label)
}

// ---------------------------------------------------------------------------
// CodergenHandler: prompt task handler (box shape, and the default type)
// ---------------------------------------------------------------------------

pub struct CodergenHandler {
    runner: Arc<dyn PromptRunner>,
}

impl CodergenHandler {
    pub fn new(runner: Arc<dyn PromptRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl NodeHandler for CodergenHandler {
    fn handler_type(&self) -> &str {
        "codergen"
    }

    async fn execute(&self, node: &Node, context: &mut Context, _graph: &Graph) -> Result<Outcome> {
        let prompt = build_node_prompt(node, context);
        tracing::info!(node = %node.id, prompt_len = prompt.len(), "Executing codergen handler");
        let response = self.runner.run_prompt(&prompt, node).await?;
        let outcome = parse_outcome(&response).with_notes(response);
        tracing::debug!(node = %node.id, status = %outcome.status, "Codergen handler finished");
        Ok(outcome)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Replays canned responses and records every prompt it was given.
    pub struct ScriptedRunner {
        responses: Mutex<Vec<String>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PromptRunner for ScriptedRunner {
        async fn run_prompt(&self, prompt: &str, _node: &Node) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| "[outcome:success]".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedRunner;
    use super::*;
    use trellis_types::TrellisError;

    fn graph() -> Graph {
        trellis_dot::parse(
            r#"digraph G {
            write [label="Write Code", prompt="Implement: $goal (really, $goal)"]
            bare
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn prompt_with_goal_and_expansion() {
        let g = graph();
        let mut ctx = Context::new();
        ctx.set("graph.goal", "a parser");
        let prompt = build_node_prompt(g.node("write").unwrap(), &ctx);
        let expected = [
            "## Pipeline Task: Write Code\n",
            "**Goal:** a parser\n",
            "Implement: a parser (really, a parser)",
            "\n---",
            "When done, end your response with `[outcome:success]` if the task succeeded or `[outcome:fail]` if it failed.",
            "If you recommend a specific next step, add `[preferred_label:YourChoice]`.",
        ]
        .join("\n");
        assert_eq!(prompt, expected);
    }

    #[test]
    fn prompt_without_goal_or_prompt_attr() {
        let g = graph();
        let prompt = build_node_prompt(g.node("bare").unwrap(), &Context::new());
        assert!(prompt.starts_with("## Pipeline Task: bare\n\nComplete this task: bare\n"));
        assert!(!prompt.contains("**Goal:**"));
    }

    #[test]
    fn parse_outcome_markers() {
        let o = parse_outcome("All good.\n[outcome:fail]\n[preferred_label:Fix Tests]");
        assert_eq!(o.status, StageStatus::Fail);
        assert_eq!(o.preferred_label, "Fix Tests");

        let o = parse_outcome("no markers here");
        assert_eq!(o.status, StageStatus::Success);
        assert_eq!(o.preferred_label, "");

        let o = parse_outcome("[outcome:partial_success] then [outcome:fail]");
        assert_eq!(o.status, StageStatus::PartialSuccess);

        let o = parse_outcome("[outcome:bogus]");
        assert_eq!(o.status, StageStatus::Success);
    }

    #[tokio::test]
    async fn codergen_runs_prompt_and_keeps_response() {
        let g = graph();
        let runner = Arc::new(ScriptedRunner::new(&["done [outcome:retry]"]));
        let handler = CodergenHandler::new(runner.clone());
        let mut ctx = Context::new();
        let outcome = handler
            .execute(g.node("write").unwrap(), &mut ctx, &g)
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Retry);
        assert_eq!(outcome.notes, "done [outcome:retry]");
        assert_eq!(runner.prompts().len(), 1);
        assert!(runner.prompts()[0].contains("## Pipeline Task: Write Code"));
    }

    struct Broken;

    #[async_trait]
    impl PromptRunner for Broken {
        async fn run_prompt(&self, _prompt: &str, node: &Node) -> Result<String> {
            Err(TrellisError::Handler {
                handler: "codergen".into(),
                node: node.id.clone(),
                message: "container exited".into(),
            })
        }
    }

    #[tokio::test]
    async fn runner_errors_propagate() {
        let g = graph();
        let handler = CodergenHandler::new(Arc::new(Broken));
        let err = handler
            .execute(g.node("bare").unwrap(), &mut Context::new(), &g)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Handler 'codergen' failed on node 'bare': container exited"
        );
    }
}
