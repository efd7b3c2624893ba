//! Host entry point: parse source text, wire the prompt handlers, and stream
//! formatted progress messages to a [`MessageSender`].

use std::sync::Arc;

use async_trait::async_trait;
use trellis_types::Result;

use crate::engine::{new_pipeline_id, PipelineConfig, PipelineExecutor, PipelineResult};
use crate::events::{EventSink, PipelineEvent};
use crate::format::{format_event, Verbosity};
use crate::handler::HandlerRegistry;
use crate::handlers::{CodergenHandler, PromptRunner, ToolHandler};

/// Delivers one formatted progress message to wherever the host shows them.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<()>;
}

/// Event sink that formats events at a verbosity and sends them as messages.
pub struct MessageSink {
    sender: Arc<dyn MessageSender>,
    verbosity: Verbosity,
}

impl MessageSink {
    pub fn new(sender: Arc<dyn MessageSender>, verbosity: Verbosity) -> Self {
        Self { sender, verbosity }
    }
}

#[async_trait]
impl EventSink for MessageSink {
    async fn emit(&self, event: PipelineEvent) {
        let Some(text) = format_event(&event, self.verbosity) else {
            return;
        };
        if let Err(e) = self.sender.send_message(&text).await {
            tracing::warn!(pipeline = %event.pipeline_id, error = %e, "Failed to send pipeline message");
        }
    }
}

/// Parse `source` and run it with `codergen` and `tool` handlers backed by
/// `prompt_runner`.
pub async fn start_pipeline_run(
    source: &str,
    sender: Arc<dyn MessageSender>,
    prompt_runner: Arc<dyn PromptRunner>,
    verbosity: Verbosity,
    config: PipelineConfig,
) -> PipelineResult {
    let graph = match trellis_dot::parse(source) {
        Ok(graph) => graph,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse pipeline");
            if let Err(send_err) = sender
                .send_message(&format!("[Pipeline] Failed to parse: {e}"))
                .await
            {
                tracing::warn!(error = %send_err, "Failed to send pipeline message");
            }
            return PipelineResult::failed(new_pipeline_id(), e.to_string());
        }
    };

    let mut registry = HandlerRegistry::new();
    registry.register(CodergenHandler::new(prompt_runner.clone()));
    registry.register(ToolHandler::new(prompt_runner));

    let sink = Arc::new(MessageSink::new(sender, verbosity));
    PipelineExecutor::new(registry)
        .with_sink(sink)
        .with_config(config)
        .run(&graph)
        .await
}
