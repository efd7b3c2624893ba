//! CLI binary for validating, inspecting, and running Trellis pipelines.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;

use trellis_dot::{Graph, Node};
use trellis_pipeline::{
    load_checkpoint, start_pipeline_run, HandlerRegistry, MessageSender, PipelineConfig,
    PromptRunner, Severity, Verbosity,
};
use trellis_types::TrellisError;

#[derive(Parser)]
#[command(name = "trellis", version, about = "DOT-based workflow pipeline runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline from a .dot file
    Run {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,

        /// Shell command that answers prompts: prompt on stdin, response on stdout.
        /// Without it every prompt answers `[outcome:success]`.
        #[arg(short, long)]
        command: Option<String>,

        /// Directory for checkpoint.json
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Progress detail: minimal, standard, or verbose
        #[arg(long, default_value = "standard")]
        verbosity: Verbosity,

        /// Maximum loop iterations before the run is treated as a cycle
        #[arg(long, default_value = "1000")]
        max_iterations: usize,
    },

    /// Validate a pipeline .dot file
    Validate {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,
    },

    /// Show information about a pipeline
    Info {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,
    },

    /// Summarize the checkpoint saved in a directory
    Checkpoint {
        /// Directory containing checkpoint.json
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            pipeline,
            command,
            checkpoint_dir,
            verbosity,
            max_iterations,
        } => {
            let mut config = PipelineConfig::default().with_max_iterations(max_iterations);
            if let Some(dir) = checkpoint_dir {
                config = config.with_checkpoint_dir(dir);
            }
            cmd_run(&pipeline, command, verbosity, config).await?;
        }
        Commands::Validate { pipeline } => {
            cmd_validate(&pipeline)?;
        }
        Commands::Info { pipeline } => {
            cmd_info(&pipeline)?;
        }
        Commands::Checkpoint { dir } => {
            cmd_checkpoint(&dir).await?;
        }
    }

    Ok(())
}

fn load_pipeline(path: &Path) -> anyhow::Result<Graph> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(trellis_dot::parse(&source)?)
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;
    let report = trellis_pipeline::validate(&graph);

    if report.diagnostics.is_empty() {
        println!("Pipeline is valid");
        return Ok(());
    }

    for diag in &report.diagnostics {
        let severity = match diag.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("        fix: {fix}");
        }
    }

    if !report.is_valid() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;
    let registry = HandlerRegistry::new();

    println!("Pipeline: {}", graph.name);
    let goal = graph.string_attr("goal", "");
    if !goal.is_empty() {
        println!("Goal: {goal}");
    }
    println!("Nodes: {}", graph.nodes.len());
    println!("Edges: {}", graph.edges.len());

    println!("\nNodes:");
    for id in graph.sorted_node_ids() {
        let Some(node) = graph.node(id) else { continue };
        println!(
            "  {} [{}] shape={} type={}",
            node.id,
            trellis_pipeline::graph::node_label(node),
            trellis_pipeline::graph::node_shape(node),
            registry.resolve_type(node)
        );
    }

    println!("\nEdges:");
    for edge in &graph.edges {
        let mut extras = Vec::new();
        let label = edge.label();
        if !label.is_empty() {
            extras.push(format!("label={label:?}"));
        }
        let condition = edge.condition();
        if !condition.is_empty() {
            extras.push(format!("condition={condition:?}"));
        }
        if edge.weight() != 0 {
            extras.push(format!("weight={}", edge.weight()));
        }
        println!("  {} -> {} {}", edge.from, edge.to, extras.join(" "));
    }

    Ok(())
}

async fn cmd_run(
    path: &Path,
    command: Option<String>,
    verbosity: Verbosity,
    config: PipelineConfig,
) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let runner: Arc<dyn PromptRunner> = match command {
        Some(command) => Arc::new(ShellPromptRunner { command }),
        None => {
            println!("(dry run: every prompt answers [outcome:success])");
            Arc::new(DryRunRunner)
        }
    };

    let result = start_pipeline_run(&source, Arc::new(StdoutSender), runner, verbosity, config).await;

    println!("\nCompleted nodes: {:?}", result.completed_nodes);
    if let Some(reason) = &result.failure_reason {
        eprintln!("Pipeline failed: {reason}");
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_checkpoint(dir: &Path) -> anyhow::Result<()> {
    let Some(checkpoint) = load_checkpoint(dir).await else {
        anyhow::bail!("No readable checkpoint in {}", dir.display());
    };

    println!("Pipeline: {}", checkpoint.pipeline_id);
    println!("Saved: {}", checkpoint.timestamp.to_rfc3339());
    println!("Current node: {}", checkpoint.current_node);
    println!("Completed: {}", checkpoint.completed_nodes.join(" -> "));

    let mut outcomes: Vec<_> = checkpoint.node_outcomes.iter().collect();
    outcomes.sort_by(|a, b| a.0.cmp(b.0));
    for (node, status) in outcomes {
        let retries = checkpoint.node_retries.get(node).copied().unwrap_or(0);
        println!("  {node}: {status} (retries: {retries})");
    }
    println!("Context keys: {}", checkpoint.context_values.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Host adapters
// ---------------------------------------------------------------------------

struct StdoutSender;

#[async_trait]
impl MessageSender for StdoutSender {
    async fn send_message(&self, text: &str) -> trellis_types::Result<()> {
        println!("{text}");
        Ok(())
    }
}

struct DryRunRunner;

#[async_trait]
impl PromptRunner for DryRunRunner {
    async fn run_prompt(&self, _prompt: &str, node: &Node) -> trellis_types::Result<String> {
        tracing::debug!(node = %node.id, "Dry run prompt");
        Ok("[outcome:success]".to_string())
    }
}

/// Runs `sh -c <command>` per prompt. The prompt goes to stdin and the node id
/// to `TRELLIS_NODE_ID`; stdout is the response.
struct ShellPromptRunner {
    command: String,
}

#[async_trait]
impl PromptRunner for ShellPromptRunner {
    async fn run_prompt(&self, prompt: &str, node: &Node) -> trellis_types::Result<String> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("TRELLIS_NODE_ID", &node.id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrellisError::Handler {
                handler: "shell".into(),
                node: node.id.clone(),
                message: format!("command exited with {}: {}", output.status, stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
