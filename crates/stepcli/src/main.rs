// crates/stepcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepcore::{
    Edge, ExecutionEvent, ExecutionStatus, Step, StepEvent, Variables, Workflow,
};
use stepruntime::{HandlerRegistry, RuntimeConfig, StepRuntime};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Stepflow workflow CLI", long_about = None)]
struct Cli {
    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial variables as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// User the run is started on behalf of
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available step types
    Steps,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            user,
        } => run_workflow(&file, input, config.as_deref(), &user).await,
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Steps => {
            list_steps();
            Ok(())
        }
        Commands::Init { output } => create_example_workflow(&output),
    }
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", file.display()))
}

fn load_config(file: Option<&Path>) -> Result<RuntimeConfig> {
    match file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(RuntimeConfig::from_env()),
    }
}

fn parse_input(input: Option<String>) -> Result<Variables> {
    let Some(raw) = input else {
        return Ok(Variables::new());
    };
    match serde_json::from_str::<serde_json::Value>(&raw)? {
        serde_json::Value::Object(obj) => Ok(obj.into_iter().collect()),
        _ => bail!("Input must be a JSON object"),
    }
}

fn standard_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    stepactions::register_all(&mut registry);
    registry
}

async fn run_workflow(
    file: &Path,
    input: Option<String>,
    config: Option<&Path>,
    user: &str,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(file)?;
    let variables = parse_input(input)?;
    let config = load_config(config)?;
    tracing::debug!(?config, "Runtime configuration");
    let runtime = StepRuntime::with_registry(Arc::new(standard_registry()), config);

    println!("📋 Workflow: {}", workflow.name);
    println!("   Steps: {}", workflow.steps.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    let workflow = runtime.definitions().create(workflow).await?;

    // Subscribe before starting so no event is missed
    let mut events = runtime.subscribe_events();
    let execution = runtime.start_run(&workflow.id, user, variables).await?;
    let execution_id = execution.id.clone();

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.execution_id() != execution_id {
                continue;
            }
            match event {
                ExecutionEvent::RunStarted { .. } => println!("▶️  Workflow started"),
                ExecutionEvent::StepStarted {
                    step_id, step_type, ..
                } => println!("  ⚡ Starting step: {} ({})", step_id, step_type),
                ExecutionEvent::StepCompleted {
                    step_id,
                    duration_ms,
                    ..
                } => println!("  ✅ Step {} completed in {}ms", step_id, duration_ms),
                ExecutionEvent::StepFailed { step_id, error, .. } => {
                    println!("  ❌ Step {} failed: {}", step_id, error)
                }
                ExecutionEvent::StepEvent { step_id, event, .. } => match event {
                    StepEvent::Info { message } => println!("     ℹ️  [{}] {}", step_id, message),
                    StepEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", step_id, message)
                    }
                    StepEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("     📊 [{}] {}% - {}", step_id, percent, msg),
                        None => println!("     📊 [{}] {}%", step_id, percent),
                    },
                },
                ExecutionEvent::RunPaused { .. } => println!("⏸️  Paused"),
                ExecutionEvent::RunResumed { .. } => println!("⏯️  Resumed"),
                ExecutionEvent::RunFinished {
                    status, duration_ms, ..
                } => {
                    match status {
                        ExecutionStatus::Completed => {
                            println!("✨ Workflow completed successfully in {}ms", duration_ms)
                        }
                        other => println!("💥 Workflow {} after {}ms", other, duration_ms),
                    }
                    break;
                }
            }
        }
    });

    let finished = tokio::select! {
        result = runtime.runs().wait_for(&execution.id) => result?,
        _ = tokio::signal::ctrl_c() => {
            runtime.cancel(&execution.id, "Interrupted").await;
            runtime.runs().wait_for(&execution.id).await?
        }
    };
    let _ = event_task.await;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", finished.id);
    println!("   Status: {}", finished.status);
    println!("   Duration: {}ms", finished.duration_ms());

    println!();
    println!("📤 Variables:");
    let mut keys: Vec<_> = finished.variables.keys().collect();
    keys.sort();
    for key in keys {
        println!("   {}: {}", key, finished.variables[key]);
    }

    if finished.status != ExecutionStatus::Completed {
        let reason = finished
            .logs
            .last()
            .map(|l| l.message.clone())
            .unwrap_or_default();
        bail!("execution {}: {}", finished.status, reason);
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let result = stepcore::validate(&workflow);

    for warning in &result.warnings {
        println!("   ⚠️  {}", warning);
    }
    for error in &result.errors {
        println!("   ❌ {}", error);
    }

    if !result.valid {
        bail!("workflow has {} error(s)", result.errors.len());
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Steps: {}", workflow.steps.len());
    println!("   Edges: {}", workflow.edges.len());
    Ok(())
}

fn list_steps() {
    println!("📦 Available Step Types:");
    println!();

    let registry = standard_registry();
    for step_type in registry.list_step_types() {
        println!("  • {}", step_type);
        if let Some(description) = registry.describe(&step_type).filter(|d| !d.is_empty()) {
            println!("    {}", description);
        }
    }
}

fn example_workflow() -> Result<Workflow> {
    let mut workflow = Workflow::new("Example Content Workflow")
        .with_description("Drafts a short article and logs the result");
    workflow.set_variable("topic", "renewable energy");

    workflow.add_step(Step::start().with_position(0.0, 100.0))?;
    workflow.add_step(
        Step::new("draft", "ai.generate")
            .with_title("Draft article")
            .with_data("prompt", "Write a short introduction about {{topic}}")
            .with_data("outputVariable", "draft")
            .with_position(200.0, 100.0),
    )?;
    workflow.add_step(
        Step::new("review", "variables.set")
            .with_title("Mark for review")
            .with_data("assign", json!({ "reviewStatus": "pending" }))
            .with_position(400.0, 100.0),
    )?;
    workflow.add_step(
        Step::new("log", "debug.log")
            .with_title("Log draft")
            .with_data("message", "Draft ready: {{draft}}")
            .with_position(600.0, 100.0),
    )?;
    workflow.add_step(Step::end().with_position(800.0, 100.0))?;

    for (source, target) in [("start", "draft"), ("draft", "review"), ("review", "log"), ("log", "end")] {
        workflow.add_edge(Edge::new(source, target))?;
    }
    Ok(workflow)
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let workflow = example_workflow()?;
    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  stepflow run --file {} --input '{{\"topic\": \"tide pools\"}}'",
        output.display()
    );

    Ok(())
}
