//! CLI command definitions for forgeflow.
//!
//! Every command writes machine-readable output to stdout; logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use tracing::{info, warn};

use crate::llm::BackendMode;
use crate::pipeline::{GenerationConfig, PipelineConfig, WorkflowEngine, WorkflowEvent};
use crate::runner::{SandboxRunner, SandboxUpdate};
use crate::workspace::{load_directory, DirectoryWorkspace};

/// Plan, generate, test and document code from a natural-language request.
#[derive(Parser)]
#[command(name = "forgeflow")]
#[command(about = "Turn a request into a tested, documented project with an LLM")]
#[command(version)]
#[command(
    long_about = "forgeflow plans, writes, tests and documents a project from a one-line request.\n\nTests run in a throwaway sandbox; with --auto-fix, failures feed back into a new plan.\n\nExample usage:\n  forgeflow generate \"Sort a list of integers with merge sort\" --auto-fix --output ./out"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file.
    #[arg(short, long, global = true, env = "FORGE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the full workflow and stream its events as JSON lines.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Run the sandbox test command against an existing directory.
    Verify(VerifyArgs),

    /// Run a single script with the sandbox interpreter.
    #[command(name = "run-script")]
    RunScript(RunScriptArgs),
}

/// Arguments for `forgeflow generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// What to build.
    pub prompt: String,

    /// Loop on test failure until tests pass or the iteration ceiling is hit.
    #[arg(long)]
    pub auto_fix: bool,

    /// Use the hosted API instead of the local server.
    #[arg(long)]
    pub remote: bool,

    /// API key for the hosted API (overrides OPENAI_API_KEY for this run).
    #[arg(long)]
    pub api_key: Option<String>,

    /// Target language injected into prompts.
    #[arg(long, env = "FORGE_LANGUAGE")]
    pub language: Option<String>,

    /// Directory the generated files are committed to.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Override the auto-fix iteration ceiling.
    #[arg(long)]
    pub max_iterations: Option<usize>,
}

/// Arguments for `forgeflow verify`.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Project directory to test.
    pub dir: PathBuf,

    /// Skip dependency installation.
    #[arg(long)]
    pub no_install: bool,
}

/// Arguments for `forgeflow run-script`.
#[derive(Parser, Debug)]
pub struct RunScriptArgs {
    /// Script to run.
    pub file: PathBuf,

    /// Kill the script after this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<ExitCode> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = PipelineConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Generate(args) => run_generate_command(args, config).await,
        Commands::Verify(args) => run_verify_command(args, config).await,
        Commands::RunScript(args) => run_script_command(args, config).await,
    }
}

/// Per-run settings from the configured defaults and the command-line flags.
fn generation_config(args: &GenerateArgs, defaults: &GenerationConfig) -> GenerationConfig {
    let mut generation = defaults.clone();
    if args.auto_fix {
        generation.auto_fix = true;
    }
    if args.remote {
        generation.backend_mode = BackendMode::Remote;
    }
    if let Some(key) = &args.api_key {
        generation.api_key = Some(key.clone());
    }
    if let Some(language) = &args.language {
        generation.target_language = language.clone();
    }
    generation
}

async fn run_generate_command(
    args: GenerateArgs,
    mut config: PipelineConfig,
) -> anyhow::Result<ExitCode> {
    if let Some(max) = args.max_iterations {
        config = config.with_max_iterations(max);
        config.validate()?;
    }
    let generation = generation_config(&args, &config.generation);

    let mut engine =
        WorkflowEngine::from_config(&config).context("Failed to initialize generation backend")?;
    if let Some(output) = &args.output {
        info!(output = %output.display(), "Committing files to directory");
        engine = engine.with_committer(Arc::new(DirectoryWorkspace::new(output)));
    }

    let mut events = Arc::new(engine).stream(args.prompt, generation);
    let mut succeeded = false;
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
        if let WorkflowEvent::Complete(report) = &event {
            succeeded = report.outcome.is_success();
        }
    }

    Ok(exit_code(succeeded))
}

async fn run_verify_command(args: VerifyArgs, config: PipelineConfig) -> anyhow::Result<ExitCode> {
    let files = load_directory(&args.dir)
        .with_context(|| format!("Failed to load {}", args.dir.display()))?;
    if files.is_empty() {
        anyhow::bail!("No files found in {}", args.dir.display());
    }
    info!(dir = %args.dir.display(), files = files.len(), "Verifying directory");

    let mut sandbox = config.sandbox;
    if args.no_install {
        sandbox = sandbox.without_install();
    }
    let runner = SandboxRunner::new(sandbox);

    let mut updates = runner.execute_streaming(&files);
    let mut printed = 0usize;
    while let Some(update) = updates.next().await {
        match update {
            SandboxUpdate::Output { log } => {
                print_new_lines(&log, &mut printed);
            }
            SandboxUpdate::Finished(Ok(result)) => {
                print_new_lines(&result.log, &mut printed);
                return Ok(exit_code(result.succeeded));
            }
            SandboxUpdate::Finished(Err(e)) => {
                return Err(e).context("Sandbox run failed");
            }
        }
    }

    anyhow::bail!("Sandbox ended without a result")
}

async fn run_script_command(
    args: RunScriptArgs,
    config: PipelineConfig,
) -> anyhow::Result<ExitCode> {
    let code = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let filename = script_name(&args.file)?;

    let mut sandbox = config.sandbox;
    if let Some(secs) = args.timeout_secs {
        sandbox = sandbox.with_timeout(std::time::Duration::from_secs(secs));
    }
    let output = SandboxRunner::new(sandbox)
        .run_script(&filename, &code)
        .await
        .context("Failed to run script")?;
    if output.timed_out {
        warn!(file = %args.file.display(), "Script timed out");
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(exit_code(output.exit_code == 0 && !output.timed_out))
}

fn script_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("{} is not a file", path.display()))
}

fn print_new_lines(log: &[String], printed: &mut usize) {
    for line in log.iter().skip(*printed) {
        println!("{}", line);
    }
    *printed = (*printed).max(log.len());
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
