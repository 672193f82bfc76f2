//! CLI command definitions for swe-gym.
//!
//! The `solve` command runs the full evaluation cycle for one dataset
//! task; the remaining commands expose the individual pipeline stages for
//! debugging and scripting.

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::checkout::CheckoutCache;
use crate::config::{HarnessConfig, ModelConfig};
use crate::dataset::{JsonlTaskSource, TaskSource};
use crate::llm::OpenAiCompatClient;
use crate::patch::Patch;
use crate::report;
use crate::sandbox::{self, DockerClient};
use crate::session::{EvalOutcome, Harness};

/// Default OpenAI-compatible API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model for patch generation.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// LLM patch-generation and verification harness.
#[derive(Parser)]
#[command(name = "swe-gym")]
#[command(about = "Run LLM-generated patches against real repositories in Docker sandboxes")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the evaluation cycle for one task from a JSONL dataset.
    Solve(SolveArgs),

    /// Clone and pin a repository checkout into the local cache.
    Checkout(CheckoutArgs),

    /// Apply a patch file to a checkout inside a sandbox and run the tests.
    Exec(ExecArgs),

    /// Parse a JUnit-style XML report and print the outcome as JSON.
    ParseReport(ParseReportArgs),
}

/// Arguments for `swe-gym solve`.
#[derive(Parser, Debug)]
pub struct SolveArgs {
    /// JSONL dataset file, one task per line.
    #[arg(short, long)]
    pub dataset: PathBuf,

    /// Zero-based index of the task to evaluate.
    #[arg(short, long, default_value = "0")]
    pub index: usize,

    /// OpenAI-compatible API base URL.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// API key for the completion endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Model identifier.
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Fuzzy-match threshold (0-100) for locating the old code.
    #[arg(long, default_value = "80")]
    pub fuzzy_threshold: u32,

    /// Corrective-retry budget before the evaluation is declared invalid.
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Directory under which repository checkouts are cached.
    #[arg(long, default_value = "./temp")]
    pub save_path: PathBuf,

    /// Print the session log in addition to the outcome.
    #[arg(long)]
    pub verbose_session: bool,
}

/// Arguments for `swe-gym checkout`.
#[derive(Parser, Debug)]
pub struct CheckoutArgs {
    /// Repository, either `owner/name` or a full URL / local path.
    #[arg(short, long)]
    pub repo: String,

    /// Commit to pin the checkout to.
    #[arg(short, long)]
    pub commit: String,

    /// Directory under which repository checkouts are cached.
    #[arg(long, default_value = "./temp")]
    pub save_path: PathBuf,
}

/// Arguments for `swe-gym exec`.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Repository, either `owner/name` or a full URL / local path.
    #[arg(short, long)]
    pub repo: String,

    /// Commit to pin the checkout to.
    #[arg(short, long)]
    pub commit: String,

    /// Unified-diff patch file to apply.
    #[arg(short, long)]
    pub patch: PathBuf,

    /// Test command executed inside the sandbox.
    #[arg(short, long, default_value = crate::config::DEFAULT_TEST_COMMAND)]
    pub test_command: String,

    /// Path of the test report inside the sandbox.
    #[arg(long, default_value = crate::config::DEFAULT_REPORT_PATH)]
    pub report_path: String,

    /// Directory under which repository checkouts are cached.
    #[arg(long, default_value = "./temp")]
    pub save_path: PathBuf,
}

/// Arguments for `swe-gym parse-report`.
#[derive(Parser, Debug)]
pub struct ParseReportArgs {
    /// JUnit-style XML report file.
    #[arg(short, long)]
    pub report: PathBuf,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before
/// running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Solve(args) => run_solve_command(args).await,
        Commands::Checkout(args) => run_checkout_command(args).await,
        Commands::Exec(args) => run_exec_command(args).await,
        Commands::ParseReport(args) => run_parse_report_command(args).await,
    }
}

#[derive(Debug, Serialize)]
struct SolveOutput {
    status: String,
    score: f64,
    tests: usize,
    failed: usize,
    outcome: EvalOutcome,
}

async fn run_solve_command(args: SolveArgs) -> anyhow::Result<()> {
    let source = JsonlTaskSource::load(&args.dataset)?;
    let task = source.get(args.index).ok_or_else(|| {
        anyhow::anyhow!(
            "dataset has {} tasks, index {} is out of range",
            source.len(),
            args.index
        )
    })?;
    info!(repo = %task.repo, commit = %task.commit, "evaluating task");

    let config = HarnessConfig::default()
        .with_fuzzy_threshold(args.fuzzy_threshold)
        .with_max_retries(args.max_retries)
        .with_save_path(args.save_path);
    let docker = DockerClient::connect().await?;
    let client = OpenAiCompatClient::new(ModelConfig::new(
        args.base_url,
        args.api_key,
        args.model,
    ))?;

    let mut harness = Harness::new(config, docker, client);
    let (outcome, state) = harness.evaluate(&task).await?;

    if args.verbose_session {
        for line in &state.logs {
            eprintln!("{line}");
        }
    }

    let (tests, failed) = match &outcome {
        EvalOutcome::Completed(o) => (o.len(), o.num_failed()),
        EvalOutcome::Invalid { .. } => (0, 0),
    };
    let output = SolveOutput {
        status: match &outcome {
            EvalOutcome::Completed(_) => "completed".to_string(),
            EvalOutcome::Invalid { .. } => "invalid".to_string(),
        },
        score: outcome.score(),
        tests,
        failed,
        outcome,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_checkout_command(args: CheckoutArgs) -> anyhow::Result<()> {
    let mut cache = CheckoutCache::new(args.save_path);
    let path = cache.get_checkout(&args.repo, &args.commit).await?;
    info!(path = %path.display(), "checkout ready");
    println!("{}", path.display());
    Ok(())
}

async fn run_exec_command(args: ExecArgs) -> anyhow::Result<()> {
    let patch_text = std::fs::read_to_string(&args.patch)?;
    let patch = Patch::parse(&patch_text)?;

    let config = HarnessConfig::default().with_save_path(args.save_path);
    let mut cache = CheckoutCache::new(config.save_path.clone());
    let checkout = cache.get_checkout(&args.repo, &args.commit).await?;

    let docker = DockerClient::connect().await?;
    let image = sandbox::ensure_image(
        &docker,
        &config.namespace,
        &args.repo,
        &args.commit,
        &checkout,
    )
    .await?;

    let xml = sandbox::run(
        &docker,
        &image,
        &checkout,
        &patch,
        &args.test_command,
        &args.report_path,
        &config.namespace,
    )
    .await?;

    let outcome = report::parse_junit_xml(&xml)?;
    info!(
        tests = outcome.len(),
        failed = outcome.num_failed(),
        "test run finished"
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_parse_report_command(args: ParseReportArgs) -> anyhow::Result<()> {
    let xml = std::fs::read_to_string(&args.report)?;
    let outcome = report::parse_junit_xml(&xml)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
