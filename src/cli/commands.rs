//! CLI command definitions for fixeval.

use clap::Parser;
use tracing::error;

use crate::agent::list_agents;
use crate::config::RunConfig;
use crate::dataset::create_dataset;
use crate::report::create_reporters;
use crate::runner::Runner;

/// Evaluation harness for autonomous bug-fixing agents.
#[derive(Parser)]
#[command(name = "fixeval")]
#[command(about = "Evaluate coding agents on bug-fixing instances")]
#[command(version)]
#[command(
    long_about = "fixeval runs autonomous coding agents against bug-fixing instances, \
applies the held-out tests, and reports resolve rates.\n\nExample usage:\n  \
fixeval run --config eval.yaml --agent claude-code --max-workers 4"
)]
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
    /// Run an evaluation over a dataset of instances.
    Run(RunArgs),

    /// List registered agents, workspaces, evaluators, and reporters.
    List,
}

/// Arguments for `fixeval run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the YAML run configuration.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Agent to run (overrides the config).
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Path to the dataset file (overrides the config).
    #[arg(short, long)]
    pub dataset: Option<String>,

    /// Only run these instance ids; others are recorded as skipped.
    #[arg(long = "instance-id")]
    pub instance_ids: Vec<String>,

    /// Truncate the dataset to this many instances.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Maximum concurrently in-flight instances (overrides the config).
    #[arg(long)]
    pub max_workers: Option<usize>,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Executes the parsed command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_eval(args).await,
        Commands::List => {
            println!("agents:      {}", list_agents().join(", "));
            println!("workspaces:  docker, host");
            println!("evaluators:  swe");
            println!("reporters:   console, json");
            Ok(())
        }
    }
}

async fn run_eval(args: RunArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_yaml(path)?,
        None => RunConfig::default(),
    };
    config.apply_overrides(
        args.agent,
        args.dataset,
        args.instance_ids,
        args.limit,
        args.max_workers,
    );
    config.validate()?;

    let dataset = create_dataset(&config.dataset)?;
    let instances = dataset.load(&config.dataset)?;
    if instances.is_empty() {
        anyhow::bail!("dataset '{}' contains no instances", config.dataset.path);
    }

    let reporters = create_reporters(&config.reporters, &config.results_dir)?;
    let runner = Runner::from_config(config)?;
    let summary = runner.run(instances).await;

    for reporter in &reporters {
        if let Err(e) = reporter.report(&summary) {
            error!(reporter = reporter.name(), error = %e, "Reporter failed");
        }
    }

    Ok(())
}
