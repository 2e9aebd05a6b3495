mod commands;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tl_telemetry::logging::{self, LogFormat};
use tl_telemetry::metrics::global_metrics;
use tracing::{debug, Instrument};

use commands::TaskArgs;

/// taskline CLI -- classify, route and review tasks stored as JSON files.
#[derive(Parser)]
#[command(name = "tl", version, about)]
struct Cli {
    /// Pipeline config file (default: ~/.taskline/pipeline.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how a task would be classified, with every vote.
    Classify {
        /// Task JSON file.
        #[arg(long)]
        task: PathBuf,
    },

    /// Run the next pipeline stage (or all remaining ones).
    Advance {
        #[command(flatten)]
        task: TaskArgs,
        /// Keep going until the task is routed.
        #[arg(long)]
        all: bool,
    },

    /// Auto-review executor output for a task.
    Review {
        #[command(flatten)]
        task: TaskArgs,
        /// File holding the executor output.
        #[arg(long)]
        output: PathBuf,
    },

    /// Run the scored auditor on a task.
    Audit {
        #[command(flatten)]
        task: TaskArgs,
        /// What prompted the audit, recorded in the report.
        #[arg(long, default_value = "manual")]
        trigger: String,
    },

    /// Inspect the pipeline configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Classify { .. } => "classify",
            Self::Advance { .. } => "advance",
            Self::Review { .. } => "review",
            Self::Audit { .. } => "audit",
            Self::Config { .. } => "config",
        }
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Validate the configuration and list warnings.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Human };
    logging::init(format, "info");

    let config = cli.config.as_deref();
    let span = logging::command_span("tl", cli.command.name(), commands::pipeline_mode(config));
    run(cli.command, config).instrument(span.clone()).await?;

    let _entered = span.enter();
    debug!(metrics = %global_metrics().snapshot(), "command finished");
    Ok(())
}

async fn run(command: Commands, config: Option<&Path>) -> anyhow::Result<()> {
    match command {
        Commands::Classify { task } => commands::classify::run(config, &task).await,
        Commands::Advance { task, all } => commands::advance::run(config, &task, all).await,
        Commands::Review { task, output } => commands::review::run(config, &task, &output).await,
        Commands::Audit { task, trigger } => commands::audit::run(config, &task, &trigger).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(config),
            ConfigAction::Check => commands::config::check(config),
        },
    }
}
