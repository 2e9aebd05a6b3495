//! Log setup for the `tl` binary.
//!
//! Command results are printed to stdout as JSON, so the subscriber always
//! writes to stderr and `tl advance --task t.json | jq` only ever sees the
//! result. Each command runs inside a [`command_span`] that carries the
//! service name and the pipeline mode, so a log line from an observation run
//! can never be mistaken for one that changed a task.

use tracing::Span;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line, with the enclosing command span inlined.
    Json,
}

/// Whether stage decisions are persisted or only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Live,
    Observation,
}

impl PipelineMode {
    pub fn from_observation(observing: bool) -> Self {
        if observing {
            Self::Observation
        } else {
            Self::Live
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Observation => "observation",
        }
    }
}

/// `RUST_LOG` when set, else `default_level` (e.g. "info", "tl_agents=debug,warn").
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the process-wide stderr subscriber. Returns `false` when one is
/// already installed, in which case nothing changes.
pub fn init(format: LogFormat, default_level: &str) -> bool {
    let builder = fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Human => builder.with_file(false).try_init().is_ok(),
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .try_init()
            .is_ok(),
    }
}

/// Span wrapping one CLI command.
pub fn command_span(service: &str, command: &str, mode: PipelineMode) -> Span {
    tracing::info_span!("command", service, command, mode = mode.as_str())
}
