pub mod advance;
pub mod audit;
pub mod classify;
pub mod config;
pub mod review;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tl_core::config::{ConfigHandle, PipelineConfig};
use tl_core::store::{InMemoryTaskStore, TaskStore};
use tl_core::types::Task;
use tl_telemetry::logging::PipelineMode;
use tracing::info;
use uuid::Uuid;

/// Task file arguments shared by the commands that update a task.
#[derive(Debug, Clone, clap::Args)]
pub struct TaskArgs {
    /// Task JSON file, rewritten in place with the result.
    #[arg(long)]
    pub task: PathBuf,
    /// Print the result without writing the task file.
    #[arg(long)]
    pub dry_run: bool,
}

/// The explicit config file when given, else the default location (or
/// built-in defaults when that file does not exist).
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ConfigHandle> {
    match path {
        Some(path) => ConfigHandle::from_path(path)
            .with_context(|| format!("loading pipeline config {}", path.display())),
        None => {
            let cfg = PipelineConfig::load().with_context(|| {
                format!(
                    "loading pipeline config {}",
                    PipelineConfig::default_path().display()
                )
            })?;
            Ok(ConfigHandle::new(cfg))
        }
    }
}

/// Mode the config puts the pipeline in. Live when the config does not load;
/// the command itself reports that error.
pub fn pipeline_mode(path: Option<&Path>) -> PipelineMode {
    load_config(path)
        .map(|handle| PipelineMode::from_observation(handle.snapshot().observation_mode))
        .unwrap_or(PipelineMode::Live)
}

pub fn read_task(path: &Path) -> anyhow::Result<Task> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading task file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing task file {}", path.display()))
}

/// A task file loaded into a single-task in-memory store.
pub struct TaskFile {
    path: PathBuf,
    pub store: Arc<InMemoryTaskStore>,
    pub id: Uuid,
}

impl TaskFile {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let task = read_task(path)?;
        let store = Arc::new(InMemoryTaskStore::new());
        let id = store.insert(task).await;
        Ok(Self {
            path: path.to_path_buf(),
            store,
            id,
        })
    }

    pub async fn current(&self) -> anyhow::Result<Task> {
        Ok(self.store.get(self.id).await?)
    }

    /// Write the stored task back to its file unless `dry_run`.
    pub async fn save(&self, dry_run: bool) -> anyhow::Result<()> {
        if dry_run {
            info!(path = %self.path.display(), "dry run; task file left unchanged");
            return Ok(());
        }
        let task = self.current().await?;
        let json = serde_json::to_string_pretty(&task)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing task file {}", self.path.display()))?;
        Ok(())
    }
}

pub fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
