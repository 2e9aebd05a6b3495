//! Context compilation for the executing agent.
//!
//! Modes are strictly additive:
//!
//! - `minimal` -- task fields, board, dependency summaries
//! - `manifest_enriched` -- + first project manifest found
//! - `retrieval_augmented` -- + top-K semantic search hits
//! - `full` -- + recently completed sibling tasks on the board
//!
//! Every external lookup is recoverable; a failure leaves its section empty.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use tl_core::config::{ContextMode, PipelineConfig};
use tl_core::error::RecoverExt;
use tl_core::store::TaskHistory;
use tl_core::text::{clean_description, truncate_chars};
use tl_core::types::{BoardRef, DependencySummary, SiblingSummary, Task};

use crate::manifest::{candidate_names, Manifest, ManifestProvider};
use crate::retrieval::{SearchHit, VectorSearch};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub id: Uuid,
    pub name: String,
    /// Cleaned and truncated description.
    pub description: String,
    pub tags: Vec<String>,
    pub pipeline_type: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub validation_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub mode: ContextMode,
    pub task: TaskContext,
    pub board: Option<BoardRef>,
    pub dependencies: Vec<DependencySummary>,
    #[serde(default)]
    pub manifest: Option<Manifest>,
    #[serde(default)]
    pub retrieval: Vec<SearchHit>,
    #[serde(default)]
    pub recent_siblings: Vec<SiblingSummary>,
    pub compiled_at: DateTime<Utc>,
}

impl ContextBundle {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

pub struct ContextCompiler {
    config: Arc<PipelineConfig>,
    manifests: Arc<dyn ManifestProvider>,
    search: Arc<dyn VectorSearch>,
    history: Arc<dyn TaskHistory>,
}

impl ContextCompiler {
    pub fn new(
        config: Arc<PipelineConfig>,
        manifests: Arc<dyn ManifestProvider>,
        search: Arc<dyn VectorSearch>,
        history: Arc<dyn TaskHistory>,
    ) -> Self {
        Self {
            config,
            manifests,
            search,
            history,
        }
    }

    /// Mode configured for the task's pipeline type; `minimal` when the type
    /// is unset or unknown.
    pub fn mode_for(&self, task: &Task) -> ContextMode {
        task.pipeline_type
            .as_deref()
            .and_then(|pt| self.config.pipeline_type(pt))
            .map(|pt| pt.context_mode)
            .unwrap_or_default()
    }

    pub async fn compile(&self, task: &Task) -> ContextBundle {
        let mode = self.mode_for(task);
        let limits = &self.config.context;

        let mut bundle = ContextBundle {
            mode,
            task: TaskContext {
                id: task.id,
                name: task.name.clone(),
                description: clean_description(
                    task.description.as_deref().unwrap_or(""),
                    limits.description_limit,
                ),
                tags: task.tags.clone(),
                pipeline_type: task.pipeline_type.clone(),
                acceptance_criteria: task.acceptance_criteria.clone(),
                validation_command: task.validation_command.clone(),
            },
            board: task.board.clone(),
            dependencies: task.dependencies.clone(),
            manifest: None,
            retrieval: Vec::new(),
            recent_siblings: Vec::new(),
            compiled_at: Utc::now(),
        };

        if mode >= ContextMode::ManifestEnriched {
            bundle.manifest = self.find_manifest(task).await;
        }
        if mode >= ContextMode::RetrievalAugmented {
            let query = retrieval_query(task, limits.query_description_limit);
            bundle.retrieval = self
                .search
                .search(&query, limits.retrieval_limit)
                .await
                .or_fallback("context retrieval", Vec::new());
        }
        if mode >= ContextMode::Full {
            if let Some(board) = &task.board {
                bundle.recent_siblings = self
                    .history
                    .recent_completed(&board.id, task.id, limits.sibling_limit)
                    .await
                    .or_fallback("context siblings", Vec::new());
            }
        }

        debug!(
            task_id = %task.id,
            mode = mode.as_str(),
            manifest = bundle.manifest.is_some(),
            retrieval_hits = bundle.retrieval.len(),
            siblings = bundle.recent_siblings.len(),
            "context compiled"
        );
        bundle
    }

    async fn find_manifest(&self, task: &Task) -> Option<Manifest> {
        for name in candidate_names(task) {
            match self.manifests.lookup(&name).await {
                Ok(Some(manifest)) => return Some(manifest),
                Ok(None) => continue,
                Err(e) => {
                    warn!(task_id = %task.id, project = %name, error = %e, "manifest lookup failed");
                }
            }
        }
        None
    }
}

/// `name + " " + description`, with the description cut to `limit` chars.
pub fn retrieval_query(task: &Task, limit: usize) -> String {
    let description = task.description.as_deref().unwrap_or("").trim();
    if description.is_empty() {
        return task.name.clone();
    }
    format!("{} {}", task.name, truncate_chars(description, limit))
}
