//! Task persistence seam.
//!
//! The pipeline only ever writes through [`TaskStore::apply`], one
//! [`TaskPatch`] per stage, so a stage either lands completely or not at all.
//! A patch carries the stage its decision was made from; the store refuses it
//! when the task has moved on in the meantime, and refuses any write to a
//! terminal task.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Recoverable, RecoverableError};
use crate::pipeline_log::{self, LogEntry};
use crate::types::{AuditorState, PipelineStage, ReviewStatus, SiblingSummary, Task, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("task {id} is {stage}; terminal tasks are not modified")]
    Terminal { id: Uuid, stage: PipelineStage },
    #[error("task {id} moved to {found} while a decision for {expected} was pending")]
    StageMismatch {
        id: Uuid,
        expected: PipelineStage,
        found: PipelineStage,
    },
}

impl StoreError {
    /// The task changed underneath the writer; the patch was not applied.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Terminal { .. } | Self::StageMismatch { .. })
    }
}

// ---------------------------------------------------------------------------
// TaskPatch
// ---------------------------------------------------------------------------

/// A partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// Apply only while the stored task is still at this stage.
    pub expected_stage: Option<PipelineStage>,
    pub pipeline_type: Option<String>,
    pub pipeline_stage: Option<PipelineStage>,
    pub routed_model: Option<String>,
    pub compiled_prompt: Option<String>,
    pub agent_context: Option<serde_json::Value>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    /// `Some(None)` clears the claim.
    pub claimed_by: Option<Option<String>>,
    pub run_count: Option<u32>,
    pub latest_output: Option<String>,
    pub review_status: Option<ReviewStatus>,
    pub review_result: Option<serde_json::Value>,
    pub auditor_state: Option<AuditorState>,
    pub completed_at: Option<DateTime<Utc>>,
    pub append_log: Vec<LogEntry>,
}

impl TaskPatch {
    pub fn log(entry: LogEntry) -> Self {
        Self {
            append_log: vec![entry],
            ..Self::default()
        }
    }

    pub fn expecting(mut self, stage: PipelineStage) -> Self {
        self.expected_stage = Some(stage);
        self
    }

    /// Same patch with every field dropped except the log entries. The stage
    /// precondition goes too: an observation walk runs ahead of the record.
    pub fn log_only(&self) -> Self {
        Self {
            append_log: self.append_log.clone(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pipeline_type.is_none()
            && self.pipeline_stage.is_none()
            && self.routed_model.is_none()
            && self.compiled_prompt.is_none()
            && self.agent_context.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.claimed_by.is_none()
            && self.run_count.is_none()
            && self.latest_output.is_none()
            && self.review_status.is_none()
            && self.review_result.is_none()
            && self.auditor_state.is_none()
            && self.completed_at.is_none()
            && self.append_log.is_empty()
    }

    /// Whether this patch may be written to `task` as stored.
    pub fn check(&self, task: &Task) -> Result<(), StoreError> {
        if task.pipeline_stage.is_terminal() {
            return Err(StoreError::Terminal {
                id: task.id,
                stage: task.pipeline_stage.clone(),
            });
        }
        match &self.expected_stage {
            Some(expected) if *expected != task.pipeline_stage => Err(StoreError::StageMismatch {
                id: task.id,
                expected: expected.clone(),
                found: task.pipeline_stage.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Apply to an in-memory task. Used by stores and observation shadows alike.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(v) = &self.pipeline_type {
            task.pipeline_type = Some(v.clone());
        }
        if let Some(v) = &self.pipeline_stage {
            task.pipeline_stage = v.clone();
        }
        if let Some(v) = &self.routed_model {
            task.routed_model = Some(v.clone());
        }
        if let Some(v) = &self.compiled_prompt {
            task.compiled_prompt = Some(v.clone());
        }
        if let Some(v) = &self.agent_context {
            task.agent_context = Some(v.clone());
        }
        if let Some(v) = &self.description {
            task.description = Some(v.clone());
        }
        if let Some(v) = self.status {
            task.status = v;
        }
        if let Some(v) = &self.claimed_by {
            task.claimed_by = v.clone();
        }
        if let Some(v) = self.run_count {
            task.run_count = v;
        }
        if let Some(v) = &self.latest_output {
            task.latest_output = Some(v.clone());
        }
        if let Some(v) = self.review_status {
            task.review_status = Some(v);
        }
        if let Some(v) = &self.review_result {
            task.review_result = Some(v.clone());
        }
        if let Some(v) = &self.auditor_state {
            task.state_data.auditor = Some(v.clone());
        }
        if let Some(v) = self.completed_at {
            task.completed_at = Some(v);
        }
        for entry in &self.append_log {
            task.pipeline_log = pipeline_log::append(&task.pipeline_log, entry.clone());
        }
        task.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Task, StoreError>;

    /// Insert or replace a task, returning its id.
    async fn insert(&self, task: Task) -> Uuid;

    /// Apply `patch` atomically and return the updated task. Fails with a
    /// conflict (see [`StoreError::is_conflict`]) when [`TaskPatch::check`]
    /// does not hold for the stored task.
    async fn apply(&self, id: Uuid, patch: TaskPatch) -> Result<Task, StoreError>;
}

/// Completed work on a board, for full-mode context.
#[async_trait]
pub trait TaskHistory: Send + Sync {
    async fn recent_completed(
        &self,
        board_id: &str,
        exclude: Uuid,
        limit: usize,
    ) -> Recoverable<Vec<SiblingSummary>>;
}

// ---------------------------------------------------------------------------
// InMemoryTaskStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, id: Uuid) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn insert(&self, task: Task) -> Uuid {
        let id = task.id;
        self.tasks.write().await.insert(id, task);
        id
    }

    async fn apply(&self, id: Uuid, patch: TaskPatch) -> Result<Task, StoreError> {
        let mut guard = self.tasks.write().await;
        let task = guard.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.check(task)?;
        patch.apply_to(task);
        Ok(task.clone())
    }
}

#[async_trait]
impl TaskHistory for InMemoryTaskStore {
    async fn recent_completed(
        &self,
        board_id: &str,
        exclude: Uuid,
        limit: usize,
    ) -> Recoverable<Vec<SiblingSummary>> {
        if board_id.is_empty() {
            return Err(RecoverableError::new("task_history", "empty board id"));
        }
        let guard = self.tasks.read().await;
        let mut done: Vec<SiblingSummary> = guard
            .values()
            .filter(|t| t.id != exclude)
            .filter(|t| t.board.as_ref().is_some_and(|b| b.id == board_id))
            .filter_map(|t| {
                let completed_at = t.completed_at?;
                let finished =
                    t.pipeline_stage == PipelineStage::Completed || t.status == TaskStatus::Done;
                finished.then(|| SiblingSummary {
                    id: t.id,
                    name: t.name.clone(),
                    model: t.routed_model.clone(),
                    pipeline_type: t.pipeline_type.clone(),
                    completed_at,
                })
            })
            .collect();
        done.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        done.truncate(limit);
        Ok(done)
    }
}
