use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline_log::LogEntry;

// ---------------------------------------------------------------------------
// PipelineStage
// ---------------------------------------------------------------------------

/// Position of a task in the triage -> context -> route -> execute pipeline.
///
/// Stages serialize to their snake_case names. Values written by a host that
/// this crate does not recognise deserialize to [`PipelineStage::Unknown`] so
/// they can be reported instead of rejected; the pipeline itself never writes
/// an `Unknown` stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PipelineStage {
    #[default]
    Unstarted,
    Triaged,
    ContextReady,
    Routed,
    Executing,
    Completed,
    Failed,
    Unknown(String),
}

impl PipelineStage {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "unstarted" => Self::Unstarted,
            "triaged" => Self::Triaged,
            "context_ready" => Self::ContextReady,
            "routed" => Self::Routed,
            "executing" => Self::Executing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Triaged => "triaged",
            Self::ContextReady => "context_ready",
            Self::Routed => "routed",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown(raw) => raw.as_str(),
        }
    }

    /// Once terminal, the pipeline never touches the task again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Ordinal position in the forward stage order. `None` for unknown values.
    pub fn rank(&self) -> Option<u8> {
        match self {
            Self::Unstarted => Some(0),
            Self::Triaged => Some(1),
            Self::ContextReady => Some(2),
            Self::Routed => Some(3),
            Self::Executing => Some(4),
            Self::Completed | Self::Failed => Some(5),
            Self::Unknown(_) => None,
        }
    }
}

impl From<String> for PipelineStage {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<PipelineStage> for String {
    fn from(stage: PipelineStage) -> Self {
        stage.as_str().to_string()
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task status / review status
// ---------------------------------------------------------------------------

/// Board-level status of a task, owned by the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Backlog,
    UpNext,
    InProgress,
    InReview,
    HumanReview,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditVerdict {
    Pass,
    FailRework,
    NeedsHuman,
}

impl fmt::Display for AuditVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuditVerdict::Pass => "PASS",
            AuditVerdict::FailRework => "FAIL_REWORK",
            AuditVerdict::NeedsHuman => "NEEDS_HUMAN",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Board / dependency / sibling summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardRef {
    pub id: String,
    pub name: String,
    /// Checkout directory for the board's project, when known.
    #[serde(default)]
    pub project_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySummary {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub status: TaskStatus,
}

/// A recently completed task on the same board, used by full-mode context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiblingSummary {
    pub id: Uuid,
    pub name: String,
    pub model: Option<String>,
    pub pipeline_type: Option<String>,
    pub completed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Auditor state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditHistoryEntry {
    pub verdict: AuditVerdict,
    pub score: u32,
    pub trigger: String,
    pub at: DateTime<Utc>,
}

/// Persisted under `state_data.auditor`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditorState {
    #[serde(default)]
    pub last_verdict: Option<AuditVerdict>,
    #[serde(default)]
    pub last_score: Option<u32>,
    /// Incremented once per FAIL_REWORK verdict. Only a human resets it.
    #[serde(default)]
    pub rework_count: u32,
    #[serde(default)]
    pub last_audited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<AuditHistoryEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auditor: Option<AuditorState>,
    /// Host-owned keys the pipeline does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The subset of a work item the pipeline reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub board: Option<BoardRef>,
    /// Template the task was created from; an explicit classification hint.
    #[serde(default)]
    pub template_slug: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencySummary>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Number of times the task was sent back to execution.
    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
    #[serde(default)]
    pub latest_output: Option<String>,
    #[serde(default)]
    pub output_files: Vec<String>,

    // -- pipeline --
    #[serde(default)]
    pub pipeline_type: Option<String>,
    #[serde(default)]
    pub pipeline_stage: PipelineStage,
    #[serde(default)]
    pub pipeline_log: Vec<LogEntry>,
    #[serde(default)]
    pub routed_model: Option<String>,
    #[serde(default)]
    pub compiled_prompt: Option<String>,
    #[serde(default)]
    pub agent_context: Option<serde_json::Value>,
    #[serde(default)]
    pub validation_command: Option<String>,
    /// Model chosen explicitly by a user; always wins at routing time.
    #[serde(default)]
    pub model_override: Option<String>,

    // -- review --
    #[serde(default)]
    pub review_type: Option<String>,
    #[serde(default)]
    pub review_status: Option<ReviewStatus>,
    #[serde(default)]
    pub review_config: serde_json::Value,
    #[serde(default)]
    pub review_result: Option<serde_json::Value>,
    #[serde(default)]
    pub state_data: StateData,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            tags: Vec::new(),
            board: None,
            template_slug: None,
            dependencies: Vec::new(),
            status: TaskStatus::Backlog,
            claimed_by: None,
            user_id: None,
            run_count: 0,
            acceptance_criteria: None,
            latest_output: None,
            output_files: Vec::new(),
            pipeline_type: None,
            pipeline_stage: PipelineStage::Unstarted,
            pipeline_log: Vec::new(),
            routed_model: None,
            compiled_prompt: None,
            agent_context: None,
            validation_command: None,
            model_override: None,
            review_type: None,
            review_status: None,
            review_config: serde_json::Value::Null,
            review_result: None,
            state_data: StateData::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_board(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.board = Some(BoardRef {
            id: id.into(),
            name: name.into(),
            project_path: None,
        });
        self
    }

    /// Case-insensitive tag membership.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.trim().eq_ignore_ascii_case(tag))
    }

    /// Value of the first `prefix:value` style tag, e.g. `project:billing`.
    pub fn tag_value(&self, prefix: &str) -> Option<&str> {
        self.tags.iter().find_map(|t| {
            let (key, value) = t.split_once(':')?;
            let value = value.trim();
            (key.trim().eq_ignore_ascii_case(prefix) && !value.is_empty()).then_some(value)
        })
    }

    pub fn auditor_state(&self) -> AuditorState {
        self.state_data.auditor.clone().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
