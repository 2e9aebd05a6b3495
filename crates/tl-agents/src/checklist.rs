//! Audit checklists, one per task-type bucket.
//!
//! A checklist names the weighted checks the auditor scores, the signals
//! that must all hold, and the signals whose absence produces a required fix.
//! Files live at `<checklist_dir>/<bucket>.toml`:
//!
//! ```toml
//! critical = ["executor_output"]
//!
//! [[checks]]
//! name = "dod_completeness"
//! weight = 40
//!
//! [[required]]
//! signal = "acceptance_criteria"
//! severity = "high"
//! fix = "Write acceptance criteria for '{task}'."
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tl_core::error::{Recoverable, RecoverableError};

use crate::auditor::{CheckKind, Signal};

#[derive(Debug, thiserror::Error)]
pub enum ChecklistError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("checklist '{0}' has no checks")]
    Empty(String),
}

impl From<ChecklistError> for RecoverableError {
    fn from(err: ChecklistError) -> Self {
        RecoverableError::new("checklist", err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSpec {
    pub name: CheckKind,
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredSignal {
    pub signal: Signal,
    pub severity: Severity,
    /// `{task}` and `{signal}` are substituted when the fix is emitted.
    pub fix: String,
}

impl RequiredSignal {
    fn new(signal: Signal, severity: Severity, fix: &str) -> Self {
        Self {
            signal,
            severity,
            fix: fix.to_string(),
        }
    }

    pub fn render_fix(&self, task_name: &str) -> String {
        self.fix
            .replace("{task}", task_name)
            .replace("{signal}", self.signal.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditChecklist {
    #[serde(default)]
    pub bucket: String,
    pub checks: Vec<CheckSpec>,
    #[serde(default)]
    pub critical: Vec<Signal>,
    #[serde(default)]
    pub required: Vec<RequiredSignal>,
}

impl AuditChecklist {
    pub fn from_toml_str(bucket: &str, text: &str) -> Result<Self, ChecklistError> {
        let mut checklist: AuditChecklist =
            toml::from_str(text).map_err(|e| ChecklistError::Parse(e.to_string()))?;
        if checklist.checks.is_empty() {
            return Err(ChecklistError::Empty(bucket.to_string()));
        }
        checklist.bucket = bucket.to_string();
        Ok(checklist)
    }

    pub fn max_score(&self) -> u32 {
        self.checks.iter().map(|c| c.weight).sum()
    }

    /// Built-in checklist for `bucket`. Unknown buckets get the default one.
    pub fn builtin(bucket: &str) -> Self {
        use Severity::*;
        use Signal::*;

        let checks = vec![
            CheckSpec { name: CheckKind::DodCompleteness, weight: 40 },
            CheckSpec { name: CheckKind::EvidenceQuality, weight: 30 },
            CheckSpec { name: CheckKind::PolicyCompliance, weight: 20 },
            CheckSpec { name: CheckKind::HandoffQuality, weight: 10 },
        ];
        let criteria = RequiredSignal::new(
            AcceptanceCriteria,
            High,
            "Add acceptance criteria to '{task}' so completion can be checked.",
        );
        let placeholders = RequiredSignal::new(
            NoPlaceholderLanguage,
            Medium,
            "Remove placeholder language (TODO, TBD) from the output of '{task}'.",
        );

        let (critical, required) = match bucket {
            "coding" => (
                vec![ExecutorOutput, ValidationEvidence],
                vec![
                    criteria,
                    RequiredSignal::new(
                        OutputFilesAccessible,
                        High,
                        "List the changed files for '{task}' and make sure they exist.",
                    ),
                    placeholders,
                ],
            ),
            "research" => (
                vec![ExecutorOutput, SourceLinks],
                vec![
                    RequiredSignal::new(
                        Summary,
                        Medium,
                        "Add a summary of findings (at least two lines) for '{task}'.",
                    ),
                    placeholders,
                ],
            ),
            "infra" => (
                vec![ExecutorOutput, RollbackPlan],
                vec![
                    criteria,
                    RequiredSignal::new(
                        RollbackPlan,
                        Critical,
                        "Document how to roll back the change made by '{task}'.",
                    ),
                ],
            ),
            "report" => (
                vec![ExecutorOutput],
                vec![RequiredSignal::new(
                    SourceLinks,
                    Medium,
                    "Cite the sources behind '{task}'.",
                )],
            ),
            _ => (vec![ExecutorOutput], Vec::new()),
        };

        Self {
            bucket: bucket.to_string(),
            checks,
            critical,
            required,
        }
    }
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChecklistLoader: Send + Sync {
    async fn load(&self, bucket: &str) -> Recoverable<AuditChecklist>;
}

/// Always the built-in checklists.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinChecklists;

#[async_trait]
impl ChecklistLoader for BuiltinChecklists {
    async fn load(&self, bucket: &str) -> Recoverable<AuditChecklist> {
        Ok(AuditChecklist::builtin(bucket))
    }
}

/// `<dir>/<bucket>.toml`, the built-in checklist when the file is absent.
/// Unreadable or invalid files are errors so the caller can log them.
#[derive(Debug, Clone)]
pub struct FsChecklistLoader {
    dir: PathBuf,
}

impl FsChecklistLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ChecklistLoader for FsChecklistLoader {
    async fn load(&self, bucket: &str) -> Recoverable<AuditChecklist> {
        let path = self.dir.join(format!("{bucket}.toml"));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(bucket, path = %path.display(), "no checklist file; using built-in");
            return Ok(AuditChecklist::builtin(bucket));
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ChecklistError::Io(format!("{}: {e}", path.display())))?;
        Ok(AuditChecklist::from_toml_str(bucket, &text)?)
    }
}
