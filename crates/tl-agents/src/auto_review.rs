//! Cheap, deterministic review of executor output.
//!
//! Rules run in order and the first match decides:
//!
//! 1. sent back too often -> human
//! 2. empty output -> requeue
//! 3. failure markers without success markers -> requeue
//! 4. validation command -> accept on success, requeue otherwise
//! 5. lightweight task with a substantial answer -> accept
//! 6. anything else -> human

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use tl_core::config::{PipelineConfig, ReviewConfig};
use tl_core::error::RecoverExt;
use tl_core::pipeline_log::LogEntry;
use tl_core::store::{TaskPatch, TaskStore};
use tl_core::text::truncate_with_ellipsis;
use tl_core::types::{PipelineStage, ReviewStatus, Task, TaskStatus};
use tl_telemetry::metrics::{global_metrics, AUTO_REVIEW_DECISIONS};

use crate::notifications::{HumanAlert, NotificationSink, EVENT_AUTO_REVIEW_HUMAN};
use crate::orchestrator::Result;
use crate::validation::CommandRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Accept,
    Requeue,
    Human,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Requeue => "requeue",
            Self::Human => "human",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRule {
    RunLimit,
    EmptyOutput,
    FailureMarkers,
    ValidationPassed,
    ValidationFailed,
    LightweightOutput,
    NoRuleMatched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoReviewOutcome {
    pub decision: ReviewDecision,
    pub reason: String,
    pub rule: ReviewRule,
}

impl AutoReviewOutcome {
    fn new(decision: ReviewDecision, rule: ReviewRule, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
            rule,
        }
    }
}

fn failure_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"❌|(?i:\berrors?\b|\bfail(s|ed|ure|ures)?\b)|[A-Z][a-z]+Error\b")
            .expect("static regex")
    })
}

fn success_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)✅|\bfixed\b").expect("static regex"))
}

/// Stages auto-review and the auditor act on: handed to, or running in, the
/// executor.
pub fn awaits_review(stage: &PipelineStage) -> bool {
    matches!(stage, PipelineStage::Routed | PipelineStage::Executing)
}

/// Failure language with no success language alongside it.
pub fn has_unresolved_failure(output: &str) -> bool {
    failure_marker().is_match(output) && !success_marker().is_match(output)
}

/// Directory validation runs in: the board's project path, else
/// `workspace_root/<board name>` when it exists, else the current directory.
pub fn project_dir(task: &Task, review: &ReviewConfig) -> PathBuf {
    let Some(board) = &task.board else {
        return PathBuf::from(".");
    };
    if let Some(path) = board.project_path.as_deref().filter(|p| !p.trim().is_empty()) {
        return PathBuf::from(path);
    }
    if let Some(root) = &review.workspace_root {
        let candidate = root.join(&board.name);
        if candidate.is_dir() {
            return candidate;
        }
    }
    PathBuf::from(".")
}

pub struct AutoReviewer {
    config: Arc<PipelineConfig>,
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn NotificationSink>,
}

impl AutoReviewer {
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            notifier,
        }
    }

    fn is_lightweight(&self, task: &Task) -> bool {
        let types = &self.config.review.lightweight_types;
        task.pipeline_type
            .as_deref()
            .is_some_and(|pt| types.iter().any(|t| t == pt))
            || types.iter().any(|t| task.has_tag(t))
    }

    pub async fn evaluate(&self, task: &Task, output: &str) -> AutoReviewOutcome {
        let review = &self.config.review;

        if task.run_count > review.max_runs_before_human {
            return AutoReviewOutcome::new(
                ReviewDecision::Human,
                ReviewRule::RunLimit,
                format!("task already re-run {} times", task.run_count),
            );
        }
        if output.trim().is_empty() {
            return AutoReviewOutcome::new(
                ReviewDecision::Requeue,
                ReviewRule::EmptyOutput,
                "executor produced no output",
            );
        }
        if has_unresolved_failure(output) {
            return AutoReviewOutcome::new(
                ReviewDecision::Requeue,
                ReviewRule::FailureMarkers,
                "output reports a failure",
            );
        }

        if let Some(command) = task.validation_command.as_deref().map(str::trim) {
            if !command.is_empty() {
                let dir = project_dir(task, review);
                let timeout = Duration::from_secs(review.validation_timeout_secs);
                return match self.runner.run(command, &dir, timeout).await {
                    Ok(out) if out.success => AutoReviewOutcome::new(
                        ReviewDecision::Accept,
                        ReviewRule::ValidationPassed,
                        format!("validation passed: `{command}`"),
                    ),
                    Ok(out) => AutoReviewOutcome::new(
                        ReviewDecision::Requeue,
                        ReviewRule::ValidationFailed,
                        format!(
                            "validation failed: `{command}` (exit {})\n{}",
                            out.exit_code.map_or("signal".to_string(), |c| c.to_string()),
                            truncate_with_ellipsis(&out.combined(), review.output_truncate)
                        ),
                    ),
                    Err(e) => {
                        warn!(task_id = %task.id, command, error = %e, "validation command could not run");
                        AutoReviewOutcome::new(
                            ReviewDecision::Requeue,
                            ReviewRule::ValidationFailed,
                            format!("validation failed: `{command}`: {e}"),
                        )
                    }
                };
            }
        }

        if self.is_lightweight(task) && output.chars().count() > review.lightweight_min_output {
            return AutoReviewOutcome::new(
                ReviewDecision::Accept,
                ReviewRule::LightweightOutput,
                "lightweight task with a substantial answer",
            );
        }

        AutoReviewOutcome::new(
            ReviewDecision::Human,
            ReviewRule::NoRuleMatched,
            "no automatic rule applies",
        )
    }

    /// Evaluate and persist the decision. `None` unless the task is routed or
    /// executing, or when it changed stage while validation ran.
    pub async fn review(&self, id: Uuid, output: &str) -> Result<Option<AutoReviewOutcome>> {
        let task = self.store.get(id).await?;
        if !awaits_review(&task.pipeline_stage) {
            warn!(task_id = %id, stage = %task.pipeline_stage, "auto-review skipped; task has not been executed");
            return Ok(None);
        }

        let outcome = self.evaluate(&task, output).await;
        let observing = self.config.observation_mode;
        let patch = self
            .patch_for(&task, output, &outcome, observing)
            .expecting(task.pipeline_stage.clone());
        let patch = if observing { patch.log_only() } else { patch };

        match self.store.apply(id, patch).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                warn!(task_id = %id, error = %e, "task changed during auto-review; decision dropped");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        if !observing && outcome.decision == ReviewDecision::Human {
            self.alert(&task, &outcome).await;
        }

        global_metrics().increment_counter(
            AUTO_REVIEW_DECISIONS,
            &[("decision", outcome.decision.as_str())],
        );
        info!(
            task_id = %id,
            decision = outcome.decision.as_str(),
            rule = ?outcome.rule,
            observation = observing,
            "auto-review decided"
        );
        Ok(Some(outcome))
    }

    fn patch_for(
        &self,
        task: &Task,
        output: &str,
        outcome: &AutoReviewOutcome,
        observing: bool,
    ) -> TaskPatch {
        let record = json!({
            "decision": outcome.decision,
            "rule": outcome.rule,
            "reason": outcome.reason,
            "reviewed_at": Utc::now(),
        });
        let mut patch = TaskPatch::log(LogEntry::new("auto_review", record.clone()).observed(observing));
        patch.latest_output = Some(output.to_string());
        patch.review_result = Some(record);

        match outcome.decision {
            ReviewDecision::Accept => {
                patch.pipeline_stage = Some(PipelineStage::Completed);
                patch.status = Some(TaskStatus::Done);
                patch.review_status = Some(ReviewStatus::Passed);
                patch.completed_at = Some(Utc::now());
            }
            ReviewDecision::Requeue => {
                patch.pipeline_stage = Some(PipelineStage::Executing);
                patch.status = Some(TaskStatus::InProgress);
                patch.review_status = Some(ReviewStatus::Failed);
                patch.run_count = Some(task.run_count.saturating_add(1));
                patch.claimed_by = Some(None);
            }
            ReviewDecision::Human => {
                patch.status = Some(TaskStatus::HumanReview);
                patch.review_status = Some(ReviewStatus::Pending);
            }
        }
        patch
    }

    async fn alert(&self, task: &Task, outcome: &AutoReviewOutcome) {
        let alert = HumanAlert::new(
            task.user_id.clone(),
            task.id,
            EVENT_AUTO_REVIEW_HUMAN,
            format!("Review needed: {}", task.name),
            outcome.reason.clone(),
        );
        self.notifier
            .notify_once(alert)
            .await
            .or_fallback("auto-review notification", false);
    }
}
