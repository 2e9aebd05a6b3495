//! Integration tests for the auto-review rule engine, using real shell
//! validation commands in temporary project directories.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use tl_agents::auto_review::{AutoReviewer, ReviewDecision, ReviewRule};
use tl_agents::notifications::InMemoryNotificationSink;
use tl_agents::validation::{CommandOutput, CommandRunner, ShellCommandRunner, ValidationError};
use tl_core::config::PipelineConfig;
use tl_core::store::{InMemoryTaskStore, TaskPatch, TaskStore};
use tl_core::types::{PipelineStage, ReviewStatus, Task, TaskStatus};

// ===========================================================================
// Helpers
// ===========================================================================

struct Harness {
    store: Arc<InMemoryTaskStore>,
    notifier: Arc<InMemoryNotificationSink>,
    reviewer: AutoReviewer,
}

fn harness_with(config: PipelineConfig, runner: Arc<dyn CommandRunner>) -> Harness {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = Arc::new(InMemoryNotificationSink::new());
    let reviewer = AutoReviewer::new(Arc::new(config), store.clone(), runner, notifier.clone());
    Harness {
        store,
        notifier,
        reviewer,
    }
}

fn harness() -> Harness {
    harness_with(PipelineConfig::default(), Arc::new(ShellCommandRunner))
}

fn executing_task(name: &str) -> Task {
    let mut task = Task::new(name);
    task.pipeline_stage = PipelineStage::Executing;
    task.pipeline_type = Some("bug-fix".into());
    task.claimed_by = Some("agent-1".into());
    task
}

fn in_dir(mut task: Task, dir: &Path) -> Task {
    task = task.with_board("b1", "web");
    if let Some(board) = task.board.as_mut() {
        board.project_path = Some(dir.display().to_string());
    }
    task
}

/// Runner that can never start a process.
struct BrokenRunner;

#[async_trait]
impl CommandRunner for BrokenRunner {
    async fn run(
        &self,
        _command: &str,
        _cwd: &Path,
        _timeout: Duration,
    ) -> Result<CommandOutput, ValidationError> {
        Err(ValidationError::Spawn("no such shell".into()))
    }
}

/// Runner whose validation "passes", but the host cancels the task while it
/// runs.
struct CancelDuringValidation {
    store: Arc<InMemoryTaskStore>,
    id: Uuid,
}

#[async_trait]
impl CommandRunner for CancelDuringValidation {
    async fn run(
        &self,
        _command: &str,
        _cwd: &Path,
        _timeout: Duration,
    ) -> Result<CommandOutput, ValidationError> {
        let cancel = TaskPatch {
            pipeline_stage: Some(PipelineStage::Failed),
            ..TaskPatch::default()
        };
        self.store
            .apply(self.id, cancel)
            .await
            .map_err(|e| ValidationError::Spawn(e.to_string()))?;
        Ok(CommandOutput {
            success: true,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
        })
    }
}

// ===========================================================================
// Rule order
// ===========================================================================

#[tokio::test]
async fn test_empty_and_whitespace_output_requeue() {
    let h = harness();
    let task = executing_task("t");
    for output in ["", "   \n "] {
        let outcome = h.reviewer.evaluate(&task, output).await;
        assert_eq!(outcome.decision, ReviewDecision::Requeue);
        assert_eq!(outcome.rule, ReviewRule::EmptyOutput);
    }
}

#[tokio::test]
async fn test_failure_markers_without_success_requeue() {
    let h = harness();
    let task = executing_task("t");

    let failed = h.reviewer.evaluate(&task, "❌ failed").await;
    assert_eq!(failed.decision, ReviewDecision::Requeue);
    assert_eq!(failed.rule, ReviewRule::FailureMarkers);

    let recovered = h.reviewer.evaluate(&task, "❌ failed\n✅ fixed it").await;
    assert_ne!(recovered.decision, ReviewDecision::Requeue);
}

#[tokio::test]
async fn test_run_limit_defers_to_human_regardless_of_output() {
    let h = harness();
    let mut task = executing_task("t");
    task.run_count = 2;
    task.validation_command = Some("true".into());
    for output in ["", "❌ failed", "all done, tests pass"] {
        let outcome = h.reviewer.evaluate(&task, output).await;
        assert_eq!(outcome.decision, ReviewDecision::Human);
        assert_eq!(outcome.rule, ReviewRule::RunLimit);
    }
}

#[tokio::test]
async fn test_validation_true_accepts_false_requeues() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness();

    let mut task = in_dir(executing_task("t"), dir.path());
    task.validation_command = Some("true".into());
    let outcome = h.reviewer.evaluate(&task, "implemented the change").await;
    assert_eq!(outcome.decision, ReviewDecision::Accept);
    assert_eq!(outcome.rule, ReviewRule::ValidationPassed);
    assert!(outcome.reason.contains("validation passed"));

    task.validation_command = Some("false".into());
    let outcome = h.reviewer.evaluate(&task, "implemented the change").await;
    assert_eq!(outcome.decision, ReviewDecision::Requeue);
    assert_eq!(outcome.rule, ReviewRule::ValidationFailed);
    assert!(outcome.reason.contains("validation failed"));
}

#[tokio::test]
async fn test_validation_output_is_truncated_in_reason() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.review.output_truncate = 20;
    let h = harness_with(config, Arc::new(ShellCommandRunner));

    let mut task = in_dir(executing_task("t"), dir.path());
    task.validation_command = Some("printf 'x%.0s' $(seq 1 200); exit 1".into());
    let outcome = h.reviewer.evaluate(&task, "done").await;
    assert_eq!(outcome.decision, ReviewDecision::Requeue);
    assert!(outcome.reason.contains(&format!("{}...", "x".repeat(20))));
    assert!(!outcome.reason.contains(&"x".repeat(21)));
}

#[tokio::test]
async fn test_validation_runs_in_project_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Makefile"), "check:\n\ttrue\n").unwrap();
    let h = harness();

    let mut task = in_dir(executing_task("t"), dir.path());
    task.validation_command = Some("test -f Makefile".into());
    let outcome = h.reviewer.evaluate(&task, "done").await;
    assert_eq!(outcome.decision, ReviewDecision::Accept);
}

#[tokio::test]
async fn test_spawn_failure_is_failed_validation() {
    let h = harness_with(PipelineConfig::default(), Arc::new(BrokenRunner));
    let mut task = executing_task("t");
    task.validation_command = Some("cargo test".into());
    let outcome = h.reviewer.evaluate(&task, "done").await;
    assert_eq!(outcome.decision, ReviewDecision::Requeue);
    assert_eq!(outcome.rule, ReviewRule::ValidationFailed);
    assert!(outcome.reason.contains("no such shell"));
}

#[tokio::test]
async fn test_lightweight_types_accept_long_output() {
    let h = harness();
    let mut task = executing_task("Survey caching libraries");
    task.pipeline_type = Some("research".into());

    let outcome = h.reviewer.evaluate(&task, &"finding ".repeat(20)).await;
    assert_eq!(outcome.decision, ReviewDecision::Accept);
    assert_eq!(outcome.rule, ReviewRule::LightweightOutput);

    let outcome = h.reviewer.evaluate(&task, "short").await;
    assert_eq!(outcome.decision, ReviewDecision::Human);

    let mut tagged = executing_task("Tweak wording");
    tagged.tags.push("trivial".into());
    let outcome = h.reviewer.evaluate(&tagged, &"w".repeat(101)).await;
    assert_eq!(outcome.decision, ReviewDecision::Accept);
}

#[tokio::test]
async fn test_default_is_human() {
    let h = harness();
    let outcome = h.reviewer.evaluate(&executing_task("t"), "did things").await;
    assert_eq!(outcome.decision, ReviewDecision::Human);
    assert_eq!(outcome.rule, ReviewRule::NoRuleMatched);
}

// ===========================================================================
// Persistence
// ===========================================================================

#[tokio::test]
async fn test_review_persists_requeue() {
    let h = harness();
    let id = h.store.insert(executing_task("t")).await;

    let outcome = h.reviewer.review(id, "").await.unwrap().unwrap();
    assert_eq!(outcome.decision, ReviewDecision::Requeue);

    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.pipeline_stage, PipelineStage::Executing);
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.run_count, 1);
    assert!(task.claimed_by.is_none());
    assert_eq!(task.review_status, Some(ReviewStatus::Failed));
    assert_eq!(task.pipeline_log.last().unwrap().stage, "auto_review");
}

#[tokio::test]
async fn test_review_persists_accept() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness();
    let mut task = in_dir(executing_task("t"), dir.path());
    task.validation_command = Some("true".into());
    let id = h.store.insert(task).await;

    h.reviewer.review(id, "done").await.unwrap();
    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.pipeline_stage, PipelineStage::Completed);
    assert_eq!(task.status, TaskStatus::Done);
    assert!(task.completed_at.is_some());
    assert_eq!(task.latest_output.as_deref(), Some("done"));

    // terminal now
    assert!(h.reviewer.review(id, "again").await.unwrap().is_none());
}

#[tokio::test]
async fn test_human_deferral_notifies_once() {
    let h = harness();
    let mut task = executing_task("t");
    task.user_id = Some("u1".into());
    let id = h.store.insert(task).await;

    h.reviewer.review(id, "did things").await.unwrap();
    h.reviewer.review(id, "did more things").await.unwrap();

    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::HumanReview);
    assert_eq!(task.review_status, Some(ReviewStatus::Pending));
    assert_eq!(h.notifier.for_task(id).len(), 1);
}

#[tokio::test]
async fn test_unexecuted_task_is_not_reviewed() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness();
    let mut task = in_dir(Task::new("Write the onboarding guide"), dir.path());
    task.pipeline_type = Some("research".into());
    task.validation_command = Some("true".into());
    let id = h.store.insert(task).await;

    let long_answer = "a thorough answer ".repeat(10);
    assert!(h.reviewer.review(id, &long_answer).await.unwrap().is_none());

    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.pipeline_stage, PipelineStage::Unstarted);
    assert_eq!(task.status, TaskStatus::Backlog);
    assert!(task.pipeline_log.is_empty());
}

#[tokio::test]
async fn test_routed_task_is_reviewed() {
    let h = harness();
    let mut task = executing_task("t");
    task.pipeline_stage = PipelineStage::Routed;
    let id = h.store.insert(task).await;

    let outcome = h.reviewer.review(id, "").await.unwrap().unwrap();
    assert_eq!(outcome.decision, ReviewDecision::Requeue);
    assert_eq!(h.store.get(id).await.unwrap().pipeline_stage, PipelineStage::Executing);
}

#[tokio::test]
async fn test_cancel_during_validation_is_kept() {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = Arc::new(InMemoryNotificationSink::new());
    let mut task = executing_task("t");
    task.validation_command = Some("cargo test".into());
    let id = store.insert(task).await;
    let runner = Arc::new(CancelDuringValidation {
        store: store.clone(),
        id,
    });
    let reviewer = AutoReviewer::new(
        Arc::new(PipelineConfig::default()),
        store.clone(),
        runner,
        notifier.clone(),
    );

    assert!(reviewer.review(id, "done").await.unwrap().is_none());
    let task = store.get(id).await.unwrap();
    assert_eq!(task.pipeline_stage, PipelineStage::Failed);
    assert!(task.completed_at.is_none());
    assert!(task.pipeline_log.is_empty());
    assert!(notifier.is_empty());
}

#[tokio::test]
async fn test_observation_mode_logs_without_mutation() {
    let mut config = PipelineConfig::default();
    config.observation_mode = true;
    let h = harness_with(config, Arc::new(ShellCommandRunner));
    let id = h.store.insert(executing_task("t")).await;

    h.reviewer.review(id, "").await.unwrap();
    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.run_count, 0);
    assert!(task.review_status.is_none());
    assert!(task.pipeline_log[0].observation);
    assert!(h.notifier.is_empty());
}
