//! Integration tests for context compilation modes and their collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use tl_core::config::{ContextMode, PipelineConfig};
use tl_core::error::{Recoverable, RecoverableError};
use tl_core::store::{InMemoryTaskStore, TaskHistory, TaskStore};
use tl_core::types::{PipelineStage, SiblingSummary, Task};
use tl_core::text::AGENT_ACTIVITY_END;
use tl_intelligence::context_compiler::ContextCompiler;
use tl_intelligence::manifest::{FsManifestProvider, ManifestContent, NoManifests};
use tl_intelligence::retrieval::{SearchHit, VectorSearch};
use uuid::Uuid;

// ===========================================================================
// Mock collaborators
// ===========================================================================

/// Records each query and returns one canned hit.
#[derive(Default)]
struct RecordingSearch {
    calls: AtomicUsize,
    last_query: std::sync::Mutex<String>,
}

#[async_trait]
impl VectorSearch for RecordingSearch {
    async fn search(&self, query: &str, limit: usize) -> Recoverable<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = query.to_string();
        assert_eq!(limit, 5);
        Ok(vec![SearchHit {
            score: 0.9,
            content: "session handling notes".into(),
            source: "wiki".into(),
            project: Some("billing".into()),
        }])
    }
}

struct FailingSearch;

#[async_trait]
impl VectorSearch for FailingSearch {
    async fn search(&self, _query: &str, _limit: usize) -> Recoverable<Vec<SearchHit>> {
        Err(RecoverableError::new("vector_search", "embedding service unavailable"))
    }
}

struct FailingHistory;

#[async_trait]
impl TaskHistory for FailingHistory {
    async fn recent_completed(
        &self,
        _board_id: &str,
        _exclude: Uuid,
        _limit: usize,
    ) -> Recoverable<Vec<SiblingSummary>> {
        Err(RecoverableError::new("task_history", "db down"))
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

fn make_task(pipeline_type: &str) -> Task {
    let mut task = Task::new("Fix login timeout")
        .with_board("b1", "Billing API")
        .with_description("Sessions expire too early");
    task.pipeline_type = Some(pipeline_type.to_string());
    task
}

fn compiler(
    manifests: Arc<dyn tl_intelligence::manifest::ManifestProvider>,
    search: Arc<dyn VectorSearch>,
    history: Arc<dyn TaskHistory>,
) -> ContextCompiler {
    ContextCompiler::new(Arc::new(PipelineConfig::default()), manifests, search, history)
}

// ===========================================================================
// Modes
// ===========================================================================

#[tokio::test]
async fn test_minimal_mode_skips_external_lookups() {
    let search = Arc::new(RecordingSearch::default());
    let c = compiler(
        Arc::new(NoManifests),
        search.clone(),
        Arc::new(InMemoryTaskStore::new()),
    );

    let bundle = c.compile(&make_task("quick-fix")).await;
    assert_eq!(bundle.mode, ContextMode::Minimal);
    assert!(bundle.manifest.is_none());
    assert!(bundle.retrieval.is_empty());
    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    assert_eq!(bundle.board.as_ref().unwrap().name, "Billing API");
}

#[tokio::test]
async fn test_manifest_mode_uses_kebab_name_variant() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("billing-api.json"), r#"{"language": "rust"}"#).unwrap();
    let c = compiler(
        Arc::new(FsManifestProvider::new(dir.path(), 4000)),
        Arc::new(RecordingSearch::default()),
        Arc::new(InMemoryTaskStore::new()),
    );

    let bundle = c.compile(&make_task("bug-fix")).await;
    assert_eq!(bundle.mode, ContextMode::ManifestEnriched);
    let manifest = bundle.manifest.expect("manifest found");
    assert_eq!(manifest.project, "billing-api");
    assert!(matches!(manifest.content, ManifestContent::Structured { .. }));
    assert!(bundle.retrieval.is_empty());
}

#[tokio::test]
async fn test_project_tag_wins_over_name_variants() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("billing-api.json"), "{}").unwrap();
    std::fs::write(dir.path().join("payments.md"), "payments service").unwrap();
    let c = compiler(
        Arc::new(FsManifestProvider::new(dir.path(), 4000)),
        Arc::new(RecordingSearch::default()),
        Arc::new(InMemoryTaskStore::new()),
    );

    let mut task = make_task("bug-fix");
    task.tags.push("project:payments".into());
    let bundle = c.compile(&task).await;
    assert_eq!(bundle.manifest.unwrap().project, "payments");
}

#[tokio::test]
async fn test_retrieval_mode_queries_name_and_description() {
    let search = Arc::new(RecordingSearch::default());
    let c = compiler(
        Arc::new(NoManifests),
        search.clone(),
        Arc::new(InMemoryTaskStore::new()),
    );

    let bundle = c.compile(&make_task("research")).await;
    assert_eq!(bundle.mode, ContextMode::RetrievalAugmented);
    assert_eq!(bundle.retrieval.len(), 1);
    assert_eq!(
        *search.last_query.lock().unwrap(),
        "Fix login timeout Sessions expire too early"
    );
    assert!(bundle.recent_siblings.is_empty());
}

#[tokio::test]
async fn test_search_failure_yields_empty_results() {
    let c = compiler(
        Arc::new(NoManifests),
        Arc::new(FailingSearch),
        Arc::new(FailingHistory),
    );
    let bundle = c.compile(&make_task("feature")).await;
    assert_eq!(bundle.mode, ContextMode::Full);
    assert!(bundle.retrieval.is_empty());
    assert!(bundle.recent_siblings.is_empty());
}

#[tokio::test]
async fn test_full_mode_includes_completed_siblings() {
    let store = Arc::new(InMemoryTaskStore::new());
    let base = Utc::now();
    for i in 0..12 {
        let mut t = Task::new(format!("done-{i}")).with_board("b1", "Billing API");
        t.pipeline_stage = PipelineStage::Completed;
        t.completed_at = Some(base - chrono::Duration::minutes(i));
        t.routed_model = Some("claude-sonnet-4-5".into());
        store.insert(t).await;
    }
    let c = compiler(Arc::new(NoManifests), Arc::new(RecordingSearch::default()), store);

    let bundle = c.compile(&make_task("feature")).await;
    assert_eq!(bundle.recent_siblings.len(), 10);
    assert_eq!(bundle.recent_siblings[0].name, "done-0");
    assert_eq!(bundle.recent_siblings[0].model.as_deref(), Some("claude-sonnet-4-5"));
}

#[tokio::test]
async fn test_description_keeps_text_after_agent_activity() {
    let c = compiler(
        Arc::new(NoManifests),
        Arc::new(RecordingSearch::default()),
        Arc::new(InMemoryTaskStore::new()),
    );
    let mut task = make_task("quick-fix");
    task.description = Some(format!(
        "old agent chatter {AGENT_ACTIVITY_END} more noise {AGENT_ACTIVITY_END}\n  Real request  "
    ));
    let bundle = c.compile(&task).await;
    assert_eq!(bundle.task.description, "Real request");
}

#[tokio::test]
async fn test_unknown_pipeline_type_compiles_minimal() {
    let c = compiler(
        Arc::new(NoManifests),
        Arc::new(RecordingSearch::default()),
        Arc::new(InMemoryTaskStore::new()),
    );
    let bundle = c.compile(&make_task("nonexistent")).await;
    assert_eq!(bundle.mode, ContextMode::Minimal);
}
