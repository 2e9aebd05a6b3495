//! Orchestrator -- drives a task through triage -> context -> route, one
//! stage per call.
//!
//! Every call re-reads the task and dispatches on its current stage, so
//! re-invoking a stage that already advanced is a no-op. Terminal stages are
//! checked before anything else. The executor picks the task up once it is
//! [`is_ready_for_execution`]; auto-review and the auditor take it from there.

use std::sync::{Arc, RwLock};

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tl_core::config::{ConfigError, ConfigHandle, PipelineConfig};
use tl_core::pipeline_log::LogEntry;
use tl_core::store::{StoreError, TaskHistory, TaskPatch, TaskStore};
use tl_core::types::{PipelineStage, Task};
use tl_intelligence::availability::{AvailabilityOracle, RateLimitLedger};
use tl_intelligence::classifier::Classifier;
use tl_intelligence::context_compiler::{ContextBundle, ContextCompiler};
use tl_intelligence::manifest::{FsManifestProvider, ManifestProvider, NoManifests};
use tl_intelligence::retrieval::{NoopVectorSearch, VectorSearch};
use tl_telemetry::metrics::{global_metrics, OBSERVATION_RUNS, STAGE_TRANSITIONS};

use crate::router::Router;

/// Upper bound on stage transitions per `process_to_completion` call.
pub const MAX_STAGE_ITERATIONS: usize = 5;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// External collaborators the stages read from.
#[derive(Clone)]
pub struct PipelineServices {
    pub store: Arc<dyn TaskStore>,
    pub history: Arc<dyn TaskHistory>,
    /// When unset, manifests come from `context.manifest_dir` if configured.
    pub manifests: Option<Arc<dyn ManifestProvider>>,
    pub search: Arc<dyn VectorSearch>,
    pub oracle: Arc<dyn AvailabilityOracle>,
}

impl PipelineServices {
    pub fn new(store: Arc<dyn TaskStore>, history: Arc<dyn TaskHistory>) -> Self {
        Self {
            store,
            history,
            manifests: None,
            search: Arc::new(NoopVectorSearch),
            oracle: Arc::new(RateLimitLedger::new()),
        }
    }

    pub fn with_manifests(mut self, manifests: Arc<dyn ManifestProvider>) -> Self {
        self.manifests = Some(manifests);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn VectorSearch>) -> Self {
        self.search = search;
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn AvailabilityOracle>) -> Self {
        self.oracle = oracle;
        self
    }
}

/// Components built from one config snapshot.
struct Stages {
    config: Arc<PipelineConfig>,
    classifier: Classifier,
    compiler: ContextCompiler,
    router: Router,
}

impl Stages {
    fn build(config: Arc<PipelineConfig>, services: &PipelineServices) -> Self {
        let manifests: Arc<dyn ManifestProvider> = match (&services.manifests, &config.context.manifest_dir) {
            (Some(provider), _) => Arc::clone(provider),
            (None, Some(dir)) => Arc::new(FsManifestProvider::new(
                dir.clone(),
                config.context.manifest_text_limit,
            )),
            (None, None) => Arc::new(NoManifests),
        };
        Self {
            classifier: Classifier::new(Arc::clone(&config)),
            compiler: ContextCompiler::new(
                Arc::clone(&config),
                manifests,
                Arc::clone(&services.search),
                Arc::clone(&services.history),
            ),
            router: Router::new(Arc::clone(&config), Arc::clone(&services.oracle)),
            config,
        }
    }
}

/// One stage's decision: where the task goes and the patch that gets it there.
struct StepOutcome {
    stage: PipelineStage,
    patch: TaskPatch,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: Arc<ConfigHandle>,
    services: PipelineServices,
    stages: RwLock<Arc<Stages>>,
}

impl Orchestrator {
    pub fn new(config: Arc<ConfigHandle>, services: PipelineServices) -> Self {
        let stages = Stages::build(config.snapshot(), &services);
        Self {
            config,
            services,
            stages: RwLock::new(Arc::new(stages)),
        }
    }

    pub fn config(&self) -> Arc<PipelineConfig> {
        Arc::clone(&self.current().config)
    }

    /// Re-read the config source and rebuild every stage component. On error
    /// the running components are kept.
    pub fn reload_config(&self) -> std::result::Result<Arc<PipelineConfig>, ConfigError> {
        let config = self.config.reload()?;
        self.rebuild(Arc::clone(&config));
        Ok(config)
    }

    /// Swap in a config programmatically.
    pub fn apply_config(&self, config: PipelineConfig) -> Arc<PipelineConfig> {
        let config = self.config.replace(config);
        self.rebuild(Arc::clone(&config));
        config
    }

    fn rebuild(&self, config: Arc<PipelineConfig>) {
        let stages = Arc::new(Stages::build(config, &self.services));
        let mut guard = self.stages.write().unwrap_or_else(|e| e.into_inner());
        *guard = stages;
    }

    fn current(&self) -> Arc<Stages> {
        let guard = self.stages.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Perform exactly one stage transition. Returns the new stage, or `None`
    /// when the current stage has no pipeline-owned work or the task moved
    /// (for instance was cancelled) while the stage ran.
    pub async fn process(&self, id: Uuid) -> Result<Option<PipelineStage>> {
        let task = self.services.store.get(id).await?;
        let stages = self.current();
        let Some(step) = self.step(&stages, &task).await else {
            return Ok(None);
        };
        let stage = step.stage.clone();
        Ok(self
            .commit(&stages, id, step.patch, &stage)
            .await?
            .map(|_| stage))
    }

    /// Call [`process`](Self::process) until no stage-owned work remains or
    /// [`MAX_STAGE_ITERATIONS`] transitions have run.
    ///
    /// In observation mode nothing but the log is persisted, so the walk
    /// follows a shadow copy of the task instead of the stored record.
    pub async fn process_to_completion(&self, id: Uuid) -> Result<PipelineStage> {
        let stages = self.current();
        let observing = stages.config.observation_mode;
        let mut shadow = self.services.store.get(id).await?;

        let mut transitions = 0;
        while transitions < MAX_STAGE_ITERATIONS {
            let Some(step) = self.step(&stages, &shadow).await else {
                break;
            };
            let stage = step.stage.clone();
            let mut next = shadow.clone();
            step.patch.apply_to(&mut next);
            match self.commit(&stages, id, step.patch, &stage).await? {
                Some(stored) => shadow = if observing { next } else { stored },
                None => return Ok(self.services.store.get(id).await?.pipeline_stage),
            }
            transitions += 1;
        }

        if transitions == MAX_STAGE_ITERATIONS && self.step_pending(&shadow) {
            warn!(
                task_id = %id,
                stage = %shadow.pipeline_stage,
                cap = MAX_STAGE_ITERATIONS,
                "stage iteration cap reached"
            );
        }
        Ok(shadow.pipeline_stage)
    }

    /// Executor acknowledgement: `routed` -> `executing`. Returns whether the
    /// task moved.
    pub async fn begin_execution(&self, id: Uuid) -> Result<bool> {
        let task = self.services.store.get(id).await?;
        if !is_ready_for_execution(&task) {
            warn!(task_id = %id, stage = %task.pipeline_stage, "task not ready for execution");
            return Ok(false);
        }
        let stages = self.current();
        let observing = stages.config.observation_mode;
        let patch = TaskPatch {
            pipeline_stage: Some(PipelineStage::Executing),
            append_log: vec![LogEntry::new(
                "execute",
                json!({ "model": task.routed_model }),
            )
            .observed(observing)],
            ..TaskPatch::default()
        }
        .expecting(PipelineStage::Routed);
        Ok(self
            .commit(&stages, id, patch, &PipelineStage::Executing)
            .await?
            .is_some())
    }

    /// Record an executor failure. Terminal tasks are left alone.
    pub async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool> {
        let task = self.services.store.get(id).await?;
        if task.pipeline_stage.is_terminal() {
            debug!(task_id = %id, stage = %task.pipeline_stage, "already terminal");
            return Ok(false);
        }
        let stages = self.current();
        let observing = stages.config.observation_mode;
        let patch = TaskPatch {
            pipeline_stage: Some(PipelineStage::Failed),
            append_log: vec![LogEntry::new(
                "failed",
                json!({ "reason": reason, "from": task.pipeline_stage }),
            )
            .observed(observing)],
            ..TaskPatch::default()
        }
        .expecting(task.pipeline_stage.clone());
        Ok(self
            .commit(&stages, id, patch, &PipelineStage::Failed)
            .await?
            .is_some())
    }

    fn step_pending(&self, task: &Task) -> bool {
        matches!(
            task.pipeline_stage,
            PipelineStage::Unstarted | PipelineStage::Triaged | PipelineStage::ContextReady
        )
    }

    async fn step(&self, stages: &Stages, task: &Task) -> Option<StepOutcome> {
        if task.pipeline_stage.is_terminal() {
            debug!(task_id = %task.id, stage = %task.pipeline_stage, "terminal; nothing to do");
            return None;
        }
        let outcome = match &task.pipeline_stage {
            PipelineStage::Unstarted => self.triage(stages, task),
            PipelineStage::Triaged => self.compile_context(stages, task).await,
            PipelineStage::ContextReady => self.route(stages, task).await,
            PipelineStage::Routed | PipelineStage::Executing => return None,
            PipelineStage::Unknown(raw) => {
                warn!(task_id = %task.id, stage = %raw, "unknown pipeline stage; skipping");
                return None;
            }
            PipelineStage::Completed | PipelineStage::Failed => return None,
        };
        Some(StepOutcome {
            patch: outcome.patch.expecting(task.pipeline_stage.clone()),
            ..outcome
        })
    }

    fn triage(&self, stages: &Stages, task: &Task) -> StepOutcome {
        let observing = stages.config.observation_mode;
        let result = stages.classifier.classify(task);
        let entry = LogEntry::new(
            "triage",
            json!({
                "pipeline_type": result.pipeline_type,
                "confidence": result.confidence,
                "votes": result.votes,
                "triaged_at": result.triaged_at,
            }),
        )
        .observed(observing);
        StepOutcome {
            stage: PipelineStage::Triaged,
            patch: TaskPatch {
                pipeline_type: Some(result.pipeline_type),
                pipeline_stage: Some(PipelineStage::Triaged),
                append_log: vec![entry],
                ..TaskPatch::default()
            },
        }
    }

    async fn compile_context(&self, stages: &Stages, task: &Task) -> StepOutcome {
        let observing = stages.config.observation_mode;
        let bundle = stages.compiler.compile(task).await;
        let entry = LogEntry::new(
            "context",
            json!({
                "mode": bundle.mode,
                "manifest_found": bundle.manifest.is_some(),
                "manifest_source": bundle.manifest.as_ref().map(|m| m.source.clone()),
                "retrieval_hits": bundle.retrieval.len(),
                "siblings": bundle.recent_siblings.len(),
            }),
        )
        .observed(observing);
        StepOutcome {
            stage: PipelineStage::ContextReady,
            patch: TaskPatch {
                agent_context: Some(bundle.to_value()),
                pipeline_stage: Some(PipelineStage::ContextReady),
                append_log: vec![entry],
                ..TaskPatch::default()
            },
        }
    }

    async fn route(&self, stages: &Stages, task: &Task) -> StepOutcome {
        let observing = stages.config.observation_mode;
        let bundle = match stored_bundle(task) {
            Some(bundle) => bundle,
            None => {
                warn!(task_id = %task.id, "no usable agent_context at route time; recompiling");
                stages.compiler.compile(task).await
            }
        };
        let decision = stages.router.route(task, &bundle).await;
        let entry = LogEntry::new(
            "route",
            json!({
                "model": decision.model,
                "model_source": decision.model_source,
                "prompt_length": decision.prompt_length,
                "template": decision.template_used,
            }),
        )
        .observed(observing);
        StepOutcome {
            stage: PipelineStage::Routed,
            patch: TaskPatch {
                routed_model: Some(decision.model),
                compiled_prompt: Some(decision.prompt),
                pipeline_stage: Some(PipelineStage::Routed),
                append_log: vec![entry],
                ..TaskPatch::default()
            },
        }
    }

    /// Persist a stage decision: the whole patch, or only its log entries in
    /// observation mode. `None` when the stored task no longer accepts it.
    async fn commit(
        &self,
        stages: &Stages,
        id: Uuid,
        patch: TaskPatch,
        stage: &PipelineStage,
    ) -> Result<Option<Task>> {
        let observing = stages.config.observation_mode;
        let patch = if observing { patch.log_only() } else { patch };
        let task = match self.services.store.apply(id, patch).await {
            Ok(task) => task,
            Err(e) if e.is_conflict() => {
                warn!(task_id = %id, stage = %stage, error = %e, "task changed while the stage ran; decision dropped");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if observing {
            global_metrics().increment_counter(OBSERVATION_RUNS, &[("stage", stage.as_str())]);
            info!(task_id = %id, stage = %stage, "observation: stage decision logged");
        } else {
            global_metrics().increment_counter(STAGE_TRANSITIONS, &[("stage", stage.as_str())]);
            info!(task_id = %id, stage = %stage, "stage advanced");
        }
        Ok(Some(task))
    }
}

fn stored_bundle(task: &Task) -> Option<ContextBundle> {
    let value = task.agent_context.clone()?;
    serde_json::from_value(value).ok()
}

/// Hand-off contract with the executor: routed, with a model and a prompt.
pub fn is_ready_for_execution(task: &Task) -> bool {
    task.pipeline_stage == PipelineStage::Routed
        && task.routed_model.as_deref().is_some_and(|m| !m.trim().is_empty())
        && task.compiled_prompt.as_deref().is_some_and(|p| !p.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_requires_model_and_prompt() {
        let mut task = Task::new("x");
        task.pipeline_stage = PipelineStage::Routed;
        assert!(!is_ready_for_execution(&task));
        task.routed_model = Some("m".into());
        assert!(!is_ready_for_execution(&task));
        task.compiled_prompt = Some("do it".into());
        assert!(is_ready_for_execution(&task));
        task.pipeline_stage = PipelineStage::Executing;
        assert!(!is_ready_for_execution(&task));
    }
}
