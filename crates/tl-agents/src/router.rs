//! Model selection and prompt rendering for a context-ready task.
//!
//! Precedence: an explicit user override, then the planning pin, then the
//! pipeline type's model tier (with fallback tiers and the default model).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tl_core::config::PipelineConfig;
use tl_core::types::Task;
use tl_intelligence::availability::AvailabilityOracle;
use tl_intelligence::context_compiler::ContextBundle;
use tl_intelligence::model_tiers::{ModelTierResolver, ResolutionSource, TierResolution};

use crate::prompts::{generic_prompt, PromptRegistry};

pub const PLANNING_TYPE: &str = "planning";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    UserOverride,
    PlanningPin,
    Tier,
    FallbackTier,
    Default,
}

impl ModelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserOverride => "user_override",
            Self::PlanningPin => "planning_pin",
            Self::Tier => "tier",
            Self::FallbackTier => "fallback_tier",
            Self::Default => "default",
        }
    }
}

impl From<ResolutionSource> for ModelSource {
    fn from(source: ResolutionSource) -> Self {
        match source {
            ResolutionSource::Tier => Self::Tier,
            ResolutionSource::FallbackTier => Self::FallbackTier,
            ResolutionSource::Default => Self::Default,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub model: String,
    pub model_source: ModelSource,
    /// Present only when the model came from tier resolution.
    pub tier: Option<TierResolution>,
    pub prompt: String,
    pub prompt_length: usize,
    /// `None` when the generic prompt was used.
    pub template_used: Option<String>,
}

/// Planning tasks: tagged `planning`, named `plan: ...` / `[plan] ...`, or
/// already classified as the planning type.
pub fn is_planning(task: &Task) -> bool {
    if task.has_tag(PLANNING_TYPE) || task.pipeline_type.as_deref() == Some(PLANNING_TYPE) {
        return true;
    }
    let name = task.name.trim_start().to_lowercase();
    name.starts_with("plan:") || name.starts_with("[plan]")
}

pub struct Router {
    config: Arc<PipelineConfig>,
    resolver: ModelTierResolver,
    prompts: PromptRegistry,
}

impl Router {
    pub fn new(config: Arc<PipelineConfig>, oracle: Arc<dyn AvailabilityOracle>) -> Self {
        let prompts = PromptRegistry::from_config(&config);
        Self::with_prompts(config, oracle, prompts)
    }

    pub fn with_prompts(
        config: Arc<PipelineConfig>,
        oracle: Arc<dyn AvailabilityOracle>,
        prompts: PromptRegistry,
    ) -> Self {
        Self {
            resolver: ModelTierResolver::new(&config, oracle),
            config,
            prompts,
        }
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub async fn select_model(&self, task: &Task) -> (String, ModelSource, Option<TierResolution>) {
        if let Some(model) = task.model_override.as_deref().map(str::trim) {
            if !model.is_empty() {
                return (model.to_string(), ModelSource::UserOverride, None);
            }
        }
        if is_planning(task) {
            return (self.config.planning_model.clone(), ModelSource::PlanningPin, None);
        }

        let tier = task
            .pipeline_type
            .as_deref()
            .and_then(|pt| self.config.pipeline_type(pt))
            .map(|pt| pt.model_tier.clone());
        let Some(tier) = tier else {
            warn!(
                task_id = %task.id,
                pipeline_type = ?task.pipeline_type,
                "no pipeline type config for routing; using default model"
            );
            return (self.resolver.default_model().to_string(), ModelSource::Default, None);
        };

        let resolution = self.resolver.resolve(&tier).await;
        (resolution.model.clone(), resolution.source.into(), Some(resolution))
    }

    /// Render the pipeline type's template, or the generic prompt when the
    /// type has none, the template is missing, or rendering fails.
    pub fn render_prompt(&self, task: &Task, bundle: &ContextBundle) -> (String, Option<String>) {
        let template = task
            .pipeline_type
            .as_deref()
            .and_then(|pt| self.config.pipeline_type(pt))
            .and_then(|pt| pt.template.clone());

        if let Some(name) = template {
            match self.prompts.render(&name, bundle) {
                Ok(prompt) => return (prompt, Some(name)),
                Err(e) => {
                    warn!(task_id = %task.id, template = %name, error = %e, "falling back to generic prompt");
                }
            }
        }
        (generic_prompt(task, self.config.context.description_limit), None)
    }

    pub async fn route(&self, task: &Task, bundle: &ContextBundle) -> RouteDecision {
        let (model, model_source, tier) = self.select_model(task).await;
        let (prompt, template_used) = self.render_prompt(task, bundle);
        debug!(
            task_id = %task.id,
            model = %model,
            source = model_source.as_str(),
            template = ?template_used,
            "task routed"
        );
        RouteDecision {
            prompt_length: prompt.chars().count(),
            model,
            model_source,
            tier,
            prompt,
            template_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_detection() {
        assert!(is_planning(&Task::new("Plan: Q3 migration")));
        assert!(is_planning(&Task::new("[PLAN] onboarding")));
        assert!(is_planning(&Task::new("x").with_tags(["Planning"])));
        let mut typed = Task::new("x");
        typed.pipeline_type = Some("planning".into());
        assert!(is_planning(&typed));
        assert!(!is_planning(&Task::new("Planet names")));
    }
}
