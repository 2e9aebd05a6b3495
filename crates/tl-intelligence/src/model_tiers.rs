//! Tiered model selection with fallback and rate-limit awareness.
//!
//! A tier is an ordered candidate list plus an optional fallback tier. The
//! resolver takes the first candidate with no recent rate-limit report,
//! otherwise walks the fallback chain, otherwise returns the configured
//! default model. Unknown tier names behave as empty tiers, and a visited
//! set stops cyclic fallback chains.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tl_core::config::{ModelTierConfig, PipelineConfig};
use tl_core::error::RecoverExt;
use tl_telemetry::metrics::{global_metrics, MODEL_RESOLUTIONS};

use crate::availability::AvailabilityOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Found in the requested tier.
    Tier,
    /// Found in a tier reached through the fallback chain.
    FallbackTier,
    /// Tiers exhausted; the hardcoded default model.
    Default,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier => "tier",
            Self::FallbackTier => "fallback_tier",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierResolution {
    pub model: String,
    pub requested_tier: String,
    /// Tier that supplied the model; `None` when the default was used.
    pub resolved_tier: Option<String>,
    pub source: ResolutionSource,
    /// Candidates passed over because they were rate-limited.
    pub skipped: Vec<String>,
}

pub struct ModelTierResolver {
    tiers: BTreeMap<String, ModelTierConfig>,
    default_model: String,
    window: chrono::Duration,
    oracle: Arc<dyn AvailabilityOracle>,
}

impl ModelTierResolver {
    pub fn new(config: &PipelineConfig, oracle: Arc<dyn AvailabilityOracle>) -> Self {
        Self {
            tiers: config.model_tiers.clone(),
            default_model: config.default_model.clone(),
            window: config.rate_limit_window(),
            oracle,
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// A model is available unless it was rate-limited within the window.
    /// Oracle failures count as "no report".
    pub async fn is_available(&self, model: &str) -> bool {
        let last = self
            .oracle
            .last_rate_limited(model)
            .await
            .or_fallback("model availability", None);
        match last {
            Some(at) => Utc::now().signed_duration_since(at) > self.window,
            None => true,
        }
    }

    pub async fn resolve(&self, tier: &str) -> TierResolution {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut skipped = Vec::new();
        let mut current: Option<&str> = Some(tier);
        let mut depth = 0usize;

        while let Some(name) = current {
            if !visited.insert(name) {
                warn!(tier = name, requested = tier, "model tier fallback cycle");
                break;
            }
            let Some(cfg) = self.tiers.get(name) else {
                warn!(tier = name, requested = tier, "unknown model tier; treating as empty");
                break;
            };
            for model in &cfg.models {
                if self.is_available(model).await {
                    let source = if depth == 0 {
                        ResolutionSource::Tier
                    } else {
                        ResolutionSource::FallbackTier
                    };
                    debug!(tier = name, model = %model, source = source.as_str(), "model resolved");
                    return self.finish(tier, Some(name), model.clone(), source, skipped);
                }
                skipped.push(model.clone());
            }
            current = cfg.fallback.as_deref();
            depth += 1;
        }

        debug!(requested = tier, model = %self.default_model, "model tiers exhausted; using default");
        self.finish(
            tier,
            None,
            self.default_model.clone(),
            ResolutionSource::Default,
            skipped,
        )
    }

    fn finish(
        &self,
        requested: &str,
        resolved: Option<&str>,
        model: String,
        source: ResolutionSource,
        skipped: Vec<String>,
    ) -> TierResolution {
        global_metrics().increment_counter(
            MODEL_RESOLUTIONS,
            &[("tier", requested), ("outcome", source.as_str())],
        );
        TierResolution {
            model,
            requested_tier: requested.to_string(),
            resolved_tier: resolved.map(str::to_string),
            source,
            skipped,
        }
    }
}
