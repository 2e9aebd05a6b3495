use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Pipeline configuration loaded from `~/.taskline/pipeline.toml`.
///
/// Read-only to the pipeline. Components take an `Arc<PipelineConfig>`
/// snapshot at construction; [`ConfigHandle`] owns reloading.
///
/// Plain values are declared before tables so the struct serializes back to
/// valid TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline type used when no classifier vote is cast.
    #[serde(default = "default_pipeline_name")]
    pub default_pipeline: String,
    /// When true every stage logs its decision without mutating task fields.
    #[serde(default)]
    pub observation_mode: bool,
    /// Model used when tier resolution runs out of candidates.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Model pinned for planning tasks, bypassing tiers.
    #[serde(default = "default_planning_model")]
    pub planning_model: String,
    /// A rate-limit report older than this no longer marks a model unavailable.
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
    #[serde(default = "default_pipeline_types")]
    pub pipeline_types: Vec<PipelineTypeConfig>,
    /// Board id or board name -> pipeline type.
    #[serde(default)]
    pub board_defaults: BTreeMap<String, String>,
    #[serde(default = "default_model_tiers")]
    pub model_tiers: BTreeMap<String, ModelTierConfig>,
    #[serde(default)]
    pub context: ContextConfig,
    /// Inline prompt templates keyed by template name.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub auditor: AuditorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_pipeline: default_pipeline_name(),
            observation_mode: false,
            default_model: default_model(),
            planning_model: default_planning_model(),
            rate_limit_window_secs: default_rate_limit_window(),
            templates_dir: None,
            pipeline_types: default_pipeline_types(),
            board_defaults: BTreeMap::new(),
            model_tiers: default_model_tiers(),
            context: ContextConfig::default(),
            templates: BTreeMap::new(),
            review: ReviewConfig::default(),
            auditor: AuditorConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from `~/.taskline/pipeline.toml`, falling back to defaults when
    /// the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Self::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: PipelineConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        for warning in cfg.validate_warnings() {
            warn!(%warning, "pipeline config");
        }
        Ok(cfg)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Hard errors: problems that leave the classifier without a defined answer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = BTreeSet::new();
        for pt in &self.pipeline_types {
            let name = pt.name.trim();
            if name.is_empty() {
                return Err(ConfigError::Validation(
                    "pipeline_types entries must have a non-empty name".to_string(),
                ));
            }
            if !names.insert(name.to_string()) {
                return Err(ConfigError::Validation(format!(
                    "pipeline_types contains duplicate type '{name}'"
                )));
            }
        }
        if !names.contains(self.default_pipeline.trim()) {
            return Err(ConfigError::Validation(format!(
                "default_pipeline '{}' is not a defined pipeline type",
                self.default_pipeline
            )));
        }
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "default_model must not be empty".to_string(),
            ));
        }
        self.auditor.validate()
    }

    /// Soft problems. Dangling tier references resolve to the default model
    /// at runtime, so they are reported rather than rejected.
    pub fn validate_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for pt in &self.pipeline_types {
            if !self.model_tiers.contains_key(&pt.model_tier) {
                warnings.push(format!(
                    "pipeline type '{}' uses unknown model tier '{}'",
                    pt.name, pt.model_tier
                ));
            }
        }
        for (name, tier) in &self.model_tiers {
            if let Some(fallback) = &tier.fallback {
                if !self.model_tiers.contains_key(fallback) {
                    warnings.push(format!(
                        "model tier '{name}' falls back to unknown tier '{fallback}'"
                    ));
                }
            }
        }
        for (board, pt) in &self.board_defaults {
            if self.pipeline_type(pt).is_none() {
                warnings.push(format!(
                    "board default '{board}' maps to unknown pipeline type '{pt}'"
                ));
            }
        }
        warnings
    }

    pub fn pipeline_type(&self, name: &str) -> Option<&PipelineTypeConfig> {
        self.pipeline_types.iter().find(|pt| pt.name == name)
    }

    pub fn rate_limit_window(&self) -> chrono::Duration {
        i64::try_from(self.rate_limit_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(|| chrono::Duration::days(365 * 100))
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskline")
            .join("pipeline.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Pipeline types
// ---------------------------------------------------------------------------

/// How much context the compiler assembles. Each mode includes the previous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    #[default]
    Minimal,
    #[serde(alias = "manifest")]
    ManifestEnriched,
    #[serde(alias = "rag")]
    RetrievalAugmented,
    Full,
}

impl ContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::ManifestEnriched => "manifest_enriched",
            Self::RetrievalAugmented => "retrieval_augmented",
            Self::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRules {
    /// Template slugs that pin a task to this type.
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Regular expressions tested against the task name.
    #[serde(default)]
    pub name_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTypeConfig {
    pub name: String,
    #[serde(default = "default_tier_name")]
    pub model_tier: String,
    #[serde(default)]
    pub context_mode: ContextMode,
    /// Named prompt template; the router falls back to a generic prompt
    /// when unset or missing.
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub matching: MatchRules,
}

impl PipelineTypeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_tier: default_tier_name(),
            context_mode: ContextMode::Minimal,
            template: None,
            matching: MatchRules::default(),
        }
    }

    fn with(
        name: &str,
        tier: &str,
        mode: ContextMode,
        template: Option<&str>,
        templates: &[&str],
        tags: &[&str],
        patterns: &[&str],
    ) -> Self {
        let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            name: name.to_string(),
            model_tier: tier.to_string(),
            context_mode: mode,
            template: template.map(str::to_string),
            matching: MatchRules {
                templates: owned(templates),
                tags: owned(tags),
                name_patterns: owned(patterns),
            },
        }
    }
}

fn default_pipeline_types() -> Vec<PipelineTypeConfig> {
    use ContextMode::*;
    vec![
        PipelineTypeConfig::with(
            "bug-fix",
            "standard",
            ManifestEnriched,
            Some("bug_fix"),
            &["bug-report"],
            &["bug", "defect", "regression"],
            &[r"(?i)^fix\b", r"(?i)\bcrash(es|ed)?\b"],
        ),
        PipelineTypeConfig::with(
            "feature",
            "standard",
            Full,
            Some("feature"),
            &["feature-request"],
            &["feature", "enhancement"],
            &[r"(?i)^(add|implement|support)\b"],
        ),
        PipelineTypeConfig::with(
            "research",
            "standard",
            RetrievalAugmented,
            Some("research"),
            &["research-spike"],
            &["research", "investigation", "spike"],
            &[r"(?i)^(research|investigate|evaluate)\b"],
        ),
        PipelineTypeConfig::with(
            "documentation",
            "fast",
            Minimal,
            None,
            &["docs"],
            &["docs", "documentation"],
            &[r"(?i)\b(readme|docs?)\b"],
        ),
        PipelineTypeConfig::with(
            "quick-fix",
            "fast",
            Minimal,
            None,
            &[],
            &["quick-fix", "typo", "trivial"],
            &[r"(?i)\btypo\b"],
        ),
        PipelineTypeConfig::with(
            "planning",
            "premium",
            Full,
            Some("planning"),
            &["plan"],
            &["planning", "epic"],
            &[r"(?i)^(plan:|\[plan\])"],
        ),
        PipelineTypeConfig::with(
            "infrastructure",
            "premium",
            ManifestEnriched,
            None,
            &[],
            &["infra", "devops", "deploy"],
            &[r"(?i)\b(deploy|terraform|kubernetes)\b"],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Model tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelTierConfig {
    /// Candidates in preference order.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub fallback: Option<String>,
}

fn default_model_tiers() -> BTreeMap<String, ModelTierConfig> {
    let tier = |models: &[&str], fallback: Option<&str>| ModelTierConfig {
        models: models.iter().map(|m| m.to_string()).collect(),
        fallback: fallback.map(str::to_string),
    };
    BTreeMap::from([
        (
            "premium".to_string(),
            tier(&["claude-opus-4-1", "gpt-5"], Some("standard")),
        ),
        (
            "standard".to_string(),
            tier(&["claude-sonnet-4-5", "gpt-5-mini"], Some("fast")),
        ),
        ("fast".to_string(), tier(&["claude-haiku-4-5"], None)),
    ])
}

fn default_pipeline_name() -> String {
    "feature".into()
}
fn default_model() -> String {
    "claude-sonnet-4-5".into()
}
fn default_planning_model() -> String {
    "claude-opus-4-1".into()
}
fn default_rate_limit_window() -> u64 {
    2 * 60 * 60
}
fn default_tier_name() -> String {
    "standard".into()
}

// ---------------------------------------------------------------------------
// Context compiler settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_description_limit")]
    pub description_limit: usize,
    #[serde(default = "default_manifest_text_limit")]
    pub manifest_text_limit: usize,
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,
    /// Characters of description used in the retrieval query.
    #[serde(default = "default_query_description_limit")]
    pub query_description_limit: usize,
    #[serde(default = "default_sibling_limit")]
    pub sibling_limit: usize,
    #[serde(default)]
    pub manifest_dir: Option<PathBuf>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            description_limit: default_description_limit(),
            manifest_text_limit: default_manifest_text_limit(),
            retrieval_limit: default_retrieval_limit(),
            query_description_limit: default_query_description_limit(),
            sibling_limit: default_sibling_limit(),
            manifest_dir: None,
        }
    }
}

fn default_description_limit() -> usize {
    2000
}
fn default_manifest_text_limit() -> usize {
    4000
}
fn default_retrieval_limit() -> usize {
    5
}
fn default_query_description_limit() -> usize {
    500
}
fn default_sibling_limit() -> usize {
    10
}

// ---------------------------------------------------------------------------
// Auto-review settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,
    /// Captured validation output kept in a requeue reason.
    #[serde(default = "default_output_truncate")]
    pub output_truncate: usize,
    /// Tasks that have been sent back more often than this go to a human.
    #[serde(default = "default_max_runs")]
    pub max_runs_before_human: u32,
    /// Pipeline types accepted on output length alone.
    #[serde(default = "default_lightweight_types")]
    pub lightweight_types: Vec<String>,
    #[serde(default = "default_lightweight_min_output")]
    pub lightweight_min_output: usize,
    /// Parent directory holding one checkout per board name.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            validation_timeout_secs: default_validation_timeout(),
            output_truncate: default_output_truncate(),
            max_runs_before_human: default_max_runs(),
            lightweight_types: default_lightweight_types(),
            lightweight_min_output: default_lightweight_min_output(),
            workspace_root: None,
        }
    }
}

fn default_validation_timeout() -> u64 {
    60
}
fn default_output_truncate() -> usize {
    1000
}
fn default_max_runs() -> u32 {
    1
}
fn default_lightweight_types() -> Vec<String> {
    ["research", "documentation", "quick-fix", "trivial"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_lightweight_min_output() -> usize {
    100
}

// ---------------------------------------------------------------------------
// Auditor settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditorConfig {
    /// Tags that name an audit bucket directly.
    #[serde(default = "default_auditable_tags")]
    pub auditable_tags: Vec<String>,
    /// FAIL_REWORK verdicts allowed before escalating to a human.
    #[serde(default = "default_max_rework_loops")]
    pub max_rework_loops: u32,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Move PASS tasks to done without a human.
    #[serde(default = "default_true")]
    pub auto_accept: bool,
    #[serde(default = "default_pass_score")]
    pub pass_score: u32,
    #[serde(default = "default_human_score")]
    pub human_score: u32,
    #[serde(default)]
    pub checklist_dir: Option<PathBuf>,
    /// Pipeline type -> bucket, consulted when no auditable tag is present.
    #[serde(default = "default_bucket_map")]
    pub bucket_map: BTreeMap<String, String>,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            auditable_tags: default_auditable_tags(),
            max_rework_loops: default_max_rework_loops(),
            history_limit: default_history_limit(),
            auto_accept: true,
            pass_score: default_pass_score(),
            human_score: default_human_score(),
            checklist_dir: None,
            bucket_map: default_bucket_map(),
        }
    }
}

impl AuditorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.human_score > self.pass_score {
            return Err(ConfigError::Validation(format!(
                "auditor.human_score ({}) must not exceed auditor.pass_score ({})",
                self.human_score, self.pass_score
            )));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Validation(
                "auditor.history_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_auditable_tags() -> Vec<String> {
    ["coding", "research", "infra", "report"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_rework_loops() -> u32 {
    3
}
fn default_history_limit() -> usize {
    14
}
fn default_pass_score() -> u32 {
    85
}
fn default_human_score() -> u32 {
    50
}
fn default_bucket_map() -> BTreeMap<String, String> {
    [
        ("bug-fix", "coding"),
        ("feature", "coding"),
        ("quick-fix", "coding"),
        ("research", "research"),
        ("documentation", "report"),
        ("infrastructure", "infra"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// ---------------------------------------------------------------------------
// ConfigHandle
// ---------------------------------------------------------------------------

/// Shared, explicitly reloadable configuration.
#[derive(Debug)]
pub struct ConfigHandle {
    source: Option<PathBuf>,
    current: RwLock<Arc<PipelineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            source: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = PipelineConfig::load_from(&path)?;
        Ok(Self {
            source: Some(path),
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn snapshot(&self) -> Arc<PipelineConfig> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Re-read the source file. On failure the previous config stays active.
    pub fn reload(&self) -> Result<Arc<PipelineConfig>, ConfigError> {
        let Some(path) = &self.source else {
            return Ok(self.snapshot());
        };
        let config = Arc::new(PipelineConfig::load_from(path)?);
        self.swap(Arc::clone(&config));
        info!(path = %path.display(), "pipeline config reloaded");
        Ok(config)
    }

    pub fn replace(&self, config: PipelineConfig) -> Arc<PipelineConfig> {
        let config = Arc::new(config);
        self.swap(Arc::clone(&config));
        config
    }

    fn swap(&self, config: Arc<PipelineConfig>) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = config;
    }
}
