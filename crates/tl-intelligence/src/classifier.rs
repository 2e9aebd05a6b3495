//! Triage classifier: weighted voting over independent task signals.
//!
//! Sources, in priority order, with their fixed weights:
//!
//! | source            | weight | granularity                         |
//! |-------------------|--------|-------------------------------------|
//! | template override | 10     | first type listing the slug         |
//! | board default     | 5      | one mapping per board               |
//! | tag match         | 3      | one vote per type, not per tag      |
//! | name match        | 2      | one vote per type, not per pattern  |
//! | keyword match     | 1      | per type without a tag-match vote   |
//!
//! The non-override weights of a single type therefore sum to at most 10, so
//! an explicit template override is never outvoted; an exact tie is settled
//! by source priority, which the override always wins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tl_core::config::PipelineConfig;
use tl_core::types::Task;
use tl_telemetry::metrics::{global_metrics, CLASSIFIER_VOTES};

/// Keyword votes are skipped for descriptions longer than this.
pub const KEYWORD_DESCRIPTION_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteSource {
    TemplateOverride,
    BoardDefault,
    TagMatch,
    NameMatch,
    KeywordMatch,
    /// Synthetic vote cast when nothing else matched.
    Default,
}

impl VoteSource {
    pub fn weight(&self) -> u32 {
        match self {
            Self::TemplateOverride => 10,
            Self::BoardDefault => 5,
            Self::TagMatch => 3,
            Self::NameMatch => 2,
            Self::KeywordMatch => 1,
            Self::Default => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemplateOverride => "template_override",
            Self::BoardDefault => "board_default",
            Self::TagMatch => "tag_match",
            Self::NameMatch => "name_match",
            Self::KeywordMatch => "keyword_match",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub source: VoteSource,
    pub pipeline_type: String,
    pub weight: u32,
}

impl Vote {
    fn cast(source: VoteSource, pipeline_type: &str) -> Self {
        Self {
            source,
            pipeline_type: pipeline_type.to_string(),
            weight: source.weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub pipeline_type: String,
    /// Summed weight of the winning group.
    pub confidence: u32,
    pub votes: Vec<Vote>,
    pub triaged_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CompiledType {
    name: String,
    templates: Vec<String>,
    tags: Vec<String>,
    patterns: Vec<Regex>,
}

/// Assigns a pipeline type to a task. Deterministic for a given config.
#[derive(Debug)]
pub struct Classifier {
    config: Arc<PipelineConfig>,
    types: Vec<CompiledType>,
}

impl Classifier {
    /// Compile match rules once. Invalid name patterns are logged and skipped.
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        let types = config
            .pipeline_types
            .iter()
            .map(|pt| CompiledType {
                name: pt.name.clone(),
                templates: lowercase_all(&pt.matching.templates),
                tags: lowercase_all(&pt.matching.tags),
                patterns: pt
                    .matching
                    .name_patterns
                    .iter()
                    .filter_map(|p| match Regex::new(p) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!(
                                pipeline_type = %pt.name,
                                pattern = %p,
                                error = %e,
                                "invalid name pattern; treating as no match"
                            );
                            None
                        }
                    })
                    .collect(),
            })
            .collect();
        Self { config, types }
    }

    /// Gather votes from every source, in source-priority order and config
    /// order within a source.
    pub fn collect_votes(&self, task: &Task) -> Vec<Vote> {
        let mut votes = Vec::new();

        if let Some(slug) = task.template_slug.as_deref().map(str::trim) {
            let slug = slug.to_lowercase();
            if !slug.is_empty() {
                let hit = self
                    .types
                    .iter()
                    .find(|t| t.templates.contains(&slug))
                    .or_else(|| self.types.iter().find(|t| t.name.to_lowercase() == slug));
                if let Some(t) = hit {
                    votes.push(Vote::cast(VoteSource::TemplateOverride, &t.name));
                }
            }
        }

        if let Some(board) = &task.board {
            let mapped = self
                .config
                .board_defaults
                .get(&board.id)
                .or_else(|| self.config.board_defaults.get(&board.name));
            if let Some(pt) = mapped {
                if self.config.pipeline_type(pt).is_some() {
                    votes.push(Vote::cast(VoteSource::BoardDefault, pt));
                } else {
                    warn!(board = %board.name, pipeline_type = %pt, "board default names unknown pipeline type");
                }
            }
        }

        let task_tags: Vec<String> = task.tags.iter().map(|t| t.trim().to_lowercase()).collect();
        let mut tag_matched = vec![false; self.types.len()];
        for (i, t) in self.types.iter().enumerate() {
            if t.tags.iter().any(|tag| task_tags.contains(tag)) {
                tag_matched[i] = true;
                votes.push(Vote::cast(VoteSource::TagMatch, &t.name));
            }
        }

        for t in &self.types {
            if t.patterns.iter().any(|re| re.is_match(&task.name)) {
                votes.push(Vote::cast(VoteSource::NameMatch, &t.name));
            }
        }

        let description = task.description.as_deref().unwrap_or("");
        if description.chars().count() <= KEYWORD_DESCRIPTION_LIMIT {
            let text = format!("{} {}", task.name, description).to_lowercase();
            for (i, t) in self.types.iter().enumerate() {
                if tag_matched[i] {
                    continue;
                }
                if t.tags.iter().any(|tag| !tag.is_empty() && text.contains(tag.as_str())) {
                    votes.push(Vote::cast(VoteSource::KeywordMatch, &t.name));
                }
            }
        }

        if votes.is_empty() {
            votes.push(Vote::cast(VoteSource::Default, &self.config.default_pipeline));
        }
        votes
    }

    pub fn classify(&self, task: &Task) -> Classification {
        let votes = self.collect_votes(task);
        for vote in &votes {
            global_metrics().increment_counter(CLASSIFIER_VOTES, &[("source", vote.source.as_str())]);
            debug!(
                task_id = %task.id,
                source = vote.source.as_str(),
                pipeline_type = %vote.pipeline_type,
                weight = vote.weight,
                "classifier vote"
            );
        }
        let (pipeline_type, confidence) = tally(&votes)
            .unwrap_or_else(|| (self.config.default_pipeline.clone(), 0));
        Classification {
            pipeline_type,
            confidence,
            votes,
            triaged_at: Utc::now(),
        }
    }
}

/// Sum weights per pipeline type and pick the heaviest group. Groups are
/// ordered by first appearance, and only a strictly larger sum displaces an
/// earlier group, so ties go to the higher-priority source.
pub fn tally(votes: &[Vote]) -> Option<(String, u32)> {
    let mut groups: Vec<(&str, u32)> = Vec::new();
    for vote in votes {
        match groups.iter_mut().find(|(name, _)| *name == vote.pipeline_type) {
            Some((_, sum)) => *sum += vote.weight,
            None => groups.push((vote.pipeline_type.as_str(), vote.weight)),
        }
    }
    let mut best: Option<(&str, u32)> = None;
    for (name, sum) in groups {
        if best.map_or(true, |(_, top)| sum > top) {
            best = Some((name, sum));
        }
    }
    best.map(|(name, sum)| (name.to_string(), sum))
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.trim().to_lowercase()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
