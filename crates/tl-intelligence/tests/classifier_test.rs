//! Integration tests for the triage classifier against the default pipeline
//! types and hand-built configs.

use std::sync::Arc;

use tl_core::config::{PipelineConfig, PipelineTypeConfig};
use tl_core::types::Task;
use tl_intelligence::classifier::{Classifier, VoteSource};

// ===========================================================================
// Helpers
// ===========================================================================

fn default_classifier() -> Classifier {
    Classifier::new(Arc::new(PipelineConfig::default()))
}

fn config_with_types(types: Vec<PipelineTypeConfig>) -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.default_pipeline = types[0].name.clone();
    cfg.pipeline_types = types;
    cfg
}

fn make_task(name: &str, tags: &[&str]) -> Task {
    Task::new(name).with_tags(tags.iter().copied())
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[test]
fn test_bug_tag_yields_single_tag_vote() {
    let task = make_task("Login page broken", &["bug"]).with_board("b1", "Web");
    let result = default_classifier().classify(&task);

    assert_eq!(result.pipeline_type, "bug-fix");
    assert_eq!(result.confidence, 3);
    assert_eq!(result.votes.len(), 1);
    assert_eq!(result.votes[0].source, VoteSource::TagMatch);
    assert_eq!(result.votes[0].weight, 3);
}

#[test]
fn test_no_signal_uses_default_with_zero_weight() {
    let task = make_task("Something vague", &[]);
    let result = default_classifier().classify(&task);

    assert_eq!(result.pipeline_type, "feature");
    assert_eq!(result.confidence, 0);
    assert_eq!(result.votes.len(), 1);
    assert_eq!(result.votes[0].source, VoteSource::Default);
}

#[test]
fn test_template_override_beats_stacked_votes() {
    let mut cfg = PipelineConfig::default();
    cfg.board_defaults.insert("Product".into(), "feature".into());
    let classifier = Classifier::new(Arc::new(cfg));

    let mut task = make_task("Add export button", &["feature", "enhancement"])
        .with_board("b9", "Product")
        .with_description("feature feature feature enhancement");
    task.template_slug = Some("bug-report".into());

    // feature: board 5 + tag 3 + name 2 = 10; override ties and wins
    let result = classifier.classify(&task);
    assert_eq!(result.pipeline_type, "bug-fix");
    assert_eq!(result.confidence, 10);
    let feature_weight: u32 = result
        .votes
        .iter()
        .filter(|v| v.pipeline_type == "feature")
        .map(|v| v.weight)
        .sum();
    assert_eq!(feature_weight, 10);
}

#[test]
fn test_template_slug_matching_type_name() {
    let mut task = make_task("Quarterly", &[]);
    task.template_slug = Some("Research".into());
    let result = default_classifier().classify(&task);
    assert_eq!(result.pipeline_type, "research");
    assert_eq!(result.votes[0].source, VoteSource::TemplateOverride);
}

#[test]
fn test_board_default_by_id_before_name() {
    let mut cfg = PipelineConfig::default();
    cfg.board_defaults.insert("b1".into(), "research".into());
    cfg.board_defaults.insert("Docs Board".into(), "documentation".into());
    let classifier = Classifier::new(Arc::new(cfg));

    let task = make_task("Weekly thing", &[]).with_board("b1", "Docs Board");
    let result = classifier.classify(&task);
    assert_eq!(result.pipeline_type, "research");
    assert_eq!(result.confidence, 5);
}

#[test]
fn test_repeated_tags_count_once_per_type() {
    let task = make_task("Crash on save", &["bug", "defect", "regression", "BUG"]);
    let result = default_classifier().classify(&task);

    let tag_votes = result
        .votes
        .iter()
        .filter(|v| v.source == VoteSource::TagMatch && v.pipeline_type == "bug-fix")
        .count();
    assert_eq!(tag_votes, 1);
    // tag 3 + name 2 (crash pattern)
    assert_eq!(result.confidence, 5);
}

#[test]
fn test_keyword_vote_skipped_for_long_description() {
    let short = make_task("Look into caching", &[]).with_description("a research task");
    let result = default_classifier().classify(&short);
    assert_eq!(result.pipeline_type, "research");
    assert_eq!(result.votes[0].source, VoteSource::KeywordMatch);

    let long = make_task("Look into caching", &[])
        .with_description(format!("research {}", "x".repeat(1000)));
    let result = default_classifier().classify(&long);
    assert!(result
        .votes
        .iter()
        .all(|v| v.source != VoteSource::KeywordMatch));
}

#[test]
fn test_tie_goes_to_first_defined_type() {
    let mut first = PipelineTypeConfig::new("first");
    first.matching.tags = vec!["shared".into()];
    let mut second = PipelineTypeConfig::new("second");
    second.matching.tags = vec!["shared".into()];
    let classifier = Classifier::new(Arc::new(config_with_types(vec![first, second])));

    let result = classifier.classify(&make_task("x", &["shared"]));
    assert_eq!(result.pipeline_type, "first");
    assert_eq!(result.confidence, 3);
}

#[test]
fn test_invalid_pattern_is_no_match() {
    let mut broken = PipelineTypeConfig::new("broken");
    broken.matching.name_patterns = vec!["(unclosed".into(), "^ok$".into()];
    let fallback = PipelineTypeConfig::new("fallback");
    let mut cfg = config_with_types(vec![fallback, broken]);
    cfg.default_pipeline = "fallback".into();
    let classifier = Classifier::new(Arc::new(cfg));

    assert_eq!(classifier.classify(&make_task("(unclosed", &[])).pipeline_type, "fallback");
    assert_eq!(classifier.classify(&make_task("ok", &[])).pipeline_type, "broken");
}

#[test]
fn test_classification_is_deterministic() {
    let classifier = default_classifier();
    let task = make_task("Fix typo in README docs", &["docs"]).with_board("b1", "Web");
    let first = classifier.classify(&task);
    for _ in 0..10 {
        let again = classifier.classify(&task);
        assert_eq!(again.pipeline_type, first.pipeline_type);
        assert_eq!(again.votes, first.votes);
    }
}
