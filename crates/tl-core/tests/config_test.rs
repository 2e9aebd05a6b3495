use tl_core::config::{ConfigHandle, ContextMode, PipelineConfig};

#[test]
fn default_config() {
    let cfg = PipelineConfig::default();
    assert_eq!(cfg.default_pipeline, "feature");
    assert!(!cfg.observation_mode);
    assert_eq!(cfg.rate_limit_window_secs, 7200);
    assert_eq!(cfg.context.description_limit, 2000);
    assert_eq!(cfg.context.sibling_limit, 10);
    assert_eq!(cfg.review.validation_timeout_secs, 60);
    assert_eq!(cfg.auditor.history_limit, 14);
    assert_eq!(cfg.auditor.pass_score, 85);
    assert_eq!(cfg.auditor.human_score, 50);
    assert!(cfg.pipeline_type("bug-fix").is_some());
    assert!(cfg.model_tiers.contains_key("standard"));
    cfg.validate().expect("default config validates");
    assert!(cfg.validate_warnings().is_empty());
}

#[test]
fn config_roundtrip() {
    let cfg = PipelineConfig::default();
    let toml_str = cfg.to_toml().expect("serialize to toml");
    assert!(toml_str.contains("bug-fix"));

    let parsed = PipelineConfig::from_toml_str(&toml_str).expect("parse toml back");
    assert_eq!(parsed.default_pipeline, cfg.default_pipeline);
    assert_eq!(parsed.pipeline_types.len(), cfg.pipeline_types.len());
    assert_eq!(
        parsed.pipeline_type("research").unwrap().context_mode,
        ContextMode::RetrievalAugmented
    );
}

#[test]
fn config_partial_toml() {
    let partial = r#"
default_pipeline = "chore"
observation_mode = true

[[pipeline_types]]
name = "chore"
context_mode = "manifest"

[[pipeline_types]]
name = "bug-fix"
model_tier = "fast"
template = "bug_fix"

[pipeline_types.matching]
tags = ["bug"]
"#;
    let cfg = PipelineConfig::from_toml_str(partial).expect("parse partial");
    assert!(cfg.observation_mode);
    assert_eq!(cfg.pipeline_types.len(), 2);
    assert_eq!(cfg.pipeline_types[0].model_tier, "standard");
    assert_eq!(cfg.pipeline_types[0].context_mode, ContextMode::ManifestEnriched);
    assert_eq!(cfg.pipeline_types[1].matching.tags, vec!["bug".to_string()]);
    // defaults fill in the rest
    assert_eq!(cfg.review.output_truncate, 1000);
    assert!(cfg.model_tiers.contains_key("premium"));
}

#[test]
fn unknown_default_pipeline_fails_validation() {
    let mut cfg = PipelineConfig::default();
    cfg.default_pipeline = "does-not-exist".to_string();
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("default_pipeline"));
}

#[test]
fn duplicate_pipeline_type_fails_validation() {
    let mut cfg = PipelineConfig::default();
    let dup = cfg.pipeline_types[0].clone();
    cfg.pipeline_types.push(dup);
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn dangling_tier_is_a_warning_not_an_error() {
    let mut cfg = PipelineConfig::default();
    cfg.pipeline_types[0].model_tier = "galactic".into();
    cfg.model_tiers.get_mut("fast").unwrap().fallback = Some("nowhere".into());
    cfg.validate().expect("still valid");
    let warnings = cfg.validate_warnings();
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().any(|w| w.contains("galactic")));
    assert!(warnings.iter().any(|w| w.contains("nowhere")));
}

#[test]
fn handle_reload_picks_up_changes_and_keeps_old_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(&path, "observation_mode = false\n").unwrap();

    let handle = ConfigHandle::from_path(&path).unwrap();
    assert!(!handle.snapshot().observation_mode);

    std::fs::write(&path, "observation_mode = true\n").unwrap();
    handle.reload().unwrap();
    assert!(handle.snapshot().observation_mode);

    std::fs::write(&path, "observation_mode = [oops").unwrap();
    assert!(handle.reload().is_err());
    assert!(handle.snapshot().observation_mode);
}

#[test]
fn handle_replace_swaps_snapshot() {
    let handle = ConfigHandle::new(PipelineConfig::default());
    let before = handle.snapshot();
    let mut next = PipelineConfig::default();
    next.default_model = "local-model".into();
    handle.replace(next);
    assert_eq!(before.default_model, "claude-sonnet-4-5");
    assert_eq!(handle.snapshot().default_model, "local-model");
}
