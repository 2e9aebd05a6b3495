use std::path::Path;

use tl_core::config::PipelineConfig;

use super::load_config;

pub fn show(config: Option<&Path>) -> anyhow::Result<()> {
    let handle = load_config(config)?;
    print!("{}", handle.snapshot().to_toml()?);
    Ok(())
}

/// Hard errors fail the command; warnings are listed and the check passes.
pub fn check(config: Option<&Path>) -> anyhow::Result<()> {
    let handle = load_config(config)?;
    let source = handle
        .source()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| format!("{} (defaults)", PipelineConfig::default_path().display()));
    let warnings = handle.snapshot().validate_warnings();

    println!("config OK: {source}");
    for warning in &warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::write_config;

    #[test]
    fn check_rejects_unknown_default_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "default_pipeline = \"nope\"\n");
        let err = check(Some(path.as_path())).unwrap_err();
        assert!(format!("{err:#}").contains("default_pipeline 'nope'"));
    }

    #[test]
    fn check_accepts_dangling_tier_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "[model_tiers.fast]\nmodels = [\"m\"]\nfallback = \"missing\"\n",
        );
        assert!(check(Some(path.as_path())).is_ok());
        let cfg = load_config(Some(path.as_path())).unwrap().snapshot();
        assert!(cfg
            .validate_warnings()
            .iter()
            .any(|w| w.contains("falls back to unknown tier 'missing'")));
    }

    #[test]
    fn show_round_trips_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "");
        assert!(show(Some(path.as_path())).is_ok());
    }
}
