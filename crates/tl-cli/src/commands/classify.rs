use std::path::Path;

use tl_intelligence::classifier::{Classification, Classifier};

use super::{load_config, print_json, read_task};

/// Classify a task file without touching it.
pub async fn run(config: Option<&Path>, task_path: &Path) -> anyhow::Result<()> {
    let classification = classify_file(config, task_path)?;
    print_json(&serde_json::to_value(&classification)?)
}

fn classify_file(config: Option<&Path>, task_path: &Path) -> anyhow::Result<Classification> {
    let handle = load_config(config)?;
    let task = read_task(task_path)?;
    Ok(Classifier::new(handle.snapshot()).classify(&task))
}
