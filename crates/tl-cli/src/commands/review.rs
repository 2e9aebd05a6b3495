use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tl_agents::auto_review::AutoReviewer;
use tl_agents::notifications::InMemoryNotificationSink;
use tl_agents::validation::ShellCommandRunner;

use super::{load_config, print_json, TaskArgs, TaskFile};

pub async fn run(config: Option<&Path>, args: &TaskArgs, output: &Path) -> anyhow::Result<()> {
    let summary = review(config, args, output).await?;
    print_json(&summary)
}

async fn review(
    config: Option<&Path>,
    args: &TaskArgs,
    output_path: &Path,
) -> anyhow::Result<serde_json::Value> {
    let output = std::fs::read_to_string(output_path)
        .with_context(|| format!("reading executor output {}", output_path.display()))?;
    let handle = load_config(config)?;
    let file = TaskFile::open(&args.task).await?;
    let notifier = Arc::new(InMemoryNotificationSink::new());
    let reviewer = AutoReviewer::new(
        handle.snapshot(),
        file.store.clone(),
        Arc::new(ShellCommandRunner),
        notifier.clone(),
    );

    let Some(outcome) = reviewer.review(file.id, &output).await? else {
        anyhow::bail!("task {} is not routed or executing; nothing to review", file.id);
    };
    file.save(args.dry_run).await?;

    Ok(json!({
        "task_id": file.id,
        "outcome": outcome,
        "alerts": notifier.for_task(file.id),
    }))
}
