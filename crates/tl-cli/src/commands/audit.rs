use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tl_agents::auditor::Auditor;
use tl_agents::checklist::{BuiltinChecklists, ChecklistLoader, FsChecklistLoader};
use tl_agents::notifications::InMemoryNotificationSink;

use super::{load_config, print_json, TaskArgs, TaskFile};

pub async fn run(config: Option<&Path>, args: &TaskArgs, trigger: &str) -> anyhow::Result<()> {
    let summary = audit(config, args, trigger).await?;
    print_json(&summary)
}

async fn audit(
    config: Option<&Path>,
    args: &TaskArgs,
    trigger: &str,
) -> anyhow::Result<serde_json::Value> {
    let handle = load_config(config)?;
    let cfg = handle.snapshot();
    let checklists: Arc<dyn ChecklistLoader> = match &cfg.auditor.checklist_dir {
        Some(dir) => Arc::new(FsChecklistLoader::new(dir)),
        None => Arc::new(BuiltinChecklists),
    };
    let file = TaskFile::open(&args.task).await?;
    let notifier = Arc::new(InMemoryNotificationSink::new());
    let auditor = Auditor::new(cfg, file.store.clone(), checklists, notifier.clone());

    let Some(report) = auditor.audit(file.id, trigger).await? else {
        anyhow::bail!("task {} is not routed or executing; nothing to audit", file.id);
    };
    file.save(args.dry_run).await?;

    Ok(json!({
        "task_id": file.id,
        "report": report,
        "alerts": notifier.for_task(file.id),
    }))
}
