use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tl_agents::orchestrator::{is_ready_for_execution, Orchestrator, PipelineServices};
use tl_core::types::PipelineStage;

use super::{load_config, print_json, TaskArgs, TaskFile};

pub async fn run(config: Option<&Path>, args: &TaskArgs, all: bool) -> anyhow::Result<()> {
    let summary = advance(config, args, all).await?;
    print_json(&summary)
}

async fn advance(config: Option<&Path>, args: &TaskArgs, all: bool) -> anyhow::Result<serde_json::Value> {
    let handle = Arc::new(load_config(config)?);
    let file = TaskFile::open(&args.task).await?;
    let services = PipelineServices::new(file.store.clone(), file.store.clone());
    let orchestrator = Orchestrator::new(handle, services);

    let stage = if all {
        Some(orchestrator.process_to_completion(file.id).await?)
    } else {
        orchestrator.process(file.id).await?
    };
    file.save(args.dry_run).await?;

    let task = file.current().await?;
    Ok(json!({
        "task_id": task.id,
        "advanced_to": stage.as_ref().map(PipelineStage::as_str),
        "stage": task.pipeline_stage.as_str(),
        "pipeline_type": task.pipeline_type,
        "routed_model": task.routed_model,
        "ready_for_execution": is_ready_for_execution(&task),
        "observation_mode": orchestrator.config().observation_mode,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::read_task;
    use crate::commands::test_support::{write_config, write_task};
    use tl_core::types::Task;

    fn args(task: std::path::PathBuf, dry_run: bool) -> TaskArgs {
        TaskArgs { task, dry_run }
    }

    #[tokio::test]
    async fn advance_all_routes_and_writes_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path(), "");
        let path = write_task(dir.path(), &Task::new("Fix crash on save").with_tags(["bug"]));

        let summary = advance(Some(config.as_path()), &args(path.clone(), false), true).await.unwrap();
        assert_eq!(summary["stage"], "routed");
        assert_eq!(summary["ready_for_execution"], true);

        let task = read_task(&path).unwrap();
        assert_eq!(task.pipeline_stage, PipelineStage::Routed);
        assert_eq!(task.pipeline_type.as_deref(), Some("bug-fix"));
        assert_eq!(task.pipeline_log.len(), 3);
    }

    #[tokio::test]
    async fn single_step_and_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path(), "");
        let path = write_task(dir.path(), &Task::new("Update README"));

        let summary = advance(Some(config.as_path()), &args(path.clone(), true), false).await.unwrap();
        assert_eq!(summary["advanced_to"], "triaged");
        assert_eq!(summary["pipeline_type"], "documentation");
        assert_eq!(read_task(&path).unwrap().pipeline_stage, PipelineStage::Unstarted);

        advance(Some(config.as_path()), &args(path.clone(), false), false).await.unwrap();
        assert_eq!(read_task(&path).unwrap().pipeline_stage, PipelineStage::Triaged);
    }
}
