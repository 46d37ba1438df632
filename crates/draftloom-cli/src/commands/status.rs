//! `draftloom status`, `tasks` and `checkpoints`: inspect stored tasks.

use draftloom_core::store::{CheckpointStore, SqliteCheckpointStore, TaskStore};

use super::{print_json, AppContext};

pub async fn status(ctx: &AppContext, task_id: &str) -> Result<(), String> {
    let tasks = TaskStore::new(ctx.db.clone());
    let task = tasks.require(task_id).await.map_err(|e| e.to_string())?;
    let value = serde_json::to_value(&task).map_err(|e| e.to_string())?;
    print_json(&value);
    Ok(())
}

pub async fn tasks(ctx: &AppContext, project_id: Option<&str>) -> Result<(), String> {
    let store = TaskStore::new(ctx.db.clone());
    let tasks = match project_id {
        Some(project_id) => store.list_by_project(project_id).await,
        None => store.list().await,
    }
    .map_err(|e| e.to_string())?;

    let rows: Vec<serde_json::Value> = tasks
        .iter()
        .map(|t| {
            serde_json::json!({
                "id": t.id,
                "projectId": t.project_id,
                "status": t.status.as_str(),
                "progress": t.progress,
                "currentStep": t.current_step,
                "retryCount": t.retry_count,
                "createdAt": t.created_at,
            })
        })
        .collect();
    print_json(&serde_json::json!({ "tasks": rows }));
    Ok(())
}

/// Checkpoint records of a task, without the snapshots.
pub async fn checkpoints(ctx: &AppContext, task_id: &str) -> Result<(), String> {
    let store = SqliteCheckpointStore::new(ctx.db.clone());
    let checkpoints = store
        .list_checkpoints(task_id)
        .await
        .map_err(|e| e.to_string())?;
    if checkpoints.is_empty() {
        return Err(format!("No checkpoints for task {}", task_id));
    }

    let rows: Vec<serde_json::Value> = checkpoints
        .iter()
        .map(|c| {
            serde_json::json!({
                "stepOrder": c.step_order,
                "stepName": c.step_name,
                "completed": c.completed,
                "startedAt": c.started_at,
                "completedAt": c.completed_at,
                "durationMs": c.duration_ms,
                "snapshotBytes": c.snapshot.as_ref().map(|s| s.len()),
            })
        })
        .collect();
    print_json(&serde_json::json!({ "taskId": task_id, "checkpoints": rows }));
    Ok(())
}
