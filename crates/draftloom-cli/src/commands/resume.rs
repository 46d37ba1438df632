//! `draftloom resume`: continue a task from its checkpoints.

use std::sync::Arc;

use draftloom_core::{CancelFlag, TaskDispatcher, TextGenerator, WorkflowState};

use super::run::report;
use super::{build_generator, cancel_on_ctrl_c, AppContext, ConsoleProgress};

pub async fn run(ctx: &AppContext, task_id: &str, output: Option<&str>) -> Result<(), String> {
    let generator = build_generator(&ctx.config)?;
    let cancel = CancelFlag::new();
    cancel_on_ctrl_c(cancel.clone());

    let state = execute(ctx, task_id, generator, cancel).await?;
    report(&state, output)
}

pub async fn execute(
    ctx: &AppContext,
    task_id: &str,
    generator: Arc<dyn TextGenerator>,
    cancel: CancelFlag,
) -> Result<WorkflowState, String> {
    let dispatcher = TaskDispatcher::new(ctx.db.clone(), generator, ctx.config.clone())
        .with_observer(Arc::new(ConsoleProgress));
    dispatcher
        .resume_with_cancel(task_id, cancel)
        .await
        .map_err(|e| e.to_string())
}
