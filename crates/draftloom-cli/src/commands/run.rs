//! `draftloom run`: generate a document from a source file.

use std::sync::Arc;

use draftloom_core::{
    CancelFlag, SubmitRequest, TaskDispatcher, TextGenerator, WorkflowState, WorkflowStatus,
};

use super::{build_generator, cancel_on_ctrl_c, print_json, AppContext, ConsoleProgress};

pub struct RunOptions {
    /// Path of the source requirements document.
    pub document: String,
    /// Optional outline file; skips outline generation.
    pub outline: Option<String>,
    pub project_id: String,
    pub no_differentiation: bool,
    pub no_validation: bool,
    /// Where to write the assembled document as JSON.
    pub output: Option<String>,
}

pub async fn run(ctx: &AppContext, options: &RunOptions) -> Result<(), String> {
    let generator = build_generator(&ctx.config)?;
    let cancel = CancelFlag::new();
    cancel_on_ctrl_c(cancel.clone());

    let state = execute(ctx, options, generator, cancel).await?;
    report(&state, options.output.as_deref())
}

/// Submit and run a task with the given generator.
pub async fn execute(
    ctx: &AppContext,
    options: &RunOptions,
    generator: Arc<dyn TextGenerator>,
    cancel: CancelFlag,
) -> Result<WorkflowState, String> {
    let document = std::fs::read_to_string(&options.document)
        .map_err(|e| format!("Failed to read document '{}': {}", options.document, e))?;
    let outline = match &options.outline {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read outline '{}': {}", path, e))?,
        ),
        None => None,
    };

    let mut request = SubmitRequest::new(options.project_id.clone(), document);
    request.outline = outline;
    if options.no_differentiation {
        request.differentiation = Some(false);
    }
    if options.no_validation {
        request.validation = Some(false);
    }

    let dispatcher = TaskDispatcher::new(ctx.db.clone(), generator, ctx.config.clone())
        .with_observer(Arc::new(ConsoleProgress));
    let (record, state) = dispatcher.submit(request).await.map_err(|e| e.to_string())?;
    eprintln!("Task {} submitted (project {})", record.id, record.project_id);

    dispatcher
        .run_with_cancel(state, cancel)
        .await
        .map_err(|e| e.to_string())
}

/// Print the outcome, write the output file, and turn an unsuccessful
/// task into a command error.
pub fn report(state: &WorkflowState, output: Option<&str>) -> Result<(), String> {
    let document = serde_json::json!({
        "taskId": state.task_id,
        "projectId": state.project_id,
        "status": state.status.as_str(),
        "summary": state.summary,
        "keyRequirements": state.key_requirements,
        "analysis": state.analysis,
        "parseWarnings": state.parse_warnings,
        "sections": state.sections,
        "error": state.error,
    });

    if let Some(path) = output {
        let body = serde_json::to_string_pretty(&document)
            .map_err(|e| format!("Failed to encode output: {}", e))?;
        std::fs::write(path, body).map_err(|e| format!("Failed to write '{}': {}", path, e))?;
        eprintln!("Wrote {}", path);
    }

    print_json(&serde_json::json!({
        "taskId": state.task_id,
        "status": state.status.as_str(),
        "summary": state.summary,
        "error": state.error,
    }));

    match state.status {
        WorkflowStatus::Succeeded => Ok(()),
        status => {
            let reason = state
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "no error recorded".to_string());
            Err(format!(
                "Task {} {}: {}. Resume with `draftloom resume --task-id {}`",
                state.task_id,
                status.as_str(),
                reason,
                state.task_id
            ))
        }
    }
}
