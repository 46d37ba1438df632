//! Task dispatcher: owns task records around workflow runs.
//!
//! Creates the task row on submit, keeps its status and progress current
//! while the executor runs, and applies the task-level retry policy: a
//! failure with a retryable error kind is resumed from checkpoints after an
//! exponential delay, up to the task's `max_retries`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::DraftConfig;
use crate::db::Database;
use crate::error::DraftError;
use crate::generation::TextGenerator;
use crate::models::task::{TaskRecord, TaskStatus, TaskType};
use crate::orchestration::CancelFlag;
use crate::store::{CheckpointStore, SqliteCheckpointStore, TaskStore};
use crate::workflow::{
    ChannelProgress, ProgressEvent, ProgressSink, WorkflowExecutor, WorkflowState, WorkflowStatus,
};

/// Options a task is submitted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub project_id: String,
    #[serde(skip_serializing)]
    pub document: String,
    /// Skip outline generation and use this outline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline: Option<String>,
    /// Overrides `workflow.enable_differentiation`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differentiation: Option<bool>,
    /// Overrides `workflow.enable_validation`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<bool>,
}

impl SubmitRequest {
    pub fn new(project_id: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            document: document.into(),
            outline: None,
            differentiation: None,
            validation: None,
        }
    }
}

/// How a run enters the executor.
enum Entry {
    Start(WorkflowState),
    Resume,
}

#[derive(Clone)]
pub struct TaskDispatcher {
    tasks: TaskStore,
    checkpoints: Arc<dyn CheckpointStore>,
    generator: Arc<dyn TextGenerator>,
    config: DraftConfig,
    observer: Option<Arc<dyn ProgressSink>>,
    running: Arc<RwLock<HashMap<String, CancelFlag>>>,
}

impl TaskDispatcher {
    pub fn new(db: Database, generator: Arc<dyn TextGenerator>, config: DraftConfig) -> Self {
        Self::with_stores(
            TaskStore::new(db.clone()),
            Arc::new(SqliteCheckpointStore::new(db)),
            generator,
            config,
        )
    }

    pub fn with_stores(
        tasks: TaskStore,
        checkpoints: Arc<dyn CheckpointStore>,
        generator: Arc<dyn TextGenerator>,
        config: DraftConfig,
    ) -> Self {
        Self {
            tasks,
            checkpoints,
            generator,
            config,
            observer: None,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Also forward every progress event to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressSink>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn checkpoints(&self) -> Arc<dyn CheckpointStore> {
        self.checkpoints.clone()
    }

    /// Create a `Pending` task and the state its run starts from.
    pub async fn submit(
        &self,
        request: SubmitRequest,
    ) -> Result<(TaskRecord, WorkflowState), DraftError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let options = serde_json::to_value(&request)
            .map_err(|e| DraftError::Internal(format!("Failed to encode task options: {}", e)))?;
        let record = TaskRecord::new(
            task_id.clone(),
            request.project_id.clone(),
            TaskType::FullWorkflow,
            options,
            self.config.task_retry.max_retries,
        );
        self.tasks.create(&record).await?;

        let mut state = WorkflowState::new(task_id, request.project_id, request.document)
            .with_differentiation(
                request
                    .differentiation
                    .unwrap_or(self.config.workflow.enable_differentiation),
            )
            .with_validation(
                request
                    .validation
                    .unwrap_or(self.config.workflow.enable_validation),
            );
        if let Some(outline) = request.outline {
            state = state.with_outline(outline);
        }

        tracing::info!(task_id = %record.id, project_id = %record.project_id, "Task submitted");
        Ok((record, state))
    }

    /// Run a submitted task to a terminal state.
    pub async fn run(&self, initial: WorkflowState) -> Result<WorkflowState, DraftError> {
        let task_id = initial.task_id.clone();
        self.dispatch(&task_id, Entry::Start(initial), CancelFlag::new())
            .await
    }

    /// Submit and run in one go.
    pub async fn execute(&self, request: SubmitRequest) -> Result<WorkflowState, DraftError> {
        let (_, state) = self.submit(request).await?;
        self.run(state).await
    }

    /// Continue a failed, cancelled or interrupted task from its checkpoints.
    pub async fn resume(&self, task_id: &str) -> Result<WorkflowState, DraftError> {
        let task = self.tasks.require(task_id).await?;
        if task.status == TaskStatus::Success {
            tracing::info!(task_id, "Task already succeeded; replaying final state");
        }
        self.dispatch(task_id, Entry::Resume, CancelFlag::new()).await
    }

    /// Like [`run`](Self::run) with a caller-owned cancellation flag.
    pub async fn run_with_cancel(
        &self,
        initial: WorkflowState,
        cancel: CancelFlag,
    ) -> Result<WorkflowState, DraftError> {
        let task_id = initial.task_id.clone();
        self.dispatch(&task_id, Entry::Start(initial), cancel).await
    }

    /// Like [`resume`](Self::resume) with a caller-owned cancellation flag.
    pub async fn resume_with_cancel(
        &self,
        task_id: &str,
        cancel: CancelFlag,
    ) -> Result<WorkflowState, DraftError> {
        self.tasks.require(task_id).await?;
        self.dispatch(task_id, Entry::Resume, cancel).await
    }

    /// Signal a running task to stop. Returns false if it is not running here.
    pub async fn cancel(&self, task_id: &str) -> bool {
        match self.running.read().await.get(task_id) {
            Some(flag) => {
                tracing::info!(task_id, "Cancellation requested");
                flag.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.running.read().await.contains_key(task_id)
    }

    async fn dispatch(
        &self,
        task_id: &str,
        entry: Entry,
        cancel: CancelFlag,
    ) -> Result<WorkflowState, DraftError> {
        {
            let mut running = self.running.write().await;
            if running.contains_key(task_id) {
                return Err(DraftError::Internal(format!("task {} is already running", task_id)));
            }
            running.insert(task_id.to_string(), cancel.clone());
        }

        let result = self.dispatch_inner(task_id, entry, cancel).await;

        self.running.write().await.remove(task_id);

        if let Err(e) = &result {
            tracing::error!(task_id, "Task could not run: {}", e);
            let _ = self.tasks.set_status(task_id, TaskStatus::Failed).await;
            let _ = self.tasks.set_error(task_id, Some(&e.to_string())).await;
        }
        result
    }

    async fn dispatch_inner(
        &self,
        task_id: &str,
        entry: Entry,
        cancel: CancelFlag,
    ) -> Result<WorkflowState, DraftError> {
        let (sink, mut events) = ChannelProgress::new();
        let tasks = self.tasks.clone();
        let progress_task_id = task_id.to_string();
        let consumer = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let step = event.step().map(|s| s.as_str());
                if let Err(e) = tasks
                    .update_progress(&progress_task_id, event.progress(), step)
                    .await
                {
                    tracing::warn!(task_id = %progress_task_id, "Failed to persist progress: {}", e);
                }
            }
        });

        let observer = self.observer.clone();
        let forward = move |id: &str, event: &ProgressEvent| {
            sink.on_event(id, event);
            if let Some(observer) = &observer {
                observer.on_event(id, event);
            }
        };
        let executor = WorkflowExecutor::new(
            self.generator.clone(),
            self.checkpoints.clone(),
            self.config.clone(),
        )
        .with_progress(Arc::new(forward))
        .with_cancel_flag(cancel.clone());

        self.tasks.set_status(task_id, TaskStatus::Running).await?;
        self.tasks.set_error(task_id, None).await?;

        let mut state = match entry {
            Entry::Start(initial) => executor.run_workflow(initial).await?,
            Entry::Resume => executor.resume_workflow(task_id).await?,
        };

        while state.status == WorkflowStatus::Failed {
            let retryable = state.error.as_ref().is_some_and(|e| e.is_retryable());
            let task = self.tasks.require(task_id).await?;
            if !retryable || !task.can_retry() || cancel.is_cancelled() {
                break;
            }

            let retry = self.tasks.increment_retry(task_id).await?;
            let delay = self.config.task_retry.delay_for_retry(retry.saturating_sub(1));
            let message = state
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            self.tasks.set_status(task_id, TaskStatus::Retry).await?;
            self.tasks.set_error(task_id, Some(&message)).await?;
            tracing::warn!(
                task_id,
                retry,
                max_retries = task.max_retries,
                delay_secs = delay.as_secs(),
                "Task failed, retrying from checkpoint: {}",
                message
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if cancel.is_cancelled() {
                state.status = WorkflowStatus::Cancelled;
                break;
            }

            self.tasks.set_status(task_id, TaskStatus::Running).await?;
            state = executor.resume_workflow(task_id).await?;
        }

        // Closing the sink lets the consumer drain and exit.
        drop(executor);
        if let Err(e) = consumer.await {
            tracing::warn!(task_id, "Progress consumer aborted: {}", e);
        }

        let final_status = match state.status {
            WorkflowStatus::Succeeded => TaskStatus::Success,
            WorkflowStatus::Cancelled => TaskStatus::Cancelled,
            _ => TaskStatus::Failed,
        };
        self.tasks.set_status(task_id, final_status).await?;
        let error = state.error.as_ref().map(|e| e.message.clone());
        self.tasks.set_error(task_id, error.as_deref()).await?;
        if final_status == TaskStatus::Success {
            self.tasks.update_progress(task_id, 100, None).await?;
        }

        tracing::info!(task_id, status = final_status.as_str(), "Task finished");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LengthBounds;
    use crate::error::GenerationCallError;
    use crate::generation::RequestKind;
    use crate::orchestration::test_support::ScriptedGenerator;

    fn config() -> DraftConfig {
        let mut config = DraftConfig::default();
        config.retry.max_attempts = 1;
        config.retry.initial_delay_ms = 0;
        config.retry.jitter = false;
        config.task_retry.base_delay_secs = 0;
        config.task_retry.max_retries = 2;
        config.validation.leaf = LengthBounds::new(1, 500);
        config.validation.parent = LengthBounds::new(1, 500);
        config
    }

    fn dispatcher(generator: Arc<ScriptedGenerator>, config: DraftConfig) -> TaskDispatcher {
        TaskDispatcher::new(Database::open_in_memory().unwrap(), generator, config)
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            outline: Some("1. Scope\n1.1 Works\n2. Schedule".to_string()),
            differentiation: Some(false),
            ..SubmitRequest::new("proj-1", "Build a bridge.")
        }
    }

    #[tokio::test]
    async fn test_submit_creates_pending_task() {
        let generator = Arc::new(ScriptedGenerator::new(|_, _| Ok("text".to_string())));
        let dispatcher = dispatcher(generator, config());

        let (record, state) = dispatcher.submit(request()).await.unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.max_retries, 2);
        assert_eq!(record.config["outline"], "1. Scope\n1.1 Works\n2. Schedule");
        assert!(record.config.get("document").is_none());
        assert!(!state.differentiation_enabled);
        assert!(state.validation_enabled);

        let stored = dispatcher.tasks().require(&record.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_successful_run_updates_task() {
        let generator = Arc::new(ScriptedGenerator::new(|ctx, _| Ok(format!("About {}.", ctx.title))));
        let dispatcher = dispatcher(generator, config());

        let (record, state) = dispatcher.submit(request()).await.unwrap();
        let finished = dispatcher.run(state).await.unwrap();
        assert_eq!(finished.status, WorkflowStatus::Succeeded);

        let task = dispatcher.tasks().require(&record.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.progress, 100);
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_some());
        assert!(task.error_message.is_none());
        assert!(!dispatcher.is_running(&record.id).await);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_resumed() {
        // Every leaf call fails on the first pass, then the service recovers.
        let generator = Arc::new(ScriptedGenerator::new(|ctx, n| {
            if ctx.kind == RequestKind::Leaf && n <= 2 {
                Err(GenerationCallError::InvalidResponse("overloaded".into()))
            } else {
                Ok(format!("About {}.", ctx.title))
            }
        }));
        let dispatcher = dispatcher(generator, config());

        let (record, state) = dispatcher.submit(request()).await.unwrap();
        let finished = dispatcher.run(state).await.unwrap();
        assert_eq!(finished.status, WorkflowStatus::Succeeded);

        let task = dispatcher.tasks().require(&record.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.retry_count, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_final() {
        let generator = Arc::new(ScriptedGenerator::new(|_, _| Ok("text".to_string())));
        let dispatcher = dispatcher(generator.clone(), config());

        let (record, state) = dispatcher
            .submit(SubmitRequest::new("proj-1", "   "))
            .await
            .unwrap();
        let finished = dispatcher.run(state).await.unwrap();
        assert_eq!(finished.status, WorkflowStatus::Failed);

        let task = dispatcher.tasks().require(&record.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 0);
        assert!(task.error_message.unwrap().contains("empty"));
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_false() {
        let generator = Arc::new(ScriptedGenerator::new(|_, _| Ok("text".to_string())));
        let dispatcher = dispatcher(generator, config());
        assert!(!dispatcher.cancel("nope").await);
    }
}
