//! Workflow Executor: runs a generation task step by step.
//!
//! The executor:
//! 1. Stores the initial state so the task can always be resumed
//! 2. Walks the steps in order, replaying any step that already has a
//!    completed checkpoint instead of executing it again
//! 3. Brackets every executed step with `record_step_start` /
//!    `record_step_complete`, the latter carrying a full state snapshot
//! 4. On failure or cancellation, stores a partial snapshot for the
//!    interrupted step so generated nodes survive a resume
//!
//! Step failures end in a `Failed` state rather than an `Err`; `Err` is
//! reserved for a task that cannot be started or found.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use super::progress::{NoopProgress, ProgressEvent, ProgressSink};
use super::schema::{AssembledSection, DocumentSummary, WorkflowState, WorkflowStatus, WorkflowStep};
use crate::config::DraftConfig;
use crate::error::{DraftError, ErrorRecord};
use crate::generation::{prompts, TextGenerator};
use crate::orchestration::{CallOutcome, CancelFlag, Orchestrator};
use crate::outline;
use crate::store::CheckpointStore;
use crate::tree::{NodeId, NodeStatus, SectionTree};
use crate::validation::{self, Violation};

/// What running a step amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepDisposition {
    Executed,
    /// Disabled by configuration; completed without doing anything.
    Skipped,
}

pub struct WorkflowExecutor {
    orchestrator: Orchestrator,
    checkpoints: Arc<dyn CheckpointStore>,
    config: DraftConfig,
    progress: Arc<dyn ProgressSink>,
}

impl WorkflowExecutor {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: DraftConfig,
    ) -> Self {
        let orchestrator = Orchestrator::from_config(generator, &config, CancelFlag::new());
        Self {
            orchestrator,
            checkpoints,
            config,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Share an externally owned cancellation flag (e.g. a Ctrl-C handler).
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.orchestrator = self.orchestrator.with_cancel(cancel);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.orchestrator.cancel_flag().clone()
    }

    pub fn config(&self) -> &DraftConfig {
        &self.config
    }

    /// Run a new task from its initial state to a terminal state.
    pub async fn run_workflow(&self, initial: WorkflowState) -> Result<WorkflowState, DraftError> {
        let mut state = initial;
        state.status = WorkflowStatus::Running;
        state.error = None;
        state.updated_at = Utc::now();

        tracing::info!(
            task_id = %state.task_id,
            project_id = %state.project_id,
            generator = self.orchestrator.generator_name(),
            "Starting workflow"
        );

        // The initial state doubles as the partial snapshot of the first step,
        // so a task interrupted before any step completes can still resume.
        self.checkpoints
            .record_step_progress(&state.task_id, WorkflowStep::ParseDocument, &state.to_snapshot()?)
            .await?;

        Ok(self.drive(state).await)
    }

    /// Continue a task from its checkpoints.
    ///
    /// Starts from the latest completed snapshot, or from the following
    /// step's partial snapshot when that one is newer. Interrupted nodes go
    /// back to `Pending`; `Generated` nodes are never regenerated.
    pub async fn resume_workflow(&self, task_id: &str) -> Result<WorkflowState, DraftError> {
        let latest = self.checkpoints.load_latest_checkpoint(task_id).await?;

        let mut state = match &latest {
            Some(cp) => match &cp.snapshot {
                Some(snapshot) => Some(WorkflowState::from_snapshot(snapshot)?),
                None => None,
            },
            None => None,
        };

        let next_step = match &latest {
            Some(cp) => WorkflowStep::from_order(cp.step_order).and_then(|s| s.next()),
            None => Some(WorkflowStep::ParseDocument),
        };
        if let Some(next) = next_step {
            if let Some(partial) = self.checkpoints.load_step(task_id, next).await? {
                let newer = match &latest {
                    Some(cp) => cp.completed_at.is_none_or(|done| partial.updated_at >= done),
                    None => true,
                };
                if !partial.completed && newer {
                    if let Some(snapshot) = &partial.snapshot {
                        tracing::debug!(task_id, step = %next, "Resuming from partial snapshot");
                        state = Some(WorkflowState::from_snapshot(snapshot)?);
                    }
                }
            }
        }

        let mut state =
            state.ok_or_else(|| DraftError::NotFound(format!("no checkpoints for task {}", task_id)))?;

        if next_step.is_none() && state.status == WorkflowStatus::Succeeded {
            tracing::info!(task_id, "Task already finished; nothing to resume");
            return Ok(state);
        }

        let reset = state.tree.reset_interrupted();
        tracing::info!(
            task_id,
            last_completed = state.last_completed.map(|s| s.as_str()).unwrap_or("none"),
            reset_nodes = reset,
            "Resuming workflow"
        );
        state.status = WorkflowStatus::Running;
        state.error = None;
        state.updated_at = Utc::now();

        Ok(self.drive(state).await)
    }

    /// The step loop shared by run and resume. The task time budget counts
    /// from the start of this call.
    async fn drive(&self, mut state: WorkflowState) -> WorkflowState {
        let budget = self.config.generation.task_timeout();
        let deadline = Instant::now() + budget;

        for step in WorkflowStep::ALL {
            if self.orchestrator.is_cancelled() {
                return self.fail(state, step, DraftError::Cancelled).await;
            }

            let existing = self.checkpoints.load_step(&state.task_id, step).await;
            match existing {
                Ok(Some(cp)) if cp.completed => {
                    if !state.has_completed(step) {
                        if let Some(snapshot) = cp.snapshot.as_deref() {
                            match WorkflowState::from_snapshot(snapshot) {
                                Ok(mut restored) => {
                                    restored.status = WorkflowStatus::Running;
                                    restored.error = None;
                                    state = restored;
                                }
                                Err(e) => return self.fail(state, step, e).await,
                            }
                        }
                        state.last_completed = Some(step);
                    }
                    state.progress = step.progress_after();
                    tracing::info!(task_id = %state.task_id, step = %step, "Step replayed from checkpoint");
                    self.emit(&state, ProgressEvent::StepReplayed {
                        step,
                        progress: state.progress,
                    });
                    continue;
                }
                Ok(_) => {}
                Err(e) => return self.fail(state, step, e).await,
            }

            state.step = step;
            state.progress = step.progress_before();
            self.emit(&state, ProgressEvent::StepStarted {
                step,
                progress: state.progress,
            });
            let started = self.checkpoints.record_step_start(&state.task_id, step).await;
            if let Err(e) = started {
                return self.fail(state, step, e).await;
            }

            let step_started = Instant::now();
            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = if remaining.is_zero() {
                Err(DraftError::TaskTimeout(budget.as_secs()))
            } else {
                match tokio::time::timeout(remaining, self.execute_step(step, &mut state)).await {
                    Ok(result) => result,
                    Err(_) => Err(DraftError::TaskTimeout(budget.as_secs())),
                }
            };

            let disposition = match outcome {
                Ok(d) => d,
                Err(e) => return self.fail(state, step, e).await,
            };

            state.last_completed = Some(step);
            state.progress = step.progress_after();
            state.updated_at = Utc::now();
            if step == WorkflowStep::Finalize {
                state.status = WorkflowStatus::Succeeded;
            }

            let snapshot = match state.to_snapshot() {
                Ok(s) => s,
                Err(e) => return self.fail(state, step, e).await,
            };
            let stored = self
                .checkpoints
                .record_step_complete(&state.task_id, step, &snapshot)
                .await;
            if let Err(e) = stored {
                state.status = WorkflowStatus::Running;
                state.last_completed = step.order().checked_sub(1).and_then(WorkflowStep::from_order);
                return self.fail(state, step, e).await;
            }

            tracing::info!(
                task_id = %state.task_id,
                step = %step,
                elapsed_ms = step_started.elapsed().as_millis() as u64,
                skipped = disposition == StepDisposition::Skipped,
                "Step completed"
            );
            let event = match disposition {
                StepDisposition::Executed => ProgressEvent::StepCompleted {
                    step,
                    progress: state.progress,
                },
                StepDisposition::Skipped => ProgressEvent::StepSkipped {
                    step,
                    progress: state.progress,
                },
            };
            self.emit(&state, event);
        }

        state.status = WorkflowStatus::Succeeded;
        self.emit(&state, ProgressEvent::Finished {
            status: state.status,
            progress: state.progress,
        });
        tracing::info!(task_id = %state.task_id, "Workflow succeeded");
        state
    }

    /// End the task in `Failed` (or `Cancelled`) and keep what it produced.
    async fn fail(&self, mut state: WorkflowState, step: WorkflowStep, error: DraftError) -> WorkflowState {
        state.status = match error {
            DraftError::Cancelled => WorkflowStatus::Cancelled,
            _ => WorkflowStatus::Failed,
        };
        state.tree.reset_interrupted();
        state.error = Some(ErrorRecord::from_error(&error, Some(step.as_str())));
        state.updated_at = Utc::now();

        if state.status == WorkflowStatus::Cancelled {
            tracing::warn!(task_id = %state.task_id, step = %step, "Workflow cancelled");
        } else {
            tracing::error!(task_id = %state.task_id, step = %step, "Workflow failed: {}", error);
        }

        match state.to_snapshot() {
            Ok(snapshot) => {
                if let Err(e) = self
                    .checkpoints
                    .record_step_progress(&state.task_id, step, &snapshot)
                    .await
                {
                    tracing::warn!(task_id = %state.task_id, step = %step, "Failed to store partial snapshot: {}", e);
                }
            }
            Err(e) => tracing::warn!(task_id = %state.task_id, "{}", e),
        }

        self.emit(&state, ProgressEvent::Finished {
            status: state.status,
            progress: state.progress,
        });
        state
    }

    fn emit(&self, state: &WorkflowState, event: ProgressEvent) {
        self.progress.on_event(&state.task_id, &event);
    }

    async fn execute_step(
        &self,
        step: WorkflowStep,
        state: &mut WorkflowState,
    ) -> Result<StepDisposition, DraftError> {
        match step {
            WorkflowStep::ParseDocument => self.parse_document(state),
            WorkflowStep::GenerateOutline => self.generate_outline(state).await,
            WorkflowStep::BuildSectionTree => self.build_section_tree(state),
            WorkflowStep::GenerateLeafContent => self.generate_leaf_content(state).await,
            WorkflowStep::GenerateParentSummaries => self.generate_parent_summaries(state).await,
            WorkflowStep::Differentiate => self.differentiate(state).await,
            WorkflowStep::Validate => self.validate(state),
            WorkflowStep::Finalize => self.finalize(state),
        }
    }

    fn parse_document(&self, state: &mut WorkflowState) -> Result<StepDisposition, DraftError> {
        if state.document_content.trim().is_empty() {
            return Err(DraftError::InvalidDocument(
                "document content is empty".to_string(),
            ));
        }
        state.key_requirements = extract_key_requirements(&state.document_content);
        tracing::info!(
            task_id = %state.task_id,
            chars = state.document_content.chars().count(),
            key_requirements = state.key_requirements.len(),
            "Document parsed"
        );
        Ok(StepDisposition::Executed)
    }

    async fn generate_outline(&self, state: &mut WorkflowState) -> Result<StepDisposition, DraftError> {
        if let Some(outline) = state.outline.as_deref() {
            if !outline.trim().is_empty() {
                tracing::info!(task_id = %state.task_id, "Using supplied outline");
                return Ok(StepDisposition::Executed);
            }
        }

        if self.config.workflow.enable_analysis && state.analysis.is_none() {
            let analysis = self.analyze_document(state).await?;
            state.analysis = analysis;
        }

        let min_chars = self.config.validation.outline_min_chars;
        let ctx = prompts::outline_request(
            &state.document_content,
            &state.key_requirements,
            state.analysis.as_deref(),
        );
        match self
            .orchestrator
            .call_until_valid(&ctx, move |text| outline::validate_outline(text, min_chars))
            .await
        {
            CallOutcome::Valid { content, attempts } => {
                tracing::info!(task_id = %state.task_id, attempts, "Outline generated");
                state.outline = Some(outline::strip_code_fences(&content));
                Ok(StepDisposition::Executed)
            }
            CallOutcome::Exhausted {
                attempts,
                last_error,
                ..
            } => Err(DraftError::StepExhausted {
                step: WorkflowStep::GenerateOutline.as_str().to_string(),
                message: format!("no usable outline after {} attempts: {}", attempts, last_error),
            }),
            CallOutcome::Cancelled => Err(DraftError::Cancelled),
        }
    }

    /// Requirements and scoring analysis. The outline is still generated
    /// without it when the service gives up.
    async fn analyze_document(&self, state: &WorkflowState) -> Result<Option<String>, DraftError> {
        let ctx = prompts::analysis_request(&state.document_content, &state.key_requirements);
        let outcome = self
            .orchestrator
            .call_until_valid(&ctx, |text| {
                if text.trim().is_empty() {
                    vec![Violation::Empty]
                } else {
                    Vec::new()
                }
            })
            .await;
        match outcome {
            CallOutcome::Valid { content, attempts } => {
                tracing::info!(
                    task_id = %state.task_id,
                    attempts,
                    chars = content.chars().count(),
                    "Requirements analysed"
                );
                Ok(Some(content))
            }
            CallOutcome::Exhausted { last_error, .. } => {
                tracing::warn!(
                    task_id = %state.task_id,
                    "Requirements analysis unavailable, outlining without it: {}",
                    last_error
                );
                Ok(None)
            }
            CallOutcome::Cancelled => Err(DraftError::Cancelled),
        }
    }

    fn build_section_tree(&self, state: &mut WorkflowState) -> Result<StepDisposition, DraftError> {
        let text = state
            .outline
            .as_deref()
            .ok_or_else(|| DraftError::OutlineParse("no outline available".to_string()))?;
        let parsed = outline::parse_outline(text, self.config.generation.max_depth)?;
        tracing::info!(
            task_id = %state.task_id,
            nodes = parsed.tree.len(),
            leaves = parsed.tree.leaf_count(),
            warnings = parsed.warnings.len(),
            "Section tree built"
        );
        state.tree = parsed.tree;
        state.parse_warnings = parsed.warnings;
        Ok(StepDisposition::Executed)
    }

    async fn generate_leaf_content(
        &self,
        state: &mut WorkflowState,
    ) -> Result<StepDisposition, DraftError> {
        let step = WorkflowStep::GenerateLeafContent;
        let bounds = self.config.validation.leaf;
        let mut on_node = self.node_reporter(state.task_id.clone(), step, |tree: &SectionTree| {
            let leaves = tree.leaves();
            let done = leaves
                .iter()
                .filter(|id| tree.node(**id).status.is_terminal())
                .count();
            (done, leaves.len())
        });
        let report = self
            .orchestrator
            .generate_leaves(&mut state.tree, &state.document_content, bounds, &mut on_node)
            .await;
        state.reports.leaves = Some(report);

        if self.orchestrator.is_cancelled() {
            return Err(DraftError::Cancelled);
        }
        if report.is_exhausted() {
            return Err(DraftError::StepExhausted {
                step: step.as_str().to_string(),
                message: format!("0 of {} leaves generated", report.targeted),
            });
        }
        Ok(StepDisposition::Executed)
    }

    async fn generate_parent_summaries(
        &self,
        state: &mut WorkflowState,
    ) -> Result<StepDisposition, DraftError> {
        let step = WorkflowStep::GenerateParentSummaries;
        let bounds = self.config.validation.parent;
        let mut on_node = self.node_reporter(state.task_id.clone(), step, |tree: &SectionTree| {
            let internal: Vec<NodeId> = tree.internal_by_depth().into_values().flatten().collect();
            let done = internal
                .iter()
                .filter(|id| tree.node(**id).status.is_terminal())
                .count();
            (done, internal.len())
        });
        let report = self
            .orchestrator
            .summarize_parents(&mut state.tree, bounds, &mut on_node)
            .await;
        state.reports.parents = Some(report);

        if self.orchestrator.is_cancelled() {
            return Err(DraftError::Cancelled);
        }
        if report.is_exhausted() {
            return Err(DraftError::StepExhausted {
                step: step.as_str().to_string(),
                message: format!("0 of {} parent summaries generated", report.targeted),
            });
        }
        Ok(StepDisposition::Executed)
    }

    async fn differentiate(&self, state: &mut WorkflowState) -> Result<StepDisposition, DraftError> {
        if !state.differentiation_enabled {
            return Ok(StepDisposition::Skipped);
        }
        let step = WorkflowStep::Differentiate;
        let mut on_node = self.node_reporter(state.task_id.clone(), step, |tree: &SectionTree| {
            let with_content = tree
                .preorder()
                .into_iter()
                .filter(|id| !tree.node(*id).content.trim().is_empty());
            let (mut done, mut total) = (0, 0);
            for id in with_content {
                total += 1;
                if tree.node(id).differentiated {
                    done += 1;
                }
            }
            (done, total)
        });
        let report = self
            .orchestrator
            .differentiate(&mut state.tree, &self.config.validation, &mut on_node)
            .await;
        state.reports.differentiation = Some(report);

        if self.orchestrator.is_cancelled() {
            return Err(DraftError::Cancelled);
        }
        Ok(StepDisposition::Executed)
    }

    fn validate(&self, state: &mut WorkflowState) -> Result<StepDisposition, DraftError> {
        if !state.validation_enabled {
            return Ok(StepDisposition::Skipped);
        }
        let report = validation::validate_tree(&mut state.tree, &self.config.validation);
        tracing::info!(
            task_id = %state.task_id,
            checked = report.checked,
            passed = report.passed,
            cleaned = report.cleaned,
            clean = report.is_clean(),
            "Validation finished"
        );
        state.reports.validation = Some(report);
        Ok(StepDisposition::Executed)
    }

    fn finalize(&self, state: &mut WorkflowState) -> Result<StepDisposition, DraftError> {
        let (sections, summary) = assemble(&state.tree);
        tracing::info!(
            task_id = %state.task_id,
            sections = summary.sections,
            generated = summary.generated,
            failed = summary.failed,
            characters = summary.characters,
            "Document assembled"
        );
        state.sections = sections;
        state.summary = Some(summary);
        Ok(StepDisposition::Executed)
    }

    /// Callback for a generation pass: emits `NodeCompleted` with step-local
    /// progress computed by `count` as `(done, total)`.
    fn node_reporter<'a, C>(
        &'a self,
        task_id: String,
        step: WorkflowStep,
        count: C,
    ) -> impl FnMut(&SectionTree, NodeId) + Send + 'a
    where
        C: Fn(&SectionTree) -> (usize, usize) + Send + 'a,
    {
        let sink = self.progress.clone();
        move |tree: &SectionTree, id: NodeId| {
            let (done, total) = count(tree);
            let node = tree.node(id);
            let event = ProgressEvent::NodeCompleted {
                step,
                node: id,
                title: node.title.clone(),
                status: node.status,
                done,
                total,
                progress: step.progress_within(done, total),
            };
            sink.on_event(&task_id, &event);
        }
    }
}

/// Lines of the source document flagged as mandatory (★) or important (▲).
pub fn extract_key_requirements(document: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for line in document.lines() {
        let line = line.trim();
        if (line.contains('★') || line.contains('▲')) && !found.iter().any(|f| f == line) {
            found.push(line.to_string());
        }
    }
    found
}

/// Flatten the tree into numbered sections and summary counts.
pub fn assemble(tree: &SectionTree) -> (Vec<AssembledSection>, DocumentSummary) {
    let numbers = tree.section_numbers();
    let mut summary = DocumentSummary {
        sections: tree.len(),
        leaves: tree.leaf_count(),
        ..DocumentSummary::default()
    };
    let sections = tree
        .preorder()
        .into_iter()
        .map(|id| {
            let node = tree.node(id);
            match node.status {
                NodeStatus::Generated => summary.generated += 1,
                NodeStatus::Failed => summary.failed += 1,
                _ => {}
            }
            if node.differentiated {
                summary.differentiated += 1;
            }
            summary.characters += node.content.chars().count();
            AssembledSection {
                number: numbers[id.index()].clone(),
                title: node.title.clone(),
                level: node.level,
                content: node.content.clone(),
                status: node.status,
            }
        })
        .collect();
    (sections, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_key_requirements() {
        let doc = "Intro\n★ Must deliver within 90 days\nplain line\n▲ Prefer local suppliers\n  ★ Must deliver within 90 days  ";
        assert_eq!(
            extract_key_requirements(doc),
            vec![
                "★ Must deliver within 90 days".to_string(),
                "▲ Prefer local suppliers".to_string(),
            ]
        );
    }

    #[test]
    fn test_assemble_numbers_and_counts() {
        let mut tree = SectionTree::new();
        let a = tree.add_root("A");
        let a1 = tree.add_child(a, "A1");
        let b = tree.add_root("B");
        for (id, status, content) in [
            (a, NodeStatus::Generated, "ab"),
            (a1, NodeStatus::Generated, "abc"),
            (b, NodeStatus::Failed, ""),
        ] {
            tree.node_mut(id).status = status;
            tree.node_mut(id).content = content.to_string();
        }

        let (sections, summary) = assemble(&tree);
        let numbered: Vec<(&str, &str)> = sections
            .iter()
            .map(|s| (s.number.as_str(), s.title.as_str()))
            .collect();
        assert_eq!(numbered, vec![("1", "A"), ("1.1", "A1"), ("2", "B")]);
        assert_eq!(summary.sections, 3);
        assert_eq!(summary.leaves, 2);
        assert_eq!(summary.generated, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.characters, 5);
    }
}
