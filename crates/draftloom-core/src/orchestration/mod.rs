//! Hierarchical generation orchestrator.
//!
//! One [`Orchestrator`] is shared by every pass of a run. It owns the single
//! limiter (a counting semaphore capping in-flight calls to the generation
//! service), the call-level retry policy and the cancellation flag.
//!
//! Passes never hand the tree to concurrent units. Each unit gets a
//! [`NodeJob`] carrying a snapshot of its inputs; the pass applies the
//! returned [`JobOutcome`]s from one writer loop as units complete.
//!
//! - [`Orchestrator::generate_leaves`]: leaf content, all leaves at once
//! - [`Orchestrator::summarize_parents`]: internal nodes, deepest level first
//! - [`Orchestrator::differentiate`]: optional rewrite of existing content

mod differentiation;
mod leaves;
mod retry;
mod summarizer;

pub use retry::RetryPolicy;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{DraftConfig, LengthBounds};
use crate::error::{DraftError, GenerationCallError};
use crate::generation::{PromptContext, TextGenerator};
use crate::tree::{NodeId, NodeStatus, SectionTree};
use crate::validation::{self, Violation};

/// Shared cancellation signal for one run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the flag can be reused for a resume.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How a node's content is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    Leaf,
    ParentSummary,
    Differentiate,
}

/// One unit of concurrent work: a rendered request for one node.
#[derive(Debug, Clone)]
pub struct NodeJob {
    pub id: NodeId,
    pub strategy: GenerationStrategy,
    pub ctx: PromptContext,
    pub bounds: LengthBounds,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Generated {
        content: String,
        attempts: u32,
    },
    /// Retries ran out on validation; the last response was cleaned and kept.
    Cleaned {
        content: String,
        attempts: u32,
        violations: Vec<Violation>,
    },
    Failed {
        error: String,
        attempts: u32,
    },
    Cancelled,
}

/// Result of the retry loop around one request.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Valid {
        content: String,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last_error: String,
        /// Most recent response that came back but failed validation.
        last_rejected: Option<(String, Vec<Violation>)>,
    },
    Cancelled,
}

/// Counts for one pass. `cleaned` is a subset of `generated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub targeted: usize,
    pub generated: usize,
    pub cleaned: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl PassReport {
    /// The pass had work and none of it succeeded.
    pub fn is_exhausted(&self) -> bool {
        self.targeted > 0 && self.generated == 0
    }

    pub fn merge(&mut self, other: PassReport) {
        self.targeted += other.targeted;
        self.generated += other.generated;
        self.cleaned += other.cleaned;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

/// Invoked by the writer loop after each node outcome is applied.
pub type NodeCallback<'a> = dyn FnMut(&SectionTree, NodeId) + Send + 'a;

#[derive(Clone)]
pub struct Orchestrator {
    generator: Arc<dyn TextGenerator>,
    limiter: Arc<Semaphore>,
    policy: RetryPolicy,
    call_timeout: Duration,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        max_concurrent: usize,
        policy: RetryPolicy,
        call_timeout: Duration,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            generator,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            policy,
            call_timeout,
            cancel,
        }
    }

    pub fn from_config(
        generator: Arc<dyn TextGenerator>,
        config: &DraftConfig,
        cancel: CancelFlag,
    ) -> Self {
        Self::new(
            generator,
            config.generation.max_concurrent_tasks,
            RetryPolicy::from(&config.retry),
            config.generation.call_timeout(),
            cancel,
        )
    }

    /// Replace the cancellation flag, e.g. with one owned by a signal handler.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Call the generation service until `check` accepts a response or the
    /// attempt budget is spent.
    ///
    /// The limiter permit is held for the call only, never across a backoff.
    /// Results arriving after cancellation are discarded.
    pub async fn call_until_valid<F>(&self, ctx: &PromptContext, check: F) -> CallOutcome
    where
        F: Fn(&str) -> Vec<Violation> + Send + Sync,
    {
        let mut attempts = 0;
        let mut last_error = String::new();
        let mut last_rejected = None;

        while attempts < self.policy.max_attempts {
            if self.cancel.is_cancelled() {
                return CallOutcome::Cancelled;
            }
            attempts += 1;

            let result = {
                let _permit = match self.limiter.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return CallOutcome::Exhausted {
                            attempts,
                            last_error: format!("Limiter closed: {}", e),
                            last_rejected,
                        }
                    }
                };
                if self.cancel.is_cancelled() {
                    return CallOutcome::Cancelled;
                }
                match tokio::time::timeout(self.call_timeout, self.generator.generate(ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(GenerationCallError::Timeout),
                }
            };

            if self.cancel.is_cancelled() {
                return CallOutcome::Cancelled;
            }

            let call_error = match result {
                Ok(text) => {
                    let violations = check(&text);
                    if violations.is_empty() {
                        tracing::debug!(
                            kind = ctx.kind.as_str(),
                            title = %ctx.title,
                            attempt = attempts,
                            "Generation accepted"
                        );
                        return CallOutcome::Valid {
                            content: text.trim().to_string(),
                            attempts,
                        };
                    }
                    last_error = DraftError::Validation(violations.clone()).to_string();
                    tracing::warn!(
                        kind = ctx.kind.as_str(),
                        title = %ctx.title,
                        attempt = attempts,
                        "Response rejected: {}",
                        last_error
                    );
                    last_rejected = Some((text, violations));
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        kind = ctx.kind.as_str(),
                        title = %ctx.title,
                        attempt = attempts,
                        "Generation call failed: {}",
                        e
                    );
                    last_error = DraftError::Generation(e.clone()).to_string();
                    // Only a rejection on the final attempt is eligible for cleanup.
                    last_rejected = None;
                    Some(e)
                }
            };

            if attempts < self.policy.max_attempts {
                let delay = self.policy.delay_after(attempts, call_error.as_ref());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        CallOutcome::Exhausted {
            attempts,
            last_error,
            last_rejected,
        }
    }

    /// Run one node job through the retry, validate and cleanup machinery.
    pub async fn run_job(&self, job: NodeJob) -> JobOutcome {
        let bounds = job.bounds;
        match self
            .call_until_valid(&job.ctx, move |text| validation::validate(text, bounds))
            .await
        {
            CallOutcome::Valid { content, attempts } => JobOutcome::Generated { content, attempts },
            CallOutcome::Cancelled => JobOutcome::Cancelled,
            CallOutcome::Exhausted {
                attempts,
                last_error,
                last_rejected,
            } => {
                if let Some((text, violations)) = last_rejected {
                    let cleaned = validation::cleanup(&text);
                    if !cleaned.trim().is_empty() {
                        return JobOutcome::Cleaned {
                            content: cleaned.trim().to_string(),
                            attempts,
                            violations,
                        };
                    }
                }
                JobOutcome::Failed {
                    error: last_error,
                    attempts,
                }
            }
        }
    }

    /// Dispatch `jobs` concurrently and apply each outcome as it lands.
    /// Returns once every dispatched job is terminal.
    pub(crate) async fn run_batch(
        &self,
        tree: &mut SectionTree,
        jobs: Vec<NodeJob>,
        on_node: &mut NodeCallback<'_>,
    ) -> PassReport {
        let mut report = PassReport {
            targeted: jobs.len(),
            ..PassReport::default()
        };
        let mut in_flight: HashSet<NodeId> = HashSet::new();
        let mut set = JoinSet::new();

        for job in jobs {
            if self.cancel.is_cancelled() {
                report.cancelled += 1;
                continue;
            }
            let id = job.id;
            let strategy = job.strategy;
            if strategy != GenerationStrategy::Differentiate {
                tree.node_mut(id).status = NodeStatus::Generating;
            }
            in_flight.insert(id);
            let orchestrator = self.clone();
            set.spawn(async move {
                let outcome = orchestrator.run_job(job).await;
                (id, strategy, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, strategy, outcome)) => {
                    in_flight.remove(&id);
                    apply_outcome(tree, id, strategy, outcome, &mut report);
                    on_node(tree, id);
                }
                Err(e) => tracing::error!("Generation job aborted: {}", e),
            }
        }

        // Jobs that panicked never reported back.
        for id in in_flight {
            let node = tree.node_mut(id);
            if node.status == NodeStatus::Generating {
                node.status = NodeStatus::Failed;
            }
            node.error = Some("generation job aborted".to_string());
            report.failed += 1;
            on_node(tree, id);
        }

        report
    }
}

fn apply_outcome(
    tree: &mut SectionTree,
    id: NodeId,
    strategy: GenerationStrategy,
    outcome: JobOutcome,
    report: &mut PassReport,
) {
    let node = tree.node_mut(id);

    if strategy == GenerationStrategy::Differentiate {
        match outcome {
            JobOutcome::Generated { content, attempts } => {
                node.content = content;
                node.differentiated = true;
                node.attempts = attempts;
                report.generated += 1;
            }
            JobOutcome::Cleaned {
                content, attempts, ..
            } => {
                node.content = content;
                node.differentiated = true;
                node.attempts = attempts;
                report.generated += 1;
                report.cleaned += 1;
            }
            JobOutcome::Failed { error, attempts } => {
                tracing::warn!(node = %id, title = %node.title, "Differentiation failed, keeping original: {}", error);
                node.attempts = attempts;
                report.failed += 1;
            }
            JobOutcome::Cancelled => report.cancelled += 1,
        }
        return;
    }

    match outcome {
        JobOutcome::Generated { content, attempts } => {
            node.content = content;
            node.status = NodeStatus::Generated;
            node.error = None;
            node.attempts = attempts;
            report.generated += 1;
        }
        JobOutcome::Cleaned {
            content,
            attempts,
            violations,
        } => {
            tracing::warn!(
                node = %id,
                title = %node.title,
                violations = violations.len(),
                "Retries exhausted, keeping cleaned response"
            );
            node.content = content;
            node.status = NodeStatus::Generated;
            node.error = None;
            node.attempts = attempts;
            report.generated += 1;
            report.cleaned += 1;
        }
        JobOutcome::Failed { error, attempts } => {
            tracing::warn!(node = %id, title = %node.title, attempts, "Node failed: {}", error);
            node.content.clear();
            node.status = NodeStatus::Failed;
            node.error = Some(error);
            node.attempts = attempts;
            report.failed += 1;
        }
        JobOutcome::Cancelled => {
            node.status = NodeStatus::Pending;
            report.cancelled += 1;
        }
    }
}
