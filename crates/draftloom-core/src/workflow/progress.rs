//! Progress reporting for a running workflow.

use serde::{Deserialize, Serialize};

use super::schema::{WorkflowStatus, WorkflowStep};
use crate::tree::{NodeId, NodeStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StepStarted {
        step: WorkflowStep,
        progress: u8,
    },
    /// A completed checkpoint was found; the step was not executed again.
    StepReplayed {
        step: WorkflowStep,
        progress: u8,
    },
    /// Disabled by configuration and auto-completed.
    StepSkipped {
        step: WorkflowStep,
        progress: u8,
    },
    StepCompleted {
        step: WorkflowStep,
        progress: u8,
    },
    NodeCompleted {
        step: WorkflowStep,
        node: NodeId,
        title: String,
        status: NodeStatus,
        done: usize,
        total: usize,
        progress: u8,
    },
    Finished {
        status: WorkflowStatus,
        progress: u8,
    },
}

impl ProgressEvent {
    pub fn progress(&self) -> u8 {
        match self {
            Self::StepStarted { progress, .. }
            | Self::StepReplayed { progress, .. }
            | Self::StepSkipped { progress, .. }
            | Self::StepCompleted { progress, .. }
            | Self::NodeCompleted { progress, .. }
            | Self::Finished { progress, .. } => *progress,
        }
    }

    /// Step the event belongs to, if any.
    pub fn step(&self) -> Option<WorkflowStep> {
        match self {
            Self::StepStarted { step, .. }
            | Self::StepReplayed { step, .. }
            | Self::StepSkipped { step, .. }
            | Self::StepCompleted { step, .. }
            | Self::NodeCompleted { step, .. } => Some(*step),
            Self::Finished { .. } => None,
        }
    }
}

/// Receives progress events. Called from the executor's writer loop, so
/// implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, task_id: &str, event: &ProgressEvent);
}

/// Discards every event.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_event(&self, _task_id: &str, _event: &ProgressEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&str, &ProgressEvent) + Send + Sync,
{
    fn on_event(&self, task_id: &str, event: &ProgressEvent) {
        self(task_id, event)
    }
}

/// Forwards events into a channel, for consumers that persist them.
pub struct ChannelProgress {
    tx: tokio::sync::mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn on_event(&self, _task_id: &str, event: &ProgressEvent) {
        // The receiver going away only means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}
