//! Workflow steps and the per-task workflow state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DraftError, ErrorRecord};
use crate::orchestration::PassReport;
use crate::outline::ParseWarning;
use crate::tree::{NodeStatus, SectionTree};
use crate::validation::ValidationReport;

/// The strictly ordered steps of a generation task. Each is a checkpoint boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    ParseDocument,
    GenerateOutline,
    BuildSectionTree,
    GenerateLeafContent,
    GenerateParentSummaries,
    Differentiate,
    Validate,
    Finalize,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 8] = [
        Self::ParseDocument,
        Self::GenerateOutline,
        Self::BuildSectionTree,
        Self::GenerateLeafContent,
        Self::GenerateParentSummaries,
        Self::Differentiate,
        Self::Validate,
        Self::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseDocument => "parse_document",
            Self::GenerateOutline => "generate_outline",
            Self::BuildSectionTree => "build_section_tree",
            Self::GenerateLeafContent => "generate_leaf_content",
            Self::GenerateParentSummaries => "generate_parent_summaries",
            Self::Differentiate => "differentiate",
            Self::Validate => "validate",
            Self::Finalize => "finalize",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.as_str() == s)
    }

    /// 1-based position; the checkpoint key.
    pub fn order(&self) -> u32 {
        *self as u32 + 1
    }

    pub fn from_order(order: u32) -> Option<Self> {
        Self::ALL.get(order.checked_sub(1)? as usize).copied()
    }

    pub fn next(&self) -> Option<Self> {
        Self::from_order(self.order() + 1)
    }

    /// Share of overall progress, in percent. The weights sum to 100.
    pub fn weight(&self) -> u8 {
        match self {
            Self::ParseDocument => 5,
            Self::GenerateOutline => 10,
            Self::BuildSectionTree => 5,
            Self::GenerateLeafContent => 40,
            Self::GenerateParentSummaries => 20,
            Self::Differentiate => 10,
            Self::Validate => 5,
            Self::Finalize => 5,
        }
    }

    /// Progress reached once every step before this one completed.
    pub fn progress_before(&self) -> u8 {
        Self::ALL
            .iter()
            .take_while(|s| *s != self)
            .map(|s| s.weight())
            .sum()
    }

    pub fn progress_after(&self) -> u8 {
        self.progress_before() + self.weight()
    }

    /// Progress part-way through this step.
    pub fn progress_within(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.progress_before();
        }
        let share = (self.weight() as usize * done.min(total)) / total;
        self.progress_before() + share as u8
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// One section of the finished document, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledSection {
    pub number: String,
    pub title: String,
    pub level: usize,
    pub content: String,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub sections: usize,
    pub leaves: usize,
    pub generated: usize,
    pub failed: usize,
    pub differentiated: usize,
    pub characters: usize,
}

/// Pass reports of the generation steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReports {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaves: Option<PassReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<PassReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differentiation: Option<PassReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
}

/// Everything a generation task knows. Mutated only by the executor and
/// snapshotted into checkpoints at every step boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub task_id: String,
    pub project_id: String,
    pub status: WorkflowStatus,
    /// Step most recently entered.
    pub step: WorkflowStep,
    /// Step whose result this state already contains.
    #[serde(default)]
    pub last_completed: Option<WorkflowStep>,
    pub document_content: String,
    /// Caller-supplied or generated outline text.
    #[serde(default)]
    pub outline: Option<String>,
    #[serde(default)]
    pub key_requirements: Vec<String>,
    /// Requirements and scoring analysis used for outline generation.
    #[serde(default)]
    pub analysis: Option<String>,
    #[serde(default)]
    pub tree: SectionTree,
    #[serde(default)]
    pub parse_warnings: Vec<ParseWarning>,
    pub differentiation_enabled: bool,
    pub validation_enabled: bool,
    #[serde(default)]
    pub reports: StepReports,
    #[serde(default)]
    pub sections: Vec<AssembledSection>,
    #[serde(default)]
    pub summary: Option<DocumentSummary>,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub error: Option<ErrorRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(
        task_id: impl Into<String>,
        project_id: impl Into<String>,
        document_content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            project_id: project_id.into(),
            status: WorkflowStatus::Pending,
            step: WorkflowStep::ParseDocument,
            last_completed: None,
            document_content: document_content.into(),
            outline: None,
            key_requirements: Vec::new(),
            analysis: None,
            tree: SectionTree::new(),
            parse_warnings: Vec::new(),
            differentiation_enabled: true,
            validation_enabled: true,
            reports: StepReports::default(),
            sections: Vec::new(),
            summary: None,
            progress: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Use `outline` instead of asking the generation service for one.
    pub fn with_outline(mut self, outline: impl Into<String>) -> Self {
        self.outline = Some(outline.into());
        self
    }

    pub fn with_differentiation(mut self, enabled: bool) -> Self {
        self.differentiation_enabled = enabled;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation_enabled = enabled;
        self
    }

    /// Whether this state already holds the result of `step`.
    pub fn has_completed(&self, step: WorkflowStep) -> bool {
        self.last_completed.is_some_and(|done| done >= step)
    }

    pub fn to_snapshot(&self) -> Result<String, DraftError> {
        serde_json::to_string(self)
            .map_err(|e| DraftError::Internal(format!("Failed to serialize workflow state: {}", e)))
    }

    pub fn from_snapshot(snapshot: &str) -> Result<Self, DraftError> {
        serde_json::from_str(snapshot).map_err(|e| {
            DraftError::Persistence(format!("Corrupt workflow snapshot: {}", e))
        })
    }
}
