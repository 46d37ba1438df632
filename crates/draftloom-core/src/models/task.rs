use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Retry,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retry => "retry",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            "retry" => Self::Retry,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FullWorkflow,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullWorkflow => "full_workflow",
        }
    }

    pub fn from_str(_s: &str) -> Self {
        Self::FullWorkflow
    }
}

/// Persisted handle of one generation task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub project_id: String,
    pub task_type: TaskType,
    /// Options the task was submitted with.
    #[serde(default)]
    pub config: serde_json::Value,
    pub status: TaskStatus,
    /// 0..=100
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(
        id: String,
        project_id: String,
        task_type: TaskType,
        config: serde_json::Value,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id,
            task_type,
            config,
            status: TaskStatus::Pending,
            progress: 0,
            current_step: None,
            retry_count: 0,
            max_retries,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
