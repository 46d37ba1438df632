use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One step boundary of one task. At most one record exists per
/// `(task_id, step_order)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub task_id: String,
    pub step_name: String,
    pub step_order: u32,
    pub completed: bool,
    /// Serialized workflow state: final for completed records, partial otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// When the snapshot was last written.
    pub updated_at: DateTime<Utc>,
}
