use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::DraftError;
use crate::models::checkpoint::Checkpoint;
use crate::workflow::WorkflowStep;

/// Persistence of workflow step boundaries.
///
/// Records are keyed by `(task_id, step order)`. Writes are idempotent:
/// starting an existing step, completing a completed step, or writing
/// progress onto a completed step leaves the stored record untouched.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn record_step_start(&self, task_id: &str, step: WorkflowStep) -> Result<(), DraftError>;

    /// Store a partial snapshot for a step that has not completed.
    async fn record_step_progress(
        &self,
        task_id: &str,
        step: WorkflowStep,
        snapshot: &str,
    ) -> Result<(), DraftError>;

    async fn record_step_complete(
        &self,
        task_id: &str,
        step: WorkflowStep,
        snapshot: &str,
    ) -> Result<(), DraftError>;

    async fn load_step(
        &self,
        task_id: &str,
        step: WorkflowStep,
    ) -> Result<Option<Checkpoint>, DraftError>;

    /// The completed record with the highest step order.
    async fn load_latest_checkpoint(&self, task_id: &str) -> Result<Option<Checkpoint>, DraftError>;

    async fn list_checkpoints(&self, task_id: &str) -> Result<Vec<Checkpoint>, DraftError>;
}

const CHECKPOINT_COLUMNS: &str = "id, task_id, step_name, step_order, completed, snapshot,
     started_at, completed_at, duration_ms, updated_at";

#[derive(Clone)]
pub struct SqliteCheckpointStore {
    db: Database,
}

impl SqliteCheckpointStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn record_step_start(&self, task_id: &str, step: WorkflowStep) -> Result<(), DraftError> {
        let task_id = task_id.to_string();
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO task_checkpoints
                       (id, task_id, step_name, step_order, completed, started_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
                     ON CONFLICT(task_id, step_order) DO NOTHING",
                    rusqlite::params![id, task_id, step.as_str(), step.order(), now],
                )?;
                Ok(())
            })
            .await
    }

    async fn record_step_progress(
        &self,
        task_id: &str,
        step: WorkflowStep,
        snapshot: &str,
    ) -> Result<(), DraftError> {
        let task_id = task_id.to_string();
        let snapshot = snapshot.to_string();
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO task_checkpoints
                       (id, task_id, step_name, step_order, completed, snapshot, started_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)
                     ON CONFLICT(task_id, step_order) DO UPDATE SET
                       snapshot = excluded.snapshot,
                       updated_at = excluded.updated_at
                     WHERE task_checkpoints.completed = 0",
                    rusqlite::params![id, task_id, step.as_str(), step.order(), snapshot, now],
                )?;
                Ok(())
            })
            .await
    }

    async fn record_step_complete(
        &self,
        task_id: &str,
        step: WorkflowStep,
        snapshot: &str,
    ) -> Result<(), DraftError> {
        let task_id = task_id.to_string();
        let snapshot = snapshot.to_string();
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO task_checkpoints
                       (id, task_id, step_name, step_order, completed, snapshot,
                        started_at, completed_at, duration_ms, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6, 0, ?6)
                     ON CONFLICT(task_id, step_order) DO UPDATE SET
                       completed = 1,
                       snapshot = excluded.snapshot,
                       completed_at = excluded.completed_at,
                       duration_ms = excluded.completed_at - task_checkpoints.started_at,
                       updated_at = excluded.updated_at
                     WHERE task_checkpoints.completed = 0",
                    rusqlite::params![id, task_id, step.as_str(), step.order(), snapshot, now],
                )?;
                Ok(())
            })
            .await
    }

    async fn load_step(
        &self,
        task_id: &str,
        step: WorkflowStep,
    ) -> Result<Option<Checkpoint>, DraftError> {
        let task_id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM task_checkpoints WHERE task_id = ?1 AND step_order = ?2",
                    CHECKPOINT_COLUMNS
                ))?;
                stmt.query_row(rusqlite::params![task_id, step.order()], |row| {
                    Ok(row_to_checkpoint(row))
                })
                .optional()
            })
            .await
    }

    async fn load_latest_checkpoint(&self, task_id: &str) -> Result<Option<Checkpoint>, DraftError> {
        let task_id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM task_checkpoints
                     WHERE task_id = ?1 AND completed = 1
                     ORDER BY step_order DESC LIMIT 1",
                    CHECKPOINT_COLUMNS
                ))?;
                stmt.query_row(rusqlite::params![task_id], |row| Ok(row_to_checkpoint(row)))
                    .optional()
            })
            .await
    }

    async fn list_checkpoints(&self, task_id: &str) -> Result<Vec<Checkpoint>, DraftError> {
        let task_id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM task_checkpoints WHERE task_id = ?1 ORDER BY step_order ASC",
                    CHECKPOINT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![task_id], |row| Ok(row_to_checkpoint(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

use rusqlite::Row;

fn row_to_checkpoint(row: &Row<'_>) -> Checkpoint {
    let started_ms: i64 = row.get(6).unwrap_or(0);
    let completed_ms: Option<i64> = row.get(7).unwrap_or(None);
    let updated_ms: i64 = row.get(9).unwrap_or(0);

    Checkpoint {
        id: row.get(0).unwrap_or_default(),
        task_id: row.get(1).unwrap_or_default(),
        step_name: row.get(2).unwrap_or_default(),
        step_order: row.get(3).unwrap_or(0),
        completed: row.get::<_, i64>(4).unwrap_or(0) != 0,
        snapshot: row.get(5).unwrap_or(None),
        started_at: chrono::DateTime::from_timestamp_millis(started_ms).unwrap_or_else(Utc::now),
        completed_at: completed_ms.and_then(chrono::DateTime::from_timestamp_millis),
        duration_ms: row.get(8).unwrap_or(None),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::{TaskRecord, TaskType};
    use crate::store::TaskStore;

    async fn store_with_task(task_id: &str) -> SqliteCheckpointStore {
        let db = Database::open_in_memory().unwrap();
        TaskStore::new(db.clone())
            .create(&TaskRecord::new(
                task_id.to_string(),
                "p".to_string(),
                TaskType::FullWorkflow,
                serde_json::Value::Null,
                3,
            ))
            .await
            .unwrap();
        SqliteCheckpointStore::new(db)
    }

    #[tokio::test]
    async fn test_start_then_complete() {
        let store = store_with_task("t1").await;
        store
            .record_step_start("t1", WorkflowStep::ParseDocument)
            .await
            .unwrap();
        let started = store
            .load_step("t1", WorkflowStep::ParseDocument)
            .await
            .unwrap()
            .unwrap();
        assert!(!started.completed);
        assert!(started.snapshot.is_none());
        assert!(store.load_latest_checkpoint("t1").await.unwrap().is_none());

        store
            .record_step_complete("t1", WorkflowStep::ParseDocument, "{\"a\":1}")
            .await
            .unwrap();
        let latest = store.load_latest_checkpoint("t1").await.unwrap().unwrap();
        assert_eq!(latest.step_name, "parse_document");
        assert_eq!(latest.step_order, 1);
        assert!(latest.completed);
        assert_eq!(latest.snapshot.as_deref(), Some("{\"a\":1}"));
        assert!(latest.completed_at.is_some());
        assert!(latest.duration_ms.unwrap() >= 0);
        assert_eq!(latest.id, started.id);
    }

    #[tokio::test]
    async fn test_completed_record_is_immutable() {
        let store = store_with_task("t1").await;
        store
            .record_step_complete("t1", WorkflowStep::GenerateOutline, "first")
            .await
            .unwrap();
        store
            .record_step_complete("t1", WorkflowStep::GenerateOutline, "second")
            .await
            .unwrap();
        store
            .record_step_progress("t1", WorkflowStep::GenerateOutline, "partial")
            .await
            .unwrap();
        store
            .record_step_start("t1", WorkflowStep::GenerateOutline)
            .await
            .unwrap();

        let all = store.list_checkpoints("t1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].completed);
        assert_eq!(all[0].snapshot.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_progress_overwrites_partial_snapshot() {
        let store = store_with_task("t1").await;
        store
            .record_step_start("t1", WorkflowStep::GenerateLeafContent)
            .await
            .unwrap();
        store
            .record_step_progress("t1", WorkflowStep::GenerateLeafContent, "one")
            .await
            .unwrap();
        store
            .record_step_progress("t1", WorkflowStep::GenerateLeafContent, "two")
            .await
            .unwrap();
        let cp = store
            .load_step("t1", WorkflowStep::GenerateLeafContent)
            .await
            .unwrap()
            .unwrap();
        assert!(!cp.completed);
        assert_eq!(cp.snapshot.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_latest_is_highest_completed_step() {
        let store = store_with_task("t1").await;
        for step in [
            WorkflowStep::ParseDocument,
            WorkflowStep::GenerateOutline,
            WorkflowStep::BuildSectionTree,
        ] {
            store.record_step_complete("t1", step, step.as_str()).await.unwrap();
        }
        store
            .record_step_start("t1", WorkflowStep::GenerateLeafContent)
            .await
            .unwrap();

        let latest = store.load_latest_checkpoint("t1").await.unwrap().unwrap();
        assert_eq!(latest.step_name, "build_section_tree");
        let orders: Vec<u32> = store
            .list_checkpoints("t1")
            .await
            .unwrap()
            .iter()
            .map(|c| c.step_order)
            .collect();
        assert_eq!(orders, vec![1, 2, 3, 4]);
    }
}
