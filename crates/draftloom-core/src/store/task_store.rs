use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::DraftError;
use crate::models::task::{TaskRecord, TaskStatus, TaskType};

const TASK_COLUMNS: &str = "id, project_id, task_type, config, status, progress, current_step,
     retry_count, max_retries, error_message, created_at, updated_at, started_at, completed_at";

#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, task: &TaskRecord) -> Result<(), DraftError> {
        let t = task.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                        TASK_COLUMNS
                    ),
                    rusqlite::params![
                        t.id,
                        t.project_id,
                        t.task_type.as_str(),
                        serde_json::to_string(&t.config).unwrap_or_else(|_| "{}".to_string()),
                        t.status.as_str(),
                        t.progress,
                        t.current_step,
                        t.retry_count,
                        t.max_retries,
                        t.error_message,
                        t.created_at.timestamp_millis(),
                        t.updated_at.timestamp_millis(),
                        t.started_at.map(|d| d.timestamp_millis()),
                        t.completed_at.map(|d| d.timestamp_millis()),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<TaskRecord>, DraftError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS))?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_task(row)))
                    .optional()
            })
            .await
    }

    /// Like [`get`](Self::get), but a missing task is an error.
    pub async fn require(&self, id: &str) -> Result<TaskRecord, DraftError> {
        self.get(id)
            .await?
            .ok_or_else(|| DraftError::NotFound(format!("task {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<TaskRecord>, DraftError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM tasks ORDER BY created_at DESC",
                    TASK_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_task(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_by_project(&self, project_id: &str) -> Result<Vec<TaskRecord>, DraftError> {
        let project_id = project_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM tasks WHERE project_id = ?1 ORDER BY created_at DESC",
                    TASK_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![project_id], |row| Ok(row_to_task(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn update_progress(
        &self,
        id: &str,
        progress: u8,
        current_step: Option<&str>,
    ) -> Result<(), DraftError> {
        let id = id.to_string();
        let current_step = current_step.map(|s| s.to_string());
        let progress = progress.min(100);
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE tasks SET progress = ?1, current_step = COALESCE(?2, current_step),
                     updated_at = ?3 WHERE id = ?4",
                    rusqlite::params![progress, current_step, now, id],
                )?;
                Ok(())
            })
            .await
    }

    /// Move a task to `status`. Entering `Running` stamps `started_at` once;
    /// terminal statuses stamp `completed_at`.
    pub async fn set_status(&self, id: &str, status: TaskStatus) -> Result<(), DraftError> {
        let task_id = id.to_string();
        let now = Utc::now().timestamp_millis();
        let updated = self
            .db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE tasks SET status = ?1, updated_at = ?2,
                       started_at = CASE WHEN ?1 = 'running' AND started_at IS NULL THEN ?2 ELSE started_at END,
                       completed_at = CASE WHEN ?3 THEN ?2 ELSE NULL END
                     WHERE id = ?4",
                    rusqlite::params![status.as_str(), now, status.is_terminal(), task_id],
                )
            })
            .await?;
        if updated == 0 {
            return Err(DraftError::NotFound(format!("task {}", id)));
        }
        Ok(())
    }

    /// Bump the task-level retry counter and return its new value.
    pub async fn increment_retry(&self, id: &str) -> Result<u32, DraftError> {
        let id = id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE tasks SET retry_count = retry_count + 1, updated_at = ?1 WHERE id = ?2",
                    rusqlite::params![now, id],
                )?;
                conn.query_row(
                    "SELECT retry_count FROM tasks WHERE id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
            })
            .await
    }

    pub async fn set_error(&self, id: &str, message: Option<&str>) -> Result<(), DraftError> {
        let id = id.to_string();
        let message = message.map(|s| s.to_string());
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE tasks SET error_message = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![message, now, id],
                )?;
                Ok(())
            })
            .await
    }
}

use rusqlite::Row;

fn row_to_task(row: &Row<'_>) -> TaskRecord {
    let config_str: String = row.get(3).unwrap_or_default();
    let created_ms: i64 = row.get(10).unwrap_or(0);
    let updated_ms: i64 = row.get(11).unwrap_or(0);
    let started_ms: Option<i64> = row.get(12).unwrap_or(None);
    let completed_ms: Option<i64> = row.get(13).unwrap_or(None);

    TaskRecord {
        id: row.get(0).unwrap_or_default(),
        project_id: row.get(1).unwrap_or_default(),
        task_type: TaskType::from_str(&row.get::<_, String>(2).unwrap_or_default()),
        config: serde_json::from_str(&config_str).unwrap_or(serde_json::Value::Null),
        status: TaskStatus::from_str(&row.get::<_, String>(4).unwrap_or_default()),
        progress: row.get(5).unwrap_or(0),
        current_step: row.get(6).unwrap_or(None),
        retry_count: row.get(7).unwrap_or(0),
        max_retries: row.get(8).unwrap_or(0),
        error_message: row.get(9).unwrap_or(None),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
        started_at: started_ms.and_then(chrono::DateTime::from_timestamp_millis),
        completed_at: completed_ms.and_then(chrono::DateTime::from_timestamp_millis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TaskStore {
        TaskStore::new(Database::open_in_memory().unwrap())
    }

    fn task(id: &str) -> TaskRecord {
        TaskRecord::new(
            id.to_string(),
            "proj-1".to_string(),
            TaskType::FullWorkflow,
            serde_json::json!({ "differentiation": true }),
            3,
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store();
        store.create(&task("t1")).await.unwrap();
        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.project_id, "proj-1");
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.task_type, TaskType::FullWorkflow);
        assert_eq!(loaded.config["differentiation"], true);
        assert_eq!(loaded.max_retries, 3);
        assert!(store.get("missing").await.unwrap().is_none());
        assert!(matches!(
            store.require("missing").await,
            Err(DraftError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_transitions_stamp_times() {
        let store = store();
        store.create(&task("t1")).await.unwrap();

        store.set_status("t1", TaskStatus::Running).await.unwrap();
        let running = store.require("t1").await.unwrap();
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        store.set_status("t1", TaskStatus::Success).await.unwrap();
        let done = store.require("t1").await.unwrap();
        assert_eq!(done.status, TaskStatus::Success);
        assert_eq!(done.started_at, running.started_at);
        assert!(done.completed_at.is_some());

        assert!(matches!(
            store.set_status("nope", TaskStatus::Running).await,
            Err(DraftError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_progress_retry_and_error() {
        let store = store();
        store.create(&task("t1")).await.unwrap();

        store
            .update_progress("t1", 42, Some("generate_leaf_content"))
            .await
            .unwrap();
        store.update_progress("t1", 150, None).await.unwrap();
        assert_eq!(store.increment_retry("t1").await.unwrap(), 1);
        assert_eq!(store.increment_retry("t1").await.unwrap(), 2);
        store.set_error("t1", Some("boom")).await.unwrap();

        let loaded = store.require("t1").await.unwrap();
        assert_eq!(loaded.progress, 100);
        assert_eq!(loaded.current_step.as_deref(), Some("generate_leaf_content"));
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.error_message.as_deref(), Some("boom"));

        store.set_error("t1", None).await.unwrap();
        assert!(store.require("t1").await.unwrap().error_message.is_none());
    }

    #[tokio::test]
    async fn test_list_by_project() {
        let store = store();
        store.create(&task("t1")).await.unwrap();
        let mut other = task("t2");
        other.project_id = "proj-2".to_string();
        store.create(&other).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);
        let only = store.list_by_project("proj-2").await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, "t2");
    }
}
