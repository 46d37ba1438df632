//! SQLite database layer for tasks and workflow checkpoints.
//!
//! Uses rusqlite with WAL mode. All async-facing operations go through
//! `tokio::task::spawn_blocking` so the runtime is never blocked on disk.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::DraftError;

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, DraftError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DraftError::Persistence(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .map_err(|e| DraftError::Persistence(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| DraftError::Persistence(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        db.run_migrations()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DraftError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DraftError::Persistence(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| DraftError::Persistence(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        db.run_migrations()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    /// Locking and error conversion happen here and nowhere else.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DraftError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DraftError::Persistence(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| DraftError::Persistence(e.to_string()))
    }

    /// Execute a closure with access to the database connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, DraftError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| DraftError::Persistence(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), DraftError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tasks (
                    id              TEXT PRIMARY KEY,
                    project_id      TEXT NOT NULL,
                    task_type       TEXT NOT NULL DEFAULT 'full_workflow',
                    config          TEXT NOT NULL DEFAULT '{}',
                    status          TEXT NOT NULL DEFAULT 'pending',
                    progress        INTEGER NOT NULL DEFAULT 0,
                    current_step    TEXT,
                    retry_count     INTEGER NOT NULL DEFAULT 0,
                    max_retries     INTEGER NOT NULL DEFAULT 3,
                    error_message   TEXT,
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL,
                    started_at      INTEGER,
                    completed_at    INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

                CREATE TABLE IF NOT EXISTS task_checkpoints (
                    id              TEXT PRIMARY KEY,
                    task_id         TEXT NOT NULL,
                    step_name       TEXT NOT NULL,
                    step_order      INTEGER NOT NULL,
                    completed       INTEGER NOT NULL DEFAULT 0,
                    snapshot        TEXT,
                    started_at      INTEGER NOT NULL,
                    completed_at    INTEGER,
                    duration_ms     INTEGER,
                    updated_at      INTEGER NOT NULL DEFAULT 0,
                    UNIQUE(task_id, step_order)
                );
                CREATE INDEX IF NOT EXISTS idx_checkpoints_task ON task_checkpoints(task_id);
                ",
            )
        })
    }

    fn run_migrations(&self) -> Result<(), DraftError> {
        self.with_conn(|conn| {
            // Databases created before snapshots tracked their own write time
            // (ignore error if already present).
            let _ = conn.execute(
                "ALTER TABLE task_checkpoints ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0",
                [],
            );
            conn.execute(
                "UPDATE task_checkpoints SET updated_at = started_at WHERE updated_at = 0",
                [],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_created() {
        let db = Database::open_in_memory().unwrap();
        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .unwrap();
        assert_eq!(tables, vec!["task_checkpoints", "tasks"]);
    }

    #[test]
    fn test_open_file_db_twice_reruns_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("draftloom.db");
        let path = path.to_str().unwrap();
        Database::open(path).unwrap();
        Database::open(path).unwrap();
    }

    #[test]
    fn test_sql_errors_become_persistence_errors() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .with_conn(|conn| conn.execute("INSERT INTO missing VALUES (1)", []))
            .unwrap_err();
        assert!(matches!(err, DraftError::Persistence(_)));
    }
}
