// src/memory/store.rs — SQLite task store

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{schema, TaskStore};
use crate::core::types::Task;
use crate::infra::errors::OptimizerError;

/// Tasks persisted as JSON snapshots, one row each. A single connection
/// behind a mutex serializes writers, so every `update` is atomic.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, OptimizerError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        schema::run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, OptimizerError> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-write rolls back its transaction, so the data is intact
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read(conn: &Connection, task_id: &str) -> Result<Option<Task>, OptimizerError> {
        let snapshot: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM tasks WHERE id = ?1",
                params![task_id],
                |r| r.get(0),
            )
            .optional()?;
        match snapshot {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn write(conn: &Connection, task: &Task) -> Result<(), OptimizerError> {
        let snapshot = serde_json::to_string(task)?;
        conn.execute(
            "INSERT INTO tasks (id, name, status, snapshot, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at",
            params![
                task.id,
                task.name,
                task.status.to_string(),
                snapshot,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl TaskStore for SqliteTaskStore {
    fn load(&self, task_id: &str) -> Result<Task, OptimizerError> {
        let conn = self.conn();
        Self::read(&conn, task_id)?.ok_or_else(|| OptimizerError::TaskNotFound {
            task_id: task_id.to_string(),
        })
    }

    fn save(&self, task: &Task) -> Result<(), OptimizerError> {
        let conn = self.conn();
        Self::write(&conn, task)
    }

    fn list(&self) -> Result<Vec<Task>, OptimizerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT snapshot FROM tasks ORDER BY created_at")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(serde_json::from_str(&row?)?);
        }
        Ok(tasks)
    }

    fn delete(&self, task_id: &str) -> Result<bool, OptimizerError> {
        let conn = self.conn();
        let n = conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(n > 0)
    }

    fn update(
        &self,
        task_id: &str,
        apply: &mut dyn FnMut(&mut Task),
    ) -> Result<Task, OptimizerError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let mut task = Self::read(&tx, task_id)?.ok_or_else(|| OptimizerError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;
        apply(&mut task);
        Self::write(&tx, &task)?;
        tx.commit()?;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CaseInput, TaskOptions, TaskStatus, TestMode, TestSet};

    fn sample(name: &str) -> Task {
        Task::new(
            name,
            TestSet {
                mode: TestMode::Descriptive,
                data: vec![CaseInput {
                    input: "q".into(),
                    output: "a polite answer".into(),
                }],
            },
            "Answer politely.",
            TaskOptions::default(),
        )
    }

    #[test]
    fn test_save_and_load() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = sample("one");
        store.save(&task).unwrap();
        assert_eq!(store.load(&task.id).unwrap(), task);
    }

    #[test]
    fn test_load_missing() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let err = store.load("nope").unwrap_err();
        assert!(matches!(err, OptimizerError::TaskNotFound { .. }));
    }

    #[test]
    fn test_update_persists_and_returns_snapshot() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let task = sample("one");
        store.save(&task).unwrap();
        let updated = store
            .update(&task.id, &mut |t| t.set_status(TaskStatus::Paused))
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Paused);
        assert_eq!(store.load(&task.id).unwrap().status, TaskStatus::Paused);
    }

    #[test]
    fn test_list_and_delete() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let a = sample("a");
        let b = sample("b");
        store.save(&a).unwrap();
        store.save(&b).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
        assert!(store.delete(&a.id).unwrap());
        assert!(!store.delete(&a.id).unwrap());
        let left = store.list().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "b");
    }
}
