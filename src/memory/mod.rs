// src/memory/mod.rs — Task persistence

pub mod schema;
pub mod store;

pub use store::SqliteTaskStore;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::types::{Task, TaskStatus};
use crate::infra::errors::OptimizerError;

/// Durable record of all tasks. The engine's only shared mutable state.
///
/// `update` must apply the closure and persist the result atomically with
/// respect to other `update` calls on the same task.
pub trait TaskStore: Send + Sync {
    fn load(&self, task_id: &str) -> Result<Task, OptimizerError>;

    fn save(&self, task: &Task) -> Result<(), OptimizerError>;

    /// All tasks, oldest first.
    fn list(&self) -> Result<Vec<Task>, OptimizerError>;

    /// Returns false if no such task existed.
    fn delete(&self, task_id: &str) -> Result<bool, OptimizerError>;

    /// Read-modify-write one task, returning the updated snapshot.
    fn update(
        &self,
        task_id: &str,
        apply: &mut dyn FnMut(&mut Task),
    ) -> Result<Task, OptimizerError>;
}

/// Process-local store for tests and embedding.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<String, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Task>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TaskStore for MemoryTaskStore {
    fn load(&self, task_id: &str) -> Result<Task, OptimizerError> {
        self.tasks()
            .get(task_id)
            .cloned()
            .ok_or_else(|| OptimizerError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    fn save(&self, task: &Task) -> Result<(), OptimizerError> {
        self.tasks().insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Task>, OptimizerError> {
        let mut tasks: Vec<Task> = self.tasks().values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    fn delete(&self, task_id: &str) -> Result<bool, OptimizerError> {
        Ok(self.tasks().remove(task_id).is_some())
    }

    fn update(
        &self,
        task_id: &str,
        apply: &mut dyn FnMut(&mut Task),
    ) -> Result<Task, OptimizerError> {
        let mut tasks = self.tasks();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| OptimizerError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        apply(task);
        Ok(task.clone())
    }
}

/// Pretty JSON snapshot of one task.
pub fn export_task(store: &dyn TaskStore, task_id: &str) -> Result<String, OptimizerError> {
    let task = store.load(task_id)?;
    Ok(serde_json::to_string_pretty(&task)?)
}

/// Store a task from a JSON snapshot. A snapshot whose id is already taken
/// gets a fresh id; one captured mid-run is imported as paused.
pub fn import_task(store: &dyn TaskStore, json: &str) -> Result<Task, OptimizerError> {
    let mut task: Task = serde_json::from_str(json)?;
    if store.load(&task.id).is_ok() {
        task.id = uuid::Uuid::new_v4().to_string();
    }
    if task.status == TaskStatus::InProgress {
        task.status = TaskStatus::Paused;
    }
    task.touch();
    store.save(&task)?;
    Ok(task)
}
