//! Task Store: the canonical record of every task and its state

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::{Task, TaskId, TaskParameters};

/// In-memory task registry shared by every engine component
///
/// A single lock covers the whole map, so multi-field updates (status plus
/// timestamps) are observed atomically by concurrent workers. Cloning is
/// cheap and yields a handle onto the same map.
#[derive(Clone, Debug, Default)]
pub struct TaskStore {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
}

impl TaskStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a task, assigning an id when it has none
    ///
    /// Registering an id that already exists overwrites the stored record.
    pub async fn register(&self, mut task: Task) -> TaskId {
        if task.id.is_empty() {
            task.id = TaskId::new();
        }
        let id = task.id.clone();

        let mut tasks = self.tasks.lock().await;
        if tasks.insert(id.clone(), task).is_some() {
            tracing::debug!(task_id = %id, "Overwrote existing task record");
        }
        id
    }

    /// Copy of the task's current record
    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.lock().await.get(id).cloned()
    }

    /// Request parameters of a task
    pub async fn parameters(&self, id: &TaskId) -> Option<TaskParameters> {
        self.tasks
            .lock()
            .await
            .get(id)
            .map(|task| task.parameters.clone())
    }

    /// Apply `mutator` to a task under the store lock
    ///
    /// The mutator runs against a copy; the copy replaces the stored record
    /// only when the mutator returns `Ok`, so a rejected transition leaves
    /// every field untouched.
    pub async fn update<F, R>(&self, id: &TaskId, mutator: F) -> Result<R>
    where
        F: FnOnce(&mut Task) -> Result<R>,
    {
        let mut tasks = self.tasks.lock().await;
        let stored = tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

        let mut draft = stored.clone();
        let value = mutator(&mut draft)?;
        *stored = draft;
        Ok(value)
    }

    /// Copies of the given tasks, keyed by id; unknown ids are skipped
    pub async fn snapshot(&self, ids: &[TaskId]) -> BTreeMap<TaskId, Task> {
        let tasks = self.tasks.lock().await;
        ids.iter()
            .filter_map(|id| tasks.get(id).map(|task| (id.clone(), task.clone())))
            .collect()
    }

    /// Number of registered tasks
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Whether no task has been registered
    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}
