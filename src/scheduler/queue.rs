//! Ready Queue: FIFO of task ids awaiting execution

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::types::TaskId;

/// First-in-first-out queue shared by producers (orchestrator, retry timers)
/// and consumers (workers, `run_one`)
#[derive(Clone, Debug, Default)]
pub struct ReadyQueue {
    ids: Arc<Mutex<VecDeque<TaskId>>>,
}

impl ReadyQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id at the back
    pub async fn enqueue(&self, id: TaskId) {
        self.ids.lock().await.push_back(id);
    }

    /// Put an id back at the front, ahead of everything queued
    pub async fn push_front(&self, id: TaskId) {
        self.ids.lock().await.push_front(id);
    }

    /// Take the id at the front
    pub async fn dequeue(&self) -> Option<TaskId> {
        self.ids.lock().await.pop_front()
    }

    /// Whether nothing is waiting
    pub async fn is_empty(&self) -> bool {
        self.ids.lock().await.is_empty()
    }

    /// Number of waiting ids
    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    /// Remove every occurrence of `id` without running it
    ///
    /// Returns true if the id was queued.
    pub async fn remove(&self, id: &TaskId) -> bool {
        let mut ids = self.ids.lock().await;
        let original_len = ids.len();
        ids.retain(|queued| queued != id);
        ids.len() < original_len
    }
}
