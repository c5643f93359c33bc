use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Core;
use crate::error::{Entity, Error, Result};
use crate::types::{Task, TaskPatch, TaskStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DismissAllResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// User-visible progress records of background work.
#[derive(Clone)]
pub struct TaskService {
    core: Arc<Core>,
}

impl TaskService {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    /// Tasks are private to their owner.
    async fn owned(&self, id: &str, user_id: &str) -> Result<Task> {
        let task = self.core.caches.task.get(id).await?;
        if task.user_id != user_id {
            return Err(Error::NotFound(Entity::Task));
        }
        Ok(task)
    }

    pub async fn create(
        &self,
        user_id: &str,
        name: &str,
        status: TaskStatus,
        object: Option<&str>,
    ) -> Result<Task> {
        self.core.create_task(user_id, name, status, object).await
    }

    pub async fn patch(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
        self.core.patch_task(id, patch).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.core.store.get_task(id)?.is_none() {
            return Err(Error::NotFound(Entity::Task));
        }
        self.core.delete_task(id).await
    }

    pub async fn find(&self, id: &str, user_id: &str) -> Result<Task> {
        self.owned(id, user_id).await
    }

    pub fn list(&self, user_id: &str) -> Result<Vec<Task>> {
        self.core.store.list_tasks_for_user(user_id)
    }

    pub fn count(&self, user_id: &str) -> Result<i64> {
        self.core.store.count_tasks_for_user(user_id)
    }

    /// Removes a failed task from the user's list.
    pub async fn dismiss(&self, id: &str, user_id: &str) -> Result<()> {
        let task = self.owned(id, user_id).await?;
        if !task.has_error() {
            return Err(Error::bad_request(
                "task_not_dismissible",
                "only failed tasks can be dismissed",
            ));
        }
        self.core.delete_task(&task.id).await
    }

    pub async fn dismiss_all(&self, user_id: &str) -> Result<DismissAllResult> {
        let mut result = DismissAllResult::default();
        for task in self.core.store.list_tasks_for_user(user_id)? {
            if !task.has_error() {
                continue;
            }
            match self.core.delete_task(&task.id).await {
                Ok(()) => result.succeeded.push(task.id),
                Err(e) => {
                    tracing::warn!("Failed to dismiss task {}: {}", task.id, e);
                    result.failed.push(task.id);
                }
            }
        }
        Ok(result)
    }

    /// Flags the task so the pipeline stops after its current stage.
    pub async fn cancel(&self, id: &str, user_id: &str) -> Result<Task> {
        let mut task = self.owned(id, user_id).await?;
        if matches!(task.status, TaskStatus::Success | TaskStatus::Error) {
            return Err(Error::bad_request(
                "task_already_finished",
                format!("task is already {}", task.status.as_str()),
            ));
        }
        task.cancelled = true;
        self.core.store.save_task(&task)?;
        self.core.caches.task.set(&task).await;
        tracing::info!("Cancelled task {}", task.id);
        Ok(task)
    }
}
