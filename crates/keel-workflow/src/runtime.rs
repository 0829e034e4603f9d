//! Task runtime contract
//!
//! Workflows do not persist anything themselves. They report the stage
//! they are about to wait on, and whether they completed or failed, to a
//! [`TaskRuntime`]. The runtime also guarantees that at most one
//! top-level task runs per object at a time.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::{Error, Result};

/// Identity of one workflow run
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskId {
    id: Uuid,
    name: &'static str,
    object: String,
    parent: Option<Uuid>,
}

impl TaskId {
    /// Top-level task `name` operating on `object`
    pub fn new(name: &'static str, object: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            object: object.into(),
            parent: None,
        }
    }

    /// Sub-task started by `parent`
    pub fn child_of(parent: &TaskId, name: &'static str, object: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.id),
            ..Self::new(name, object)
        }
    }

    /// Unique run id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Workflow name, e.g. "cluster-create"
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cluster, machine or resource id the task operates on
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Parent run id for sub-tasks
    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    /// True for tasks not started by another task
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.object)
    }
}

/// Held while a task runs; releases the task's slot when dropped
pub struct TaskGuard {
    task: TaskId,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl TaskGuard {
    /// Guard that runs `release` on drop
    pub fn new(task: TaskId, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            task,
            release: Some(Box::new(release)),
        }
    }

    /// Guard with nothing to release (sub-tasks share their parent's slot)
    pub fn unguarded(task: TaskId) -> Self {
        Self {
            task,
            release: None,
        }
    }

    /// Task this guard belongs to
    pub fn task(&self) -> &TaskId {
        &self.task
    }
}

impl fmt::Debug for TaskGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGuard")
            .field("task", &self.task)
            .field("holds_slot", &self.release.is_some())
            .finish()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Persistence and exclusion for workflow runs
#[async_trait]
pub trait TaskRuntime: Send + Sync {
    /// Claim the task; fails if another top-level task holds the object
    async fn begin(&self, task: &TaskId) -> Result<TaskGuard>;

    /// Record the stage whose result the task is now waiting on
    async fn set_stage(&self, task: &TaskId, stage: &str) -> Result<()>;

    /// Record successful completion
    async fn stage_complete(&self, task: &TaskId) -> Result<()>;

    /// Record failure with a human-readable reason
    async fn stage_failed(&self, task: &TaskId, reason: &str) -> Result<()>;
}

/// What happened to a task
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageEventKind {
    /// Task claimed its slot
    Begun,
    /// Task entered a stage
    Entered(String),
    /// Task completed
    Completed,
    /// Task failed
    Failed(String),
}

/// One entry of the in-memory task history
#[derive(Clone, Debug)]
pub struct StageEvent {
    /// Task the event belongs to
    pub task: TaskId,
    /// What happened
    pub kind: StageEventKind,
    /// When it was recorded
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    active: DashMap<String, Uuid>,
    events: Mutex<Vec<StageEvent>>,
}

impl Inner {
    fn events(&self) -> MutexGuard<'_, Vec<StageEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, task: &TaskId, kind: StageEventKind) {
        self.events().push(StageEvent {
            task: task.clone(),
            kind,
            at: Utc::now(),
        });
    }
}

/// Process-local runtime keeping the stage history in memory
#[derive(Clone, Default)]
pub struct InMemoryRuntime {
    inner: Arc<Inner>,
}

impl InMemoryRuntime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far, oldest first
    pub fn events(&self) -> Vec<StageEvent> {
        self.inner.events().clone()
    }

    /// Names of tasks in the order they began
    pub fn started_tasks(&self) -> Vec<&'static str> {
        self.inner
            .events()
            .iter()
            .filter(|e| e.kind == StageEventKind::Begun)
            .map(|e| e.task.name())
            .collect()
    }

    /// Stages entered by tasks named `name`, in order
    pub fn stages_of(&self, name: &str) -> Vec<String> {
        self.inner
            .events()
            .iter()
            .filter(|e| e.task.name() == name)
            .filter_map(|e| match &e.kind {
                StageEventKind::Entered(stage) => Some(stage.clone()),
                _ => None,
            })
            .collect()
    }

    /// Failure reasons recorded for tasks named `name`
    pub fn failures_of(&self, name: &str) -> Vec<String> {
        self.inner
            .events()
            .iter()
            .filter(|e| e.task.name() == name)
            .filter_map(|e| match &e.kind {
                StageEventKind::Failed(reason) => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    /// True while a top-level task holds `object`
    pub fn is_active(&self, object: &str) -> bool {
        self.inner.active.contains_key(object)
    }
}

#[async_trait]
impl TaskRuntime for InMemoryRuntime {
    async fn begin(&self, task: &TaskId) -> Result<TaskGuard> {
        if !task.is_root() {
            self.inner.record(task, StageEventKind::Begun);
            return Ok(TaskGuard::unguarded(task.clone()));
        }

        match self.inner.active.entry(task.object().to_string()) {
            Entry::Occupied(held) => {
                return Err(Error::runtime(
                    task.to_string(),
                    format!("object already has active task {}", held.get()),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(task.id());
            }
        }
        self.inner.record(task, StageEventKind::Begun);
        debug!(task = %task, id = %task.id(), "task started");

        let inner = Arc::clone(&self.inner);
        let key = task.object().to_string();
        let id = task.id();
        Ok(TaskGuard::new(task.clone(), move || {
            inner.active.remove_if(&key, |_, holder| *holder == id);
        }))
    }

    async fn set_stage(&self, task: &TaskId, stage: &str) -> Result<()> {
        debug!(task = %task, stage = %stage, "task stage");
        self.inner
            .record(task, StageEventKind::Entered(stage.to_string()));
        Ok(())
    }

    async fn stage_complete(&self, task: &TaskId) -> Result<()> {
        debug!(task = %task, "task complete");
        self.inner.record(task, StageEventKind::Completed);
        Ok(())
    }

    async fn stage_failed(&self, task: &TaskId, reason: &str) -> Result<()> {
        debug!(task = %task, reason = %reason, "task failed");
        self.inner
            .record(task, StageEventKind::Failed(reason.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_root_task_on_same_object_is_refused() {
        let runtime = InMemoryRuntime::new();
        let first = TaskId::new("cluster-create", "c1");
        let _guard = runtime.begin(&first).await.expect("first task");

        let second = TaskId::new("cluster-delete", "c1");
        let err = runtime.begin(&second).await.unwrap_err();
        assert!(matches!(err, Error::Runtime { .. }));
    }

    #[tokio::test]
    async fn dropping_the_guard_frees_the_object() {
        let runtime = InMemoryRuntime::new();
        let task = TaskId::new("cluster-create", "c1");
        {
            let _guard = runtime.begin(&task).await.expect("begin");
            assert!(runtime.is_active("c1"));
        }
        assert!(!runtime.is_active("c1"));
        runtime
            .begin(&TaskId::new("cluster-delete", "c1"))
            .await
            .expect("object is free again");
    }

    #[tokio::test]
    async fn sub_tasks_run_inside_the_parent_slot() {
        let runtime = InMemoryRuntime::new();
        let parent = TaskId::new("cluster-create", "c1");
        let _guard = runtime.begin(&parent).await.expect("begin");

        let child = TaskId::child_of(&parent, "cluster-apply-addons", "c1");
        assert_eq!(child.parent(), Some(parent.id()));
        runtime.begin(&child).await.expect("child shares the slot");
    }

    #[tokio::test]
    async fn unrelated_objects_run_in_parallel() {
        let runtime = InMemoryRuntime::new();
        let _a = runtime
            .begin(&TaskId::new("cluster-create", "c1"))
            .await
            .expect("c1");
        let _b = runtime
            .begin(&TaskId::new("cluster-create", "c2"))
            .await
            .expect("c2");
    }

    #[tokio::test]
    async fn history_keeps_stage_order() {
        let runtime = InMemoryRuntime::new();
        let task = TaskId::new("cluster-sync-status", "c1");
        runtime.set_stage(&task, "synced").await.expect("stage");
        runtime.stage_failed(&task, "refused").await.expect("fail");

        assert_eq!(runtime.stages_of("cluster-sync-status"), vec!["synced"]);
        assert_eq!(runtime.failures_of("cluster-sync-status"), vec!["refused"]);
        assert_eq!(task.to_string(), "cluster-sync-status/c1");
    }
}
