//! Background Task Tracker: process-local registry of asynchronous build jobs.
//!
//! Tasks live only in memory. The Environment Store stays authoritative for what a
//! branch *is*; a task only says how far its latest build got.

use crate::core::error::HovelError;
use crate::core::store::{EnvStatus, EnvironmentRecord, EnvironmentStore};
use crate::core::time;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildTaskStatus {
    Pending,
    Building,
    Starting,
    Completed,
    Failed,
}

impl BuildTaskStatus {
    fn rank(self) -> u8 {
        match self {
            BuildTaskStatus::Pending => 0,
            BuildTaskStatus::Building => 1,
            BuildTaskStatus::Starting => 2,
            BuildTaskStatus::Completed | BuildTaskStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BuildTaskStatus::Completed | BuildTaskStatus::Failed)
    }

    /// Forward-only. Any non-terminal state may fail.
    pub fn can_advance_to(self, next: BuildTaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildTask {
    pub id: String,
    pub branch_name: String,
    pub status: BuildTaskStatus,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub result: Option<JsonValue>,
}

/// What `build-status` reports: the newest tracked task, or the persisted record
/// when this process never ran a build for the branch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum BuildStatusView {
    Task(BuildTask),
    Record {
        branch_name: String,
        status: EnvStatus,
        message: String,
        record: Box<EnvironmentRecord>,
    },
}

struct TaskEntry {
    seq: u64,
    task: BuildTask,
}

#[derive(Default)]
struct Registry {
    next_seq: u64,
    tasks: BTreeMap<String, TaskEntry>,
}

#[derive(Clone, Default)]
pub struct TaskTracker {
    inner: Arc<Mutex<Registry>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Registry>, HovelError> {
        self.inner
            .lock()
            .map_err(|_| HovelError::LockPoisoned("task registry".to_string()))
    }

    /// Adds a `pending` task. At most one non-terminal task per branch.
    pub fn register(&self, branch: &str) -> Result<String, HovelError> {
        let mut reg = self.lock()?;
        if let Some(active) = reg
            .tasks
            .values()
            .find(|e| e.task.branch_name == branch && !e.task.status.is_terminal())
        {
            return Err(HovelError::Conflict(format!(
                "Build already in progress for branch {} (task {})",
                branch, active.task.id
            )));
        }
        let seq = reg.next_seq;
        reg.next_seq += 1;
        let mut id = format!("build_{}_{}", branch, time::now_unix_millis());
        if reg.tasks.contains_key(&id) {
            id = format!("{}_{}", id, seq);
        }
        let task = BuildTask {
            id: id.clone(),
            branch_name: branch.to_string(),
            status: BuildTaskStatus::Pending,
            progress: 0,
            message: "Task queued".to_string(),
            error: None,
            created_at: time::now_rfc3339(),
            started_at: None,
            completed_at: None,
            result: None,
        };
        reg.tasks.insert(id.clone(), TaskEntry { seq, task });
        Ok(id)
    }

    /// Registers a task and runs `job` on a detached `build-<branch>` thread.
    /// A job that panics leaves its task `failed`, never stuck in progress.
    pub fn schedule<F>(&self, branch: &str, job: F) -> Result<String, HovelError>
    where
        F: FnOnce(TaskHandle) + Send + 'static,
    {
        let id = self.register(branch)?;
        let handle = self.handle(&id);
        let watchdog = self.handle(&id);
        let task_label = id.clone();
        let spawned = thread::Builder::new()
            .name(format!("build-{}", branch))
            .spawn(move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(handle))) {
                    let reason = panic_reason(payload.as_ref());
                    tracing::error!(task_id = %task_label, "Build job panicked: {}", reason);
                    // Already terminal when the panic came after complete or fail.
                    let _ = watchdog.fail(&format!("build job panicked: {}", reason));
                }
            });
        if let Err(e) = spawned {
            let _ = self.handle(&id).fail(&format!("failed to spawn build thread: {}", e));
            return Err(HovelError::IoError(e));
        }
        tracing::info!(branch, task_id = %id, "Scheduled build task");
        Ok(id)
    }

    pub fn handle(&self, task_id: &str) -> TaskHandle {
        TaskHandle {
            tracker: self.clone(),
            task_id: task_id.to_string(),
        }
    }

    pub fn get(&self, task_id: &str) -> Result<Option<BuildTask>, HovelError> {
        Ok(self.lock()?.tasks.get(task_id).map(|e| e.task.clone()))
    }

    pub fn latest_task_for(&self, branch: &str) -> Result<Option<BuildTask>, HovelError> {
        Ok(self
            .lock()?
            .tasks
            .values()
            .filter(|e| e.task.branch_name == branch)
            .max_by_key(|e| e.seq)
            .map(|e| e.task.clone()))
    }

    pub fn find_latest_for_branch(
        &self,
        branch: &str,
        store: &dyn EnvironmentStore,
    ) -> Result<BuildStatusView, HovelError> {
        if let Some(task) = self.latest_task_for(branch)? {
            return Ok(BuildStatusView::Task(task));
        }
        match store.get(branch)? {
            Some(record) => Ok(BuildStatusView::Record {
                branch_name: branch.to_string(),
                status: record.status,
                message: format!("Branch status: {}", record.status),
                record: Box::new(record),
            }),
            None => Err(HovelError::NotFound(format!(
                "No build task or branch named {}",
                branch
            ))),
        }
    }

    /// Drops terminal tasks that finished more than `max_age_hours` ago. A
    /// `completed_at` that does not parse counts as expired.
    pub fn reap(&self, max_age_hours: u64) -> Result<usize, HovelError> {
        let hours = i64::try_from(max_age_hours).unwrap_or(i64::MAX);
        let cutoff = ChronoDuration::try_hours(hours)
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let mut reg = self.lock()?;
        let before = reg.tasks.len();
        reg.tasks.retain(|_, e| match &e.task.completed_at {
            None => true,
            Some(raw) => match (time::parse_rfc3339(raw), cutoff) {
                (None, _) => false,
                (Some(done), Some(cutoff)) => done >= cutoff,
                (Some(_), None) => true,
            },
        });
        let removed = before - reg.tasks.len();
        if removed > 0 {
            tracing::info!("Cleaned up {} old background tasks", removed);
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|reg| reg.tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mutate<F>(&self, task_id: &str, f: F) -> Result<BuildTask, HovelError>
    where
        F: FnOnce(&mut BuildTask) -> Result<(), HovelError>,
    {
        let mut reg = self.lock()?;
        let entry = reg
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| HovelError::NotFound(format!("Task {} not found", task_id)))?;
        f(&mut entry.task)?;
        Ok(entry.task.clone())
    }
}

/// Write access to one task, handed to the job running it.
#[derive(Clone)]
pub struct TaskHandle {
    tracker: TaskTracker,
    task_id: String,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn snapshot(&self) -> Result<Option<BuildTask>, HovelError> {
        self.tracker.get(&self.task_id)
    }

    /// Moves to a later non-terminal status. `started_at` is stamped on entering `building`.
    pub fn advance(
        &self,
        status: BuildTaskStatus,
        progress: u8,
        message: &str,
    ) -> Result<BuildTask, HovelError> {
        self.tracker.mutate(&self.task_id, |task| {
            transition(task, status)?;
            if status == BuildTaskStatus::Building && task.started_at.is_none() {
                task.started_at = Some(time::now_rfc3339());
            }
            raise_progress(task, progress);
            task.message = message.to_string();
            Ok(())
        })
    }

    /// Raises progress without changing status. Lower values are ignored.
    pub fn progress(&self, progress: u8, message: &str) -> Result<BuildTask, HovelError> {
        self.tracker.mutate(&self.task_id, |task| {
            if task.status.is_terminal() {
                return Err(HovelError::Conflict(format!(
                    "task {} already finished",
                    task.id
                )));
            }
            raise_progress(task, progress);
            task.message = message.to_string();
            Ok(())
        })
    }

    pub fn complete(&self, message: &str, result: JsonValue) -> Result<BuildTask, HovelError> {
        self.tracker.mutate(&self.task_id, |task| {
            transition(task, BuildTaskStatus::Completed)?;
            task.progress = 100;
            task.message = message.to_string();
            task.result = Some(result);
            task.completed_at.get_or_insert_with(time::now_rfc3339);
            Ok(())
        })
    }

    pub fn fail(&self, error: &str) -> Result<BuildTask, HovelError> {
        self.tracker.mutate(&self.task_id, |task| {
            transition(task, BuildTaskStatus::Failed)?;
            task.message = format!("Build failed: {}", error);
            task.error = Some(error.to_string());
            task.completed_at.get_or_insert_with(time::now_rfc3339);
            Ok(())
        })
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn transition(task: &mut BuildTask, next: BuildTaskStatus) -> Result<(), HovelError> {
    if !task.status.can_advance_to(next) {
        return Err(HovelError::Conflict(format!(
            "task {} cannot move from {:?} to {:?}",
            task.id, task.status, next
        )));
    }
    task.status = next;
    Ok(())
}

fn raise_progress(task: &mut BuildTask, progress: u8) {
    task.progress = task.progress.max(progress.min(100));
}
