//! The generation job record and its externally visible snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::{GenerationId, JobStatus, TaskStatus};
use super::task::DocumentTask;
use crate::config::InteractionMode;
use crate::error::StateError;

/// Job-level outcome for a set of settled task statuses: `Completed` if all
/// succeeded, `Failed` if none did, `PartiallyCompleted` otherwise.
pub fn terminal_status_for<I>(statuses: I) -> JobStatus
where
    I: IntoIterator<Item = TaskStatus>,
{
    let mut total = 0usize;
    let mut succeeded = 0usize;
    for status in statuses {
        total += 1;
        if status == TaskStatus::Succeeded {
            succeeded += 1;
        }
    }

    if succeeded == 0 {
        JobStatus::Failed
    } else if succeeded == total {
        JobStatus::Completed
    } else {
        JobStatus::PartiallyCompleted
    }
}

#[derive(Debug, Clone)]
pub struct GenerationJob {
    id: GenerationId,
    mode: InteractionMode,
    status: JobStatus,
    tasks: Vec<DocumentTask>,
    owner: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    /// Registers a job with one pending task per record, in dataset order.
    pub fn new(
        id: GenerationId,
        mode: InteractionMode,
        record_count: usize,
        owner: Option<String>,
    ) -> Self {
        Self {
            id,
            mode,
            status: JobStatus::Created,
            tasks: (0..record_count).map(DocumentTask::new).collect(),
            owner,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Rebuilds a job from a stored snapshot, e.g. one left behind by a
    /// process that stopped mid-run.
    pub fn restore(snapshot: JobStatusSnapshot) -> Self {
        Self {
            id: snapshot.generation_id,
            mode: snapshot.mode,
            status: snapshot.status,
            tasks: snapshot.tasks,
            owner: snapshot.owner,
            created_at: snapshot.created_at,
            started_at: snapshot.started_at,
            completed_at: snapshot.completed_at,
        }
    }

    pub fn id(&self) -> &GenerationId {
        &self.id
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn tasks(&self) -> &[DocumentTask] {
        &self.tasks
    }

    pub fn task(&self, index: usize) -> Option<&DocumentTask> {
        self.tasks.get(index)
    }

    pub fn task_mut(&mut self, index: usize) -> Result<&mut DocumentTask, StateError> {
        self.tasks
            .get_mut(index)
            .ok_or(StateError::UnknownTask { index })
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), StateError> {
        let allowed = self.status.can_transition_to(next)
            && (next != JobStatus::Paused || self.mode == InteractionMode::Stepwise);
        if !allowed {
            return Err(StateError::InvalidJobTransition {
                from: self.status,
                to: next,
            });
        }

        match next {
            JobStatus::Running if self.started_at.is_none() => self.started_at = Some(Utc::now()),
            status if status.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn all_tasks_settled(&self) -> bool {
        self.tasks.iter().all(|t| t.status().is_terminal())
    }

    /// The terminal status the job should settle in, once every task has
    /// settled. `None` while any task is still pending or running.
    pub fn derive_terminal_status(&self) -> Option<JobStatus> {
        if !self.all_tasks_settled() {
            return None;
        }
        Some(terminal_status_for(self.tasks.iter().map(|t| t.status())))
    }

    /// Moves the job into its derived terminal status.
    pub fn settle(&mut self) -> Result<JobStatus, StateError> {
        let status = self.derive_terminal_status().ok_or_else(|| {
            let unsettled = self
                .tasks
                .iter()
                .filter(|t| !t.status().is_terminal())
                .count();
            StateError::UnsettledTasks { unsettled }
        })?;
        self.transition(status)?;
        Ok(status)
    }

    pub fn snapshot(&self) -> JobStatusSnapshot {
        JobStatusSnapshot {
            generation_id: self.id.clone(),
            mode: self.mode,
            status: self.status,
            owner: self.owner.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            tasks: self.tasks.clone(),
        }
    }
}

/// Task counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Job status plus every task status, as returned by `job_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusSnapshot {
    pub generation_id: GenerationId,
    pub mode: InteractionMode,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub tasks: Vec<DocumentTask>,
}

impl JobStatusSnapshot {
    pub fn task(&self, index: usize) -> Option<&DocumentTask> {
        self.tasks.get(index)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for task in &self.tasks {
            match task.status() {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}
