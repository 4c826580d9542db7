//! Job and task status events for live observers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::job_store::JobStore;
use crate::job::{GenerationId, GenerationJob, JobStatus, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    JobStatusChanged {
        status: JobStatus,
    },
    TaskStatusChanged {
        index: usize,
        status: TaskStatus,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub generation_id: GenerationId,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(generation_id: &GenerationId, kind: JobEventKind) -> Self {
        Self {
            generation_id: generation_id.clone(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Registers `job` in the store and returns the tracker that every later
    /// change of that job goes through.
    pub fn start_job(&self, job: &GenerationJob, store: Arc<JobStore>) -> JobTracker {
        store.record_created(job);
        let tracker = JobTracker {
            store,
            sender: Arc::clone(&self.sender),
        };
        tracker.broadcast_job(job);
        tracker
    }

    /// Tracker for a job the store already knows, such as one loaded from
    /// the database.
    pub fn resume_job(&self, store: Arc<JobStore>) -> JobTracker {
        JobTracker {
            store,
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Persists then announces each change of one job, so a change is
/// observable in the store before any subscriber hears about it.
pub struct JobTracker {
    store: Arc<JobStore>,
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobTracker {
    pub fn job_changed(&self, job: &GenerationJob) {
        self.store.record_job(job);
        self.broadcast_job(job);
    }

    pub fn task_changed(&self, job: &GenerationJob, index: usize) {
        self.store.record_task(job, index);
        if let Some(task) = job.task(index) {
            let _ = self.sender.send(JobEvent::new(
                job.id(),
                JobEventKind::TaskStatusChanged {
                    index,
                    status: task.status(),
                    attempts: task.attempts(),
                },
            ));
        }
    }

    fn broadcast_job(&self, job: &GenerationJob) {
        let _ = self.sender.send(JobEvent::new(
            job.id(),
            JobEventKind::JobStatusChanged {
                status: job.status(),
            },
        ));
    }
}
