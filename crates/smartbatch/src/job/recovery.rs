//! Settling jobs whose runner is gone.
//!
//! A job persisted as created, running or paused by a process that stopped
//! has nobody left to drive it. Settling skips its pending documents, fails
//! the ones that were in flight and moves the job to its derived terminal
//! status, so it can be observed as finished and purged.

use super::model::{GenerationJob, JobStatusSnapshot};
use super::state::{JobStatus, TaskStatus};
use super::task::TaskError;
use crate::broadcast::JobTracker;
use crate::error::StateError;

pub const ABANDONED_KIND: &str = "abandoned";

fn abandoned() -> TaskError {
    TaskError {
        kind: ABANDONED_KIND.to_string(),
        message: "Document was in flight when its runner stopped".to_string(),
        retryable: false,
    }
}

/// Settles an orphaned job through `tracker` and returns its final snapshot.
/// A job that is already terminal is returned unchanged.
pub fn settle_orphan(
    snapshot: JobStatusSnapshot,
    tracker: &JobTracker,
) -> Result<JobStatusSnapshot, StateError> {
    if snapshot.is_terminal() {
        return Ok(snapshot);
    }

    let mut job = GenerationJob::restore(snapshot);
    if matches!(job.status(), JobStatus::Created | JobStatus::Paused) {
        job.transition(JobStatus::Running)?;
    }

    let unsettled: Vec<(usize, TaskStatus)> = job
        .tasks()
        .iter()
        .filter(|t| !t.status().is_terminal())
        .map(|t| (t.index(), t.status()))
        .collect();
    for (index, status) in unsettled {
        let task = job.task_mut(index)?;
        match status {
            TaskStatus::Running => task.fail(abandoned())?,
            _ => task.skip()?,
        }
        tracker.task_changed(&job, index);
    }

    let status = job.settle()?;
    tracker.job_changed(&job);
    log::warn!("Settled orphaned generation {} as {}", job.id(), status);
    Ok(job.snapshot())
}
